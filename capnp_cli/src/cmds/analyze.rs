/* Analyze command - layout report for every compiled constructor */

use super::common::load_schemas;
use anyhow::bail;
use capnp_gen::{compile_schema, CompiledRecord, ConstructorBody, LayoutIr, StructConstructor};
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IrOutputFormat {
    Json,
    Yaml,
}

/* Execute the analyze command */
pub fn run(
    files: Vec<PathBuf>,
    record: Option<String>,
    print_ir: bool,
    ir_format: IrOutputFormat,
) -> anyhow::Result<()> {
    let schema = load_schemas(&files)?;
    if let Some(name) = record.as_deref() {
        if schema.record(name).is_none() {
            bail!("record '{name}' not found in {} file(s)", files.len());
        }
    }

    let compiled = compile_schema(&schema);

    if print_ir {
        let ir = LayoutIr::from_compiled(&compiled);
        let text = match ir_format {
            IrOutputFormat::Json => ir.to_json()?,
            IrOutputFormat::Yaml => ir.to_yaml()?,
        };
        println!("{text}");
        return Ok(());
    }

    println!("[~] Compiled {} record(s) from {} file(s)\n", compiled.records.len(), files.len());
    for compiled_record in compiled.records.values() {
        if record.as_deref().is_some_and(|name| name != compiled_record.name) {
            continue;
        }
        print_record(compiled_record);
    }

    let failures = compiled.errors().count();
    let stubs = compiled.stubs().count();
    println!("[~] {stubs} stub constructor(s), {failures} synthesis failure(s)");
    if failures > 0 {
        bail!("{failures} constructor(s) could not be synthesized");
    }
    Ok(())
}

fn print_record(record: &CompiledRecord) {
    println!(
        "{} (data words: {}, pointer words: {}, {} bytes)",
        record.name,
        record.extent.data_words,
        record.extent.ptr_words,
        record.extent.total_bytes()
    );
    for (name, result) in &record.constructors {
        match result {
            Ok(ctor) => print_constructor(ctor),
            Err(err) => println!("  {name}: [ERROR] {err}"),
        }
    }
    println!();
}

fn print_constructor(ctor: &StructConstructor) {
    println!("  {}", ctor.signature());
    match ctor.body() {
        ConstructorBody::Stub(unsupported) => {
            println!("    [STUB] {}", unsupported.message());
        }
        ConstructorBody::Packer(layout) => {
            println!("    format: \"{}\" ({} bytes)", layout.format(), layout.format().byte_len());
            if let Some(disc) = layout.discriminator() {
                println!("    discriminant: {} at byte {}", disc.value, disc.offset);
            }
            for field in layout.fields() {
                let mask = field
                    .xor_mask
                    .map(|m| format!(" xor 0x{m:x}"))
                    .unwrap_or_default();
                println!(
                    "    {:>5}  {:<8} {}{}",
                    field.offset,
                    field.class.code(),
                    field.name,
                    mask
                );
            }
        }
    }
}
