/* Construct command - build one record from JSON arguments */

use super::common::{hex_dump, json_arguments, load_schemas};
use anyhow::{anyhow, Context};
use capnp_gen::compile_schema;
use std::path::PathBuf;

/* Execute the construct command */
pub fn run(
    files: Vec<PathBuf>,
    record: String,
    constructor: String,
    args: String,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let schema = load_schemas(&files)?;
    let compiled = compile_schema(&schema);

    let compiled_record = compiled
        .record(&record)
        .ok_or_else(|| anyhow!("record '{record}' not found"))?;
    let ctor = match compiled_record.constructors.get(&constructor) {
        Some(Ok(ctor)) => ctor,
        Some(Err(err)) => return Err(anyhow!(err.clone())),
        None => {
            let known: Vec<&str> = compiled_record.constructors.keys().map(String::as_str).collect();
            return Err(anyhow!(
                "record '{record}' has no constructor '{constructor}' (available: {})",
                known.join(", ")
            ));
        }
    };

    let json: serde_json::Value = serde_json::from_str(&args).context("parsing --args as JSON")?;
    let arguments = json_arguments(&compiled, ctor, &json)?;
    tracing::debug!(constructor = %ctor, "constructing");
    let buffer = ctor.construct(arguments)?;

    match output {
        Some(path) => {
            std::fs::write(&path, buffer.as_bytes())
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote {} bytes to {}", buffer.len(), path.display());
        }
        None => {
            println!("{} ({} bytes)", ctor, buffer.len());
            print!("{}", hex_dump(buffer.as_bytes()));
        }
    }
    Ok(())
}
