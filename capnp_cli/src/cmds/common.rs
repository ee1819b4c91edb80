/* Helpers shared between the analyze and construct commands */

use anyhow::{anyhow, bail, Context};
use capnp_gen::{
    ArgShape, Arguments, CompiledSchema, FieldClass, Layout, ListElement, PackCode, StructConstructor,
    StructTarget, Value, DEFAULT_CONSTRUCTOR,
};
use capnp_types::Schema;
use serde_json::Value as Json;
use std::fmt::Write as _;
use std::path::PathBuf;

/* Key selecting a non-default constructor for a nested struct object */
const CONSTRUCTOR_KEY: &str = "$constructor";

/* Load and merge every schema file */
pub fn load_schemas(files: &[PathBuf]) -> anyhow::Result<Schema> {
    let mut schema = Schema::default();
    for file in files {
        let loaded = Schema::load(file).with_context(|| format!("loading {}", file.display()))?;
        tracing::debug!(file = %file.display(), records = loaded.records.len(), "loaded schema file");
        schema
            .merge(loaded)
            .with_context(|| format!("merging {}", file.display()))?;
    }
    Ok(schema)
}

/* Convert a JSON object of named arguments into constructor arguments */
pub fn json_arguments(
    compiled: &CompiledSchema,
    ctor: &StructConstructor,
    args: &Json,
) -> anyhow::Result<Arguments> {
    let object = match args {
        Json::Object(object) => object,
        Json::Null => return Ok(Arguments::new()),
        other => bail!("arguments for {ctor} must be a JSON object, got {other}"),
    };

    /* Stubs fail on invocation regardless of their arguments */
    let Some(layout) = ctor.layout() else {
        return Ok(Arguments::new());
    };

    let mut arguments = Arguments::new();
    for (name, json) in object {
        if name == CONSTRUCTOR_KEY {
            continue;
        }
        let Some(argument) = ctor.arguments().iter().find(|a| &a.name == name) else {
            bail!("{ctor} has no argument named '{name}'");
        };
        let value = shape_value(compiled, layout, &argument.shape, json)
            .with_context(|| format!("argument '{name}' of {ctor}"))?;
        arguments = arguments.with(name.clone(), value);
    }
    Ok(arguments)
}

fn shape_value(compiled: &CompiledSchema, layout: &Layout, shape: &ArgShape, json: &Json) -> anyhow::Result<Value> {
    match shape {
        ArgShape::Void => Ok(Value::Void),
        ArgShape::Slot(id) => {
            let field = layout
                .field_for_slot(*id)
                .ok_or_else(|| anyhow!("slot {id} has no placed field"))?;
            class_value(compiled, &field.class, json)
        }
        ArgShape::Group { name, members } => {
            let Json::Array(items) = json else {
                bail!("group '{name}' expects a JSON array of {} values", members.len());
            };
            if items.len() != members.len() {
                bail!("group '{name}' expects {} values, got {}", members.len(), items.len());
            }
            members
                .iter()
                .zip(items)
                .map(|(member, item)| shape_value(compiled, layout, member, item))
                .collect::<anyhow::Result<Vec<_>>>()
                .map(Value::Group)
        }
        ArgShape::Nullable { value, .. } => match json {
            Json::Null => Ok(Value::Null),
            _ => shape_value(compiled, layout, &ArgShape::Slot(*value), json),
        },
    }
}

fn class_value(compiled: &CompiledSchema, class: &FieldClass, json: &Json) -> anyhow::Result<Value> {
    if json.is_null() {
        return Ok(Value::Null);
    }
    match class {
        FieldClass::Primitive(code) => primitive_value(*code, json),
        FieldClass::Text => text_value(json),
        FieldClass::Data => data_value(json),
        FieldClass::Struct(target) => struct_value(compiled, target, json),
        FieldClass::List(element) => {
            let Json::Array(items) = json else {
                bail!("expected a JSON array, got {json}");
            };
            items
                .iter()
                .map(|item| match element {
                    _ if item.is_null() => Ok(Value::Null),
                    ListElement::Primitive(code) => primitive_value(*code, item),
                    ListElement::Text => text_value(item),
                    ListElement::Struct(target) => struct_value(compiled, target, item),
                })
                .collect::<anyhow::Result<Vec<_>>>()
                .map(Value::List)
        }
        FieldClass::AnyPointer => match json {
            Json::String(text) => Ok(Value::text(text.as_str())),
            Json::Array(_) => data_value(json),
            other => bail!("any-pointer accepts a string or byte array, got {other}"),
        },
    }
}

fn primitive_value(code: PackCode, json: &Json) -> anyhow::Result<Value> {
    match json {
        Json::Bool(v) => Ok(Value::Bool(*v)),
        Json::Number(n) if matches!(code, PackCode::Float32 | PackCode::Float64) => n
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| anyhow!("{n} is not a valid {code}")),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_u64().map(Value::UInt))
            .ok_or_else(|| anyhow!("{n} is not an integer")),
        other => bail!("expected a number for {code}, got {other}"),
    }
}

fn text_value(json: &Json) -> anyhow::Result<Value> {
    match json {
        Json::String(text) => Ok(Value::text(text.as_str())),
        other => bail!("expected a string, got {other}"),
    }
}

fn data_value(json: &Json) -> anyhow::Result<Value> {
    match json {
        Json::String(text) => Ok(Value::data(text.as_bytes())),
        Json::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| anyhow!("{item} is not a byte"))
            })
            .collect::<anyhow::Result<Vec<u8>>>()
            .map(Value::Data),
        other => bail!("expected a byte array or string, got {other}"),
    }
}

/* Nested records are built with their own constructor first */
fn struct_value(compiled: &CompiledSchema, target: &StructTarget, json: &Json) -> anyhow::Result<Value> {
    let constructor = json
        .get(CONSTRUCTOR_KEY)
        .and_then(Json::as_str)
        .unwrap_or(DEFAULT_CONSTRUCTOR);
    let ctor = compiled
        .constructor(target.name(), constructor)
        .ok_or_else(|| anyhow!("record {} has no constructor '{constructor}'", target.name()))?;
    let arguments = json_arguments(compiled, ctor, json)?;
    let buffer = ctor.construct(arguments)?;
    Ok(Value::Struct(buffer))
}

/* Word-per-line hex dump with byte offsets */
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (idx, word) in bytes.chunks(8).enumerate() {
        let _ = write!(out, "{:06x}:", idx * 8);
        for byte in word {
            let _ = write!(out, " {byte:02x}");
        }
        out.push('\n');
    }
    out
}
