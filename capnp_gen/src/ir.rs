//! Serializable export of compiled layouts.
//!
//! The IR mirrors what the compiler decided for every constructor: its
//! arguments with default literals, the placed fields with offsets, packing
//! codes and XOR masks, the discriminator, and the pack format string. Stub
//! constructors carry their diagnostic instead of a layout.
//!
//! # Example
//! ```
//! use capnp_gen::ir::*;
//! use capnp_gen::compile_schema;
//! use capnp_types::Schema;
//!
//! let schema = Schema::from_yaml_str("records: []").unwrap();
//! let ir = LayoutIr::from_compiled(&compile_schema(&schema));
//! assert_eq!(ir.version, IR_SCHEMA_VERSION);
//! assert!(ir.records.is_empty());
//! ```

use crate::errors::IrError;
use crate::layout::{LowLevelField, PackCode};
use crate::schema::{CompiledRecord, CompiledSchema};
use crate::structor::{ConstructorBody, StructConstructor};
use serde_derive::Serialize;

/// Schema version used for every serialized IR export.
pub const IR_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct LayoutIr {
    pub version: u32,
    pub records: Vec<RecordIr>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecordIr {
    pub name: String,
    pub data_words: u16,
    pub ptr_words: u16,
    pub constructors: Vec<ConstructorIr>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case", tag = "status")]
pub enum ConstructorIr {
    Packer {
        name: String,
        arguments: Vec<ArgumentIr>,
        format: String,
        fields: Vec<FieldIr>,
        #[serde(skip_serializing_if = "Option::is_none")]
        discriminator: Option<DiscriminatorIr>,
    },
    Stub {
        name: String,
        arguments: Vec<ArgumentIr>,
        diagnostic: String,
    },
    /// Synthesis failed; no constructor exists.
    Failed { name: String, error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ArgumentIr {
    pub name: String,
    pub default: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldIr {
    pub name: String,
    pub offset: usize,
    pub code: PackCode,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xor_mask: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DiscriminatorIr {
    pub offset: usize,
    pub value: u16,
}

impl LayoutIr {
    pub fn new(records: Vec<RecordIr>) -> Self {
        Self {
            version: IR_SCHEMA_VERSION,
            records,
        }
    }

    pub fn from_compiled(compiled: &CompiledSchema) -> Self {
        Self::new(compiled.records.values().map(RecordIr::from_compiled).collect())
    }

    pub fn to_json(&self) -> Result<String, IrError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String, IrError> {
        Ok(serde_yml::to_string(self)?)
    }
}

impl RecordIr {
    pub fn from_compiled(record: &CompiledRecord) -> Self {
        let constructors = record
            .constructors
            .iter()
            .map(|(name, result)| match result {
                Ok(ctor) => ConstructorIr::from_constructor(ctor),
                Err(err) => ConstructorIr::Failed {
                    name: name.clone(),
                    error: err.to_string(),
                },
            })
            .collect();
        Self {
            name: record.name.clone(),
            data_words: record.extent.data_words,
            ptr_words: record.extent.ptr_words,
            constructors,
        }
    }
}

impl ConstructorIr {
    pub fn from_constructor(ctor: &StructConstructor) -> Self {
        let arguments = ctor
            .arguments()
            .iter()
            .map(|a| ArgumentIr {
                name: a.name.clone(),
                default: a.default.to_string(),
            })
            .collect();
        match ctor.body() {
            ConstructorBody::Packer(layout) => ConstructorIr::Packer {
                name: ctor.name().to_string(),
                arguments,
                format: layout.format().to_string(),
                fields: layout.fields().iter().map(FieldIr::from_field).collect(),
                discriminator: layout.discriminator().map(|d| DiscriminatorIr {
                    offset: d.offset,
                    value: d.value,
                }),
            },
            ConstructorBody::Stub(unsupported) => ConstructorIr::Stub {
                name: ctor.name().to_string(),
                arguments,
                diagnostic: unsupported.message().to_string(),
            },
        }
    }
}

impl FieldIr {
    fn from_field(field: &LowLevelField) -> Self {
        Self {
            name: field.name.clone(),
            offset: field.offset,
            code: field.class.code(),
            kind: field.source.type_tag.to_string(),
            xor_mask: field.xor_mask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compile_schema;
    use capnp_types::{DefaultValue, FieldSpec, RecordSpec, Schema, SlotSpec, TypeTag};

    fn schema() -> Schema {
        Schema::new(vec![
            RecordSpec::new("Point", 1, 1).with_fields(vec![
                FieldSpec::slot("x", SlotSpec::new(0, TypeTag::Int32).with_default(DefaultValue::Int(3))),
                FieldSpec::slot("label", SlotSpec::new(0, TypeTag::Text)),
            ]),
            RecordSpec::new("Flags", 1, 0)
                .with_fields(vec![FieldSpec::slot("on", SlotSpec::new(0, TypeTag::Bool))]),
        ])
    }

    #[test]
    fn json_export_carries_layouts_and_stubs() {
        let ir = LayoutIr::from_compiled(&compile_schema(&schema()));
        let json: serde_json::Value = serde_json::from_str(&ir.to_json().expect("json")).expect("parse");

        assert_eq!(json["version"], IR_SCHEMA_VERSION);
        let point = &json["records"][0]["constructors"][0];
        assert_eq!(point["status"], "packer");
        assert_eq!(point["format"], "ixxxxP");
        assert_eq!(point["fields"][0]["xor-mask"], 3);
        assert_eq!(point["fields"][1]["code"], "pointer");
        assert!(point["fields"][1].get("xor-mask").is_none());

        let flags = &json["records"][1]["constructors"][0];
        assert_eq!(flags["status"], "stub");
        assert_eq!(flags["diagnostic"], "unsupported field type: on (bool)");
    }

    #[test]
    fn yaml_export_renders() {
        let ir = LayoutIr::from_compiled(&compile_schema(&schema()));
        let yaml = ir.to_yaml().expect("yaml");
        assert!(yaml.contains("name: Point"));
        assert!(yaml.contains("status: stub"));
    }
}
