/* Schema-wide compilation
 *
 * Every record is compiled independently: an unsupported record yields
 * stub constructors and a duplicate-name record yields a synthesis error,
 * but neither stops the rest of the schema from compiling. Records with a
 * union get one constructor per arm (`new_<arm>`), each receiving the
 * record's common fields plus that arm; other records get a single `new`.
 */

use crate::errors::{SynthesisError, UnsupportedRepresentation};
use crate::flatten::{flatten, Discriminator};
use crate::structor::{compile_record, synthesize, StructConstructor};
use capnp_types::{Extent, FieldSpec, RecordSpec, Schema};
use indexmap::IndexMap;

pub const DEFAULT_CONSTRUCTOR: &str = "new";

#[derive(Debug, Clone)]
pub struct CompiledRecord {
    pub name: String,
    pub extent: Extent,
    pub constructors: IndexMap<String, Result<StructConstructor, SynthesisError>>,
}

impl CompiledRecord {
    pub fn constructor(&self, name: &str) -> Option<&StructConstructor> {
        self.constructors.get(name).and_then(|c| c.as_ref().ok())
    }

    /// Constructors that were synthesized, stubs included.
    pub fn synthesized(&self) -> impl Iterator<Item = &StructConstructor> {
        self.constructors.values().filter_map(|c| c.as_ref().ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = &SynthesisError> {
        self.constructors.values().filter_map(|c| c.as_ref().err())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompiledSchema {
    pub records: IndexMap<String, CompiledRecord>,
}

impl CompiledSchema {
    pub fn record(&self, name: &str) -> Option<&CompiledRecord> {
        self.records.get(name)
    }

    pub fn constructor(&self, record: &str, constructor: &str) -> Option<&StructConstructor> {
        self.record(record)?.constructor(constructor)
    }

    pub fn errors(&self) -> impl Iterator<Item = &SynthesisError> {
        self.records.values().flat_map(|r| r.errors())
    }

    pub fn stubs(&self) -> impl Iterator<Item = &StructConstructor> {
        self.records
            .values()
            .flat_map(|r| r.synthesized())
            .filter(|c| c.is_stub())
    }
}

/// Compiles every record of `schema`.
#[tracing::instrument(skip_all, fields(records = schema.records.len()))]
pub fn compile_schema(schema: &Schema) -> CompiledSchema {
    let records = schema
        .records
        .iter()
        .map(|record| (record.name.clone(), compile(schema, record)))
        .collect();
    CompiledSchema { records }
}

fn compile(schema: &Schema, record: &RecordSpec) -> CompiledRecord {
    let extent = record.extent();
    let mut constructors = IndexMap::new();

    if !record.has_union() {
        let result = compile_record(&record.name, DEFAULT_CONSTRUCTOR, &record.fields, extent, None, schema);
        constructors.insert(DEFAULT_CONSTRUCTOR.to_string(), result);
    } else {
        for arm in record.union_fields() {
            let name = format!("{DEFAULT_CONSTRUCTOR}_{}", arm.name);
            // Arms sharing a name land in each other's argument list, so the
            // first one already carries the duplicate-name error.
            if constructors.contains_key(&name) {
                continue;
            }
            let fields: Vec<FieldSpec> = record
                .fields
                .iter()
                .filter(|f| f.discriminant_value.is_none() || f.name == arm.name)
                .cloned()
                .collect();
            let value = arm.discriminant_value.unwrap_or_default();

            let result = match record.discriminant_offset {
                Some(offset) => compile_record(
                    &record.name,
                    &name,
                    &fields,
                    extent,
                    Some(Discriminator { offset, value }),
                    schema,
                ),
                None => {
                    let flat = flatten(&fields, None);
                    let missing = UnsupportedRepresentation::new(format!(
                        "record {} has union fields but no discriminant offset",
                        record.name
                    ));
                    synthesize(&record.name, &name, flat, Err(missing))
                }
            };
            constructors.insert(name, result);
        }
    }

    for (name, result) in &constructors {
        match result {
            Ok(ctor) => match ctor.diagnostic() {
                Some(message) => {
                    tracing::warn!(record = %record.name, constructor = %name, %message, "falling back to stub constructor")
                }
                None => {
                    let format = ctor.layout().map(|l| l.format().to_string()).unwrap_or_default();
                    tracing::debug!(record = %record.name, constructor = %name, %format, "compiled constructor")
                }
            },
            Err(err) => tracing::warn!(record = %record.name, constructor = %name, error = %err, "constructor not synthesized"),
        }
    }

    CompiledRecord {
        name: record.name.clone(),
        extent,
        constructors,
    }
}

/// Compiles a single record looked up by name, resolving struct references
/// against the rest of `schema`.
pub fn compile_named(schema: &Schema, record: &str) -> Option<CompiledRecord> {
    schema.record(record).map(|spec| compile(schema, spec))
}
