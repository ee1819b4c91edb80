use crate::types::{Extent, FieldSpec};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Result alias used when loading schema documents.
pub type SchemaResult<T> = Result<T, SchemaError>;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schema document: {0}")]
    Parse(#[from] serde_yml::Error),

    #[error("record '{0}' is defined more than once")]
    DuplicateRecord(String),
}

/// One record type (a capnp struct) as declared by the schema.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct RecordSpec {
    pub name: String,
    #[serde(default)]
    pub data_words: u16,
    #[serde(default)]
    pub ptr_words: u16,
    /// Location of the union discriminant, in multiples of 16 bits.
    #[serde(default)]
    pub discriminant_offset: Option<u32>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl RecordSpec {
    pub fn new(name: impl Into<String>, data_words: u16, ptr_words: u16) -> Self {
        Self {
            name: name.into(),
            data_words,
            ptr_words,
            discriminant_offset: None,
            fields: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: Vec<FieldSpec>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_discriminant_offset(mut self, offset: u32) -> Self {
        self.discriminant_offset = Some(offset);
        self
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.data_words, self.ptr_words)
    }

    pub fn has_union(&self) -> bool {
        self.fields.iter().any(|f| f.discriminant_value.is_some())
    }

    /// Fields outside the anonymous union, in declaration order.
    pub fn common_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(|f| f.discriminant_value.is_none())
    }

    /// Union members, in declaration order.
    pub fn union_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(|f| f.discriminant_value.is_some())
    }
}

/// A full schema document: the set of record types compiled together.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Schema {
    #[serde(default)]
    pub records: Vec<RecordSpec>,
}

impl Schema {
    pub fn new(records: Vec<RecordSpec>) -> Self {
        Self { records }
    }

    pub fn from_yaml_str(text: &str) -> SchemaResult<Self> {
        let schema: Schema = serde_yml::from_str(text)?;
        schema.check_unique_names()?;
        Ok(schema)
    }

    pub fn load(path: &Path) -> SchemaResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Appends the records of `other`, rejecting names already present.
    pub fn merge(&mut self, other: Schema) -> SchemaResult<()> {
        self.records.extend(other.records);
        self.check_unique_names()
    }

    pub fn record(&self, name: &str) -> Option<&RecordSpec> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn extent_of(&self, name: &str) -> Option<Extent> {
        self.record(name).map(RecordSpec::extent)
    }

    fn check_unique_names(&self) -> SchemaResult<()> {
        let mut seen = HashSet::new();
        for record in &self.records {
            if !seen.insert(record.name.as_str()) {
                return Err(SchemaError::DuplicateRecord(record.name.clone()));
            }
        }
        Ok(())
    }
}
