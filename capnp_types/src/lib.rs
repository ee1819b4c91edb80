//! Schema Type Definitions
//!
//! This crate contains the schema-side data model consumed by the struct
//! layout compiler: records, their declared fields, physical type tags and
//! declared default values. It performs no layout computation of its own;
//! the only I/O it offers is loading a schema document from YAML.

pub mod schema;
pub mod types;

// Re-export commonly used types at the crate root
pub use schema::*;
pub use types::*;
