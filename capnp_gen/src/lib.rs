/* Struct layout compiler
 *
 * Turns the record descriptions of a schema into byte-exact layouts and
 * constructors that pack caller-supplied values into wire-format buffers.
 * Per record the pipeline is: flatten -> layout (with default encoding)
 * -> structor. Pointer-section content is delegated to a builder.
 */

pub mod builder;
pub mod defaults;
pub mod errors;
pub mod flatten;
pub mod ir;
pub mod layout;
pub mod schema;
pub mod structor;
pub mod value;

pub use builder::{ListElement, ListKind, StructBuffer, StructBuilder, StructTarget, WireBuilder};
pub use errors::*;
pub use flatten::{flatten, ArgShape, Argument, Discriminator, FlatRecord, FlatSlot, SlotId, DISCRIMINANT_SLOT};
pub use ir::{LayoutIr, IR_SCHEMA_VERSION};
pub use layout::{ExtentLookup, FieldClass, Layout, LowLevelField, PackCode, PackEntry, PackFormat};
pub use schema::{compile_named, compile_schema, CompiledRecord, CompiledSchema, DEFAULT_CONSTRUCTOR};
pub use structor::{compile_record, synthesize, Arguments, ConstructorBody, StructConstructor};
pub use value::Value;
