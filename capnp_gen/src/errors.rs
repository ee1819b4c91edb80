use crate::layout::PackCode;
use thiserror::Error;

/// Result alias for constructor invocations.
pub type ConstructResult<T> = Result<T, ConstructError>;

/// Result alias for builder collaborator operations.
pub type BuildResult<T> = Result<T, BuildError>;

/// A record uses a physical representation the layout model cannot pack.
///
/// Raised while resolving a record's layout. It only ever affects the record
/// it was raised for: the record still gets a constructor, which fails with
/// this exact message when invoked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UnsupportedRepresentation {
    message: String,
}

impl UnsupportedRepresentation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failures that prevent a constructor from being produced at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("duplicate field name(s) in constructor '{constructor}' of '{record}': {names:?}")]
    DuplicateArgumentName {
        record: String,
        constructor: String,
        names: Vec<String>,
    },
}

/// A value could not be encoded into a fixed-width slot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("expected a value for {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: &'static str,
    },

    #[error("value {value} does not fit {code}")]
    OutOfRange { code: PackCode, value: String },
}

/// Errors raised by the builder collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("expected a struct of type '{expected}', found '{found}'")]
    StructTypeMismatch { expected: String, found: String },

    #[error("struct '{record}' has extent {found:?}, lists of it require {expected:?}")]
    StructExtentMismatch {
        record: String,
        expected: (u16, u16),
        found: (u16, u16),
    },

    #[error("struct '{record}' holds {found} bytes, its body alone needs {expected}")]
    StructTruncated {
        record: String,
        expected: usize,
        found: usize,
    },

    #[error("list element {index}: expected {expected}, found {found}")]
    ElementKind {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("list element {index}: {source}")]
    Element {
        index: usize,
        #[source]
        source: ValueError,
    },

    #[error("pointer at byte {offset} cannot reach its target ({words} words away)")]
    OffsetOverflow { offset: usize, words: i64 },

    #[error("list of {len} elements exceeds the encodable element count")]
    ListTooLong { len: usize },

    #[error("pack expected {expected} values, received {found}")]
    ValueCount { expected: usize, found: usize },
}

/// Errors raised when a synthesized constructor is invoked.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructError {
    /// The record's layout is unsupported; `message` is the diagnostic
    /// captured at compile time.
    #[error("unimplemented representation in '{constructor}': {message}")]
    Unimplemented { constructor: String, message: String },

    #[error("'{constructor}' has no argument named '{name}'")]
    UnknownArgument { constructor: String, name: String },

    #[error("'{constructor}' takes {expected} arguments but {found} were given")]
    TooManyArguments {
        constructor: String,
        expected: usize,
        found: usize,
    },

    #[error("'{constructor}' got multiple values for argument '{name}'")]
    ArgumentGivenTwice { constructor: String, name: String },

    #[error("group '{group}' expects a sequence of values, found {found}")]
    GroupValue { group: String, found: &'static str },

    #[error("group '{group}' expects {expected} values, found {found}")]
    GroupArity {
        group: String,
        expected: usize,
        found: usize,
    },

    #[error("field '{field}': {source}")]
    Field {
        field: String,
        #[source]
        source: ValueError,
    },

    #[error("field '{field}': {source}")]
    Build {
        field: String,
        #[source]
        source: BuildError,
    },

    #[error(transparent)]
    Pack(#[from] BuildError),
}

/// Serialization failures of a layout IR export.
#[derive(Debug, Error)]
pub enum IrError {
    #[error("failed to render IR as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to render IR as YAML: {0}")]
    Yaml(#[from] serde_yml::Error),
}
