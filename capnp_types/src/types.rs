use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// Physical type of a slot as declared by the schema.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub enum TypeTag {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    /// Enumerants are stored as 16-bit ordinals.
    Enum(String),
    Text,
    Data,
    /// Reference to another record of the schema, by name.
    Struct(String),
    List(Box<TypeTag>),
    AnyPointer,
}

impl TypeTag {
    /// True for types that live in the pointer section.
    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            TypeTag::Text
                | TypeTag::Data
                | TypeTag::Struct(_)
                | TypeTag::List(_)
                | TypeTag::AnyPointer
        )
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, TypeTag::Bool)
    }

    /// Size in bits of one element of this type, as used to scale a
    /// declared slot offset.
    pub fn element_bits(&self) -> u64 {
        match self {
            TypeTag::Bool => 1,
            TypeTag::Int8 | TypeTag::Uint8 => 8,
            TypeTag::Int16 | TypeTag::Uint16 | TypeTag::Enum(_) => 16,
            TypeTag::Int32 | TypeTag::Uint32 | TypeTag::Float32 => 32,
            TypeTag::Int64 | TypeTag::Uint64 | TypeTag::Float64 => 64,
            TypeTag::Text
            | TypeTag::Data
            | TypeTag::Struct(_)
            | TypeTag::List(_)
            | TypeTag::AnyPointer => 64,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Bool => write!(f, "bool"),
            TypeTag::Int8 => write!(f, "int8"),
            TypeTag::Int16 => write!(f, "int16"),
            TypeTag::Int32 => write!(f, "int32"),
            TypeTag::Int64 => write!(f, "int64"),
            TypeTag::Uint8 => write!(f, "uint8"),
            TypeTag::Uint16 => write!(f, "uint16"),
            TypeTag::Uint32 => write!(f, "uint32"),
            TypeTag::Uint64 => write!(f, "uint64"),
            TypeTag::Float32 => write!(f, "float32"),
            TypeTag::Float64 => write!(f, "float64"),
            TypeTag::Enum(name) => write!(f, "enum {name}"),
            TypeTag::Text => write!(f, "text"),
            TypeTag::Data => write!(f, "data"),
            TypeTag::Struct(name) => write!(f, "struct {name}"),
            TypeTag::List(element) => write!(f, "list<{element}>"),
            TypeTag::AnyPointer => write!(f, "any-pointer"),
        }
    }
}

/// A default value as written in the schema.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(untagged)]
#[serde(expecting = "expected a boolean, number, string or byte sequence")]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Text(String),
    Data(Vec<u8>),
}

impl fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Bool(v) => write!(f, "{v}"),
            DefaultValue::Int(v) => write!(f, "{v}"),
            DefaultValue::Uint(v) => write!(f, "{v}"),
            DefaultValue::Float(v) => write!(f, "{v:?}"),
            DefaultValue::Text(v) => write!(f, "{v:?}"),
            DefaultValue::Data(v) => write!(f, "{v:?}"),
        }
    }
}

/// A field occupying a fixed position of the data or pointer section.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct SlotSpec {
    /// Declared offset, in multiples of the element size of `type_tag`.
    pub offset: u32,
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    /// Present only when the schema wrote an explicit default.
    #[serde(default)]
    pub default: Option<DefaultValue>,
}

impl SlotSpec {
    pub fn new(offset: u32, type_tag: TypeTag) -> Self {
        Self {
            offset,
            type_tag,
            default: None,
        }
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn had_explicit_default(&self) -> bool {
        self.default.is_some()
    }
}

/// A named cluster of fields flattened into the enclosing record.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct GroupSpec {
    /// Nullable groups hold exactly a presence flag followed by a value.
    #[serde(default)]
    pub nullable: bool,
    pub fields: Vec<FieldSpec>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FieldKind {
    Slot(SlotSpec),
    Group(GroupSpec),
    Void,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct FieldSpec {
    pub name: String,
    /// Set for members of the record's anonymous union.
    #[serde(default)]
    pub discriminant_value: Option<u16>,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn slot(name: impl Into<String>, slot: SlotSpec) -> Self {
        Self {
            name: name.into(),
            discriminant_value: None,
            kind: FieldKind::Slot(slot),
        }
    }

    pub fn group(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            discriminant_value: None,
            kind: FieldKind::Group(GroupSpec {
                nullable: false,
                fields,
            }),
        }
    }

    pub fn nullable_group(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            discriminant_value: None,
            kind: FieldKind::Group(GroupSpec {
                nullable: true,
                fields,
            }),
        }
    }

    pub fn void(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            discriminant_value: None,
            kind: FieldKind::Void,
        }
    }

    /// Marks this field as the union member selected by `value`.
    pub fn in_union(mut self, value: u16) -> Self {
        self.discriminant_value = Some(value);
        self
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, FieldKind::Void)
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, FieldKind::Group(_))
    }
}

/// Size of a record's two sections, in 8-byte words.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
#[serde(rename_all = "kebab-case")]
pub struct Extent {
    pub data_words: u16,
    pub ptr_words: u16,
}

impl Extent {
    pub fn new(data_words: u16, ptr_words: u16) -> Self {
        Self {
            data_words,
            ptr_words,
        }
    }

    pub fn data_bytes(&self) -> usize {
        usize::from(self.data_words) * 8
    }

    pub fn total_bytes(&self) -> usize {
        (usize::from(self.data_words) + usize::from(self.ptr_words)) * 8
    }

    pub fn total_words(&self) -> u32 {
        u32::from(self.data_words) + u32::from(self.ptr_words)
    }
}
