/* Values passed to synthesized constructors */

use crate::builder::StructBuffer;
use crate::errors::ValueError;
use crate::layout::PackCode;
use capnp_types::DefaultValue;
use std::fmt;

/// A single constructor argument, or one component of a group argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    /// The absent sentinel. Leaves pointers null and fixed-width slots zero;
    /// for a nullable group it clears the presence flag.
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Data(Vec<u8>),
    /// Positional values for the fields of a plain group.
    Group(Vec<Value>),
    List(Vec<Value>),
    /// A previously constructed record, embedded through a struct pointer.
    Struct(StructBuffer),
}

impl Value {
    pub fn group(values: impl IntoIterator<Item = Value>) -> Self {
        Value::Group(values.into_iter().collect())
    }

    pub fn list(values: impl IntoIterator<Item = Value>) -> Self {
        Value::List(values.into_iter().collect())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Value::Text(text.into())
    }

    pub fn data(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Data(bytes.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Data(_) => "data",
            Value::Group(_) => "group",
            Value::List(_) => "list",
            Value::Struct(_) => "struct",
        }
    }
}

impl From<&DefaultValue> for Value {
    fn from(default: &DefaultValue) -> Self {
        match default {
            DefaultValue::Bool(v) => Value::Bool(*v),
            DefaultValue::Int(v) => Value::Int(*v),
            DefaultValue::Uint(v) => Value::UInt(*v),
            DefaultValue::Float(v) => Value::Float(*v),
            DefaultValue::Text(v) => Value::Text(v.clone()),
            DefaultValue::Data(v) => Value::Data(v.clone()),
        }
    }
}

macro_rules! impl_from_signed {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

macro_rules! impl_from_unsigned {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::UInt(u64::from(v))
            }
        })*
    };
}

impl_from_signed!(i8, i16, i32, i64);
impl_from_unsigned!(u8, u16, u32, u64);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<StructBuffer> for Value {
    fn from(v: StructBuffer) -> Self {
        Value::Struct(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/* Literal rendering, used for argument defaults in reports */
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::Data(v) => write!(f, "{v:?}"),
            Value::Group(items) | Value::List(items) => {
                let open = if matches!(self, Value::Group(_)) { '(' } else { '[' };
                let close = if open == '(' { ')' } else { ']' };
                write!(f, "{open}")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "{close}")
            }
            Value::Struct(buffer) => write!(f, "<{} ({} bytes)>", buffer.record(), buffer.len()),
        }
    }
}

/// Encodes `value` as the little-endian raw bits of a fixed-width slot.
///
/// The result is truncated to the width of `code`; `Null` encodes as zero.
pub fn encode_primitive(code: PackCode, value: &Value) -> Result<u64, ValueError> {
    let out_of_range = || ValueError::OutOfRange {
        code,
        value: value.to_string(),
    };
    let mismatch = || ValueError::TypeMismatch {
        expected: code.to_string(),
        found: value.kind_name(),
    };

    if matches!(value, Value::Null) {
        return Ok(0);
    }

    match code {
        PackCode::Float32 => {
            let v = numeric_as_f64(value).ok_or_else(mismatch)?;
            let narrowed = v as f32;
            if v.is_finite() && !narrowed.is_finite() {
                return Err(out_of_range());
            }
            Ok(u64::from(narrowed.to_bits()))
        }
        PackCode::Float64 => {
            let v = numeric_as_f64(value).ok_or_else(mismatch)?;
            Ok(v.to_bits())
        }
        PackCode::Pointer => Err(mismatch()),
        _ => {
            let wide: i128 = match value {
                Value::Int(v) => i128::from(*v),
                Value::UInt(v) => i128::from(*v),
                Value::Bool(v) => i128::from(*v),
                _ => return Err(mismatch()),
            };
            let (min, max) = code.integer_range();
            if wide < min || wide > max {
                return Err(out_of_range());
            }
            Ok((wide as u64) & code.mask())
        }
    }
}

fn numeric_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Float(v) => Some(*v),
        Value::Int(v) => Some(*v as f64),
        Value::UInt(v) => Some(*v as f64),
        _ => None,
    }
}
