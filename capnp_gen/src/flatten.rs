//! Field flattening.
//!
//! Walks a record's declared fields and produces the two views the rest of
//! the compiler works from:
//!
//! - the *arguments*: one per top-level field, in declaration order, each
//!   with its default literal and the shape used to unpack it;
//! - the *slots*: every primitive or pointer slot the record packs, with
//!   names composed as `group_field` for fields reached through groups.
//!
//! Groups are expanded recursively, so a group nested inside a group
//! contributes `outer_inner_field` slots and a nested composite default.

use crate::errors::UnsupportedRepresentation;
use crate::value::Value;
use capnp_types::{FieldKind, FieldSpec, GroupSpec, SlotSpec, TypeTag};

/// Index of a slot in [`FlatRecord::slots`] (declaration order).
pub type SlotId = usize;

/// Union arm selected by a constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discriminator {
    /// Position of the discriminant, in multiples of 16 bits.
    pub offset: u32,
    pub value: u16,
}

/// Name of the synthetic union tag slot. It is never bound to an argument.
pub const DISCRIMINANT_SLOT: &str = "__which__";

#[derive(Debug, Clone, PartialEq)]
pub struct FlatSlot {
    pub id: SlotId,
    pub name: String,
    pub slot: SlotSpec,
}

/// How a top-level argument maps onto slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgShape {
    Slot(SlotId),
    Void,
    Group { name: String, members: Vec<ArgShape> },
    Nullable { name: String, presence: SlotId, value: SlotId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub default: Value,
    pub shape: ArgShape,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatRecord {
    pub arguments: Vec<Argument>,
    pub slots: Vec<FlatSlot>,
    pub discriminator: Option<(SlotId, u16)>,
    /// First structural defect found while flattening (malformed nullable
    /// groups); the layout stage reports it for the whole record.
    pub defect: Option<UnsupportedRepresentation>,
}

impl FlatRecord {
    pub fn argument_names(&self) -> impl Iterator<Item = &str> {
        self.arguments.iter().map(|a| a.name.as_str())
    }

    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.name.as_str())
    }
}

#[derive(Default)]
struct Flattener {
    slots: Vec<FlatSlot>,
    defect: Option<UnsupportedRepresentation>,
}

/// Flattens `fields` (the fields one constructor receives) into arguments
/// and slots. The discriminant slot, when present, is appended last.
pub fn flatten(fields: &[FieldSpec], discriminator: Option<Discriminator>) -> FlatRecord {
    let mut flattener = Flattener::default();

    let arguments = fields
        .iter()
        .map(|field| {
            let (shape, default) = flattener.field(field, None);
            Argument {
                name: field.name.clone(),
                default,
                shape,
            }
        })
        .collect();

    let discriminator = discriminator.map(|disc| {
        if flattener.slots.iter().any(|s| s.name == DISCRIMINANT_SLOT) {
            flattener.defect.get_or_insert_with(|| {
                UnsupportedRepresentation::new(format!(
                    "field {DISCRIMINANT_SLOT} collides with the union discriminant slot"
                ))
            });
        }
        let id = flattener.push(
            DISCRIMINANT_SLOT.to_string(),
            SlotSpec::new(disc.offset, TypeTag::Uint16),
        );
        (id, disc.value)
    });

    FlatRecord {
        arguments,
        slots: flattener.slots,
        discriminator,
        defect: flattener.defect,
    }
}

impl Flattener {
    fn push(&mut self, name: String, slot: SlotSpec) -> SlotId {
        let id = self.slots.len();
        self.slots.push(FlatSlot { id, name, slot });
        id
    }

    fn field(&mut self, field: &FieldSpec, prefix: Option<&str>) -> (ArgShape, Value) {
        let name = match prefix {
            Some(prefix) => format!("{prefix}_{}", field.name),
            None => field.name.clone(),
        };
        match &field.kind {
            FieldKind::Void => (ArgShape::Void, Value::Void),
            FieldKind::Slot(slot) => {
                let default = slot.default.as_ref().map_or_else(|| zero_literal(&slot.type_tag), Value::from);
                let id = self.push(name, slot.clone());
                (ArgShape::Slot(id), default)
            }
            FieldKind::Group(group) if group.nullable => self.nullable_group(name, group),
            FieldKind::Group(group) => {
                let (members, defaults): (Vec<_>, Vec<_>) = group
                    .fields
                    .iter()
                    .filter(|f| !f.is_void())
                    .map(|f| self.field(f, Some(&name)))
                    .unzip();
                (ArgShape::Group { name, members }, Value::Group(defaults))
            }
        }
    }

    fn nullable_group(&mut self, name: String, group: &GroupSpec) -> (ArgShape, Value) {
        let members: Vec<&FieldSpec> = group.fields.iter().filter(|f| !f.is_void()).collect();
        let (flag, value) = match members.as_slice() {
            [
                FieldSpec {
                    name: flag_name,
                    kind: FieldKind::Slot(flag),
                    ..
                },
                FieldSpec {
                    name: value_name,
                    kind: FieldKind::Slot(value),
                    ..
                },
            ] if is_integer(&flag.type_tag) => ((flag_name, flag), (value_name, value)),
            _ => {
                self.defect.get_or_insert_with(|| {
                    UnsupportedRepresentation::new(format!(
                        "nullable group {name} must hold an integer presence flag followed by a value slot"
                    ))
                });
                let shape = self.field(
                    &FieldSpec::group(name.clone(), group.fields.clone()),
                    None,
                );
                return (shape.0, Value::Null);
            }
        };

        let presence = self.push(format!("{name}_{}", flag.0), flag.1.clone());
        let value = self.push(format!("{name}_{}", value.0), value.1.clone());
        (
            ArgShape::Nullable {
                name,
                presence,
                value,
            },
            Value::Null,
        )
    }
}

/// Default literal of a slot without an explicit default.
fn zero_literal(tag: &TypeTag) -> Value {
    match tag {
        TypeTag::Bool => Value::Bool(false),
        TypeTag::Float32 | TypeTag::Float64 => Value::Float(0.0),
        TypeTag::Int8 | TypeTag::Int16 | TypeTag::Int32 | TypeTag::Int64 => Value::Int(0),
        TypeTag::Uint8 | TypeTag::Uint16 | TypeTag::Uint32 | TypeTag::Uint64 | TypeTag::Enum(_) => {
            Value::UInt(0)
        }
        TypeTag::Text | TypeTag::Data | TypeTag::Struct(_) | TypeTag::List(_) | TypeTag::AnyPointer => {
            Value::Null
        }
    }
}

fn is_integer(tag: &TypeTag) -> bool {
    matches!(
        tag,
        TypeTag::Int8
            | TypeTag::Int16
            | TypeTag::Int32
            | TypeTag::Int64
            | TypeTag::Uint8
            | TypeTag::Uint16
            | TypeTag::Uint32
            | TypeTag::Uint64
    )
}
