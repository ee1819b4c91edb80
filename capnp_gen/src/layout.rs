//! Layout resolution.
//!
//! Places every flattened slot at its byte offset inside the record body
//! (data section followed by pointer section) and derives the record's
//! [`PackFormat`]. A record whose slots cannot be represented yields an
//! [`UnsupportedRepresentation`] instead of a layout; nothing here is fatal
//! for other records.

use crate::builder::{ListElement, StructTarget};
use crate::defaults;
use crate::errors::UnsupportedRepresentation;
use crate::flatten::{FlatRecord, SlotId};
use capnp_types::{Extent, Schema, SlotSpec, TypeTag};
use serde_derive::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Physical packing code of one fixed-width value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackCode {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    /// An opaque 64-bit pointer word.
    Pointer,
}

impl PackCode {
    /// Code for a fixed-width data-section type; `None` for bools and
    /// pointer types.
    pub fn for_tag(tag: &TypeTag) -> Option<PackCode> {
        match tag {
            TypeTag::Int8 => Some(PackCode::Int8),
            TypeTag::Int16 => Some(PackCode::Int16),
            TypeTag::Int32 => Some(PackCode::Int32),
            TypeTag::Int64 => Some(PackCode::Int64),
            TypeTag::Uint8 => Some(PackCode::UInt8),
            TypeTag::Uint16 | TypeTag::Enum(_) => Some(PackCode::UInt16),
            TypeTag::Uint32 => Some(PackCode::UInt32),
            TypeTag::Uint64 => Some(PackCode::UInt64),
            TypeTag::Float32 => Some(PackCode::Float32),
            TypeTag::Float64 => Some(PackCode::Float64),
            TypeTag::Bool
            | TypeTag::Text
            | TypeTag::Data
            | TypeTag::Struct(_)
            | TypeTag::List(_)
            | TypeTag::AnyPointer => None,
        }
    }

    pub fn size(self) -> usize {
        match self {
            PackCode::Int8 | PackCode::UInt8 => 1,
            PackCode::Int16 | PackCode::UInt16 => 2,
            PackCode::Int32 | PackCode::UInt32 | PackCode::Float32 => 4,
            PackCode::Int64 | PackCode::UInt64 | PackCode::Float64 | PackCode::Pointer => 8,
        }
    }

    pub fn mask(self) -> u64 {
        match self.size() {
            8 => u64::MAX,
            n => (1u64 << (n * 8)) - 1,
        }
    }

    /// Inclusive value range of an integer code.
    pub fn integer_range(self) -> (i128, i128) {
        let bits = (self.size() * 8) as u32;
        match self {
            PackCode::Int8 | PackCode::Int16 | PackCode::Int32 | PackCode::Int64 => {
                (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
            }
            _ => (0, (1i128 << bits) - 1),
        }
    }

    fn format_char(self) -> char {
        match self {
            PackCode::Int8 => 'b',
            PackCode::UInt8 => 'B',
            PackCode::Int16 => 'h',
            PackCode::UInt16 => 'H',
            PackCode::Int32 => 'i',
            PackCode::UInt32 => 'I',
            PackCode::Int64 => 'q',
            PackCode::UInt64 => 'Q',
            PackCode::Float32 => 'f',
            PackCode::Float64 => 'd',
            PackCode::Pointer => 'P',
        }
    }
}

impl fmt::Display for PackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PackCode::Int8 => "int8",
            PackCode::UInt8 => "uint8",
            PackCode::Int16 => "int16",
            PackCode::UInt16 => "uint16",
            PackCode::Int32 => "int32",
            PackCode::UInt32 => "uint32",
            PackCode::Int64 => "int64",
            PackCode::UInt64 => "uint64",
            PackCode::Float32 => "float32",
            PackCode::Float64 => "float64",
            PackCode::Pointer => "pointer",
        };
        f.pad(name)
    }
}

/// One entry of a [`PackFormat`]: a single padding byte, or the leading
/// byte of a value spanning `code.size()` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackEntry {
    Padding,
    Lead(PackCode),
}

impl PackEntry {
    pub fn size(self) -> usize {
        match self {
            PackEntry::Padding => 1,
            PackEntry::Lead(code) => code.size(),
        }
    }
}

/// Why a set of placements cannot form a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementError {
    /// Placement `index` starts inside placement `index - 1`.
    Overlap { index: usize },
    /// Placement `index` ends past the extent.
    OutOfBounds { index: usize },
}

/// Typed byte layout of a record body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackFormat {
    entries: Vec<PackEntry>,
}

impl PackFormat {
    /// Builds the format of a `total`-byte body from placements sorted by
    /// offset. Bytes not covered by a placement are padding.
    pub fn from_placements<I>(total: usize, placements: I) -> Result<Self, PlacementError>
    where
        I: IntoIterator<Item = (usize, PackCode)>,
    {
        let mut entries = Vec::new();
        let mut cursor = 0usize;
        for (index, (offset, code)) in placements.into_iter().enumerate() {
            if offset < cursor {
                return Err(PlacementError::Overlap { index });
            }
            if offset + code.size() > total {
                return Err(PlacementError::OutOfBounds { index });
            }
            entries.extend(std::iter::repeat(PackEntry::Padding).take(offset - cursor));
            entries.push(PackEntry::Lead(code));
            cursor = offset + code.size();
        }
        entries.extend(std::iter::repeat(PackEntry::Padding).take(total - cursor));
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PackEntry] {
        &self.entries
    }

    /// Decoded size in bytes.
    pub fn byte_len(&self) -> usize {
        self.entries.iter().map(|e| e.size()).sum()
    }

    /// Leading entries with their byte offsets, in ascending order.
    pub fn leads(&self) -> impl Iterator<Item = (usize, PackCode)> + '_ {
        self.entries
            .iter()
            .scan(0usize, |offset, entry| {
                let here = *offset;
                *offset += entry.size();
                Some((here, *entry))
            })
            .filter_map(|(offset, entry)| match entry {
                PackEntry::Lead(code) => Some((offset, code)),
                PackEntry::Padding => None,
            })
    }

    pub fn lead_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, PackEntry::Lead(_)))
            .count()
    }
}

impl fmt::Display for PackFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let ch = match entry {
                PackEntry::Padding => 'x',
                PackEntry::Lead(code) => code.format_char(),
            };
            write!(f, "{ch}")?;
        }
        Ok(())
    }
}

/// What a placed slot holds, and therefore how it is filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldClass {
    Primitive(PackCode),
    Text,
    Data,
    Struct(StructTarget),
    List(ListElement),
    AnyPointer,
}

impl FieldClass {
    pub fn code(&self) -> PackCode {
        match self {
            FieldClass::Primitive(code) => *code,
            _ => PackCode::Pointer,
        }
    }
}

/// A placed slot: the unit actually packed into the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct LowLevelField {
    pub slot: SlotId,
    pub name: String,
    pub source: SlotSpec,
    /// Byte offset from the start of the record body.
    pub offset: usize,
    pub class: FieldClass,
    /// Raw bits XORed into the stored value (explicit defaults only).
    pub xor_mask: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscriminatorSlot {
    pub offset: usize,
    pub value: u16,
}

/// Immutable layout of one constructor's record body.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    extent: Extent,
    fields: Vec<LowLevelField>,
    discriminator: Option<DiscriminatorSlot>,
    format: PackFormat,
    slot_count: usize,
}

impl Layout {
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Placed fields in ascending offset order.
    pub fn fields(&self) -> &[LowLevelField] {
        &self.fields
    }

    pub fn field_for_slot(&self, slot: SlotId) -> Option<&LowLevelField> {
        self.fields.iter().find(|f| f.slot == slot)
    }

    pub fn discriminator(&self) -> Option<DiscriminatorSlot> {
        self.discriminator
    }

    pub fn format(&self) -> &PackFormat {
        &self.format
    }

    /// Number of flattened slots, including the discriminant.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }
}

/// Source of the extents of records referenced by struct and list slots.
///
/// Only extents are needed, never the referenced record's own layout, so
/// records may reference each other cyclically.
pub trait ExtentLookup {
    fn extent_of(&self, record: &str) -> Option<Extent>;
}

impl ExtentLookup for Schema {
    fn extent_of(&self, record: &str) -> Option<Extent> {
        Schema::extent_of(self, record)
    }
}

impl ExtentLookup for HashMap<String, Extent> {
    fn extent_of(&self, record: &str) -> Option<Extent> {
        self.get(record).copied()
    }
}

/// Resolves the layout of a flattened record with the given extent.
pub fn resolve(
    flat: &FlatRecord,
    extent: Extent,
    records: &dyn ExtentLookup,
) -> Result<Layout, UnsupportedRepresentation> {
    if let Some(defect) = &flat.defect {
        return Err(defect.clone());
    }

    let mut fields = flat
        .slots
        .iter()
        .map(|slot| -> Result<LowLevelField, UnsupportedRepresentation> {
            let class = classify(&slot.name, &slot.slot.type_tag, records)?;
            let offset = slot_offset(&slot.name, &slot.slot, &class, extent)?;
            let xor_mask = defaults::xor_mask(&slot.name, &slot.slot, &class)?;
            tracing::trace!(field = %slot.name, offset, code = %class.code(), "placed field");
            Ok(LowLevelField {
                slot: slot.id,
                name: slot.name.clone(),
                source: slot.slot.clone(),
                offset,
                class,
                xor_mask,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    fields.sort_by_key(|f| f.offset);

    let total = extent.total_bytes();
    let format = PackFormat::from_placements(total, fields.iter().map(|f| (f.offset, f.class.code())))
        .map_err(|err| match err {
            PlacementError::Overlap { index } => UnsupportedRepresentation::new(format!(
                "field {} at byte {} overlaps field {}",
                fields[index].name,
                fields[index].offset,
                fields[index - 1].name
            )),
            PlacementError::OutOfBounds { index } => UnsupportedRepresentation::new(format!(
                "field {} at byte {} exceeds the {total}-byte record",
                fields[index].name, fields[index].offset
            )),
        })?;
    assert_eq!(format.byte_len(), total, "pack format must span the record extent");

    let discriminator = flat.discriminator.and_then(|(id, value)| {
        fields
            .iter()
            .find(|f| f.slot == id)
            .map(|f| DiscriminatorSlot {
                offset: f.offset,
                value,
            })
    });

    Ok(Layout {
        extent,
        fields,
        discriminator,
        format,
        slot_count: flat.slots.len(),
    })
}

fn unsupported_type(name: &str, tag: &TypeTag) -> UnsupportedRepresentation {
    UnsupportedRepresentation::new(format!("unsupported field type: {name} ({tag})"))
}

fn classify(
    name: &str,
    tag: &TypeTag,
    records: &dyn ExtentLookup,
) -> Result<FieldClass, UnsupportedRepresentation> {
    if let Some(code) = PackCode::for_tag(tag) {
        return Ok(FieldClass::Primitive(code));
    }
    match tag {
        TypeTag::Text => Ok(FieldClass::Text),
        TypeTag::Data => Ok(FieldClass::Data),
        TypeTag::AnyPointer => Ok(FieldClass::AnyPointer),
        TypeTag::Struct(record) => Ok(FieldClass::Struct(struct_target(name, record, records)?)),
        TypeTag::List(element) => {
            let element = match element.as_ref() {
                TypeTag::Text => ListElement::Text,
                TypeTag::Struct(record) => {
                    ListElement::Struct(struct_target(name, record, records)?)
                }
                other => match PackCode::for_tag(other) {
                    Some(code) => ListElement::Primitive(code),
                    None => return Err(unsupported_type(name, tag)),
                },
            };
            Ok(FieldClass::List(element))
        }
        _ => Err(unsupported_type(name, tag)),
    }
}

fn struct_target(
    name: &str,
    record: &str,
    records: &dyn ExtentLookup,
) -> Result<StructTarget, UnsupportedRepresentation> {
    records
        .extent_of(record)
        .map(|extent| StructTarget::new(record, extent))
        .ok_or_else(|| {
            UnsupportedRepresentation::new(format!(
                "field {name} references unknown struct type {record}"
            ))
        })
}

fn slot_offset(
    name: &str,
    slot: &SlotSpec,
    class: &FieldClass,
    extent: Extent,
) -> Result<usize, UnsupportedRepresentation> {
    let size = class.code().size() as u64;
    let offset = u64::from(slot.offset) * slot.type_tag.element_bits() / 8;
    let (base, section_len, section) = if slot.type_tag.is_pointer() {
        (extent.data_bytes() as u64, u64::from(extent.ptr_words) * 8, "pointer")
    } else {
        (0, extent.data_bytes() as u64, "data")
    };
    if offset + size > section_len {
        return Err(UnsupportedRepresentation::new(format!(
            "field {name} at offset {} overflows the {section_len}-byte {section} section",
            slot.offset
        )));
    }
    Ok((base + offset) as usize)
}
