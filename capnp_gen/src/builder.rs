/* Builder collaborator
 *
 * Constructors never touch pointer-section content themselves: they hand
 * text, data, nested structs and lists to a `StructBuilder`, receive the
 * 64-bit pointer word to store in the slot, and finally ask the builder to
 * pack every fixed-width value into the body.
 *
 * `WireBuilder` is the reference implementation. It produces a single
 * segment: the record body followed by all allocated content, each block
 * word-aligned, with capnp relative pointers:
 *
 *   struct pointer:  [0..2) = 0, [2..32) offset, [32..48) data words, [48..64) ptr words
 *   list pointer:    [0..2) = 1, [2..32) offset, [32..35) element size, [35..64) count
 *
 * Offsets are signed word counts from the end of the pointer word. */

use crate::errors::{BuildError, BuildResult};
use crate::layout::{Layout, PackCode, PackFormat};
use crate::value::{encode_primitive, Value};
use capnp_types::Extent;

const BYTE_ELEMENTS: u8 = 2;
const POINTER_ELEMENTS: u8 = 6;
const COMPOSITE_ELEMENTS: u8 = 7;
const MAX_LIST_COUNT: usize = (1 << 29) - 1;
const OFFSET_FIELD: u64 = 0xFFFF_FFFC;

/// A record referenced by a struct or struct-list slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructTarget {
    name: String,
    extent: Extent,
}

impl StructTarget {
    pub fn new(name: impl Into<String>, extent: Extent) -> Self {
        Self {
            name: name.into(),
            extent,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }
}

/// Coarse list category, as exposed to builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Primitive,
    Text,
    Struct,
}

/// Element type of a list slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListElement {
    Primitive(PackCode),
    Text,
    Struct(StructTarget),
}

impl ListElement {
    pub fn kind(&self) -> ListKind {
        match self {
            ListElement::Primitive(_) => ListKind::Primitive,
            ListElement::Text => ListKind::Text,
            ListElement::Struct(_) => ListKind::Struct,
        }
    }
}

/// A finished record: body followed by its pointer-section content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructBuffer {
    record: String,
    extent: Extent,
    bytes: Vec<u8>,
}

impl StructBuffer {
    pub fn new(record: impl Into<String>, extent: Extent, bytes: Vec<u8>) -> Self {
        Self {
            record: record.into(),
            extent,
            bytes,
        }
    }

    pub fn record(&self) -> &str {
        &self.record
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The fixed-size part: data section then pointer section. Buffers
    /// shorter than their extent yield whatever bytes they hold.
    pub fn body(&self) -> &[u8] {
        &self.bytes[..self.extent.total_bytes().min(self.bytes.len())]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Allocation and packing operations a constructor relies on.
///
/// Each `allocate_*` call receives the byte offset of the pointer slot in
/// the record body and returns the pointer word to store there; `None`
/// values allocate nothing and return a null pointer.
pub trait StructBuilder {
    fn allocate_text(&mut self, offset: usize, value: Option<&str>) -> BuildResult<u64>;

    fn allocate_data(&mut self, offset: usize, value: Option<&[u8]>) -> BuildResult<u64>;

    fn allocate_struct(
        &mut self,
        offset: usize,
        target: &StructTarget,
        value: Option<&StructBuffer>,
    ) -> BuildResult<u64>;

    fn allocate_list(
        &mut self,
        offset: usize,
        element: &ListElement,
        value: Option<&[Value]>,
    ) -> BuildResult<u64>;

    /// Packs one raw value per leading format entry, in offset order.
    fn pack(self, values: &[u64]) -> BuildResult<StructBuffer>;
}

/// Single-segment capnp builder.
#[derive(Debug, Clone)]
pub struct WireBuilder {
    record: String,
    extent: Extent,
    format: PackFormat,
    tail: Vec<u8>,
}

impl WireBuilder {
    pub fn new(record: impl Into<String>, extent: Extent, format: PackFormat) -> Self {
        Self {
            record: record.into(),
            extent,
            format,
            tail: Vec::new(),
        }
    }

    pub fn for_layout(record: &str, layout: &Layout) -> Self {
        Self::new(record, layout.extent(), layout.format().clone())
    }

    fn body_len(&self) -> usize {
        self.extent.total_bytes()
    }

    /* Appends `bytes` word-aligned; returns their absolute position */
    fn append(&mut self, bytes: &[u8]) -> usize {
        let start = self.body_len() + self.tail.len();
        self.tail.extend_from_slice(bytes);
        self.tail.resize(self.tail.len().next_multiple_of(8), 0);
        start
    }

    fn reserve(&mut self, len: usize) -> usize {
        let start = self.body_len() + self.tail.len();
        self.tail.resize((self.tail.len() + len).next_multiple_of(8), 0);
        start
    }

    fn write(&mut self, at: usize, bytes: &[u8]) {
        let idx = at - self.body_len();
        self.tail[idx..idx + bytes.len()].copy_from_slice(bytes);
    }

    fn append_bytes_list(&mut self, at: usize, bytes: &[u8]) -> BuildResult<u64> {
        let start = self.append(bytes);
        list_pointer(at, start, BYTE_ELEMENTS, bytes.len())
    }

    fn text_bytes(text: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);
        bytes
    }

    fn primitive_list(&mut self, offset: usize, code: PackCode, values: &[Value]) -> BuildResult<u64> {
        let size = code.size();
        let start = self.reserve(values.len() * size);
        for (index, value) in values.iter().enumerate() {
            let raw = encode_primitive(code, value).map_err(|source| BuildError::Element { index, source })?;
            self.write(start + index * size, &raw.to_le_bytes()[..size]);
        }
        list_pointer(offset, start, element_size_code(code), values.len())
    }

    fn text_list(&mut self, offset: usize, values: &[Value]) -> BuildResult<u64> {
        let start = self.reserve(values.len() * 8);
        for (index, value) in values.iter().enumerate() {
            let at = start + index * 8;
            match value {
                Value::Text(text) => {
                    let word = self.append_bytes_list(at, &Self::text_bytes(text))?;
                    self.write(at, &word.to_le_bytes());
                }
                Value::Null => {}
                other => {
                    return Err(BuildError::ElementKind {
                        index,
                        expected: "text",
                        found: other.kind_name(),
                    })
                }
            }
        }
        list_pointer(offset, start, POINTER_ELEMENTS, values.len())
    }

    fn struct_list(&mut self, offset: usize, target: &StructTarget, values: &[Value]) -> BuildResult<u64> {
        let extent = target.extent();
        let stride = extent.total_bytes();
        let words = values.len() * extent.total_words() as usize;
        if values.len() > MAX_LIST_COUNT || words > MAX_LIST_COUNT {
            return Err(BuildError::ListTooLong { len: values.len() });
        }

        let start = self.reserve(8 + values.len() * stride);
        let tag = ((values.len() as u64) << 2)
            | (u64::from(extent.data_words) << 32)
            | (u64::from(extent.ptr_words) << 48);
        self.write(start, &tag.to_le_bytes());

        for (index, value) in values.iter().enumerate() {
            let element_at = start + 8 + index * stride;
            let buffer = match value {
                Value::Struct(buffer) => buffer,
                Value::Null => continue,
                other => {
                    return Err(BuildError::ElementKind {
                        index,
                        expected: "struct",
                        found: other.kind_name(),
                    })
                }
            };
            check_struct_type(target, buffer)?;
            if buffer.extent() != extent {
                return Err(BuildError::StructExtentMismatch {
                    record: buffer.record().to_string(),
                    expected: (extent.data_words, extent.ptr_words),
                    found: (buffer.extent().data_words, buffer.extent().ptr_words),
                });
            }

            let mut body = buffer.body().to_vec();
            let tail = &buffer.as_bytes()[stride..];
            if !tail.is_empty() {
                let tail_at = self.append(tail);
                relocate_pointers(&mut body, extent, element_at, tail_at)?;
            }
            self.write(element_at, &body);
        }

        list_pointer(offset, start, COMPOSITE_ELEMENTS, words)
    }
}

impl StructBuilder for WireBuilder {
    fn allocate_text(&mut self, offset: usize, value: Option<&str>) -> BuildResult<u64> {
        match value {
            Some(text) => self.append_bytes_list(offset, &Self::text_bytes(text)),
            None => Ok(0),
        }
    }

    fn allocate_data(&mut self, offset: usize, value: Option<&[u8]>) -> BuildResult<u64> {
        match value {
            Some(bytes) => self.append_bytes_list(offset, bytes),
            None => Ok(0),
        }
    }

    fn allocate_struct(
        &mut self,
        offset: usize,
        target: &StructTarget,
        value: Option<&StructBuffer>,
    ) -> BuildResult<u64> {
        let Some(buffer) = value else {
            return Ok(0);
        };
        check_struct_type(target, buffer)?;
        if buffer.extent().total_words() == 0 {
            // Zero-sized structs point at themselves so they stay non-null.
            return struct_pointer(offset, offset, buffer.extent());
        }
        let start = self.append(buffer.as_bytes());
        struct_pointer(offset, start, buffer.extent())
    }

    fn allocate_list(
        &mut self,
        offset: usize,
        element: &ListElement,
        value: Option<&[Value]>,
    ) -> BuildResult<u64> {
        let Some(values) = value else {
            return Ok(0);
        };
        if values.len() > MAX_LIST_COUNT {
            return Err(BuildError::ListTooLong { len: values.len() });
        }
        match element {
            ListElement::Primitive(code) => self.primitive_list(offset, *code, values),
            ListElement::Text => self.text_list(offset, values),
            ListElement::Struct(target) => self.struct_list(offset, target, values),
        }
    }

    fn pack(self, values: &[u64]) -> BuildResult<StructBuffer> {
        let expected = self.format.lead_count();
        if expected != values.len() {
            return Err(BuildError::ValueCount {
                expected,
                found: values.len(),
            });
        }

        let mut bytes = vec![0u8; self.body_len()];
        for ((offset, code), raw) in self.format.leads().zip(values) {
            let size = code.size();
            bytes[offset..offset + size].copy_from_slice(&raw.to_le_bytes()[..size]);
        }
        bytes.extend_from_slice(&self.tail);
        Ok(StructBuffer::new(self.record, self.extent, bytes))
    }
}

fn check_struct_type(target: &StructTarget, buffer: &StructBuffer) -> BuildResult<()> {
    if buffer.record() != target.name() {
        return Err(BuildError::StructTypeMismatch {
            expected: target.name().to_string(),
            found: buffer.record().to_string(),
        });
    }
    let expected = buffer.extent().total_bytes();
    if buffer.len() < expected {
        return Err(BuildError::StructTruncated {
            record: buffer.record().to_string(),
            expected,
            found: buffer.len(),
        });
    }
    Ok(())
}

fn element_size_code(code: PackCode) -> u8 {
    match code.size() {
        1 => 2,
        2 => 3,
        4 => 4,
        _ => 5,
    }
}

/* Offset field (already shifted into bits 2..32) for a pointer at `at`
   referring to content starting at `target` */
fn pointer_offset(at: usize, target: usize) -> BuildResult<u64> {
    let words = (target as i64 - (at as i64 + 8)) / 8;
    if !(-(1i64 << 29)..(1i64 << 29)).contains(&words) {
        return Err(BuildError::OffsetOverflow { offset: at, words });
    }
    Ok(u64::from(((words as i32) << 2) as u32))
}

fn struct_pointer(at: usize, target: usize, extent: Extent) -> BuildResult<u64> {
    Ok(pointer_offset(at, target)?
        | (u64::from(extent.data_words) << 32)
        | (u64::from(extent.ptr_words) << 48))
}

fn list_pointer(at: usize, target: usize, size_code: u8, count: usize) -> BuildResult<u64> {
    if count > MAX_LIST_COUNT {
        return Err(BuildError::ListTooLong { len: count });
    }
    Ok(pointer_offset(at, target)? | 1 | (u64::from(size_code) << 32) | ((count as u64) << 35))
}

/* Rewrites the pointer section of a struct body moved to `element_at`
   whose out-of-line content now starts at `tail_at` */
fn relocate_pointers(body: &mut [u8], extent: Extent, element_at: usize, tail_at: usize) -> BuildResult<()> {
    let stride = extent.total_bytes();
    for slot in 0..usize::from(extent.ptr_words) {
        let at = extent.data_bytes() + slot * 8;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&body[at..at + 8]);
        let word = u64::from_le_bytes(raw);
        if word == 0 || word & 3 > 1 {
            continue;
        }
        let words = i64::from((word as u32 as i32) >> 2);
        let old_target = at as i64 + 8 + words * 8;
        if old_target < stride as i64 {
            continue;
        }
        let new_target = tail_at + (old_target as usize - stride);
        let relocated = (word & !OFFSET_FIELD) | pointer_offset(element_at + at, new_target)?;
        body[at..at + 8].copy_from_slice(&relocated.to_le_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(bytes: &[u8], at: usize) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[at..at + 8]);
        u64::from_le_bytes(raw)
    }

    /* (tag, target byte position) of a non-null pointer at `at` */
    fn follow(bytes: &[u8], at: usize) -> (u64, usize) {
        let w = word(bytes, at);
        let words = i64::from((w as u32 as i32) >> 2);
        (w & 3, (at as i64 + 8 + words * 8) as usize)
    }

    fn format(extent: Extent, leads: &[(usize, PackCode)]) -> PackFormat {
        PackFormat::from_placements(extent.total_bytes(), leads.iter().copied()).unwrap()
    }

    #[test]
    fn text_is_nul_terminated_byte_list() {
        let extent = Extent::new(0, 1);
        let mut builder = WireBuilder::new("T", extent, format(extent, &[(0, PackCode::Pointer)]));
        let ptr = builder.allocate_text(0, Some("hi")).unwrap();
        let buffer = builder.pack(&[ptr]).unwrap();
        let bytes = buffer.as_bytes();

        assert_eq!(bytes.len(), 16);
        let (tag, target) = follow(bytes, 0);
        assert_eq!(tag, 1);
        assert_eq!(target, 8);
        assert_eq!((word(bytes, 0) >> 32) & 7, 2);
        assert_eq!(word(bytes, 0) >> 35, 3);
        assert_eq!(&bytes[8..11], b"hi\0");
    }

    #[test]
    fn absent_values_leave_null_pointers() {
        let extent = Extent::new(0, 1);
        let mut builder = WireBuilder::new("T", extent, format(extent, &[(0, PackCode::Pointer)]));
        assert_eq!(builder.allocate_text(0, None).unwrap(), 0);
        assert_eq!(builder.allocate_data(0, None).unwrap(), 0);
        assert_eq!(
            builder
                .allocate_list(0, &ListElement::Text, None)
                .unwrap(),
            0
        );
        let buffer = builder.pack(&[0]).unwrap();
        assert_eq!(buffer.as_bytes(), &[0u8; 8]);
    }

    #[test]
    fn nested_struct_is_appended() {
        let child = StructBuffer::new("Child", Extent::new(1, 0), 7u64.to_le_bytes().to_vec());
        let extent = Extent::new(1, 1);
        let mut builder = WireBuilder::new(
            "Parent",
            extent,
            format(extent, &[(0, PackCode::Int64), (8, PackCode::Pointer)]),
        );
        let target = StructTarget::new("Child", Extent::new(1, 0));
        let ptr = builder.allocate_struct(8, &target, Some(&child)).unwrap();
        let buffer = builder.pack(&[1, ptr]).unwrap();
        let bytes = buffer.as_bytes();

        assert_eq!(follow(bytes, 8), (0, 16));
        assert_eq!(word(bytes, 8) >> 32, 1);
        assert_eq!(word(bytes, 16), 7);
    }

    #[test]
    fn struct_type_is_checked() {
        let other = StructBuffer::new("Other", Extent::new(1, 0), vec![0; 8]);
        let extent = Extent::new(0, 1);
        let mut builder = WireBuilder::new("P", extent, format(extent, &[(0, PackCode::Pointer)]));
        let err = builder
            .allocate_struct(0, &StructTarget::new("Child", Extent::new(1, 0)), Some(&other))
            .unwrap_err();
        assert_eq!(
            err,
            BuildError::StructTypeMismatch {
                expected: "Child".into(),
                found: "Other".into(),
            }
        );
    }

    #[test]
    fn truncated_struct_buffers_are_rejected() {
        let short = StructBuffer::new("Item", Extent::new(1, 0), vec![1, 2]);
        let target = StructTarget::new("Item", Extent::new(1, 0));
        let truncated = BuildError::StructTruncated {
            record: "Item".into(),
            expected: 8,
            found: 2,
        };

        let extent = Extent::new(0, 1);
        let mut builder = WireBuilder::new("P", extent, format(extent, &[(0, PackCode::Pointer)]));
        let values = [Value::Struct(short.clone())];
        let err = builder
            .allocate_list(0, &ListElement::Struct(target.clone()), Some(&values))
            .unwrap_err();
        assert_eq!(err, truncated);

        let err = builder.allocate_struct(0, &target, Some(&short)).unwrap_err();
        assert_eq!(err, truncated);
    }

    #[test]
    fn zero_sized_struct_points_at_itself() {
        let empty = StructBuffer::new("Empty", Extent::default(), Vec::new());
        let extent = Extent::new(0, 1);
        let mut builder = WireBuilder::new("P", extent, format(extent, &[(0, PackCode::Pointer)]));
        let ptr = builder
            .allocate_struct(0, &StructTarget::new("Empty", Extent::default()), Some(&empty))
            .unwrap();
        assert_eq!(ptr, 0xFFFF_FFFC);
    }

    #[test]
    fn primitive_list_packs_elements() {
        let extent = Extent::new(0, 1);
        let mut builder = WireBuilder::new("P", extent, format(extent, &[(0, PackCode::Pointer)]));
        let values = [Value::Int(1), Value::Int(-1), Value::Int(3)];
        let ptr = builder
            .allocate_list(0, &ListElement::Primitive(PackCode::Int16), Some(&values))
            .unwrap();
        let buffer = builder.pack(&[ptr]).unwrap();
        let bytes = buffer.as_bytes();

        assert_eq!((word(bytes, 0) >> 32) & 7, 3);
        assert_eq!(word(bytes, 0) >> 35, 3);
        assert_eq!(&bytes[8..14], &[1, 0, 0xFF, 0xFF, 3, 0]);
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn primitive_list_reports_bad_element() {
        let extent = Extent::new(0, 1);
        let mut builder = WireBuilder::new("P", extent, format(extent, &[(0, PackCode::Pointer)]));
        let values = [Value::Int(1), Value::text("x")];
        let err = builder
            .allocate_list(0, &ListElement::Primitive(PackCode::Int8), Some(&values))
            .unwrap_err();
        assert!(matches!(err, BuildError::Element { index: 1, .. }));
    }

    #[test]
    fn text_list_is_a_pointer_list() {
        let extent = Extent::new(0, 1);
        let mut builder = WireBuilder::new("P", extent, format(extent, &[(0, PackCode::Pointer)]));
        let values = [Value::text("a"), Value::Null, Value::text("bc")];
        let ptr = builder.allocate_list(0, &ListElement::Text, Some(&values)).unwrap();
        let buffer = builder.pack(&[ptr]).unwrap();
        let bytes = buffer.as_bytes();

        assert_eq!((word(bytes, 0) >> 32) & 7, 6);
        assert_eq!(follow(bytes, 0), (1, 8));
        let (_, first) = follow(bytes, 8);
        assert_eq!(&bytes[first..first + 2], b"a\0");
        assert_eq!(word(bytes, 16), 0);
        let (_, third) = follow(bytes, 24);
        assert_eq!(&bytes[third..third + 3], b"bc\0");
    }

    #[test]
    fn struct_list_relocates_element_pointers() {
        // Element: one data word, one pointer to "x".
        let element_extent = Extent::new(1, 1);
        let mut inner = WireBuilder::new(
            "Item",
            element_extent,
            format(element_extent, &[(0, PackCode::UInt64), (8, PackCode::Pointer)]),
        );
        let text_ptr = inner.allocate_text(8, Some("x")).unwrap();
        let item = inner.pack(&[5, text_ptr]).unwrap();

        let extent = Extent::new(0, 1);
        let mut builder = WireBuilder::new("P", extent, format(extent, &[(0, PackCode::Pointer)]));
        let target = StructTarget::new("Item", element_extent);
        let values = [Value::Struct(item.clone()), Value::Struct(item)];
        let ptr = builder
            .allocate_list(0, &ListElement::Struct(target), Some(&values))
            .unwrap();
        let buffer = builder.pack(&[ptr]).unwrap();
        let bytes = buffer.as_bytes();

        assert_eq!((word(bytes, 0) >> 32) & 7, 7);
        assert_eq!(word(bytes, 0) >> 35, 4);
        // Tag word: element count in the offset field.
        assert_eq!(word(bytes, 8) & OFFSET_FIELD, 2 << 2);
        for element_at in [16, 32] {
            assert_eq!(word(bytes, element_at), 5);
            let (tag, target) = follow(bytes, element_at + 8);
            assert_eq!(tag, 1);
            assert_eq!(&bytes[target..target + 2], b"x\0");
        }
    }

    #[test]
    fn pack_checks_value_count() {
        let extent = Extent::new(1, 0);
        let builder = WireBuilder::new("P", extent, format(extent, &[(0, PackCode::Int32)]));
        let err = builder.pack(&[]).unwrap_err();
        assert_eq!(err, BuildError::ValueCount { expected: 1, found: 0 });
    }

    #[test]
    fn list_kind_follows_element() {
        assert_eq!(ListElement::Text.kind(), ListKind::Text);
        assert_eq!(
            ListElement::Primitive(PackCode::Float32).kind(),
            ListKind::Primitive
        );
    }
}
