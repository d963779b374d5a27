// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed views over decoded byte storage.
//!
//! A [StructView] pairs an aggregate descriptor with shared, owned storage.
//! Sub-views (nested aggregates, arrays, union members) borrow the same
//! storage, so a write through any view is visible through every
//! overlapping view — which is exactly what union semantics require.
//!
//! Views are single-threaded handles (`Rc`); callers that share decoded
//! data across threads copy the bytes out instead.

use crate::error::{Error, Result};
use crate::pod;
use bytes::BytesMut;
use cdecode_types::{AggregateDescriptor, FieldSlot, FieldType, Leaf};
use log::warn;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// A value read out of a view: either a scalar or a nested view.
#[derive(Clone, Debug)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Pointer(u64),
    Aggregate(StructView),
    Array(ArrayView),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Uint(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            Self::Int(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<u64> {
        match self {
            Self::Pointer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_aggregate(&self) -> Option<&StructView> {
        match self {
            Self::Aggregate(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayView> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }
}

type Storage = Rc<RefCell<BytesMut>>;

/// A decoded aggregate: descriptor plus shared byte storage.
#[derive(Clone, Debug)]
pub struct StructView {
    desc: Arc<AggregateDescriptor>,
    storage: Storage,
    base: usize,
}

impl StructView {
    /// Create a zero-initialized view for a descriptor.
    pub fn new(desc: Arc<AggregateDescriptor>) -> Self {
        let storage = Rc::new(RefCell::new(BytesMut::zeroed(desc.size)));
        Self {
            desc,
            storage,
            base: 0,
        }
    }

    fn sub(&self, desc: Arc<AggregateDescriptor>, base: usize) -> Self {
        Self {
            desc,
            storage: self.storage.clone(),
            base,
        }
    }

    /// The descriptor this view navigates.
    pub fn descriptor(&self) -> &AggregateDescriptor {
        &self.desc
    }

    /// Total byte size of the viewed aggregate.
    pub fn size(&self) -> usize {
        self.desc.size
    }

    /// The aggregate's tag.
    pub fn tag(&self) -> &str {
        &self.desc.tag
    }

    /// Copy `buf` into the underlying storage.
    ///
    /// Accepted only when `buf.len()` equals the aggregate size; any other
    /// length leaves the storage untouched (zeroed for a fresh view) and
    /// logs a warning. This tolerance is deliberate: it lets callers hold
    /// a view against data that has not fully arrived yet.
    pub fn populate(&self, buf: &[u8]) {
        if buf.len() == self.desc.size {
            self.storage.borrow_mut()[self.base..self.base + buf.len()].copy_from_slice(buf);
        } else {
            warn!(
                "buffer of {} bytes does not match `{}` ({} bytes); leaving view zeroed",
                buf.len(),
                self.desc.tag,
                self.desc.size
            );
        }
    }

    /// Copy the viewed bytes out.
    pub fn bytes(&self) -> Vec<u8> {
        self.storage.borrow()[self.base..self.base + self.desc.size].to_vec()
    }

    /// Iterate the ordered field slots: name, resolved type, offset, size.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSlot> {
        self.desc.fields.iter()
    }

    /// Read a field by name.
    pub fn field(&self, name: &str) -> Result<Value> {
        let slot = self
            .desc
            .field(name)
            .ok_or_else(|| Error::NoSuchField(name.to_string()))?;
        self.read_slot(slot)
    }

    fn read_slot(&self, slot: &FieldSlot) -> Result<Value> {
        let offset = self.base + slot.offset;

        if let (Some(bit_offset), Some(bit_width)) = (slot.bit_offset, slot.bit_width) {
            let leaf = match &slot.ty {
                FieldType::Leaf(leaf) => *leaf,
                _ => return Err(Error::NotScalar(slot.name.clone())),
            };
            return read_bits(&self.storage.borrow(), offset, leaf, bit_offset, bit_width);
        }

        match &slot.ty {
            FieldType::Leaf(leaf) => read_leaf(&self.storage.borrow(), offset, *leaf),
            FieldType::Aggregate(desc) => Ok(Value::Aggregate(self.sub(desc.clone(), offset))),
            FieldType::Array { element, dims } => Ok(Value::Array(ArrayView {
                element: (**element).clone(),
                dims: dims.clone(),
                storage: self.storage.clone(),
                base: offset,
            })),
        }
    }

    /// Write a scalar field in place.
    ///
    /// The write goes straight into the shared storage, so it is visible
    /// through every overlapping view.
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        let slot = self
            .desc
            .field(name)
            .ok_or_else(|| Error::NoSuchField(name.to_string()))?;
        let offset = self.base + slot.offset;

        if let (Some(bit_offset), Some(bit_width)) = (slot.bit_offset, slot.bit_width) {
            let leaf = match &slot.ty {
                FieldType::Leaf(leaf) => *leaf,
                _ => return Err(Error::NotScalar(slot.name.clone())),
            };
            let raw = value.as_uint().ok_or(Error::WrongValueKind {
                field: name.to_string(),
                expected: "integer",
            })?;
            return write_bits(
                &mut self.storage.borrow_mut(),
                offset,
                leaf,
                bit_offset,
                bit_width,
                raw,
            );
        }

        match &slot.ty {
            FieldType::Leaf(leaf) => {
                write_leaf(&mut self.storage.borrow_mut(), offset, *leaf, &slot.name, value)
            }
            _ => Err(Error::NotScalar(slot.name.clone())),
        }
    }
}

/// A decoded array field. Indexing peels one dimension at a time,
/// row-major: the innermost (last written) dimension varies fastest.
#[derive(Clone, Debug)]
pub struct ArrayView {
    element: FieldType,
    dims: Vec<usize>,
    storage: Storage,
    base: usize,
}

impl ArrayView {
    /// Number of elements along the outermost dimension.
    pub fn len(&self) -> usize {
        self.dims[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte stride between consecutive elements of this dimension.
    fn stride(&self) -> usize {
        self.dims[1..].iter().product::<usize>() * self.element.byte_size()
    }

    fn element_offset(&self, index: usize) -> Result<usize> {
        if index >= self.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                len: self.len(),
            });
        }
        Ok(self.base + index * self.stride())
    }

    /// Read the element at `index`, bounds-checked.
    pub fn at(&self, index: usize) -> Result<Value> {
        let offset = self.element_offset(index)?;

        if self.dims.len() > 1 {
            return Ok(Value::Array(ArrayView {
                element: self.element.clone(),
                dims: self.dims[1..].to_vec(),
                storage: self.storage.clone(),
                base: offset,
            }));
        }

        match &self.element {
            FieldType::Leaf(leaf) => read_leaf(&self.storage.borrow(), offset, *leaf),
            FieldType::Aggregate(desc) => Ok(Value::Aggregate(StructView {
                desc: desc.clone(),
                storage: self.storage.clone(),
                base: offset,
            })),
            FieldType::Array { element, dims } => Ok(Value::Array(ArrayView {
                element: (**element).clone(),
                dims: dims.clone(),
                storage: self.storage.clone(),
                base: offset,
            })),
        }
    }

    /// Write a scalar element at `index`, bounds-checked.
    pub fn set(&self, index: usize, value: Value) -> Result<()> {
        let offset = self.element_offset(index)?;

        if self.dims.len() > 1 {
            return Err(Error::NotScalar(format!("[{index}]")));
        }
        match &self.element {
            FieldType::Leaf(leaf) => write_leaf(
                &mut self.storage.borrow_mut(),
                offset,
                *leaf,
                &format!("[{index}]"),
                value,
            ),
            _ => Err(Error::NotScalar(format!("[{index}]"))),
        }
    }
}

fn read_leaf(data: &[u8], offset: usize, leaf: Leaf) -> Result<Value> {
    Ok(match leaf {
        Leaf::I8 | Leaf::ByteChar => Value::Int(pod::read_le_i8(data, offset)? as i64),
        Leaf::U8 => Value::Uint(pod::read_le_u8(data, offset)? as u64),
        Leaf::I16 => Value::Int(pod::read_le_i16(data, offset)? as i64),
        Leaf::U16 => Value::Uint(pod::read_le_u16(data, offset)? as u64),
        Leaf::I32 => Value::Int(pod::read_le_i32(data, offset)? as i64),
        Leaf::U32 => Value::Uint(pod::read_le_u32(data, offset)? as u64),
        Leaf::I64 => Value::Int(pod::read_le_i64(data, offset)?),
        Leaf::U64 => Value::Uint(pod::read_le_u64(data, offset)?),
        Leaf::F32 => Value::Float(pod::read_le_f32(data, offset)? as f64),
        Leaf::F64 => Value::Float(pod::read_le_f64(data, offset)?),
        Leaf::FLongDouble => Value::Float(pod::read_le_f80(data, offset)?),
        Leaf::Bool => Value::Bool(pod::read_le_u8(data, offset)? != 0),
        Leaf::PointerWord | Leaf::CStringPointer => {
            Value::Pointer(pod::read_le_u64(data, offset)?)
        }
    })
}

fn write_leaf(data: &mut [u8], offset: usize, leaf: Leaf, name: &str, value: Value) -> Result<()> {
    let wrong = |expected: &'static str| Error::WrongValueKind {
        field: name.to_string(),
        expected,
    };

    match leaf {
        Leaf::I8 | Leaf::ByteChar | Leaf::U8 => {
            let v = value.as_uint().ok_or(wrong("integer"))?;
            pod::write_le_u8(data, offset, v as u8)
        }
        Leaf::I16 | Leaf::U16 => {
            let v = value.as_uint().ok_or(wrong("integer"))?;
            pod::write_le_u16(data, offset, v as u16)
        }
        Leaf::I32 | Leaf::U32 => {
            let v = value.as_uint().ok_or(wrong("integer"))?;
            pod::write_le_u32(data, offset, v as u32)
        }
        Leaf::I64 | Leaf::U64 => {
            let v = value.as_uint().ok_or(wrong("integer"))?;
            pod::write_le_u64(data, offset, v)
        }
        Leaf::F32 => {
            let v = value.as_float().ok_or(wrong("float"))?;
            pod::write_le_f32(data, offset, v as f32)
        }
        Leaf::F64 => {
            let v = value.as_float().ok_or(wrong("float"))?;
            pod::write_le_f64(data, offset, v)
        }
        Leaf::FLongDouble => {
            let v = value.as_float().ok_or(wrong("float"))?;
            pod::write_le_f80(data, offset, v)
        }
        Leaf::Bool => {
            let v = value.as_bool().ok_or(wrong("bool"))?;
            pod::write_le_u8(data, offset, v as u8)
        }
        Leaf::PointerWord | Leaf::CStringPointer => {
            let v = value
                .as_pointer()
                .or_else(|| value.as_uint())
                .ok_or(wrong("pointer"))?;
            pod::write_le_u64(data, offset, v)
        }
    }
}

fn read_unit(data: &[u8], offset: usize, leaf: Leaf) -> Result<u64> {
    Ok(match leaf.width() {
        1 => pod::read_le_u8(data, offset)? as u64,
        2 => pod::read_le_u16(data, offset)? as u64,
        4 => pod::read_le_u32(data, offset)? as u64,
        _ => pod::read_le_u64(data, offset)?,
    })
}

fn write_unit(data: &mut [u8], offset: usize, leaf: Leaf, value: u64) -> Result<()> {
    match leaf.width() {
        1 => pod::write_le_u8(data, offset, value as u8),
        2 => pod::write_le_u16(data, offset, value as u16),
        4 => pod::write_le_u32(data, offset, value as u32),
        _ => pod::write_le_u64(data, offset, value),
    }
}

fn bit_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Extract an LSB-first bit-field out of its storage unit.
fn read_bits(data: &[u8], offset: usize, leaf: Leaf, bit_offset: u32, bit_width: u32) -> Result<Value> {
    let unit = read_unit(data, offset, leaf)?;
    let raw = (unit >> bit_offset) & bit_mask(bit_width);

    if leaf.is_signed() {
        // Sign-extend from the field's top bit.
        let shift = 64 - bit_width;
        Ok(Value::Int(((raw << shift) as i64) >> shift))
    } else {
        Ok(Value::Uint(raw))
    }
}

/// Read-modify-write an LSB-first bit-field inside its storage unit.
fn write_bits(
    data: &mut [u8],
    offset: usize,
    leaf: Leaf,
    bit_offset: u32,
    bit_width: u32,
    value: u64,
) -> Result<()> {
    let mask = bit_mask(bit_width) << bit_offset;
    let unit = read_unit(data, offset, leaf)?;
    let merged = (unit & !mask) | ((value << bit_offset) & mask);
    write_unit(data, offset, leaf, merged)
}

#[cfg(test)]
mod test {
    use super::*;
    use cdecode_types::{AggregateKind, Pack};

    fn leaf_slot(name: &str, leaf: Leaf, offset: usize) -> FieldSlot {
        FieldSlot {
            name: name.to_string(),
            ty: FieldType::Leaf(leaf),
            offset,
            size: leaf.width(),
            bit_offset: None,
            bit_width: None,
        }
    }

    fn test_descriptor() -> Arc<AggregateDescriptor> {
        Arc::new(AggregateDescriptor {
            kind: AggregateKind::Struct,
            tag: "T".to_string(),
            pack: Pack::Bytes(1),
            size: 13,
            align: 1,
            fields: vec![
                leaf_slot("a", Leaf::U32, 0),
                leaf_slot("b", Leaf::ByteChar, 4),
                leaf_slot("c", Leaf::F64, 5),
            ],
        })
    }

    #[test]
    fn populate_requires_exact_size() {
        let view = StructView::new(test_descriptor());
        view.populate(&[0xFF; 4]);
        assert_eq!(view.field("a").unwrap().as_uint(), Some(0));

        let mut buf = vec![0u8; 13];
        buf[0..4].copy_from_slice(&[0xFF; 4]);
        view.populate(&buf);
        assert_eq!(view.field("a").unwrap().as_uint(), Some(0xFFFF_FFFF));
    }

    #[test]
    fn round_trips_raw_bytes() {
        let view = StructView::new(test_descriptor());
        let buf: Vec<u8> = (0..13).collect();
        view.populate(&buf);
        assert_eq!(view.bytes(), buf);
    }

    #[test]
    fn scalar_writes_land_in_storage() {
        let view = StructView::new(test_descriptor());
        view.set("a", Value::Uint(0x01020304)).unwrap();
        view.set("c", Value::Float(2.5)).unwrap();
        assert_eq!(view.field("a").unwrap().as_uint(), Some(0x01020304));
        assert_eq!(view.field("c").unwrap().as_float(), Some(2.5));
        assert_eq!(&view.bytes()[0..4], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn missing_fields_and_bad_kinds_error() {
        let view = StructView::new(test_descriptor());
        assert!(matches!(view.field("zz"), Err(Error::NoSuchField(_))));
        assert!(matches!(
            view.set("c", Value::Uint(3)),
            Err(Error::WrongValueKind { .. })
        ));
    }

    #[test]
    fn bit_extraction_is_lsb_first() {
        let mut data = (8292304u32).to_le_bytes().to_vec();
        let v = read_bits(&data, 0, Leaf::U32, 0, 12).unwrap();
        assert_eq!(v.as_uint(), Some(2000));
        let v = read_bits(&data, 0, Leaf::U32, 12, 10).unwrap();
        assert_eq!(v.as_uint(), Some(1000));
        let v = read_bits(&data, 0, Leaf::U32, 22, 1).unwrap();
        assert_eq!(v.as_uint(), Some(1));

        write_bits(&mut data, 0, Leaf::U32, 12, 10, 3).unwrap();
        let v = read_bits(&data, 0, Leaf::U32, 12, 10).unwrap();
        assert_eq!(v.as_uint(), Some(3));
        // Neighbors are untouched.
        assert_eq!(read_bits(&data, 0, Leaf::U32, 0, 12).unwrap().as_uint(), Some(2000));
        assert_eq!(read_bits(&data, 0, Leaf::U32, 22, 1).unwrap().as_uint(), Some(1));
    }

    #[test]
    fn signed_bitfields_sign_extend() {
        let data = 0b1110u8.to_le_bytes().to_vec();
        let v = read_bits(&data, 0, Leaf::I8, 1, 3).unwrap();
        assert_eq!(v.as_int(), Some(-1));
    }
}
