// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolved, layout-computed aggregate descriptors.

use crate::primitive::Leaf;
use crate::reference::AggregateKind;
use std::sync::Arc;

/// The maximum alignment honored inside an aggregate.
///
/// `Bytes(1)` means no padding at all; that is the value the engine
/// defaults to, matching the `#pragma pack(1)` discipline the input
/// sources are expected to be compiled under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pack {
    /// Honor every field's natural alignment.
    Natural,
    Bytes(u32),
}

impl Pack {
    /// The alignment actually honored for a field whose natural alignment
    /// is `natural`.
    pub fn effective_align(self, natural: usize) -> usize {
        match self {
            Self::Natural => natural,
            Self::Bytes(n) => natural.min(n as usize).max(1),
        }
    }
}

/// A fully resolved field type: what byte-level accessors work from.
#[derive(Clone, Debug)]
pub enum FieldType {
    Leaf(Leaf),
    Aggregate(Arc<AggregateDescriptor>),
    Array {
        element: Box<FieldType>,
        /// Outermost dimension first. An outermost dimension of 0 encodes
        /// a flexible tail, which contributes no bytes.
        dims: Vec<usize>,
    },
}

impl FieldType {
    /// Total byte size. Flexible arrays (outermost dimension 0) are 0.
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf.width(),
            Self::Aggregate(desc) => desc.size,
            Self::Array { element, dims } => {
                dims.iter().product::<usize>() * element.byte_size()
            }
        }
    }

    /// Natural alignment: leaf width, aggregate alignment, or the element
    /// alignment for arrays.
    pub fn natural_align(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf.align(),
            Self::Aggregate(desc) => desc.align,
            Self::Array { element, .. } => element.natural_align(),
        }
    }
}

/// One field of a computed aggregate layout.
#[derive(Clone, Debug)]
pub struct FieldSlot {
    pub name: String,
    pub ty: FieldType,
    /// Byte offset from the start of the aggregate. 0 for every union
    /// member.
    pub offset: usize,
    /// Byte size of the field. For a bit-field this is the size of its
    /// storage unit; for a flexible tail it is 0.
    pub size: usize,
    /// LSB-first bit position inside the storage unit, for bit-fields.
    pub bit_offset: Option<u32>,
    pub bit_width: Option<u32>,
}

impl FieldSlot {
    /// Whether the slot is a bit-field.
    pub fn is_bitfield(&self) -> bool {
        self.bit_width.is_some()
    }
}

/// The resolved, layout-computed representation of a struct or union.
///
/// Descriptors are plain data: size, alignment, and an ordered field list
/// with precomputed offsets. They are derived on demand from the raw
/// declaration text and memoized by the engine.
#[derive(Clone, Debug)]
pub struct AggregateDescriptor {
    pub kind: AggregateKind,
    pub tag: String,
    pub pack: Pack,
    pub size: usize,
    pub align: usize,
    pub fields: Vec<FieldSlot>,
}

impl AggregateDescriptor {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSlot> {
        self.fields.iter().find(|f| f.name == name)
    }
}
