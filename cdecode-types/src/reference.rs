// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Unresolved type references as scanned out of declarations.

use crate::primitive::Leaf;
use std::fmt::{Display, Formatter};

/// Whether an aggregate is a struct or a union.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AggregateKind {
    Struct,
    Union,
}

impl AggregateKind {
    /// The C keyword for the kind.
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Struct => "struct",
            Self::Union => "union",
        }
    }
}

impl Display for AggregateKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A type keyword written inline in a field declaration
/// (`struct Foo f;`, `enum Color c;`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKeyword {
    Struct,
    Union,
    Enum,
}

impl TypeKeyword {
    /// Parse the keyword text.
    pub fn from_keyword(text: &str) -> Option<Self> {
        Some(match text {
            "struct" => Self::Struct,
            "union" => Self::Union,
            "enum" => Self::Enum,
            _ => return None,
        })
    }
}

/// One array dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dim {
    Fixed(usize),
    /// A flexible/zero-length dimension (`[]` or `[0]`). Only legal as the
    /// outermost dimension of a trailing array.
    Flex,
}

/// An unresolved reference to a C type.
///
/// References are what the declaration scanner produces; the layout
/// synthesizer chases them through the environment down to concrete
/// [crate::FieldType]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeRef {
    Primitive(Leaf),
    /// A typedef name. Chains are legal and must terminate in a primitive,
    /// pointer, or aggregate tag.
    Alias(String),
    StructTag(String),
    UnionTag(String),
    EnumTag(String),
    /// A pointer to anything. Resolution collapses this to a single
    /// pointer word; the pointee is kept only for display.
    PointerTo(Box<TypeRef>),
    Array {
        element: Box<TypeRef>,
        /// Written order: outermost dimension first, innermost (fastest
        /// varying in memory) last.
        dims: Vec<Dim>,
    },
    BitField {
        base: Leaf,
        width: u32,
    },
}
