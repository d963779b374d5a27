// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types.

use thiserror::Error;

/// Any error raised while parsing declarations, synthesizing layouts, or
/// accessing decoded values.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested aggregate was never declared by any added source.
    #[error("aggregate `{0}` is not declared by any added source")]
    UnknownAggregate(String),

    /// A field's type text cannot be resolved through the environment.
    #[error("cannot resolve C type `{0}`")]
    UnknownType(String),

    /// A constant expression uses unsupported operators or unknown names.
    #[error("cannot evaluate constant expression `{0}`")]
    UnevaluableExpr(String),

    /// A field declares an inline anonymous struct/union body.
    #[error("aggregate `{0}` contains an inline anonymous aggregate body")]
    InlineAggregate(String),

    /// An aggregate contains itself by value.
    #[error("aggregate `{0}` recursively contains itself by value")]
    CyclicAggregate(String),

    /// A pack value the layout engine does not accept.
    #[error("pack value {0} is not supported")]
    UnsupportedPack(u32),

    /// Field lookup by name failed.
    #[error("no field named `{0}`")]
    NoSuchField(String),

    /// Array indexing out of bounds.
    #[error("array index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A scalar read or write was attempted on an aggregate or array field.
    #[error("field `{0}` is not a scalar value")]
    NotScalar(String),

    /// A write carried a value of the wrong kind for the field.
    #[error("field `{field}` expects a {expected} value")]
    WrongValueKind {
        field: String,
        expected: &'static str,
    },

    /// A primitive access fell outside the view's storage.
    #[error("access of {len} bytes at offset {offset} is outside the storage")]
    StorageBounds { offset: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
