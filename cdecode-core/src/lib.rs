// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime C struct/union decoder over preprocessed source text.
//!
//! This crate takes post-preprocessor C source (macros expanded,
//! `#include`s inlined) together with a raw byte buffer, and produces a
//! navigable value tree that interprets those bytes according to the type
//! declarations found in the source. The schema is discovered at load
//! time by parsing declarations, not compiled in.
//!
//! The pipeline:
//!
//! 1. [scrub] strips comments.
//! 2. [extract] recognizes `typedef`/`struct`/`union`/`enum` declarations
//!    (balanced-brace bodies, trailing name lists, pointer typedefs,
//!    packing attributes) and interns them into an [env::TypeEnv];
//!    enumerator values are computed by the [expr] interpreter.
//! 3. [layout] resolves a named aggregate on demand into an
//!    [cdecode_types::AggregateDescriptor] with concrete field offsets,
//!    bit-field packing, and sizes.
//! 4. [facade] wraps a descriptor around shared byte storage as a
//!    [StructView] with typed reads and in-place scalar writes.
//!
//! [Converter] ties the stages together behind `add_source` / `parse` /
//! `decode`.
//!
//! # Byte Order and Platform Model
//!
//! All primitive decoding is little-endian. The type model is LP64:
//! pointers and `long` are 8 bytes. Pointer-typed fields occupy one
//! pointer word and are never dereferenced.
//!
//! # Buffer Size Tolerance
//!
//! Populating a view from a buffer whose length does not exactly equal
//! the aggregate size is *tolerated*: the view simply stays
//! zero-initialized and a warning is logged. This lets callers construct
//! views against data that has not fully arrived. If you need strictness,
//! compare `buffer.len()` against [Converter::size_of] first.
//!
//! # Threading
//!
//! The converter and its views are single-threaded by design; views are
//! cheap `Rc`-based handles over shared storage, and writes through one
//! view are immediately visible to every overlapping view (this is what
//! makes union members behave like C unions).

pub mod convert;
pub mod env;
pub mod error;
pub mod expr;
pub mod extract;
pub mod facade;
pub mod fields;
pub mod layout;
pub mod pod;
pub mod render;
pub mod scrub;

pub use convert::Converter;
pub use error::{Error, Result};
pub use extract::DEFAULT_ENUM_VAL;
pub use facade::{ArrayView, StructView, Value};
