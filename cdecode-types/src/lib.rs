// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Type model for runtime-parsed C struct/union declarations.
//!
//! This crate defines the data structures that describe C types as they are
//! discovered at load time by parsing declarations out of preprocessed
//! source text. It deliberately contains no parsing or decoding logic; the
//! `cdecode-core` crate consumes these types to build layouts and decode
//! byte buffers.
//!
//! # Minimal by Design
//!
//! Unlike bindgen-style tooling, nothing here is generated ahead of time.
//! An aggregate is represented by an [AggregateDescriptor] — plain data
//! holding the computed size, alignment, and per-field offsets — rather
//! than by a distinct Rust type per C struct. A single generic view in the
//! engine crate can then navigate any descriptor.
//!
//! # Two Levels of Type Description
//!
//! ## [TypeRef]
//!
//! The *unresolved* form, produced while scanning declarations: names are
//! still names (`Alias`, `StructTag`, …) and array dimensions may still be
//! flexible. References are cheap to build and to intern in the
//! environment tables.
//!
//! ## [FieldType]
//!
//! The *resolved* form, produced by layout synthesis: every name has been
//! chased to a primitive [Leaf], a nested [AggregateDescriptor], or an
//! array thereof. This is what byte-level accessors work from.
//!
//! # Committed Platform Choices
//!
//! The model commits to an LP64, little-endian target:
//!
//! * pointers occupy 8 bytes and are never dereferenced;
//! * `long` and `unsigned long` are 8 bytes;
//! * `long double` occupies a 16-byte slot whose value payload is the
//!   x87 80-bit extended format.
//!
//! Natural alignment of every leaf equals its width. Whether that
//! alignment is honored in a layout is decided by the aggregate's [Pack].

pub mod layout;
pub mod primitive;
pub mod reference;

pub use layout::{AggregateDescriptor, FieldSlot, FieldType, Pack};
pub use primitive::{Leaf, Qualifiers};
pub use reference::{AggregateKind, Dim, TypeKeyword, TypeRef};
