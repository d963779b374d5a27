// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The converter: source text in, decoded views out.

use crate::env::TypeEnv;
use crate::error::Result;
use crate::extract::Extractor;
use crate::facade::StructView;
use crate::layout::{DescriptorCache, Synthesizer};
use crate::scrub::strip_comments;
use cdecode_types::{AggregateDescriptor, Pack};
use std::sync::Arc;

/// Parses preprocessed C source text and decodes byte buffers against the
/// declarations found in it.
///
/// Sources accumulate via [Converter::add_source]; parsing happens on
/// [Converter::parse] and implicitly before any decode that follows a
/// source change. The default pack is 1 (no padding), matching sources
/// compiled under `#pragma pack(1)`; use [Converter::with_pack] for other
/// disciplines.
pub struct Converter {
    content: String,
    default_pack: Pack,
    env: TypeEnv,
    cache: DescriptorCache,
    dirty: bool,
}

impl Converter {
    pub fn new() -> Self {
        Self::with_pack(Pack::Bytes(1))
    }

    /// A converter whose aggregates default to the given pack discipline.
    pub fn with_pack(default_pack: Pack) -> Self {
        Self {
            content: String::new(),
            default_pack,
            env: TypeEnv::default(),
            cache: DescriptorCache::new(),
            dirty: false,
        }
    }

    /// Append source text. Declarations are not visible until the next
    /// parse, which [Converter::decode] and friends trigger implicitly.
    pub fn add_source(&mut self, text: &str) {
        self.content.push_str(text);
        self.content.push('\n');
        self.dirty = true;
    }

    /// Drop all accumulated source text and parsed state.
    pub fn clear_source(&mut self) {
        self.content.clear();
        self.env.clear();
        self.cache.clear();
        self.dirty = false;
    }

    /// Parse everything added so far, rebuilding the environment.
    pub fn parse(&mut self) -> Result<()> {
        self.env.clear();
        self.cache.clear();
        let scrubbed = strip_comments(&self.content);
        Extractor::new().extract_into(&mut self.env, &scrubbed);
        self.dirty = false;
        Ok(())
    }

    fn ensure_parsed(&mut self) -> Result<()> {
        if self.dirty {
            self.parse()
        } else {
            Ok(())
        }
    }

    /// The parsed environment (read-only).
    pub fn env(&self) -> &TypeEnv {
        &self.env
    }

    /// The computed descriptor for an aggregate, memoized per `(tag, pack)`.
    pub fn descriptor(&mut self, tag: &str) -> Result<Arc<AggregateDescriptor>> {
        self.ensure_parsed()?;
        Synthesizer::new(&self.env, self.default_pack, &mut self.cache).descriptor(tag)
    }

    /// Total byte size of the aggregate named `tag`.
    pub fn size_of(&mut self, tag: &str) -> Result<usize> {
        Ok(self.descriptor(tag)?.size)
    }

    /// Decode the aggregate named `tag` from `bytes[offset..]`.
    ///
    /// The populate slice is `bytes[offset .. offset + size_of(tag)]`,
    /// clamped to the buffer end. A slice of any other length than the
    /// aggregate size leaves the returned view zero-initialized (see
    /// [StructView::populate]).
    pub fn decode(&mut self, tag: &str, bytes: &[u8], offset: usize) -> Result<StructView> {
        let desc = self.descriptor(tag)?;
        let view = StructView::new(desc);

        let end = offset.saturating_add(view.size()).min(bytes.len());
        let slice = bytes.get(offset..end).unwrap_or(&[]);
        view.populate(slice);

        Ok(view)
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_requires_a_known_tag() {
        let mut conv = Converter::new();
        conv.add_source("struct A { int x; };");
        assert!(conv.decode("Missing", &[], 0).is_err());
        assert!(conv.decode("A", &4i32.to_le_bytes(), 0).is_ok());
    }

    #[test]
    fn adding_source_after_parse_reparses_implicitly() {
        let mut conv = Converter::new();
        conv.add_source("struct A { int x; };");
        conv.parse().unwrap();
        assert_eq!(conv.size_of("A").unwrap(), 4);

        conv.add_source("struct B { struct A a; char c; };");
        assert_eq!(conv.size_of("B").unwrap(), 5);
        assert_eq!(conv.size_of("A").unwrap(), 4);
    }

    #[test]
    fn clear_source_forgets_declarations() {
        let mut conv = Converter::new();
        conv.add_source("struct A { int x; };");
        assert_eq!(conv.size_of("A").unwrap(), 4);
        conv.clear_source();
        assert!(conv.size_of("A").is_err());
    }

    #[test]
    fn short_buffers_leave_the_view_zeroed() {
        let mut conv = Converter::new();
        conv.add_source("struct A { unsigned int x; unsigned int y; };");
        let view = conv.decode("A", &[0xFF, 0xFF], 0).unwrap();
        assert_eq!(view.field("x").unwrap().as_uint(), Some(0));
        assert_eq!(view.field("y").unwrap().as_uint(), Some(0));
    }
}
