// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Layout synthesis: raw aggregate records into computed descriptors.

use crate::env::{AggregateRecord, TypeEnv};
use crate::error::{Error, Result};
use crate::expr;
use crate::extract::normalize_type_text;
use crate::fields::{split_dims, FieldParser, FieldSpec};
use cdecode_types::{
    AggregateDescriptor, AggregateKind, Dim, FieldSlot, FieldType, Leaf, Pack, TypeKeyword, TypeRef,
};
use log::{debug, warn};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Memoized descriptors, keyed by `(tag, pack)`.
pub(crate) type DescriptorCache = BTreeMap<(String, Pack), Arc<AggregateDescriptor>>;

/// A resolved field, ready for the layout walk.
struct Pending {
    name: String,
    ty: FieldType,
    /// Outermost dimension was `[]` or evaluated to 0.
    flex: bool,
    bits: Option<u32>,
}

/// Builds aggregate descriptors against a read-only environment.
///
/// Holds an in-progress set so self-referential by-value aggregates fail
/// fast instead of recursing forever.
pub(crate) struct Synthesizer<'e> {
    env: &'e TypeEnv,
    default_pack: Pack,
    cache: &'e mut DescriptorCache,
    building: BTreeSet<String>,
    fields: FieldParser,
    sizeof: Regex,
}

impl<'e> Synthesizer<'e> {
    pub fn new(env: &'e TypeEnv, default_pack: Pack, cache: &'e mut DescriptorCache) -> Self {
        Self {
            env,
            default_pack,
            cache,
            building: BTreeSet::new(),
            fields: FieldParser::new(),
            sizeof: Regex::new(r"sizeof\s*\(\s*([^()]*?)\s*\)").expect("sizeof pattern is valid"),
        }
    }

    /// Resolve and lay out the aggregate named `tag`.
    pub fn descriptor(&mut self, tag: &str) -> Result<Arc<AggregateDescriptor>> {
        let record = self
            .env
            .aggregate(tag)
            .or_else(|| self.env.pointer_aggregate(tag))
            .cloned()
            .ok_or_else(|| Error::UnknownAggregate(tag.to_string()))?;

        let pack = match self.env.pack_override(tag) {
            Some(n) => Pack::Bytes(n),
            None => self.default_pack,
        };
        if let Pack::Bytes(0) = pack {
            return Err(Error::UnsupportedPack(0));
        }

        let key = (tag.to_string(), pack);
        if let Some(desc) = self.cache.get(&key) {
            return Ok(desc.clone());
        }

        if !self.building.insert(tag.to_string()) {
            return Err(Error::CyclicAggregate(tag.to_string()));
        }
        let built = self.build(tag, &record, pack);
        self.building.remove(tag);

        let desc = Arc::new(built?);
        debug!(
            "synthesized `{tag}`: size {}, align {}, {} fields",
            desc.size,
            desc.align,
            desc.fields.len()
        );
        self.cache.insert(key, desc.clone());
        Ok(desc)
    }

    fn build(&mut self, tag: &str, record: &AggregateRecord, pack: Pack) -> Result<AggregateDescriptor> {
        let specs = self.fields.parse(tag, &record.body)?;

        let mut pending = Vec::with_capacity(specs.len());
        for spec in &specs {
            pending.push(self.resolve_field(spec)?);
        }

        let (size, align, fields) = match record.kind {
            AggregateKind::Struct => layout_struct(pack, &pending),
            AggregateKind::Union => layout_union(pack, &pending),
        };

        Ok(AggregateDescriptor {
            kind: record.kind,
            tag: record.tag.clone(),
            pack,
            size,
            align,
            fields,
        })
    }

    fn resolve_field(&mut self, spec: &FieldSpec) -> Result<Pending> {
        let base = self.resolve_type_text(spec.keyword, &spec.type_text)?;

        let field_dims = match &spec.array_text {
            Some(text) => self.eval_dims(text)?,
            None => Vec::new(),
        };

        // The field's own dimensions are outermost; any dimensions carried
        // by a typedef'd array element stay innermost.
        let ty = if field_dims.is_empty() {
            base
        } else {
            match base {
                FieldType::Array { element, dims } => {
                    let mut all = field_dims;
                    all.extend(dims);
                    FieldType::Array { element, dims: all }
                }
                other => FieldType::Array {
                    element: Box::new(other),
                    dims: field_dims,
                },
            }
        };

        let flex = matches!(&ty, FieldType::Array { dims, .. } if dims.first() == Some(&0));

        let bits = match &spec.bitfield_text {
            Some(_) if spec.array_text.is_some() => {
                warn!(
                    "field `{}` declares both array and bit-field; ignoring the width",
                    spec.name
                );
                None
            }
            Some(text) => Some(self.eval_bitfield_width(spec, text, &ty)?),
            None => None,
        };

        Ok(Pending {
            name: spec.name.clone(),
            ty,
            flex,
            bits,
        })
    }

    fn eval_bitfield_width(&mut self, spec: &FieldSpec, text: &str, ty: &FieldType) -> Result<u32> {
        let leaf = match ty {
            FieldType::Leaf(leaf) if leaf.is_integer() => *leaf,
            _ => return Err(Error::UnknownType(spec.type_text.clone())),
        };

        let substituted = self.substitute_sizeof(text)?;
        let env = self.env;
        let width = expr::eval_int(&substituted, |id| env.enumerator(id))?;
        if width < 0 || width as u32 > leaf.bits() {
            return Err(Error::UnevaluableExpr(text.to_string()));
        }
        Ok(width as u32)
    }

    /// Evaluate array bracket text into concrete sizes, outermost first.
    /// An outermost `[]` or `[0]` becomes 0 (flexible); anywhere else it
    /// is an error.
    fn eval_dims(&mut self, text: &str) -> Result<Vec<usize>> {
        let mut dims = Vec::new();
        for (i, inner) in split_dims(text).into_iter().enumerate() {
            let inner = inner.trim().to_string();
            let n = if inner.is_empty() {
                0
            } else {
                let substituted = self.substitute_sizeof(&inner)?;
                let env = self.env;
                let value = expr::eval_int(&substituted, |id| env.enumerator(id))?;
                if value < 0 {
                    return Err(Error::UnevaluableExpr(inner.clone()));
                }
                value as usize
            };
            if n == 0 && i != 0 {
                return Err(Error::UnevaluableExpr(inner));
            }
            dims.push(n);
        }
        Ok(dims)
    }

    /// Replace every `sizeof(X)` with the byte size of `X`, resolving `X`
    /// through the same chain as field types (recursing into descriptor
    /// synthesis for aggregates).
    fn substitute_sizeof(&mut self, text: &str) -> Result<String> {
        let mut current = text.to_string();
        while let Some(caps) = self.sizeof.captures(&current) {
            let range = caps.get(0).expect("match 0 always present").range();
            let inner = caps.get(1).expect("inner group always present").as_str().to_string();
            let size = self.resolve_type_text(None, &inner)?.byte_size();
            current.replace_range(range, &size.to_string());
        }
        Ok(current)
    }

    /// Resolve field type text into a concrete field type.
    fn resolve_type_text(&mut self, keyword: Option<TypeKeyword>, text: &str) -> Result<FieldType> {
        let mut seen = Vec::new();
        self.resolve_text_inner(keyword, text, &mut seen)
    }

    fn resolve_text_inner(
        &mut self,
        keyword: Option<TypeKeyword>,
        text: &str,
        seen: &mut Vec<String>,
    ) -> Result<FieldType> {
        let text = normalize_type_text(text);

        match keyword {
            // Enum-typed fields store as i32 whether or not the tag is known.
            Some(TypeKeyword::Enum) => return Ok(FieldType::Leaf(Leaf::I32)),
            Some(_) => {
                if text.contains('*') {
                    return Ok(FieldType::Leaf(Leaf::PointerWord));
                }
                if self.env.aggregate(&text).is_some() {
                    return Ok(FieldType::Aggregate(self.descriptor(&text)?));
                }
                return Err(Error::UnknownType(text));
            }
            None => {}
        }

        if self.env.aggregate(&text).is_some() {
            return Ok(FieldType::Aggregate(self.descriptor(&text)?));
        }
        if self.env.pointer_aggregate(&text).is_some() {
            return Ok(FieldType::Leaf(Leaf::PointerWord));
        }
        if self.env.is_enum(&text) {
            return Ok(FieldType::Leaf(Leaf::I32));
        }
        if text.contains('*') {
            return Ok(FieldType::Leaf(if text == "char *" {
                Leaf::CStringPointer
            } else {
                Leaf::PointerWord
            }));
        }
        if let Some(target) = self.env.typedef(&text) {
            if seen.iter().any(|s| s == &text) {
                return Err(Error::UnknownType(text));
            }
            seen.push(text.clone());
            let target = target.clone();
            return self.resolve_type_ref(&target, seen);
        }
        if let Some(leaf) = Leaf::from_keyword(&text) {
            return Ok(FieldType::Leaf(leaf));
        }

        Err(Error::UnknownType(text))
    }

    fn resolve_type_ref(&mut self, target: &TypeRef, seen: &mut Vec<String>) -> Result<FieldType> {
        match target {
            TypeRef::Primitive(leaf) => Ok(FieldType::Leaf(*leaf)),
            TypeRef::Alias(name) => self.resolve_text_inner(None, name, seen),
            TypeRef::StructTag(tag) | TypeRef::UnionTag(tag) => {
                Ok(FieldType::Aggregate(self.descriptor(tag)?))
            }
            TypeRef::EnumTag(_) => Ok(FieldType::Leaf(Leaf::I32)),
            // Pointers occupy one pointer word no matter the pointee.
            TypeRef::PointerTo(_) => Ok(FieldType::Leaf(Leaf::PointerWord)),
            TypeRef::Array { element, dims } => {
                let element = self.resolve_type_ref(element, seen)?;
                let dims = dims
                    .iter()
                    .map(|d| match d {
                        Dim::Fixed(n) => *n,
                        Dim::Flex => 0,
                    })
                    .collect();
                Ok(FieldType::Array {
                    element: Box::new(element),
                    dims,
                })
            }
            TypeRef::BitField { .. } => Err(Error::UnevaluableExpr("bit-field typedef".to_string())),
        }
    }
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

fn layout_struct(pack: Pack, pending: &[Pending]) -> (usize, usize, Vec<FieldSlot>) {
    struct Unit {
        leaf: Leaf,
        offset: usize,
        used: u32,
    }

    // A lone flexible tail produces no slot at all.
    let elide_lone_flex = pending.len() == 1 && pending[0].flex;

    let mut fields = Vec::new();
    let mut cursor = 0usize;
    let mut struct_align = 1usize;
    let mut unit: Option<Unit> = None;

    for p in pending {
        if let Some(width) = p.bits {
            let leaf = match &p.ty {
                FieldType::Leaf(leaf) => *leaf,
                _ => unreachable!("bit-field bases are integer leaves"),
            };
            if width == 0 {
                // `: 0` forces the next bit-field into a fresh unit.
                unit = None;
                continue;
            }

            let fits = matches!(&unit, Some(u) if u.leaf == leaf && u.used + width <= leaf.bits());
            if !fits {
                let align = pack.effective_align(leaf.align());
                let offset = round_up(cursor, align);
                cursor = offset + leaf.width();
                struct_align = struct_align.max(align);
                unit = Some(Unit {
                    leaf,
                    offset,
                    used: 0,
                });
            }
            let u = unit.as_mut().expect("unit was just opened");
            fields.push(FieldSlot {
                name: p.name.clone(),
                ty: p.ty.clone(),
                offset: u.offset,
                size: leaf.width(),
                bit_offset: Some(u.used),
                bit_width: Some(width),
            });
            u.used += width;
        } else {
            unit = None;
            let align = pack.effective_align(p.ty.natural_align());
            let size = p.ty.byte_size();
            let offset = round_up(cursor, align);
            cursor = offset + size;
            struct_align = struct_align.max(align);

            if p.flex && elide_lone_flex {
                continue;
            }
            fields.push(FieldSlot {
                name: p.name.clone(),
                ty: p.ty.clone(),
                offset,
                size,
                bit_offset: None,
                bit_width: None,
            });
        }
    }

    (round_up(cursor, struct_align), struct_align, fields)
}

fn layout_union(pack: Pack, pending: &[Pending]) -> (usize, usize, Vec<FieldSlot>) {
    let elide_lone_flex = pending.len() == 1 && pending[0].flex;

    let mut fields = Vec::new();
    let mut size = 0usize;
    let mut union_align = 1usize;

    for p in pending {
        let (slot_size, natural, bit) = match p.bits {
            Some(0) => continue,
            Some(width) => {
                let leaf = match &p.ty {
                    FieldType::Leaf(leaf) => *leaf,
                    _ => unreachable!("bit-field bases are integer leaves"),
                };
                (leaf.width(), leaf.align(), Some((0u32, width)))
            }
            None => (p.ty.byte_size(), p.ty.natural_align(), None),
        };

        union_align = union_align.max(pack.effective_align(natural));
        size = size.max(slot_size);

        if p.flex && elide_lone_flex {
            continue;
        }
        fields.push(FieldSlot {
            name: p.name.clone(),
            ty: p.ty.clone(),
            offset: 0,
            size: slot_size,
            bit_offset: bit.map(|(o, _)| o),
            bit_width: bit.map(|(_, w)| w),
        });
    }

    (round_up(size, union_align), union_align, fields)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::extract::Extractor;
    use crate::scrub::strip_comments;

    fn synthesize(src: &str, pack: Pack, tag: &str) -> Result<Arc<AggregateDescriptor>> {
        let mut env = TypeEnv::default();
        Extractor::new().extract_into(&mut env, &strip_comments(src));
        let mut cache = DescriptorCache::new();
        Synthesizer::new(&env, pack, &mut cache).descriptor(tag)
    }

    fn packed(src: &str, tag: &str) -> Arc<AggregateDescriptor> {
        synthesize(src, Pack::Bytes(1), tag).expect("synthesis succeeds")
    }

    #[test]
    fn packed_struct_offsets_are_running_sums() {
        let desc = packed(
            "typedef struct { unsigned int a; char b; double c; } Test1;",
            "Test1",
        );
        assert_eq!(desc.size, 13);
        assert_eq!(desc.field("a").unwrap().offset, 0);
        assert_eq!(desc.field("b").unwrap().offset, 4);
        assert_eq!(desc.field("c").unwrap().offset, 5);
    }

    #[test]
    fn nested_aggregates_inline_their_size() {
        let src = "typedef struct { unsigned int a; char b; double c; } Test1;\n\
                   typedef struct { int a; Test1 b; double c; } Test2;";
        let desc = packed(src, "Test2");
        assert_eq!(desc.size, 25);
        assert_eq!(desc.field("b").unwrap().offset, 4);
        assert_eq!(desc.field("c").unwrap().offset, 17);
    }

    #[test]
    fn multi_dimensional_arrays() {
        let desc = packed(
            "typedef struct { unsigned int firstArr[2][3]; unsigned short secondArr[6]; unsigned short shorty; unsigned int four_bytes; } Test5;",
            "Test5",
        );
        assert_eq!(desc.size, 42);
        assert_eq!(desc.field("secondArr").unwrap().offset, 24);
        assert_eq!(desc.field("shorty").unwrap().offset, 36);
        assert_eq!(desc.field("four_bytes").unwrap().offset, 38);
    }

    #[test]
    fn bitfields_pack_lsb_first_into_one_unit() {
        let desc = packed(
            "typedef struct { unsigned a:12; unsigned b:10; unsigned c:1; const char *p; } Test6;",
            "Test6",
        );
        assert_eq!(desc.size, 12);
        let a = desc.field("a").unwrap();
        let b = desc.field("b").unwrap();
        let c = desc.field("c").unwrap();
        assert_eq!((a.offset, a.bit_offset), (0, Some(0)));
        assert_eq!((b.offset, b.bit_offset), (0, Some(12)));
        assert_eq!((c.offset, c.bit_offset), (0, Some(22)));
        let p = desc.field("p").unwrap();
        assert_eq!((p.offset, p.size), (4, 8));
    }

    #[test]
    fn bitfield_overflow_starts_a_new_unit() {
        let desc = packed(
            "struct Wide { unsigned a:20; unsigned b:20; };",
            "Wide",
        );
        assert_eq!(desc.field("a").unwrap().offset, 0);
        assert_eq!(desc.field("b").unwrap().offset, 4);
        assert_eq!(desc.field("b").unwrap().bit_offset, Some(0));
        assert_eq!(desc.size, 8);
    }

    #[test]
    fn bitfield_base_change_starts_a_new_unit() {
        let desc = packed(
            "struct Mixed { unsigned short a:4; unsigned b:4; };",
            "Mixed",
        );
        assert_eq!(desc.field("a").unwrap().size, 2);
        assert_eq!(desc.field("b").unwrap().offset, 2);
        assert_eq!(desc.size, 6);
    }

    #[test]
    fn unions_overlay_members_at_offset_zero() {
        let desc = packed(
            "typedef union { short smaller; unsigned char very; signed char small; unsigned long long large; } Test9;",
            "Test9",
        );
        assert_eq!(desc.size, 8);
        for field in &desc.fields {
            assert_eq!(field.offset, 0);
        }
    }

    #[test]
    fn lone_flexible_tail_elides_the_field() {
        let desc = packed("typedef struct { void *omitted[]; } Test12;", "Test12");
        assert_eq!(desc.size, 0);
        assert!(desc.fields.is_empty());
    }

    #[test]
    fn trailing_flexible_tail_keeps_a_zero_sized_slot() {
        let desc = packed("struct Packet { unsigned short len; char payload[]; };", "Packet");
        assert_eq!(desc.size, 2);
        let payload = desc.field("payload").unwrap();
        assert_eq!((payload.offset, payload.size), (2, 0));
    }

    #[test]
    fn sizeof_in_array_dimension() {
        let src = "typedef struct { unsigned int a; char b; double c; } Test1;\n\
                   struct Holder { char raw[sizeof(Test1)]; char pad[sizeof(int) * 2]; };";
        let desc = packed(src, "Holder");
        assert_eq!(desc.field("raw").unwrap().size, 13);
        assert_eq!(desc.field("pad").unwrap().size, 8);
        assert_eq!(desc.size, 21);
    }

    #[test]
    fn enumerator_in_array_dimension() {
        let src = "enum { FIRST = 0x6, SECOND, THIRD = 8 };\nstruct Buf { char data[THIRD]; };";
        let desc = packed(src, "Buf");
        assert_eq!(desc.size, 8);
    }

    #[test]
    fn typedef_chains_bottom_out() {
        let src = "typedef unsigned int uint32;\ntypedef uint32 my_u32;\nstruct A { my_u32 x; };";
        let desc = packed(src, "A");
        assert_eq!(desc.size, 4);
    }

    #[test]
    fn typedef_array_combines_with_field_dims() {
        let src = "typedef int row_t[4];\nstruct M { row_t rows[2]; };";
        let desc = packed(src, "M");
        assert_eq!(desc.size, 32);
        match &desc.field("rows").unwrap().ty {
            FieldType::Array { dims, .. } => assert_eq!(dims, &vec![2, 4]),
            other => panic!("unexpected field type: {other:?}"),
        }
    }

    #[test]
    fn pointer_fields_are_one_word() {
        let src = "struct Foo { int x; };\ntypedef struct Foo *PFoo;\nstruct Uses { PFoo p; struct Foo *q; char *s; };";
        let desc = packed(src, "Uses");
        assert_eq!(desc.size, 24);
        for name in ["p", "q", "s"] {
            assert_eq!(desc.field(name).unwrap().size, 8);
        }
    }

    #[test]
    fn pointer_aggregate_decodes_pointee_layout() {
        let src = "struct Foo { int x; char y; };\ntypedef struct Foo *PFoo;";
        let desc = packed(src, "PFoo");
        assert_eq!(desc.size, 5);
    }

    #[test]
    fn enum_fields_store_as_i32() {
        let src = "typedef enum { RED, GREEN } Color;\nstruct Pixel { Color c; enum Color d; };";
        let desc = packed(src, "Pixel");
        assert_eq!(desc.size, 8);
    }

    #[test]
    fn natural_pack_inserts_padding() {
        let desc = synthesize(
            "struct Mixed { char c; int i; };",
            Pack::Natural,
            "Mixed",
        )
        .unwrap();
        assert_eq!(desc.field("i").unwrap().offset, 4);
        assert_eq!(desc.size, 8);
        assert_eq!(desc.align, 4);
    }

    #[test]
    fn unknown_tag_and_type_errors() {
        assert!(matches!(
            synthesize("struct A { int x; };", Pack::Bytes(1), "Missing"),
            Err(Error::UnknownAggregate(_))
        ));
        assert!(matches!(
            synthesize("struct A { mystery x; };", Pack::Bytes(1), "A"),
            Err(Error::UnknownType(_))
        ));
    }

    #[test]
    fn cyclic_aggregate_is_detected() {
        assert!(matches!(
            synthesize("struct Recursive { struct Recursive inner; };", Pack::Bytes(1), "Recursive"),
            Err(Error::CyclicAggregate(_))
        ));
    }

    #[test]
    fn inline_anonymous_aggregate_is_rejected() {
        assert!(matches!(
            synthesize(
                "struct Outer { struct { int x; } anon; };",
                Pack::Bytes(1),
                "Outer"
            ),
            Err(Error::InlineAggregate(_))
        ));
    }
}
