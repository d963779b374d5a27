// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Declaration extraction: top-level `typedef`/`struct`/`union`/`enum`
//! recognition over scrubbed source text.
//!
//! Aggregate heads are located by regex, but the body is always consumed
//! by a real balanced-brace walk so nested braces cannot confuse the scan
//! or trigger catastrophic backtracking. Simple typedef lines are handled
//! by a second regex sweep.

use crate::env::{AggregateRecord, TypeEnv};
use crate::expr;
use crate::fields::split_dims;
use cdecode_types::{AggregateKind, Dim, Leaf, TypeRef};
use log::{debug, warn};
use regex::Regex;

/// Value recorded for an enumerator whose initializer cannot be evaluated.
pub const DEFAULT_ENUM_VAL: i64 = -1;

/// Collapse whitespace runs and detach `*` from adjacent words, so type
/// text compares canonically (`char*` and `char  *` both become `char *`).
pub(crate) fn normalize_type_text(text: &str) -> String {
    let spaced = text.replace('*', " * ");
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scans scrubbed source text and interns every recognized declaration.
pub struct Extractor {
    head: Regex,
    typedef: Regex,
}

impl Extractor {
    pub fn new() -> Self {
        Self {
            // Optional `typedef`, optional packing word, kind keyword,
            // optional tag, then the opening brace of the body.
            head: Regex::new(
                r"(?P<typedef>typedef\s+)?(?:(?P<packed>[A-Za-z_]\w*)\s+)?(?P<kind>struct|union|enum)\s*(?P<tag>[A-Za-z_]\w*)?\s*\{",
            )
            .expect("head pattern is valid"),
            // `typedef <base> <name>[dims][, more];` with `(`-bearing
            // declarations (function typedefs) excluded by the base class.
            typedef: Regex::new(
                r"typedef\s+(?P<def>[^(\[{;,]+?)\s*(?P<name>[A-Za-z_]\w*)\s*(?P<arr>(?:\[[^\];]*\]\s*)*)(?P<rest>;|,[^;{}]*;)",
            )
            .expect("typedef pattern is valid"),
        }
    }

    /// Run both sweeps over `src`, publishing into `env`.
    ///
    /// Aggregates and enums are interned first so typedef resolution (in
    /// particular `typedef struct Foo *PFoo;`) can see every tag.
    pub fn extract_into(&self, env: &mut TypeEnv, src: &str) {
        self.extract_aggregates(env, src);
        self.extract_typedefs(env, src);
    }

    fn extract_aggregates(&self, env: &mut TypeEnv, src: &str) {
        let mut cursor = 0;

        while let Some(caps) = self.head.captures_at(src, cursor) {
            let head = caps.get(0).expect("match 0 always present");
            let open = head.end() - 1;

            let Some(close) = matching_brace(src, open) else {
                warn!("unterminated brace in declaration near offset {open}");
                cursor = head.end();
                continue;
            };

            let body = src[head.end()..close].trim();
            let (names_text, next) = match src[close + 1..].find(';') {
                // A name list never spans another declaration; crossing a
                // brace means the terminating `;` was missing.
                Some(semi) if !src[close + 1..close + 1 + semi].contains(|c| c == '{' || c == '}') => {
                    (src[close + 1..close + 1 + semi].trim(), close + 2 + semi)
                }
                _ => {
                    warn!("missing `;` after declaration near offset {close}");
                    ("", close + 1)
                }
            };
            cursor = next;

            let tag = caps.name("tag").map(|m| m.as_str());
            let names: Vec<&str> = names_text
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .collect();

            match caps.name("kind").map(|m| m.as_str()) {
                Some("enum") => self.define_enum_block(env, tag, &names, body),
                Some(kind_text) => {
                    let kind = if kind_text == "struct" {
                        AggregateKind::Struct
                    } else {
                        AggregateKind::Union
                    };
                    let packed = caps
                        .name("packed")
                        .map(|m| is_packing_word(m.as_str()))
                        .unwrap_or(false);
                    self.define_aggregate_block(env, kind, tag, &names, body, packed);
                }
                None => unreachable!("kind group is not optional"),
            }
        }
    }

    fn define_aggregate_block(
        &self,
        env: &mut TypeEnv,
        kind: AggregateKind,
        tag: Option<&str>,
        names: &[&str],
        body: &str,
        packed: bool,
    ) {
        let display_tag = tag
            .or_else(|| names.first().map(|n| n.trim_matches('*').trim()))
            .unwrap_or_default();
        if display_tag.is_empty() {
            warn!("skipping {kind} declaration with neither tag nor name");
            return;
        }

        let record = AggregateRecord {
            kind,
            tag: display_tag.to_string(),
            body: body.to_string(),
        };

        let mut keys: Vec<(String, bool)> = Vec::new();
        if names.is_empty() {
            keys.push((display_tag.to_string(), false));
        } else {
            for name in names {
                let pointer = name.contains('*');
                let stripped = name.replace('*', "");
                let stripped = stripped.trim();
                if !is_identifier(stripped) {
                    warn!("skipping malformed declaration name `{name}`");
                    continue;
                }
                keys.push((stripped.to_string(), pointer));
            }
        }

        for (key, pointer) in &keys {
            let inserted = if *pointer {
                env.define_pointer_aggregate(key, record.clone())
            } else {
                env.define_aggregate(key, record.clone())
            };
            if !inserted {
                debug!("duplicate aggregate name `{key}` ignored");
                continue;
            }
            if packed {
                env.define_pack_override(key, 1);
            }
        }
    }

    fn define_enum_block(&self, env: &mut TypeEnv, tag: Option<&str>, names: &[&str], body: &str) {
        if let Some(tag) = tag {
            env.define_enum(tag);
        }
        for name in names {
            if !name.contains('*') {
                env.define_enum(name);
            }
        }

        let mut prev = DEFAULT_ENUM_VAL;
        for entry in body.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            let (name, init) = match entry.split_once('=') {
                Some((n, e)) => (n.trim(), Some(e.trim())),
                None => (entry, None),
            };
            if !is_identifier(name) {
                warn!("skipping malformed enumerator `{entry}`");
                continue;
            }

            let value = match init {
                None => prev + 1,
                Some(text) => match expr::eval_int(text, |id| env.enumerator(id)) {
                    Ok(v) => v,
                    Err(err) => {
                        warn!("enumerator `{name}`: {err}; recording {DEFAULT_ENUM_VAL}");
                        DEFAULT_ENUM_VAL
                    }
                },
            };

            if !env.define_enumerator(name, value) {
                debug!("duplicate enumerator `{name}` ignored");
            }
            prev = value;
        }
    }

    fn extract_typedefs(&self, env: &mut TypeEnv, src: &str) {
        for caps in self.typedef.captures_iter(src) {
            let def = normalize_type_text(&caps["def"]);
            let name = &caps["name"];
            let arr = caps.name("arr").map(|m| m.as_str()).unwrap_or("");
            let rest = &caps["rest"];

            let dims = match self.typedef_dims(env, arr) {
                Ok(dims) => dims,
                Err(err) => {
                    warn!("typedef `{name}`: {err}; skipping");
                    continue;
                }
            };

            let Some(target) = self.typedef_target(env, name, &def) else {
                continue;
            };

            let first_target = if dims.is_empty() {
                target.clone()
            } else {
                TypeRef::Array {
                    element: Box::new(target.clone()),
                    dims,
                }
            };
            if !env.define_typedef(name, first_target) {
                debug!("duplicate typedef `{name}` ignored");
            }

            // Additional comma-separated names alias the bare base type;
            // the dimensions bind to the first declarator only.
            for extra in rest.trim_end_matches(';').split(',') {
                let extra = extra.trim().trim_matches('*').trim();
                if extra.is_empty() {
                    continue;
                }
                if !env.define_typedef(extra, target.clone()) {
                    debug!("duplicate typedef `{extra}` ignored");
                }
            }
        }
    }

    /// Resolve the right-hand side of a simple typedef into a type
    /// reference, or route pointer-to-aggregate names into the pointer
    /// table. Returns `None` when the typedef produces no alias entry.
    fn typedef_target(&self, env: &mut TypeEnv, name: &str, def: &str) -> Option<TypeRef> {
        let stars = def.matches('*').count();
        let base = def.replace('*', " ");
        let mut base = normalize_type_text(&base);
        loop {
            let stripped = base
                .strip_prefix("volatile ")
                .or_else(|| base.strip_prefix("const "));
            match stripped {
                Some(rest) => base = rest.to_string(),
                None => break,
            }
        }

        for keyword in ["struct", "union", "enum"] {
            let Some(tag) = base
                .strip_prefix(keyword)
                .and_then(|rest| rest.strip_prefix(' '))
            else {
                continue;
            };
            let tag = tag.trim();
            if !is_identifier(tag) {
                warn!("typedef `{name}`: malformed tag `{def}`");
                return None;
            }

            if keyword == "enum" {
                let target = TypeRef::EnumTag(tag.to_string());
                return Some(if stars > 0 {
                    TypeRef::PointerTo(Box::new(target))
                } else {
                    target
                });
            }

            let tag_ref = if keyword == "struct" {
                TypeRef::StructTag(tag.to_string())
            } else {
                TypeRef::UnionTag(tag.to_string())
            };

            if stars > 0 {
                // `typedef struct Foo *PFoo;` decodes the pointee layout
                // when asked for `PFoo`, so it lives in the pointer table.
                if let Some(record) = env.aggregate(tag).cloned() {
                    if !env.define_pointer_aggregate(name, record) {
                        debug!("duplicate pointer typedef `{name}` ignored");
                    }
                    return None;
                }
                debug!("pointer typedef `{name}` references unknown tag `{tag}`");
                return Some(TypeRef::PointerTo(Box::new(tag_ref)));
            }
            return Some(tag_ref);
        }

        if stars > 0 {
            return Some(match (base.as_str(), stars) {
                ("char", 1) => TypeRef::Primitive(Leaf::CStringPointer),
                ("void", 1) => TypeRef::Primitive(Leaf::PointerWord),
                _ => {
                    let inner = match Leaf::from_keyword(&base) {
                        Some(leaf) => TypeRef::Primitive(leaf),
                        None => TypeRef::Alias(base.clone()),
                    };
                    TypeRef::PointerTo(Box::new(inner))
                }
            });
        }

        Some(match Leaf::from_keyword(&base) {
            Some(leaf) => TypeRef::Primitive(leaf),
            None => TypeRef::Alias(base),
        })
    }

    /// Evaluate typedef array dimensions. Enumerator names are available;
    /// `sizeof` is not, because no layout exists at parse time.
    fn typedef_dims(&self, env: &TypeEnv, arr: &str) -> crate::error::Result<Vec<Dim>> {
        let mut dims = Vec::new();
        for (i, inner) in split_dims(arr).into_iter().enumerate() {
            let inner = inner.trim();
            let dim = if inner.is_empty() {
                Dim::Flex
            } else {
                match expr::eval_int(inner, |id| env.enumerator(id))? {
                    0 => Dim::Flex,
                    n if n > 0 => Dim::Fixed(n as usize),
                    _ => return Err(crate::error::Error::UnevaluableExpr(inner.to_string())),
                }
            };
            if dim == Dim::Flex && i > 0 {
                return Err(crate::error::Error::UnevaluableExpr(inner.to_string()));
            }
            dims.push(dim);
        }
        Ok(dims)
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the index of the `}` matching the `{` at `open`.
fn matching_brace(src: &str, open: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    debug_assert_eq!(bytes[open], b'{');

    let mut depth = 0usize;
    for (i, b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Whether a word before `struct`/`union` is a packing attribute remnant
/// (`PACKED`, `__packed`, …) rather than an unrelated stray token.
fn is_packing_word(word: &str) -> bool {
    word.to_ascii_lowercase().contains("pack")
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod test {
    use super::*;

    fn extract(src: &str) -> TypeEnv {
        let mut env = TypeEnv::default();
        Extractor::new().extract_into(&mut env, src);
        env
    }

    #[test]
    fn typedef_struct_with_trailing_name() {
        let env = extract("typedef struct { unsigned int a; char b; } Test1;");
        let record = env.aggregate("Test1").expect("Test1 interned");
        assert_eq!(record.kind, AggregateKind::Struct);
        assert!(record.body.contains("unsigned int a;"));
    }

    #[test]
    fn tagged_struct_without_typedef() {
        let env = extract("struct Plain { int x; };");
        assert!(env.aggregate("Plain").is_some());
    }

    #[test]
    fn trailing_name_list_with_pointer_entries() {
        let env = extract("typedef struct Tagged { int x; } Named, *PNamed;");
        assert!(env.aggregate("Named").is_some());
        assert!(env.pointer_aggregate("PNamed").is_some());
        // A name list supersedes the tag as key.
        assert!(env.aggregate("Tagged").is_none());
    }

    #[test]
    fn nested_braces_are_balanced() {
        let env = extract("typedef struct { struct { int x; } inner; } Outer; struct After { int y; };");
        let outer = env.aggregate("Outer").expect("Outer interned");
        assert!(outer.body.contains("} inner;"));
        assert!(env.aggregate("After").is_some());
    }

    #[test]
    fn enum_values_follow_c_rules() {
        let env = extract("typedef enum { FIRST = 0x6, SECOND, THIRD = 8 } Things;");
        assert_eq!(env.enumerator("FIRST"), Some(6));
        assert_eq!(env.enumerator("SECOND"), Some(7));
        assert_eq!(env.enumerator("THIRD"), Some(8));
        assert!(env.is_enum("Things"));
    }

    #[test]
    fn enum_initializers_may_reference_prior_enumerators() {
        let env = extract("enum Bits { A = 1, B = A << 4, C = (B | A) + 2UL };");
        assert_eq!(env.enumerator("B"), Some(16));
        assert_eq!(env.enumerator("C"), Some(19));
        assert!(env.is_enum("Bits"));
    }

    #[test]
    fn unevaluable_enum_initializer_downgrades() {
        let env = extract("enum Bad { OK = 1, BROKEN = sizeof(int), NEXT };");
        assert_eq!(env.enumerator("BROKEN"), Some(DEFAULT_ENUM_VAL));
        assert_eq!(env.enumerator("NEXT"), Some(0));
    }

    #[test]
    fn simple_typedefs() {
        let env = extract("typedef unsigned int uint32;\ntypedef uint32 my_u32;");
        assert_eq!(env.typedef("uint32"), Some(&TypeRef::Primitive(Leaf::U32)));
        assert_eq!(
            env.typedef("my_u32"),
            Some(&TypeRef::Alias("uint32".to_string()))
        );
    }

    #[test]
    fn multi_name_typedef() {
        let env = extract("typedef long long wide_t, also_wide_t;");
        assert_eq!(env.typedef("wide_t"), Some(&TypeRef::Primitive(Leaf::I64)));
        assert_eq!(
            env.typedef("also_wide_t"),
            Some(&TypeRef::Primitive(Leaf::I64))
        );
    }

    #[test]
    fn typedef_array_dimensions_kept() {
        let env = extract("typedef char Name[16];");
        match env.typedef("Name") {
            Some(TypeRef::Array { element, dims }) => {
                assert_eq!(**element, TypeRef::Primitive(Leaf::ByteChar));
                assert_eq!(dims, &vec![Dim::Fixed(16)]);
            }
            other => panic!("unexpected typedef target: {other:?}"),
        }
    }

    #[test]
    fn pointer_typedef_routes_to_pointer_table() {
        let env = extract("struct Foo { int x; };\ntypedef struct Foo *PFoo;");
        assert!(env.pointer_aggregate("PFoo").is_some());
    }

    #[test]
    fn char_pointer_typedef_is_cstring() {
        let env = extract("typedef char *string_t;");
        assert_eq!(
            env.typedef("string_t"),
            Some(&TypeRef::Primitive(Leaf::CStringPointer))
        );
    }

    #[test]
    fn packing_word_records_override() {
        let env = extract("typedef PACKED struct { int x; char c; } Tight;");
        assert_eq!(env.pack_override("Tight"), Some(1));
    }

    #[test]
    fn stray_word_is_not_packing() {
        let env = extract("ALIGNED struct Loose { int x; };");
        assert!(env.aggregate("Loose").is_some());
        assert_eq!(env.pack_override("Loose"), None);
    }
}
