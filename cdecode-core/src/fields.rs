// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Field parsing: struct/union body text into ordered field specs.

use crate::error::{Error, Result};
use cdecode_types::{Qualifiers, TypeKeyword};
use log::warn;
use regex::Regex;

/// One field declaration, split but not yet resolved.
#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub qualifiers: Qualifiers,
    /// `struct`/`union`/`enum` written inline before the type name.
    pub keyword: Option<TypeKeyword>,
    pub type_text: String,
    pub name: String,
    /// The raw bracket text, e.g. `[2][3]` or `[sizeof(Test1)]`.
    pub array_text: Option<String>,
    /// The raw width expression after `:`.
    pub bitfield_text: Option<String>,
}

/// Parses aggregate bodies into field lists.
pub struct FieldParser {
    decl: Regex,
}

impl FieldParser {
    pub fn new() -> Self {
        Self {
            decl: Regex::new(
                r"(?s)^(?P<quals>(?:(?:static|const|volatile)\s+)*)(?:(?P<kw>struct|union|enum)\s+)?(?P<ty>[A-Za-z_][\w \t]*?(?:[ \t]*\*+)?)\s*(?P<name>[A-Za-z_]\w*)\s*(?P<arr>(?:\[[^\]]*\]\s*)*)(?::\s*(?P<bits>[^;\[\]]+?)\s*)?$",
            )
            .expect("field pattern is valid"),
        }
    }

    /// Parse the body of aggregate `tag` into ordered field specs.
    ///
    /// A `{` anywhere in the body means an inline anonymous aggregate,
    /// which is not supported. Statements that do not look like a field
    /// declaration are skipped with a warning.
    pub fn parse(&self, tag: &str, body: &str) -> Result<Vec<FieldSpec>> {
        if body.contains('{') {
            return Err(Error::InlineAggregate(tag.to_string()));
        }

        let mut specs = Vec::new();
        for stmt in body.split(';') {
            // Declarations may wrap across lines; collapse all whitespace
            // before matching.
            let stmt = stmt.split_whitespace().collect::<Vec<_>>().join(" ");
            if stmt.is_empty() {
                continue;
            }

            let Some(caps) = self.decl.captures(&stmt) else {
                warn!("skipping unrecognized declaration `{stmt}` in `{tag}`");
                continue;
            };

            let mut qualifiers = Qualifiers::default();
            for word in caps["quals"].split_whitespace() {
                if let Some(flag) = Qualifiers::from_keyword(word) {
                    qualifiers |= flag;
                }
            }

            let array_text = caps
                .name("arr")
                .map(|m| m.as_str().trim())
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            let bitfield_text = caps
                .name("bits")
                .map(|m| m.as_str().trim().to_string())
                .filter(|t| !t.is_empty());

            specs.push(FieldSpec {
                qualifiers,
                keyword: caps.name("kw").and_then(|m| TypeKeyword::from_keyword(m.as_str())),
                type_text: caps["ty"].trim().to_string(),
                name: caps["name"].to_string(),
                array_text,
                bitfield_text,
            });
        }

        Ok(specs)
    }
}

impl Default for FieldParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Split raw bracket text into the inner expression of each dimension, in
/// written order (outermost first).
pub(crate) fn split_dims(array_text: &str) -> Vec<String> {
    let mut dims = Vec::new();
    let mut rest = array_text;
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']') else {
            break;
        };
        dims.push(rest[open + 1..open + close].to_string());
        rest = &rest[open + close + 1..];
    }
    dims
}
