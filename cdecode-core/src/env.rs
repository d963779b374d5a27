// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The type environment: interned declarations keyed by name.

use cdecode_types::{AggregateKind, TypeRef};
use std::collections::{BTreeMap, BTreeSet};

/// The raw record of a struct or union declaration.
///
/// The body is kept as scrubbed text; fields are parsed out of it lazily
/// when a descriptor is synthesized.
#[derive(Clone, Debug)]
pub struct AggregateRecord {
    pub kind: AggregateKind,
    /// The declared tag, or the first introduced name for tagless forms.
    /// Used for diagnostics and rendering.
    pub tag: String,
    pub body: String,
}

/// All declarations discovered by a parse, keyed for lookup.
///
/// Single-writer during the extract phase with first-write-wins semantics;
/// read-only while descriptors are synthesized.
#[derive(Debug, Default)]
pub struct TypeEnv {
    typedefs: BTreeMap<String, TypeRef>,
    aggregates: BTreeMap<String, AggregateRecord>,
    pointer_aggregates: BTreeMap<String, AggregateRecord>,
    enums: BTreeSet<String>,
    enumerators: BTreeMap<String, i64>,
    pack_overrides: BTreeMap<String, u32>,
}

impl TypeEnv {
    /// Drop every table.
    pub fn clear(&mut self) {
        self.typedefs.clear();
        self.aggregates.clear();
        self.pointer_aggregates.clear();
        self.enums.clear();
        self.enumerators.clear();
        self.pack_overrides.clear();
    }

    /// Intern a typedef. The first definition of a name wins.
    pub fn define_typedef(&mut self, name: &str, target: TypeRef) -> bool {
        insert_first(&mut self.typedefs, name, target)
    }

    /// Intern an aggregate record under a name.
    pub fn define_aggregate(&mut self, name: &str, record: AggregateRecord) -> bool {
        insert_first(&mut self.aggregates, name, record)
    }

    /// Intern a pointer-to-aggregate name (`typedef struct Foo *PFoo;` or a
    /// `*name` entry in a declaration's trailing name list).
    pub fn define_pointer_aggregate(&mut self, name: &str, record: AggregateRecord) -> bool {
        insert_first(&mut self.pointer_aggregates, name, record)
    }

    /// Record an enum tag or typedef name.
    pub fn define_enum(&mut self, name: &str) -> bool {
        self.enums.insert(name.to_string())
    }

    /// Publish an enumerator value. The first definition wins.
    pub fn define_enumerator(&mut self, name: &str, value: i64) -> bool {
        insert_first(&mut self.enumerators, name, value)
    }

    /// Record a packing override for an aggregate name.
    pub fn define_pack_override(&mut self, name: &str, pack: u32) -> bool {
        insert_first(&mut self.pack_overrides, name, pack)
    }

    pub fn typedef(&self, name: &str) -> Option<&TypeRef> {
        self.typedefs.get(name)
    }

    pub fn aggregate(&self, name: &str) -> Option<&AggregateRecord> {
        self.aggregates.get(name)
    }

    pub fn pointer_aggregate(&self, name: &str) -> Option<&AggregateRecord> {
        self.pointer_aggregates.get(name)
    }

    pub fn is_enum(&self, name: &str) -> bool {
        self.enums.contains(name)
    }

    pub fn enumerator(&self, name: &str) -> Option<i64> {
        self.enumerators.get(name).copied()
    }

    pub fn pack_override(&self, name: &str) -> Option<u32> {
        self.pack_overrides.get(name).copied()
    }

    /// Iterate all aggregate names and records, pointer names included.
    pub fn aggregates(&self) -> impl Iterator<Item = (&str, &AggregateRecord)> {
        self.aggregates
            .iter()
            .chain(self.pointer_aggregates.iter())
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate all typedef names and their targets.
    pub fn typedefs(&self) -> impl Iterator<Item = (&str, &TypeRef)> {
        self.typedefs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate all known enum tags/names.
    pub fn enums(&self) -> impl Iterator<Item = &str> {
        self.enums.iter().map(|s| s.as_str())
    }

    /// Iterate all enumerators and their values.
    pub fn enumerators(&self) -> impl Iterator<Item = (&str, i64)> {
        self.enumerators.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

fn insert_first<V>(map: &mut BTreeMap<String, V>, key: &str, value: V) -> bool {
    if map.contains_key(key) {
        false
    } else {
        map.insert(key.to_string(), value);
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_write_wins() {
        let mut env = TypeEnv::default();
        assert!(env.define_enumerator("FIRST", 6));
        assert!(!env.define_enumerator("FIRST", 99));
        assert_eq!(env.enumerator("FIRST"), Some(6));
    }

    #[test]
    fn clear_resets_everything() {
        let mut env = TypeEnv::default();
        env.define_enum("Color");
        env.define_enumerator("RED", 0);
        env.clear();
        assert!(!env.is_enum("Color"));
        assert_eq!(env.enumerator("RED"), None);
    }
}
