//! Canonical query keys.
//!
//! A [`QueryKey`] is a small tuple of JSON-serializable atoms: strings,
//! numbers, bools, and ordered objects, the vocabulary most client-side
//! cache keys need. Two keys that are structurally equal but were built
//! from objects with keys inserted in a different order must compare
//! and hash equal; plain `JSON.stringify`-style serialization doesn't
//! sort object keys and therefore lacks this property. We fix that here
//! by normalizing every atom to a canonical form before it is ever
//! compared, hashed, or used to index the registry.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A single JSON-serializable fragment of a [`QueryKey`].
///
/// Constructed from anything that implements `serde::Serialize`; the
/// value is normalized into canonical form immediately so that every
/// later comparison is a plain `PartialEq` on the canonical JSON.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyAtom(String);

impl KeyAtom {
    /// Build a canonical atom from any serializable value.
    ///
    /// Panics only if `value` cannot be represented as JSON at all
    /// (e.g. a map with non-string keys produced by a custom
    /// `Serialize` impl); ordinary query key payloads never hit this.
    pub fn new(value: impl Serialize) -> Self {
        let raw = serde_json::to_value(value).expect("query key atom must serialize to JSON");
        Self(canonicalize(&raw).to_string())
    }

    /// The atom's canonical JSON text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<T: Serialize> From<T> for KeyAtom {
    fn from(value: T) -> Self {
        KeyAtom::new(value)
    }
}

/// Recursively sort object keys so that serialization is a pure
/// function of structural content, not insertion order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let ordered: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), v))
                .collect();
            Value::Object(ordered)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// A full query key: an ordered list of [`KeyAtom`]s, the unit of
/// identity the cache registry indexes on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct QueryKey(Vec<KeyAtom>);

impl QueryKey {
    /// Build a key from a list of pre-built atoms.
    pub fn new(atoms: impl IntoIterator<Item = KeyAtom>) -> Self {
        Self(atoms.into_iter().collect())
    }

    /// Build a key from a single serializable value, the common case
    /// of a string or tuple key.
    pub fn of(value: impl Serialize) -> Self {
        Self(vec![KeyAtom::new(value)])
    }

    /// The key's atoms, in declaration order.
    pub fn atoms(&self) -> &[KeyAtom] {
        &self.0
    }

    /// Whether `self` is a prefix of (or equal to) `other`, the
    /// matching rule used by prefix invalidation: `["todos"]` matches
    /// `["todos", 1]` and `["todos"]` itself, but not `["todo"]`.
    pub fn is_prefix_of(&self, other: &QueryKey) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a == b)
    }
}

impl FromIterator<KeyAtom> for QueryKey {
    fn from_iter<I: IntoIterator<Item = KeyAtom>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn atoms_with_reordered_object_keys_are_equal() {
        let a = KeyAtom::new(json!({"id": 1, "type": "todo"}));
        let b = KeyAtom::new(json!({"type": "todo", "id": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn nested_objects_canonicalize_recursively() {
        let a = KeyAtom::new(json!({"filters": {"b": 2, "a": 1}, "page": 1}));
        let b = KeyAtom::new(json!({"page": 1, "filters": {"a": 1, "b": 2}}));
        assert_eq!(a, b);
    }

    #[test]
    fn prefix_matching() {
        let prefix = QueryKey::new([KeyAtom::new("todos")]);
        let exact = QueryKey::new([KeyAtom::new("todos")]);
        let child = QueryKey::new([KeyAtom::new("todos"), KeyAtom::new(1)]);
        let unrelated = QueryKey::new([KeyAtom::new("todo")]);

        assert!(prefix.is_prefix_of(&exact));
        assert!(prefix.is_prefix_of(&child));
        assert!(!prefix.is_prefix_of(&unrelated));
        assert!(!child.is_prefix_of(&prefix));
    }

    #[test]
    fn distinct_atoms_are_not_equal() {
        let a = QueryKey::of("todos");
        let b = QueryKey::of("users");
        assert_ne!(a, b);
    }

    proptest! {
        /// serialize(k) = serialize(k) for any key built from a
        /// string/int tuple, regardless of how many times it is
        /// rebuilt from the same source values (spec.md §8's
        /// canonical-serialization stability law).
        #[test]
        fn canonical_serialization_is_stable(
            segments in prop::collection::vec(any::<i64>(), 0..6),
        ) {
            let build = || QueryKey::new(segments.iter().map(|n| KeyAtom::new(*n)));
            prop_assert_eq!(build(), build());
        }

        /// Two keys built from different segment vectors compare
        /// unequal unless the vectors are themselves equal.
        #[test]
        fn distinct_segment_vectors_are_distinct_keys(
            a in prop::collection::vec(any::<i64>(), 0..6),
            b in prop::collection::vec(any::<i64>(), 0..6),
        ) {
            let key_a = QueryKey::new(a.iter().map(|n| KeyAtom::new(*n)));
            let key_b = QueryKey::new(b.iter().map(|n| KeyAtom::new(*n)));
            prop_assert_eq!(key_a == key_b, a == b);
        }

        /// Any key is a prefix of itself and of itself with extra
        /// segments appended; appending never breaks the match, and
        /// a key is never a prefix of a strict truncation of itself
        /// unless both are already equal.
        #[test]
        fn prefix_of_self_and_extension(
            base in prop::collection::vec(any::<i64>(), 0..6),
            extra in prop::collection::vec(any::<i64>(), 0..4),
        ) {
            let base_key = QueryKey::new(base.iter().map(|n| KeyAtom::new(*n)));
            let mut extended = base.clone();
            extended.extend(extra.iter().copied());
            let extended_key = QueryKey::new(extended.iter().map(|n| KeyAtom::new(*n)));

            prop_assert!(base_key.is_prefix_of(&base_key));
            prop_assert!(base_key.is_prefix_of(&extended_key));
            if !extra.is_empty() {
                prop_assert!(!extended_key.is_prefix_of(&base_key));
            }
        }

        /// Object-valued atoms canonicalize to the same form
        /// regardless of the order their fields were inserted in.
        #[test]
        fn object_atom_field_order_is_irrelevant(
            mut fields in prop::collection::vec((".{1,4}", any::<i32>()), 1..5),
        ) {
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            fields.dedup_by(|a, b| a.0 == b.0);

            let forward: serde_json::Map<String, Value> =
                fields.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let mut reversed = fields.clone();
            reversed.reverse();
            let backward: serde_json::Map<String, Value> =
                reversed.iter().map(|(k, v)| (k.clone(), json!(v))).collect();

            let a = KeyAtom::new(Value::Object(forward));
            let b = KeyAtom::new(Value::Object(backward));
            prop_assert_eq!(a, b);
        }
    }
}
