use bytes::Bytes;
use std::cmp::{min, Ordering};
use std::fmt;
use std::fmt::{Debug, Formatter};

/// Maximum length of key to display in debug logs.
const MAX_KEY_DEBUG_LEN: usize = 64;
/// Maximum length of value to display in debug logs.
const MAX_VALUE_DEBUG_LEN: usize = 64;

/// The elementary record stored by the engine.
///
/// A `Pair` couples a key with a value and a tombstone flag. Keys are
/// normalized to lowercase when a pair is built through [`Pair::new`] or
/// [`Pair::tombstone`]; every comparison afterwards is plain byte-wise
/// comparison of the stored key. A tombstone pair carries an empty value and
/// marks the key as deleted. It must survive until every older version of
/// the key is gone, so it is never dropped silently by any layer.
///
/// # Ordering Semantics
///
/// Pairs order by key (ascending); value and tombstone only break ties so
/// that ordering stays consistent with equality. Anywhere pairs are sorted
/// in this engine the keys are distinct, so in practice the key decides.
#[derive(Clone, Eq)]
pub struct Pair {
    key: String,
    value: Bytes,
    tombstone: bool,
}

impl Pair {
    /// Creates a new pair, lowercasing the key.
    ///
    /// This is the normalization boundary: callers hand in keys in whatever
    /// case they like, the stored key is always lowercase.
    pub fn new(key: &str, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.to_lowercase(),
            value: value.into(),
            tombstone: false,
        }
    }

    /// Creates a deletion marker for `key` with an empty value.
    pub fn tombstone(key: &str) -> Self {
        Self {
            key: key.to_lowercase(),
            value: Bytes::new(),
            tombstone: true,
        }
    }

    /// Reassembles a pair from already-normalized parts.
    ///
    /// Used by decoders: keys on disk were lowercased when first written and
    /// must not be re-normalized on the way back in.
    pub fn from_parts(key: String, value: Bytes, tombstone: bool) -> Self {
        Self {
            key,
            value,
            tombstone,
        }
    }

    /// Returns the (lowercase) key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns a reference to the value bytes.
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Consumes the pair, returning its value bytes.
    pub fn into_value(self) -> Bytes {
        self.value
    }

    /// Returns `true` if this pair is a deletion marker.
    pub fn is_tombstone(&self) -> bool {
        self.tombstone
    }
}

impl Debug for Pair {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // Truncate key and value output for readability in logs
        let key_len = min(self.key.len(), MAX_KEY_DEBUG_LEN);
        let value_len = min(self.value.len(), MAX_VALUE_DEBUG_LEN);

        f.debug_struct("Pair")
            .field("key", &&self.key[..key_len])
            .field(
                "value",
                &String::from_utf8_lossy(&self.value[..value_len]),
            )
            .field("tombstone", &self.tombstone)
            .finish()
    }
}

impl PartialEq for Pair {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value && self.tombstone == other.tombstone
    }
}

impl PartialOrd for Pair {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pair {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.value.cmp(&other.value))
            .then_with(|| self.tombstone.cmp(&other.tombstone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lowercases_key() {
        let pair = Pair::new("User:Alice", Bytes::from("v"));
        assert_eq!(pair.key(), "user:alice");
        assert!(!pair.is_tombstone());
    }

    #[test]
    fn test_tombstone_has_empty_value() {
        let pair = Pair::tombstone("Gone");
        assert_eq!(pair.key(), "gone");
        assert!(pair.value().is_empty());
        assert!(pair.is_tombstone());
    }

    #[test]
    fn test_from_parts_keeps_key_untouched() {
        // Decoders must not re-normalize; an upper-case key coming from a
        // (hand-crafted) stream stays as-is.
        let pair = Pair::from_parts("MiXeD".to_string(), Bytes::new(), false);
        assert_eq!(pair.key(), "MiXeD");
    }

    #[test]
    fn test_ordering_is_by_key() {
        let a = Pair::new("a", Bytes::from("zzz"));
        let b = Pair::new("b", Bytes::from("aaa"));
        assert!(a < b);

        let mut pairs = vec![b.clone(), a.clone()];
        pairs.sort();
        assert_eq!(pairs[0].key(), "a");
        assert_eq!(pairs[1].key(), "b");
    }

    #[test]
    fn test_equality_includes_value_and_tombstone() {
        let a = Pair::new("k", Bytes::from("1"));
        let b = Pair::new("k", Bytes::from("2"));
        assert_ne!(a, b);

        let c = Pair::tombstone("k");
        let d = Pair::new("k", Bytes::new());
        assert_ne!(c, d);
    }
}
