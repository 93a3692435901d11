//! Idempotency keys for outbound messages.
//!
//! A key is the lowercase hex SHA-256 digest of an entity's natural id. The
//! broker partitions by key, so every mutation of one shipment lands on one
//! partition and is delivered in publish order; a re-publish after a partial
//! failure carries the same key and is recognizable as a retry.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Opaque routing/deduplication key of a published message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageKey(String);

impl MessageKey {
    /// Wrap an existing key, e.g. one read back from a delivery.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MessageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives message keys. Stateless; cheap to copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyGenerator;

impl KeyGenerator {
    /// Create a key generator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Key for the entity with the given natural id.
    ///
    /// # Examples
    ///
    /// ```
    /// use warehouse_sync_core::key::KeyGenerator;
    ///
    /// let keys = KeyGenerator::new();
    /// assert_eq!(keys.generate("S-100"), keys.generate("S-100"));
    /// assert_ne!(keys.generate("S-100"), keys.generate("S-101"));
    /// assert_eq!(keys.generate("S-100").as_str().len(), 64);
    /// ```
    #[must_use]
    pub fn generate(&self, natural_id: &str) -> MessageKey {
        MessageKey(hex::encode(Sha256::digest(natural_id.as_bytes())))
    }

    /// Key derived from a fresh random identifier, for append-only records
    /// with no natural id.
    #[must_use]
    pub fn random(&self) -> MessageKey {
        self.generate(&Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn known_digest() {
        // sha256("abc")
        assert_eq!(
            KeyGenerator::new().generate("abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn distinct_ids_over_a_large_sample() {
        let keys = KeyGenerator::new();
        let generated: HashSet<MessageKey> = (0..10_000)
            .map(|i| keys.generate(&format!("S-{i}")))
            .collect();
        assert_eq!(generated.len(), 10_000);
    }

    #[test]
    fn random_keys_differ() {
        let keys = KeyGenerator::new();
        assert_ne!(keys.random(), keys.random());
    }

    #[test]
    fn empty_id_still_yields_a_key() {
        assert_eq!(KeyGenerator::new().generate("").as_str().len(), 64);
    }

    proptest! {
        #[test]
        fn generate_is_deterministic(id in ".*") {
            let keys = KeyGenerator::new();
            prop_assert_eq!(keys.generate(&id), keys.generate(&id));
        }

        #[test]
        fn distinct_ids_give_distinct_keys(a in "[A-Z]-[0-9]{1,8}", b in "[A-Z]-[0-9]{1,8}") {
            prop_assume!(a != b);
            let keys = KeyGenerator::new();
            prop_assert_ne!(keys.generate(&a), keys.generate(&b));
        }

        #[test]
        fn keys_are_lowercase_hex(id in ".*") {
            let key = KeyGenerator::new().generate(&id);
            prop_assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }
}
