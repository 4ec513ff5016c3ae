//! Cache key derivation for collection queries.
//!
//! A `CacheKey` can only be produced by hashing a collection name together
//! with the canonical text of its constraint list, so two structurally equal
//! queries always land on the same key.

use std::fmt;

use lectern_core::{canonical_constraints, Constraint, QueryDescriptor};
use sha2::{Digest, Sha256};

/// Separator between key segments.
const SEPARATOR: char = ':';

/// A derived cache key.
///
/// # Format
///
/// `<prefix>:<collection>:<digest>` where `digest` is the lowercase hex
/// SHA-256 of the collection name, a NUL byte and the canonical constraint
/// text. The digest is always the final 64 characters, so a collection name
/// containing the separator cannot collide with another key.
///
/// Constraint order is significant: reordering the same constraints yields
/// a different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Private inner data - cannot be constructed externally
    inner: String,
}

impl CacheKey {
    /// Derive the key for a query descriptor.
    pub fn for_descriptor(prefix: &str, descriptor: &QueryDescriptor) -> Self {
        derive_key(prefix, descriptor.collection(), descriptor.constraints())
    }

    /// The full key text as stored.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// The hex digest segment.
    pub fn digest(&self) -> &str {
        let start = self.inner.len().saturating_sub(64);
        &self.inner[start..]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

/// Deterministically map a collection and constraint list to a cache key.
///
/// Pure: no I/O, no side effects, and values without a JSON form (sentinels)
/// render to a stable placeholder instead of failing.
pub fn derive_key(prefix: &str, collection: &str, constraints: &[Constraint]) -> CacheKey {
    let canonical = canonical_constraints(constraints);

    let mut hasher = Sha256::new();
    hasher.update(collection.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    let digest = hex::encode(hasher.finalize());

    CacheKey {
        inner: format!("{prefix}{SEPARATOR}{collection}{SEPARATOR}{digest}"),
    }
}
