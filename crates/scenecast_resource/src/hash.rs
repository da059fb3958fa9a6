//! 128-bit content hashes

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::resource::{ResourceCompression, ResourceKind};

/// Content address of a resource, two 64-bit halves of a blake3 digest.
///
/// The all-zero value is reserved as "no resource" and is never produced
/// by [`ResourceHash::compute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ResourceHash {
    /// Low 64 bits
    pub low: u64,
    /// High 64 bits
    pub high: u64,
}

impl ResourceHash {
    /// The reserved invalid hash
    pub const INVALID: Self = Self { low: 0, high: 0 };

    /// Create a hash from its two halves
    pub const fn new(low: u64, high: u64) -> Self {
        Self { low, high }
    }

    /// Whether this is a real content hash
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Compute the content hash of a resource.
    ///
    /// Name and compression are part of the identity: two blobs with the
    /// same bytes but different names are distinct resources.
    pub fn compute(
        kind: ResourceKind,
        name: &str,
        compression: ResourceCompression,
        payload: &[u8],
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[kind as u8, compression as u8]);
        hasher.update(&(name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update(&(payload.len() as u64).to_le_bytes());
        hasher.update(payload);
        let digest = hasher.finalize();
        let bytes = digest.as_bytes();

        let mut low = [0u8; 8];
        let mut high = [0u8; 8];
        low.copy_from_slice(&bytes[0..8]);
        high.copy_from_slice(&bytes[8..16]);

        let hash = Self::new(u64::from_le_bytes(low), u64::from_le_bytes(high));
        if hash.is_valid() {
            hash
        } else {
            Self::new(1, 0)
        }
    }
}

impl fmt::Display for ResourceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.high, self.low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = ResourceHash::compute(ResourceKind::Texture2D, "brick", ResourceCompression::Uncompressed, b"pixels");
        let b = ResourceHash::compute(ResourceKind::Texture2D, "brick", ResourceCompression::Uncompressed, b"pixels");
        assert_eq!(a, b);
        assert!(a.is_valid());
    }

    #[test]
    fn test_hash_covers_metadata() {
        let base = ResourceHash::compute(ResourceKind::VertexArray, "a", ResourceCompression::Uncompressed, b"data");
        let other_name = ResourceHash::compute(ResourceKind::VertexArray, "b", ResourceCompression::Uncompressed, b"data");
        let other_kind = ResourceHash::compute(ResourceKind::IndexArray, "a", ResourceCompression::Uncompressed, b"data");
        let other_comp = ResourceHash::compute(ResourceKind::VertexArray, "a", ResourceCompression::Compressed, b"data");
        assert_ne!(base, other_name);
        assert_ne!(base, other_kind);
        assert_ne!(base, other_comp);
    }

    #[test]
    fn test_hash_name_payload_boundary() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = ResourceHash::compute(ResourceKind::Effect, "ab", ResourceCompression::Uncompressed, b"c");
        let b = ResourceHash::compute(ResourceKind::Effect, "a", ResourceCompression::Uncompressed, b"bc");
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_is_32_hex_digits() {
        let hash = ResourceHash::new(0xab, 0x1);
        let text = hash.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(text, "000000000000000100000000000000ab");
    }
}
