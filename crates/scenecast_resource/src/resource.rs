//! Immutable resource blobs and their metadata

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::hash::ResourceHash;

/// Kind of binary data a resource holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResourceKind {
    VertexArray = 1,
    IndexArray = 2,
    Texture2D = 3,
    Texture3D = 4,
    TextureCube = 5,
    /// Compiled shader program
    Effect = 6,
}

impl ResourceKind {
    /// Get the kind name
    pub fn name(&self) -> &'static str {
        match self {
            Self::VertexArray => "VertexArray",
            Self::IndexArray => "IndexArray",
            Self::Texture2D => "Texture2D",
            Self::Texture3D => "Texture3D",
            Self::TextureCube => "TextureCube",
            Self::Effect => "Effect",
        }
    }

    /// Whether this kind can back a texture sampler
    pub fn is_texture(&self) -> bool {
        matches!(self, Self::Texture2D | Self::Texture3D | Self::TextureCube)
    }
}

/// Whether the payload bytes are stored compressed.
///
/// The compression scheme itself is opaque to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResourceCompression {
    #[default]
    Uncompressed = 0,
    Compressed = 1,
}

/// Availability state carried by resource announcements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceAvailability {
    Available,
    Revoked,
}

/// Lightweight description of a resource, without its bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub hash: ResourceHash,
    pub kind: ResourceKind,
    pub name: String,
    pub compression: ResourceCompression,
    /// Payload size in bytes
    pub size: usize,
}

/// An immutable resource: payload plus metadata, addressed by content hash
#[derive(Debug, Clone)]
pub struct Resource {
    hash: ResourceHash,
    kind: ResourceKind,
    name: String,
    compression: ResourceCompression,
    data: Arc<[u8]>,
}

impl Resource {
    /// Create an uncompressed resource, computing its hash
    pub fn new(kind: ResourceKind, name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self::with_compression(kind, name, ResourceCompression::Uncompressed, data)
    }

    /// Create a resource with an explicit compression flag
    pub fn with_compression(
        kind: ResourceKind,
        name: impl Into<String>,
        compression: ResourceCompression,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        let name = name.into();
        let data = data.into();
        let hash = ResourceHash::compute(kind, &name, compression, &data);
        Self {
            hash,
            kind,
            name,
            compression,
            data,
        }
    }

    pub fn hash(&self) -> ResourceHash {
        self.hash
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compression(&self) -> ResourceCompression {
        self.compression
    }

    /// The payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the payload
    pub fn shared_data(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Metadata without the payload
    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            hash: self.hash,
            kind: self.kind,
            name: self.name.clone(),
            compression: self.compression,
            size: self.data.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_hash_matches_compute() {
        let res = Resource::new(ResourceKind::IndexArray, "quad", vec![0u8, 1, 2, 2, 3, 0]);
        let expected = ResourceHash::compute(
            ResourceKind::IndexArray,
            "quad",
            ResourceCompression::Uncompressed,
            &[0, 1, 2, 2, 3, 0],
        );
        assert_eq!(res.hash(), expected);
        assert_eq!(res.size(), 6);
    }

    #[test]
    fn test_info_describes_resource() {
        let res = Resource::with_compression(
            ResourceKind::Texture2D,
            "albedo",
            ResourceCompression::Compressed,
            vec![7u8; 32],
        );
        let info = res.info();
        assert_eq!(info.hash, res.hash());
        assert_eq!(info.kind, ResourceKind::Texture2D);
        assert_eq!(info.name, "albedo");
        assert_eq!(info.size, 32);
        assert!(info.kind.is_texture());
    }
}
