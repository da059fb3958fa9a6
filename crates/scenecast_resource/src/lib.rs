//! # Scenecast Resource - Content-Addressed Resource Store
//!
//! Heavyweight scene data (vertex/index arrays, textures, effects) never
//! travels inside the scene action stream. Scenes reference it by a 128-bit
//! [`ResourceHash`] and the bytes live once in a [`ResourceStore`].
//!
//! ## Lifecycle
//!
//! ```text
//! put(bytes) ──► resident ──► acquire_usage ──► in use
//!                   ▲                              │
//!                   │                        last usage dropped
//!                   │                              ▼
//!                re-put ◄──────────────── cache timer running ──► evict_expired
//! ```
//!
//! ## Key Concepts
//!
//! - **ResourceHash**: content address computed over kind, name, compression and payload
//! - **HashUsage**: RAII reference count, one per scene object referencing a hash
//! - **Cache timeout**: unused resources linger so quick destroy/recreate cycles stay cheap

pub mod error;
pub mod hash;
pub mod resource;
pub mod store;

pub use error::ResourceError;
pub use hash::ResourceHash;
pub use resource::{Resource, ResourceAvailability, ResourceCompression, ResourceInfo, ResourceKind};
pub use store::{HashUsage, ResourceEvent, ResourceStore, ResourceStoreConfig, ResourceStoreStats};
