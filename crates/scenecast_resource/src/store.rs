//! Resource Store - content-addressed cache with usage counting
//!
//! Resources are stored once per hash. Every scene object referencing a
//! hash holds a [`HashUsage`]; when the last usage is released the entry
//! is kept for the configured cache timeout before [`ResourceStore::evict_expired`]
//! removes it. Eviction is the only path that frees payload memory.
//!
//! The metadata lock is held only for map updates. Hashing and payload
//! copies happen outside of it.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ResourceError;
use crate::hash::ResourceHash;
use crate::resource::{Resource, ResourceInfo, ResourceKind};

/// Configuration for the resource store
#[derive(Debug, Clone)]
pub struct ResourceStoreConfig {
    /// Grace period between the last usage release and eviction
    pub cache_timeout: Duration,
    /// Largest accepted payload in bytes
    pub max_resource_size: usize,
}

impl Default for ResourceStoreConfig {
    fn default() -> Self {
        Self {
            cache_timeout: Duration::from_millis(5000),
            max_resource_size: 256 * 1024 * 1024,
        }
    }
}

impl ResourceStoreConfig {
    /// Short timeouts for local iteration and tests
    pub fn development() -> Self {
        Self {
            cache_timeout: Duration::from_millis(100),
            ..Default::default()
        }
    }
}

/// Notifications emitted by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceEvent {
    /// A hash became resident
    Available(ResourceHash),
    /// A hash was evicted after its cache timeout
    Evicted(ResourceHash),
}

/// Statistics about store usage
#[derive(Debug, Clone, Default)]
pub struct ResourceStoreStats {
    /// Total `put` calls
    pub puts: u64,
    /// Puts that stored a new blob
    pub created: u64,
    /// Puts that hit an already resident blob
    pub deduplicated: u64,
    /// Blobs evicted after their timeout
    pub evicted: u64,
    /// Currently resident blobs
    pub resident: usize,
    /// Bytes held by resident blobs
    pub resident_bytes: usize,
}

struct Entry {
    resource: Arc<Resource>,
    usages: u32,
    /// Set while `usages == 0`
    released_at: Option<Instant>,
}

struct Shared {
    config: ResourceStoreConfig,
    entries: Mutex<HashMap<ResourceHash, Entry>>,
    stats: Mutex<ResourceStoreStats>,
    event_tx: Sender<ResourceEvent>,
    event_rx: Receiver<ResourceEvent>,
}

impl Shared {
    fn release(&self, hash: ResourceHash) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&hash) {
            entry.usages = entry.usages.saturating_sub(1);
            if entry.usages == 0 {
                entry.released_at = Some(Instant::now());
                log::trace!("Resource {} unused, cache timer started", hash);
            }
        }
    }
}

/// Content-addressed resource store.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct ResourceStore {
    shared: Arc<Shared>,
}

impl ResourceStore {
    /// Create a new store
    pub fn new(config: ResourceStoreConfig) -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                config,
                entries: Mutex::new(HashMap::new()),
                stats: Mutex::new(ResourceStoreStats::default()),
                event_tx,
                event_rx,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &ResourceStoreConfig {
        &self.shared.config
    }

    /// Hash and store a payload, returning its content hash.
    ///
    /// Identical content is stored once. A put with no usages starts (or
    /// restarts) the cache timer of the entry.
    pub fn put(
        &self,
        kind: ResourceKind,
        name: impl Into<String>,
        payload: impl Into<Arc<[u8]>>,
    ) -> Result<ResourceHash, ResourceError> {
        self.put_resource(Resource::new(kind, name, payload))
    }

    /// Store an already constructed resource
    pub fn put_resource(&self, resource: Resource) -> Result<ResourceHash, ResourceError> {
        let max = self.shared.config.max_resource_size;
        if resource.size() > max {
            return Err(ResourceError::TooLarge {
                size: resource.size(),
                max,
            });
        }

        let hash = resource.hash();
        let size = resource.size();
        // Stats and events change under the entries lock, in step with evictions
        let created = {
            let mut entries = self.shared.entries.lock();
            let created = match entries.get_mut(&hash) {
                Some(entry) => {
                    if entry.usages == 0 {
                        entry.released_at = Some(Instant::now());
                    }
                    false
                }
                None => {
                    entries.insert(
                        hash,
                        Entry {
                            resource: Arc::new(resource),
                            usages: 0,
                            released_at: Some(Instant::now()),
                        },
                    );
                    true
                }
            };

            let mut stats = self.shared.stats.lock();
            stats.puts += 1;
            if created {
                stats.created += 1;
                stats.resident += 1;
                stats.resident_bytes += size;
                let _ = self.shared.event_tx.send(ResourceEvent::Available(hash));
            } else {
                stats.deduplicated += 1;
            }
            created
        };

        if created {
            log::debug!("Stored resource {} ({} bytes)", hash, size);
        }
        Ok(hash)
    }

    /// Look up a resident resource. Never triggers a load.
    pub fn get(&self, hash: ResourceHash) -> Option<Arc<Resource>> {
        self.shared
            .entries
            .lock()
            .get(&hash)
            .map(|entry| Arc::clone(&entry.resource))
    }

    /// Check whether a hash is resident
    pub fn contains(&self, hash: ResourceHash) -> bool {
        self.shared.entries.lock().contains_key(&hash)
    }

    /// Metadata of a resident resource
    pub fn info(&self, hash: ResourceHash) -> Option<ResourceInfo> {
        self.shared
            .entries
            .lock()
            .get(&hash)
            .map(|entry| entry.resource.info())
    }

    /// Hashes from `hashes` that are not resident, in input order
    pub fn missing(&self, hashes: &[ResourceHash]) -> Vec<ResourceHash> {
        let entries = self.shared.entries.lock();
        hashes
            .iter()
            .copied()
            .filter(|hash| !entries.contains_key(hash))
            .collect()
    }

    /// Take a usage reference on a resident hash
    pub fn acquire_usage(&self, hash: ResourceHash) -> Result<HashUsage, ResourceError> {
        let mut entries = self.shared.entries.lock();
        let entry = entries.get_mut(&hash).ok_or(ResourceError::NotFound(hash))?;
        entry.usages += 1;
        entry.released_at = None;
        Ok(HashUsage {
            hash,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Release a usage reference. Equivalent to dropping the handle.
    pub fn release_usage(&self, usage: HashUsage) {
        drop(usage);
    }

    /// Current usage count of a hash (0 if unknown)
    pub fn usage_count(&self, hash: ResourceHash) -> u32 {
        self.shared
            .entries
            .lock()
            .get(&hash)
            .map(|entry| entry.usages)
            .unwrap_or(0)
    }

    /// Evict every unused resource whose cache timer elapsed at `now`.
    ///
    /// Returns the evicted hashes.
    pub fn evict_expired(&self, now: Instant) -> Vec<ResourceHash> {
        let timeout = self.shared.config.cache_timeout;
        let mut evicted = Vec::new();
        let mut freed_bytes = 0;
        {
            let mut entries = self.shared.entries.lock();
            entries.retain(|hash, entry| {
                let expired = entry.usages == 0
                    && entry
                        .released_at
                        .map(|at| now.saturating_duration_since(at) >= timeout)
                        .unwrap_or(false);
                if expired {
                    evicted.push(*hash);
                    freed_bytes += entry.resource.size();
                }
                !expired
            });
            if evicted.is_empty() {
                return evicted;
            }

            evicted.sort();
            let mut stats = self.shared.stats.lock();
            stats.evicted += evicted.len() as u64;
            stats.resident = stats.resident.saturating_sub(evicted.len());
            stats.resident_bytes = stats.resident_bytes.saturating_sub(freed_bytes);
            for hash in &evicted {
                let _ = self.shared.event_tx.send(ResourceEvent::Evicted(*hash));
            }
        }

        for hash in &evicted {
            log::debug!("Evicted resource {}", hash);
        }
        evicted
    }

    /// Number of distinct resident resources
    pub fn resource_count(&self) -> usize {
        self.shared.entries.lock().len()
    }

    /// Get statistics
    pub fn stats(&self) -> ResourceStoreStats {
        self.shared.stats.lock().clone()
    }

    /// Receiver for store events.
    ///
    /// All receivers share one queue; each event is delivered once.
    pub fn events(&self) -> Receiver<ResourceEvent> {
        self.shared.event_rx.clone()
    }
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new(ResourceStoreConfig::default())
    }
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore")
            .field("resources", &self.resource_count())
            .finish()
    }
}

/// A usage reference on a resident resource.
///
/// Dropping the handle releases the usage.
pub struct HashUsage {
    hash: ResourceHash,
    shared: Arc<Shared>,
}

impl HashUsage {
    /// The referenced hash
    pub fn hash(&self) -> ResourceHash {
        self.hash
    }
}

impl Drop for HashUsage {
    fn drop(&mut self) {
        self.shared.release(self.hash);
    }
}

impl std::fmt::Debug for HashUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HashUsage").field(&self.hash).finish()
    }
}
