//! Flush/versioning protocol
//!
//! A flush closes the open action batch of a scene, numbers it and tags it
//! with timing and version metadata. Per scene the producer side walks
//!
//! ```text
//! Idle ──append──► Accumulating ──flush──► ReadyToSend ──handed off──► Sent
//!   ▲                    ▲                                               │
//!   └────────────────────┴──────────────── append ───────────────────────┘
//! ```
//!
//! Sequence numbers start at 1 and wrap at a configurable bound (default
//! [`SEQUENCE_WRAP_AROUND`]). The first flush after a wrap carries
//! `counter_wrapped`, which forces a full resync instead of a delta. Every
//! wrap also bumps the counter's epoch, so `(epoch, sequence)` orders
//! flushes across wraps.

use scenecast_resource::ResourceHash;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::action::SceneAction;
use crate::ids::{SceneId, SceneVersionTag};
use crate::scene::SceneSizeInfo;

/// Sequence numbers restart at 1 once they reach this value
pub const SEQUENCE_WRAP_AROUND: u64 = 10_000;

/// Producer-side flush state of one scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushState {
    /// No actions since the last handed-off flush
    Idle,
    /// Actions appended, no flush yet
    Accumulating,
    /// Flush produced, not yet handed to the sender
    ReadyToSend,
    /// Flush handed to the sender
    Sent,
}

/// Whether a consumer may apply a flush before its resources are resident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlushMode {
    /// Apply right away; actions on missing resources are deferred individually
    #[default]
    Immediate,
    /// Hold the whole flush until every referenced resource is resident
    WaitForResources,
}

/// Delta flushes continue a stream, snapshots replace the consumer's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlushKind {
    Delta,
    Snapshot,
}

/// Timing metadata the render loop uses to decide whether a flush is late
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlushTimeInformation {
    /// Producer wall clock at flush time, milliseconds since the Unix epoch
    pub flush_timestamp_ms: u64,
    /// Past this wall clock time the flush is force-applied
    pub expiration_ms: Option<u64>,
    /// Whether effect time should be synchronized to the flush timestamp
    pub effect_time_sync: bool,
}

impl FlushTimeInformation {
    /// Stamp with the current wall clock
    pub fn now() -> Self {
        Self {
            flush_timestamp_ms: wall_clock_ms(),
            ..Default::default()
        }
    }

    /// Whether the expiration deadline lies before `now_ms`
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expiration_ms.map(|deadline| now_ms > deadline).unwrap_or(false)
    }
}

/// Current wall clock in milliseconds since the Unix epoch
pub fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Options for closing a flush
#[derive(Debug, Clone, Default)]
pub struct FlushOptions {
    pub mode: FlushMode,
    pub version_tag: Option<SceneVersionTag>,
    /// Expiration relative to the flush timestamp
    pub expiration_ms: Option<u64>,
    pub effect_time_sync: bool,
}

impl FlushOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: FlushMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn version_tag(mut self, tag: SceneVersionTag) -> Self {
        self.version_tag = Some(tag);
        self
    }

    pub fn expires_after_ms(mut self, ms: u64) -> Self {
        self.expiration_ms = Some(ms);
        self
    }

    pub fn effect_time_sync(mut self, sync: bool) -> Self {
        self.effect_time_sync = sync;
        self
    }
}

/// An ordered, sequence-numbered batch of scene actions
#[derive(Debug, Clone)]
pub struct Flush {
    pub scene_id: SceneId,
    pub sequence: u64,
    pub kind: FlushKind,
    pub mode: FlushMode,
    pub version_tag: Option<SceneVersionTag>,
    pub time_info: FlushTimeInformation,
    pub actions: Arc<[SceneAction]>,
    /// Distinct resources referenced by the actions, sorted
    pub resources: Vec<ResourceHash>,
    /// Object counts of the scene after this flush
    pub size_info: SceneSizeInfo,
    /// First flush after the sequence counter wrapped
    pub counter_wrapped: bool,
    /// Number of times the sequence counter had wrapped when this was cut
    pub epoch: u64,
}

impl Flush {
    /// Number of actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn is_snapshot(&self) -> bool {
        self.kind == FlushKind::Snapshot
    }
}

/// Collect the distinct, sorted resource hashes referenced by actions
pub fn collect_resources(actions: &[SceneAction]) -> Vec<ResourceHash> {
    let mut hashes: Vec<ResourceHash> = actions
        .iter()
        .flat_map(|action| action.resource_hashes())
        .filter(|hash| hash.is_valid())
        .collect();
    hashes.sort();
    hashes.dedup();
    hashes
}

/// Result of advancing a [`SequenceCounter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceStep {
    pub sequence: u64,
    /// The counter restarted before producing this sequence
    pub wrapped: bool,
}

/// Per-scene flush sequence counter
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    next: u64,
    wrap_around: u64,
    wrapped: bool,
    last: u64,
    epoch: u64,
}

impl SequenceCounter {
    /// Create a counter wrapping at `wrap_around` (values below 2 are raised to 2)
    pub fn new(wrap_around: u64) -> Self {
        Self {
            next: 1,
            wrap_around: wrap_around.max(2),
            wrapped: false,
            last: 0,
            epoch: 0,
        }
    }

    /// Produce the next sequence number
    pub fn advance(&mut self) -> SequenceStep {
        let wrapped = std::mem::take(&mut self.wrapped);
        if wrapped {
            self.epoch += 1;
        }
        let sequence = self.next;
        self.next += 1;
        if self.next >= self.wrap_around {
            self.next = 1;
            self.wrapped = true;
        }
        self.last = sequence;
        SequenceStep { sequence, wrapped }
    }

    /// Last produced sequence, 0 before the first flush
    pub fn last(&self) -> u64 {
        self.last
    }

    pub fn wrap_around(&self) -> u64 {
        self.wrap_around
    }

    /// Wraps so far, counted when the first sequence after the wrap is produced
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new(SEQUENCE_WRAP_AROUND)
    }
}
