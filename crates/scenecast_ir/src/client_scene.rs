//! Producer-side scene
//!
//! [`ClientScene`] is what the application thread mutates. Every action is
//! validated by the [`SceneActionLog`] and applied to a local [`Scene`]
//! before it is recorded; a rejected action leaves both untouched.
//! [`ClientScene::flush`] closes the batch into a [`Flush`] without any I/O.

use scenecast_resource::{HashUsage, ResourceHash, ResourceStore};
use std::collections::HashMap;

use crate::action::SceneAction;
use crate::error::{ActionError, FlushError};
use crate::flush::{
    collect_resources, wall_clock_ms, Flush, FlushKind, FlushMode, FlushOptions, FlushState,
    FlushTimeInformation, SequenceCounter,
};
use crate::ids::{ObjectHandle, SceneId, SceneVersionTag};
use crate::action_log::SceneActionLog;
use crate::scene::Scene;

/// A scene owned by the producing application
pub struct ClientScene {
    id: SceneId,
    name: String,
    log: SceneActionLog,
    scene: Scene,
    counter: SequenceCounter,
    state: FlushState,
    next_handle: u64,
    last_version_tag: Option<SceneVersionTag>,
    store: ResourceStore,
    usages: HashMap<ResourceHash, HashUsage>,
}

impl ClientScene {
    /// Create a new empty scene
    pub fn new(id: SceneId, name: impl Into<String>, store: ResourceStore, wrap_around: u64) -> Self {
        Self {
            id,
            name: name.into(),
            log: SceneActionLog::new(),
            scene: Scene::new(),
            counter: SequenceCounter::new(wrap_around),
            state: FlushState::Idle,
            next_handle: 1,
            last_version_tag: None,
            store,
            usages: HashMap::new(),
        }
    }

    pub fn id(&self) -> SceneId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current flush state
    pub fn state(&self) -> FlushState {
        self.state
    }

    /// Read-only view of the local scene
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Read-only view of the action log
    pub fn log(&self) -> &SceneActionLog {
        &self.log
    }

    /// Sequence of the last produced flush, 0 before the first
    pub fn last_sequence(&self) -> u64 {
        self.counter.last()
    }

    /// Reserve a fresh handle. Handles are never handed out twice.
    pub fn allocate_handle(&mut self) -> ObjectHandle {
        let handle = ObjectHandle::from_raw(self.next_handle);
        self.next_handle += 1;
        handle
    }

    /// Validate, apply and record one action
    pub fn apply(&mut self, action: SceneAction) -> Result<(), ActionError> {
        self.log.validate(&action)?;
        self.scene.apply(&action)?;

        if let Some((handle, _)) = action.allocated() {
            if handle.raw() >= self.next_handle {
                self.next_handle = handle.raw() + 1;
            }
        }

        self.log.append(action)?;
        if self.state != FlushState::Accumulating {
            log::trace!("{} accumulating", self.id);
            self.state = FlushState::Accumulating;
        }
        Ok(())
    }

    /// Allocate a named node
    pub fn create_node(&mut self, name: impl Into<String>) -> Result<ObjectHandle, ActionError> {
        let handle = self.allocate_handle();
        self.apply(SceneAction::AllocateNode {
            handle,
            name: name.into(),
        })?;
        Ok(handle)
    }

    /// Release an object
    pub fn release(&mut self, handle: ObjectHandle) -> Result<(), ActionError> {
        self.apply(SceneAction::ReleaseHandle { handle })
    }

    /// Close the open batch into a flush.
    ///
    /// Returns `None` when nothing was appended since the last flush. A
    /// flush referencing resources missing from the local store is upgraded
    /// to [`FlushMode::WaitForResources`].
    pub fn flush(&mut self, options: FlushOptions) -> Option<Flush> {
        if self.state != FlushState::Accumulating || !self.log.has_open_actions() {
            return None;
        }

        let step = self.counter.advance();
        let actions = self.log.seal(step.sequence)?;
        let resources = collect_resources(&actions);
        self.sync_usages();

        let mut mode = options.mode;
        let missing = self.store.missing(&resources);
        if mode == FlushMode::Immediate && !missing.is_empty() {
            log::debug!(
                "{} flush {} references {} missing resources, waiting for them",
                self.id,
                step.sequence,
                missing.len()
            );
            mode = FlushMode::WaitForResources;
        }

        if step.wrapped {
            log::info!("{} sequence counter wrapped, next send is a full resync", self.id);
        }

        let now = wall_clock_ms();
        let time_info = FlushTimeInformation {
            flush_timestamp_ms: now,
            expiration_ms: options.expiration_ms.map(|ms| now.saturating_add(ms)),
            effect_time_sync: options.effect_time_sync,
        };
        if options.version_tag.is_some() {
            self.last_version_tag = options.version_tag;
        }

        self.state = FlushState::ReadyToSend;
        log::debug!("{} flush {} ({} actions)", self.id, step.sequence, actions.len());

        Some(Flush {
            scene_id: self.id,
            sequence: step.sequence,
            kind: FlushKind::Delta,
            mode,
            version_tag: options.version_tag,
            time_info,
            actions,
            resources,
            size_info: self.scene.size_info(),
            counter_wrapped: step.wrapped,
            epoch: self.counter.epoch(),
        })
    }

    /// Record that the flush with `sequence` was handed to the sender
    pub fn mark_sent(&mut self, sequence: u64) -> Result<(), FlushError> {
        if self.state != FlushState::ReadyToSend {
            return Err(FlushError::InvalidTransition {
                from: self.state,
                to: FlushState::Sent,
            });
        }
        if sequence != self.counter.last() {
            return Err(FlushError::SequenceMismatch {
                expected: self.counter.last(),
                got: sequence,
            });
        }
        self.state = FlushState::Sent;
        Ok(())
    }

    /// Full snapshot of the current state, numbered with the last flush sequence
    pub fn snapshot(&self) -> Flush {
        let mut snapshot = self.scene.snapshot_flush(
            self.id,
            self.counter.last(),
            self.last_version_tag,
            FlushTimeInformation::now(),
        );
        snapshot.epoch = self.counter.epoch();
        snapshot
    }

    /// Hashes this scene currently holds usages on
    pub fn held_resources(&self) -> Vec<ResourceHash> {
        let mut hashes: Vec<_> = self.usages.keys().copied().collect();
        hashes.sort();
        hashes
    }

    /// Discard the log, state and counters as if the scene were recreated
    pub fn reset(&mut self) {
        log::info!("{} reset", self.id);
        self.log.reset();
        self.scene.clear();
        self.counter = SequenceCounter::new(self.counter.wrap_around());
        self.state = FlushState::Idle;
        self.last_version_tag = None;
        self.usages.clear();
    }

    fn sync_usages(&mut self) {
        let referenced = self.scene.referenced_resources();
        self.usages.retain(|hash, _| referenced.contains(hash));
        for hash in referenced {
            if self.usages.contains_key(&hash) {
                continue;
            }
            match self.store.acquire_usage(hash) {
                Ok(usage) => {
                    self.usages.insert(hash, usage);
                }
                Err(_) => log::trace!("{} references non-resident resource {}", self.id, hash),
            }
        }
    }
}

impl std::fmt::Debug for ClientScene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientScene")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("objects", &self.scene.len())
            .field("last_sequence", &self.counter.last())
            .finish()
    }
}
