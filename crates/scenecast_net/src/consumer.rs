//! Scene Graph Consumer (apply engine)
//!
//! Receives scene updates and replays them onto a local mirror [`Scene`]
//! per subscribed scene.
//!
//! # Per-scene state
//!
//! ```text
//!             subscribe                snapshot
//! Available ───────────► WaitingForSnapshot ───────► Streaming ◄──┐
//!     ▲                                                │         │ snapshot
//!     │ unsubscribe                      gap/malformed ▼         │
//!     └────────────────────────────────────────── Resyncing ─────┘
//! ```
//!
//! Ordering is decided by `(epoch, sequence)`, where the epoch counts the
//! provider's sequence wraps. Deltas must follow the last received sequence
//! of the same epoch exactly; older ones are duplicates and dropped. A delta
//! from a later epoch means the wrap snapshot was missed, and a resync is
//! requested. Resync requests are repeated every `resync_retry_ms` until a
//! snapshot arrives.
//!
//! # Resources
//!
//! A `WaitForResources` flush stalls in the pending queue until every hash
//! it references is resident. Other flushes apply immediately, deferring
//! only the actions that touch a missing hash plus every later action that
//! touches the same handles. Deferred actions are retried whenever a
//! resource arrives. Stalled flushes are force-applied once the queue grows
//! past `max_pending_flushes` or the flush expiration passes.

use crossbeam_channel::{unbounded, Receiver, Sender};
use scenecast_ir::{
    ActionError, FlushKind, FlushMode, FlushTimeInformation, ObjectHandle, ParticipantId,
    SceneAction, Scene, SceneId, SceneVersionTag,
};
use scenecast_resource::{HashUsage, ResourceAvailability, ResourceHash, ResourceStore};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::FrameworkError;
use crate::message::{Message, ResourceAnnouncement, ResourceData, SceneUpdate};
use crate::transport::Transport;

/// Consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Stalled flushes a scene may queue before they are force-applied
    pub max_pending_flushes: usize,
    /// Wait before repeating an unanswered resync request
    pub resync_retry_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_pending_flushes: 120,
            resync_retry_ms: 1_000,
        }
    }
}

/// Consumer statistics
#[derive(Debug, Clone, Default)]
pub struct ConsumerStats {
    pub updates_received: u64,
    pub flushes_applied: u64,
    pub snapshots_applied: u64,
    pub duplicates_dropped: u64,
    /// Deltas dropped while waiting for a snapshot
    pub deltas_discarded: u64,
    pub gaps_detected: u64,
    pub malformed_updates: u64,
    pub resyncs_requested: u64,
    /// Resync requests repeated because no snapshot answered
    pub resync_retries: u64,
    pub force_applied: u64,
    pub actions_deferred: u64,
    pub resources_requested: u64,
    pub resources_received: u64,
}

/// Consumer-side state of one scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumedSceneState {
    /// Offered by a provider, not subscribed
    Available,
    /// Subscribed, no snapshot yet
    WaitingForSnapshot,
    /// Applying deltas in sequence
    Streaming,
    /// Lost sync, waiting for a fresh snapshot
    Resyncing,
}

/// Notifications for the render loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    SceneAvailable {
        scene_id: SceneId,
        provider: ParticipantId,
    },
    SceneUnavailable {
        scene_id: SceneId,
    },
    /// First snapshot after subscribing was applied
    SceneSubscribed {
        scene_id: SceneId,
    },
    FlushApplied {
        scene_id: SceneId,
        sequence: u64,
        version_tag: Option<SceneVersionTag>,
    },
    ResyncRequested {
        scene_id: SceneId,
    },
    MirrorReset {
        scene_id: SceneId,
    },
}

/// A scene as listed by [`SceneGraphConsumer::available_scenes`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableScene {
    pub scene_id: SceneId,
    pub name: String,
    pub provider: ParticipantId,
    pub state: ConsumedSceneState,
}

struct PendingFlush {
    sequence: u64,
    kind: FlushKind,
    mode: FlushMode,
    version_tag: Option<SceneVersionTag>,
    time_info: FlushTimeInformation,
    resources: Vec<ResourceHash>,
    actions: Vec<SceneAction>,
}

fn is_blocked(action: &SceneAction, blocked: &HashSet<ObjectHandle>, store: &ResourceStore) -> bool {
    action.touched_handles().iter().any(|handle| blocked.contains(handle))
        || action
            .resource_hashes()
            .iter()
            .any(|hash| hash.is_valid() && !store.contains(*hash))
}

struct ConsumedScene {
    provider: ParticipantId,
    name: String,
    state: ConsumedSceneState,
    mirror: Scene,
    /// Wrap epoch of `last_received`
    last_epoch: u64,
    last_received: u64,
    last_applied: u64,
    /// When the outstanding resync request was sent
    resync_sent_ms: Option<u64>,
    version_tag: Option<SceneVersionTag>,
    time_info: FlushTimeInformation,
    pending: VecDeque<PendingFlush>,
    deferred: Vec<SceneAction>,
    usages: HashMap<ResourceHash, HashUsage>,
    subscribed_notified: bool,
}

impl ConsumedScene {
    fn new(provider: ParticipantId, name: String) -> Self {
        Self {
            provider,
            name,
            state: ConsumedSceneState::Available,
            mirror: Scene::new(),
            last_epoch: 0,
            last_received: 0,
            last_applied: 0,
            resync_sent_ms: None,
            version_tag: None,
            time_info: FlushTimeInformation::default(),
            pending: VecDeque::new(),
            deferred: Vec::new(),
            usages: HashMap::new(),
            subscribed_notified: false,
        }
    }

    /// Drop the mirror and everything queued for it
    fn teardown(&mut self) {
        self.mirror.clear();
        self.pending.clear();
        self.deferred.clear();
        self.usages.clear();
        self.last_epoch = 0;
        self.last_received = 0;
        self.last_applied = 0;
        self.version_tag = None;
        self.time_info = FlushTimeInformation::default();
    }

    /// Hashes this scene is waiting for
    fn needed_resources(&self) -> BTreeSet<ResourceHash> {
        self.pending
            .iter()
            .flat_map(|flush| flush.resources.iter().copied())
            .chain(self.deferred.iter().flat_map(|action| action.resource_hashes()))
            .filter(|hash| hash.is_valid())
            .collect()
    }

    /// Replay actions in order, deferring those that cannot run yet.
    ///
    /// Returns the number of deferred actions.
    fn apply_actions(&mut self, actions: Vec<SceneAction>, store: &ResourceStore) -> Result<usize, ActionError> {
        let mut blocked: HashSet<ObjectHandle> = self
            .deferred
            .iter()
            .flat_map(|action| action.touched_handles())
            .collect();
        let mut deferred = 0;

        for action in actions {
            if is_blocked(&action, &blocked, store) {
                blocked.extend(action.touched_handles());
                self.deferred.push(action);
                deferred += 1;
            } else {
                self.mirror.apply(&action)?;
            }
        }
        Ok(deferred)
    }

    /// Apply deferred actions whose resources arrived. Returns how many ran.
    fn retry_deferred(&mut self, store: &ResourceStore) -> Result<usize, ActionError> {
        if self.deferred.is_empty() {
            return Ok(0);
        }
        let waiting = std::mem::take(&mut self.deferred);
        let mut blocked = HashSet::new();
        let mut applied = 0;

        for action in waiting {
            if is_blocked(&action, &blocked, store) {
                blocked.extend(action.touched_handles());
                self.deferred.push(action);
            } else {
                self.mirror.apply(&action)?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Apply queued flushes in order until one has to wait
    fn process_pending(
        &mut self,
        scene_id: SceneId,
        store: &ResourceStore,
        max_pending: usize,
        now_ms: u64,
        stats: &mut ConsumerStats,
        events: &Sender<ConsumerEvent>,
    ) -> Result<(), ActionError> {
        while let Some(front) = self.pending.front() {
            let valid: Vec<ResourceHash> = front.resources.iter().copied().filter(|h| h.is_valid()).collect();
            let missing = store.missing(&valid);
            if front.mode == FlushMode::WaitForResources && !missing.is_empty() {
                let overflow = self.pending.len() > max_pending;
                let expired = front.time_info.is_expired(now_ms);
                if !overflow && !expired {
                    break;
                }
                log::error!(
                    "{} flush {} force-applied with {} missing resources ({})",
                    scene_id,
                    front.sequence,
                    missing.len(),
                    if expired { "expired" } else { "too many pending flushes" }
                );
                stats.force_applied += 1;
            }

            let Some(flush) = self.pending.pop_front() else {
                break;
            };
            if flush.kind == FlushKind::Snapshot {
                self.mirror.clear();
                self.deferred.clear();
            }
            let deferred = self.apply_actions(flush.actions, store)?;
            if deferred > 0 {
                log::debug!("{} flush {} deferred {} actions", scene_id, flush.sequence, deferred);
                stats.actions_deferred += deferred as u64;
            }

            self.last_applied = flush.sequence;
            self.time_info = flush.time_info;
            if flush.version_tag.is_some() {
                self.version_tag = flush.version_tag;
            }
            stats.flushes_applied += 1;
            if flush.kind == FlushKind::Snapshot {
                stats.snapshots_applied += 1;
                log::info!(
                    "{} rebuilt from snapshot {} ({} objects)",
                    scene_id,
                    flush.sequence,
                    self.mirror.len()
                );
                if !self.subscribed_notified {
                    self.subscribed_notified = true;
                    let _ = events.send(ConsumerEvent::SceneSubscribed { scene_id });
                }
            } else {
                log::trace!("{} applied flush {}", scene_id, flush.sequence);
            }
            let _ = events.send(ConsumerEvent::FlushApplied {
                scene_id,
                sequence: flush.sequence,
                version_tag: flush.version_tag,
            });
        }
        self.sync_usages(store);
        Ok(())
    }

    /// Hold usages on every resident hash the mirror references or waits for
    fn sync_usages(&mut self, store: &ResourceStore) {
        let mut wanted = self.mirror.referenced_resources();
        wanted.extend(self.needed_resources());
        self.usages.retain(|hash, _| wanted.contains(hash));
        for hash in wanted {
            if self.usages.contains_key(&hash) || !hash.is_valid() {
                continue;
            }
            if let Ok(usage) = store.acquire_usage(hash) {
                self.usages.insert(hash, usage);
            }
        }
    }
}

/// Renderer-side scene distribution
pub struct SceneGraphConsumer {
    local_id: ParticipantId,
    config: ConsumerConfig,
    store: ResourceStore,
    scenes: HashMap<SceneId, ConsumedScene>,
    /// Hashes asked for and not yet received
    requested: HashSet<ResourceHash>,
    events_tx: Sender<ConsumerEvent>,
    events_rx: Receiver<ConsumerEvent>,
    stats: ConsumerStats,
}

impl SceneGraphConsumer {
    /// Create a consumer storing received resources in `store`
    pub fn new(local_id: ParticipantId, config: ConsumerConfig, store: ResourceStore) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            local_id,
            config,
            store,
            scenes: HashMap::new(),
            requested: HashSet::new(),
            events_tx,
            events_rx,
            stats: ConsumerStats::default(),
        }
    }

    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    /// A provider offers a scene
    pub fn on_scene_available(&mut self, scene_id: SceneId, name: impl Into<String>, provider: ParticipantId) {
        if let Some(existing) = self.scenes.get(&scene_id) {
            if existing.provider != provider {
                log::warn!(
                    "{} offered by {} but already provided by {}",
                    scene_id,
                    provider,
                    existing.provider
                );
            }
            return;
        }
        let name = name.into();
        log::info!("{} '{}' available from {}", scene_id, name, provider);
        self.scenes.insert(scene_id, ConsumedScene::new(provider, name));
        let _ = self
            .events_tx
            .send(ConsumerEvent::SceneAvailable { scene_id, provider });
    }

    /// A provider withdrew a scene: tear down its mirror
    pub fn on_scene_unavailable(&mut self, scene_id: SceneId, provider: ParticipantId) {
        match self.scenes.get(&scene_id) {
            Some(scene) if scene.provider == provider => {}
            _ => return,
        }
        if let Some(scene) = self.scenes.remove(&scene_id) {
            log::info!(
                "{} unavailable, discarding mirror and {} deferred actions",
                scene_id,
                scene.deferred.len()
            );
        }
        let _ = self.events_tx.send(ConsumerEvent::SceneUnavailable { scene_id });
    }

    /// Every scene of a disconnected provider becomes unavailable
    pub fn on_provider_disconnected(&mut self, provider: ParticipantId) {
        let mut lost: Vec<_> = self
            .scenes
            .iter()
            .filter(|(_, scene)| scene.provider == provider)
            .map(|(&scene_id, _)| scene_id)
            .collect();
        lost.sort();
        for scene_id in lost {
            self.on_scene_unavailable(scene_id, provider);
        }
    }

    /// Ask the provider for a scene's updates
    pub fn subscribe(&mut self, scene_id: SceneId, transport: &dyn Transport) -> Result<(), FrameworkError> {
        let scene = self
            .scenes
            .get_mut(&scene_id)
            .ok_or(FrameworkError::UnknownScene(scene_id))?;
        if scene.state != ConsumedSceneState::Available {
            return Ok(());
        }
        transport.send(scene.provider, &Message::SubscribeScene { scene_id })?;
        scene.state = ConsumedSceneState::WaitingForSnapshot;
        scene.subscribed_notified = false;
        log::info!("Subscribed to {} from {}", scene_id, scene.provider);
        Ok(())
    }

    /// Stop receiving a scene and drop its mirror
    pub fn unsubscribe(&mut self, scene_id: SceneId, transport: &dyn Transport) -> Result<(), FrameworkError> {
        let scene = self
            .scenes
            .get_mut(&scene_id)
            .ok_or(FrameworkError::UnknownScene(scene_id))?;
        if scene.state == ConsumedSceneState::Available {
            return Ok(());
        }
        scene.teardown();
        scene.state = ConsumedSceneState::Available;
        log::info!("Unsubscribed from {}", scene_id);
        transport.send(scene.provider, &Message::UnsubscribeScene { scene_id })?;
        Ok(())
    }

    /// Handle a delta or snapshot
    pub fn on_scene_update_received(
        &mut self,
        from: ParticipantId,
        update: SceneUpdate,
        transport: &dyn Transport,
        now_ms: u64,
    ) {
        self.stats.updates_received += 1;
        let scene_id = update.scene_id;
        let Some(scene) = self.scenes.get_mut(&scene_id) else {
            log::debug!("Update {} for unknown {} dropped", update.sequence, scene_id);
            return;
        };
        if scene.provider != from {
            log::warn!("Update for {} from non-provider {} dropped", scene_id, from);
            return;
        }
        if scene.state == ConsumedSceneState::Available {
            log::debug!("Update {} for unsubscribed {} dropped", update.sequence, scene_id);
            return;
        }

        let decoded = match update.decode_actions() {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("Malformed update {} for {}: {}", update.sequence, scene_id, e);
                self.stats.malformed_updates += 1;
                self.reset_and_resync(scene_id, transport, now_ms);
                return;
            }
        };
        if decoded.skipped > 0 {
            log::debug!(
                "{} update {} skipped {} actions with unknown opcodes",
                scene_id,
                update.sequence,
                decoded.skipped
            );
        }

        let position = (update.epoch, update.sequence);
        let last = (scene.last_epoch, scene.last_received);
        if update.is_snapshot() {
            let duplicate = scene.state == ConsumedSceneState::Streaming
                && !update.counter_wrapped
                && position <= last;
            if duplicate {
                log::debug!("Duplicate snapshot {} for {} dropped", update.sequence, scene_id);
                self.stats.duplicates_dropped += 1;
                return;
            }
            scene.pending.clear();
            scene.state = ConsumedSceneState::Streaming;
            scene.resync_sent_ms = None;
        } else {
            if update.counter_wrapped {
                log::info!("{} sequence counter wrapped, requesting resync", scene_id);
                self.request_resync(scene_id, transport, now_ms);
                return;
            }
            match scene.state {
                ConsumedSceneState::WaitingForSnapshot | ConsumedSceneState::Resyncing => {
                    log::trace!("Delta {} for {} dropped, waiting for snapshot", update.sequence, scene_id);
                    self.stats.deltas_discarded += 1;
                    return;
                }
                _ => {}
            }
            if update.epoch > scene.last_epoch {
                log::warn!(
                    "{} delta {} is from epoch {} but the mirror is at epoch {}, requesting resync",
                    scene_id,
                    update.sequence,
                    update.epoch,
                    scene.last_epoch
                );
                self.stats.gaps_detected += 1;
                self.request_resync(scene_id, transport, now_ms);
                return;
            }
            if position <= last {
                log::debug!("Duplicate delta {} for {} dropped", update.sequence, scene_id);
                self.stats.duplicates_dropped += 1;
                return;
            }
            if update.sequence != scene.last_received + 1 {
                log::warn!(
                    "{} expected flush {} but got {}, requesting resync",
                    scene_id,
                    scene.last_received + 1,
                    update.sequence
                );
                self.stats.gaps_detected += 1;
                self.request_resync(scene_id, transport, now_ms);
                return;
            }
        }

        scene.last_epoch = update.epoch;
        scene.last_received = update.sequence;
        scene.pending.push_back(PendingFlush {
            sequence: update.sequence,
            kind: update.kind,
            mode: update.flush_mode,
            version_tag: update.version_tag,
            time_info: update.time_info,
            resources: update.resources.clone(),
            actions: decoded.actions,
        });
        let provider = scene.provider;

        self.request_missing(provider, &update.resources, transport);
        self.process(scene_id, transport, now_ms);
    }

    /// Run the pending queue of one scene, resetting it on apply errors
    fn process(&mut self, scene_id: SceneId, transport: &dyn Transport, now_ms: u64) {
        let Some(scene) = self.scenes.get_mut(&scene_id) else {
            return;
        };
        let result = scene.process_pending(
            scene_id,
            &self.store,
            self.config.max_pending_flushes,
            now_ms,
            &mut self.stats,
            &self.events_tx,
        );
        if let Err(e) = result {
            log::warn!("{} mirror rejected an action: {}", scene_id, e);
            self.reset_and_resync(scene_id, transport, now_ms);
        }
    }

    fn request_resync(&mut self, scene_id: SceneId, transport: &dyn Transport, now_ms: u64) {
        let Some(scene) = self.scenes.get_mut(&scene_id) else {
            return;
        };
        scene.state = ConsumedSceneState::Resyncing;
        scene.resync_sent_ms = Some(now_ms);
        self.stats.resyncs_requested += 1;
        if let Err(e) = transport.send(scene.provider, &Message::RequestResync { scene_id }) {
            log::warn!("Resync request for {} failed: {}", scene_id, e);
        }
        let _ = self.events_tx.send(ConsumerEvent::ResyncRequested { scene_id });
    }

    fn reset_and_resync(&mut self, scene_id: SceneId, transport: &dyn Transport, now_ms: u64) {
        if let Some(scene) = self.scenes.get_mut(&scene_id) {
            scene.teardown();
            let _ = self.events_tx.send(ConsumerEvent::MirrorReset { scene_id });
        }
        self.request_resync(scene_id, transport, now_ms);
    }

    /// Repeat resync requests nobody answered within `resync_retry_ms`
    fn retry_resyncs(&mut self, transport: &dyn Transport, now_ms: u64) {
        let retry_ms = self.config.resync_retry_ms;
        let mut ids: Vec<_> = self
            .scenes
            .iter()
            .filter(|(_, scene)| scene.state == ConsumedSceneState::Resyncing)
            .filter(|(_, scene)| {
                scene
                    .resync_sent_ms
                    .map(|sent| now_ms.saturating_sub(sent) >= retry_ms)
                    .unwrap_or(true)
            })
            .map(|(&scene_id, _)| scene_id)
            .collect();
        ids.sort();
        for scene_id in ids {
            let Some(scene) = self.scenes.get_mut(&scene_id) else {
                continue;
            };
            scene.resync_sent_ms = Some(now_ms);
            self.stats.resync_retries += 1;
            log::info!("{} still has no snapshot, repeating the resync request", scene_id);
            if let Err(e) = transport.send(scene.provider, &Message::RequestResync { scene_id }) {
                log::warn!("Resync request for {} failed: {}", scene_id, e);
            }
        }
    }

    fn request_missing(&mut self, provider: ParticipantId, hashes: &[ResourceHash], transport: &dyn Transport) {
        let wanted: Vec<ResourceHash> = hashes
            .iter()
            .copied()
            .filter(|hash| hash.is_valid() && !self.requested.contains(hash) && !self.store.contains(*hash))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if wanted.is_empty() {
            return;
        }
        let count = wanted.len();
        match transport.send(provider, &Message::ResourceRequest { hashes: wanted.clone() }) {
            Ok(()) => {
                log::debug!("Requested {} resources from {}", count, provider);
                self.stats.resources_requested += count as u64;
                self.requested.extend(wanted);
            }
            Err(e) => log::warn!("Resource request to {} failed: {}", provider, e),
        }
    }

    /// A provider announced a resource
    pub fn on_resource_announced(
        &mut self,
        from: ParticipantId,
        announcement: ResourceAnnouncement,
        transport: &dyn Transport,
    ) {
        match announcement.availability {
            ResourceAvailability::Available => {
                let needed = self
                    .scenes
                    .values()
                    .filter(|scene| scene.provider == from)
                    .any(|scene| scene.needed_resources().contains(&announcement.hash));
                if needed {
                    self.request_missing(from, &[announcement.hash], transport);
                }
            }
            ResourceAvailability::Revoked => {
                log::debug!("{} revoked resource {}", from, announcement.hash);
                self.requested.remove(&announcement.hash);
            }
        }
    }

    /// Store a received resource payload and retry whatever waited on it
    pub fn on_resource_data(
        &mut self,
        from: ParticipantId,
        data: ResourceData,
        transport: &dyn Transport,
        now_ms: u64,
    ) {
        let hash = data.hash;
        self.requested.remove(&hash);
        let stored = data
            .into_resource()
            .and_then(|resource| self.store.put_resource(resource));
        match stored {
            Ok(_) => {
                self.stats.resources_received += 1;
                log::debug!("Received resource {} from {}", hash, from);
                self.on_resource_available(hash, transport, now_ms);
            }
            Err(e) => log::warn!("Resource {} from {} rejected: {}", hash, from, e),
        }
    }

    /// A hash became resident locally
    pub fn on_resource_available(&mut self, hash: ResourceHash, transport: &dyn Transport, now_ms: u64) {
        self.requested.remove(&hash);
        let mut ids: Vec<_> = self.scenes.keys().copied().collect();
        ids.sort();
        for scene_id in ids {
            let retried = match self.scenes.get_mut(&scene_id) {
                Some(scene) => scene.retry_deferred(&self.store),
                None => continue,
            };
            match retried {
                Ok(applied) => {
                    if applied > 0 {
                        log::debug!("{} applied {} deferred actions after {} arrived", scene_id, applied, hash);
                    }
                    self.process(scene_id, transport, now_ms);
                }
                Err(e) => {
                    log::warn!("{} mirror rejected a deferred action: {}", scene_id, e);
                    self.reset_and_resync(scene_id, transport, now_ms);
                }
            }
        }
    }

    /// Periodic tick: force-apply expired flushes and repeat stale resync requests
    pub fn update(&mut self, transport: &dyn Transport, now_ms: u64) {
        self.retry_resyncs(transport, now_ms);
        let mut ids: Vec<_> = self
            .scenes
            .iter()
            .filter(|(_, scene)| !scene.pending.is_empty())
            .map(|(&scene_id, _)| scene_id)
            .collect();
        ids.sort();
        for scene_id in ids {
            self.process(scene_id, transport, now_ms);
        }
    }

    /// Read-only mirror of a scene
    pub fn mirror(&self, scene_id: SceneId) -> Option<&Scene> {
        self.scenes.get(&scene_id).map(|scene| &scene.mirror)
    }

    pub fn state(&self, scene_id: SceneId) -> Option<ConsumedSceneState> {
        self.scenes.get(&scene_id).map(|scene| scene.state)
    }

    /// Sequence of the last applied flush
    pub fn last_applied(&self, scene_id: SceneId) -> Option<u64> {
        self.scenes.get(&scene_id).map(|scene| scene.last_applied)
    }

    /// Timing of the last applied flush
    pub fn time_info(&self, scene_id: SceneId) -> Option<FlushTimeInformation> {
        self.scenes.get(&scene_id).map(|scene| scene.time_info)
    }

    /// Last version tag carried by an applied flush
    pub fn version_tag(&self, scene_id: SceneId) -> Option<SceneVersionTag> {
        self.scenes.get(&scene_id).and_then(|scene| scene.version_tag)
    }

    /// Flushes received but not applied
    pub fn pending_flushes(&self, scene_id: SceneId) -> usize {
        self.scenes.get(&scene_id).map(|scene| scene.pending.len()).unwrap_or(0)
    }

    /// Actions waiting for resources
    pub fn deferred_actions(&self, scene_id: SceneId) -> usize {
        self.scenes.get(&scene_id).map(|scene| scene.deferred.len()).unwrap_or(0)
    }

    /// Every known scene, sorted by ID
    pub fn available_scenes(&self) -> Vec<AvailableScene> {
        let mut scenes: Vec<_> = self
            .scenes
            .iter()
            .map(|(&scene_id, scene)| AvailableScene {
                scene_id,
                name: scene.name.clone(),
                provider: scene.provider,
                state: scene.state,
            })
            .collect();
        scenes.sort_by_key(|scene| scene.scene_id);
        scenes
    }

    pub fn events(&self) -> Receiver<ConsumerEvent> {
        self.events_rx.clone()
    }

    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    /// Log one line per known scene
    pub fn log_summary(&self) {
        log::info!(
            "Consumer: {} scenes, {} flushes applied, {} resyncs, {} force-applied, {} resources outstanding",
            self.scenes.len(),
            self.stats.flushes_applied,
            self.stats.resyncs_requested,
            self.stats.force_applied,
            self.requested.len()
        );
        for scene in self.available_scenes() {
            if let Some(consumed) = self.scenes.get(&scene.scene_id) {
                log::info!(
                    "  {} '{}' from {}: {:?}, applied {}, {} pending, {} deferred, {} objects",
                    scene.scene_id,
                    scene.name,
                    scene.provider,
                    scene.state,
                    consumed.last_applied,
                    consumed.pending.len(),
                    consumed.deferred.len(),
                    consumed.mirror.len()
                );
            }
        }
    }
}
