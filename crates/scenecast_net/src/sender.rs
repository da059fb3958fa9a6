//! Scene Graph Sender
//!
//! Provider side of scene distribution. The sender runs on the
//! communication thread and never touches the producer's scene: every
//! flush it receives is also applied to a private shadow [`Scene`], and
//! snapshots for late or resynchronizing subscribers are cut from that
//! shadow.
//!
//! # Delivery
//!
//! - A flush is encoded once and fanned out to each subscriber separately.
//!   A failed send marks only that subscriber for resync; the others keep
//!   receiving deltas.
//! - A flush that cannot be encoded, or exceeds the message size limit, is
//!   never sent partially. Every subscriber gets a snapshot instead.
//! - The first flush after the sequence counter wrapped always goes out as
//!   a snapshot. Every update carries the counter's wrap epoch, so a
//!   subscriber that missed that snapshot still orders later ones correctly.
//! - Resources are announced to each subscriber before the first update
//!   that references them.

use scenecast_ir::{Flush, FlushTimeInformation, ParticipantId, Scene, SceneId, SceneVersionTag};
use scenecast_resource::{ResourceAvailability, ResourceHash, ResourceStore};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::RegistryError;
use crate::message::{
    Message, ResourceAnnouncement, ResourceData, SceneInfo, SceneUpdate, MAX_MESSAGE_SIZE,
};
use crate::registry::{PublicationMode, PublicationRegistry};
use crate::transport::Transport;

/// Sender configuration
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Scene updates larger than this are replaced by snapshots
    pub max_message_size: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// Sender statistics
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    /// Flushes handed over by producers
    pub flushes_received: u64,
    /// Delta updates sent, counted per subscriber
    pub deltas_sent: u64,
    /// Snapshots sent, counted per subscriber
    pub snapshots_sent: u64,
    /// Encoded bytes of delta updates
    pub delta_bytes: u64,
    /// Sends rejected by the transport
    pub send_failures: u64,
    /// Flushes replaced by snapshots because they could not be sent as-is
    pub oversized_flushes: u64,
    pub resources_announced: u64,
    pub resources_revoked: u64,
    pub resources_served: u64,
    /// Requested hashes this participant does not hold
    pub unknown_resource_requests: u64,
}

struct ProvidedScene {
    name: String,
    shadow: Scene,
    last_sequence: u64,
    epoch: u64,
    version_tag: Option<SceneVersionTag>,
    /// The whole subscriber set gets a snapshot with the next flush
    needs_resync: bool,
    /// Subscribers that missed an update
    resync: BTreeSet<ParticipantId>,
}

impl ProvidedScene {
    fn snapshot(&self, scene_id: SceneId) -> Flush {
        let mut snapshot = self.shadow.snapshot_flush(
            scene_id,
            self.last_sequence,
            self.version_tag,
            FlushTimeInformation::now(),
        );
        snapshot.epoch = self.epoch;
        snapshot
    }
}

/// Provider-side scene distribution
pub struct SceneGraphSender {
    local_id: ParticipantId,
    config: SenderConfig,
    registry: Arc<PublicationRegistry>,
    store: ResourceStore,
    scenes: HashMap<SceneId, ProvidedScene>,
    /// What each participant has been told about, by hash
    announced: HashMap<ParticipantId, HashMap<ResourceHash, ResourceAnnouncement>>,
    /// Cleared by [`SceneGraphSender::disconnect_from_network`]
    networked: bool,
    stats: SenderStats,
}

impl SceneGraphSender {
    /// Create a sender for the registry's local participant
    pub fn new(config: SenderConfig, registry: Arc<PublicationRegistry>, store: ResourceStore) -> Self {
        Self {
            local_id: registry.local_id(),
            config,
            registry,
            store,
            scenes: HashMap::new(),
            announced: HashMap::new(),
            networked: true,
            stats: SenderStats::default(),
        }
    }

    /// Start tracking a newly created scene
    pub fn add_scene(&mut self, scene_id: SceneId, name: impl Into<String>) {
        let name = name.into();
        log::info!("Providing {} '{}'", scene_id, name);
        self.scenes.insert(
            scene_id,
            ProvidedScene {
                name,
                shadow: Scene::new(),
                last_sequence: 0,
                epoch: 0,
                version_tag: None,
                needs_resync: false,
                resync: BTreeSet::new(),
            },
        );
    }

    /// Stop tracking a destroyed scene, withdrawing it if still published
    pub fn remove_scene(&mut self, scene_id: SceneId, transport: &dyn Transport) {
        if let Some(info) = self.registry.unpublish(scene_id) {
            self.announce_unpublished(scene_id, info.mode, transport);
        }
        if self.scenes.remove(&scene_id).is_some() {
            log::info!("Stopped providing {}", scene_id);
        }
    }

    pub fn provides(&self, scene_id: SceneId) -> bool {
        self.scenes.contains_key(&scene_id)
    }

    /// Shadow copy of a provided scene
    pub fn shadow(&self, scene_id: SceneId) -> Option<&Scene> {
        self.scenes.get(&scene_id).map(|scene| &scene.shadow)
    }

    /// Publish a scene and announce it
    pub fn publish(
        &mut self,
        scene_id: SceneId,
        mode: PublicationMode,
        transport: &dyn Transport,
    ) -> Result<(), RegistryError> {
        let name = self
            .scenes
            .get(&scene_id)
            .map(|scene| scene.name.clone())
            .ok_or(RegistryError::NotPublished(scene_id))?;
        self.registry.publish(scene_id, name, mode)?;
        self.announce_published(scene_id, transport);
        Ok(())
    }

    /// Withdraw a scene and tell everyone who knew about it
    pub fn unpublish(&mut self, scene_id: SceneId, transport: &dyn Transport) -> Result<(), RegistryError> {
        let info = self
            .registry
            .unpublish(scene_id)
            .ok_or(RegistryError::NotPublished(scene_id))?;
        self.announce_unpublished(scene_id, info.mode, transport);
        Ok(())
    }

    /// Tell the local participant, and remote ones for networked scenes,
    /// that a scene was published
    pub fn announce_published(&mut self, scene_id: SceneId, transport: &dyn Transport) {
        let Some(info) = self.registry.scene_info(scene_id) else {
            return;
        };
        let message = Message::ScenesAvailable {
            scenes: vec![SceneInfo {
                scene_id,
                name: info.name,
                mode: info.mode,
            }],
        };
        for participant in self.audience(info.mode, transport) {
            if let Err(e) = transport.send(participant, &message) {
                log::warn!("Announcing {} to {} failed: {}", scene_id, participant, e);
            }
        }
    }

    /// Tell everyone who could see a scene that it is gone
    pub fn announce_unpublished(&mut self, scene_id: SceneId, mode: PublicationMode, transport: &dyn Transport) {
        let message = Message::ScenesUnavailable {
            scenes: vec![scene_id],
        };
        for participant in self.audience(mode, transport) {
            if let Err(e) = transport.send(participant, &message) {
                log::warn!("Withdrawing {} from {} failed: {}", scene_id, participant, e);
            }
        }
        if let Some(scene) = self.scenes.get_mut(&scene_id) {
            scene.resync.clear();
            scene.needs_resync = false;
        }
    }

    fn audience(&self, mode: PublicationMode, transport: &dyn Transport) -> Vec<ParticipantId> {
        let mut audience = vec![self.local_id];
        if mode == PublicationMode::LocalAndRemote && self.networked {
            audience.extend(transport.connected_peers());
        }
        audience
    }

    /// A participant asked for a scene: register it and send a snapshot
    pub fn on_participant_subscribed(
        &mut self,
        participant: ParticipantId,
        scene_id: SceneId,
        transport: &dyn Transport,
    ) {
        if participant != self.local_id && !self.networked {
            log::warn!("{} asked for {} while disconnected from the network", participant, scene_id);
            self.refuse(participant, scene_id, transport);
            return;
        }
        if !self.scenes.contains_key(&scene_id) {
            log::warn!("{} asked for {} which is not provided here", participant, scene_id);
            self.refuse(participant, scene_id, transport);
            return;
        }
        if let Err(e) = self.registry.subscribe(scene_id, participant) {
            log::warn!("Subscription of {} to {} refused: {}", participant, scene_id, e);
            self.refuse(participant, scene_id, transport);
            return;
        }
        if let Some(scene) = self.scenes.get_mut(&scene_id) {
            scene.resync.remove(&participant);
        }
        self.send_snapshot(scene_id, participant, false, transport);
    }

    fn refuse(&self, participant: ParticipantId, scene_id: SceneId, transport: &dyn Transport) {
        let _ = transport.send(
            participant,
            &Message::ScenesUnavailable {
                scenes: vec![scene_id],
            },
        );
    }

    /// A participant stopped listening to a scene
    pub fn on_participant_unsubscribed(&mut self, participant: ParticipantId, scene_id: SceneId) {
        self.registry.unsubscribe(scene_id, participant);
        if let Some(scene) = self.scenes.get_mut(&scene_id) {
            scene.resync.remove(&participant);
        }
    }

    /// A subscriber lost sync
    pub fn on_resync_requested(&mut self, participant: ParticipantId, scene_id: SceneId, transport: &dyn Transport) {
        if !self.registry.is_subscribed(scene_id, participant) {
            log::warn!("Resync of {} requested by non-subscriber {}", scene_id, participant);
            return;
        }
        log::info!("{} requested a resync of {}", participant, scene_id);
        if let Some(scene) = self.scenes.get_mut(&scene_id) {
            scene.resync.remove(&participant);
        }
        self.send_snapshot(scene_id, participant, false, transport);
    }

    /// Distribute a flush produced by a local scene
    pub fn on_flush_ready(&mut self, flush: Flush, transport: &dyn Transport) {
        self.stats.flushes_received += 1;
        let scene_id = flush.scene_id;
        let Some(scene) = self.scenes.get_mut(&scene_id) else {
            log::warn!("Flush {} for unknown {} dropped", flush.sequence, scene_id);
            return;
        };

        if flush.is_snapshot() {
            scene.shadow.clear();
        }
        if let Err(e) = scene.shadow.apply_all(flush.actions.iter()) {
            log::error!("Shadow of {} diverged at flush {}: {}", scene_id, flush.sequence, e);
            scene.needs_resync = true;
        }
        scene.last_sequence = flush.sequence;
        scene.epoch = flush.epoch;
        if flush.version_tag.is_some() {
            scene.version_tag = flush.version_tag;
        }

        let subscribers = self.registry.subscribers(scene_id);
        if subscribers.is_empty() {
            log::trace!("{} flush {} has no subscribers", scene_id, flush.sequence);
            return;
        }

        if flush.counter_wrapped || scene.needs_resync {
            scene.needs_resync = false;
            scene.resync.clear();
            log::info!(
                "{} flush {} goes out as a snapshot to {} subscribers",
                scene_id,
                flush.sequence,
                subscribers.len()
            );
            for participant in subscribers {
                self.send_snapshot(scene_id, participant, flush.counter_wrapped, transport);
            }
            return;
        }

        let mode = self.registry.publication_mode(scene_id);
        let message = match SceneUpdate::from_flush(&flush, mode) {
            Ok(update) => Message::SceneUpdate(update),
            Err(e) => {
                log::error!("{} flush {} could not be encoded: {}", scene_id, flush.sequence, e);
                self.resync_all(scene_id, subscribers, transport);
                return;
            }
        };
        let size = bincode::serialized_size(&message).unwrap_or(u64::MAX);
        if size > self.config.max_message_size as u64 {
            log::error!(
                "{} flush {} is {} bytes, over the {} byte limit",
                scene_id,
                flush.sequence,
                size,
                self.config.max_message_size
            );
            self.resync_all(scene_id, subscribers, transport);
            return;
        }

        for participant in subscribers {
            let behind = self
                .scenes
                .get_mut(&scene_id)
                .map(|scene| scene.resync.remove(&participant))
                .unwrap_or(false);
            if behind {
                self.send_snapshot(scene_id, participant, false, transport);
                continue;
            }

            self.announce_resources(participant, &flush.resources, transport);
            match transport.send(participant, &message) {
                Ok(()) => {
                    self.stats.deltas_sent += 1;
                    self.stats.delta_bytes += size;
                    log::trace!("{} flush {} sent to {}", scene_id, flush.sequence, participant);
                }
                Err(e) => {
                    log::warn!(
                        "{} flush {} to {} failed, resync pending: {}",
                        scene_id,
                        flush.sequence,
                        participant,
                        e
                    );
                    self.stats.send_failures += 1;
                    if let Some(scene) = self.scenes.get_mut(&scene_id) {
                        scene.resync.insert(participant);
                    }
                }
            }
        }
    }

    fn resync_all(&mut self, scene_id: SceneId, subscribers: Vec<ParticipantId>, transport: &dyn Transport) {
        self.stats.oversized_flushes += 1;
        if let Some(scene) = self.scenes.get_mut(&scene_id) {
            scene.resync.clear();
        }
        for participant in subscribers {
            self.send_snapshot(scene_id, participant, false, transport);
        }
    }

    /// Send the shadow's current state to one participant.
    ///
    /// On failure the participant stays marked for resync.
    fn send_snapshot(
        &mut self,
        scene_id: SceneId,
        participant: ParticipantId,
        counter_wrapped: bool,
        transport: &dyn Transport,
    ) {
        let Some(scene) = self.scenes.get(&scene_id) else {
            return;
        };
        let mut snapshot = scene.snapshot(scene_id);
        snapshot.counter_wrapped = counter_wrapped;

        let mode = self.registry.publication_mode(scene_id);
        let message = match SceneUpdate::from_flush(&snapshot, mode) {
            Ok(update) => Message::SceneUpdate(update),
            Err(e) => {
                log::error!("Snapshot of {} could not be encoded: {}", scene_id, e);
                return;
            }
        };

        self.announce_resources(participant, &snapshot.resources, transport);
        match transport.send(participant, &message) {
            Ok(()) => {
                self.stats.snapshots_sent += 1;
                log::info!(
                    "Snapshot of {} at sequence {} ({} actions) sent to {}",
                    scene_id,
                    snapshot.sequence,
                    snapshot.len(),
                    participant
                );
            }
            Err(e) => {
                log::warn!("Snapshot of {} to {} failed: {}", scene_id, participant, e);
                self.stats.send_failures += 1;
                if let Some(scene) = self.scenes.get_mut(&scene_id) {
                    scene.resync.insert(participant);
                }
            }
        }
    }

    /// Announce hashes the participant has not heard about yet
    fn announce_resources(&mut self, participant: ParticipantId, hashes: &[ResourceHash], transport: &dyn Transport) {
        for &hash in hashes {
            let known = self
                .announced
                .get(&participant)
                .map(|announced| announced.contains_key(&hash))
                .unwrap_or(false);
            if known {
                continue;
            }
            // Not resident here yet, announced once it arrives
            let Some(info) = self.store.info(hash) else {
                continue;
            };
            let announcement = ResourceAnnouncement {
                hash,
                size: info.size as u64,
                kind: info.kind,
                availability: ResourceAvailability::Available,
            };
            if transport
                .send(participant, &Message::ResourceAnnouncement(announcement.clone()))
                .is_ok()
            {
                self.stats.resources_announced += 1;
                self.announced
                    .entry(participant)
                    .or_default()
                    .insert(hash, announcement);
            }
        }
    }

    /// Answer a resource request with payloads
    pub fn on_resource_request(
        &mut self,
        participant: ParticipantId,
        hashes: &[ResourceHash],
        transport: &dyn Transport,
    ) {
        for &hash in hashes {
            let Some(resource) = self.store.get(hash) else {
                log::warn!("{} requested unknown resource {}", participant, hash);
                self.stats.unknown_resource_requests += 1;
                continue;
            };
            let message = Message::ResourceData(ResourceData::from_resource(&resource));
            match transport.send(participant, &message) {
                Ok(()) => {
                    self.stats.resources_served += 1;
                    log::debug!("Resource {} ({} bytes) sent to {}", hash, resource.size(), participant);
                }
                Err(e) => log::warn!("Resource {} to {} failed: {}", hash, participant, e),
            }
        }
    }

    /// A hash became resident: announce it to subscribers of scenes that use it
    pub fn on_resource_available(&mut self, hash: ResourceHash, transport: &dyn Transport) {
        let mut participants = BTreeSet::new();
        for (&scene_id, scene) in &self.scenes {
            if scene.shadow.referenced_resources().contains(&hash) {
                participants.extend(self.registry.subscribers(scene_id));
            }
        }
        for participant in participants {
            self.announce_resources(participant, &[hash], transport);
        }
    }

    /// A hash was evicted: revoke it wherever it was announced
    pub fn on_resource_evicted(&mut self, hash: ResourceHash, transport: &dyn Transport) {
        for (&participant, announced) in self.announced.iter_mut() {
            let Some(mut announcement) = announced.remove(&hash) else {
                continue;
            };
            announcement.availability = ResourceAvailability::Revoked;
            if transport
                .send(participant, &Message::ResourceAnnouncement(announcement))
                .is_ok()
            {
                self.stats.resources_revoked += 1;
            }
        }
    }

    /// A participant connected: tell it about every networked scene
    pub fn on_participant_connected(&mut self, participant: ParticipantId, transport: &dyn Transport) {
        let reconnected = self.registry.participant_connected(participant);
        if !self.networked {
            return;
        }
        let scenes: Vec<SceneInfo> = self
            .registry
            .scenes_with_mode(PublicationMode::LocalAndRemote)
            .into_iter()
            .map(|info| SceneInfo {
                scene_id: info.scene_id,
                name: info.name,
                mode: info.mode,
            })
            .collect();
        if scenes.is_empty() {
            return;
        }
        log::info!(
            "Offering {} scenes to {}{}",
            scenes.len(),
            participant,
            if reconnected { " (reconnect)" } else { "" }
        );
        if let Err(e) = transport.send(participant, &Message::ScenesAvailable { scenes }) {
            log::warn!("Offering scenes to {} failed: {}", participant, e);
        }
    }

    /// A participant went away: drop it from every subscriber set.
    ///
    /// Sequence counters keep advancing; a later subscriber starts from a snapshot.
    pub fn on_participant_disconnected(&mut self, participant: ParticipantId) {
        let scenes = self.registry.participant_disconnected(participant);
        for scene_id in scenes {
            if self.registry.subscribers(scene_id).is_empty() {
                log::info!("{} has no subscribers left", scene_id);
            }
        }
        for scene in self.scenes.values_mut() {
            scene.resync.remove(&participant);
        }
        self.announced.remove(&participant);
    }

    /// Withdraw networked scenes from every remote participant and drop
    /// remote subscribers
    pub fn disconnect_from_network(&mut self, transport: &dyn Transport) {
        if !self.networked {
            return;
        }
        let networked = self.registry.scenes_with_mode(PublicationMode::LocalAndRemote);
        let scenes: Vec<SceneId> = networked.iter().map(|info| info.scene_id).collect();
        if !scenes.is_empty() {
            let message = Message::ScenesUnavailable { scenes };
            for participant in transport.connected_peers() {
                if let Err(e) = transport.send(participant, &message) {
                    log::warn!("Withdrawing scenes from {} failed: {}", participant, e);
                }
            }
        }

        for info in &networked {
            for participant in &info.subscribers {
                if *participant != self.local_id {
                    self.registry.unsubscribe(info.scene_id, *participant);
                }
            }
        }
        let local_id = self.local_id;
        self.announced.retain(|participant, _| *participant == local_id);
        for scene in self.scenes.values_mut() {
            scene.resync.retain(|participant| *participant == local_id);
        }
        self.networked = false;
        log::info!("Disconnected from network, {} scenes withdrawn", networked.len());
    }

    /// Offer networked scenes to remote participants again
    pub fn connect_to_network(&mut self, transport: &dyn Transport) {
        if self.networked {
            return;
        }
        self.networked = true;
        for participant in transport.connected_peers() {
            self.on_participant_connected(participant, transport);
        }
        log::info!("Reconnected to network");
    }

    pub fn is_networked(&self) -> bool {
        self.networked
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    /// Log one line per provided scene
    pub fn log_summary(&self) {
        let mut ids: Vec<_> = self.scenes.keys().copied().collect();
        ids.sort();
        log::info!(
            "Sender: {} scenes, {} flushes, {} deltas, {} snapshots, {} send failures",
            ids.len(),
            self.stats.flushes_received,
            self.stats.deltas_sent,
            self.stats.snapshots_sent,
            self.stats.send_failures
        );
        for scene_id in ids {
            if let Some(scene) = self.scenes.get(&scene_id) {
                log::info!(
                    "  {} '{}': seq {}, {} objects, {:?}, {} subscribers",
                    scene_id,
                    scene.name,
                    scene.last_sequence,
                    scene.shadow.len(),
                    self.registry.publication_mode(scene_id),
                    self.registry.subscribers(scene_id).len()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LocalHub, TransportEvent};
    use scenecast_ir::{ClientScene, FlushOptions, SceneAction, SEQUENCE_WRAP_AROUND};
    use scenecast_resource::{ResourceKind, ResourceStoreConfig};

    const PROVIDER: ParticipantId = ParticipantId::new(1);
    const REMOTE: ParticipantId = ParticipantId::new(2);
    const SCENE: SceneId = SceneId::new(7);

    struct Fixture {
        hub: LocalHub,
        provider: crate::transport::HubEndpoint,
        remote: crate::transport::HubEndpoint,
        sender: SceneGraphSender,
        scene: ClientScene,
    }

    fn fixture() -> Fixture {
        let hub = LocalHub::default();
        let provider = hub.endpoint(PROVIDER);
        let remote = hub.endpoint(REMOTE);
        hub.connect(PROVIDER, REMOTE);
        drain(&provider);
        drain(&remote);

        let store = ResourceStore::new(ResourceStoreConfig::development());
        let registry = Arc::new(PublicationRegistry::new(PROVIDER));
        let mut sender = SceneGraphSender::new(SenderConfig::default(), registry, store.clone());
        sender.add_scene(SCENE, "test");
        let scene = ClientScene::new(SCENE, "test", store, SEQUENCE_WRAP_AROUND);
        Fixture {
            hub,
            provider,
            remote,
            sender,
            scene,
        }
    }

    fn drain(endpoint: &crate::transport::HubEndpoint) -> Vec<Message> {
        endpoint
            .events()
            .try_iter()
            .filter_map(|event| match event {
                TransportEvent::Received { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    fn updates(messages: &[Message]) -> Vec<&SceneUpdate> {
        messages
            .iter()
            .filter_map(|message| match message {
                Message::SceneUpdate(update) => Some(update),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_publish_announces_to_local_and_remote() {
        let mut f = fixture();
        f.sender
            .publish(SCENE, PublicationMode::LocalAndRemote, &f.provider)
            .unwrap();
        assert!(matches!(&drain(&f.provider)[..], [Message::ScenesAvailable { .. }]));
        assert!(matches!(&drain(&f.remote)[..], [Message::ScenesAvailable { .. }]));

        f.sender.unpublish(SCENE, &f.provider).unwrap();
        assert_eq!(
            drain(&f.remote),
            vec![Message::ScenesUnavailable { scenes: vec![SCENE] }]
        );
        assert!(f.sender.unpublish(SCENE, &f.provider).is_err());
    }

    #[test]
    fn test_local_only_is_not_offered_remotely() {
        let mut f = fixture();
        f.sender.publish(SCENE, PublicationMode::LocalOnly, &f.provider).unwrap();
        assert_eq!(drain(&f.provider).len(), 1);
        assert!(drain(&f.remote).is_empty());

        f.sender.on_participant_subscribed(REMOTE, SCENE, &f.provider);
        assert_eq!(
            drain(&f.remote),
            vec![Message::ScenesUnavailable { scenes: vec![SCENE] }]
        );
    }

    #[test]
    fn test_late_subscriber_gets_snapshot_then_deltas() {
        let mut f = fixture();
        f.sender
            .publish(SCENE, PublicationMode::LocalAndRemote, &f.provider)
            .unwrap();
        drain(&f.remote);

        let node = f.scene.create_node("root").unwrap();
        let flush = f.scene.flush(FlushOptions::new()).unwrap();
        f.sender.on_flush_ready(flush, &f.provider);
        assert!(drain(&f.remote).is_empty());

        f.sender.on_participant_subscribed(REMOTE, SCENE, &f.provider);
        let received = drain(&f.remote);
        let snapshot = updates(&received);
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].is_snapshot());
        assert_eq!(snapshot[0].sequence, 1);

        f.scene
            .apply(SceneAction::SetTranslation {
                node,
                value: [1.0, 2.0, 3.0],
            })
            .unwrap();
        let flush = f.scene.flush(FlushOptions::new()).unwrap();
        f.sender.on_flush_ready(flush, &f.provider);

        let received = drain(&f.remote);
        let delta = updates(&received);
        assert_eq!(delta.len(), 1);
        assert!(!delta[0].is_snapshot());
        assert_eq!(delta[0].sequence, 2);
        assert_eq!(f.sender.stats().snapshots_sent, 1);
        assert_eq!(f.sender.stats().deltas_sent, 1);
    }

    #[test]
    fn test_failed_send_resyncs_only_that_subscriber() {
        let mut f = fixture();
        f.sender
            .publish(SCENE, PublicationMode::LocalAndRemote, &f.provider)
            .unwrap();
        f.sender.on_participant_subscribed(PROVIDER, SCENE, &f.provider);
        f.sender.on_participant_subscribed(REMOTE, SCENE, &f.provider);
        drain(&f.provider);
        drain(&f.remote);

        f.hub.set_fault(PROVIDER, REMOTE, Some(crate::transport::HubFault::Fail));
        f.scene.create_node("a").unwrap();
        let flush = f.scene.flush(FlushOptions::new()).unwrap();
        f.sender.on_flush_ready(flush, &f.provider);
        assert_eq!(updates(&drain(&f.provider)).len(), 1);
        assert_eq!(f.sender.stats().send_failures, 1);

        f.hub.set_fault(PROVIDER, REMOTE, None);
        f.scene.create_node("b").unwrap();
        let flush = f.scene.flush(FlushOptions::new()).unwrap();
        f.sender.on_flush_ready(flush, &f.provider);

        let local = drain(&f.provider);
        assert!(!updates(&local)[0].is_snapshot());
        let remote = drain(&f.remote);
        let remote_updates = updates(&remote);
        assert_eq!(remote_updates.len(), 1);
        assert!(remote_updates[0].is_snapshot());
        assert_eq!(remote_updates[0].sequence, 2);
    }

    #[test]
    fn test_oversized_flush_becomes_snapshot() {
        let mut f = fixture();
        f.sender.config.max_message_size = 64;
        f.sender.publish(SCENE, PublicationMode::LocalOnly, &f.provider).unwrap();
        f.sender.on_participant_subscribed(PROVIDER, SCENE, &f.provider);
        drain(&f.provider);

        for i in 0..8 {
            f.scene.create_node(format!("node-{}", i)).unwrap();
        }
        let flush = f.scene.flush(FlushOptions::new()).unwrap();
        f.sender.on_flush_ready(flush, &f.provider);
        assert_eq!(f.sender.stats().oversized_flushes, 1);
        assert_eq!(f.sender.shadow(SCENE).unwrap().len(), 8);
    }

    #[test]
    fn test_wrapped_counter_sends_snapshot() {
        let mut f = fixture();
        f.scene = ClientScene::new(SCENE, "test", f.sender.store.clone(), 3);
        f.sender.publish(SCENE, PublicationMode::LocalOnly, &f.provider).unwrap();
        f.sender.on_participant_subscribed(PROVIDER, SCENE, &f.provider);
        drain(&f.provider);

        let mut kinds = Vec::new();
        for i in 0..3 {
            f.scene.create_node(format!("n{}", i)).unwrap();
            let flush = f.scene.flush(FlushOptions::new()).unwrap();
            f.sender.on_flush_ready(flush, &f.provider);
            for update in updates(&drain(&f.provider)) {
                kinds.push((update.sequence, update.is_snapshot(), update.counter_wrapped, update.epoch));
            }
        }
        assert_eq!(
            kinds,
            vec![(1, false, false, 0), (2, false, false, 0), (1, true, true, 1)]
        );

        // Later snapshots stay in the new epoch
        f.sender.on_resync_requested(PROVIDER, SCENE, &f.provider);
        let messages = drain(&f.provider);
        let resync = updates(&messages);
        assert_eq!(resync.len(), 1);
        assert!(resync[0].is_snapshot() && !resync[0].counter_wrapped);
        assert_eq!((resync[0].epoch, resync[0].sequence), (1, 1));
    }

    #[test]
    fn test_resources_announced_served_and_revoked() {
        let mut f = fixture();
        f.sender
            .publish(SCENE, PublicationMode::LocalAndRemote, &f.provider)
            .unwrap();
        f.sender.on_participant_subscribed(REMOTE, SCENE, &f.provider);
        drain(&f.remote);

        let hash = f
            .sender
            .store
            .put(ResourceKind::IndexArray, "indices", vec![0u8, 1, 2])
            .unwrap();
        let renderable = f.scene.allocate_handle();
        f.scene
            .apply(SceneAction::AllocateRenderable {
                handle: renderable,
                node: None,
            })
            .unwrap();
        f.scene
            .apply(SceneAction::SetRenderableResources {
                renderable,
                indices: Some(hash),
                vertices: Vec::new(),
            })
            .unwrap();
        let flush = f.scene.flush(FlushOptions::new()).unwrap();
        f.sender.on_flush_ready(flush, &f.provider);

        let received = drain(&f.remote);
        assert!(matches!(
            &received[0],
            Message::ResourceAnnouncement(a) if a.hash == hash && a.availability == ResourceAvailability::Available
        ));
        assert!(matches!(&received[1], Message::SceneUpdate(_)));

        f.sender.on_resource_request(REMOTE, &[hash], &f.provider);
        assert!(matches!(&drain(&f.remote)[..], [Message::ResourceData(data)] if data.hash == hash));

        f.sender.on_resource_evicted(hash, &f.provider);
        assert!(matches!(
            &drain(&f.remote)[..],
            [Message::ResourceAnnouncement(a)] if a.availability == ResourceAvailability::Revoked
        ));
    }

    #[test]
    fn test_disconnect_from_network() {
        let mut f = fixture();
        f.sender
            .publish(SCENE, PublicationMode::LocalAndRemote, &f.provider)
            .unwrap();
        f.sender.on_participant_subscribed(PROVIDER, SCENE, &f.provider);
        f.sender.on_participant_subscribed(REMOTE, SCENE, &f.provider);
        drain(&f.remote);

        f.sender.disconnect_from_network(&f.provider);
        assert_eq!(
            drain(&f.remote),
            vec![Message::ScenesUnavailable { scenes: vec![SCENE] }]
        );
        assert_eq!(f.sender.registry.subscribers(SCENE), vec![PROVIDER]);

        f.sender.on_participant_subscribed(REMOTE, SCENE, &f.provider);
        assert_eq!(f.sender.registry.subscribers(SCENE), vec![PROVIDER]);

        f.sender.connect_to_network(&f.provider);
        assert!(matches!(&drain(&f.remote)[..], [Message::ScenesUnavailable { .. }, Message::ScenesAvailable { .. }]));
    }
}
