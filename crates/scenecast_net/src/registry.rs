//! Publication/Subscription Registry
//!
//! Pure bookkeeping: which scenes are published, in which mode, by whom,
//! and who subscribes to them, plus the liveness of remote participants.
//! No replay logic lives here. It answers "who should the sender fan out
//! to" and "is this scene active".
//!
//! Reads vastly outnumber writes, so the tables sit behind `RwLock`s.

use parking_lot::RwLock;
use scenecast_ir::{ParticipantId, SceneId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use crate::error::RegistryError;

/// How far a scene's updates reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PublicationMode {
    #[default]
    Unpublished,
    /// Only consumers in the providing process may subscribe
    LocalOnly,
    /// Remote participants may subscribe as well
    LocalAndRemote,
}

/// Per-scene publication record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedSceneInfo {
    pub scene_id: SceneId,
    pub name: String,
    pub mode: PublicationMode,
    pub provider: ParticipantId,
    pub subscribers: BTreeSet<ParticipantId>,
}

/// Connectivity of a remote participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Per-participant connection record
#[derive(Debug, Clone)]
pub struct ConnectionStatusInfo {
    pub participant: ParticipantId,
    pub state: ConnectionState,
    /// When the current connection was established
    pub connected_since: Option<Instant>,
    /// Number of times the participant connected after a disconnect
    pub reconnects: u32,
}

/// Registry of published scenes and participant connectivity
pub struct PublicationRegistry {
    local_id: ParticipantId,
    scenes: RwLock<HashMap<SceneId, PublishedSceneInfo>>,
    connections: RwLock<HashMap<ParticipantId, ConnectionStatusInfo>>,
}

impl PublicationRegistry {
    /// Create a registry for the given local participant
    pub fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            scenes: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    /// Publish a scene provided by the local participant
    pub fn publish(
        &self,
        scene_id: SceneId,
        name: impl Into<String>,
        mode: PublicationMode,
    ) -> Result<(), RegistryError> {
        if mode == PublicationMode::Unpublished {
            return Err(RegistryError::NotPublished(scene_id));
        }
        let mut scenes = self.scenes.write();
        if scenes.contains_key(&scene_id) {
            return Err(RegistryError::AlreadyPublished(scene_id));
        }
        scenes.insert(
            scene_id,
            PublishedSceneInfo {
                scene_id,
                name: name.into(),
                mode,
                provider: self.local_id,
                subscribers: BTreeSet::new(),
            },
        );
        log::info!("Published {} ({:?})", scene_id, mode);
        Ok(())
    }

    /// Remove a publication, returning its last record
    pub fn unpublish(&self, scene_id: SceneId) -> Option<PublishedSceneInfo> {
        let removed = self.scenes.write().remove(&scene_id);
        if removed.is_some() {
            log::info!("Unpublished {}", scene_id);
        }
        removed
    }

    /// Add a subscriber. Returns `false` if it was already subscribed.
    pub fn subscribe(&self, scene_id: SceneId, participant: ParticipantId) -> Result<bool, RegistryError> {
        let mut scenes = self.scenes.write();
        let info = scenes
            .get_mut(&scene_id)
            .ok_or(RegistryError::NotPublished(scene_id))?;
        if info.mode == PublicationMode::LocalOnly && participant != self.local_id {
            return Err(RegistryError::NotNetworked {
                scene: scene_id,
                participant,
            });
        }
        let added = info.subscribers.insert(participant);
        if added {
            log::info!("{} subscribed to {}", participant, scene_id);
        }
        Ok(added)
    }

    /// Remove a subscriber. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, scene_id: SceneId, participant: ParticipantId) -> bool {
        let removed = self
            .scenes
            .write()
            .get_mut(&scene_id)
            .map(|info| info.subscribers.remove(&participant))
            .unwrap_or(false);
        if removed {
            log::info!("{} unsubscribed from {}", participant, scene_id);
        }
        removed
    }

    /// Current subscribers of a scene
    pub fn subscribers(&self, scene_id: SceneId) -> Vec<ParticipantId> {
        self.scenes
            .read()
            .get(&scene_id)
            .map(|info| info.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Check whether a participant subscribes to a scene
    pub fn is_subscribed(&self, scene_id: SceneId, participant: ParticipantId) -> bool {
        self.scenes
            .read()
            .get(&scene_id)
            .map(|info| info.subscribers.contains(&participant))
            .unwrap_or(false)
    }

    /// Publication mode of a scene, `Unpublished` if unknown
    pub fn publication_mode(&self, scene_id: SceneId) -> PublicationMode {
        self.scenes
            .read()
            .get(&scene_id)
            .map(|info| info.mode)
            .unwrap_or_default()
    }

    /// Publication record of a scene
    pub fn scene_info(&self, scene_id: SceneId) -> Option<PublishedSceneInfo> {
        self.scenes.read().get(&scene_id).cloned()
    }

    /// Scenes published with the given mode, sorted by ID
    pub fn scenes_with_mode(&self, mode: PublicationMode) -> Vec<PublishedSceneInfo> {
        let mut scenes: Vec<_> = self
            .scenes
            .read()
            .values()
            .filter(|info| info.mode == mode)
            .cloned()
            .collect();
        scenes.sort_by_key(|info| info.scene_id);
        scenes
    }

    /// Record a (re)connection. Returns `true` if the participant was seen before.
    pub fn participant_connected(&self, participant: ParticipantId) -> bool {
        let mut connections = self.connections.write();
        match connections.get_mut(&participant) {
            Some(status) => {
                status.state = ConnectionState::Connected;
                status.connected_since = Some(Instant::now());
                status.reconnects += 1;
                log::info!("{} reconnected", participant);
                true
            }
            None => {
                connections.insert(
                    participant,
                    ConnectionStatusInfo {
                        participant,
                        state: ConnectionState::Connected,
                        connected_since: Some(Instant::now()),
                        reconnects: 0,
                    },
                );
                log::info!("{} connected", participant);
                false
            }
        }
    }

    /// Record a disconnect and drop the participant from every subscriber set.
    ///
    /// Returns the scenes it was unsubscribed from.
    pub fn participant_disconnected(&self, participant: ParticipantId) -> Vec<SceneId> {
        if let Some(status) = self.connections.write().get_mut(&participant) {
            status.state = ConnectionState::Disconnected;
            status.connected_since = None;
        }

        let mut unsubscribed: Vec<SceneId> = self
            .scenes
            .write()
            .values_mut()
            .filter_map(|info| info.subscribers.remove(&participant).then_some(info.scene_id))
            .collect();
        unsubscribed.sort();
        log::info!(
            "{} disconnected, removed from {} subscriber sets",
            participant,
            unsubscribed.len()
        );
        unsubscribed
    }

    /// Connection record of a participant
    pub fn connection_status(&self, participant: ParticipantId) -> Option<ConnectionStatusInfo> {
        self.connections.read().get(&participant).cloned()
    }

    /// Check whether a participant is currently connected
    pub fn is_connected(&self, participant: ParticipantId) -> bool {
        self.connections
            .read()
            .get(&participant)
            .map(|status| status.state == ConnectionState::Connected)
            .unwrap_or(false)
    }

    /// Currently connected remote participants, sorted
    pub fn connected_participants(&self) -> Vec<ParticipantId> {
        let mut participants: Vec<_> = self
            .connections
            .read()
            .values()
            .filter(|status| status.state == ConnectionState::Connected)
            .map(|status| status.participant)
            .collect();
        participants.sort();
        participants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: ParticipantId = ParticipantId::new(1);
    const REMOTE: ParticipantId = ParticipantId::new(2);

    #[test]
    fn test_publish_and_subscribe() {
        let registry = PublicationRegistry::new(LOCAL);
        let scene = SceneId::new(10);

        assert_eq!(registry.publication_mode(scene), PublicationMode::Unpublished);
        registry.publish(scene, "main", PublicationMode::LocalAndRemote).unwrap();
        assert_eq!(
            registry.publish(scene, "again", PublicationMode::LocalOnly),
            Err(RegistryError::AlreadyPublished(scene))
        );

        assert!(registry.subscribe(scene, REMOTE).unwrap());
        assert!(!registry.subscribe(scene, REMOTE).unwrap());
        assert_eq!(registry.subscribers(scene), vec![REMOTE]);

        assert!(registry.unsubscribe(scene, REMOTE));
        assert!(!registry.unsubscribe(scene, REMOTE));
        assert!(registry.subscribers(scene).is_empty());
    }

    #[test]
    fn test_local_only_rejects_remote() {
        let registry = PublicationRegistry::new(LOCAL);
        let scene = SceneId::new(1);
        registry.publish(scene, "private", PublicationMode::LocalOnly).unwrap();

        assert!(registry.subscribe(scene, LOCAL).unwrap());
        assert_eq!(
            registry.subscribe(scene, REMOTE),
            Err(RegistryError::NotNetworked { scene, participant: REMOTE })
        );
    }

    #[test]
    fn test_subscribe_unpublished() {
        let registry = PublicationRegistry::new(LOCAL);
        assert_eq!(
            registry.subscribe(SceneId::new(5), REMOTE),
            Err(RegistryError::NotPublished(SceneId::new(5)))
        );
    }

    #[test]
    fn test_disconnect_unsubscribes_everywhere() {
        let registry = PublicationRegistry::new(LOCAL);
        for raw in 1..=3 {
            registry
                .publish(SceneId::new(raw), "s", PublicationMode::LocalAndRemote)
                .unwrap();
        }
        assert!(!registry.participant_connected(REMOTE));
        registry.subscribe(SceneId::new(1), REMOTE).unwrap();
        registry.subscribe(SceneId::new(3), REMOTE).unwrap();

        let removed = registry.participant_disconnected(REMOTE);
        assert_eq!(removed, vec![SceneId::new(1), SceneId::new(3)]);
        assert!(!registry.is_connected(REMOTE));
        assert!(registry.subscribers(SceneId::new(1)).is_empty());

        assert!(registry.participant_connected(REMOTE));
        assert_eq!(registry.connection_status(REMOTE).unwrap().reconnects, 1);
        assert_eq!(registry.connected_participants(), vec![REMOTE]);
    }

    #[test]
    fn test_unpublish_returns_record() {
        let registry = PublicationRegistry::new(LOCAL);
        let scene = SceneId::new(4);
        registry.publish(scene, "s", PublicationMode::LocalOnly).unwrap();
        let info = registry.unpublish(scene).unwrap();
        assert_eq!(info.name, "s");
        assert_eq!(info.provider, LOCAL);
        assert!(registry.unpublish(scene).is_none());
        assert_eq!(registry.scenes_with_mode(PublicationMode::LocalOnly).len(), 0);
    }
}
