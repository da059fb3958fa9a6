//! Transports
//!
//! A [`Transport`] moves [`Message`]s between participants with per-pair
//! ordering and reports connectivity as [`TransportEvent`]s. Connection
//! establishment itself is outside the framework: transports only report
//! that a participant became available or went away.
//!
//! [`LocalHub`] is the in-process transport. Every message still goes
//! through the wire codec, so a hub exercises exactly the bytes a socket
//! would carry.
//!
//! ```text
//! HubEndpoint(A) ──send──► encode ──► decode ──► queue(B) ──► HubEndpoint(B)::events
//! ```

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use scenecast_ir::ParticipantId;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::config::FrameworkConfig;
use crate::error::TransportError;
use crate::message::{decode_message, encode_message, Message, MAX_MESSAGE_SIZE};

/// Something that happened on a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A participant became reachable
    Connected(ParticipantId),
    /// A participant went away
    Disconnected(ParticipantId),
    /// A message arrived
    Received {
        from: ParticipantId,
        message: Message,
    },
}

/// Ordered message delivery between participants
pub trait Transport: Send + Sync {
    /// Participant this transport sends as
    fn local_id(&self) -> ParticipantId;

    /// Queue a message for `to`. Sending to [`Transport::local_id`] loops back.
    ///
    /// Never blocks on a slow peer: a full queue is reported as
    /// [`TransportError::QueueFull`].
    fn send(&self, to: ParticipantId, message: &Message) -> Result<(), TransportError>;

    /// Currently connected remote participants
    fn connected_peers(&self) -> Vec<ParticipantId>;

    /// Receiver for inbound events
    fn events(&self) -> Receiver<TransportEvent>;
}

/// Fault injected on one direction of a hub link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubFault {
    /// Sends report success but never arrive
    Drop,
    /// Sends fail with [`TransportError::SendFailed`]
    Fail,
}

/// Hub configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub max_message_size: usize,
    /// Undelivered messages an endpoint may hold before sends to it fail
    pub send_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            send_queue_capacity: 1024,
        }
    }
}

impl HubConfig {
    pub fn from_framework(config: &FrameworkConfig) -> Self {
        Self {
            max_message_size: config.protocol.max_message_size,
            send_queue_capacity: config.transport.send_queue_capacity,
        }
    }
}

/// Hub statistics
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub messages_delivered: u64,
    pub bytes_delivered: u64,
    pub messages_dropped: u64,
    pub sends_failed: u64,
}

#[derive(Default)]
struct HubState {
    endpoints: HashMap<ParticipantId, Sender<TransportEvent>>,
    /// Undirected links, stored as (lower, higher)
    links: HashSet<(ParticipantId, ParticipantId)>,
    /// Directed faults, (from, to)
    faults: HashMap<(ParticipantId, ParticipantId), HubFault>,
    stats: HubStats,
}

fn link_key(a: ParticipantId, b: ParticipantId) -> (ParticipantId, ParticipantId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// In-process transport connecting any number of endpoints
#[derive(Clone)]
pub struct LocalHub {
    config: HubConfig,
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    /// Create a hub
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HubState::default())),
        }
    }

    /// Attach an endpoint for `id`. An existing endpoint with the same ID is replaced.
    pub fn endpoint(&self, id: ParticipantId) -> HubEndpoint {
        let (sender, receiver) = unbounded();
        if self.state.lock().endpoints.insert(id, sender).is_some() {
            log::warn!("Hub endpoint {} replaced", id);
        }
        log::debug!("Hub endpoint {} attached", id);
        HubEndpoint {
            id,
            hub: self.clone(),
            events: receiver,
        }
    }

    /// Link two endpoints. Both sides see a `Connected` event.
    ///
    /// Returns `false` if either endpoint is missing or they are already linked.
    pub fn connect(&self, a: ParticipantId, b: ParticipantId) -> bool {
        let mut state = self.state.lock();
        if a == b || !state.endpoints.contains_key(&a) || !state.endpoints.contains_key(&b) {
            return false;
        }
        if !state.links.insert(link_key(a, b)) {
            return false;
        }
        notify(&state, a, TransportEvent::Connected(b));
        notify(&state, b, TransportEvent::Connected(a));
        log::info!("Hub linked {} <-> {}", a, b);
        true
    }

    /// Unlink two endpoints. Both sides see a `Disconnected` event.
    pub fn disconnect(&self, a: ParticipantId, b: ParticipantId) -> bool {
        let mut state = self.state.lock();
        if !state.links.remove(&link_key(a, b)) {
            return false;
        }
        notify(&state, a, TransportEvent::Disconnected(b));
        notify(&state, b, TransportEvent::Disconnected(a));
        log::info!("Hub unlinked {} <-> {}", a, b);
        true
    }

    /// Inject (or with `None` clear) a fault on sends from `from` to `to`
    pub fn set_fault(&self, from: ParticipantId, to: ParticipantId, fault: Option<HubFault>) {
        let mut state = self.state.lock();
        match fault {
            Some(fault) => {
                state.faults.insert((from, to), fault);
            }
            None => {
                state.faults.remove(&(from, to));
            }
        }
    }

    pub fn stats(&self) -> HubStats {
        self.state.lock().stats.clone()
    }

    fn detach(&self, id: ParticipantId) {
        let mut state = self.state.lock();
        state.endpoints.remove(&id);
        let peers: Vec<_> = state
            .links
            .iter()
            .filter_map(|&(a, b)| match (a == id, b == id) {
                (true, _) => Some(b),
                (_, true) => Some(a),
                _ => None,
            })
            .collect();
        for peer in peers {
            state.links.remove(&link_key(id, peer));
            notify(&state, peer, TransportEvent::Disconnected(id));
        }
        state.faults.retain(|&(from, to), _| from != id && to != id);
        log::debug!("Hub endpoint {} detached", id);
    }

    fn deliver(&self, from: ParticipantId, to: ParticipantId, message: &Message) -> Result<(), TransportError> {
        let bytes = encode_message(message, self.config.max_message_size)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if from != to && !state.links.contains(&link_key(from, to)) {
            return Err(TransportError::NotConnected(to));
        }
        match state.faults.get(&(from, to)) {
            Some(HubFault::Drop) => {
                log::trace!("Hub dropped {:?} {} -> {}", message.message_type(), from, to);
                state.stats.messages_dropped += 1;
                return Ok(());
            }
            Some(HubFault::Fail) => {
                state.stats.sends_failed += 1;
                return Err(TransportError::SendFailed(to));
            }
            None => {}
        }

        let queue = state
            .endpoints
            .get(&to)
            .ok_or(TransportError::NotConnected(to))?;
        if queue.len() >= self.config.send_queue_capacity {
            state.stats.sends_failed += 1;
            return Err(TransportError::QueueFull(to));
        }

        let decoded = decode_message(&bytes, self.config.max_message_size)?;
        queue
            .send(TransportEvent::Received {
                from,
                message: decoded,
            })
            .map_err(|_| TransportError::SendFailed(to))?;

        state.stats.messages_delivered += 1;
        state.stats.bytes_delivered += bytes.len() as u64;
        Ok(())
    }

    fn peers_of(&self, id: ParticipantId) -> Vec<ParticipantId> {
        let state = self.state.lock();
        let peers: BTreeSet<_> = state
            .links
            .iter()
            .filter_map(|&(a, b)| {
                if a == id {
                    Some(b)
                } else if b == id {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        peers.into_iter().collect()
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

fn notify(state: &HubState, to: ParticipantId, event: TransportEvent) {
    if let Some(queue) = state.endpoints.get(&to) {
        let _ = queue.send(event);
    }
}

/// One participant's view of a [`LocalHub`]
pub struct HubEndpoint {
    id: ParticipantId,
    hub: LocalHub,
    events: Receiver<TransportEvent>,
}

impl HubEndpoint {
    /// The hub this endpoint is attached to
    pub fn hub(&self) -> &LocalHub {
        &self.hub
    }
}

impl Transport for HubEndpoint {
    fn local_id(&self) -> ParticipantId {
        self.id
    }

    fn send(&self, to: ParticipantId, message: &Message) -> Result<(), TransportError> {
        self.hub.deliver(self.id, to, message)
    }

    fn connected_peers(&self) -> Vec<ParticipantId> {
        self.hub.peers_of(self.id)
    }

    fn events(&self) -> Receiver<TransportEvent> {
        self.events.clone()
    }
}

impl Drop for HubEndpoint {
    fn drop(&mut self) {
        self.hub.detach(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenecast_ir::SceneId;

    const A: ParticipantId = ParticipantId::new(1);
    const B: ParticipantId = ParticipantId::new(2);

    fn subscribe(raw: u64) -> Message {
        Message::SubscribeScene {
            scene_id: SceneId::new(raw),
        }
    }

    #[test]
    fn test_connect_and_deliver_in_order() {
        let hub = LocalHub::default();
        let a = hub.endpoint(A);
        let b = hub.endpoint(B);

        assert!(matches!(a.send(B, &subscribe(1)), Err(TransportError::NotConnected(p)) if p == B));
        assert!(hub.connect(A, B));
        assert!(!hub.connect(A, B));
        assert_eq!(a.events().try_recv().unwrap(), TransportEvent::Connected(B));
        assert_eq!(b.events().try_recv().unwrap(), TransportEvent::Connected(A));

        for raw in 1..=3 {
            a.send(B, &subscribe(raw)).unwrap();
        }
        for raw in 1..=3 {
            assert_eq!(
                b.events().try_recv().unwrap(),
                TransportEvent::Received {
                    from: A,
                    message: subscribe(raw)
                }
            );
        }
        assert_eq!(a.connected_peers(), vec![B]);
        assert_eq!(hub.stats().messages_delivered, 3);
    }

    #[test]
    fn test_loopback() {
        let hub = LocalHub::default();
        let a = hub.endpoint(A);
        a.send(A, &subscribe(9)).unwrap();
        assert_eq!(
            a.events().try_recv().unwrap(),
            TransportEvent::Received {
                from: A,
                message: subscribe(9)
            }
        );
        assert!(a.connected_peers().is_empty());
    }

    #[test]
    fn test_queue_full() {
        let hub = LocalHub::new(HubConfig {
            send_queue_capacity: 2,
            ..Default::default()
        });
        let a = hub.endpoint(A);
        let b = hub.endpoint(B);
        hub.connect(A, B);
        // B holds its Connected event plus one message
        a.send(B, &subscribe(1)).unwrap();
        assert!(matches!(a.send(B, &subscribe(2)), Err(TransportError::QueueFull(p)) if p == B));
        drop(b);
    }

    #[test]
    fn test_faults() {
        let hub = LocalHub::default();
        let a = hub.endpoint(A);
        let b = hub.endpoint(B);
        hub.connect(A, B);
        let _ = b.events().try_recv();

        hub.set_fault(A, B, Some(HubFault::Drop));
        a.send(B, &subscribe(1)).unwrap();
        assert!(b.events().try_recv().is_err());

        hub.set_fault(A, B, Some(HubFault::Fail));
        assert!(matches!(a.send(B, &subscribe(2)), Err(TransportError::SendFailed(_))));

        hub.set_fault(A, B, None);
        a.send(B, &subscribe(3)).unwrap();
        assert!(matches!(
            b.events().try_recv().unwrap(),
            TransportEvent::Received { message, .. } if message == subscribe(3)
        ));
        assert_eq!(hub.stats().messages_dropped, 1);
    }

    #[test]
    fn test_endpoint_drop_disconnects_peers() {
        let hub = LocalHub::default();
        let a = hub.endpoint(A);
        let b = hub.endpoint(B);
        hub.connect(A, B);
        let _ = a.events().try_recv();

        drop(b);
        assert_eq!(a.events().try_recv().unwrap(), TransportEvent::Disconnected(B));
        assert!(a.connected_peers().is_empty());
        assert!(matches!(a.send(B, &subscribe(1)), Err(TransportError::NotConnected(_))));
    }
}
