//! TCP transport
//!
//! Framed [`Message`]s over `std::net::TcpStream`. Each connection starts
//! with a `Hello` exchange that tells both sides who is on the other end.
//! After that every connection has a reader thread feeding the shared event
//! channel and a writer thread draining a bounded outbound queue. `send`
//! only encodes and enqueues, so a peer that stops reading fills its own
//! queue and nobody else's.
//!
//! # Threads
//!
//! ```text
//! accept thread ──► handshake ──► register peer ──► reader thread ──► events
//! send() ──encode──► outbound queue (bounded) ──► writer thread ──► socket
//! ```

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use scenecast_ir::ParticipantId;
use std::collections::HashMap;
use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::FrameworkConfig;
use crate::error::TransportError;
use crate::message::{
    encode_message, read_message, write_message, Message, MessageError, PROTOCOL_VERSION,
};
use crate::transport::{Transport, TransportEvent};

/// Idle wait of the accept loop
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Encoded messages a peer may have queued by default
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 1024;

struct Peer {
    connection: u64,
    stream: TcpStream,
    outbound: Sender<Vec<u8>>,
}

struct Inner {
    local_id: ParticipantId,
    max_message_size: usize,
    send_queue_capacity: usize,
    peers: Mutex<HashMap<ParticipantId, Arc<Peer>>>,
    events_tx: Sender<TransportEvent>,
    events_rx: Receiver<TransportEvent>,
    next_connection: AtomicU64,
    shutdown: AtomicBool,
}

/// Transport over TCP connections
pub struct TcpTransport {
    inner: Arc<Inner>,
}

impl TcpTransport {
    /// Create a transport with no connections
    pub fn new(local_id: ParticipantId, max_message_size: usize) -> Self {
        Self::with_queue_capacity(local_id, max_message_size, DEFAULT_SEND_QUEUE_CAPACITY)
    }

    /// Create a transport holding at most `send_queue_capacity` unsent
    /// messages per peer
    pub fn with_queue_capacity(local_id: ParticipantId, max_message_size: usize, send_queue_capacity: usize) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            inner: Arc::new(Inner {
                local_id,
                max_message_size,
                send_queue_capacity: send_queue_capacity.max(1),
                peers: Mutex::new(HashMap::new()),
                events_tx,
                events_rx,
                next_connection: AtomicU64::new(1),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Create a transport sized by the framework config
    pub fn from_framework(local_id: ParticipantId, config: &FrameworkConfig) -> Self {
        Self::with_queue_capacity(
            local_id,
            config.protocol.max_message_size,
            config.transport.send_queue_capacity,
        )
    }

    /// Accept connections on `addr` in a background thread.
    ///
    /// Returns the bound address, useful when binding port 0.
    pub fn listen(&self, addr: impl ToSocketAddrs) -> Result<SocketAddr, TransportError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        log::info!("{} listening on {}", self.inner.local_id, local_addr);

        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("scenecast-accept".to_string())
            .spawn(move || accept_loop(inner, listener))?;
        Ok(local_addr)
    }

    /// Connect to a listening participant and return its ID
    pub fn connect(&self, addr: impl ToSocketAddrs) -> Result<ParticipantId, TransportError> {
        if self.inner.shutdown.load(Ordering::Relaxed) {
            return Err(TransportError::Shutdown);
        }
        let stream = TcpStream::connect(addr)?;
        let peer = handshake(&self.inner, &stream)?;
        register(&self.inner, peer, stream)?;
        Ok(peer)
    }

    /// Close every connection and stop accepting new ones
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::Relaxed) {
            return;
        }
        let peers: Vec<_> = self.inner.peers.lock().drain().collect();
        for (id, peer) in peers {
            let _ = peer.stream.shutdown(Shutdown::Both);
            let _ = self.inner.events_tx.send(TransportEvent::Disconnected(id));
        }
        log::info!("{} TCP transport shut down", self.inner.local_id);
    }
}

impl Transport for TcpTransport {
    fn local_id(&self) -> ParticipantId {
        self.inner.local_id
    }

    fn send(&self, to: ParticipantId, message: &Message) -> Result<(), TransportError> {
        if self.inner.shutdown.load(Ordering::Relaxed) {
            return Err(TransportError::Shutdown);
        }
        if to == self.inner.local_id {
            return self
                .inner
                .events_tx
                .send(TransportEvent::Received {
                    from: to,
                    message: message.clone(),
                })
                .map_err(|_| TransportError::Shutdown);
        }

        let peer = self
            .inner
            .peers
            .lock()
            .get(&to)
            .cloned()
            .ok_or(TransportError::NotConnected(to))?;

        let bytes = encode_message(message, self.inner.max_message_size)?;
        match peer.outbound.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::debug!("Send queue to {} is full", to);
                Err(TransportError::QueueFull(to))
            }
            Err(TrySendError::Disconnected(_)) => Err(TransportError::SendFailed(to)),
        }
    }

    fn connected_peers(&self) -> Vec<ParticipantId> {
        let mut peers: Vec<_> = self.inner.peers.lock().keys().copied().collect();
        peers.sort();
        peers
    }

    fn events(&self) -> Receiver<TransportEvent> {
        self.inner.events_rx.clone()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    while !inner.shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let inner = Arc::clone(&inner);
                let spawned = thread::Builder::new()
                    .name("scenecast-handshake".to_string())
                    .spawn(move || {
                        let accepted = stream
                            .set_nonblocking(false)
                            .map_err(TransportError::from)
                            .and_then(|_| handshake(&inner, &stream))
                            .and_then(|peer| register(&inner, peer, stream));
                        if let Err(e) = accepted {
                            log::warn!("Rejected connection from {}: {}", addr, e);
                        }
                    });
                if let Err(e) = spawned {
                    log::error!("Failed to spawn handshake thread: {}", e);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                log::error!("Accept error: {}", e);
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    log::debug!("{} accept loop stopped", inner.local_id);
}

fn handshake(inner: &Inner, stream: &TcpStream) -> Result<ParticipantId, TransportError> {
    let hello = Message::Hello {
        participant: inner.local_id,
        protocol_version: PROTOCOL_VERSION,
    };
    let mut writer = stream;
    write_message(&mut writer, &hello, inner.max_message_size)?;

    let mut reader = stream;
    match read_message(&mut reader, inner.max_message_size)? {
        Message::Hello {
            participant,
            protocol_version,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                return Err(MessageError::VersionMismatch {
                    expected: PROTOCOL_VERSION,
                    got: protocol_version,
                }
                .into());
            }
            if participant == inner.local_id {
                return Err(TransportError::Io(format!("peer claims our own ID {}", participant)));
            }
            Ok(participant)
        }
        other => Err(MessageError::InvalidMessageType(other.message_type() as u8).into()),
    }
}

fn register(inner: &Arc<Inner>, peer_id: ParticipantId, stream: TcpStream) -> Result<(), TransportError> {
    stream.set_nodelay(true)?;
    let reader = stream.try_clone()?;
    let writer = stream.try_clone()?;
    let connection = inner.next_connection.fetch_add(1, Ordering::Relaxed);
    let (outbound, queue) = bounded(inner.send_queue_capacity);

    thread::Builder::new()
        .name(format!("scenecast-writer-{}", peer_id.raw()))
        .spawn(move || write_loop(peer_id, queue, writer))?;

    let peer = Arc::new(Peer {
        connection,
        stream,
        outbound,
    });
    if let Some(previous) = inner.peers.lock().insert(peer_id, peer) {
        log::info!("{} reconnected, closing previous connection", peer_id);
        let _ = previous.stream.shutdown(Shutdown::Both);
    }
    let _ = inner.events_tx.send(TransportEvent::Connected(peer_id));
    log::info!("{} connected to {}", inner.local_id, peer_id);

    let inner = Arc::clone(inner);
    thread::Builder::new()
        .name(format!("scenecast-reader-{}", peer_id.raw()))
        .spawn(move || read_loop(inner, peer_id, connection, reader))?;
    Ok(())
}

/// Drain a peer's outbound queue until the peer is dropped or the socket fails
fn write_loop(peer_id: ParticipantId, queue: Receiver<Vec<u8>>, stream: TcpStream) {
    let mut writer = BufWriter::new(stream);
    for bytes in queue.iter() {
        let mut result = writer.write_all(&bytes);
        if result.is_ok() && queue.is_empty() {
            result = writer.flush();
        }
        if let Err(e) = result {
            log::warn!("Writing to {} failed: {}", peer_id, e);
            // The reader thread notices the closed socket and reports the disconnect
            let _ = writer.get_ref().shutdown(Shutdown::Both);
            return;
        }
    }
    let _ = writer.flush();
    log::debug!("Writer for {} stopped", peer_id);
}

fn read_loop(inner: Arc<Inner>, peer_id: ParticipantId, connection: u64, stream: TcpStream) {
    let mut reader = BufReader::new(stream);
    loop {
        match read_message(&mut reader, inner.max_message_size) {
            Ok(message) => {
                if inner
                    .events_tx
                    .send(TransportEvent::Received {
                        from: peer_id,
                        message,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Err(MessageError::ConnectionClosed) => {
                log::debug!("Connection to {} closed", peer_id);
                break;
            }
            Err(e) => {
                log::warn!("Reading from {} failed: {}", peer_id, e);
                break;
            }
        }
    }

    let mut peers = inner.peers.lock();
    let current = peers.get(&peer_id).map(|peer| peer.connection) == Some(connection);
    if current {
        if let Some(peer) = peers.remove(&peer_id) {
            let _ = peer.stream.shutdown(Shutdown::Both);
        }
        drop(peers);
        let _ = inner.events_tx.send(TransportEvent::Disconnected(peer_id));
        log::info!("{} disconnected from {}", inner.local_id, peer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MAX_MESSAGE_SIZE;
    use scenecast_ir::SceneId;
    use scenecast_resource::ResourceHash;
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_tcp_handshake_and_messages() {
        let server = TcpTransport::new(ParticipantId::new(10), MAX_MESSAGE_SIZE);
        let client = TcpTransport::new(ParticipantId::new(20), MAX_MESSAGE_SIZE);

        let addr = server.listen("127.0.0.1:0").unwrap();
        assert_eq!(client.connect(addr).unwrap(), ParticipantId::new(10));

        assert_eq!(
            server.events().recv_timeout(TIMEOUT).unwrap(),
            TransportEvent::Connected(ParticipantId::new(20))
        );
        assert_eq!(
            client.events().recv_timeout(TIMEOUT).unwrap(),
            TransportEvent::Connected(ParticipantId::new(10))
        );

        for raw in 1..=3 {
            client
                .send(
                    ParticipantId::new(10),
                    &Message::SubscribeScene {
                        scene_id: SceneId::new(raw),
                    },
                )
                .unwrap();
        }
        for raw in 1..=3 {
            assert_eq!(
                server.events().recv_timeout(TIMEOUT).unwrap(),
                TransportEvent::Received {
                    from: ParticipantId::new(20),
                    message: Message::SubscribeScene {
                        scene_id: SceneId::new(raw)
                    },
                }
            );
        }

        client.shutdown();
        let mut disconnected = false;
        while let Ok(event) = server.events().recv_timeout(TIMEOUT) {
            if event == TransportEvent::Disconnected(ParticipantId::new(20)) {
                disconnected = true;
                break;
            }
        }
        assert!(disconnected);
        server.shutdown();
    }

    fn connect_raw(addr: SocketAddr, id: ParticipantId) -> TcpStream {
        let mut stream = TcpStream::connect(addr).unwrap();
        let hello = Message::Hello {
            participant: id,
            protocol_version: PROTOCOL_VERSION,
        };
        write_message(&mut stream, &hello, MAX_MESSAGE_SIZE).unwrap();
        match read_message(&mut stream, MAX_MESSAGE_SIZE).unwrap() {
            Message::Hello { .. } => {}
            other => panic!("expected hello, got {:?}", other),
        }
        stream
    }

    fn wait_connected(transport: &TcpTransport, id: ParticipantId) {
        let deadline = Instant::now() + TIMEOUT;
        while !transport.connected_peers().contains(&id) {
            assert!(Instant::now() < deadline, "{} never connected", id);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_stalled_peer_does_not_block_sends() {
        let _ = env_logger::builder().is_test(true).try_init();
        let server = TcpTransport::with_queue_capacity(ParticipantId::new(10), MAX_MESSAGE_SIZE, 4);
        let addr = server.listen("127.0.0.1:0").unwrap();

        // Completes the handshake, then never reads
        let stalled_id = ParticipantId::new(30);
        let _stalled = connect_raw(addr, stalled_id);
        wait_connected(&server, stalled_id);

        let client = TcpTransport::new(ParticipantId::new(20), MAX_MESSAGE_SIZE);
        client.connect(addr).unwrap();
        wait_connected(&server, ParticipantId::new(20));

        let large = Message::ResourceRequest {
            hashes: (1..=65_536u64).map(|i| ResourceHash::new(i, i)).collect(),
        };
        let started = Instant::now();
        let mut queue_full = false;
        for _ in 0..64 {
            match server.send(stalled_id, &large) {
                Ok(()) => {}
                Err(TransportError::QueueFull(peer)) => {
                    assert_eq!(peer, stalled_id);
                    queue_full = true;
                    break;
                }
                Err(e) => panic!("unexpected send error {}", e),
            }
        }
        assert!(queue_full);
        assert!(started.elapsed() < Duration::from_secs(3));

        let message = Message::SubscribeScene {
            scene_id: SceneId::new(4),
        };
        server.send(ParticipantId::new(20), &message).unwrap();
        let mut received = None;
        while let Ok(event) = client.events().recv_timeout(TIMEOUT) {
            if matches!(event, TransportEvent::Received { .. }) {
                received = Some(event);
                break;
            }
        }
        assert_eq!(
            received,
            Some(TransportEvent::Received {
                from: ParticipantId::new(10),
                message,
            })
        );

        server.shutdown();
        client.shutdown();
    }

    #[test]
    fn test_tcp_loopback() {
        let transport = TcpTransport::new(ParticipantId::new(1), MAX_MESSAGE_SIZE);
        let message = Message::RequestResync {
            scene_id: SceneId::new(3),
        };
        transport.send(ParticipantId::new(1), &message).unwrap();
        assert_eq!(
            transport.events().try_recv().unwrap(),
            TransportEvent::Received {
                from: ParticipantId::new(1),
                message,
            }
        );
        assert!(matches!(
            transport.send(ParticipantId::new(2), &Message::RequestResync { scene_id: SceneId::new(3) }),
            Err(TransportError::NotConnected(_))
        ));
    }
}
