//! Framework context
//!
//! One [`Framework`] per participant. Producers create scenes through it
//! and get a [`SceneHandle`] back; the handle lives on the producer's thread
//! and hands flushes to the communication side through a command channel.
//! The communication side is driven by [`Framework::pump`], either from a
//! caller-owned loop or from the thread started by [`Framework::spawn`].
//!
//! ```text
//! SceneHandle ──SceneCommand──► pump() ──► SceneGraphSender ──► Transport
//!                                 │                                │
//!                                 └──► SceneGraphConsumer ◄────────┘
//! ```
//!
//! The local consumer talks to the local sender through the transport's
//! loopback, so local and remote subscribers follow the same path.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use scenecast_ir::{
    wall_clock_ms, ActionError, ClientScene, Flush, FlushOptions, ObjectHandle, ParticipantId,
    Scene, SceneAction, SceneId,
};
use scenecast_resource::{ResourceEvent, ResourceStore, ResourceStoreStats};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::config::FrameworkConfig;
use crate::consumer::{AvailableScene, ConsumerEvent, ConsumerStats, SceneGraphConsumer};
use crate::error::{FrameworkError, RegistryError};
use crate::message::Message;
use crate::registry::{PublicationMode, PublicationRegistry};
use crate::sender::{SceneGraphSender, SenderStats};
use crate::transport::{Transport, TransportEvent};

/// Producer-to-communication commands
#[derive(Debug)]
pub enum SceneCommand {
    Created { scene_id: SceneId, name: String },
    Flushed(Flush),
    Published(SceneId),
    Unpublished { scene_id: SceneId, mode: PublicationMode },
    Destroyed(SceneId),
}

/// Producer-side handle of a scene created through a [`Framework`]
///
/// Dropping the handle destroys the scene and withdraws it from every
/// subscriber.
pub struct SceneHandle {
    scene: ClientScene,
    commands: Sender<SceneCommand>,
    registry: Arc<PublicationRegistry>,
    live: Arc<Mutex<HashSet<SceneId>>>,
}

impl SceneHandle {
    pub fn id(&self) -> SceneId {
        self.scene.id()
    }

    pub fn name(&self) -> &str {
        self.scene.name()
    }

    /// The producer's scene and action log
    pub fn scene(&self) -> &ClientScene {
        &self.scene
    }

    pub fn allocate_handle(&mut self) -> ObjectHandle {
        self.scene.allocate_handle()
    }

    /// Validate and record an action
    pub fn apply(&mut self, action: SceneAction) -> Result<(), FrameworkError> {
        Ok(self.scene.apply(action)?)
    }

    pub fn create_node(&mut self, name: impl Into<String>) -> Result<ObjectHandle, ActionError> {
        self.scene.create_node(name)
    }

    /// Seal the open actions and hand them to the sender.
    ///
    /// Returns the flush sequence, or `None` when nothing changed.
    pub fn flush(&mut self, options: FlushOptions) -> Result<Option<u64>, FrameworkError> {
        let Some(flush) = self.scene.flush(options) else {
            return Ok(None);
        };
        let sequence = flush.sequence;
        self.commands
            .send(SceneCommand::Flushed(flush))
            .map_err(|_| FrameworkError::Disconnected)?;
        self.scene.mark_sent(sequence)?;
        Ok(Some(sequence))
    }

    /// Make the scene visible to the local participant or the network
    pub fn publish(&mut self, mode: PublicationMode) -> Result<(), FrameworkError> {
        self.registry
            .publish(self.scene.id(), self.scene.name().to_string(), mode)?;
        self.commands
            .send(SceneCommand::Published(self.scene.id()))
            .map_err(|_| FrameworkError::Disconnected)
    }

    /// Withdraw the scene from every subscriber
    pub fn unpublish(&mut self) -> Result<(), FrameworkError> {
        let scene_id = self.scene.id();
        let info = self
            .registry
            .unpublish(scene_id)
            .ok_or(RegistryError::NotPublished(scene_id))?;
        self.commands
            .send(SceneCommand::Unpublished {
                scene_id,
                mode: info.mode,
            })
            .map_err(|_| FrameworkError::Disconnected)
    }

    pub fn publication_mode(&self) -> PublicationMode {
        self.registry.publication_mode(self.scene.id())
    }
}

impl Drop for SceneHandle {
    fn drop(&mut self) {
        let scene_id = self.scene.id();
        self.live.lock().remove(&scene_id);
        let _ = self.commands.send(SceneCommand::Destroyed(scene_id));
    }
}

/// One participant's scene distribution
pub struct Framework {
    config: FrameworkConfig,
    local_id: ParticipantId,
    transport: Arc<dyn Transport>,
    store: ResourceStore,
    registry: Arc<PublicationRegistry>,
    sender: Mutex<SceneGraphSender>,
    consumer: Mutex<SceneGraphConsumer>,
    commands_tx: Sender<SceneCommand>,
    commands_rx: Receiver<SceneCommand>,
    transport_events: Receiver<TransportEvent>,
    resource_events: Receiver<ResourceEvent>,
    live: Arc<Mutex<HashSet<SceneId>>>,
    last_summary: Mutex<Instant>,
}

impl Framework {
    /// Create a framework sending through `transport` as its local participant
    pub fn new(config: FrameworkConfig, transport: Arc<dyn Transport>) -> Result<Self, FrameworkError> {
        config.validate()?;
        let local_id = transport.local_id();
        let store = ResourceStore::new(config.resource_store());
        let registry = Arc::new(PublicationRegistry::new(local_id));
        let sender = SceneGraphSender::new(config.sender(), Arc::clone(&registry), store.clone());
        let consumer = SceneGraphConsumer::new(local_id, config.consumer(), store.clone());
        let (commands_tx, commands_rx) = unbounded();

        log::info!("Framework started as {}", local_id);
        Ok(Self {
            local_id,
            transport_events: transport.events(),
            resource_events: store.events(),
            transport,
            store,
            registry,
            sender: Mutex::new(sender),
            consumer: Mutex::new(consumer),
            commands_tx,
            commands_rx,
            live: Arc::new(Mutex::new(HashSet::new())),
            last_summary: Mutex::new(Instant::now()),
            config,
        })
    }

    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    pub fn resource_store(&self) -> &ResourceStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<PublicationRegistry> {
        &self.registry
    }

    /// Create a scene owned by the returned handle
    pub fn create_scene(&self, scene_id: SceneId, name: impl Into<String>) -> Result<SceneHandle, FrameworkError> {
        let name = name.into();
        if !self.live.lock().insert(scene_id) {
            return Err(FrameworkError::SceneExists(scene_id));
        }
        self.commands_tx
            .send(SceneCommand::Created {
                scene_id,
                name: name.clone(),
            })
            .map_err(|_| FrameworkError::Disconnected)?;

        let scene = ClientScene::new(
            scene_id,
            name,
            self.store.clone(),
            self.config.protocol.sequence_wrap_around,
        );
        Ok(SceneHandle {
            scene,
            commands: self.commands_tx.clone(),
            registry: Arc::clone(&self.registry),
            live: Arc::clone(&self.live),
        })
    }

    /// Subscribe the local participant to an available scene
    pub fn subscribe_scene(&self, scene_id: SceneId) -> Result<(), FrameworkError> {
        self.consumer.lock().subscribe(scene_id, self.transport.as_ref())
    }

    pub fn unsubscribe_scene(&self, scene_id: SceneId) -> Result<(), FrameworkError> {
        self.consumer.lock().unsubscribe(scene_id, self.transport.as_ref())
    }

    /// Run `f` on the local mirror of a subscribed scene
    pub fn with_mirror<R>(&self, scene_id: SceneId, f: impl FnOnce(&Scene) -> R) -> Option<R> {
        self.consumer.lock().mirror(scene_id).map(f)
    }

    /// Scenes offered to the local participant
    pub fn available_scenes(&self) -> Vec<AvailableScene> {
        self.consumer.lock().available_scenes()
    }

    /// Consumer notifications for the render loop
    pub fn consumer_events(&self) -> Receiver<ConsumerEvent> {
        self.consumer.lock().events()
    }

    /// Withdraw networked scenes and refuse remote subscribers
    pub fn disconnect_from_network(&self) {
        self.sender.lock().disconnect_from_network(self.transport.as_ref());
    }

    pub fn connect_to_network(&self) {
        self.sender.lock().connect_to_network(self.transport.as_ref());
    }

    /// Handle everything queued so far. Returns the number of items handled.
    pub fn pump(&self) -> usize {
        let transport = self.transport.as_ref();
        let mut handled = 0;

        {
            let mut sender = self.sender.lock();
            for command in self.commands_rx.try_iter() {
                handled += 1;
                match command {
                    SceneCommand::Created { scene_id, name } => sender.add_scene(scene_id, name),
                    SceneCommand::Flushed(flush) => sender.on_flush_ready(flush, transport),
                    SceneCommand::Published(scene_id) => sender.announce_published(scene_id, transport),
                    SceneCommand::Unpublished { scene_id, mode } => {
                        sender.announce_unpublished(scene_id, mode, transport)
                    }
                    SceneCommand::Destroyed(scene_id) => sender.remove_scene(scene_id, transport),
                }
            }
        }

        for event in self.transport_events.try_iter() {
            handled += 1;
            match event {
                TransportEvent::Connected(participant) => {
                    self.sender.lock().on_participant_connected(participant, transport);
                }
                TransportEvent::Disconnected(participant) => {
                    log::info!("{} lost {}", self.local_id, participant);
                    self.sender.lock().on_participant_disconnected(participant);
                    self.consumer.lock().on_provider_disconnected(participant);
                }
                TransportEvent::Received { from, message } => self.dispatch(from, message),
            }
        }

        for event in self.resource_events.try_iter() {
            handled += 1;
            match event {
                ResourceEvent::Available(hash) => {
                    self.sender.lock().on_resource_available(hash, transport);
                    self.consumer
                        .lock()
                        .on_resource_available(hash, transport, wall_clock_ms());
                }
                ResourceEvent::Evicted(hash) => {
                    self.sender.lock().on_resource_evicted(hash, transport);
                }
            }
        }

        let evicted = self.store.evict_expired(Instant::now());
        if !evicted.is_empty() {
            log::debug!("Evicted {} unused resources", evicted.len());
        }
        self.consumer.lock().update(transport, wall_clock_ms());

        self.maybe_log_summary();
        handled
    }

    fn dispatch(&self, from: ParticipantId, message: Message) {
        let transport = self.transport.as_ref();
        match message {
            Message::Hello { .. } => {
                log::debug!("Unexpected hello from {}", from);
            }
            Message::ScenesAvailable { scenes } => {
                let mut consumer = self.consumer.lock();
                for info in scenes {
                    consumer.on_scene_available(info.scene_id, info.name, from);
                }
            }
            Message::ScenesUnavailable { scenes } => {
                let mut consumer = self.consumer.lock();
                for scene_id in scenes {
                    consumer.on_scene_unavailable(scene_id, from);
                }
            }
            Message::SubscribeScene { scene_id } => {
                self.sender
                    .lock()
                    .on_participant_subscribed(from, scene_id, transport);
            }
            Message::UnsubscribeScene { scene_id } => {
                self.sender.lock().on_participant_unsubscribed(from, scene_id);
            }
            Message::SceneUpdate(update) => {
                self.consumer
                    .lock()
                    .on_scene_update_received(from, update, transport, wall_clock_ms());
            }
            Message::RequestResync { scene_id } => {
                self.sender.lock().on_resync_requested(from, scene_id, transport);
            }
            Message::ResourceAnnouncement(announcement) => {
                self.consumer
                    .lock()
                    .on_resource_announced(from, announcement, transport);
            }
            Message::ResourceRequest { hashes } => {
                self.sender.lock().on_resource_request(from, &hashes, transport);
            }
            Message::ResourceData(data) => {
                self.consumer
                    .lock()
                    .on_resource_data(from, data, transport, wall_clock_ms());
            }
        }
    }

    /// Pump until `running` is cleared, sleeping when idle
    pub fn run(&self, running: &AtomicBool) {
        let poll_interval = self.config.poll_interval();
        while running.load(Ordering::Relaxed) {
            if self.pump() == 0 {
                thread::sleep(poll_interval);
            }
        }
        log::info!("{} communication loop stopped", self.local_id);
    }

    /// Run the communication loop on its own thread
    pub fn spawn(self: Arc<Self>, running: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("scenecast-{}", self.local_id.raw()))
            .spawn(move || self.run(&running))
    }

    pub fn sender_stats(&self) -> SenderStats {
        self.sender.lock().stats().clone()
    }

    pub fn consumer_stats(&self) -> ConsumerStats {
        self.consumer.lock().stats().clone()
    }

    pub fn resource_stats(&self) -> ResourceStoreStats {
        self.store.stats()
    }

    /// Log sender, consumer and resource state
    pub fn log_summary(&self) {
        let resources = self.store.stats();
        log::info!(
            "{}: {} resources resident, {} connected peers",
            self.local_id,
            self.store.resource_count(),
            self.transport.connected_peers().len()
        );
        log::debug!("{:?}", resources);
        self.sender.lock().log_summary();
        self.consumer.lock().log_summary();
    }

    fn maybe_log_summary(&self) {
        let interval = self.config.runtime.summary_interval_ms;
        if interval == 0 {
            return;
        }
        let mut last = self.last_summary.lock();
        if last.elapsed().as_millis() as u64 >= interval {
            *last = Instant::now();
            drop(last);
            self.log_summary();
        }
    }
}
