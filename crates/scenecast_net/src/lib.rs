//! # Scenecast Net - Scene Distribution
//!
//! Moves scenes between participants. A provider's flushes are fanned out
//! to every subscriber as deltas; late joiners and subscribers that fell
//! behind receive snapshots. Resources travel separately, announced before
//! the updates that need them and pulled on demand by hash.
//!
//! ## Architecture
//!
//! ```text
//!  Provider                                              Consumer
//! ┌─────────────┐  SceneCommand  ┌──────────────────┐      ┌────────────────────┐
//! │ SceneHandle │ ─────────────► │ SceneGraphSender │ ───► │ SceneGraphConsumer │ ──► mirror Scene
//! └─────────────┘                └──────────────────┘  ▲   └────────────────────┘
//!                                         │            │            │
//!                                PublicationRegistry   Transport ◄──┘ (subscribe, resync,
//!                                                   (LocalHub, TCP)    resource requests)
//! ```
//!
//! ## Key Concepts
//!
//! - **Framework**: one participant, owning sender, consumer, registry and resource store
//! - **Publication**: `LocalOnly` scenes are only offered to the providing participant
//! - **Transport**: ordered per-pair delivery; the in-process [`LocalHub`] runs the wire codec too
//! - **Resync**: any gap, malformed update or wrapped counter ends in a fresh snapshot

pub mod config;
pub mod consumer;
pub mod context;
pub mod error;
pub mod message;
pub mod registry;
pub mod sender;
pub mod tcp;
pub mod transport;

pub use config::FrameworkConfig;
pub use consumer::{
    AvailableScene, ConsumedSceneState, ConsumerConfig, ConsumerEvent, ConsumerStats,
    SceneGraphConsumer,
};
pub use context::{Framework, SceneCommand, SceneHandle};
pub use error::{ConfigError, FrameworkError, RegistryError, TransportError};
pub use message::{
    Message, MessageError, MessageHeader, MessageType, ResourceAnnouncement, ResourceData,
    SceneInfo, SceneUpdate, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use registry::{ConnectionState, ConnectionStatusInfo, PublicationMode, PublicationRegistry, PublishedSceneInfo};
pub use sender::{SceneGraphSender, SenderConfig, SenderStats};
pub use tcp::TcpTransport;
pub use transport::{HubConfig, HubEndpoint, HubFault, HubStats, LocalHub, Transport, TransportEvent};

pub use scenecast_ir as ir;
pub use scenecast_resource as resource;
