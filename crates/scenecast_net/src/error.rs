//! Error types for configuration, transports, the registry and the framework

use scenecast_ir::{ActionError, FlushError, ParticipantId, SceneId};
use scenecast_resource::ResourceError;
use thiserror::Error;

use crate::message::MessageError;

/// Errors from config loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors from sending through a transport
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("participant {0} is not connected")]
    NotConnected(ParticipantId),

    #[error("send queue to {0} is full")]
    QueueFull(ParticipantId),

    #[error("send to {0} failed")]
    SendFailed(ParticipantId),

    #[error("message error: {0}")]
    Message(#[from] MessageError),

    #[error("IO error: {0}")]
    Io(String),

    #[error("transport is shut down")]
    Shutdown,
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Errors from publication bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{0} is already published")]
    AlreadyPublished(SceneId),

    #[error("{0} is not published")]
    NotPublished(SceneId),

    #[error("{scene} is local-only, {participant} cannot subscribe")]
    NotNetworked {
        scene: SceneId,
        participant: ParticipantId,
    },
}

/// Errors surfaced by the framework API
#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("{0} already exists")]
    SceneExists(SceneId),

    #[error("{0} is unknown")]
    UnknownScene(SceneId),

    #[error("communication side is gone")]
    Disconnected,

    #[error("action rejected: {0}")]
    Action(#[from] ActionError),

    #[error("flush error: {0}")]
    Flush(#[from] FlushError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
