//! Framework configuration - TOML to FrameworkConfig conversion
//!
//! # Config Format
//!
//! ```toml
//! [participant]
//! name = "renderer-1"
//! id = 42                     # optional, derived from the process otherwise
//!
//! [resources]
//! cache_timeout_ms = 5000
//! max_resource_size = 268435456
//!
//! [protocol]
//! sequence_wrap_around = 10000
//! max_message_size = 16777216
//! max_pending_flushes = 120
//! resync_retry_ms = 1000
//!
//! [transport]
//! send_queue_capacity = 1024
//!
//! [runtime]
//! poll_interval_ms = 2
//! summary_interval_ms = 10000
//! ```

use scenecast_ir::{ParticipantId, SEQUENCE_WRAP_AROUND};
use scenecast_resource::ResourceStoreConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::consumer::ConsumerConfig;
use crate::error::ConfigError;
use crate::message::MAX_MESSAGE_SIZE;
use crate::sender::SenderConfig;

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParticipantSection {
    pub name: String,
    pub id: Option<u64>,
}

impl Default for ParticipantSection {
    fn default() -> Self {
        Self {
            name: "scenecast".to_string(),
            id: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResourceSection {
    pub cache_timeout_ms: u64,
    pub max_resource_size: usize,
}

impl Default for ResourceSection {
    fn default() -> Self {
        let defaults = ResourceStoreConfig::default();
        Self {
            cache_timeout_ms: defaults.cache_timeout.as_millis() as u64,
            max_resource_size: defaults.max_resource_size,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolSection {
    pub sequence_wrap_around: u64,
    pub max_message_size: usize,
    pub max_pending_flushes: usize,
    /// Wait before a consumer repeats an unanswered resync request
    pub resync_retry_ms: u64,
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            sequence_wrap_around: SEQUENCE_WRAP_AROUND,
            max_message_size: MAX_MESSAGE_SIZE,
            max_pending_flushes: 120,
            resync_retry_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub send_queue_capacity: usize,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            send_queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Sleep between idle communication loop iterations
    pub poll_interval_ms: u64,
    /// Interval of the periodic summary log, 0 disables it
    pub summary_interval_ms: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2,
            summary_interval_ms: 10_000,
        }
    }
}

/// Configuration of a framework instance
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    pub participant: ParticipantSection,
    pub resources: ResourceSection,
    pub protocol: ProtocolSection,
    pub transport: TransportSection,
    pub runtime: RuntimeSection,
}

impl FrameworkConfig {
    /// Short timeouts and small bounds for local iteration and tests
    pub fn development() -> Self {
        Self {
            resources: ResourceSection {
                cache_timeout_ms: 100,
                ..Default::default()
            },
            protocol: ProtocolSection {
                max_pending_flushes: 16,
                resync_retry_ms: 100,
                ..Default::default()
            },
            runtime: RuntimeSection {
                poll_interval_ms: 1,
                summary_interval_ms: 0,
            },
            ..Default::default()
        }
    }

    /// Parse a config from TOML text
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject values the protocol cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.protocol.sequence_wrap_around < 2 {
            return Err(ConfigError::Validation(
                "protocol.sequence_wrap_around must be at least 2".to_string(),
            ));
        }
        if self.protocol.max_message_size == 0 {
            return Err(ConfigError::Validation(
                "protocol.max_message_size must be positive".to_string(),
            ));
        }
        if self.protocol.max_pending_flushes == 0 {
            return Err(ConfigError::Validation(
                "protocol.max_pending_flushes must be positive".to_string(),
            ));
        }
        if self.protocol.resync_retry_ms == 0 {
            return Err(ConfigError::Validation(
                "protocol.resync_retry_ms must be positive".to_string(),
            ));
        }
        if self.transport.send_queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "transport.send_queue_capacity must be positive".to_string(),
            ));
        }
        if self.participant.id == Some(0) {
            return Err(ConfigError::Validation("participant.id 0 is reserved".to_string()));
        }
        Ok(())
    }

    /// Configured participant ID, or one derived from the process ID
    pub fn participant_id(&self) -> ParticipantId {
        ParticipantId::new(
            self.participant
                .id
                .unwrap_or_else(|| u64::from(std::process::id()) | (1 << 32)),
        )
    }

    pub fn resource_store(&self) -> ResourceStoreConfig {
        ResourceStoreConfig {
            cache_timeout: Duration::from_millis(self.resources.cache_timeout_ms),
            max_resource_size: self.resources.max_resource_size,
        }
    }

    pub fn sender(&self) -> SenderConfig {
        SenderConfig {
            max_message_size: self.protocol.max_message_size,
        }
    }

    pub fn consumer(&self) -> ConsumerConfig {
        ConsumerConfig {
            max_pending_flushes: self.protocol.max_pending_flushes,
            resync_retry_ms: self.protocol.resync_retry_ms,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.runtime.poll_interval_ms)
    }
}
