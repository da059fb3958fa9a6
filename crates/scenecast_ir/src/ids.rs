//! Identifiers shared by producers and consumers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one scene graph instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SceneId(u64);

impl SceneId {
    /// Create a scene ID from its raw value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scene:{}", self.0)
    }
}

/// Stable handle of an object within a scene.
///
/// Handles are never reused during a scene's lifetime. Zero is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    /// The reserved invalid handle
    pub const INVALID: Self = Self(0);

    /// Create a handle from a raw value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw handle value
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Whether this handle can name an object
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a process taking part in scene distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(u64);

impl ParticipantId {
    /// Create a participant ID from its raw value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant:{}", self.0)
    }
}

/// Opaque user-supplied tag identifying a scene state checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SceneVersionTag(u64);

impl SceneVersionTag {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SceneVersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
