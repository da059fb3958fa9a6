//! Error types for scene actions, flushes and the action codec

use thiserror::Error;

use crate::action::ObjectKind;
use crate::flush::FlushState;
use crate::ids::ObjectHandle;

/// An action that would break scene invariants
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("invalid handle {0}")]
    InvalidHandle(ObjectHandle),

    #[error("handle {0} is already allocated")]
    AlreadyAllocated(ObjectHandle),

    #[error("handle {0} was released and cannot be reused")]
    HandleReused(ObjectHandle),

    #[error("unknown handle {0}")]
    UnknownHandle(ObjectHandle),

    #[error("handle {handle} is a {actual}, expected {expected}")]
    WrongKind {
        handle: ObjectHandle,
        expected: ObjectKind,
        actual: ObjectKind,
    },

    #[error("node {child} already has parent {parent}")]
    AlreadyParented {
        child: ObjectHandle,
        parent: ObjectHandle,
    },

    #[error("node {child} is not a child of {parent}")]
    NotAChild {
        parent: ObjectHandle,
        child: ObjectHandle,
    },

    #[error("linking {child} under {parent} would create a cycle")]
    CycleDetected {
        parent: ObjectHandle,
        child: ObjectHandle,
    },

    #[error("{member} is not a member of {container}")]
    NotAMember {
        container: ObjectHandle,
        member: ObjectHandle,
    },

    #[error("{member} is already a member of {container}")]
    AlreadyMember {
        container: ObjectHandle,
        member: ObjectHandle,
    },

    #[error("data buffer {buffer} update at offset {offset} is out of bounds (size {size})")]
    OutOfBounds {
        buffer: ObjectHandle,
        offset: u32,
        size: usize,
    },
}

/// Invalid flush state transitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlushError {
    #[error("invalid flush transition from {from:?} to {to:?}")]
    InvalidTransition { from: FlushState, to: FlushState },

    #[error("flush {expected} is ready to send, got {got}")]
    SequenceMismatch { expected: u64, got: u64 },
}

/// Structurally malformed action data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("action block truncated at byte {0}")]
    Truncated(usize),

    #[error("unsupported action format version {got} (expected {expected})")]
    VersionMismatch { expected: u16, got: u16 },

    #[error("action payload does not match opcode {0}")]
    OpcodeMismatch(u16),

    #[error("{0} trailing bytes after the last action")]
    TrailingBytes(usize),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}
