//! Resource store errors

use crate::hash::ResourceHash;
use thiserror::Error;

/// Errors from resource store operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("resource {0} is not resident")]
    NotFound(ResourceHash),

    #[error("resource payload too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("resource content does not match its hash: expected {expected}, computed {actual}")]
    HashMismatch {
        expected: ResourceHash,
        actual: ResourceHash,
    },
}
