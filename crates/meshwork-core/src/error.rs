//! Error types for the meshwork runtime

use thiserror::Error;

use crate::{PartKey, Uri};

/// Core meshwork errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshworkError {
    // Routing errors
    #[error("Part not found for node {0}")]
    PartNotFound(Uri),

    #[error("Part already closed: {0}")]
    PartClosed(PartKey),

    #[error("Host not found: {0}")]
    HostNotFound(Uri),

    #[error("Node not found: {0}")]
    NodeNotFound(Uri),

    #[error("Lane not found: {node}#{lane}")]
    LaneNotFound { node: Uri, lane: Uri },

    // Policy errors
    #[error("Rejected by policy: {0}")]
    PolicyRejected(String),

    // Link errors
    #[error("Link closed")]
    LinkClosed,

    #[error("Flow control violation: {0}")]
    FlowViolation(&'static str),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    // Lifecycle errors
    #[error("Tier failed: {0}")]
    TierFailed(String),

    // Transport errors
    #[error("Not connected to {0}")]
    NotConnected(Uri),

    #[error("Connect to {uri} failed: {reason}")]
    ConnectFailed { uri: Uri, reason: String },

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Fatal: {0}")]
    Fatal(String),
}

/// Result type for meshwork operations
pub type MeshworkResult<T> = Result<T, MeshworkError>;

/// Failure classified at the point where it originated
///
/// Transient faults are recovered from locally (for instance by scheduling
/// a reconnect); fatal faults propagate to the owner of the failing task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    #[error("transient: {0}")]
    Transient(MeshworkError),

    #[error("fatal: {0}")]
    Fatal(MeshworkError),
}

impl Fault {
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Fault::Fatal(_))
    }

    pub fn into_error(self) -> MeshworkError {
        match self {
            Fault::Transient(error) | Fault::Fatal(error) => error,
        }
    }
}

impl From<MeshworkError> for Fault {
    fn from(error: MeshworkError) -> Self {
        match error {
            MeshworkError::Fatal(_) => Fault::Fatal(error),
            other => Fault::Transient(other),
        }
    }
}
