//! Error types for zettasync

use thiserror::Error;

use crate::diff::Conflict;

/// Result type alias for zettasync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for zettasync
#[derive(Error, Debug)]
pub enum Error {
    /// RPC-level failure talking to an endpoint (connectivity, timeout,
    /// serialization)
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Endpoint returned something its contract forbids (e.g. a non-dry send
    /// without a stream)
    #[error("endpoint protocol violation: {message}")]
    Protocol { message: String },

    /// Unresolved version divergence between sender and receiver
    #[error("replication conflict: {conflict}")]
    Conflict { conflict: Conflict },

    /// The receiver-reported resume token could not be decoded or matched
    /// against the sender's versions
    #[error("resume token error: {message}")]
    ResumeToken { message: String },

    /// Receive call failed; may originate on either side of the stream
    #[error("receive failed for {context}: {message}")]
    Receive { context: String, message: String },

    /// Batched dry-run size estimation failed (non-fatal for planning)
    #[error("size estimation failed: {message}")]
    SizeEstimate { message: String },

    /// Sender filesystem is a placeholder but the receiver's is not
    #[error("sender filesystem {filesystem} is placeholder, but receiver filesystem is not")]
    PlaceholderMismatch { filesystem: String },

    /// Planner policy failed validation
    #[error("invalid planner policy: {message}")]
    Policy { message: String },
}

impl Error {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a resume token error
    pub fn resume_token(message: impl Into<String>) -> Self {
        Self::ResumeToken {
            message: message.into(),
        }
    }

    /// Create a receive error with request context
    pub fn receive(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Receive {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a policy validation error
    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy {
            message: message.into(),
        }
    }

    /// Check if this error is an unresolved replication conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

impl From<Conflict> for Error {
    fn from(conflict: Conflict) -> Self {
        Self::Conflict { conflict }
    }
}
