//! Broker error definitions.

use thiserror::Error;

/// Result alias used by broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors surfaced by broker connections and channels.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker could not be reached or refused the connection.
    #[error("broker connection failed: {reason}")]
    Connection {
        /// Additional context for the failure.
        reason: String,
    },

    /// The connection or channel has been closed.
    #[error("broker connection closed")]
    Closed,

    /// A referenced exchange or queue does not exist.
    #[error("{kind} `{name}` not found")]
    NotFound {
        /// Kind of resource (`exchange` or `queue`).
        kind: &'static str,
        /// Name of the missing resource.
        name: String,
    },

    /// An exclusive queue is owned by another connection.
    #[error("queue `{queue}` is locked by another connection")]
    ResourceLocked {
        /// Name of the locked queue.
        queue: String,
    },

    /// A redeclaration conflicts with the existing resource.
    #[error("precondition failed: {reason}")]
    PreconditionFailed {
        /// Additional context for the conflict.
        reason: String,
    },

    /// Protocol-level failure reported by the client library.
    #[error("broker protocol error: {reason}")]
    Protocol {
        /// Additional context for the failure.
        reason: String,
    },
}

impl BrokerError {
    /// Convenience constructor for connection failures.
    #[must_use]
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for protocol failures.
    #[must_use]
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    pub(crate) fn exchange_not_found(name: &str) -> Self {
        Self::NotFound {
            kind: "exchange",
            name: name.into(),
        }
    }

    pub(crate) fn queue_not_found(name: &str) -> Self {
        Self::NotFound {
            kind: "queue",
            name: name.into(),
        }
    }
}
