//! Connection state machine for courier agents.

use std::fmt;

use agent_primitives::AgentIdentity;
use thiserror::Error;
use tracing::debug;

/// Connection states an agent can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No broker resources are held.
    #[default]
    Disconnected,
    /// The topology is declared and the dispatcher is running.
    Connected,
}

impl ConnectionState {
    /// Returns `true` when the agent is connected.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
        })
    }
}

/// Events that trigger connection transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Topology established.
    Connect,
    /// Resources released, either on request or because the broker went away.
    Disconnect,
}

/// Connection state manager.
#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    identity: AgentIdentity,
    state: ConnectionState,
}

impl ConnectionLifecycle {
    /// Constructs a lifecycle controller for the given agent, initially disconnected.
    #[must_use]
    pub fn new(identity: AgentIdentity) -> Self {
        Self {
            identity,
            state: ConnectionState::Disconnected,
        }
    }

    /// Returns the owning agent identity.
    #[must_use]
    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Applies a connection event, returning the resulting state.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] when connecting while
    /// connected or disconnecting while disconnected.
    pub fn transition(&mut self, event: ConnectionEvent) -> LifecycleResult<ConnectionState> {
        let next = match (self.state, event) {
            (ConnectionState::Disconnected, ConnectionEvent::Connect) => ConnectionState::Connected,
            (ConnectionState::Connected, ConnectionEvent::Disconnect) => {
                ConnectionState::Disconnected
            }
            (from, event) => {
                return Err(LifecycleError::InvalidTransition {
                    identity: self.identity.to_string(),
                    from,
                    event,
                });
            }
        };

        debug!(
            identity = %self.identity,
            from = %self.state,
            to = %next,
            ?event,
            "connection state transition"
        );
        self.state = next;
        Ok(next)
    }
}

/// Errors emitted by the lifecycle controller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// Transition was not permitted from the current state.
    #[error("invalid connection transition from {from} via {event:?} for agent {identity}")]
    InvalidTransition {
        /// Identity of the agent whose transition failed.
        identity: String,
        /// State prior to the attempted transition.
        from: ConnectionState,
        /// Event that triggered the failure.
        event: ConnectionEvent,
    },
}

/// Result alias used for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
