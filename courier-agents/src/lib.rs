//! Typed command and event messaging for broker-connected agents.
//!
//! Depend on this crate via `cargo add courier-agents`. It bundles the
//! workspace crates behind feature flags; enable `amqp` to talk to a real
//! AMQP 0-9-1 broker instead of the in-process one.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use agent_primitives as primitives;

/// Schemas, codecs and the type registry.
pub use agent_schema as schema;

/// Broker abstraction and backends.
pub use agent_broker as broker;

/// Agent composition root and messaging kernel (enabled by `kernel` feature).
#[cfg(feature = "kernel")]
pub use agent_kernel as kernel;

/// Configuration management (enabled by `config` feature).
#[cfg(feature = "config")]
pub use agent_config as config;

/// Logging setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use agent_telemetry as telemetry;

/// Items most agents need.
#[cfg(feature = "kernel")]
pub mod prelude {
    pub use agent_broker::{Broker, InMemoryBroker};
    pub use agent_kernel::{
        Agent, AgentBuilder, AgentError, CommandContext, ConnectionState, EventContext,
        EventFilter, HandlerError, HandlerResult, Messaging, MessagingError,
    };
    pub use agent_primitives::{AgentIdentity, AgentManifest};

    #[cfg(feature = "amqp")]
    pub use agent_broker::AmqpBroker;
}
