//! Core shared types for courier agents.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod ids;
mod manifest;

/// Error type and result alias shared across the SDK.
pub use error::{Error, Result};
/// Globally unique identity of a running agent instance.
pub use ids::{AgentIdentity, local_host};
/// Agent metadata describing the agent type.
pub use manifest::{AgentManifest, AgentManifestBuilder};
