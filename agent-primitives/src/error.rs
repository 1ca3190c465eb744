//! Shared error definitions for agent primitives.

use thiserror::Error;

/// Result alias used throughout the agent runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while manipulating agent primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided agent identity could not be built or parsed.
    #[error("invalid agent identity `{value}`: {reason}")]
    InvalidIdentity {
        /// The offending identity string.
        value: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Manifest definition failed validation.
    #[error("invalid manifest: {reason}")]
    InvalidManifest {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Manifest document was not valid JSON.
    #[error("malformed manifest document: {source}")]
    ManifestFormat {
        /// Source parsing error from `serde_json`.
        #[from]
        source: serde_json::Error,
    },
}
