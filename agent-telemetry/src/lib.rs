//! Observability utilities for agents.
//!
//! Installs a `tracing-subscriber` formatter honouring `RUST_LOG`, falling back
//! to the configured level directive when the variable is unset.

#![warn(missing_docs, clippy::pedantic)]

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

/// Errors produced while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The level directive could not be parsed.
    #[error("invalid log filter `{directive}`: {reason}")]
    InvalidFilter {
        /// Offending directive.
        directive: String,
        /// Parser message.
        reason: String,
    },

    /// A global subscriber is already installed.
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Logging options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `agent_kernel=debug`.
    pub level: String,
    /// Include the event target in each line.
    pub with_target: bool,
    /// Emit ANSI colour codes.
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            with_target: true,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Returns a copy using `level` as the fallback directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Builds the filter: `RUST_LOG` when set, the configured level otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidFilter`] when the configured level is
    /// not a valid directive.
    pub fn filter(&self) -> Result<EnvFilter, TelemetryError> {
        EnvFilter::try_from_default_env().or_else(|_| {
            EnvFilter::try_new(&self.level).map_err(|err| TelemetryError::InvalidFilter {
                directive: self.level.clone(),
                reason: err.to_string(),
            })
        })
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] for an invalid level and
/// [`TelemetryError::AlreadyInitialized`] when called more than once.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = config.filter()?;
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(config.with_target)
                .with_ansi(config.ansi),
        )
        .with(filter)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_is_reported() {
        let config = TelemetryConfig::default().with_level("courier=loud");
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(
                config.filter(),
                Err(TelemetryError::InvalidFilter { .. })
            ));
        }
    }

    #[test]
    fn second_init_fails() {
        let config = TelemetryConfig {
            ansi: false,
            ..TelemetryConfig::default()
        };
        let first = init(&config);
        let second = init(&config);
        assert!(first.is_ok() || matches!(first, Err(TelemetryError::AlreadyInitialized)));
        assert!(matches!(second, Err(TelemetryError::AlreadyInitialized)));
    }
}
