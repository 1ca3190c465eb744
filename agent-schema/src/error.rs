//! Errors raised by schema loading, registries, and codecs.

use thiserror::Error;

/// Result alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors produced by schemas and the registries that hold them.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Schema definition text could not be interpreted.
    #[error("invalid schema definition: {reason}")]
    InvalidDefinition {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Schema definition does not carry an identity.
    #[error("{mime_type} schema has no identity: {reason}")]
    MissingIdentity {
        /// Mime type of the schema being loaded.
        mime_type: &'static str,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// No schema is registered under the given identity.
    #[error("schema `{id}` is not registered")]
    SchemaNotFound {
        /// Schema identity that failed to resolve.
        id: String,
    },

    /// No type is registered under the given logical name.
    #[error("type `{name}` is not registered")]
    TypeNotFound {
        /// Logical type name that failed to resolve.
        name: String,
    },

    /// The Rust type of a value has no registered logical name.
    #[error("no type name is registered for values of `{type_name}`")]
    UnregisteredShape {
        /// Rust type name of the value.
        type_name: String,
    },

    /// Avro parsing or encoding failed.
    #[error("avro codec error: {source}")]
    Avro {
        /// Underlying Avro error.
        source: Box<apache_avro::Error>,
    },

    /// JSON parsing or encoding failed.
    #[error("json codec error: {source}")]
    Json {
        /// Underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}

impl SchemaError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            reason: reason.into(),
        }
    }
}

impl From<apache_avro::Error> for SchemaError {
    fn from(source: apache_avro::Error) -> Self {
        Self::Avro {
            source: Box::new(source),
        }
    }
}
