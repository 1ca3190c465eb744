//! Payload schemas and runtime type descriptors for courier agents.
//!
//! A [`Schema`] turns bytes into typed values and back. Two codec families are
//! provided: binary Avro ([`AvroSchema`]) and plain JSON ([`JsonSchema`]). The
//! [`TypeRegistry`] links the identity of a schema to the Rust type able to hold
//! its payloads, so inbound deliveries can be materialized without the caller
//! naming the type up front.

#![warn(missing_docs, clippy::pedantic)]

mod avro;
mod error;
mod json;
mod registry;
mod schema;
mod types;

pub use avro::AvroSchema;
pub use error::{SchemaError, SchemaResult};
pub use json::JsonSchema;
pub use registry::SchemaRegistry;
pub use schema::{AVRO_MIME_TYPE, JSON_MIME_TYPE, Schema};
pub use types::{Message, MessageType, TypeRegistry};

/// Re-export of the Avro value model used by [`Message::to_avro`].
pub use apache_avro::types::Value as AvroValue;
