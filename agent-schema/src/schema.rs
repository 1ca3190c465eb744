//! The codec-independent schema capability.

use std::fmt::Debug;

use crate::{Message, MessageType, SchemaResult};

/// Content type announced by Avro-encoded payloads.
pub const AVRO_MIME_TYPE: &str = "application/vnd.apache.avro+binary";

/// Content type announced by JSON-encoded payloads.
pub const JSON_MIME_TYPE: &str = "application/schema+json";

/// A loaded schema able to encode and decode payloads.
///
/// Implementations are immutable once constructed and shared across tasks.
pub trait Schema: Send + Sync + Debug {
    /// Returns the schema identity, used as the on-wire message type.
    fn id(&self) -> &str;

    /// Returns the human title, or an empty string when none is defined.
    fn title(&self) -> &str;

    /// Returns the content type of payloads produced by this schema.
    fn mime_type(&self) -> &'static str;

    /// Returns the raw definition text the schema was loaded from.
    fn raw(&self) -> &str;

    /// Decodes `bytes` into a fresh value of the shape described by `ty`.
    ///
    /// # Errors
    ///
    /// Returns a codec error when the payload does not match the schema or the
    /// target shape.
    fn decode(&self, bytes: &[u8], ty: &MessageType) -> SchemaResult<Box<dyn Message>>;

    /// Encodes `value` into bytes.
    ///
    /// # Errors
    ///
    /// Returns a codec error when the value cannot be represented by the schema.
    fn encode(&self, value: &dyn Message) -> SchemaResult<Vec<u8>>;
}
