//! Plain JSON codec.

use serde_json::Value;

use crate::schema::JSON_MIME_TYPE;
use crate::{Message, MessageType, Schema, SchemaError, SchemaResult};

/// Schema described by a JSON Schema document.
///
/// Only the `id` and `title` attributes are interpreted. Payloads are the plain
/// JSON form of the target type and are not validated against the document.
#[derive(Debug, Clone)]
pub struct JsonSchema {
    id: String,
    title: String,
    raw: String,
}

impl JsonSchema {
    /// Loads a schema document.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Json`] for malformed documents,
    /// [`SchemaError::InvalidDefinition`] when the document is not an object and
    /// [`SchemaError::MissingIdentity`] when `id` is absent or not a string.
    pub fn load(raw: impl Into<String>) -> SchemaResult<Self> {
        let raw = raw.into();
        let document: Value = serde_json::from_str(&raw)?;
        let Value::Object(fields) = &document else {
            return Err(SchemaError::invalid("json schema must be an object"));
        };

        let id = match fields.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::String(_)) => return Err(missing("`id` cannot be empty")),
            Some(_) => return Err(missing("`id` must be a string")),
            None => return Err(missing("`id` is required")),
        };
        let title = fields
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        Ok(Self { id, title, raw })
    }
}

fn missing(reason: &str) -> SchemaError {
    SchemaError::MissingIdentity {
        mime_type: JSON_MIME_TYPE,
        reason: reason.into(),
    }
}

impl Schema for JsonSchema {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn mime_type(&self) -> &'static str {
        JSON_MIME_TYPE
    }

    fn raw(&self) -> &str {
        &self.raw
    }

    fn decode(&self, bytes: &[u8], ty: &MessageType) -> SchemaResult<Box<dyn Message>> {
        Ok(ty.from_json(bytes)?)
    }

    fn encode(&self, value: &dyn Message) -> SchemaResult<Vec<u8>> {
        Ok(value.to_json()?)
    }
}
