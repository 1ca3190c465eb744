//! Outbound envelope construction.

use agent_broker::{HeaderValue, Headers, MessageProperties, Publishing};
use agent_primitives::AgentIdentity;
use agent_schema::{Message, SchemaRegistry, TypeRegistry};
use chrono::Utc;
use uuid::Uuid;

use crate::MessagingResult;
use crate::topology::TYPE_HEADER;

/// Encodes `value` and wraps it in an envelope ready to publish.
///
/// The value's Rust type is resolved to its registered type name, which must
/// also be the identity of a registered schema. The envelope carries the
/// schema's content type, the schema identity as message type and `type`
/// header, a fresh message id, the current timestamp and `identity` as
/// reply-to address.
pub(crate) fn prepare_publishing(
    types: &TypeRegistry,
    schemas: &SchemaRegistry,
    identity: &AgentIdentity,
    value: &dyn Message,
) -> MessagingResult<Publishing> {
    let name = types.name_of(value)?;
    let schema = schemas.get(&name)?;
    let body = schema.encode(value)?;

    let timestamp = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
    let headers = Headers::from([(TYPE_HEADER.to_owned(), HeaderValue::from(schema.id()))]);
    Ok(Publishing {
        properties: MessageProperties {
            content_type: Some(schema.mime_type().to_owned()),
            headers,
            reply_to: Some(identity.to_string()),
            message_id: Some(Uuid::new_v4().to_string()),
            timestamp: Some(timestamp),
            kind: Some(schema.id().to_owned()),
            ..MessageProperties::default()
        },
        body: body.into(),
    })
}
