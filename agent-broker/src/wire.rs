//! Wire-level message model mirroring AMQP 0-9-1 basic properties.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

/// Value carried in a message header or binding argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// UTF-8 string.
    String(String),
}

impl HeaderValue {
    /// Returns the string payload, if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
        }
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Header table attached to messages and bindings.
pub type Headers = BTreeMap<String, HeaderValue>;

/// Basic properties of a message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// MIME type of the body.
    pub content_type: Option<String>,
    /// Encoding applied to the body.
    pub content_encoding: Option<String>,
    /// Application headers.
    pub headers: Headers,
    /// Identifier of the message this one answers.
    pub correlation_id: Option<String>,
    /// Address replies should be sent to.
    pub reply_to: Option<String>,
    /// Expiration in milliseconds, as a string.
    pub expiration: Option<String>,
    /// Unique message identifier.
    pub message_id: Option<String>,
    /// Creation time in seconds since the Unix epoch.
    pub timestamp: Option<u64>,
    /// Application message type.
    pub kind: Option<String>,
    /// Identity of the publishing user.
    pub user_id: Option<String>,
    /// Identity of the publishing application.
    pub app_id: Option<String>,
}

/// Outbound message handed to [`crate::BrokerChannel::publish`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Publishing {
    /// Message properties.
    pub properties: MessageProperties,
    /// Encoded payload.
    pub body: Bytes,
}

/// Inbound message received from a consumer stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped delivery tag.
    pub delivery_tag: u64,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key used at publish time.
    pub routing_key: String,
    /// Whether the message was delivered before.
    pub redelivered: bool,
    /// Message properties.
    pub properties: MessageProperties,
    /// Encoded payload.
    pub body: Bytes,
}

/// Routing algorithm of an exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Exact routing-key match.
    Direct,
    /// Every bound queue.
    Fanout,
    /// Dotted routing-key patterns with `*` and `#` wildcards.
    Topic,
    /// Header table match.
    Headers,
}

/// Flags applied when declaring an exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExchangeOptions {
    /// Survive broker restarts.
    pub durable: bool,
    /// Delete once the last binding is removed.
    pub auto_delete: bool,
    /// Not directly publishable by clients.
    pub internal: bool,
}

/// Flags applied when declaring a queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Survive broker restarts.
    pub durable: bool,
    /// Owned by the declaring connection and deleted when it closes.
    pub exclusive: bool,
    /// Delete once the last consumer is gone.
    pub auto_delete: bool,
}

/// Flags applied when starting a consumer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Consumer tag; the broker generates one when empty.
    pub consumer_tag: String,
    /// Deliveries are acknowledged automatically.
    pub no_ack: bool,
    /// Request exclusive consumer access to the queue.
    pub exclusive: bool,
}
