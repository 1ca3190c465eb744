//! Per-delivery contexts handed to command and event callbacks.

use std::any::Any;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use agent_broker::{Delivery, Headers, MessageProperties};
use agent_schema::{Message, Schema};

use crate::topology::{COMMAND_EXCHANGE, EVENT_EXCHANGE, SEND_TO_HEADER};
use crate::{Messaging, MessagingError, MessagingResult};

/// Inbound message paired with its schema and decoded value.
///
/// A context lives for a single callback invocation.
#[derive(Debug)]
pub struct MessageContext {
    messaging: Messaging,
    delivery: Delivery,
    schema: Arc<dyn Schema>,
    message: Box<dyn Message>,
}

impl MessageContext {
    pub(crate) fn new(
        messaging: Messaging,
        delivery: Delivery,
        schema: Arc<dyn Schema>,
        message: Box<dyn Message>,
    ) -> Self {
        Self {
            messaging,
            delivery,
            schema,
            message,
        }
    }

    /// Returns the messaging handle of the receiving agent.
    #[must_use]
    pub fn messaging(&self) -> &Messaging {
        &self.messaging
    }

    /// Returns the decoded payload.
    #[must_use]
    pub fn message(&self) -> &dyn Message {
        self.message.as_ref()
    }

    /// Returns the decoded payload as `T`, or `None` when it has another type.
    #[must_use]
    pub fn message_as<T: Any>(&self) -> Option<&T> {
        self.message.as_any().downcast_ref::<T>()
    }

    /// Returns the schema the payload was decoded with.
    #[must_use]
    pub fn schema(&self) -> &Arc<dyn Schema> {
        &self.schema
    }

    /// Returns the raw delivery.
    #[must_use]
    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    fn properties(&self) -> &MessageProperties {
        &self.delivery.properties
    }

    /// Returns the content type of the payload.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.properties().content_type.as_deref()
    }

    /// Returns the content encoding of the payload.
    #[must_use]
    pub fn content_encoding(&self) -> Option<&str> {
        self.properties().content_encoding.as_deref()
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.properties().correlation_id.as_deref()
    }

    /// Returns the identity replies should be routed to.
    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.properties().reply_to.as_deref()
    }

    /// Returns the expiration in milliseconds.
    #[must_use]
    pub fn expiration(&self) -> Option<&str> {
        self.properties().expiration.as_deref()
    }

    /// Returns the message id.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.properties().message_id.as_deref()
    }

    /// Returns the message type, i.e. the schema identity.
    #[must_use]
    pub fn message_type(&self) -> Option<&str> {
        self.properties().kind.as_deref()
    }

    /// Returns the publishing user id.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.properties().user_id.as_deref()
    }

    /// Returns the publishing application id.
    #[must_use]
    pub fn app_id(&self) -> Option<&str> {
        self.properties().app_id.as_deref()
    }

    /// Returns the publication time in seconds since the Unix epoch.
    #[must_use]
    pub fn timestamp(&self) -> Option<u64> {
        self.properties().timestamp
    }

    /// Returns the message headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.properties().headers
    }

    /// Returns the basic properties as a flat map keyed by their AMQP names.
    /// Absent properties map to an empty string.
    #[must_use]
    pub fn property_map(&self) -> BTreeMap<&'static str, String> {
        let props = self.properties();
        [
            ("content-type", &props.content_type),
            ("content-encoding", &props.content_encoding),
            ("correlation-id", &props.correlation_id),
            ("reply-to", &props.reply_to),
            ("expiration", &props.expiration),
            ("message-id", &props.message_id),
            ("type", &props.kind),
            ("user-id", &props.user_id),
            ("app-id", &props.app_id),
        ]
        .into_iter()
        .map(|(key, value)| (key, value.clone().unwrap_or_default()))
        .collect()
    }

    async fn reply(
        &self,
        exchange: &str,
        destination: &str,
        value: &dyn Message,
    ) -> MessagingResult<()> {
        let mut publishing = self.messaging.prepare_publishing(value)?;
        publishing.properties.correlation_id = self.message_id().map(str::to_owned);
        publishing
            .properties
            .headers
            .insert(SEND_TO_HEADER.to_owned(), destination.into());
        self.messaging.publish(exchange, publishing).await
    }

    async fn reply_command(&self, to: &str, value: &dyn Message) -> MessagingResult<()> {
        let destination = if to.is_empty() {
            self.reply_to().ok_or(MessagingError::MissingDestination)?
        } else {
            to
        };
        self.reply(COMMAND_EXCHANGE, destination, value).await
    }
}

/// Context of a received command.
#[derive(Debug)]
pub struct CommandContext {
    inner: MessageContext,
}

impl CommandContext {
    pub(crate) fn new(inner: MessageContext) -> Self {
        Self { inner }
    }

    /// Publishes an event answering this command.
    ///
    /// The event is addressed to the sender through the `SendTo` header and
    /// correlated with the command's message id.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::MissingDestination`] when the command carries
    /// no reply-to address, or the encoding and broker errors of publishing.
    pub async fn send_event(&self, value: &dyn Message) -> MessagingResult<()> {
        let destination = self
            .reply_to()
            .ok_or(MessagingError::MissingDestination)?;
        self.reply(EVENT_EXCHANGE, destination, value).await
    }

    /// Sends a command correlated with this one. An empty `to` routes the
    /// command back to the sender.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::MissingDestination`] when `to` is empty and the
    /// command carries no reply-to address, or the encoding and broker errors
    /// of publishing.
    pub async fn send_command(&self, to: &str, value: &dyn Message) -> MessagingResult<()> {
        self.reply_command(to, value).await
    }
}

impl Deref for CommandContext {
    type Target = MessageContext;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Context of a received event.
#[derive(Debug)]
pub struct EventContext {
    inner: MessageContext,
    queue: String,
}

impl EventContext {
    pub(crate) fn new(inner: MessageContext, queue: String) -> Self {
        Self { inner, queue }
    }

    /// Returns the subscription queue the event arrived on.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Sends a command correlated with this event. An empty `to` routes the
    /// command back to the publisher.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::MissingDestination`] when `to` is empty and the
    /// event carries no reply-to address, or the encoding and broker errors of
    /// publishing.
    pub async fn send_command(&self, to: &str, value: &dyn Message) -> MessagingResult<()> {
        self.reply_command(to, value).await
    }
}

impl Deref for EventContext {
    type Target = MessageContext;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
