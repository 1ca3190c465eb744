//! Exchange and queue layout shared by every courier agent.
//!
//! Commands travel through the headers exchange [`COMMAND_EXCHANGE`] and are
//! routed on the [`SEND_TO_HEADER`] header. Each agent instance consumes from
//! three queues:
//!
//! * its exclusive queue, named after its identity, bound to its identity and
//!   to the [`BROADCAST`] destination;
//! * the shared `<agent-type>@<host>` queue;
//! * the shared `<agent-type>` queue.
//!
//! Events travel through [`EVENT_EXCHANGE`]; every subscription gets its own
//! server-named, exclusive, auto-deleted queue bound with the caller's header
//! filter.

use agent_broker::{
    BrokerChannel, BrokerResult, ConsumeOptions, ExchangeKind, ExchangeOptions, HeaderValue,
    Headers, QueueOptions,
};
use agent_primitives::AgentIdentity;
use tracing::debug;

/// Exchange carrying commands.
pub const COMMAND_EXCHANGE: &str = "courier.command";

/// Exchange carrying events.
pub const EVENT_EXCHANGE: &str = "courier.event";

/// Header holding the destination of a command.
pub const SEND_TO_HEADER: &str = "SendTo";

/// Header holding the schema identity of the payload.
pub const TYPE_HEADER: &str = "type";

/// Destination matching the exclusive queue of every agent instance.
pub const BROADCAST: &str = "*";

/// Names of the three command queues of an agent instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandQueues {
    instance: String,
    host_class: String,
    agent_type: String,
}

impl CommandQueues {
    /// Derives the queue names from an agent identity.
    #[must_use]
    pub fn for_identity(identity: &AgentIdentity) -> Self {
        Self {
            instance: identity.to_string(),
            host_class: identity.host_class().to_owned(),
            agent_type: identity.agent_type().to_owned(),
        }
    }

    /// Returns the exclusive per-instance queue name.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Returns the queue shared by instances of the same type on the same host.
    #[must_use]
    pub fn host_class(&self) -> &str {
        &self.host_class
    }

    /// Returns the queue shared by every instance of the same type.
    #[must_use]
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// Returns the three queue names, exclusive queue first.
    #[must_use]
    pub fn names(&self) -> [&str; 3] {
        [&self.instance, &self.host_class, &self.agent_type]
    }
}

/// Header filter selecting events for a subscription.
///
/// Keys starting with `x-` are binding directives rather than headers to match;
/// by default every listed header must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    headers: Headers,
}

impl EventFilter {
    /// Creates a filter matching every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter matching events whose payload has schema identity `id`.
    #[must_use]
    pub fn for_type(id: impl Into<String>) -> Self {
        Self::new().with(TYPE_HEADER, id.into())
    }

    /// Requires header `key` to equal `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Matches when any listed header matches instead of all of them.
    #[must_use]
    pub fn match_any(self) -> Self {
        self.with("x-match", "any")
    }

    /// Returns the binding arguments.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

impl From<Headers> for EventFilter {
    fn from(headers: Headers) -> Self {
        Self { headers }
    }
}

/// Returns the binding arguments routing commands sent to `destination`.
#[must_use]
pub fn send_to(destination: &str) -> Headers {
    Headers::from([(SEND_TO_HEADER.to_owned(), HeaderValue::from(destination))])
}

pub(crate) fn consume_options() -> ConsumeOptions {
    ConsumeOptions {
        no_ack: true,
        ..ConsumeOptions::default()
    }
}

pub(crate) async fn declare_exchanges(channel: &dyn BrokerChannel) -> BrokerResult<()> {
    let options = ExchangeOptions {
        durable: true,
        auto_delete: false,
        internal: false,
    };
    for exchange in [COMMAND_EXCHANGE, EVENT_EXCHANGE] {
        channel
            .declare_exchange(exchange, ExchangeKind::Headers, options)
            .await?;
    }
    Ok(())
}

pub(crate) async fn declare_command_queues(
    channel: &dyn BrokerChannel,
    queues: &CommandQueues,
) -> BrokerResult<()> {
    let exclusive = QueueOptions {
        exclusive: true,
        ..QueueOptions::default()
    };
    channel.declare_queue(queues.instance(), exclusive).await?;
    for destination in [queues.instance(), BROADCAST] {
        channel
            .bind_queue(queues.instance(), COMMAND_EXCHANGE, "", send_to(destination))
            .await?;
    }

    for shared in [queues.host_class(), queues.agent_type()] {
        channel.declare_queue(shared, QueueOptions::default()).await?;
        channel
            .bind_queue(shared, COMMAND_EXCHANGE, "", send_to(shared))
            .await?;
    }
    debug!(queues = ?queues.names(), "declared command queues");
    Ok(())
}

pub(crate) async fn declare_event_queue(
    channel: &dyn BrokerChannel,
    filter: &EventFilter,
) -> BrokerResult<String> {
    let options = QueueOptions {
        exclusive: true,
        auto_delete: true,
        durable: false,
    };
    let queue = channel.declare_queue("", options).await?;
    channel
        .bind_queue(&queue, EVENT_EXCHANGE, "", filter.headers().clone())
        .await?;
    debug!(%queue, filter = ?filter.headers(), "declared event queue");
    Ok(queue)
}
