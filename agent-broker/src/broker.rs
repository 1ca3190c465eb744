//! Traits implemented by broker backends.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    BrokerResult, ConsumeOptions, Delivery, ExchangeKind, ExchangeOptions, Headers, Publishing,
    QueueOptions,
};

/// Stream of deliveries produced by a consumer. The stream ends when the
/// consumer is cancelled or its connection closes.
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Entry point of a broker backend.
#[async_trait]
pub trait Broker: Send + Sync + Debug {
    /// Opens a connection to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BrokerError::Connection`] when the broker is unreachable.
    async fn connect(&self, endpoint: &str) -> BrokerResult<Arc<dyn BrokerConnection>>;
}

/// An open broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync + Debug {
    /// Opens a new channel on the connection.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BrokerError::Closed`] when the connection is closed.
    async fn open_channel(&self) -> BrokerResult<Arc<dyn BrokerChannel>>;

    /// Closes the connection and every resource it owns.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the close handshake fails.
    async fn close(&self) -> BrokerResult<()>;

    /// Returns `true` while the connection is usable.
    fn is_open(&self) -> bool;
}

/// A channel multiplexed over a connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync + Debug {
    /// Declares an exchange.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BrokerError::PreconditionFailed`] when an exchange with
    /// the same name but another kind exists.
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> BrokerResult<()>;

    /// Declares a queue and returns its name. An empty name asks the broker to
    /// generate one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BrokerError::ResourceLocked`] when the queue is
    /// exclusive to another connection.
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> BrokerResult<String>;

    /// Binds `queue` to `exchange`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BrokerError::NotFound`] when either side is missing.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: Headers,
    ) -> BrokerResult<()>;

    /// Starts consuming from `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BrokerError::NotFound`] when the queue is missing.
    async fn consume(&self, queue: &str, options: ConsumeOptions) -> BrokerResult<DeliveryStream>;

    /// Publishes a message.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BrokerError::NotFound`] when the exchange is missing.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        publishing: Publishing,
    ) -> BrokerResult<()>;
}
