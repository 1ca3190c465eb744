//! Broker protocol abstraction used by courier agents.
//!
//! The crate models the subset of AMQP 0-9-1 the agents rely on: exchanges,
//! queues, header bindings, consumers, and publishing with basic properties.
//! [`InMemoryBroker`] implements the model inside the process; the `amqp`
//! feature adds [`AmqpBroker`], an adapter over `lapin`.

#![warn(missing_docs, clippy::pedantic)]

#[cfg(feature = "amqp")]
mod amqp;
mod broker;
mod error;
mod memory;
mod wire;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use broker::{Broker, BrokerChannel, BrokerConnection, DeliveryStream};
pub use error::{BrokerError, BrokerResult};
pub use memory::InMemoryBroker;
pub use wire::{
    ConsumeOptions, Delivery, ExchangeKind, ExchangeOptions, HeaderValue, Headers,
    MessageProperties, Publishing, QueueOptions,
};
