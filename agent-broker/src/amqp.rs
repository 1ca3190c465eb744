//! AMQP 0-9-1 backend built on `lapin`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, future};
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Connection, ConnectionProperties};
use tracing::{debug, warn};

use crate::{
    Broker, BrokerChannel, BrokerConnection, BrokerError, BrokerResult, ConsumeOptions, Delivery,
    DeliveryStream, ExchangeKind, ExchangeOptions, HeaderValue, Headers, MessageProperties,
    Publishing, QueueOptions,
};

/// Broker backend speaking AMQP 0-9-1 to a remote server.
#[derive(Default, Clone)]
pub struct AmqpBroker {
    properties: ConnectionProperties,
}

impl fmt::Debug for AmqpBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpBroker").finish_non_exhaustive()
    }
}

impl AmqpBroker {
    /// Creates a backend using default connection properties.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend using custom connection properties.
    #[must_use]
    pub fn with_properties(properties: ConnectionProperties) -> Self {
        Self { properties }
    }
}

fn protocol(err: lapin::Error) -> BrokerError {
    BrokerError::protocol(err.to_string())
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(&self, endpoint: &str) -> BrokerResult<Arc<dyn BrokerConnection>> {
        let connection = Connection::connect(endpoint, self.properties.clone())
            .await
            .map_err(|err| BrokerError::connection(err.to_string()))?;
        debug!(%endpoint, "amqp connection established");
        Ok(Arc::new(AmqpConnection { connection }))
    }
}

struct AmqpConnection {
    connection: Connection,
}

impl fmt::Debug for AmqpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpConnection")
            .field("open", &self.is_open())
            .finish()
    }
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn open_channel(&self) -> BrokerResult<Arc<dyn BrokerChannel>> {
        let channel = self.connection.create_channel().await.map_err(protocol)?;
        Ok(Arc::new(AmqpChannel { channel }))
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.connection
            .close(200, "closed by agent")
            .await
            .map_err(protocol)
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected()
    }
}

struct AmqpChannel {
    channel: lapin::Channel,
}

impl fmt::Debug for AmqpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpChannel")
            .field("id", &self.channel.id())
            .finish()
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> BrokerResult<()> {
        let kind = match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        };
        let options = ExchangeDeclareOptions {
            durable: options.durable,
            auto_delete: options.auto_delete,
            internal: options.internal,
            ..ExchangeDeclareOptions::default()
        };
        self.channel
            .exchange_declare(name, kind, options, FieldTable::default())
            .await
            .map_err(protocol)
    }

    async fn declare_queue(&self, name: &str, options: QueueOptions) -> BrokerResult<String> {
        let options = QueueDeclareOptions {
            durable: options.durable,
            exclusive: options.exclusive,
            auto_delete: options.auto_delete,
            ..QueueDeclareOptions::default()
        };
        let queue = self
            .channel
            .queue_declare(name, options, FieldTable::default())
            .await
            .map_err(protocol)?;
        Ok(queue.name().as_str().to_owned())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: Headers,
    ) -> BrokerResult<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                to_field_table(&arguments),
            )
            .await
            .map_err(protocol)
    }

    async fn consume(&self, queue: &str, options: ConsumeOptions) -> BrokerResult<DeliveryStream> {
        let consume_options = BasicConsumeOptions {
            no_ack: options.no_ack,
            exclusive: options.exclusive,
            ..BasicConsumeOptions::default()
        };
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &options.consumer_tag,
                consume_options,
                FieldTable::default(),
            )
            .await
            .map_err(protocol)?;

        let queue = queue.to_owned();
        Ok(consumer
            .take_while(move |delivery| {
                if let Err(err) = delivery {
                    warn!(%queue, error = %err, "amqp consumer stopped");
                }
                future::ready(delivery.is_ok())
            })
            .filter_map(|delivery| future::ready(delivery.ok().map(from_lapin_delivery)))
            .boxed())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        publishing: Publishing,
    ) -> BrokerResult<()> {
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &publishing.body,
                to_basic_properties(publishing.properties),
            )
            .await
            .map_err(protocol)?;
        Ok(())
    }
}

fn to_field_table(headers: &Headers) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        let value = match value {
            HeaderValue::Bool(flag) => AMQPValue::Boolean(*flag),
            HeaderValue::Int(number) => AMQPValue::LongLongInt(*number),
            HeaderValue::String(text) => AMQPValue::LongString(LongString::from(text.clone())),
        };
        table.insert(ShortString::from(key.clone()), value);
    }
    table
}

fn from_field_table(table: &FieldTable) -> Headers {
    table
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                AMQPValue::Boolean(flag) => HeaderValue::Bool(*flag),
                AMQPValue::ShortShortInt(n) => HeaderValue::Int(i64::from(*n)),
                AMQPValue::ShortInt(n) => HeaderValue::Int(i64::from(*n)),
                AMQPValue::LongInt(n) => HeaderValue::Int(i64::from(*n)),
                AMQPValue::LongLongInt(n) => HeaderValue::Int(*n),
                AMQPValue::ShortString(text) => HeaderValue::String(text.as_str().to_owned()),
                AMQPValue::LongString(text) => {
                    HeaderValue::String(String::from_utf8_lossy(text.as_bytes()).into_owned())
                }
                _ => return None,
            };
            Some((key.as_str().to_owned(), value))
        })
        .collect::<BTreeMap<_, _>>()
}

fn to_basic_properties(properties: MessageProperties) -> BasicProperties {
    let mut basic = BasicProperties::default().with_headers(to_field_table(&properties.headers));
    let short = |value: String| ShortString::from(value);
    if let Some(value) = properties.content_type {
        basic = basic.with_content_type(short(value));
    }
    if let Some(value) = properties.content_encoding {
        basic = basic.with_content_encoding(short(value));
    }
    if let Some(value) = properties.correlation_id {
        basic = basic.with_correlation_id(short(value));
    }
    if let Some(value) = properties.reply_to {
        basic = basic.with_reply_to(short(value));
    }
    if let Some(value) = properties.expiration {
        basic = basic.with_expiration(short(value));
    }
    if let Some(value) = properties.message_id {
        basic = basic.with_message_id(short(value));
    }
    if let Some(value) = properties.timestamp {
        basic = basic.with_timestamp(value);
    }
    if let Some(value) = properties.kind {
        basic = basic.with_kind(short(value));
    }
    if let Some(value) = properties.user_id {
        basic = basic.with_user_id(short(value));
    }
    if let Some(value) = properties.app_id {
        basic = basic.with_app_id(short(value));
    }
    basic
}

fn from_basic_properties(basic: &BasicProperties) -> MessageProperties {
    let text = |value: &Option<ShortString>| value.as_ref().map(|value| value.as_str().to_owned());
    MessageProperties {
        content_type: text(basic.content_type()),
        content_encoding: text(basic.content_encoding()),
        headers: basic
            .headers()
            .as_ref()
            .map(from_field_table)
            .unwrap_or_default(),
        correlation_id: text(basic.correlation_id()),
        reply_to: text(basic.reply_to()),
        expiration: text(basic.expiration()),
        message_id: text(basic.message_id()),
        timestamp: *basic.timestamp(),
        kind: text(basic.kind()),
        user_id: text(basic.user_id()),
        app_id: text(basic.app_id()),
    }
}

fn from_lapin_delivery(delivery: lapin::message::Delivery) -> Delivery {
    Delivery {
        delivery_tag: delivery.delivery_tag,
        exchange: delivery.exchange.as_str().to_owned(),
        routing_key: delivery.routing_key.as_str().to_owned(),
        redelivered: delivery.redelivered,
        properties: from_basic_properties(&delivery.properties),
        body: delivery.data.into(),
    }
}
