//! In-process broker emulating AMQP 0-9-1 routing semantics.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{
    Broker, BrokerChannel, BrokerConnection, BrokerError, BrokerResult, ConsumeOptions, Delivery,
    DeliveryStream, ExchangeKind, ExchangeOptions, HeaderValue, Headers, Publishing, QueueOptions,
};

/// Broker living entirely inside the current process.
///
/// Exchanges, queues, and bindings behave like their AMQP counterparts:
/// headers exchanges honour `x-match` (`all` by default, or `any`), topic
/// exchanges understand `*` and `#`, exclusive queues are locked to the
/// declaring connection and vanish with it, and competing consumers on a
/// shared queue each receive a distinct subset of the messages. Cloning the
/// broker yields another handle on the same state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    refuse_connections: bool,
    next_connection: u64,
    next_delivery_tag: u64,
    connections: HashMap<u64, watch::Sender<bool>>,
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
}

struct Exchange {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

#[derive(PartialEq)]
struct Binding {
    queue: String,
    routing_key: String,
    arguments: Headers,
}

struct Queue {
    options: QueueOptions,
    owner: u64,
    consumers: HashMap<u64, usize>,
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<Delivery>>>,
}

impl Queue {
    fn check_access(&self, name: &str, connection: u64) -> BrokerResult<()> {
        if self.options.exclusive && self.owner != connection {
            return Err(BrokerError::ResourceLocked { queue: name.into() });
        }
        Ok(())
    }
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("exchanges", &self.exchange_names())
            .field("queues", &self.queue_names())
            .finish()
    }
}

impl InMemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        lock_state(&self.state)
    }

    /// Makes subsequent connection attempts fail, as an unreachable server would.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Closes every open connection from the server side.
    ///
    /// Consumer streams of the affected connections end and their exclusive
    /// queues are deleted.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn close_all_connections(&self) {
        let mut state = self.lock();
        let ids: Vec<_> = state.connections.keys().copied().collect();
        for id in ids {
            state.close_connection(id);
        }
        debug!("in-memory broker closed all connections");
    }

    /// Returns the names of all declared exchanges, sorted.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn exchange_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().exchanges.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the names of all declared queues, sorted.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }
}

fn lock_state(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    state.lock().expect("in-memory broker state poisoned")
}

impl BrokerState {
    fn close_connection(&mut self, id: u64) {
        if let Some(closed) = self.connections.remove(&id) {
            closed.send_replace(true);
        }

        let doomed: Vec<_> = self
            .queues
            .iter_mut()
            .filter_map(|(name, queue)| {
                let was_consuming = queue.consumers.remove(&id).is_some();
                let exclusive = queue.options.exclusive && queue.owner == id;
                let abandoned =
                    queue.options.auto_delete && was_consuming && queue.consumers.is_empty();
                (exclusive || abandoned).then(|| name.clone())
            })
            .collect();
        for name in doomed {
            self.delete_queue(&name);
        }
        trace!(connection = id, "in-memory connection closed");
    }

    fn delete_queue(&mut self, name: &str) {
        self.queues.remove(name);
        for exchange in self.exchanges.values_mut() {
            exchange.bindings.retain(|binding| binding.queue != name);
        }
        trace!(queue = name, "in-memory queue deleted");
    }

    fn route(&self, exchange: &str, routing_key: &str, headers: &Headers) -> BrokerResult<BTreeSet<String>> {
        if exchange.is_empty() {
            return Ok(self
                .queues
                .contains_key(routing_key)
                .then(|| routing_key.to_owned())
                .into_iter()
                .collect());
        }

        let exchange = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::exchange_not_found(exchange))?;
        Ok(exchange
            .bindings
            .iter()
            .filter(|binding| match exchange.kind {
                ExchangeKind::Direct => binding.routing_key == routing_key,
                ExchangeKind::Fanout => true,
                ExchangeKind::Topic => topic_matches(&binding.routing_key, routing_key),
                ExchangeKind::Headers => headers_match(&binding.arguments, headers),
            })
            .map(|binding| binding.queue.clone())
            .collect())
    }
}

fn headers_match(arguments: &Headers, headers: &Headers) -> bool {
    let match_any = arguments.get("x-match").and_then(HeaderValue::as_str) == Some("any");
    let mut pairs = arguments.iter().filter(|(key, _)| !key.starts_with("x-"));
    if match_any {
        pairs.any(|(key, value)| headers.get(key) == Some(value))
    } else {
        pairs.all(|(key, value)| headers.get(key) == Some(value))
    }
}

fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<_> = pattern.split('.').collect();
    let words: Vec<_> = if routing_key.is_empty() {
        Vec::new()
    } else {
        routing_key.split('.').collect()
    };
    words_match(&pattern, &words)
}

fn words_match(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => (0..=words.len()).any(|skip| words_match(rest, &words[skip..])),
        Some((&expected, rest)) => words.split_first().is_some_and(|(&word, tail)| {
            (expected == "*" || expected == word) && words_match(rest, tail)
        }),
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self, endpoint: &str) -> BrokerResult<Arc<dyn BrokerConnection>> {
        let mut state = self.lock();
        if state.refuse_connections {
            return Err(BrokerError::connection(format!(
                "in-memory broker refused connection to {endpoint}"
            )));
        }

        state.next_connection += 1;
        let id = state.next_connection;
        let (closed_tx, closed_rx) = watch::channel(false);
        state.connections.insert(id, closed_tx);
        debug!(connection = id, %endpoint, "in-memory connection opened");

        Ok(Arc::new(MemoryConnection {
            id,
            state: Arc::clone(&self.state),
            closed: closed_rx,
        }))
    }
}

struct MemoryConnection {
    id: u64,
    state: Arc<Mutex<BrokerState>>,
    closed: watch::Receiver<bool>,
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn open_channel(&self) -> BrokerResult<Arc<dyn BrokerChannel>> {
        if !self.is_open() {
            return Err(BrokerError::Closed);
        }
        Ok(Arc::new(MemoryChannel {
            connection: self.id,
            state: Arc::clone(&self.state),
            closed: self.closed.clone(),
        }))
    }

    async fn close(&self) -> BrokerResult<()> {
        lock_state(&self.state).close_connection(self.id);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }
}

struct MemoryChannel {
    connection: u64,
    state: Arc<Mutex<BrokerState>>,
    closed: watch::Receiver<bool>,
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl MemoryChannel {
    fn open_state(&self) -> BrokerResult<MutexGuard<'_, BrokerState>> {
        if *self.closed.borrow() {
            return Err(BrokerError::Closed);
        }
        Ok(lock_state(&self.state))
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        _options: ExchangeOptions,
    ) -> BrokerResult<()> {
        let mut state = self.open_state()?;
        match state.exchanges.get(name) {
            Some(existing) if existing.kind != kind => Err(BrokerError::PreconditionFailed {
                reason: format!(
                    "exchange `{name}` already declared as {:?}",
                    existing.kind
                ),
            }),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(
                    name.to_owned(),
                    Exchange {
                        kind,
                        bindings: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, name: &str, options: QueueOptions) -> BrokerResult<String> {
        let mut state = self.open_state()?;
        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            name.to_owned()
        };

        if let Some(queue) = state.queues.get(&name) {
            queue.check_access(&name, self.connection)?;
        } else {
            let (sender, receiver) = mpsc::unbounded_channel();
            state.queues.insert(
                name.clone(),
                Queue {
                    options,
                    owner: self.connection,
                    consumers: HashMap::new(),
                    sender,
                    receiver: Arc::new(AsyncMutex::new(receiver)),
                },
            );
        }
        Ok(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: Headers,
    ) -> BrokerResult<()> {
        let mut state = self.open_state()?;
        state
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::queue_not_found(queue))?
            .check_access(queue, self.connection)?;

        let exchange = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::exchange_not_found(exchange))?;
        let binding = Binding {
            queue: queue.to_owned(),
            routing_key: routing_key.to_owned(),
            arguments,
        };
        if !exchange.bindings.contains(&binding) {
            exchange.bindings.push(binding);
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, _options: ConsumeOptions) -> BrokerResult<DeliveryStream> {
        let receiver = {
            let mut state = self.open_state()?;
            let entry = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::queue_not_found(queue))?;
            entry.check_access(queue, self.connection)?;
            *entry.consumers.entry(self.connection).or_default() += 1;
            Arc::clone(&entry.receiver)
        };

        let deliveries = stream::unfold(receiver, |receiver| async move {
            let delivery = receiver.lock().await.recv().await;
            delivery.map(|delivery| (delivery, receiver))
        });
        let mut closed = self.closed.clone();
        let shutdown = async move {
            let _ = closed.wait_for(|closed| *closed).await;
        };
        Ok(deliveries.take_until(shutdown).boxed())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        publishing: Publishing,
    ) -> BrokerResult<()> {
        let mut state = self.open_state()?;
        let targets = state.route(exchange, routing_key, &publishing.properties.headers)?;
        trace!(%exchange, routing_key, queues = targets.len(), "in-memory publish");

        let BrokerState {
            queues,
            next_delivery_tag,
            ..
        } = &mut *state;
        for name in targets {
            let Some(queue) = queues.get(&name) else {
                continue;
            };
            *next_delivery_tag += 1;
            let _ = queue.sender.send(Delivery {
                delivery_tag: *next_delivery_tag,
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
                redelivered: false,
                properties: publishing.properties.clone(),
                body: publishing.body.clone(),
            });
        }
        Ok(())
    }
}
