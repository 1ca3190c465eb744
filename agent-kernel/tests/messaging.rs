use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use agent_broker::{
    Broker, ExchangeKind, ExchangeOptions, InMemoryBroker, MessageProperties, Publishing,
    QueueOptions,
};
use agent_kernel::topology::{
    COMMAND_EXCHANGE, EVENT_EXCHANGE, SEND_TO_HEADER, TYPE_HEADER, send_to,
};
use agent_kernel::{
    Agent, CommandContext, ConnectionState, EventContext, EventFilter, HandlerError, Messaging,
    MessagingError,
};
use agent_primitives::AgentManifest;
use agent_schema::JSON_MIME_TYPE;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping {
    seq: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Pong {
    seq: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reading {
    sensor: String,
    value: f64,
}

const READING_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Reading",
    "namespace": "demo",
    "fields": [
        {"name": "sensor", "type": "string"},
        {"name": "value", "type": "double"}
    ]
}"#;

fn agent(name: &str, broker: &InMemoryBroker) -> Agent {
    let manifest = AgentManifest::builder()
        .name(name)
        .unwrap()
        .version("0.1.0")
        .unwrap()
        .build()
        .unwrap();
    let agent = Agent::builder(manifest)
        .broker(Arc::new(broker.clone()))
        .host("test-host")
        .build()
        .unwrap();

    agent
        .register_json_schema(r#"{"id": "demo.Ping", "title": "Ping"}"#)
        .unwrap();
    agent
        .register_json_schema(r#"{"id": "demo.Pong", "title": "Pong"}"#)
        .unwrap();
    agent.register_avro_schema(READING_SCHEMA).unwrap();
    agent.register_type::<Ping>("demo.Ping").unwrap();
    agent.register_type::<Pong>("demo.Pong").unwrap();
    agent.register_type::<Reading>("demo.Reading").unwrap();
    agent
}

async fn connected(name: &str, broker: &InMemoryBroker) -> Agent {
    let agent = agent(name, broker);
    agent.messaging().connect().await.unwrap();
    agent
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("callback channel closed")
}

fn record_pings(messaging: &Messaging) -> mpsc::UnboundedReceiver<i64> {
    let (tx, rx) = mpsc::unbounded_channel();
    messaging
        .register_command_callback("demo.Ping", move |ctx: CommandContext| {
            let tx = tx.clone();
            async move {
                let ping = ctx
                    .message_as::<Ping>()
                    .ok_or_else(|| HandlerError::custom("not a ping"))?;
                tx.send(ping.seq).ok();
                Ok::<_, HandlerError>(())
            }
        })
        .unwrap();
    rx
}

#[tokio::test]
async fn connect_declares_topology_and_notifies_state_callbacks() {
    let broker = InMemoryBroker::new();
    let agent = agent("pinger", &broker);
    let messaging = agent.messaging();

    let (tx, mut states) = mpsc::unbounded_channel();
    messaging.register_state_callback(move |_: Messaging, state: ConnectionState| {
        let tx = tx.clone();
        async move {
            tx.send(state).ok();
            Ok::<_, HandlerError>(())
        }
    });

    messaging.connect().await.unwrap();
    assert_eq!(messaging.state(), ConnectionState::Connected);
    assert_eq!(states.try_recv().unwrap(), ConnectionState::Connected);

    let err = messaging.connect().await.expect_err("second connect");
    assert!(matches!(err, MessagingError::AlreadyConnected { .. }));
    assert!(states.try_recv().is_err());

    assert_eq!(broker.exchange_names(), [COMMAND_EXCHANGE, EVENT_EXCHANGE]);
    let queues = broker.queue_names();
    for expected in [agent.identity().as_str(), "pinger@test-host", "pinger"] {
        assert!(queues.iter().any(|queue| queue == expected), "{expected} missing");
    }

    messaging.disconnect().await.unwrap();
    assert_eq!(messaging.state(), ConnectionState::Disconnected);
    assert_eq!(states.try_recv().unwrap(), ConnectionState::Disconnected);
    assert!(!broker.queue_names().iter().any(|q| q == agent.identity().as_str()));

    let err = messaging.disconnect().await.expect_err("second disconnect");
    assert!(matches!(err, MessagingError::NotConnected));
    assert!(states.try_recv().is_err());
}

#[tokio::test]
async fn state_callbacks_run_in_registration_order_and_can_be_removed() {
    let broker = InMemoryBroker::new();
    let agent = agent("pinger", &broker);
    let messaging = agent.messaging();

    let (tx, mut order) = mpsc::unbounded_channel();
    let mut ids = Vec::new();
    for label in ["first", "second", "third"] {
        let tx = tx.clone();
        ids.push(
            messaging.register_state_callback(move |_: Messaging, _: ConnectionState| {
                let tx = tx.clone();
                async move {
                    tx.send(label).ok();
                    Ok::<_, HandlerError>(())
                }
            }),
        );
    }
    assert!(messaging.unregister_state_callback(&ids[1]));
    assert!(!messaging.unregister_state_callback(&ids[1]));

    messaging.connect().await.unwrap();
    assert_eq!(order.try_recv().unwrap(), "first");
    assert_eq!(order.try_recv().unwrap(), "third");
    assert!(order.try_recv().is_err());
    messaging.disconnect().await.unwrap();
}

#[tokio::test]
async fn failing_state_callback_does_not_block_others() {
    let broker = InMemoryBroker::new();
    let agent = agent("pinger", &broker);
    let calls = Arc::new(AtomicUsize::new(0));

    agent
        .messaging()
        .register_state_callback(|_: Messaging, _: ConnectionState| async {
            Err::<(), _>(HandlerError::custom("boom"))
        });
    let counter = Arc::clone(&calls);
    agent
        .messaging()
        .register_state_callback(move |_: Messaging, _: ConnectionState| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(())
            }
        });

    agent.messaging().connect().await.unwrap();
    agent.messaging().disconnect().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_connect_stays_disconnected_and_silent() {
    let broker = InMemoryBroker::new();
    let agent = agent("pinger", &broker);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    agent
        .messaging()
        .register_state_callback(move |_: Messaging, _: ConnectionState| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(())
            }
        });

    broker.refuse_connections(true);
    let err = agent.messaging().connect().await.expect_err("refused");
    assert!(matches!(err, MessagingError::Broker { .. }));
    broker.refuse_connections(false);

    // Another connection holds the exclusive command queue, so the queue
    // declaration fails after the exchanges were declared.
    let squatter = broker.connect("memory").await.unwrap();
    let channel = squatter.open_channel().await.unwrap();
    let exclusive = QueueOptions {
        exclusive: true,
        ..QueueOptions::default()
    };
    channel
        .declare_queue(agent.identity().as_str(), exclusive)
        .await
        .unwrap();

    let err = agent.messaging().connect().await.expect_err("queue locked");
    assert!(matches!(err, MessagingError::Broker { .. }));
    assert_eq!(agent.messaging().state(), ConnectionState::Disconnected);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    squatter.close().await.unwrap();
    agent.messaging().connect().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn conflicting_exchange_fails_connect() {
    let broker = InMemoryBroker::new();
    let other = broker.connect("memory").await.unwrap();
    other
        .open_channel()
        .await
        .unwrap()
        .declare_exchange(COMMAND_EXCHANGE, ExchangeKind::Fanout, ExchangeOptions::default())
        .await
        .unwrap();

    let agent = agent("pinger", &broker);
    let err = agent.messaging().connect().await.expect_err("kind mismatch");
    assert!(matches!(err, MessagingError::Broker { .. }));
    assert_eq!(agent.messaging().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn operations_require_a_session() {
    let broker = InMemoryBroker::new();
    let agent = agent("pinger", &broker);
    let messaging = agent.messaging();

    let err = messaging
        .register_command_callback("demo.Ping", |_: CommandContext| async {
            Ok::<_, HandlerError>(())
        })
        .expect_err("disconnected");
    assert!(matches!(err, MessagingError::NotConnected));

    let err = messaging
        .register_event_callback(EventFilter::new(), |_: EventContext| async {
            Ok::<_, HandlerError>(())
        })
        .await
        .expect_err("disconnected");
    assert!(matches!(err, MessagingError::NotConnected));

    let err = messaging
        .send_command("ponger", &Ping { seq: 1 })
        .await
        .expect_err("disconnected");
    assert!(matches!(err, MessagingError::NotConnected));

    let err = messaging
        .send_command("", &Ping { seq: 1 })
        .await
        .expect_err("no destination");
    assert!(matches!(err, MessagingError::MissingDestination));
}

#[tokio::test]
async fn command_callback_is_replaced() {
    let broker = InMemoryBroker::new();
    let ponger = connected("ponger", &broker).await;
    let pinger = connected("pinger", &broker).await;

    let mut first = record_pings(ponger.messaging());
    pinger.messaging().send_command("ponger", &Ping { seq: 1 }).await.unwrap();
    assert_eq!(recv(&mut first).await, 1);

    let mut second = record_pings(ponger.messaging());
    pinger.messaging().send_command("ponger", &Ping { seq: 2 }).await.unwrap();
    assert_eq!(recv(&mut second).await, 2);
    assert!(first.try_recv().is_err());

    assert!(ponger.messaging().unregister_command_callback("demo.Ping"));
    assert!(!ponger.messaging().unregister_command_callback("demo.Ping"));
}

#[tokio::test]
async fn typed_registration_resolves_the_type_name() {
    let broker = InMemoryBroker::new();
    let ponger = connected("ponger", &broker).await;
    let pinger = connected("pinger", &broker).await;

    let (tx, mut seen) = mpsc::unbounded_channel();
    ponger
        .messaging()
        .register_command_callback_for::<Ping>(move |ctx: CommandContext| {
            let tx = tx.clone();
            async move {
                tx.send(ctx.message_type().map(str::to_owned)).ok();
                Ok::<_, HandlerError>(())
            }
        })
        .unwrap();

    pinger.messaging().send_command("ponger", &Ping { seq: 7 }).await.unwrap();
    assert_eq!(recv(&mut seen).await.as_deref(), Some("demo.Ping"));
}

#[tokio::test]
async fn commands_are_processed_one_at_a_time_in_order() {
    let broker = InMemoryBroker::new();
    let ponger = connected("ponger", &broker).await;
    let pinger = connected("pinger", &broker).await;

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (tx, mut seen) = mpsc::unbounded_channel();
    {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        ponger
            .messaging()
            .register_command_callback("demo.Ping", move |ctx: CommandContext| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                let tx = tx.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    let seq = ctx.message_as::<Ping>().map(|ping| ping.seq);
                    let queue = ctx.headers().get(SEND_TO_HEADER).map(ToString::to_string);
                    active.fetch_sub(1, Ordering::SeqCst);
                    tx.send((queue, seq)).ok();
                    Ok::<_, HandlerError>(())
                }
            })
            .unwrap();
    }

    let direct = ponger.identity().to_string();
    for seq in 0..10 {
        pinger.messaging().send_command(&direct, &Ping { seq }).await.unwrap();
        pinger.messaging().send_command("ponger", &Ping { seq: 100 + seq }).await.unwrap();
    }

    let mut by_identity = Vec::new();
    let mut by_type = Vec::new();
    for _ in 0..20 {
        match recv(&mut seen).await {
            (Some(queue), Some(seq)) if queue == direct => by_identity.push(seq),
            (_, Some(seq)) => by_type.push(seq),
            other => panic!("unexpected delivery {other:?}"),
        }
    }

    assert_eq!(by_identity, (0..10).collect::<Vec<_>>());
    assert_eq!(by_type, (100..110).collect::<Vec<_>>());
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[derive(Clone, Default)]
struct Occupancy {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Occupancy {
    async fn hold(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn events_and_commands_share_the_single_processor() {
    let broker = InMemoryBroker::new();
    let ponger = connected("ponger", &broker).await;
    let pinger = connected("pinger", &broker).await;
    let occupancy = Occupancy::default();
    let (tx, mut seen) = mpsc::unbounded_channel();

    {
        let occupancy = occupancy.clone();
        let tx = tx.clone();
        ponger
            .messaging()
            .register_command_callback("demo.Ping", move |ctx: CommandContext| {
                let occupancy = occupancy.clone();
                let tx = tx.clone();
                async move {
                    occupancy.hold().await;
                    let seq = ctx.message_as::<Ping>().map_or(-1, |ping| ping.seq);
                    tx.send(("command".to_owned(), seq)).ok();
                    Ok::<_, HandlerError>(())
                }
            })
            .unwrap();
    }

    let mut queues = Vec::new();
    for kind in ["demo.Pong", "demo.Reading"] {
        let occupancy = occupancy.clone();
        let tx = tx.clone();
        let queue = ponger
            .messaging()
            .register_event_callback(EventFilter::for_type(kind), move |ctx: EventContext| {
                let occupancy = occupancy.clone();
                let tx = tx.clone();
                async move {
                    occupancy.hold().await;
                    let seq = ctx
                        .message_as::<Pong>()
                        .map(|pong| pong.seq)
                        .or_else(|| ctx.message_as::<Reading>().map(|reading| reading.value as i64))
                        .unwrap_or(-1);
                    tx.send((ctx.queue().to_owned(), seq)).ok();
                    Ok::<_, HandlerError>(())
                }
            })
            .await
            .unwrap();
        queues.push(queue);
    }

    let direct = ponger.identity().to_string();
    for seq in 0..10 {
        let reading = Reading {
            sensor: "thermo".to_owned(),
            value: seq as f64,
        };
        pinger.messaging().send_command(&direct, &Ping { seq }).await.unwrap();
        pinger.messaging().publish_event(&Pong { seq }).await.unwrap();
        pinger.messaging().publish_event(&reading).await.unwrap();
    }

    let mut by_source: HashMap<String, Vec<i64>> = HashMap::new();
    for _ in 0..30 {
        let (source, seq) = recv(&mut seen).await;
        by_source.entry(source).or_default().push(seq);
    }

    let expected: Vec<i64> = (0..10).collect();
    assert_eq!(by_source.len(), 3);
    assert_eq!(by_source["command"], expected);
    for queue in &queues {
        assert_eq!(&by_source[queue], &expected, "events of {queue} out of order");
    }
    assert_eq!(occupancy.peak(), 1);
}

#[tokio::test]
async fn deliveries_with_wrong_content_type_are_dropped() {
    let broker = InMemoryBroker::new();
    let ponger = connected("ponger", &broker).await;
    let pinger = connected("pinger", &broker).await;
    let mut seen = record_pings(ponger.messaging());

    let raw = broker.connect("memory").await.unwrap();
    let channel = raw.open_channel().await.unwrap();
    let forged = |content_type: Option<&str>, kind: Option<&str>| {
        let mut headers = send_to(ponger.identity().as_str());
        if let Some(kind) = kind {
            headers.insert(TYPE_HEADER.to_owned(), kind.into());
        }
        Publishing {
            properties: MessageProperties {
                content_type: content_type.map(str::to_owned),
                kind: kind.map(str::to_owned),
                headers,
                ..MessageProperties::default()
            },
            body: br#"{"seq": 99}"#.to_vec().into(),
        }
    };

    for publishing in [
        forged(Some("application/json"), Some("demo.Ping")),
        forged(Some(JSON_MIME_TYPE), None),
        forged(Some(JSON_MIME_TYPE), Some("   ")),
        forged(Some(JSON_MIME_TYPE), Some("demo.Unknown")),
        forged(None, Some("demo.Ping")),
    ] {
        channel.publish(COMMAND_EXCHANGE, "", publishing).await.unwrap();
    }
    pinger
        .messaging()
        .send_command(ponger.identity().as_str(), &Ping { seq: 1 })
        .await
        .unwrap();

    assert_eq!(recv(&mut seen).await, 1);
    assert!(seen.try_recv().is_err());
}

#[tokio::test]
async fn ping_pong_round_trip_correlates_replies() {
    let broker = InMemoryBroker::new();
    let ponger = connected("ponger", &broker).await;
    let pinger = connected("pinger", &broker).await;

    let (commands_tx, mut commands) = mpsc::unbounded_channel();
    ponger
        .messaging()
        .register_command_callback("demo.Ping", move |ctx: CommandContext| {
            let tx = commands_tx.clone();
            async move {
                let seq = ctx.message_as::<Ping>().map_or(-1, |ping| ping.seq);
                tx.send((
                    ctx.message_id().map(str::to_owned),
                    ctx.reply_to().map(str::to_owned),
                ))
                .ok();
                ctx.send_event(&Pong { seq }).await?;
                Ok::<_, HandlerError>(())
            }
        })
        .unwrap();

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let filter = EventFilter::for_type("demo.Pong").with(SEND_TO_HEADER, pinger.identity().as_str());
    let queue = pinger
        .messaging()
        .register_event_callback(filter, move |ctx: EventContext| {
            let tx = events_tx.clone();
            async move {
                tx.send((
                    ctx.message_as::<Pong>().cloned(),
                    ctx.correlation_id().map(str::to_owned),
                    ctx.reply_to().map(str::to_owned),
                    ctx.queue().to_owned(),
                ))
                .ok();
                Ok::<_, HandlerError>(())
            }
        })
        .await
        .unwrap();
    assert!(queue.starts_with("amq.gen-"));

    pinger.messaging().send_command("ponger", &Ping { seq: 42 }).await.unwrap();

    let (message_id, reply_to) = recv(&mut commands).await;
    assert_eq!(reply_to.as_deref(), Some(pinger.identity().as_str()));

    let (pong, correlation_id, pong_reply_to, pong_queue) = recv(&mut events).await;
    assert_eq!(pong, Some(Pong { seq: 42 }));
    assert_eq!(correlation_id, message_id);
    assert_eq!(pong_reply_to.as_deref(), Some(ponger.identity().as_str()));
    assert_eq!(pong_queue, queue);
}

#[tokio::test]
async fn command_replies_route_back_to_the_sender() {
    let broker = InMemoryBroker::new();
    let ponger = connected("ponger", &broker).await;
    let pinger = connected("pinger", &broker).await;

    ponger
        .messaging()
        .register_command_callback("demo.Ping", |ctx: CommandContext| async move {
            let seq = ctx.message_as::<Ping>().map_or(-1, |ping| ping.seq);
            ctx.send_command("", &Pong { seq: seq + 1 }).await?;
            Ok::<_, HandlerError>(())
        })
        .unwrap();

    let (tx, mut replies) = mpsc::unbounded_channel();
    pinger
        .messaging()
        .register_command_callback("demo.Pong", move |ctx: CommandContext| {
            let tx = tx.clone();
            async move {
                tx.send((
                    ctx.message_as::<Pong>().cloned(),
                    ctx.correlation_id().is_some(),
                    ctx.property_map().get("type").cloned(),
                ))
                .ok();
                Ok::<_, HandlerError>(())
            }
        })
        .unwrap();

    pinger.messaging().send_command("ponger@test-host", &Ping { seq: 1 }).await.unwrap();
    let (pong, correlated, kind) = recv(&mut replies).await;
    assert_eq!(pong, Some(Pong { seq: 2 }));
    assert!(correlated);
    assert_eq!(kind.as_deref(), Some("demo.Pong"));
}

#[tokio::test]
async fn broadcast_reaches_every_instance() {
    let broker = InMemoryBroker::new();
    let first = connected("ponger", &broker).await;
    let second = connected("listener", &broker).await;
    let pinger = connected("pinger", &broker).await;

    let mut first_seen = record_pings(first.messaging());
    let mut second_seen = record_pings(second.messaging());

    pinger.messaging().send_command("*", &Ping { seq: 5 }).await.unwrap();
    assert_eq!(recv(&mut first_seen).await, 5);
    assert_eq!(recv(&mut second_seen).await, 5);
}

#[tokio::test]
async fn avro_payloads_are_dispatched() {
    let broker = InMemoryBroker::new();
    let sensor = connected("sensor", &broker).await;
    let sink = connected("sink", &broker).await;

    let (tx, mut readings) = mpsc::unbounded_channel();
    sink.messaging()
        .register_event_callback(EventFilter::for_type("demo.Reading"), move |ctx: EventContext| {
            let tx = tx.clone();
            async move {
                let reading = ctx.message_as::<Reading>().cloned();
                tx.send((reading, ctx.content_type().map(str::to_owned))).ok();
                Ok::<_, HandlerError>(())
            }
        })
        .await
        .unwrap();

    let reading = Reading {
        sensor: "t1".into(),
        value: 21.5,
    };
    sensor.messaging().publish_event(&reading).await.unwrap();

    let (received, content_type) = recv(&mut readings).await;
    assert_eq!(received, Some(reading));
    assert_eq!(content_type.as_deref(), Some(agent_schema::AVRO_MIME_TYPE));
}

#[tokio::test]
async fn panicking_callback_does_not_stop_processing() {
    let broker = InMemoryBroker::new();
    let ponger = connected("ponger", &broker).await;
    let pinger = connected("pinger", &broker).await;

    let (tx, mut seen) = mpsc::unbounded_channel();
    ponger
        .messaging()
        .register_command_callback("demo.Ping", move |ctx: CommandContext| {
            let tx = tx.clone();
            async move {
                let seq = ctx.message_as::<Ping>().map_or(-1, |ping| ping.seq);
                assert!(seq != 1, "refusing ping 1");
                tx.send(seq).ok();
                Ok::<_, HandlerError>(())
            }
        })
        .unwrap();

    for seq in 1..=2 {
        pinger.messaging().send_command("ponger", &Ping { seq }).await.unwrap();
    }
    assert_eq!(recv(&mut seen).await, 2);
    assert!(ponger.messaging().state().is_connected());
}

#[tokio::test]
async fn broker_side_close_disconnects_the_agent() {
    let broker = InMemoryBroker::new();
    let agent = connected("pinger", &broker).await;
    let mut state = agent.messaging().subscribe_state();

    broker.close_all_connections();
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|state| !state.is_connected()),
    )
    .await
    .expect("disconnect observed")
    .unwrap();

    assert!(matches!(
        agent.messaging().disconnect().await,
        Err(MessagingError::NotConnected)
    ));
    agent.messaging().connect().await.unwrap();
    assert!(agent.messaging().state().is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn backlog_after_reconnect_is_dispatched_once_connected() {
    let broker = InMemoryBroker::new();
    let ponger = connected("ponger", &broker).await;
    let pinger = connected("pinger", &broker).await;

    let (tx, mut observed) = mpsc::unbounded_channel();
    ponger
        .messaging()
        .register_command_callback("demo.Ping", move |ctx: CommandContext| {
            let tx = tx.clone();
            async move {
                let state = ctx.messaging().state();
                let seq = ctx.message_as::<Ping>().map_or(-1, |ping| ping.seq);
                let replied = ctx.send_command("", &Pong { seq }).await;
                tx.send((state, replied.is_ok())).ok();
                Ok::<_, HandlerError>(())
            }
        })
        .unwrap();

    let (pong_tx, mut pongs) = mpsc::unbounded_channel();
    pinger
        .messaging()
        .register_command_callback("demo.Pong", move |ctx: CommandContext| {
            let tx = pong_tx.clone();
            async move {
                tx.send(ctx.message_as::<Pong>().map_or(-1, |pong| pong.seq)).ok();
                Ok::<_, HandlerError>(())
            }
        })
        .unwrap();

    for round in 0..20 {
        ponger.messaging().disconnect().await.unwrap();
        for seq in 0..5 {
            let seq = round * 5 + seq;
            pinger.messaging().send_command("ponger", &Ping { seq }).await.unwrap();
        }
        ponger.messaging().connect().await.unwrap();

        for _ in 0..5 {
            let (state, replied) = recv(&mut observed).await;
            assert_eq!(state, ConnectionState::Connected, "round {round}");
            assert!(replied, "reply failed in round {round}");
        }
    }

    let mut received = Vec::new();
    for _ in 0..100 {
        received.push(recv(&mut pongs).await);
    }
    received.sort_unstable();
    assert_eq!(received, (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn shutdown_disconnects() {
    let broker = InMemoryBroker::new();
    let agent = connected("pinger", &broker).await;

    agent.shutdown().await.unwrap();
    assert_eq!(agent.messaging().state(), ConnectionState::Disconnected);
    assert!(agent.scheduler().is_closed());
}
