//! Two agents on one broker: `pinger` sends `demo.Ping` commands to the
//! `ponger` agent type and counts the `demo.Pong` events answering them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use courier_agents::config::{AgentConfig, ConfigProvider};
use courier_agents::kernel::topology::SEND_TO_HEADER;
use courier_agents::prelude::*;
use courier_agents::telemetry::{self, TelemetryConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

const PING_SCHEMA: &str = r#"{"id": "demo.Ping", "title": "Ping request"}"#;

const PONG_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Pong",
    "namespace": "demo",
    "title": "Ping answer",
    "fields": [
        {"name": "seq", "type": "long"},
        {"name": "responder", "type": "string"}
    ]
}"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ping {
    seq: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Pong {
    seq: i64,
    responder: String,
}

#[derive(Debug, Parser)]
#[command(name = "ping-pong", about = "Exchange pings and pongs between two agents")]
struct Args {
    /// Number of pings to send.
    #[arg(long, default_value_t = 5)]
    count: i64,

    /// Configuration file providing `endpoint` and `host`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Connect to the AMQP broker at the configured endpoint instead of the
    /// in-process broker.
    #[cfg(feature = "amqp")]
    #[arg(long)]
    amqp: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init(&TelemetryConfig::default().with_level(args.log_level.as_str()))?;

    let config = Arc::new(match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::new(),
    });
    if args.print_config {
        config.print(&mut std::io::stdout())?;
        return Ok(());
    }

    let broker = broker(&args);
    let ponger = agent("ponger", &broker, &config)?;
    let pinger = agent("pinger", &broker, &config)?;
    info!(endpoint = %pinger.messaging().endpoint(), "starting");

    ponger.messaging().connect().await?;
    pinger.messaging().connect().await?;

    let responder = ponger.identity().to_string();
    ponger
        .messaging()
        .register_command_callback_for::<Ping>(move |ctx: CommandContext| {
            let responder = responder.clone();
            async move {
                let ping = ctx
                    .message_as::<Ping>()
                    .ok_or_else(|| HandlerError::custom("payload is not a ping"))?;
                info!(seq = ping.seq, from = ctx.reply_to(), "ping received");
                ctx.send_event(&Pong {
                    seq: ping.seq,
                    responder,
                })
                .await?;
                Ok::<_, HandlerError>(())
            }
        })?;

    let (pongs, mut received) = mpsc::unbounded_channel();
    let filter = EventFilter::for_type("demo.Pong").with(SEND_TO_HEADER, pinger.identity().as_str());
    pinger
        .messaging()
        .register_event_callback(filter, move |ctx: EventContext| {
            let pongs = pongs.clone();
            async move {
                if let Some(pong) = ctx.message_as::<Pong>() {
                    info!(
                        seq = pong.seq,
                        responder = %pong.responder,
                        correlation_id = ctx.correlation_id(),
                        "pong received"
                    );
                    pongs.send(pong.seq).ok();
                }
                Ok::<_, HandlerError>(())
            }
        })
        .await?;

    for seq in 1..=args.count {
        pinger.messaging().send_command("ponger", &Ping { seq }).await?;
    }

    for _ in 0..args.count {
        let seq = tokio::time::timeout(Duration::from_secs(5), received.recv())
            .await
            .context("timed out waiting for pong")?;
        if seq.is_none() {
            bail!("pong subscription closed");
        }
    }
    info!(count = args.count, "all pongs received");

    pinger.shutdown().await?;
    ponger.shutdown().await?;
    Ok(())
}

fn agent(name: &str, broker: &Arc<dyn Broker>, config: &Arc<AgentConfig>) -> Result<Agent> {
    let manifest = AgentManifest::builder()
        .name(name)?
        .version(env!("CARGO_PKG_VERSION"))?
        .description("ping-pong demonstration agent")
        .build()?;
    let agent = Agent::builder(manifest)
        .broker(Arc::clone(broker))
        .config(Arc::clone(config) as Arc<dyn ConfigProvider>)
        .build()?;

    agent.register_json_schema(PING_SCHEMA)?;
    agent.register_avro_schema(PONG_SCHEMA)?;
    agent.register_type::<Ping>("demo.Ping")?;
    agent.register_type::<Pong>("demo.Pong")?;
    Ok(agent)
}

#[cfg(feature = "amqp")]
fn broker(args: &Args) -> Arc<dyn Broker> {
    if args.amqp {
        Arc::new(courier_agents::broker::AmqpBroker::new())
    } else {
        Arc::new(InMemoryBroker::new())
    }
}

#[cfg(not(feature = "amqp"))]
fn broker(_args: &Args) -> Arc<dyn Broker> {
    Arc::new(InMemoryBroker::new())
}
