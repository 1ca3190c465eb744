//! Fan-in of consumer streams into a single processing task.
//!
//! Every source task turns deliveries into [`Job`]s and hands them over a
//! bounded channel of capacity [`HANDOFF_CAPACITY`]. One processor drains the
//! channel and runs each job to completion before taking the next, so
//! callbacks never overlap and per-source order is preserved.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use agent_broker::{Delivery, DeliveryStream};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, stream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::scheduler::QuitSignal;
use crate::{
    CommandContext, EventContext, MessageContext, Messaging, MessagingError, MessagingResult,
};

/// Unit of work produced for one delivery.
pub(crate) type Job = BoxFuture<'static, MessagingResult<()>>;

/// Number of jobs that may wait for the processor.
pub(crate) const HANDOFF_CAPACITY: usize = 1;

/// Multiplexes the command queues of a session into the handoff channel.
///
/// Nothing is consumed before `opened` fires, which happens once the session
/// is published as connected. A dropped `opened` sender means the connect
/// attempt failed.
pub(crate) async fn ingest_commands(
    messaging: Messaging,
    streams: Vec<DeliveryStream>,
    handoff: mpsc::Sender<Job>,
    opened: oneshot::Receiver<()>,
    mut quit: QuitSignal,
) -> MessagingResult<()> {
    tokio::select! {
        () = quit.raised() => return Ok(()),
        opened = opened => if opened.is_err() {
            debug!(identity = %messaging.identity(), "connect abandoned");
            return Ok(());
        },
    }

    let deliveries = stream::select_all(streams);
    forward(deliveries, &handoff, quit, |delivery| {
        command_job(messaging.clone(), delivery)
    })
    .await;
    debug!(identity = %messaging.identity(), "command ingestion stopped");
    Ok(())
}

/// Feeds the deliveries of one event subscription into the handoff channel.
pub(crate) async fn ingest_events(
    messaging: Messaging,
    queue: String,
    deliveries: DeliveryStream,
    handoff: mpsc::Sender<Job>,
    quit: QuitSignal,
) -> MessagingResult<()> {
    forward(deliveries, &handoff, quit, |delivery| {
        event_job(messaging.clone(), queue.clone(), delivery)
    })
    .await;
    debug!(%queue, "event ingestion stopped");
    Ok(())
}

async fn forward<S, F>(
    mut deliveries: S,
    handoff: &mpsc::Sender<Job>,
    mut quit: QuitSignal,
    mut job: F,
) where
    S: futures::Stream<Item = Delivery> + Unpin,
    F: FnMut(Delivery) -> Job,
{
    loop {
        let delivery = tokio::select! {
            () = quit.raised() => return,
            next = deliveries.next() => match next {
                Some(delivery) => delivery,
                None => return,
            },
        };

        tokio::select! {
            () = quit.raised() => return,
            sent = handoff.send(job(delivery)) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

/// Runs jobs one at a time until every source is gone.
///
/// Failed jobs are logged and dropped; panics are caught. When the channel
/// closes the session `generation` is reported back so a broker-side shutdown
/// moves the agent to disconnected.
pub(crate) async fn process(
    messaging: Messaging,
    mut jobs: mpsc::Receiver<Job>,
    generation: u64,
) -> MessagingResult<()> {
    while let Some(job) = jobs.recv().await {
        match AssertUnwindSafe(job).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "message dropped"),
            Err(panic) => error!(panic = panic_message(panic.as_ref()), "callback panicked"),
        }
    }
    debug!(identity = %messaging.identity(), generation, "processor stopped");
    messaging.on_pipeline_closed(generation).await
}

fn command_job(messaging: Messaging, delivery: Delivery) -> Job {
    async move {
        let ctx = admit(&messaging, delivery)?;
        let kind = ctx.schema().id().to_owned();
        let handler = messaging
            .command_handler(&kind)
            .ok_or_else(|| {
                MessagingError::not_acceptable(format!("no command callback for {kind}"))
            })?;
        handler.handle_command(CommandContext::new(ctx)).await?;
        Ok(())
    }
    .boxed()
}

fn event_job(messaging: Messaging, queue: String, delivery: Delivery) -> Job {
    async move {
        let ctx = admit(&messaging, delivery)?;
        let handler = messaging
            .event_handler(&queue)
            .ok_or_else(|| {
                MessagingError::not_acceptable(format!("no event callback for {queue}"))
            })?;
        handler.handle_event(EventContext::new(ctx, queue)).await?;
        Ok(())
    }
    .boxed()
}

/// Resolves the schema and type of a delivery and decodes its payload.
fn admit(messaging: &Messaging, delivery: Delivery) -> MessagingResult<MessageContext> {
    let props = &delivery.properties;
    let kind = props.kind.as_deref().map(str::trim).unwrap_or_default();
    if kind.is_empty() {
        return Err(MessagingError::not_acceptable("message type is missing"));
    }

    let schema = messaging
        .schemas()
        .get(kind)
        .map_err(|err| MessagingError::not_acceptable(err.to_string()))?;

    let content_type = props.content_type.as_deref().unwrap_or_default();
    if content_type != schema.mime_type() {
        return Err(MessagingError::not_acceptable(format!(
            "content type {content_type:?} does not match {} of schema {}",
            schema.mime_type(),
            schema.id()
        )));
    }

    let ty = messaging
        .types()
        .get_by_name(schema.id())
        .map_err(|err| MessagingError::not_acceptable(err.to_string()))?;
    let message = schema
        .decode(&delivery.body, &ty)
        .map_err(|err| MessagingError::not_acceptable(format!("decode {}: {err}", schema.id())))?;

    Ok(MessageContext::new(messaging.clone(), delivery, schema, message))
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
