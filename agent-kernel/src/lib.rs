//! Messaging kernel of courier agents.
//!
//! An [`Agent`] owns an identity, a configuration provider, the schema and
//! type registries and a [`Messaging`] handle. Connecting declares the command
//! and event topology on the broker and starts a dispatcher that funnels every
//! consumer into a single processing task, so callbacks never run
//! concurrently.

#![warn(missing_docs, clippy::pedantic)]

mod agent;
mod context;
mod dispatch;
mod handlers;
mod lifecycle;
mod messaging;
mod publishing;
mod scheduler;
pub mod topology;

pub use agent::{Agent, AgentBuilder, AgentError, AgentResult, HOST_KEY};
pub use context::{CommandContext, EventContext, MessageContext};
pub use handlers::{CommandHandler, EventHandler, HandlerError, HandlerResult, StateHandler};
pub use lifecycle::{
    ConnectionEvent, ConnectionLifecycle, ConnectionState, LifecycleError, LifecycleResult,
};
pub use messaging::{DEFAULT_ENDPOINT, ENDPOINT_KEY, Messaging, MessagingError, MessagingResult};
pub use scheduler::{QuitSignal, SchedulerError, SchedulerResult, TaskScheduler};
pub use topology::{CommandQueues, EventFilter};
