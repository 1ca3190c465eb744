//! Callback traits invoked by the messaging subsystem.

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;

use crate::{CommandContext, ConnectionState, EventContext, Messaging, MessagingError};

/// Errors returned by application callbacks.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Custom handler error with human-readable context.
    #[error("handler error: {0}")]
    Custom(String),
    /// A messaging operation performed by the callback failed.
    #[error(transparent)]
    Messaging(Box<MessagingError>),
}

impl HandlerError {
    /// Creates a custom error variant from a string-like value.
    #[must_use]
    pub fn custom(reason: impl Into<String>) -> Self {
        Self::Custom(reason.into())
    }
}

impl From<MessagingError> for HandlerError {
    fn from(err: MessagingError) -> Self {
        Self::Messaging(Box::new(err))
    }
}

/// Result alias for handler operations.
pub type HandlerResult<T = ()> = Result<T, HandlerError>;

/// Callback notified on every connection state transition.
#[async_trait]
pub trait StateHandler: Send + Sync {
    /// Called with the state the agent just entered.
    async fn on_state(&self, messaging: Messaging, state: ConnectionState) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> StateHandler for F
where
    F: Send + Sync + Fn(Messaging, ConnectionState) -> Fut,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn on_state(&self, messaging: Messaging, state: ConnectionState) -> HandlerResult {
        (self)(messaging, state).await
    }
}

/// Callback handling commands of one message type.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handles one decoded command.
    async fn handle_command(&self, ctx: CommandContext) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Send + Sync + Fn(CommandContext) -> Fut,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle_command(&self, ctx: CommandContext) -> HandlerResult {
        (self)(ctx).await
    }
}

/// Callback handling the events matched by one subscription.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one decoded event.
    async fn handle_event(&self, ctx: EventContext) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Send + Sync + Fn(EventContext) -> Fut,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle_event(&self, ctx: EventContext) -> HandlerResult {
        (self)(ctx).await
    }
}
