//! Cancellable background task scheduler.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures::future::select_all;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Quit signal handed to every scheduled task.
///
/// The signal is raised when the scheduler that spawned the task, or any of its
/// ancestors, is closed or dropped.
#[derive(Debug, Clone)]
pub struct QuitSignal {
    lineage: Vec<watch::Receiver<bool>>,
}

impl QuitSignal {
    /// Returns `true` once the signal has been raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.lineage
            .iter()
            .any(|receiver| *receiver.borrow() || receiver.has_changed().is_err())
    }

    /// Completes once the signal is raised.
    pub async fn raised(&mut self) {
        let waits = self.lineage.iter_mut().map(|receiver| {
            Box::pin(async move {
                let _ = receiver.wait_for(|quit| *quit).await;
            })
        });
        select_all(waits).await;
    }
}

/// Lightweight wrapper around `tokio::spawn` whose tasks share a quit signal.
///
/// Child schedulers inherit the quit signal of their parent, so closing a
/// parent stops every task spawned through its descendants.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    quit: Arc<watch::Sender<bool>>,
    lineage: Vec<watch::Receiver<bool>>,
}

impl TaskScheduler {
    /// Constructs a root scheduler.
    #[must_use]
    pub fn new() -> Self {
        let (quit, receiver) = watch::channel(false);
        Self {
            quit: Arc::new(quit),
            lineage: vec![receiver],
        }
    }

    /// Creates a scheduler that is closed together with `self` but can also be
    /// closed on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        let (quit, receiver) = watch::channel(false);
        let mut lineage = self.lineage.clone();
        lineage.push(receiver);
        Self {
            quit: Arc::new(quit),
            lineage,
        }
    }

    /// Returns `true` if the scheduler or one of its ancestors has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.signal().is_raised()
    }

    /// Raises the quit signal of every task spawned through this scheduler and
    /// its children, and rejects new tasks.
    pub fn close(&self) {
        self.quit.send_replace(true);
    }

    /// Returns a quit signal tied to this scheduler.
    #[must_use]
    pub fn signal(&self) -> QuitSignal {
        QuitSignal {
            lineage: self.lineage.clone(),
        }
    }

    /// Spawns a named task. The task receives the quit signal and reports
    /// failures through its result, which is logged.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] when the scheduler is closed.
    pub fn spawn<F, Fut, E>(&self, name: &'static str, task: F) -> SchedulerResult<JoinHandle<()>>
    where
        F: FnOnce(QuitSignal) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }

        let future = task(self.signal());
        Ok(tokio::spawn(async move {
            match future.await {
                Ok(()) => debug!(task = name, "task finished"),
                Err(err) => error!(task = name, error = %err, "task failed"),
            }
        }))
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors produced by the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// Scheduler is closed and will not accept new tasks.
    #[error("scheduler closed")]
    Closed,
}

/// Result alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
