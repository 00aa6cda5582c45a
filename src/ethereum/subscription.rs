//! Subscription handles for log feeds.
//!
//! A [`Subscription`] owns the error/completion channel of a producer task and
//! the quit signal used to cancel it. A [`LogStream`] pairs one with the
//! channel the producer delivers logs on.

use std::future::Future;

use alloy::rpc::types::Log;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use super::BindingError;

/// Resolves when the owning [`Subscription`] is unsubscribed or dropped.
pub type QuitSignal = oneshot::Receiver<()>;

#[derive(Debug)]
enum Outcome {
    Running(JoinHandle<Result<(), BindingError>>),
    Finished(Result<(), BindingError>),
    Observed,
}

#[derive(Debug)]
pub struct Subscription {
    outcome: Outcome,
    quit: Option<oneshot::Sender<()>>,
}

impl Subscription {
    /// Spawns `producer` on the tokio runtime. Its result is reported through
    /// [`Subscription::err`]; returning `Ok(())` marks normal completion.
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(QuitSignal) -> Fut,
        Fut: Future<Output = Result<(), BindingError>> + Send + 'static,
    {
        let (quit_tx, quit_rx) = oneshot::channel();
        let task = tokio::spawn(producer(quit_rx));

        Self {
            outcome: Outcome::Running(task),
            quit: Some(quit_tx),
        }
    }

    /// A subscription whose producer has already finished with `result`.
    pub fn completed(result: Result<(), BindingError>) -> Self {
        Self {
            outcome: Outcome::Finished(result),
            quit: None,
        }
    }

    /// Waits for the producer to finish.
    ///
    /// Resolves once: `Ok(())` on completion (including cancellation through
    /// [`Subscription::unsubscribe`]), `Err` on failure. A producer that
    /// panicked fails with [`BindingError::SubscriptionClosed`]. Later calls
    /// never resolve. Cancel-safe.
    pub async fn err(&mut self) -> Result<(), BindingError> {
        if let Outcome::Running(task) = &mut self.outcome {
            let result = match task.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(BindingError::SubscriptionClosed(
                    "log producer panicked".to_string(),
                )),
                Err(_) => Err(BindingError::SubscriptionClosed(
                    "log producer was cancelled".to_string(),
                )),
            };
            self.outcome = Outcome::Finished(result);
        }

        match std::mem::replace(&mut self.outcome, Outcome::Observed) {
            Outcome::Finished(result) => result,
            _ => std::future::pending().await,
        }
    }

    /// Whether the producer's result has already been observed.
    pub fn is_finished(&self) -> bool {
        matches!(self.outcome, Outcome::Observed)
    }

    /// Asks the producer to stop. Safe to call any number of times.
    pub fn unsubscribe(&mut self) {
        if let Some(quit) = self.quit.take() {
            let _ = quit.send(());
        }
    }
}

/// Logs delivered by a backend together with the subscription feeding them.
#[derive(Debug)]
pub struct LogStream {
    pub logs: mpsc::Receiver<Log>,
    pub sub: Subscription,
}

impl LogStream {
    pub fn new(logs: mpsc::Receiver<Log>, sub: Subscription) -> Self {
        Self { logs, sub }
    }

    /// Wraps the result of a finite query: every log is already buffered and
    /// the subscription has completed.
    pub fn from_logs(logs: Vec<Log>) -> Self {
        let (tx, rx) = mpsc::channel(logs.len().max(1));
        for log in logs {
            // Capacity covers every log, so this cannot fail.
            let _ = tx.try_send(log);
        }
        Self {
            logs: rx,
            sub: Subscription::completed(Ok(())),
        }
    }
}
