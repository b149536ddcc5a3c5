//! Contract between the orchestrator and the execution engine.
//!
//! The orchestrator only ever suspends inside [`WorkflowContext::execute_step`]
//! or [`WorkflowContext::sleep`]. Everything an engine needs to make a run
//! replayable (recording outcomes, durable timers, enforcing call timeouts)
//! lives behind this trait.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use super::error::{Cancelled, StepFailure};

/// Where a step is dispatched and how long one call may take
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorRoute {
    /// Executor pool name (e.g. "ts-worker")
    pub pool: String,

    /// Per-call timeout, enforced by the engine
    pub timeout: Duration,
}

impl ExecutorRoute {
    pub fn new(pool: impl Into<String>, timeout: Duration) -> Self {
        Self {
            pool: pool.into(),
            timeout,
        }
    }
}

/// One attempt at one step
#[derive(Debug, Clone, PartialEq)]
pub struct StepCall {
    /// Registered step name the executor dispatches on
    pub step: String,

    /// Target pool and timeout
    pub route: ExecutorRoute,

    /// Step input payload
    pub input: Value,

    /// Attempt number, starting at 1
    pub attempt: u32,
}

/// Engine services available to a running workflow
#[async_trait]
pub trait WorkflowContext: Send + Sync {
    /// Dispatch a single attempt and wait for its outcome.
    ///
    /// Exceeding `call.route.timeout` must be reported as
    /// [`StepFailure::Timeout`].
    async fn execute_step(&self, call: &StepCall) -> Result<Value, StepFailure>;

    /// Durable timer; returns early with [`Cancelled`] if the run is cancelled
    async fn sleep(&self, delay: Duration) -> Result<(), Cancelled>;

    /// Run-level cancellation signal
    fn cancel_signal(&self) -> &CancelSignal;
}

/// Observer side of a run's cancellation flag
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Trigger side of a run's cancellation flag
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Create a connected cancellation handle and signal
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that is never raised
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever otherwise
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_is_observed() {
        let (handle, signal) = cancellation();
        assert!(!signal.is_cancelled());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };

        handle.cancel();
        waiter.await.unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_never_signal_pends() {
        let signal = CancelSignal::never();
        let result =
            tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(result.is_err());
        assert!(!signal.is_cancelled());
    }
}
