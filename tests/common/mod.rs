//! Shared test doubles: a scripted in-memory context and a counting executor.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use midiflow::core::{
    CancelHandle, CancelSignal, Cancelled, RetryPolicy, StepCall, StepFailure, StepRoutes,
    WorkflowContext, WorkflowOptions,
};
use midiflow::engine::{StepExecutor, StepRequest};

pub const GENERATE: &str = "GenerateCandidateText";
pub const VALIDATE: &str = "ValidateText";
pub const MATERIALIZE: &str = "MaterializeArtifact";

/// Policy with millisecond delays so retry tests stay fast
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay_ms: 1,
        max_delay_ms: 10,
        backoff_multiplier: 2.0,
    }
}

pub fn fast_options() -> WorkflowOptions {
    WorkflowOptions {
        steps: StepRoutes::default().with_retry_policy(fast_retry(3)),
        ..Default::default()
    }
}

/// Context answering each step from a script instead of real workers.
///
/// Queued outcomes are consumed first; once a step's queue is empty its
/// fallback answers every further call.
#[derive(Default)]
pub struct ScriptedContext {
    queued: Mutex<HashMap<String, VecDeque<Result<Value, StepFailure>>>>,
    fallback: Mutex<HashMap<String, Result<Value, StepFailure>>>,
    calls: Mutex<Vec<StepCall>>,
    sleeps: Mutex<Vec<Duration>>,
    cancel: CancelSignal,
    cancel_on_sleep: Option<CancelHandle>,
}

impl ScriptedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The usual mocks: one candidate, always valid, one link
    pub fn happy() -> Self {
        Self::new()
            .always(GENERATE, Ok(json!("Mocked MIDIText")))
            .always(VALIDATE, Ok(json!(true)))
            .always(MATERIALIZE, Ok(json!("mocked-s3-link")))
    }

    pub fn always(self, step: &str, outcome: Result<Value, StepFailure>) -> Self {
        self.fallback.lock().unwrap().insert(step.to_string(), outcome);
        self
    }

    pub fn then(self, step: &str, outcome: Result<Value, StepFailure>) -> Self {
        self.queued
            .lock()
            .unwrap()
            .entry(step.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fire `handle` the first time a retry delay is requested
    pub fn cancel_on_sleep(mut self, handle: CancelHandle) -> Self {
        self.cancel_on_sleep = Some(handle);
        self
    }

    pub fn calls(&self) -> Vec<StepCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, step: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.step == step)
            .count()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowContext for ScriptedContext {
    async fn execute_step(&self, call: &StepCall) -> Result<Value, StepFailure> {
        self.calls.lock().unwrap().push(call.clone());

        if let Some(outcome) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&call.step)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }

        self.fallback
            .lock()
            .unwrap()
            .get(&call.step)
            .cloned()
            .unwrap_or_else(|| Err(StepFailure::terminal(format!("unscripted step {}", call.step))))
    }

    async fn sleep(&self, delay: Duration) -> Result<(), Cancelled> {
        self.sleeps.lock().unwrap().push(delay);
        if let Some(handle) = &self.cancel_on_sleep {
            handle.cancel();
        }
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        Ok(())
    }

    fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }
}

/// Executor answering by step name and counting deliveries
#[derive(Default)]
pub struct CountingExecutor {
    queued: Mutex<HashMap<String, VecDeque<Result<Value, StepFailure>>>>,
    fallback: HashMap<String, Result<Value, StepFailure>>,
    stalls: Mutex<HashMap<String, u32>>,
    stall_for: Duration,
    delivered: Mutex<Vec<StepRequest>>,
    calls: AtomicU32,
}

impl CountingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always(mut self, step: &str, outcome: Result<Value, StepFailure>) -> Self {
        self.fallback.insert(step.to_string(), outcome);
        self
    }

    /// Answer the next delivery of `step` with `outcome` before falling back
    pub fn then(self, step: &str, outcome: Result<Value, StepFailure>) -> Self {
        self.queued
            .lock()
            .unwrap()
            .entry(step.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Hang for `duration` on the next `times` deliveries of `step`
    pub fn stalling(mut self, step: &str, times: u32, duration: Duration) -> Self {
        self.stalls.lock().unwrap().insert(step.to_string(), times);
        self.stall_for = duration;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_to(&self, step: &str) -> usize {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.step == step)
            .count()
    }

    pub fn delivered(&self) -> Vec<StepRequest> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepExecutor for CountingExecutor {
    fn name(&self) -> &str {
        "counting"
    }

    async fn execute(&self, request: &StepRequest) -> Result<Value, StepFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.delivered.lock().unwrap().push(request.clone());

        let stall = match self.stalls.lock().unwrap().get_mut(&request.step) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };
        if stall {
            tokio::time::sleep(self.stall_for).await;
        }

        if let Some(outcome) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&request.step)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }

        self.fallback
            .get(&request.step)
            .cloned()
            .unwrap_or_else(|| Err(StepFailure::terminal(format!("unscripted step {}", request.step))))
    }
}
