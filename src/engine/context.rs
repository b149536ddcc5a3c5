//! In-process implementation of the workflow context.
//!
//! Every step attempt and every retry timer is a command with a sequence
//! number. While recorded history remains, commands are answered from it
//! without touching an executor. Once history runs out the context executes
//! live and records what happens, which is how an interrupted run picks up
//! where it stopped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::core::{CancelSignal, Cancelled, StepCall, StepFailure, WorkflowContext};
use crate::domain::{Event, EventKind};

use super::executor::{ExecutorRegistry, StepRequest};
use super::store::{activity_id, EventStore};

/// What to do when recorded history runs out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Continue live, recording new events
    Resume,

    /// Refuse to execute anything not already recorded
    Strict,
}

/// Mutable bookkeeping shared by the context's methods
struct Recorder {
    /// Recorded command events not yet consumed
    pending: VecDeque<Event>,

    /// Every event of the run, recorded or new, in order
    log: Vec<Event>,

    /// Next command sequence number
    next_seq: u64,

    /// Steps actually dispatched to an executor
    live_calls: u32,

    /// Set once replay diverges from history; fails all later steps
    fault: Option<String>,
}

/// Replaying, recording workflow context for a single run
pub struct LocalContext {
    run_id: Uuid,
    executors: Arc<ExecutorRegistry>,
    store: Option<EventStore>,
    mode: ReplayMode,
    cancel: CancelSignal,
    recorder: Mutex<Recorder>,
}

/// Recorded answer to a step command
enum Recorded {
    Outcome(Result<Value, StepFailure>),
    /// Scheduled but never finished (process died mid-call)
    Unfinished,
    Missing,
}

impl LocalContext {
    /// Create a context for a run, seeded with its recorded history
    pub fn new(
        run_id: Uuid,
        history: Vec<Event>,
        executors: Arc<ExecutorRegistry>,
        store: Option<EventStore>,
        mode: ReplayMode,
        cancel: CancelSignal,
    ) -> Self {
        let pending = history.iter().filter(|e| e.seq > 0).cloned().collect();

        Self {
            run_id,
            executors,
            store,
            mode,
            cancel,
            recorder: Mutex::new(Recorder {
                pending,
                log: history,
                next_seq: 1,
                live_calls: 0,
                fault: None,
            }),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// All events of the run so far
    pub async fn events(&self) -> Vec<Event> {
        self.recorder.lock().await.log.clone()
    }

    /// Number of step attempts executed live (not answered from history)
    pub async fn live_calls(&self) -> u32 {
        self.recorder.lock().await.live_calls
    }

    /// Whether recorded command events remain unconsumed
    pub async fn has_pending_history(&self) -> bool {
        !self.recorder.lock().await.pending.is_empty()
    }

    /// Append a run-level event (start, completion, failure)
    pub async fn record_run_event(&self, kind: EventKind) -> anyhow::Result<()> {
        let mut recorder = self.recorder.lock().await;
        self.record(&mut recorder, 0, kind).await
    }

    async fn record(&self, recorder: &mut Recorder, seq: u64, kind: EventKind) -> anyhow::Result<()> {
        let event = Event::new(self.run_id, seq, kind);
        if let Some(store) = &self.store {
            store.append(&event).await?;
        }
        recorder.log.push(event);
        Ok(())
    }

    /// Pop the recorded events for a step command at `seq`
    fn take_recorded_step(
        recorder: &mut Recorder,
        seq: u64,
        step: &str,
    ) -> Result<Recorded, StepFailure> {
        let Some(front) = recorder.pending.front() else {
            return Ok(Recorded::Missing);
        };

        match &front.kind {
            EventKind::StepScheduled { step: recorded, .. } if front.seq == seq && recorded == step => {}
            other => {
                return Err(StepFailure::engine(format!(
                    "history mismatch at seq {}: recorded {} (seq {}), replay requested step '{}'",
                    seq,
                    other.name(),
                    front.seq,
                    step
                )));
            }
        }
        recorder.pending.pop_front();

        let outcome = match recorder.pending.front() {
            Some(next) if next.seq == seq => match &next.kind {
                EventKind::StepCompleted { output, .. } => Ok(output.clone()),
                EventKind::StepFailed { failure, .. } => Err(failure.clone()),
                other => {
                    return Err(StepFailure::engine(format!(
                        "history mismatch at seq {}: unexpected {} after step_scheduled",
                        seq,
                        other.name()
                    )));
                }
            },
            _ => return Ok(Recorded::Unfinished),
        };
        recorder.pending.pop_front();

        Ok(Recorded::Outcome(outcome))
    }

    async fn dispatch(&self, call: &StepCall, request: &StepRequest) -> Result<Value, StepFailure> {
        let executor = self.executors.get(&call.route.pool).ok_or_else(|| {
            StepFailure::engine(format!("no executor registered for pool '{}'", call.route.pool))
        })?;

        match tokio::time::timeout(call.route.timeout, executor.execute(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(StepFailure::Timeout {
                timeout_ms: call.route.timeout.as_millis() as u64,
            }),
        }
    }
}

fn fault_message(failure: &StepFailure) -> String {
    match failure {
        StepFailure::Engine { message } => message.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl WorkflowContext for LocalContext {
    async fn execute_step(&self, call: &StepCall) -> Result<Value, StepFailure> {
        let (seq, request, needs_schedule) = {
            let mut recorder = self.recorder.lock().await;
            if let Some(fault) = &recorder.fault {
                return Err(StepFailure::engine(fault.clone()));
            }

            let seq = recorder.next_seq;
            recorder.next_seq += 1;

            let recorded = match Self::take_recorded_step(&mut recorder, seq, &call.step) {
                Ok(recorded) => recorded,
                Err(failure) => {
                    error!(seq, step = %call.step, error = %failure, "Replay diverged from history");
                    recorder.fault = Some(fault_message(&failure));
                    return Err(failure);
                }
            };

            let needs_schedule = match recorded {
                Recorded::Outcome(outcome) => {
                    debug!(seq, step = %call.step, "Answered from history");
                    return outcome;
                }
                Recorded::Unfinished => false,
                Recorded::Missing => true,
            };

            if self.mode == ReplayMode::Strict {
                let failure = StepFailure::engine(format!(
                    "strict replay reached step '{}' at seq {} beyond recorded history",
                    call.step, seq
                ));
                recorder.fault = Some(fault_message(&failure));
                return Err(failure);
            }

            let request = StepRequest {
                step: call.step.clone(),
                activity_id: activity_id(self.run_id, seq, &call.step, &call.input.to_string()),
                attempt: call.attempt,
                input: call.input.clone(),
            };

            if needs_schedule {
                let kind = EventKind::StepScheduled {
                    step: call.step.clone(),
                    pool: call.route.pool.clone(),
                    attempt: call.attempt,
                    activity_id: request.activity_id.clone(),
                };
                self.record(&mut recorder, seq, kind)
                    .await
                    .map_err(|e| StepFailure::engine(format!("{:#}", e)))?;
            }
            recorder.live_calls += 1;

            (seq, request, needs_schedule)
        };

        if !needs_schedule {
            warn!(seq, step = %call.step, "Re-dispatching step left unfinished by a previous process");
        }

        let started = Instant::now();
        let outcome = self.dispatch(call, &request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let kind = match &outcome {
            Ok(output) => EventKind::StepCompleted {
                output: output.clone(),
                duration_ms,
            },
            Err(failure) => EventKind::StepFailed {
                failure: failure.clone(),
                duration_ms,
            },
        };

        let mut recorder = self.recorder.lock().await;
        self.record(&mut recorder, seq, kind)
            .await
            .map_err(|e| StepFailure::engine(format!("{:#}", e)))?;

        outcome
    }

    async fn sleep(&self, delay: Duration) -> Result<(), Cancelled> {
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }

        {
            let mut recorder = self.recorder.lock().await;
            let seq = recorder.next_seq;
            recorder.next_seq += 1;

            let front = recorder
                .pending
                .front()
                .map(|e| (e.seq, matches!(e.kind, EventKind::TimerStarted { .. }), e.kind.name()));

            let started = match front {
                Some((front_seq, true, _)) if front_seq == seq => true,
                Some((front_seq, _, name)) => {
                    let fault = format!(
                        "history mismatch at seq {}: recorded {} (seq {}), replay requested a timer",
                        seq, name, front_seq
                    );
                    error!(seq, "{}", fault);
                    recorder.fault = Some(fault);
                    return Ok(());
                }
                None => false,
            };

            if started {
                recorder.pending.pop_front();
                let fired = matches!(
                    recorder.pending.front(),
                    Some(next) if next.seq == seq && matches!(next.kind, EventKind::TimerFired)
                );
                if fired {
                    recorder.pending.pop_front();
                    debug!(seq, "Timer answered from history");
                    return Ok(());
                }
                if self.mode == ReplayMode::Strict {
                    recorder.fault = Some(format!(
                        "strict replay reached timer at seq {} that never fired in recorded history",
                        seq
                    ));
                    return Ok(());
                }
            } else {
                if self.mode == ReplayMode::Strict {
                    recorder.fault = Some(format!(
                        "strict replay reached a timer at seq {} beyond recorded history",
                        seq
                    ));
                    return Ok(());
                }
                let kind = EventKind::TimerStarted {
                    delay_ms: delay.as_millis() as u64,
                };
                if let Err(e) = self.record(&mut recorder, seq, kind).await {
                    recorder.fault = Some(format!("{:#}", e));
                    return Ok(());
                }
            }

            drop(recorder);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            let mut recorder = self.recorder.lock().await;
            if let Err(e) = self.record(&mut recorder, seq, EventKind::TimerFired).await {
                recorder.fault = Some(format!("{:#}", e));
            }
        }

        Ok(())
    }

    fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }
}
