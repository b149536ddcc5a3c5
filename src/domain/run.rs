//! Run state and reconstruction from events.
//!
//! A Run summarizes a single execution for status reporting. It is derived
//! from history only and never feeds back into orchestration decisions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventKind};
use super::workflow::{WorkflowInput, WorkflowResult};

/// Summary of one generation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Input provided at start
    pub input: Option<WorkflowInput>,

    /// Current state of the run
    pub state: RunState,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if applicable)
    pub completed_at: Option<DateTime<Utc>>,

    /// Attempts dispatched per step name
    pub attempts: BTreeMap<String, u32>,

    /// Attempts that failed, across all steps
    pub failed_attempts: u32,

    /// Retry delays taken
    pub timers: u32,

    /// Highest command sequence number seen
    pub last_seq: u64,

    /// Final result, once completed
    pub result: Option<WorkflowResult>,
}

impl Run {
    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut run = Self {
            id: first_event.run_id,
            input: None,
            state: RunState::Running,
            started_at: first_event.timestamp,
            completed_at: None,
            attempts: BTreeMap::new(),
            failed_attempts: 0,
            timers: 0,
            last_seq: 0,
            result: None,
        };

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        self.last_seq = self.last_seq.max(event.seq);

        match &event.kind {
            EventKind::RunStarted { input } => {
                self.state = RunState::Running;
                self.started_at = event.timestamp;
                self.input = Some(input.clone());
            }
            EventKind::StepScheduled { step, .. } => {
                *self.attempts.entry(step.clone()).or_insert(0) += 1;
            }
            EventKind::StepCompleted { .. } => {}
            EventKind::StepFailed { .. } => {
                self.failed_attempts += 1;
            }
            EventKind::TimerStarted { .. } => {
                self.timers += 1;
            }
            EventKind::TimerFired => {}
            EventKind::RunCompleted { result } => {
                self.state = RunState::Completed;
                self.result = Some(result.clone());
                self.completed_at = Some(event.timestamp);
            }
            EventKind::RunFailed { error } => {
                self.state = RunState::Failed {
                    error: error.clone(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventKind::RunCancelled => {
                self.state = RunState::Cancelled;
                self.completed_at = Some(event.timestamp);
            }
        }
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    /// Check if the run has finished (successfully or not)
    pub fn is_finished(&self) -> bool {
        !self.is_running()
    }

    /// Number of attempts dispatched for `step`
    pub fn attempts_for(&self, step: &str) -> u32 {
        self.attempts.get(step).copied().unwrap_or(0)
    }
}

/// State of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Currently executing, or interrupted before finishing
    Running,

    /// Completed successfully
    Completed,

    /// Failed with error
    Failed { error: String },

    /// Stopped by a cancellation request
    Cancelled,
}

impl RunState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::Running
    }
}
