//! History events for replayable runs.
//!
//! Every decision that leaves the orchestrator (a step attempt, a timer) is
//! recorded with a sequence number. Replaying a run means handing the
//! recorded outcomes back in the same order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::StepFailure;

use super::workflow::{WorkflowInput, WorkflowResult};

/// A single event in the append-only run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event was recorded. Informational only; never replayed
    /// into decisions.
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Command sequence number (0 for run-level events)
    pub seq: u64,

    /// What happened
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(run_id: Uuid, seq: u64, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            seq,
            kind,
        }
    }

    /// Whether this event closes the run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::RunCompleted { .. } | EventKind::RunFailed { .. } | EventKind::RunCancelled
        )
    }
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EventKind {
    /// A new run has started
    RunStarted { input: WorkflowInput },

    /// A step attempt was dispatched
    StepScheduled {
        step: String,
        pool: String,
        attempt: u32,
        activity_id: String,
    },

    /// The attempt returned a value
    StepCompleted { output: Value, duration_ms: u64 },

    /// The attempt failed
    StepFailed {
        failure: StepFailure,
        duration_ms: u64,
    },

    /// A retry delay began
    TimerStarted { delay_ms: u64 },

    /// The retry delay elapsed
    TimerFired,

    /// The run completed successfully
    RunCompleted { result: WorkflowResult },

    /// The run failed
    RunFailed { error: String },

    /// The run was cancelled
    RunCancelled,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::StepScheduled { .. } => "step_scheduled",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::TimerStarted { .. } => "timer_started",
            Self::TimerFired => "timer_fired",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunFailed { .. } => "run_failed",
            Self::RunCancelled => "run_cancelled",
        }
    }
}
