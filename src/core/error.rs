//! Error taxonomy for the orchestrator core.
//!
//! Errors narrow as they move outward: a single attempt fails with a
//! [`StepFailure`], the invoker turns a run of failures into an
//! [`InvokeError`], a stage reports a [`StageError`], and the run surfaces
//! exactly one [`RunError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::stage::Stage;

/// Outcome of one failed step attempt, as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StepFailure {
    /// Infrastructure hiccup, worth another attempt
    #[error("transient failure: {message}")]
    Transient { message: String },

    /// The call did not complete within its route timeout
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The step refused the input; retrying cannot help
    #[error("{message}")]
    Terminal { message: String },

    /// The engine could not honor the call (history mismatch, I/O, bad payload)
    #[error("engine error: {message}")]
    Engine { message: String },
}

impl StepFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal {
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    /// Whether the retry policy applies to this failure
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}

/// The run was cancelled while suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("run cancelled")]
pub struct Cancelled;

/// Failure of one logical step call after retries were applied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// Every attempt allowed by the retry policy failed transiently
    #[error("step '{step}' exhausted {attempts} attempts: {last_error}")]
    Exhausted {
        step: String,
        attempts: u32,
        last_error: StepFailure,
    },

    /// The step failed in a way retries cannot fix
    #[error("step '{step}' failed: {source}")]
    Terminal { step: String, source: StepFailure },

    /// Cancellation was observed before the call could finish
    #[error("step '{step}' cancelled")]
    Cancelled { step: String },
}

impl InvokeError {
    pub fn step(&self) -> &str {
        match self {
            Self::Exhausted { step, .. } | Self::Terminal { step, .. } | Self::Cancelled { step } => {
                step
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Failure of a bounded stage loop
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The iteration ceiling was reached without a satisfactory result
    #[error("no satisfactory result after {iterations} iterations")]
    Exhausted {
        iterations: u32,
        last_error: Option<InvokeError>,
    },

    /// A step error short-circuited the stage
    #[error(transparent)]
    Step(#[from] InvokeError),
}

/// The single error a run terminates with
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    #[error("unable to validate text after {iterations} iterations")]
    ValidationExhausted { iterations: u32 },

    #[error("unable to generate artifact after {iterations} iterations")]
    GenerationExhausted { iterations: u32 },

    #[error("{stage} stage failed: {source}")]
    Step { stage: Stage, source: InvokeError },

    #[error("run cancelled during {stage} stage")]
    Cancelled { stage: Stage },

    #[error("invalid workflow options: {0}")]
    InvalidOptions(#[from] OptionsError),
}

impl RunError {
    /// Map a stage failure to the run-level error for that stage
    pub fn from_stage(stage: Stage, err: StageError) -> Self {
        match err {
            StageError::Exhausted { iterations, .. } => match stage {
                Stage::Validation => Self::ValidationExhausted { iterations },
                Stage::Generation => Self::GenerationExhausted { iterations },
            },
            StageError::Step(source) if source.is_cancelled() => Self::Cancelled { stage },
            StageError::Step(source) => Self::Step { stage, source },
        }
    }
}

/// Rejected workflow configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptionsError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("backoff multiplier must be a finite value >= 1.0, got {0}")]
    Backoff(f64),

    #[error("max delay {max_ms}ms is below initial delay {initial_ms}ms")]
    DelayBounds { initial_ms: u64, max_ms: u64 },

    #[error("{stage} stage needs at least one iteration")]
    ZeroIterations { stage: Stage },

    #[error("step '{step}' has an empty executor pool")]
    EmptyPool { step: String },

    #[error("step name cannot be empty")]
    EmptyStepName,
}
