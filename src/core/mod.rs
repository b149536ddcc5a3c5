//! Core orchestration logic.
//!
//! This module contains:
//! - Retry: pure retry policy evaluation
//! - Invoker: one logical step call with per-call retries
//! - Stage: bounded stage loops with success predicates
//! - Client: typed access to the named steps
//! - Orchestrator: stage sequencing and the run state machine
//!
//! Nothing here performs I/O directly. All suspension goes through the
//! [`WorkflowContext`] supplied by the engine.

pub mod client;
pub mod context;
pub mod error;
pub mod invoker;
pub mod orchestrator;
pub mod retry;
pub mod stage;

// Re-export commonly used types
pub use client::{StepClient, StepKind, StepRoutes};
pub use context::{cancellation, CancelHandle, CancelSignal, ExecutorRoute, StepCall, WorkflowContext};
pub use error::{Cancelled, InvokeError, OptionsError, RunError, StageError, StepFailure};
pub use invoker::{invoke, StepOptions};
pub use orchestrator::{Orchestrator, WorkflowOptions, WorkflowState};
pub use retry::{RetryDecision, RetryPolicy};
pub use stage::{Stage, StageCompletion, StageLoop, StageOptions, StageState, StepErrorPolicy};
