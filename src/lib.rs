//! midiflow - Replay-safe orchestrator for MIDI generation runs
//!
//! A run takes a prompt through two bounded stages:
//! - validation: generate candidate text, then validate it, until it passes
//! - generation: materialize the validated text into a file, until a link
//!   comes back
//!
//! Each stage gets a fixed number of iterations, and each step call inside
//! it gets its own retry budget with exponential backoff.
//!
//! # Determinism
//!
//! Every step attempt and retry timer is recorded to an append-only history.
//! Re-executing a run against its history reproduces the same decisions
//! without calling any worker, so interrupted runs can be resumed and
//! finished runs can be checked.
//!
//! # Modules
//!
//! - `core`: Orchestration logic (retry policy, invoker, stage loops,
//!   orchestrator state machine)
//! - `domain`: Data structures (input/result, Event, Run)
//! - `engine`: Local engine (event store, executors, replaying context)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Start a run
//! midiflow run --prompt "a calm piano piece in D minor"
//!
//! # Check run status
//! midiflow status <run-id>
//!
//! # Resume an interrupted run
//! midiflow resume <run-id>
//!
//! # Re-check a finished run against its history
//! midiflow replay <run-id>
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod engine;

// Re-export main types at crate root for convenience
pub use crate::core::{Orchestrator, RetryPolicy, RunError, WorkflowContext, WorkflowOptions};
pub use crate::domain::{Event, EventKind, Run, RunState, WorkflowInput, WorkflowResult};
pub use crate::engine::{ExecutorRegistry, Runtime};
