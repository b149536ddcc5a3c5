//! Domain types for the midiflow orchestrator.
//!
//! This module contains the core data structures:
//! - Workflow: run input and result payloads
//! - Events: recorded run history
//! - Run: status summary rebuilt from history

pub mod events;
pub mod run;
pub mod workflow;

// Re-export commonly used types
pub use events::{Event, EventKind};
pub use run::{Run, RunState};
pub use workflow::{WorkflowInput, WorkflowResult};
