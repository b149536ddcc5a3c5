//! Local execution engine.
//!
//! Records every step attempt and retry timer of a run to an append-only
//! history, and rebuilds a run from that history when resuming or replaying.

pub mod context;
pub mod executor;
pub mod runtime;
pub mod store;

pub use context::{LocalContext, ReplayMode};
pub use executor::{
    ExecutorRegistry, HttpExecutor, ProcessExecutor, StepExecutor, StepReply, StepRequest,
};
pub use runtime::{ReplayReport, RunOutcome, Runtime};
pub use store::{activity_id, hash_input, EventStore};
