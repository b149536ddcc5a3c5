//! Run lifecycle on top of the local engine: start, resume, replay, status.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::core::{CancelSignal, Orchestrator, RunError};
use crate::domain::{Event, EventKind, Run, RunState, WorkflowInput, WorkflowResult};

use super::context::{LocalContext, ReplayMode};
use super::executor::ExecutorRegistry;
use super::store::EventStore;

/// Outcome of driving a run to a terminal state
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub result: Result<WorkflowResult, RunError>,

    /// Step attempts executed live during this invocation
    pub live_calls: u32,
}

/// Outcome of a strict replay
#[derive(Debug)]
pub struct ReplayReport {
    pub outcome: RunOutcome,

    /// Whether the replayed terminal state equals the recorded one
    pub matches_history: bool,
}

/// Local run manager
pub struct Runtime {
    orchestrator: Orchestrator,
    executors: Arc<ExecutorRegistry>,
    runs_dir: PathBuf,
}

impl Runtime {
    pub fn new(orchestrator: Orchestrator, executors: ExecutorRegistry, runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            orchestrator,
            executors: Arc::new(executors),
            runs_dir: runs_dir.into(),
        }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Start a new run
    #[instrument(skip(self, input, cancel))]
    pub async fn start(&self, input: WorkflowInput, cancel: CancelSignal) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4();
        info!(%run_id, "Starting run");

        let store = EventStore::open_in(&self.runs_dir, run_id).await?;
        let ctx = LocalContext::new(
            run_id,
            Vec::new(),
            self.executors.clone(),
            Some(store),
            ReplayMode::Resume,
            cancel,
        );

        ctx.record_run_event(EventKind::RunStarted {
            input: input.clone(),
        })
        .await?;

        self.drive(&ctx, &input).await
    }

    /// Continue an interrupted run from its recorded history
    #[instrument(skip(self, cancel), fields(run_id = %run_id))]
    pub async fn resume(&self, run_id: Uuid, cancel: CancelSignal) -> Result<RunOutcome> {
        let store = EventStore::open_existing(&self.runs_dir, run_id).await?;
        let events = store.replay().await?;
        let input = recorded_input(run_id, &events)?;

        if events.iter().any(Event::is_terminal) {
            anyhow::bail!("Run {} already finished; use replay to re-check it", run_id);
        }

        info!(recorded = events.len(), "Resuming run");

        let ctx = LocalContext::new(
            run_id,
            events,
            self.executors.clone(),
            Some(store),
            ReplayMode::Resume,
            cancel,
        );

        self.drive(&ctx, &input).await
    }

    /// Re-execute a finished run purely from history.
    ///
    /// Nothing is dispatched and nothing is written.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn replay(&self, run_id: Uuid) -> Result<ReplayReport> {
        let store = EventStore::open_existing(&self.runs_dir, run_id).await?;
        let events = store.replay().await?;
        let input = recorded_input(run_id, &events)?;
        let recorded = Run::from_events(&events);

        let ctx = LocalContext::new(
            run_id,
            events,
            self.executors.clone(),
            None,
            ReplayMode::Strict,
            CancelSignal::never(),
        );

        let result = self.orchestrator.run(&ctx, &input).await;
        let leftover = ctx.has_pending_history().await;

        let matches_history = !leftover
            && match (recorded.as_ref().map(|run| (&run.state, &run.result)), &result) {
                (Some((RunState::Completed, Some(expected))), Ok(replayed)) => expected == replayed,
                (Some((RunState::Failed { error }, _)), Err(e)) => *error == e.to_string(),
                _ => false,
            };

        if !matches_history {
            warn!("Replay diverged from recorded history");
        }

        Ok(ReplayReport {
            outcome: RunOutcome {
                run_id,
                result,
                live_calls: ctx.live_calls().await,
            },
            matches_history,
        })
    }

    /// Get status of a run by ID
    pub async fn status(&self, run_id: Uuid) -> Result<Run> {
        let store = EventStore::open_existing(&self.runs_dir, run_id).await?;
        let events = store.replay().await?;

        Run::from_events(&events).with_context(|| format!("Run {} not found", run_id))
    }

    /// List recent runs, most recent first
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let run_ids = EventStore::list_runs(&self.runs_dir).await?;
        let mut runs = Vec::new();

        for run_id in run_ids {
            if let Ok(run) = self.status(run_id).await {
                runs.push(run);
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);

        Ok(runs)
    }

    async fn drive(&self, ctx: &LocalContext, input: &WorkflowInput) -> Result<RunOutcome> {
        let result = self.orchestrator.run(ctx, input).await;

        let kind = match &result {
            Ok(result) => {
                info!(run_id = %ctx.run_id(), link = %result.link, "Run completed successfully");
                EventKind::RunCompleted {
                    result: result.clone(),
                }
            }
            Err(RunError::Cancelled { .. }) => {
                warn!(run_id = %ctx.run_id(), "Run cancelled");
                EventKind::RunCancelled
            }
            Err(e) => {
                error!(run_id = %ctx.run_id(), error = %e, "Run failed");
                EventKind::RunFailed {
                    error: e.to_string(),
                }
            }
        };
        ctx.record_run_event(kind).await?;

        Ok(RunOutcome {
            run_id: ctx.run_id(),
            result,
            live_calls: ctx.live_calls().await,
        })
    }
}

fn recorded_input(run_id: Uuid, events: &[Event]) -> Result<WorkflowInput> {
    events
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::RunStarted { input } => Some(input.clone()),
            _ => None,
        })
        .with_context(|| format!("No run_started event found for run {}", run_id))
}
