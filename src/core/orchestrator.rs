//! Main orchestrator for generation runs.
//!
//! Sequences the validation stage and the generation stage, threading the
//! validated text into generation, and reduces the outcome to a single
//! result or a single error. The code in this module is replayed against
//! recorded history, so it must not read clocks, randomness or any state
//! that is not passed in.

use std::fmt;

use tracing::{error, info, instrument};

use crate::domain::{WorkflowInput, WorkflowResult};

use super::client::{StepClient, StepRoutes};
use super::context::WorkflowContext;
use super::error::{InvokeError, OptionsError, RunError, StageError};
use super::stage::{Stage, StageLoop, StageOptions};

/// Lifecycle of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Start,
    Validating,
    Validated,
    Generating,
    Completed,
    ValidationFailed,
    GenerationFailed,
}

impl WorkflowState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        matches!(
            (self, next),
            (Start, Validating)
                | (Validating, Validated)
                | (Validating, ValidationFailed)
                | (Validated, Generating)
                | (Generating, Completed)
                | (Generating, GenerationFailed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::ValidationFailed | Self::GenerationFailed
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Validating => "validating",
            Self::Validated => "validated",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::ValidationFailed => "validation_failed",
            Self::GenerationFailed => "generation_failed",
        };
        f.write_str(name)
    }
}

/// Complete tuning for a run: step routes plus both stage loops
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkflowOptions {
    pub steps: StepRoutes,
    pub validation: StageOptions,
    pub generation: StageOptions,
}

impl WorkflowOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        self.steps.validate()?;
        StageLoop::new(Stage::Validation, self.validation.clone()).validate()?;
        StageLoop::new(Stage::Generation, self.generation.clone()).validate()?;
        Ok(())
    }
}

/// Generation run orchestrator
#[derive(Debug, Clone)]
pub struct Orchestrator {
    steps: StepRoutes,
    validation: StageLoop,
    generation: StageLoop,
}

impl Orchestrator {
    /// Create an orchestrator, rejecting invalid options up front
    pub fn new(options: WorkflowOptions) -> Result<Self, OptionsError> {
        options.validate()?;

        Ok(Self {
            steps: options.steps,
            validation: StageLoop::new(Stage::Validation, options.validation),
            generation: StageLoop::new(Stage::Generation, options.generation),
        })
    }

    pub fn steps(&self) -> &StepRoutes {
        &self.steps
    }

    /// Execute one run against `ctx`
    #[instrument(skip(self, ctx, input), fields(request_type = %input.request_type))]
    pub async fn run<C>(&self, ctx: &C, input: &WorkflowInput) -> Result<WorkflowResult, RunError>
    where
        C: WorkflowContext + ?Sized,
    {
        let client = StepClient::new(ctx, &self.steps);
        let state = advance(WorkflowState::Start, WorkflowState::Validating);

        let text = match self.validate_stage(&client, &input.prompt).await {
            Ok(text) => text,
            Err(e) => {
                advance(state, WorkflowState::ValidationFailed);
                return Err(fail(Stage::Validation, e));
            }
        };

        let state = advance(state, WorkflowState::Validated);
        let state = advance(state, WorkflowState::Generating);

        let link = match self.generate_stage(&client, &text).await {
            Ok(link) => link,
            Err(e) => {
                advance(state, WorkflowState::GenerationFailed);
                return Err(fail(Stage::Generation, e));
            }
        };

        advance(state, WorkflowState::Completed);
        Ok(WorkflowResult { link })
    }

    /// Generate candidates until one passes validation
    async fn validate_stage<C>(&self, client: &StepClient<'_, C>, prompt: &str) -> Result<String, StageError>
    where
        C: WorkflowContext + ?Sized,
    {
        let completion = self
            .validation
            .run(
                |_| async move {
                    let candidate = client.generate_candidate_text(prompt).await?;
                    let valid = client.validate_text(&candidate).await?;
                    Ok::<_, InvokeError>((candidate, valid))
                },
                |(_, valid): &(String, bool)| *valid,
            )
            .await?;

        Ok(completion.value.0)
    }

    /// Materialize the validated text until a non-empty reference comes back
    async fn generate_stage<C>(&self, client: &StepClient<'_, C>, text: &str) -> Result<String, StageError>
    where
        C: WorkflowContext + ?Sized,
    {
        let completion = self
            .generation
            .run(
                |_| client.materialize_artifact(text),
                |link: &String| !link.is_empty(),
            )
            .await?;

        Ok(completion.value)
    }
}

fn advance(from: WorkflowState, to: WorkflowState) -> WorkflowState {
    debug_assert!(from.can_transition_to(to), "illegal transition {from} -> {to}");
    info!(from = %from, to = %to, "Workflow state transition");
    to
}

fn fail(stage: Stage, err: StageError) -> RunError {
    let err = RunError::from_stage(stage, err);
    error!(%stage, error = %err, "Run failed");
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stage::StepErrorPolicy;

    #[test]
    fn test_state_machine_transitions() {
        use WorkflowState::*;

        assert!(Start.can_transition_to(Validating));
        assert!(Validating.can_transition_to(ValidationFailed));
        assert!(Generating.can_transition_to(Completed));
        assert!(!Start.can_transition_to(Generating));
        assert!(!Validating.can_transition_to(GenerationFailed));
        assert!(!Completed.can_transition_to(Validating));

        assert!(Completed.is_terminal());
        assert!(ValidationFailed.is_terminal());
        assert!(!Validated.is_terminal());
    }

    #[test]
    fn test_orchestrator_rejects_invalid_options() {
        let options = WorkflowOptions {
            generation: StageOptions {
                max_iterations: 0,
                on_step_error: StepErrorPolicy::FailStage,
            },
            ..Default::default()
        };

        assert!(matches!(
            Orchestrator::new(options),
            Err(OptionsError::ZeroIterations { stage: Stage::Generation })
        ));
    }

    #[test]
    fn test_orchestrator_creation() {
        let orchestrator = Orchestrator::new(WorkflowOptions::default()).unwrap();
        assert_eq!(orchestrator.steps().generate_candidate_text.route.pool, "ts-worker");
    }
}
