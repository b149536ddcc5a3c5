//! Bounded stage loops.
//!
//! A stage repeats a whole unit of work (one or more step calls) until its
//! success predicate holds or the iteration ceiling is reached. This is a
//! separate budget from per-call retries: a step that answers correctly but
//! unhelpfully consumes a stage iteration, not a retry attempt.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{InvokeError, OptionsError, StageError};

/// The stages of a generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    Generation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Generation => write!(f, "generation"),
        }
    }
}

/// What a stage does when a step call fails after its own retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorPolicy {
    /// Abort the stage immediately with the step error
    #[default]
    FailStage,

    /// Count the failure as an unsatisfactory iteration and keep going
    ConsumeIteration,
}

/// Tuning for one stage loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOptions {
    /// Maximum number of iterations before the stage gives up
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Handling of step errors that escape the invoker
    #[serde(default)]
    pub on_step_error: StepErrorPolicy,
}

fn default_max_iterations() -> u32 {
    5
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            on_step_error: StepErrorPolicy::default(),
        }
    }
}

/// Loop-local progress of a stage.
///
/// Each iteration produces a new state from the previous one; nothing
/// outside the owning loop can observe or mutate it.
#[derive(Debug, Clone, PartialEq)]
pub struct StageState<T> {
    pub iteration_count: u32,
    pub succeeded: bool,
    pub last_result: Option<T>,
    pub last_error: Option<InvokeError>,
}

impl<T> Default for StageState<T> {
    fn default() -> Self {
        Self {
            iteration_count: 0,
            succeeded: false,
            last_result: None,
            last_error: None,
        }
    }
}

impl<T> StageState<T> {
    fn with_result(self, result: T, succeeded: bool) -> Self {
        Self {
            iteration_count: self.iteration_count + 1,
            succeeded,
            last_result: Some(result),
            last_error: None,
        }
    }

    fn with_error(self, error: InvokeError) -> Self {
        Self {
            iteration_count: self.iteration_count + 1,
            succeeded: false,
            last_result: self.last_result,
            last_error: Some(error),
        }
    }
}

/// Result of a stage whose predicate was satisfied
#[derive(Debug, Clone, PartialEq)]
pub struct StageCompletion<T> {
    pub value: T,
    pub iterations: u32,
}

/// Drives one stage's iterations
#[derive(Debug, Clone)]
pub struct StageLoop {
    stage: Stage,
    options: StageOptions,
}

impl StageLoop {
    pub fn new(stage: Stage, options: StageOptions) -> Self {
        Self { stage, options }
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.options.max_iterations == 0 {
            return Err(OptionsError::ZeroIterations { stage: self.stage });
        }
        Ok(())
    }

    /// Run `iteration` until `accept` holds for its result.
    ///
    /// `iteration` receives the 1-indexed iteration number.
    pub async fn run<T, F, Fut, P>(
        &self,
        mut iteration: F,
        accept: P,
    ) -> Result<StageCompletion<T>, StageError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, InvokeError>>,
        P: Fn(&T) -> bool,
    {
        let stage = self.stage;
        let mut state = StageState::<T>::default();

        while state.iteration_count < self.options.max_iterations {
            let number = state.iteration_count + 1;

            state = match iteration(number).await {
                Ok(result) => {
                    let succeeded = accept(&result);
                    state.with_result(result, succeeded)
                }
                Err(err) if err.is_cancelled() => return Err(err.into()),
                Err(err) => match self.options.on_step_error {
                    StepErrorPolicy::FailStage => return Err(err.into()),
                    StepErrorPolicy::ConsumeIteration => {
                        warn!(%stage, iteration = number, error = %err, "Step error consumed an iteration");
                        state.with_error(err)
                    }
                },
            };

            if state.succeeded {
                if let Some(value) = state.last_result {
                    info!(%stage, iterations = number, "Stage succeeded");
                    return Ok(StageCompletion {
                        value,
                        iterations: number,
                    });
                }
                break;
            }

            debug!(%stage, iteration = number, "Stage iteration unsatisfactory");
        }

        warn!(%stage, iterations = state.iteration_count, "Stage exhausted its iterations");
        Err(StageError::Exhausted {
            iterations: state.iteration_count,
            last_error: state.last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::StepFailure;

    fn failing(step: &str) -> InvokeError {
        InvokeError::Terminal {
            step: step.to_string(),
            source: StepFailure::terminal("boom"),
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_accepted_result() {
        let stage = StageLoop::new(Stage::Generation, StageOptions::default());
        let completion = stage
            .run(
                |n| async move { Ok::<_, InvokeError>(if n < 3 { String::new() } else { format!("link-{n}") }) },
                |link: &String| !link.is_empty(),
            )
            .await
            .unwrap();

        assert_eq!(completion.value, "link-3");
        assert_eq!(completion.iterations, 3);
    }

    #[tokio::test]
    async fn test_exhausts_after_ceiling() {
        let stage = StageLoop::new(
            Stage::Validation,
            StageOptions {
                max_iterations: 4,
                ..Default::default()
            },
        );
        let mut seen = Vec::new();
        let err = stage
            .run(
                |n| {
                    seen.push(n);
                    async { Ok::<_, InvokeError>(false) }
                },
                |valid| *valid,
            )
            .await
            .unwrap_err();

        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert_eq!(
            err,
            StageError::Exhausted {
                iterations: 4,
                last_error: None
            }
        );
    }

    #[tokio::test]
    async fn test_step_error_short_circuits_by_default() {
        let stage = StageLoop::new(Stage::Generation, StageOptions::default());
        let mut calls = 0;
        let err = stage
            .run(
                |_| {
                    calls += 1;
                    async { Err::<String, _>(failing("MaterializeArtifact")) }
                },
                |link| !link.is_empty(),
            )
            .await
            .unwrap_err();

        assert_eq!(calls, 1);
        assert_eq!(err, StageError::Step(failing("MaterializeArtifact")));
    }

    #[tokio::test]
    async fn test_consume_iteration_policy_keeps_going() {
        let stage = StageLoop::new(
            Stage::Generation,
            StageOptions {
                max_iterations: 3,
                on_step_error: StepErrorPolicy::ConsumeIteration,
            },
        );
        let mut calls = 0;
        let err = stage
            .run(
                |_| {
                    calls += 1;
                    async { Err::<String, _>(failing("MaterializeArtifact")) }
                },
                |link| !link.is_empty(),
            )
            .await
            .unwrap_err();

        assert_eq!(calls, 3);
        assert_eq!(
            err,
            StageError::Exhausted {
                iterations: 3,
                last_error: Some(failing("MaterializeArtifact")),
            }
        );
    }

    #[tokio::test]
    async fn test_cancellation_ignores_consume_policy() {
        let stage = StageLoop::new(
            Stage::Validation,
            StageOptions {
                max_iterations: 5,
                on_step_error: StepErrorPolicy::ConsumeIteration,
            },
        );
        let err = stage
            .run(
                |_| async {
                    Err::<bool, _>(InvokeError::Cancelled {
                        step: "ValidateText".to_string(),
                    })
                },
                |valid| *valid,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::Step(InvokeError::Cancelled { .. })));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let stage = StageLoop::new(
            Stage::Validation,
            StageOptions {
                max_iterations: 0,
                ..Default::default()
            },
        );
        assert!(matches!(
            stage.validate(),
            Err(OptionsError::ZeroIterations { stage: Stage::Validation })
        ));
    }
}
