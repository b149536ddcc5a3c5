//! Typed client for the named steps a generation run calls.
//!
//! Executors dispatch on plain step names; this client pins each capability
//! to its payload types and its route so call sites cannot mix them up.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::context::{ExecutorRoute, WorkflowContext};
use super::error::{InvokeError, OptionsError, StepFailure};
use super::invoker::{invoke, StepOptions};
use super::retry::RetryPolicy;

/// Default pool for text synthesis
pub const TEXT_POOL: &str = "ts-worker";

/// Default pool for validation and file materialization
pub const FILE_POOL: &str = "python-worker";

/// Default per-call timeout
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// The capabilities a run depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    GenerateCandidateText,
    ValidateText,
    MaterializeArtifact,
}

impl StepKind {
    pub const ALL: [StepKind; 3] = [
        StepKind::GenerateCandidateText,
        StepKind::ValidateText,
        StepKind::MaterializeArtifact,
    ];

    /// Name used when no override is configured
    pub fn default_name(self) -> &'static str {
        match self {
            Self::GenerateCandidateText => "GenerateCandidateText",
            Self::ValidateText => "ValidateText",
            Self::MaterializeArtifact => "MaterializeArtifact",
        }
    }

    pub fn default_pool(self) -> &'static str {
        match self {
            Self::GenerateCandidateText => TEXT_POOL,
            Self::ValidateText | Self::MaterializeArtifact => FILE_POOL,
        }
    }

    /// Options matching the defaults of the production deployment
    pub fn default_options(self) -> StepOptions {
        StepOptions {
            name: self.default_name().to_string(),
            route: ExecutorRoute::new(self.default_pool(), DEFAULT_STEP_TIMEOUT),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

/// Resolved options for every step, fixed when a run is constructed
#[derive(Debug, Clone, PartialEq)]
pub struct StepRoutes {
    pub generate_candidate_text: StepOptions,
    pub validate_text: StepOptions,
    pub materialize_artifact: StepOptions,
}

impl Default for StepRoutes {
    fn default() -> Self {
        Self {
            generate_candidate_text: StepKind::GenerateCandidateText.default_options(),
            validate_text: StepKind::ValidateText.default_options(),
            materialize_artifact: StepKind::MaterializeArtifact.default_options(),
        }
    }
}

impl StepRoutes {
    pub fn get(&self, kind: StepKind) -> &StepOptions {
        match kind {
            StepKind::GenerateCandidateText => &self.generate_candidate_text,
            StepKind::ValidateText => &self.validate_text,
            StepKind::MaterializeArtifact => &self.materialize_artifact,
        }
    }

    pub fn get_mut(&mut self, kind: StepKind) -> &mut StepOptions {
        match kind {
            StepKind::GenerateCandidateText => &mut self.generate_candidate_text,
            StepKind::ValidateText => &mut self.validate_text,
            StepKind::MaterializeArtifact => &mut self.materialize_artifact,
        }
    }

    /// Apply one retry policy to every step
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        for kind in StepKind::ALL {
            self.get_mut(kind).retry_policy = policy.clone();
        }
        self
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        for kind in StepKind::ALL {
            let options = self.get(kind);
            if options.name.is_empty() {
                return Err(OptionsError::EmptyStepName);
            }
            if options.route.pool.is_empty() {
                return Err(OptionsError::EmptyPool {
                    step: options.name.clone(),
                });
            }
            options.retry_policy.validate()?;
        }
        Ok(())
    }
}

/// Typed view over a [`WorkflowContext`]
pub struct StepClient<'a, C: ?Sized> {
    ctx: &'a C,
    routes: &'a StepRoutes,
}

impl<'a, C> StepClient<'a, C>
where
    C: WorkflowContext + ?Sized,
{
    pub fn new(ctx: &'a C, routes: &'a StepRoutes) -> Self {
        Self { ctx, routes }
    }

    /// Ask the text pool for a candidate rendition of `prompt`
    pub async fn generate_candidate_text(&self, prompt: &str) -> Result<String, InvokeError> {
        self.call(StepKind::GenerateCandidateText, Value::from(prompt))
            .await
    }

    pub async fn validate_text(&self, text: &str) -> Result<bool, InvokeError> {
        self.call(StepKind::ValidateText, Value::from(text)).await
    }

    /// Produce the file for `text`; an empty reference means nothing was stored
    pub async fn materialize_artifact(&self, text: &str) -> Result<String, InvokeError> {
        self.call(StepKind::MaterializeArtifact, Value::from(text))
            .await
    }

    async fn call<T: DeserializeOwned>(&self, kind: StepKind, input: Value) -> Result<T, InvokeError> {
        let options = self.routes.get(kind);
        let output = invoke(self.ctx, options, input).await?;

        serde_json::from_value(output).map_err(|e| InvokeError::Terminal {
            step: options.name.clone(),
            source: StepFailure::engine(format!("unexpected output from {}: {}", kind, e)),
        })
    }
}
