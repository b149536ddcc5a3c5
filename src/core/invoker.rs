//! Step invocation with per-call retries.

use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use super::context::{ExecutorRoute, StepCall, WorkflowContext};
use super::error::InvokeError;
use super::retry::RetryPolicy;

/// Everything needed to call one named step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOptions {
    /// Name the executor pool registered the step under
    pub name: String,

    /// Target pool and call timeout
    pub route: ExecutorRoute,

    /// Retry policy for transient failures
    pub retry_policy: RetryPolicy,
}

/// Call a step until it succeeds, fails terminally, or exhausts its policy.
///
/// Only transient failures (including timeouts) are retried. The input is
/// sent unchanged on every attempt.
#[instrument(skip(ctx, options, input), fields(step = %options.name, pool = %options.route.pool))]
pub async fn invoke<C>(ctx: &C, options: &StepOptions, input: Value) -> Result<Value, InvokeError>
where
    C: WorkflowContext + ?Sized,
{
    let cancel = ctx.cancel_signal();
    let cancelled = || InvokeError::Cancelled {
        step: options.name.clone(),
    };

    let mut attempt = 1u32;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let call = StepCall {
            step: options.name.clone(),
            route: options.route.clone(),
            input: input.clone(),
            attempt,
        };

        debug!(attempt, "Dispatching step");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            outcome = ctx.execute_step(&call) => outcome,
        };

        let failure = match outcome {
            Ok(output) => return Ok(output),
            Err(failure) => failure,
        };

        if !failure.is_transient() {
            error!(attempt, error = %failure, "Step failed permanently");
            return Err(InvokeError::Terminal {
                step: options.name.clone(),
                source: failure,
            });
        }

        let decision = options.retry_policy.next_decision(attempt);
        if !decision.retry {
            error!(attempt, error = %failure, "Step exhausted retry policy");
            return Err(InvokeError::Exhausted {
                step: options.name.clone(),
                attempts: attempt,
                last_error: failure,
            });
        }

        warn!(
            attempt,
            delay_ms = decision.delay.as_millis() as u64,
            error = %failure,
            "Step failed, retrying"
        );

        ctx.sleep(decision.delay).await.map_err(|_| cancelled())?;
        attempt += 1;
    }
}
