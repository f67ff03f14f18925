//! Reliability fabric: typed error classification, tiered retry with
//! backoff, per-domain circuit breaking, pre-action validation, and
//! obstruction handling.
//!
//! Every tool call enters through [`Executor::execute`]; callers never
//! wrap functions in retry logic themselves. Model calls go through
//! [`retry_model`] under the same policy table.

pub mod circuit;
pub mod classifier;
pub mod executor;
pub mod obstruction;
pub mod policy;
pub mod validate;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitDecision, domain_of};
pub use classifier::{ErrorKind, classify};
pub use executor::Executor;
pub use obstruction::{ObstructionCategory, ObstructionHandler};
pub use policy::{BackoffKind, RetryPolicy, RetryRule, backoff_delay};
pub use validate::{ValidationFailure, validate_interaction};

use std::time::Duration;

use tracing::warn;
use webpilot_traits::{CompletionOutcome, ExternalError, ModelClient, ToolSpec};

/// Retry a text completion under the policy table.
///
/// The attempt budget is taken from whichever kind the previous failure
/// classified to, so a rate-limited model backs off for its full base
/// delay while a flaky timeout retries immediately.
pub async fn retry_model(
    model: &dyn ModelClient,
    prompt: &str,
    tools: &[ToolSpec],
    timeout: Duration,
    policy: &RetryPolicy,
) -> std::result::Result<CompletionOutcome, (ErrorKind, ExternalError)> {
    let mut attempt: u32 = 0;
    loop {
        match model.complete(prompt, tools, timeout).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) => {
                let kind = classify(&err);
                let rule = policy.rule(kind);
                attempt += 1;
                if !rule.retryable || attempt >= rule.max_attempts {
                    return Err((kind, err));
                }
                let delay = backoff_delay(&rule, attempt - 1);
                warn!(
                    kind = %kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Model call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
