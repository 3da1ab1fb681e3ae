//! Refinement client: one task, one model conversation, with retries.
//!
//! The client never returns an error. Every way a task can end is
//! represented in the [`RefinementOutcome`] it produces.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument, warn};

use crate::adapters::{GenerationParams, LanguageModel, ModelRequest};
use crate::config::RefinerConfig;
use crate::domain::{ErrorInfo, RefinementOutcome, RefinementTask};
use crate::prompts::PromptBuilder;

use super::retry::RetryPolicy;

/// Stateless wrapper around a single model call with retry/backoff.
/// Safe to share across concurrent tasks.
pub struct RefinementClient {
    model: Arc<dyn LanguageModel>,
    prompts: Arc<dyn PromptBuilder>,
    params: GenerationParams,
    retry: RetryPolicy,
}

impl RefinementClient {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        prompts: Arc<dyn PromptBuilder>,
        params: GenerationParams,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model,
            prompts,
            params,
            retry,
        }
    }

    /// Build a client from resolved configuration
    pub fn from_config(
        model: Arc<dyn LanguageModel>,
        prompts: Arc<dyn PromptBuilder>,
        config: &RefinerConfig,
    ) -> Self {
        Self::new(model, prompts, config.generation_params(), config.retry.clone())
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Refine a single task.
    ///
    /// RateLimited and Transient failures are retried with exponential
    /// backoff until the attempt budget is spent; Permanent failures end the
    /// task immediately.
    #[instrument(skip_all, fields(ticket = %task.ticket.key, kind = %task.kind))]
    pub async fn refine(&self, task: RefinementTask) -> RefinementOutcome {
        let request = ModelRequest::new(self.prompts.build(&task), self.params.clone());
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.model.generate(&request).await {
                Ok(content) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    debug!(attempt, duration_ms, "Refinement succeeded");
                    return RefinementOutcome::success(task, content, attempt)
                        .with_duration(duration_ms);
                }
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_error(attempt, &e);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Refinement failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    warn!(
                        attempt,
                        kind = %e.kind(),
                        error = %e,
                        "Refinement failed permanently"
                    );
                    return RefinementOutcome::failed(task, ErrorInfo::from(&e), attempt)
                        .with_duration(duration_ms);
                }
            }
        }
    }
}
