//! Guarded language-model access: concurrency gating, circuit breaking, and
//! call instrumentation around any [`LanguageModel`] implementation.

use crate::breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerConfig};
use crate::error::{KernelError, Result};
use crate::traits::{ChatMessage, ChatOptions, ChatResponse, LanguageModel};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

/// Decorator that every kernel LLM call flows through: planning, repair,
/// and synthesis.
///
/// Adds a worker-local semaphore so no worker hammers the model, a named
/// circuit breaker with per-call timeout, and metrics
/// (`llm_call.total {status}`, `llm_call.duration_seconds`).
pub struct GuardedLanguageModel {
    inner: Arc<dyn LanguageModel>,
    breaker: CircuitBreaker,
    semaphore: Arc<Semaphore>,
}

impl GuardedLanguageModel {
    /// Wrap `inner` with the given breaker configuration and concurrency cap.
    pub fn new(
        inner: Arc<dyn LanguageModel>,
        breaker_config: CircuitBreakerConfig,
        max_concurrency: usize,
    ) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new("llm", breaker_config),
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Breaker diagnostics for health endpoints.
    pub fn breaker_status(&self) -> BreakerStatus {
        self.breaker.status()
    }
}

#[async_trait]
impl LanguageModel for GuardedLanguageModel {
    async fn chat(&self, messages: &[ChatMessage], options: ChatOptions) -> Result<ChatResponse> {
        let permit = self.semaphore.acquire().await.map_err(|_| {
            KernelError::LlmUnavailable("LLM semaphore closed".to_string())
        })?;
        let start = Instant::now();

        let result = self
            .breaker
            .call(|| self.inner.chat(messages, options))
            .await;

        drop(permit);
        let duration = start.elapsed().as_secs_f64();
        let status = if result.is_ok() { "success" } else { "error" };

        metrics::counter!("llm_call.total", "status" => status).increment(1);
        metrics::histogram!("llm_call.duration_seconds").record(duration);

        match &result {
            Ok(_) => {
                tracing::debug!(
                    model = %self.inner.model_id(),
                    duration_secs = duration,
                    "LLM call succeeded"
                );
            }
            Err(e) => {
                tracing::warn!(
                    model = %self.inner.model_id(),
                    duration_secs = duration,
                    error = %e,
                    "LLM call failed"
                );
            }
        }
        result
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
