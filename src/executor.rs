//! Reliable execution of a single tool call: retry with exponential backoff,
//! per-attempt timeout, circuit-breaker protection, and metrics emission.

use crate::api::{RetryConfig, Step, ToolResponse, ToolStatus, meta};
use crate::breaker::CircuitBreaker;
use crate::error::KernelError;
use crate::traits::Tool;
use std::time::{Duration, Instant};

/// Wraps one tool execution with retry, timeout, and instrumentation.
///
/// `execute` never returns an error: after retries are exhausted the failure
/// is folded into a `ToolResponse { status: error }` carrying the error text
/// and total execution time, so a single misbehaving step can never abort the
/// surrounding request.
///
/// Emits per attempt: counter `tool_execution.total {tool, status}` and
/// histogram `tool_execution.duration_seconds {tool}`.
#[derive(Clone)]
pub struct ReliableExecutor {
    retry: RetryConfig,
    per_attempt_timeout: Duration,
}

impl ReliableExecutor {
    /// Create an executor with the given retry policy and per-attempt
    /// timeout.
    pub fn new(retry: RetryConfig, per_attempt_timeout: Duration) -> Self {
        Self {
            retry,
            per_attempt_timeout,
        }
    }

    /// Run `tool` on `step` through `breaker`.
    ///
    /// A returned `ToolResponse` of either status is a completed call and is
    /// passed through (the error variant feeds the router's failure
    /// fallback). An `Err` from the tool, a timeout, or a breaker rejection
    /// is retried with exponential backoff, except `CircuitOpen`, which
    /// cannot resolve within one backoff window and fails the call outright.
    pub async fn execute(
        &self,
        tool: &dyn Tool,
        step: &Step,
        breaker: &CircuitBreaker,
    ) -> ToolResponse {
        let tool_name = tool.name().to_string();
        let entry_state = breaker.state();
        let start = Instant::now();
        let mut attempt: u32 = 0;

        let outcome = loop {
            let attempt_start = Instant::now();
            // The attempt timeout runs inside the breaker so that a timed-out
            // probe still records its failure against the breaker state.
            let result = breaker
                .call(|| async {
                    match tokio::time::timeout(self.per_attempt_timeout, tool.execute(step)).await
                    {
                        Ok(res) => res,
                        Err(_) => Err(KernelError::Timeout),
                    }
                })
                .await;

            let attempt_latency = attempt_start.elapsed().as_secs_f64();
            let status = match &result {
                Ok(resp) if resp.status == ToolStatus::Success => "success",
                Ok(_) => "error",
                Err(_) => "failure",
            };
            metrics::counter!(
                "tool_execution.total",
                "tool" => tool_name.clone(),
                "status" => status
            )
            .increment(1);
            metrics::histogram!(
                "tool_execution.duration_seconds",
                "tool" => tool_name.clone()
            )
            .record(attempt_latency);

            match result {
                Ok(resp) => break Ok(resp),
                Err(e) => {
                    let give_up = matches!(e, KernelError::CircuitOpen(_))
                        || attempt >= self.retry.max_retries;
                    if give_up {
                        break Err(e);
                    }
                    let backoff = self.retry.delay_for(attempt);
                    tracing::warn!(
                        tool = %tool_name,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Tool attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        };

        let total = start.elapsed().as_secs_f64();
        let mut response = match outcome {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(
                    tool = %tool_name,
                    attempts = attempt + 1,
                    error = %e,
                    "Tool execution failed after retries"
                );
                let mut resp = ToolResponse::error(e.to_string());
                resp.insert_meta("error_kind", e.kind());
                resp
            }
        };
        response.insert_meta(meta::TOTAL_EXECUTION_TIME, total);
        response.insert_meta(meta::CIRCUIT_STATUS, entry_state.to_string());
        response
    }
}
