//! Error types for the Plexo kernel.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KernelError>;

/// Unified error type covering configuration, validation, routing, and
/// downstream failures.
///
/// Variants are intentionally coarse-grained so that callers can match on
/// error *category* (surfaced to the caller vs. captured as an error
/// observation) rather than on collaborator-specific details.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Invalid or missing configuration (empty tool name, missing model, etc.).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A guardrail rejected the user-supplied goal.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Planner output was unparseable after repair attempts and the fallback
    /// plan could not be constructed.
    #[error("Plan parse error: {0}")]
    PlanParse(String),

    /// A kernel-internal guardrail rejected tool output, the final answer, or
    /// a memory write.
    #[error("Guardrail blocked: {0}")]
    GuardrailBlocked(String),

    /// The requested tool is not registered.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A tool raised a fault (transport error, internal bug) rather than
    /// reporting an ordinary error response.
    #[error("Tool failed: {0}")]
    ToolFailed(String),

    /// The named circuit breaker is open and rejected the call without
    /// invoking the protected function.
    #[error("Circuit '{0}' open")]
    CircuitOpen(String),

    /// The operation exceeded its configured timeout.
    #[error("Timeout")]
    Timeout,

    /// Language-model transport failure during planning, repair, or synthesis.
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    /// The memory collaborator failed to read or write. Never fatal to a
    /// request.
    #[error("Memory store error: {0}")]
    MemoryStore(String),

    /// The trace sink failed to persist. Never fatal to a request.
    #[error("Trace store error: {0}")]
    TraceStore(String),
}

impl KernelError {
    /// Stable snake_case label for this error category, used in response
    /// metadata, traces, and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::InvalidInput(_) => "invalid_input",
            Self::PlanParse(_) => "plan_parse_error",
            Self::GuardrailBlocked(_) => "guardrail_blocked",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::ToolFailed(_) => "tool_error",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Timeout => "timeout",
            Self::LlmUnavailable(_) => "llm_unavailable",
            Self::MemoryStore(_) => "memory_write_failed",
            Self::TraceStore(_) => "trace_persist_failed",
        }
    }

    /// Returns `true` for transient errors that may succeed on retry:
    /// [`Timeout`](Self::Timeout), [`ToolFailed`](Self::ToolFailed), and
    /// [`LlmUnavailable`](Self::LlmUnavailable).
    ///
    /// [`CircuitOpen`](Self::CircuitOpen) is not retryable: an open breaker
    /// rejects instantly and cannot observe a different state within one
    /// backoff window.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ToolFailed(_) | Self::LlmUnavailable(_)
        )
    }
}
