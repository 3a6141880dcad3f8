//! Public API types: plan steps, tool responses, observations, and the
//! kernel configuration surface.

use crate::breaker::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reserved keys in [`ToolResponse::metadata`].
///
/// Producers within the kernel only write these keys; tools may add their own
/// as long as they do not collide.
pub mod meta {
    /// Retrieval confidence in `[0, 1]`, set by retrieval tools.
    pub const SIMILARITY: &str = "similarity";
    /// Wall-clock seconds across all attempts, set by the reliable executor.
    pub const TOTAL_EXECUTION_TIME: &str = "total_execution_time";
    /// The tool the plan originally requested, set by the router.
    pub const REQUESTED_TOOL: &str = "requested_tool";
    /// The tool a fallback replaced, set by the router when a fallback fired.
    pub const FALLBACK_FROM: &str = "fallback_from";
    /// Error description, set on `status = error`.
    pub const ERROR: &str = "error";
    /// Circuit breaker state observed on call entry.
    pub const CIRCUIT_STATUS: &str = "circuit_status";
}

/// One plan entry: a tool name and the query to hand it.
///
/// Steps are independent; the kernel schedules them with no inter-step data
/// dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Registered tool name (case-sensitive).
    pub tool: String,
    /// Query string passed to the tool, at most 2000 characters.
    pub query: String,
}

/// Outcome of a single tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// The tool produced usable data.
    Success,
    /// The tool reported an ordinary failure; details live under
    /// [`meta::ERROR`].
    Error,
}

/// The uniform tool contract result: `{status, data, metadata}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Success or error.
    pub status: ToolStatus,
    /// Tool output text. `None` on error.
    pub data: Option<String>,
    /// Free-form metadata map. See [`meta`] for reserved keys.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ToolResponse {
    /// A successful response carrying `data`.
    pub fn success(data: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            data: Some(data.into()),
            metadata: serde_json::Map::new(),
        }
    }

    /// An error response with [`meta::ERROR`] set to `message`.
    pub fn error(message: impl Into<String>) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert(meta::ERROR.to_string(), message.into().into());
        Self {
            status: ToolStatus::Error,
            data: None,
            metadata,
        }
    }

    /// `true` when `status` is [`ToolStatus::Error`].
    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }

    /// Builder-style metadata insertion.
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.insert_meta(key, value);
        self
    }

    /// Insert (or overwrite) a metadata entry.
    pub fn insert_meta(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Read a metadata entry as a string.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Read a metadata entry as a float.
    pub fn meta_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(|v| v.as_f64())
    }
}

/// A step's completed [`ToolResponse`], tagged with its 1-based position in
/// the plan. Observations are always emitted in ascending `step_index`
/// regardless of completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// 1-based index of the step in the plan.
    pub step_index: usize,
    /// Tool named by the step.
    pub tool: String,
    /// Query the step carried.
    pub query: String,
    /// The tool's response after routing, retries, and fallback.
    pub response: ToolResponse,
}

/// Configuration for exponential-backoff retries around one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt (`max_retries = 2` means up to three
    /// attempts total).
    pub max_retries: u32,
    /// Base delay in milliseconds before the first retry.
    pub base_delay_ms: u64,
    /// Multiplier applied per subsequent retry.
    pub backoff_factor: f64,
}

impl RetryConfig {
    /// Compute the backoff before the retry following failed attempt
    /// `attempt` (0-based): `base_delay · backoff_factor^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis = self.base_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
        Duration::from_millis(millis as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            backoff_factor: 2.0,
        }
    }
}

/// Kernel tuning knobs, every one overridable from the environment via
/// [`KernelConfig::from_env`].
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Per-request fan-out cap (`MAX_PARALLEL_TOOLS`, default 4).
    pub max_parallel_tools: usize,
    /// Worker-local LLM concurrency cap (`LLM_MAX_CONCURRENCY`, default 2).
    pub llm_max_concurrency: usize,
    /// Router confidence-fallback boundary (`SIMILARITY_THRESHOLD`, default 0.50).
    pub similarity_threshold: f64,
    /// Reliable-executor retry policy (`MAX_RETRIES`, default 2 retries).
    pub retry: RetryConfig,
    /// Reliable-executor per-attempt timeout (`TIMEOUT_SECONDS`, default 10).
    pub tool_timeout: Duration,
    /// Cache entry lifetime (`CACHE_TTL_SECONDS`, default 3600).
    pub cache_ttl: Duration,
    /// Guardrail plan size cap (`MAX_PLAN_STEPS`, default 12).
    pub max_plan_steps: usize,
    /// Guardrail input length cap (`MAX_INPUT_LENGTH`, default 16000).
    pub max_input_length: usize,
    /// Plan parser repair rounds before the fallback plan (default 2).
    pub max_repair_attempts: u32,
    /// Breaker guarding language-model calls (threshold 4, recovery 30s,
    /// execution timeout 45s).
    pub llm_breaker: CircuitBreakerConfig,
    /// Breaker guarding each tool endpoint (threshold 3, recovery 30s,
    /// execution timeout 15s).
    pub tool_breaker: CircuitBreakerConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_parallel_tools: 4,
            llm_max_concurrency: 2,
            similarity_threshold: 0.50,
            retry: RetryConfig::default(),
            tool_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(3600),
            max_plan_steps: 12,
            max_input_length: 16_000,
            max_repair_attempts: 2,
            llm_breaker: CircuitBreakerConfig {
                failure_threshold: 4,
                recovery_timeout: Duration::from_secs(30),
                execution_timeout: Duration::from_secs(45),
            },
            tool_breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(30),
                execution_timeout: Duration::from_secs(15),
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(val) => val.parse().unwrap_or(default),
        Err(_) => default,
    }
}

impl KernelConfig {
    /// Build a config from the environment, falling back to defaults for
    /// unset or unparseable variables.
    ///
    /// Recognized variables: `MAX_PARALLEL_TOOLS`, `LLM_MAX_CONCURRENCY`,
    /// `SIMILARITY_THRESHOLD`, `TIMEOUT_SECONDS`, `MAX_RETRIES`,
    /// `CACHE_TTL_SECONDS`, `MAX_PLAN_STEPS`, `MAX_INPUT_LENGTH`,
    /// `LLM_FAILURE_THRESHOLD`, `TOOL_FAILURE_THRESHOLD`,
    /// `RECOVERY_TIMEOUT_SECONDS`, `LLM_EXECUTION_TIMEOUT_SECONDS`,
    /// `TOOL_EXECUTION_TIMEOUT_SECONDS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.max_parallel_tools = env_parse("MAX_PARALLEL_TOOLS", config.max_parallel_tools);
        config.llm_max_concurrency = env_parse("LLM_MAX_CONCURRENCY", config.llm_max_concurrency);
        config.similarity_threshold =
            env_parse("SIMILARITY_THRESHOLD", config.similarity_threshold);
        config.tool_timeout =
            Duration::from_secs(env_parse("TIMEOUT_SECONDS", config.tool_timeout.as_secs()));
        config.retry.max_retries = env_parse("MAX_RETRIES", config.retry.max_retries);
        config.cache_ttl =
            Duration::from_secs(env_parse("CACHE_TTL_SECONDS", config.cache_ttl.as_secs()));
        config.max_plan_steps = env_parse("MAX_PLAN_STEPS", config.max_plan_steps);
        config.max_input_length = env_parse("MAX_INPUT_LENGTH", config.max_input_length);

        config.llm_breaker.failure_threshold = env_parse(
            "LLM_FAILURE_THRESHOLD",
            config.llm_breaker.failure_threshold,
        );
        config.tool_breaker.failure_threshold = env_parse(
            "TOOL_FAILURE_THRESHOLD",
            config.tool_breaker.failure_threshold,
        );
        let recovery = Duration::from_secs(env_parse(
            "RECOVERY_TIMEOUT_SECONDS",
            config.llm_breaker.recovery_timeout.as_secs(),
        ));
        config.llm_breaker.recovery_timeout = recovery;
        config.tool_breaker.recovery_timeout = recovery;
        config.llm_breaker.execution_timeout = Duration::from_secs(env_parse(
            "LLM_EXECUTION_TIMEOUT_SECONDS",
            config.llm_breaker.execution_timeout.as_secs(),
        ));
        config.tool_breaker.execution_timeout = Duration::from_secs(env_parse(
            "TOOL_EXECUTION_TIMEOUT_SECONDS",
            config.tool_breaker.execution_timeout.as_secs(),
        ));

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_response_serde_round_trip() {
        let resp = ToolResponse::success("RAG is a retrieval technique")
            .with_meta(meta::SIMILARITY, 0.92)
            .with_meta(meta::REQUESTED_TOOL, "rag_search");

        let json = serde_json::to_string(&resp).unwrap();
        let back: ToolResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, ToolStatus::Success);
        assert_eq!(back.meta_f64(meta::SIMILARITY), Some(0.92));
        assert_eq!(back.meta_str(meta::REQUESTED_TOOL), Some("rag_search"));
    }

    #[test]
    fn error_response_carries_message() {
        let resp = ToolResponse::error("connection refused");
        assert!(resp.is_error());
        assert!(resp.data.is_none());
        assert_eq!(resp.meta_str(meta::ERROR), Some("connection refused"));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ToolStatus::Success).unwrap(),
            "\"success\""
        );
        assert_eq!(
            serde_json::to_string(&ToolStatus::Error).unwrap(),
            "\"error\""
        );
    }

    #[test]
    fn retry_backoff_grows_exponentially() {
        let retry = RetryConfig {
            max_retries: 3,
            base_delay_ms: 100,
            backoff_factor: 2.0,
        };
        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = KernelConfig::default();
        assert_eq!(config.max_parallel_tools, 4);
        assert_eq!(config.llm_max_concurrency, 2);
        assert_eq!(config.similarity_threshold, 0.50);
        assert_eq!(config.tool_timeout, Duration::from_secs(10));
        assert_eq!(config.llm_breaker.failure_threshold, 4);
        assert_eq!(config.tool_breaker.failure_threshold, 3);
    }

    // Serialise tests that touch the environment; env vars are
    // process-global.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn from_env_overrides_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        // SAFETY: protected by ENV_LOCK
        unsafe { std::env::set_var("MAX_PARALLEL_TOOLS", "8") };
        unsafe { std::env::set_var("SIMILARITY_THRESHOLD", "0.75") };
        let config = KernelConfig::from_env();
        unsafe { std::env::remove_var("MAX_PARALLEL_TOOLS") };
        unsafe { std::env::remove_var("SIMILARITY_THRESHOLD") };

        assert_eq!(config.max_parallel_tools, 8);
        assert_eq!(config.similarity_threshold, 0.75);
    }

    #[test]
    fn from_env_ignores_unparseable_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        // SAFETY: protected by ENV_LOCK
        unsafe { std::env::set_var("MAX_RETRIES", "not a number") };
        let config = KernelConfig::from_env();
        unsafe { std::env::remove_var("MAX_RETRIES") };

        assert_eq!(config.retry.max_retries, RetryConfig::default().max_retries);
    }
}
