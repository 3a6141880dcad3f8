//! Per-request execution trace, persisted best-effort after each request
//! settles.

use crate::api::{Observation, Step};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Latency breakdown in seconds.
///
/// Invariants: `tool_wall_time <= sum(tool_total)` (fan-out parallelism) and
/// `tool_wall_time >= max(tool_total)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyBreakdown {
    /// Plan parse (including repair rounds).
    pub planner: f64,
    /// Per-step serialized execution times, in plan order.
    pub tool_total: Vec<f64>,
    /// Wall-clock duration of the whole fan-out.
    pub tool_wall_time: f64,
    /// Synthesis call.
    pub synthesis: f64,
    /// End-to-end request duration.
    pub total: f64,
}

/// One trace document per request. Best-effort write; a trace failure never
/// fails the request and the kernel never reads traces back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Unique request identifier.
    pub request_id: Uuid,
    /// Caller-supplied session identifier.
    pub session_id: String,
    /// The validated goal.
    pub goal: String,
    /// Raw planner output the steps were parsed from.
    pub plan_text: String,
    /// The validated plan.
    pub steps: Vec<Step>,
    /// Completed observations in plan order; empty on cache hits.
    pub observations: Vec<Observation>,
    /// The synthesized answer, absent when the request failed.
    pub final_answer: Option<String>,
    /// Whether the response was served from cache.
    pub cache_hit: bool,
    /// Error kind for failed requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Latency breakdown.
    pub latency: LatencyBreakdown,
    /// Persist time.
    pub timestamp: DateTime<Utc>,
}
