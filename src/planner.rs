//! Plan generation and parsing: a tool-aware planning prompt, strict JSON
//! validation of the model's output, bounded model-driven repair, and a
//! deterministic fallback plan.

use crate::api::Step;
use crate::error::{KernelError, Result};
use crate::registry::ToolRegistry;
use crate::router::{RAG_SEARCH, WEB_SEARCH};
use crate::traits::{ChatMessage, ChatOptions, LanguageModel};
use serde_json::Value;
use std::sync::Arc;

/// Default cap on a single step's query length.
const MAX_STEP_QUERY_LENGTH: usize = 2000;

/// Produces and validates plans.
///
/// The structural contract is enforced here, at the model boundary, so every
/// downstream stage may assume a valid plan: `steps` is a non-empty list of
/// `{tool, query}` objects, queries are bounded, and every tool is
/// registered.
pub struct Planner {
    llm: Arc<dyn LanguageModel>,
    registry: Arc<ToolRegistry>,
    max_plan_steps: usize,
    max_repair_attempts: u32,
}

impl Planner {
    /// Create a planner over the given model and registry.
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        registry: Arc<ToolRegistry>,
        max_plan_steps: usize,
        max_repair_attempts: u32,
    ) -> Self {
        Self {
            llm,
            registry,
            max_plan_steps,
            max_repair_attempts,
        }
    }

    fn planning_prompt(&self) -> String {
        let tools = self.registry.list().join(", ");
        format!(
            "You are a planning agent.\n\
             You ONLY have access to these tools: {tools}.\n\
             Break the user's goal into at most {max} independent steps.\n\
             Respond with JSON only, in exactly this shape:\n\
             {{\"steps\": [{{\"tool\": \"<tool name>\", \"query\": \"<query>\"}}]}}\n\
             Every step must use one of the listed tools. No prose.",
            tools = tools,
            max = self.max_plan_steps,
        )
    }

    /// Ask the model for a plan. Returns the raw plan text; parsing and
    /// validation happen in [`parse`](Self::parse).
    pub async fn create_plan(&self, goal: &str) -> Result<String> {
        let messages = [
            ChatMessage::system(self.planning_prompt()),
            ChatMessage::user(goal),
        ];
        let response = self
            .llm
            .chat(&messages, ChatOptions::deterministic(true))
            .await?;
        Ok(response.content)
    }

    /// Validate an already-parsed JSON value against the plan shape.
    pub fn validate_value(&self, value: &Value) -> Result<Vec<Step>> {
        let steps = value
            .get("steps")
            .ok_or_else(|| KernelError::PlanParse("missing 'steps' field".to_string()))?;
        let steps = steps
            .as_array()
            .ok_or_else(|| KernelError::PlanParse("'steps' is not a list".to_string()))?;
        if steps.is_empty() {
            return Err(KernelError::PlanParse("plan has no steps".to_string()));
        }

        let mut parsed = Vec::with_capacity(steps.len());
        for (idx, raw) in steps.iter().enumerate() {
            let tool = raw
                .get("tool")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    KernelError::PlanParse(format!("step {idx} missing string 'tool'"))
                })?;
            let query = raw
                .get("query")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    KernelError::PlanParse(format!("step {idx} missing string 'query'"))
                })?;
            if query.len() > MAX_STEP_QUERY_LENGTH {
                return Err(KernelError::PlanParse(format!(
                    "step {idx} query exceeds {MAX_STEP_QUERY_LENGTH} characters"
                )));
            }
            if !self.registry.contains(tool) {
                return Err(KernelError::PlanParse(format!(
                    "step {idx} references unregistered tool '{tool}'"
                )));
            }
            parsed.push(Step {
                tool: tool.to_string(),
                query: query.to_string(),
            });
        }
        Ok(parsed)
    }

    fn try_parse(&self, text: &str) -> Result<Vec<Step>> {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            return self.validate_value(&value);
        }
        let object = extract_json_object(text).ok_or_else(|| {
            KernelError::PlanParse("no JSON object found in planner output".to_string())
        })?;
        let value: Value = serde_json::from_str(object)
            .map_err(|e| KernelError::PlanParse(format!("invalid JSON: {e}")))?;
        self.validate_value(&value)
    }

    async fn repair(&self, broken: &str) -> Result<String> {
        let messages = [
            ChatMessage::system(
                "Fix JSON only. Respond with a valid JSON document of the shape \
                 {\"steps\": [{\"tool\": \"...\", \"query\": \"...\"}]}. \
                 Do not add commentary.",
            ),
            ChatMessage::user(broken),
        ];
        let response = self
            .llm
            .chat(&messages, ChatOptions::deterministic(true))
            .await?;
        Ok(response.content)
    }

    fn fallback_plan(&self, goal: &str) -> Result<Vec<Step>> {
        let tool = if self.registry.contains(RAG_SEARCH) {
            RAG_SEARCH.to_string()
        } else if self.registry.contains(WEB_SEARCH) {
            WEB_SEARCH.to_string()
        } else {
            self.registry
                .list()
                .into_iter()
                .next()
                .ok_or_else(|| {
                    KernelError::PlanParse("no tools registered for fallback plan".to_string())
                })?
        };
        tracing::warn!(tool = %tool, "planner_fallback_applied");
        Ok(vec![Step {
            tool,
            query: goal.to_string(),
        }])
    }

    /// Parse raw planner output into validated steps.
    ///
    /// Tries a strict JSON parse, then extraction of the first balanced
    /// `{...}` block from prose. On failure, asks the model to repair its
    /// own output up to `max_repair_attempts` times with deterministic
    /// settings, then degrades to a single-step plan targeting the preferred
    /// retrieval tool so the request can still make progress.
    pub async fn parse(&self, plan_text: &str, goal: &str) -> Result<Vec<Step>> {
        let mut text = plan_text.to_string();
        let mut repairs = 0;

        loop {
            match self.try_parse(&text) {
                Ok(steps) => return Ok(steps),
                Err(e) if repairs < self.max_repair_attempts => {
                    repairs += 1;
                    tracing::warn!(
                        attempt = repairs,
                        error = %e,
                        "Plan parse failed, asking model to repair"
                    );
                    match self.repair(&text).await {
                        Ok(fixed) => text = fixed,
                        Err(repair_err) => {
                            tracing::warn!(error = %repair_err, "Plan repair call failed");
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Plan parse failed after repair attempts");
                    break;
                }
            }
        }

        self.fallback_plan(goal)
    }
}

/// Extract the first balanced `{...}` block, honoring JSON string literals
/// and escapes, so a plan wrapped in prose still parses.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
