//! Single-step dispatch with confidence- and failure-based fallback.

use crate::api::{Step, ToolResponse, meta};
use crate::breaker::CircuitBreaker;
use crate::executor::ReliableExecutor;
use crate::registry::ToolRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Well-known retrieval tool name the confidence fallback watches for.
pub const RAG_SEARCH: &str = "rag_search";
/// Well-known fallback tool name.
pub const WEB_SEARCH: &str = "web_search";

/// Dispatches one plan step through the reliable executor, then applies the
/// fallback policy:
///
/// 1. a failed step (any tool except `web_search`) re-executes against
///    `web_search` when it is registered;
/// 2. a successful `rag_search` step whose reported `similarity` falls below
///    the threshold re-executes against `web_search`.
///
/// At most one fallback hop fires; the router never re-runs a failed
/// `web_search` against itself.
pub struct IntelligentRouter {
    registry: Arc<ToolRegistry>,
    executor: ReliableExecutor,
    breakers: HashMap<String, CircuitBreaker>,
    similarity_threshold: f64,
}

impl IntelligentRouter {
    /// Build a router over the registry, one breaker per registered tool.
    pub fn new(
        registry: Arc<ToolRegistry>,
        executor: ReliableExecutor,
        breakers: HashMap<String, CircuitBreaker>,
        similarity_threshold: f64,
    ) -> Self {
        Self {
            registry,
            executor,
            breakers,
            similarity_threshold,
        }
    }

    async fn run_tool(&self, tool_name: &str, step: &Step) -> ToolResponse {
        let tool = match self.registry.get(tool_name) {
            Ok(tool) => tool,
            Err(e) => {
                let mut resp = ToolResponse::error(e.to_string());
                resp.insert_meta("error_kind", e.kind());
                return resp;
            }
        };
        // Registry and breaker map are built from the same tool set, so a
        // resolvable tool always has a breaker; fall back to a throwaway one
        // if the maps ever diverge.
        match self.breakers.get(tool_name) {
            Some(breaker) => self.executor.execute(tool.as_ref(), step, breaker).await,
            None => {
                let breaker = CircuitBreaker::new(tool_name, Default::default());
                self.executor.execute(tool.as_ref(), step, &breaker).await
            }
        }
    }

    /// Execute one step and apply the fallback policy. Never fails; routing
    /// problems surface as error responses.
    pub async fn execute(&self, step: &Step, request_id: Uuid) -> ToolResponse {
        let requested = step.tool.as_str();

        if let Err(e) = self.registry.get(requested) {
            tracing::warn!(
                request_id = %request_id,
                tool = %requested,
                "Requested tool not registered"
            );
            let mut resp = ToolResponse::error(e.to_string());
            resp.insert_meta("error_kind", e.kind());
            resp.insert_meta(meta::REQUESTED_TOOL, requested);
            return resp;
        }

        let mut response = self.run_tool(requested, step).await;
        response.insert_meta(meta::REQUESTED_TOOL, requested);

        let web_search_available = requested != WEB_SEARCH && self.registry.contains(WEB_SEARCH);

        // Failure-based fallback.
        if response.is_error() {
            if web_search_available {
                tracing::info!(
                    request_id = %request_id,
                    from = %requested,
                    to = WEB_SEARCH,
                    error = response.meta_str(meta::ERROR).unwrap_or(""),
                    "Tool failed, falling back to web search"
                );
                let mut fallback = self.run_tool(WEB_SEARCH, step).await;
                fallback.insert_meta(meta::REQUESTED_TOOL, requested);
                fallback.insert_meta(meta::FALLBACK_FROM, requested);
                return fallback;
            }
            return response;
        }

        // Confidence-based fallback for low-similarity retrieval.
        if requested == RAG_SEARCH && web_search_available {
            if let Some(similarity) = response.meta_f64(meta::SIMILARITY) {
                if similarity < self.similarity_threshold {
                    tracing::info!(
                        request_id = %request_id,
                        from = RAG_SEARCH,
                        to = WEB_SEARCH,
                        similarity,
                        threshold = self.similarity_threshold,
                        "Low retrieval similarity, falling back to web search"
                    );
                    let mut fallback = self.run_tool(WEB_SEARCH, step).await;
                    fallback.insert_meta(meta::REQUESTED_TOOL, requested);
                    fallback.insert_meta(meta::FALLBACK_FROM, RAG_SEARCH);
                    return fallback;
                }
            }
        }

        response
    }
}
