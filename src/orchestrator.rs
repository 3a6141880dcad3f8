//! The end-to-end request pipeline: parse and validate the plan, check the
//! cache, fan tool calls out under bounded parallelism, synthesize a final
//! answer, and persist the execution trace.

use crate::api::{KernelConfig, Observation, Step, ToolResponse, meta};
use crate::breaker::CircuitBreaker;
use crate::cache::ResponseCache;
use crate::error::{KernelError, Result};
use crate::executor::ReliableExecutor;
use crate::guardrails::Guardrails;
use crate::llm::GuardedLanguageModel;
use crate::planner::Planner;
use crate::registry::ToolRegistry;
use crate::router::IntelligentRouter;
use crate::trace::{LatencyBreakdown, Trace};
use crate::traits::{
    CacheStore, ChatMessage, ChatOptions, LanguageModel, Memory, MemoryContext, Tool, TraceSink,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Recent conversation turns fetched for synthesis.
const MEMORY_RECENT_LIMIT: usize = 5;
/// Long-term memory snippets fetched for synthesis.
const MEMORY_SEMANTIC_TOP_K: usize = 3;
/// Per-observation character budget in the synthesis prompt.
const OBSERVATION_BLOCK_CHARS: usize = 1500;
/// Output budget for the synthesis call.
const SYNTHESIS_MAX_TOKENS: usize = 1024;

/// The result of one orchestrated request.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// The final answer, synthesized or served from cache.
    pub result: String,
    /// Identifier stamped on this request and its trace.
    pub request_id: Uuid,
}

/// The orchestration kernel: one value constructed at startup and shared
/// across requests.
///
/// Build one with [`Kernel::builder`]. All mutable state (breakers, the L1
/// cache) is interior and concurrency-safe; the kernel itself is cheap to
/// share behind an [`Arc`].
pub struct Kernel {
    config: KernelConfig,
    registry: Arc<ToolRegistry>,
    router: Arc<IntelligentRouter>,
    guardrails: Guardrails,
    cache: ResponseCache,
    llm: Arc<dyn LanguageModel>,
    planner: Planner,
    memory: Option<Arc<dyn Memory>>,
    traces: Option<Arc<dyn TraceSink>>,
}

impl Kernel {
    /// Create a new [`KernelBuilder`].
    pub fn builder() -> KernelBuilder {
        KernelBuilder::default()
    }

    /// The registry this kernel routes through.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// End-to-end entry point: validate the goal, obtain a plan from the
    /// model, then execute it.
    pub async fn run(&self, session_id: &str, goal: &str) -> Result<RunOutput> {
        self.guardrails.validate_user_input(goal)?;
        let goal = goal.trim();
        let plan_text = self.planner.create_plan(goal).await?;
        self.execute_plan(session_id, goal, &plan_text).await
    }

    /// Execute a previously obtained plan for a validated goal.
    ///
    /// Tool failures never fail the request; they surface to the synthesizer
    /// as error observations. Guardrail rejections and plan-parse failures
    /// surface to the caller with a partial trace persisted. Memory and
    /// trace write failures are logged and swallowed.
    pub async fn execute_plan(
        &self,
        session_id: &str,
        goal: &str,
        plan_text: &str,
    ) -> Result<RunOutput> {
        let request_id = Uuid::new_v4();
        let total_start = Instant::now();
        metrics::counter!("requests.total").increment(1);
        tracing::info!(request_id = %request_id, session_id = %session_id, "Request started");

        // Parse and validate the plan.
        let planner_start = Instant::now();
        let steps = self.planner.parse(plan_text, goal).await?;
        let planner_latency = planner_start.elapsed().as_secs_f64();
        metrics::histogram!("planner.duration_seconds").record(planner_latency);

        self.guardrails.validate_plan(&steps)?;

        // Cache check precedes any tool invocation.
        if let Some(cached) = self.cache.get(goal, plan_text).await {
            metrics::counter!("cache_hits.total").increment(1);
            tracing::info!(request_id = %request_id, "Cache hit, skipping execution");
            let trace = Trace {
                request_id,
                session_id: session_id.to_string(),
                goal: goal.to_string(),
                plan_text: plan_text.to_string(),
                steps,
                observations: Vec::new(),
                final_answer: Some(cached.clone()),
                cache_hit: true,
                error: None,
                latency: LatencyBreakdown {
                    planner: planner_latency,
                    total: total_start.elapsed().as_secs_f64(),
                    ..LatencyBreakdown::default()
                },
                timestamp: Utc::now(),
            };
            self.persist_trace(trace).await;
            metrics::histogram!("request.duration_seconds")
                .record(total_start.elapsed().as_secs_f64());
            return Ok(RunOutput {
                result: cached,
                request_id,
            });
        }

        // Fan out tool calls, at most `max_parallel_tools` in flight.
        let fan_out_start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_tools));
        let mut handles = Vec::with_capacity(steps.len());
        for step in steps.iter().cloned() {
            let permit_source = semaphore.clone();
            let router = self.router.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match permit_source.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return ToolResponse::error("fan-out semaphore closed"),
                };
                router.execute(&step, request_id).await
            }));
        }

        // Collect in spawn order, which is plan order.
        let mut responses: Vec<ToolResponse> = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(response) => responses.push(response),
                Err(e) => {
                    tracing::error!(request_id = %request_id, error = %e, "Tool task panicked");
                    responses.push(ToolResponse::error(format!("tool task failed: {e}")));
                }
            }
        }

        // Admit observations in plan order, sanitizing each output first.
        let mut observations = Vec::with_capacity(steps.len());
        let mut tool_total = Vec::with_capacity(steps.len());
        for (idx, (step, response)) in steps.iter().zip(responses).enumerate() {
            if let Some(t) = response.meta_f64(meta::TOTAL_EXECUTION_TIME) {
                tool_total.push(t);
            }
            if let Some(data) = response.data.as_deref() {
                if let Err(e) = self.guardrails.sanitize_tool_output(data) {
                    tracing::warn!(
                        request_id = %request_id,
                        step_index = idx + 1,
                        tool = %step.tool,
                        "Tool output blocked by guardrail"
                    );
                    // The blocked payload is not persisted; the trace records
                    // the rejection in its place.
                    observations.push(Observation {
                        step_index: idx + 1,
                        tool: step.tool.clone(),
                        query: step.query.clone(),
                        response: ToolResponse::error(e.to_string()),
                    });
                    return self
                        .fail_request(
                            request_id,
                            session_id,
                            goal,
                            plan_text,
                            steps.clone(),
                            observations,
                            e,
                            planner_latency,
                            tool_total,
                            fan_out_start.elapsed().as_secs_f64(),
                            total_start,
                        )
                        .await;
                }
            }
            observations.push(Observation {
                step_index: idx + 1,
                tool: step.tool.clone(),
                query: step.query.clone(),
                response,
            });
        }
        let tool_wall_time = fan_out_start.elapsed().as_secs_f64();

        // Conversation context for synthesis.
        let memory_context = match &self.memory {
            Some(memory) => match memory
                .retrieve_context(session_id, goal, MEMORY_RECENT_LIMIT, MEMORY_SEMANTIC_TOP_K)
                .await
            {
                Ok(context) => context,
                Err(e) => {
                    tracing::warn!(request_id = %request_id, error = %e, "Memory retrieval failed");
                    MemoryContext::default()
                }
            },
            None => MemoryContext::default(),
        };

        // Synthesize the final answer.
        let synthesis_start = Instant::now();
        let final_answer = self.synthesize(goal, &observations, &memory_context).await?;
        let synthesis_latency = synthesis_start.elapsed().as_secs_f64();
        metrics::histogram!("synthesis.duration_seconds").record(synthesis_latency);

        // Guard the answer before anything durable happens with it.
        let answer_check = self
            .guardrails
            .validate_final_answer(&final_answer)
            .and_then(|_| self.guardrails.validate_memory_write(&final_answer));
        if let Err(e) = answer_check {
            return self
                .fail_request(
                    request_id,
                    session_id,
                    goal,
                    plan_text,
                    steps,
                    observations,
                    e,
                    planner_latency,
                    tool_total,
                    tool_wall_time,
                    total_start,
                )
                .await;
        }

        self.cache.set(goal, plan_text, &final_answer).await;

        if let Some(memory) = &self.memory {
            if let Err(e) = memory
                .save_interaction(session_id, goal, &final_answer)
                .await
            {
                tracing::warn!(request_id = %request_id, error = %e, "Memory write failed");
            }
        }

        let total = total_start.elapsed().as_secs_f64();
        let trace = Trace {
            request_id,
            session_id: session_id.to_string(),
            goal: goal.to_string(),
            plan_text: plan_text.to_string(),
            steps,
            observations,
            final_answer: Some(final_answer.clone()),
            cache_hit: false,
            error: None,
            latency: LatencyBreakdown {
                planner: planner_latency,
                tool_total,
                tool_wall_time,
                synthesis: synthesis_latency,
                total,
            },
            timestamp: Utc::now(),
        };
        self.persist_trace(trace).await;

        metrics::histogram!("request.duration_seconds").record(total);
        tracing::info!(
            request_id = %request_id,
            total_secs = total,
            "Request completed"
        );
        Ok(RunOutput {
            result: final_answer,
            request_id,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn fail_request(
        &self,
        request_id: Uuid,
        session_id: &str,
        goal: &str,
        plan_text: &str,
        steps: Vec<Step>,
        observations: Vec<Observation>,
        error: KernelError,
        planner_latency: f64,
        tool_total: Vec<f64>,
        tool_wall_time: f64,
        total_start: Instant,
    ) -> Result<RunOutput> {
        let trace = Trace {
            request_id,
            session_id: session_id.to_string(),
            goal: goal.to_string(),
            plan_text: plan_text.to_string(),
            steps,
            observations,
            final_answer: None,
            cache_hit: false,
            error: Some(error.kind().to_string()),
            latency: LatencyBreakdown {
                planner: planner_latency,
                tool_total,
                tool_wall_time,
                synthesis: 0.0,
                total: total_start.elapsed().as_secs_f64(),
            },
            timestamp: Utc::now(),
        };
        self.persist_trace(trace).await;
        Err(error)
    }

    async fn persist_trace(&self, trace: Trace) {
        let Some(sink) = &self.traces else {
            return;
        };
        if let Err(e) = sink.insert(&trace).await {
            tracing::warn!(
                request_id = %trace.request_id,
                error = %e,
                "Trace persist failed"
            );
        }
    }

    async fn synthesize(
        &self,
        goal: &str,
        observations: &[Observation],
        memory_context: &MemoryContext,
    ) -> Result<String> {
        let mut prompt = format!("Goal:\n{goal}\n");

        if !memory_context.recent_messages.is_empty() {
            prompt.push_str("\nRecent conversation:\n");
            for message in &memory_context.recent_messages {
                prompt.push_str(&format!("{}: {}\n", message.role, message.content));
            }
        }
        if !memory_context.relevant_memory.is_empty() {
            prompt.push_str("\nRelevant memory:\n");
            for snippet in &memory_context.relevant_memory {
                prompt.push_str(&format!("- {}\n", truncate(snippet, OBSERVATION_BLOCK_CHARS)));
            }
        }

        prompt.push_str("\nObservations:\n");
        for obs in observations {
            let body = match (&obs.response.data, obs.response.meta_str(meta::ERROR)) {
                (Some(data), _) => truncate(data, OBSERVATION_BLOCK_CHARS).to_string(),
                (None, Some(error)) => format!("[error: {error}]"),
                (None, None) => "[no data]".to_string(),
            };
            prompt.push_str(&format!(
                "Step {} ({} - {}): {}\n",
                obs.step_index, obs.tool, obs.query, body
            ));
        }

        let messages = [
            ChatMessage::system(
                "You are a synthesis agent. Based only on the provided observations \
                 and conversation context, produce a complete final answer to the goal.",
            ),
            ChatMessage::user(prompt),
        ];
        let options = ChatOptions {
            temperature: Some(0.0),
            max_tokens: Some(SYNTHESIS_MAX_TOKENS),
            json_format: false,
        };
        let response = self.llm.chat(&messages, options).await?;
        Ok(response.content)
    }
}

/// Truncate on a character boundary.
fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Builder for wiring a [`Kernel`] from its collaborators.
///
/// ```rust,no_run
/// # use uni_plexo::orchestrator::Kernel;
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let kernel = Kernel::builder()
///     // .language_model(...)
///     // .register_tool(...)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct KernelBuilder {
    config: KernelConfig,
    tools: Vec<Arc<dyn Tool>>,
    llm: Option<Arc<dyn LanguageModel>>,
    memory: Option<Arc<dyn Memory>>,
    traces: Option<Arc<dyn TraceSink>>,
    cache_store: Option<Arc<dyn CacheStore>>,
}

impl KernelBuilder {
    /// Replace the default [`KernelConfig`].
    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a tool. Duplicate names are rejected at
    /// [`build`](Self::build) time.
    pub fn register_tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    /// Register an already shared tool.
    pub fn register_tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Set the language model. Required.
    pub fn language_model<M: LanguageModel + 'static>(mut self, model: M) -> Self {
        self.llm = Some(Arc::new(model));
        self
    }

    /// Set an already shared language model.
    pub fn language_model_arc(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(model);
        self
    }

    /// Attach the memory collaborator.
    pub fn memory<M: Memory + 'static>(mut self, memory: M) -> Self {
        self.memory = Some(Arc::new(memory));
        self
    }

    /// Attach an already shared memory collaborator.
    pub fn memory_arc(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attach the trace sink.
    pub fn trace_sink<S: TraceSink + 'static>(mut self, sink: S) -> Self {
        self.traces = Some(Arc::new(sink));
        self
    }

    /// Attach an already shared trace sink.
    pub fn trace_sink_arc(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.traces = Some(sink);
        self
    }

    /// Attach the durable cache tier.
    pub fn cache_store<S: CacheStore + 'static>(mut self, store: S) -> Self {
        self.cache_store = Some(Arc::new(store));
        self
    }

    /// Attach an already shared durable cache tier.
    pub fn cache_store_arc(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Validate the wiring and construct the kernel.
    ///
    /// Fails if no language model was provided, no tools were registered, or
    /// tool names collide.
    pub fn build(self) -> Result<Arc<Kernel>> {
        let inner_llm = self.llm.ok_or_else(|| {
            KernelError::Config("A language model is required".to_string())
        })?;
        if self.tools.is_empty() {
            return Err(KernelError::Config(
                "At least one tool must be registered".to_string(),
            ));
        }

        let mut registry = ToolRegistry::new();
        for tool in self.tools {
            registry.register(tool)?;
        }
        let registry = Arc::new(registry);

        let mut breakers = HashMap::new();
        for name in registry.list() {
            breakers.insert(
                name.clone(),
                CircuitBreaker::new(name, self.config.tool_breaker.clone()),
            );
        }

        let llm: Arc<dyn LanguageModel> = Arc::new(GuardedLanguageModel::new(
            inner_llm,
            self.config.llm_breaker.clone(),
            self.config.llm_max_concurrency,
        ));

        let executor = ReliableExecutor::new(self.config.retry.clone(), self.config.tool_timeout);
        let router = Arc::new(IntelligentRouter::new(
            registry.clone(),
            executor,
            breakers,
            self.config.similarity_threshold,
        ));
        let guardrails = Guardrails::new(Some(registry.list()))
            .with_limits(self.config.max_plan_steps, self.config.max_input_length);
        let cache = ResponseCache::new(self.config.cache_ttl, self.cache_store);
        let planner = Planner::new(
            llm.clone(),
            registry.clone(),
            self.config.max_plan_steps,
            self.config.max_repair_attempts,
        );

        Ok(Arc::new(Kernel {
            config: self.config,
            registry,
            router,
            guardrails,
            cache,
            llm,
            planner,
            memory: self.memory,
            traces: self.traces,
        }))
    }
}
