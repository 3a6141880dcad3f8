#![allow(dead_code)]

//! Shared mock collaborators for the integration suites.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uni_plexo::api::{Step, ToolResponse, meta};
use uni_plexo::cache::CacheEntry;
use uni_plexo::error::{KernelError, Result};
use uni_plexo::trace::Trace;
use uni_plexo::traits::{
    CacheStore, ChatMessage, ChatOptions, ChatResponse, LanguageModel, Memory, MemoryContext, Tool,
    TraceSink,
};

/// Mock tool with configurable data, similarity, faults, delay, and
/// concurrency tracking.
pub struct MockTool {
    name: String,
    data: String,
    similarity: Option<f64>,
    error_response: Option<String>,
    fault_count: AtomicU32,
    delay_ms: u64,
    call_count: Arc<AtomicU32>,
    in_flight: Arc<AtomicU32>,
    max_in_flight: Arc<AtomicU32>,
}

impl MockTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: "mock data".to_string(),
            similarity: None,
            error_response: None,
            fault_count: AtomicU32::new(0),
            delay_ms: 0,
            call_count: Arc::new(AtomicU32::new(0)),
            in_flight: Arc::new(AtomicU32::new(0)),
            max_in_flight: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_data(mut self, data: &str) -> Self {
        self.data = data.to_string();
        self
    }

    pub fn with_similarity(mut self, similarity: f64) -> Self {
        self.similarity = Some(similarity);
        self
    }

    pub fn with_error_response(mut self, message: &str) -> Self {
        self.error_response = Some(message.to_string());
        self
    }

    /// Fail the first `count` calls with `Err(ToolFailed)`.
    pub fn with_fault_count(mut self, count: u32) -> Self {
        self.fault_count = AtomicU32::new(count);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Counter handles survive after the tool moves into the kernel.
    pub fn call_counter(&self) -> Arc<AtomicU32> {
        self.call_count.clone()
    }

    /// High-water mark of concurrent executions.
    pub fn concurrency_tracker(&self) -> Arc<AtomicU32> {
        self.max_in_flight.clone()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _step: &Step) -> Result<ToolResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fault_count.load(Ordering::SeqCst) > 0 {
            self.fault_count.fetch_sub(1, Ordering::SeqCst);
            return Err(KernelError::ToolFailed("mock fault".to_string()));
        }

        if let Some(message) = &self.error_response {
            return Ok(ToolResponse::error(message.clone()));
        }

        let mut response = ToolResponse::success(self.data.clone());
        if let Some(similarity) = self.similarity {
            response.insert_meta(meta::SIMILARITY, similarity);
        }
        Ok(response)
    }
}

/// Mock language model that pops scripted responses in order; the last one
/// repeats once the script is exhausted.
pub struct MockLanguageModel {
    responses: Mutex<Vec<String>>,
    fail_count: AtomicU32,
    delay_ms: u64,
    call_count: Arc<AtomicU32>,
}

impl MockLanguageModel {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            fail_count: AtomicU32::new(0),
            delay_ms: 0,
            call_count: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fail the first `count` calls with `Err(LlmUnavailable)`.
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = AtomicU32::new(count);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn call_counter(&self) -> Arc<AtomicU32> {
        self.call_count.clone()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn chat(&self, _messages: &[ChatMessage], _options: ChatOptions) -> Result<ChatResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }

        if self.fail_count.load(Ordering::SeqCst) > 0 {
            self.fail_count.fetch_sub(1, Ordering::SeqCst);
            return Err(KernelError::LlmUnavailable("mock outage".to_string()));
        }

        let mut responses = self.responses.lock().unwrap();
        let content = if responses.len() > 1 {
            responses.remove(0)
        } else {
            responses
                .first()
                .cloned()
                .unwrap_or_else(|| "mock answer".to_string())
        };
        Ok(ChatResponse { content })
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

/// In-memory memory collaborator that records saved interactions.
#[derive(Default)]
pub struct RecordingMemory {
    saved: Mutex<Vec<(String, String, String)>>,
    context: Mutex<MemoryContext>,
    fail_writes: bool,
}

impl RecordingMemory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_writes() -> Arc<Self> {
        Arc::new(Self {
            fail_writes: true,
            ..Self::default()
        })
    }

    pub fn with_context(context: MemoryContext) -> Arc<Self> {
        Arc::new(Self {
            context: Mutex::new(context),
            ..Self::default()
        })
    }

    pub fn saved_interactions(&self) -> Vec<(String, String, String)> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl Memory for RecordingMemory {
    async fn retrieve_context(
        &self,
        _session_id: &str,
        _query: &str,
        _recent_limit: usize,
        _semantic_top_k: usize,
    ) -> Result<MemoryContext> {
        Ok(self.context.lock().unwrap().clone())
    }

    async fn save_interaction(
        &self,
        session_id: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<()> {
        if self.fail_writes {
            return Err(KernelError::MemoryStore("mock write failure".to_string()));
        }
        self.saved.lock().unwrap().push((
            session_id.to_string(),
            user_message.to_string(),
            assistant_message.to_string(),
        ));
        Ok(())
    }
}

/// Trace sink that records every inserted trace.
#[derive(Default)]
pub struct RecordingTraceSink {
    traces: Mutex<Vec<Trace>>,
    fail_inserts: bool,
}

impl RecordingTraceSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_inserts: true,
            ..Self::default()
        })
    }

    pub fn traces(&self) -> Vec<Trace> {
        self.traces.lock().unwrap().clone()
    }
}

#[async_trait]
impl TraceSink for RecordingTraceSink {
    async fn insert(&self, trace: &Trace) -> Result<()> {
        if self.fail_inserts {
            return Err(KernelError::TraceStore("mock insert failure".to_string()));
        }
        self.traces.lock().unwrap().push(trace.clone());
        Ok(())
    }
}

/// In-memory durable cache tier.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), entry.clone());
        Ok(())
    }
}

/// A `{"steps": [...]}` plan document naming one step per `(tool, query)`
/// pair.
pub fn plan_json(steps: &[(&str, &str)]) -> String {
    let steps: Vec<serde_json::Value> = steps
        .iter()
        .map(|(tool, query)| serde_json::json!({"tool": tool, "query": query}))
        .collect();
    serde_json::json!({ "steps": steps }).to_string()
}
