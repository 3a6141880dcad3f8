#![allow(dead_code)]

//! Mock collaborators for unit tests.
//!
//! Integration tests have their own copy of these under
//! `tests/common/mock_support.rs`; this module is gated with `#[cfg(test)]`.

use crate::api::{Step, ToolResponse, meta};
use crate::error::{KernelError, Result};
use crate::traits::{ChatMessage, ChatOptions, ChatResponse, LanguageModel, Tool};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Mock tool with configurable data, similarity, faults, and delay.
pub struct MockTool {
    name: String,
    data: String,
    similarity: Option<f64>,
    error_response: Option<String>,
    fault_count: AtomicU32,
    delay_ms: u64,
    call_count: AtomicU32,
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
            call_count: AtomicU32::new(0),
        }
    }

    /// Data returned on success.
    pub fn with_data(mut self, data: &str) -> Self {
        self.data = data.to_string();
        self
    }

    /// Attach a `similarity` metadata value to successful responses.
    pub fn with_similarity(mut self, similarity: f64) -> Self {
        self.similarity = Some(similarity);
        self
    }

    /// Always return an ordinary error response with this message.
    pub fn with_error_response(mut self, message: &str) -> Self {
        self.error_response = Some(message.to_string());
        self
    }

    /// Fail the first `count` calls with `Err(ToolFailed)`.
    pub fn with_fault_count(mut self, count: u32) -> Self {
        self.fault_count = AtomicU32::new(count);
        self
    }

    /// Sleep before responding.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _step: &Step) -> Result<ToolResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }

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

/// Mock language model that pops scripted responses in order; the last
/// response repeats once the script is exhausted.
pub struct MockLanguageModel {
    responses: Mutex<Vec<String>>,
    fail_count: AtomicU32,
    call_count: AtomicU32,
}

impl MockLanguageModel {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            fail_count: AtomicU32::new(0),
            call_count: AtomicU32::new(0),
        }
    }

    /// Fail the first `count` calls with `Err(LlmUnavailable)`.
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = AtomicU32::new(count);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn chat(&self, _messages: &[ChatMessage], _options: ChatOptions) -> Result<ChatResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

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
