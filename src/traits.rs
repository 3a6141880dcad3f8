//! Collaborator traits: the seams through which the kernel reaches every
//! external dependency (tools, language model, memory, trace sink, durable
//! cache tier).

use crate::api::{Step, ToolResponse};
use crate::cache::CacheEntry;
use crate::error::Result;
use crate::trace::Trace;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A named, uniformly-invoked downstream capability (retrieval, web search,
/// calculators, ...).
///
/// Tools report ordinary failures by returning a [`ToolResponse`] with
/// `status = error`; an `Err` is reserved for faults (transport breakage,
/// internal bugs) and is converted into an error response by the reliable
/// executor. Tools are stateless from the kernel's perspective.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable, case-sensitive tool name used for registry lookup and plan
    /// whitelisting.
    fn name(&self) -> &str;

    /// Execute one plan step.
    async fn execute(&self, step: &Step) -> Result<ToolResponse>;
}

/// One turn of a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user`, or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A `system` message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// A `user` message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// An `assistant` message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Sampling and format parameters for one chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Sampling temperature. The planner, repair, and synthesis paths all
    /// pin this to 0 for determinism.
    pub temperature: Option<f32>,
    /// Maximum tokens to generate. Provider default if `None`.
    pub max_tokens: Option<usize>,
    /// Ask the model to emit strict JSON when the backend honors it.
    pub json_format: bool,
}

impl ChatOptions {
    /// Deterministic settings: temperature 0 with an optional JSON format
    /// constraint.
    pub fn deterministic(json_format: bool) -> Self {
        Self {
            temperature: Some(0.0),
            max_tokens: None,
            json_format,
        }
    }
}

/// The output of a chat call.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Assistant message content. When `json_format` was honored this is a
    /// JSON document encoded as a string.
    pub content: String,
}

/// A chat-capable language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one chat completion.
    async fn chat(&self, messages: &[ChatMessage], options: ChatOptions) -> Result<ChatResponse>;

    /// The underlying model identifier (e.g. an Ollama model tag).
    fn model_id(&self) -> &str;
}

/// Conversation context assembled by the memory collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryContext {
    /// Most recent conversation turns, oldest first.
    pub recent_messages: Vec<ChatMessage>,
    /// Long-term memory snippets relevant to the current goal.
    pub relevant_memory: Vec<String>,
}

/// Conversation storage and long-term semantic memory, external to the
/// kernel.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Fetch recent turns and semantically relevant snippets for a session.
    async fn retrieve_context(
        &self,
        session_id: &str,
        query: &str,
        recent_limit: usize,
        semantic_top_k: usize,
    ) -> Result<MemoryContext>;

    /// Persist one user/assistant exchange.
    async fn save_interaction(
        &self,
        session_id: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<()>;
}

/// Append-only sink for per-request execution traces. The kernel never reads
/// traces back.
#[async_trait]
pub trait TraceSink: Send + Sync {
    /// Insert one trace document.
    async fn insert(&self, trace: &Trace) -> Result<()>;
}

/// Durable key-to-document tier of the response cache (L2). Implementations
/// own TTL-based reclamation of expired entries; the kernel still checks
/// `expires_at` on read.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up an entry by digest key.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Upsert an entry under a digest key (last writer wins). The same
    /// document is stored under both its goal and plan keys.
    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<()>;
}
