//! Chat client for an [Ollama](https://ollama.com) server, speaking the
//! non-streaming `/api/chat` endpoint.

use crate::error::{KernelError, Result};
use crate::traits::{ChatMessage, ChatOptions, ChatResponse, LanguageModel};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

/// Environment variable naming the Ollama host.
pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";
/// Environment variable naming the model tag.
pub const OLLAMA_MODEL_ENV: &str = "OLLAMA_MODEL";

const DEFAULT_HOST: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3";

/// [`LanguageModel`] backed by an Ollama server.
///
/// When [`ChatOptions::json_format`] is set the request carries
/// `"format": "json"`, which Ollama honors by emitting a strict JSON
/// document as the message content.
pub struct OllamaChat {
    client: Client,
    host: String,
    model: String,
}

impl OllamaChat {
    /// Create a client for the given host and model tag.
    pub fn new(host: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Create a client from `OLLAMA_HOST` (default `http://localhost:11434`)
    /// and `OLLAMA_MODEL` (default `llama3`).
    pub fn from_env() -> Self {
        let host = std::env::var(OLLAMA_HOST_ENV).unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let model = std::env::var(OLLAMA_MODEL_ENV).unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(host, model)
    }
}

#[async_trait]
impl LanguageModel for OllamaChat {
    async fn chat(&self, messages: &[ChatMessage], options: ChatOptions) -> Result<ChatResponse> {
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        if options.json_format {
            payload["format"] = json!("json");
        }
        let mut model_options = serde_json::Map::new();
        if let Some(temperature) = options.temperature {
            model_options.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = options.max_tokens {
            model_options.insert("num_predict".to_string(), json!(max_tokens));
        }
        if !model_options.is_empty() {
            payload["options"] = serde_json::Value::Object(model_options);
        }

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&payload)
            .send()
            .await
            .map_err(|e| KernelError::LlmUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KernelError::LlmUnavailable(format!(
                "Ollama API error: {status}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| KernelError::LlmUnavailable(e.to_string()))?;

        // `message.content` is a string; with format=json it is a JSON
        // document encoded as a string. Anything else is re-encoded so the
        // parser upstream sees consistent text.
        let content = match body.pointer("/message/content") {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => {
                return Err(KernelError::LlmUnavailable(
                    "Ollama response missing message content".to_string(),
                ));
            }
        };

        Ok(ChatResponse { content })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_stripped_from_host() {
        let client = OllamaChat::new("http://localhost:11434/", "llama3");
        assert_eq!(client.host, "http://localhost:11434");
        assert_eq!(client.model_id(), "llama3");
    }
}
