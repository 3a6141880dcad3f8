//! Web search tool backed by the [SerpAPI](https://serpapi.com) Google
//! engine.

use crate::api::{Step, ToolResponse};
use crate::error::{KernelError, Result};
use crate::router::WEB_SEARCH;
use crate::traits::Tool;
use async_trait::async_trait;
use reqwest::Client;

/// Environment variable carrying the SerpAPI key.
pub const SERPAPI_KEY_ENV: &str = "SERPAPI_KEY";

const SEARCH_URL: &str = "https://serpapi.com/search.json";
const DEFAULT_NUM_RESULTS: usize = 3;

/// `web_search` tool over SerpAPI.
///
/// Ordinary failures (transport errors, non-success status codes, empty
/// result sets) come back as tool responses rather than errors, per the
/// tool contract.
pub struct SerpApiWebSearch {
    client: Client,
    api_key: String,
    num_results: usize,
}

impl SerpApiWebSearch {
    /// Create a tool with an explicit API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            num_results: DEFAULT_NUM_RESULTS,
        }
    }

    /// Create a tool from the `SERPAPI_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(SERPAPI_KEY_ENV).map_err(|_| {
            KernelError::Config(format!("{SERPAPI_KEY_ENV} not set in environment"))
        })?;
        Ok(Self::new(api_key))
    }

    /// Override the number of organic results returned (default 3).
    pub fn with_num_results(mut self, num_results: usize) -> Self {
        self.num_results = num_results.max(1);
        self
    }
}

#[async_trait]
impl Tool for SerpApiWebSearch {
    fn name(&self) -> &str {
        WEB_SEARCH
    }

    async fn execute(&self, step: &Step) -> Result<ToolResponse> {
        let query = step.query.trim();
        if query.is_empty() {
            return Ok(ToolResponse::error("empty query"));
        }

        let num = self.num_results.to_string();
        let request = self.client.get(SEARCH_URL).query(&[
            ("q", query),
            ("api_key", self.api_key.as_str()),
            ("engine", "google"),
            ("num", num.as_str()),
        ]);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Ok(ToolResponse::error(format!("search request failed: {e}"))),
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(ToolResponse::error(format!("search API error: {status}")));
        }

        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return Ok(ToolResponse::error(format!("invalid search response: {e}"))),
        };

        let results: Vec<String> = body
            .get("organic_results")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .take(self.num_results)
                    .map(|item| {
                        let title = item.get("title").and_then(|v| v.as_str()).unwrap_or("");
                        let snippet = item.get("snippet").and_then(|v| v.as_str()).unwrap_or("");
                        let link = item.get("link").and_then(|v| v.as_str()).unwrap_or("");
                        format!("{title}\n{snippet}\nSource: {link}")
                    })
                    .collect()
            })
            .unwrap_or_default();

        if results.is_empty() {
            return Ok(ToolResponse::success("No relevant web results found."));
        }
        Ok(ToolResponse::success(results.join("\n\n")))
    }
}
