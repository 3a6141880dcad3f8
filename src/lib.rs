//! Reliability-first plan-and-execute orchestration kernel for
//! language-model agents.
//!
//! Uni-Plexo sits between a thin serving surface and a set of unreliable
//! downstreams (a language model, search APIs, a vector index, a document
//! store). Given a user goal it obtains a structured plan of tool
//! invocations from the model, executes those invocations under strict
//! reliability and concurrency controls, synthesizes a final answer, and
//! records a durable execution trace.
//!
//! # Key concepts
//!
//! - **[`Kernel`](orchestrator::Kernel)** — the orchestration value built
//!   once at startup and shared across requests.
//! - **[`Tool`](traits::Tool)** — the uniform contract every downstream
//!   capability implements; tools are looked up through the
//!   [`ToolRegistry`](registry::ToolRegistry).
//! - **[`IntelligentRouter`](router::IntelligentRouter)** — dispatches one
//!   plan step and applies confidence- and failure-based fallback.
//! - **[`ReliableExecutor`](executor::ReliableExecutor)** and
//!   **[`CircuitBreaker`](breaker::CircuitBreaker)** — retry, timeout, and
//!   per-endpoint breaker protection around every remote call.
//! - **[`ResponseCache`](cache::ResponseCache)** — two-tier TTL cache that
//!   short-circuits repeated requests before any tool runs.
//! - **[`Guardrails`](guardrails::Guardrails)** — pattern-based hard-block
//!   validators at every kernel boundary.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use uni_plexo::orchestrator::Kernel;
//! # #[cfg(all(feature = "client-ollama", feature = "tool-web-search"))]
//! use uni_plexo::{ollama::OllamaChat, web_search::SerpApiWebSearch};
//!
//! # #[cfg(all(feature = "client-ollama", feature = "tool-web-search"))]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let kernel = Kernel::builder()
//!     .language_model(OllamaChat::from_env())
//!     .register_tool(SerpApiWebSearch::from_env()?)
//!     .build()?;
//!
//! let output = kernel
//!     .run("session-1", "Explain retrieval-augmented generation")
//!     .await?;
//! println!("{} ({})", output.result, output.request_id);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod breaker;
pub mod cache;
pub mod error;
pub mod executor;
pub mod guardrails;
pub mod llm;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod router;
pub mod trace;
pub mod traits;

#[cfg(feature = "client-ollama")]
pub mod ollama;
#[cfg(feature = "tool-web-search")]
pub mod web_search;

#[cfg(test)]
mod mock;
