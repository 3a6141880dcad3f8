//! `plexo-run` — execute one goal end-to-end against an Ollama server.
//!
//! Usage:
//!
//! ```text
//! plexo-run [--session <id>] <goal...>
//! ```
//!
//! Requires a reachable Ollama server (`OLLAMA_HOST`, default
//! `http://localhost:11434`) and a `SERPAPI_KEY` for the web_search tool.

use std::process;
use uni_plexo::api::KernelConfig;
use uni_plexo::ollama::OllamaChat;
use uni_plexo::orchestrator::Kernel;
use uni_plexo::web_search::SerpApiWebSearch;

fn print_usage() {
    eprintln!("Usage: plexo-run [OPTIONS] <goal...>");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <goal...>           The goal to plan and execute");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --session <id>      Session identifier (default: \"cli\")");
    eprintln!("  --help              Show this message");
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let mut session_id = "cli".to_string();
    let mut goal_words: Vec<String> = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--session" => {
                session_id = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--session requires an argument"))?;
            }
            _ if arg.starts_with('-') => {
                anyhow::bail!("Unknown option: {arg}");
            }
            _ => goal_words.push(arg),
        }
    }

    let goal = goal_words.join(" ");
    if goal.is_empty() {
        print_usage();
        anyhow::bail!("Missing required argument: <goal...>");
    }

    let llm = OllamaChat::from_env();
    let web_search = SerpApiWebSearch::from_env()
        .map_err(|e| anyhow::anyhow!("web_search tool unavailable: {e}"))?;

    let kernel = Kernel::builder()
        .config(KernelConfig::from_env())
        .language_model(llm)
        .register_tool(web_search)
        .build()
        .map_err(|e| anyhow::anyhow!("kernel construction failed: {e}"))?;

    println!("session : {session_id}");
    println!("goal    : {goal}\n");

    let output = kernel
        .run(&session_id, &goal)
        .await
        .map_err(|e| anyhow::anyhow!("request failed: {e}"))?;

    println!("request : {}", output.request_id);
    println!("\n{}", output.result);
    Ok(())
}
