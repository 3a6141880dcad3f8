//! Name-to-tool registry with a uniform execution contract.

use crate::error::{KernelError, Result};
use crate::traits::Tool;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps tool names to tool instances.
///
/// Names are case-sensitive and unique. The registry is populated during
/// kernel construction and never mutated afterwards, so it is shared across
/// concurrent requests without synchronization.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name.
    ///
    /// Rejects empty names and duplicates.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(KernelError::Config(
                "Tool name cannot be empty".to_string(),
            ));
        }
        if self.tools.contains_key(&name) {
            return Err(KernelError::Config(format!(
                "Tool '{}' already registered",
                name
            )));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| KernelError::ToolNotFound(name.to_string()))
    }

    /// Whether a tool with this exact name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All registered names, sorted for deterministic planner prompts.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// `true` when no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
