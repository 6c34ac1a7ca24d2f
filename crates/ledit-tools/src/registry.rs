// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use ledit_model::ToolSchema;

use crate::tool::{Tool, ToolCall, ToolErrorKind, ToolOutput};

/// Fixed alias table for tool names the model tends to invent.  An unknown
/// name that matches an alias produces a helpful correction rather than a
/// bare failure.
const NAME_ALIASES: &[(&str, &str)] = &[
    ("exec", "shell_command"),
    ("bash", "shell_command"),
    ("sh", "shell_command"),
    ("run", "shell_command"),
    ("run_command", "shell_command"),
    ("terminal", "shell_command"),
    ("cat", "read_file"),
    ("read", "read_file"),
    ("view", "read_file"),
    ("open_file", "read_file"),
    ("write", "write_file"),
    ("save_file", "write_file"),
    ("edit", "edit_file"),
    ("str_replace", "edit_file"),
    ("replace", "edit_file"),
    ("create_file", "create"),
    ("new_file", "create"),
    ("grep", "search_files"),
    ("search", "search_files"),
    ("find", "search_files"),
    ("rg", "search_files"),
    ("fetch", "fetch_url"),
    ("curl", "fetch_url"),
    ("browse", "fetch_url"),
    ("web", "web_search"),
    ("subagent", "run_subagent"),
    ("task", "run_subagent"),
    ("undo", "rollback_changes"),
    ("revert", "rollback_changes"),
    ("history", "view_history"),
    ("todos", "todo_read"),
    ("todo", "todo_write"),
    ("build", "validate_build"),
];

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas for every available tool, sorted by name for a stable
    /// request shape (helps provider-side prompt caching).
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|t| t.is_available())
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Dispatch one call.  Unknown names get an alias suggestion; the
    /// returned output always carries the measured duration.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let started = Instant::now();
        let mut output = match self.tools.get(&call.name) {
            Some(tool) => {
                debug!(tool = %call.name, call_id = %call.id, "executing tool");
                tool.execute(call).await
            }
            None => self.unknown_tool_output(call),
        };
        output.duration = started.elapsed();
        output
    }

    fn unknown_tool_output(&self, call: &ToolCall) -> ToolOutput {
        let suggestion = NAME_ALIASES
            .iter()
            .find(|(alias, _)| *alias == call.name)
            .map(|(_, canonical)| *canonical)
            .filter(|canonical| self.tools.contains_key(*canonical));

        let msg = match suggestion {
            Some(canonical) => format!(
                "Unknown tool '{}'. Use the exact tool name '{}' instead.",
                call.name, canonical
            ),
            None => format!(
                "Unknown tool '{}'. Available tools: {}",
                call.name,
                self.names().join(", ")
            ),
        };
        ToolOutput::err_kind(&call.id, ToolErrorKind::UnknownTool, msg)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
