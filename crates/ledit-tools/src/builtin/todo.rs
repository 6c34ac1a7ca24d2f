// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::events::{TodoItem, TodoStatus, ToolEvent};
use crate::tool::{Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};

/// Replace the session todo list.
pub struct TodoWriteTool {
    todos: Arc<Mutex<Vec<TodoItem>>>,
    event_tx: mpsc::Sender<ToolEvent>,
}

impl TodoWriteTool {
    pub fn new(todos: Arc<Mutex<Vec<TodoItem>>>, event_tx: mpsc::Sender<ToolEvent>) -> Self {
        Self { todos, event_tx }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Replace the structured todo list for this session.\n\
         Each item needs id, content, status (pending | in_progress | completed\n\
         | failed), and priority (1 = highest).  description and file_path are\n\
         optional.  Calling todo_write replaces the entire list, not a patch.\n\
         Use for multi-step work; skip for single trivial tasks."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "Array of todo items (replaces existing list)",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "integer" },
                            "content": { "type": "string" },
                            "description": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "failed"]
                            },
                            "priority": { "type": "integer", "description": "1 is highest" },
                            "file_path": { "type": "string" }
                        },
                        "required": ["id", "content", "status", "priority"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Planning
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(raw) = call.args.get("todos").and_then(|v| v.as_array()) else {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::InvalidShape,
                "missing 'todos' array",
            );
        };

        let mut items: Vec<TodoItem> = Vec::with_capacity(raw.len());
        for (i, item) in raw.iter().enumerate() {
            match serde_json::from_value::<TodoItem>(item.clone()) {
                Ok(todo) => items.push(todo),
                Err(e) => {
                    return ToolOutput::err_kind(
                        &call.id,
                        ToolErrorKind::InvalidShape,
                        format!("todo item #{i} has an invalid shape: {e}"),
                    )
                }
            }
        }

        debug!(count = items.len(), "todo_write");

        *self.todos.lock().await = items.clone();
        let _ = self.event_tx.send(ToolEvent::TodoUpdate(items.clone())).await;

        ToolOutput::ok(&call.id, format_todos(&items))
    }
}

/// Render the current todo list.
pub struct TodoReadTool {
    todos: Arc<Mutex<Vec<TodoItem>>>,
}

impl TodoReadTool {
    pub fn new(todos: Arc<Mutex<Vec<TodoItem>>>) -> Self {
        Self { todos }
    }
}

#[async_trait]
impl Tool for TodoReadTool {
    fn name(&self) -> &str {
        "todo_read"
    }

    fn description(&self) -> &str {
        "Read the current session todo list with statuses and priorities."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Planning
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let items = self.todos.lock().await;
        ToolOutput::ok(&call.id, format_todos(&items))
    }
}

fn format_todos(items: &[TodoItem]) -> String {
    if items.is_empty() {
        return "Todo list is empty.".to_string();
    }
    let lines: Vec<String> = items
        .iter()
        .map(|t| {
            let icon = match t.status {
                TodoStatus::Completed => "✓",
                TodoStatus::InProgress => "→",
                TodoStatus::Failed => "✗",
                TodoStatus::Pending => "○",
            };
            let file = t
                .file_path
                .as_deref()
                .map(|f| format!(" ({f})"))
                .unwrap_or_default();
            format!("{icon} [{}] p{} {}{file}", t.id, t.priority, t.content)
        })
        .collect();
    format!("Todos:\n{}", lines.join("\n"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn make_tools() -> (
        TodoWriteTool,
        TodoReadTool,
        Arc<Mutex<Vec<TodoItem>>>,
        mpsc::Receiver<ToolEvent>,
    ) {
        let todos = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel(16);
        (
            TodoWriteTool::new(todos.clone(), tx),
            TodoReadTool::new(todos.clone()),
            todos,
            rx,
        )
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "t".into(),
            name: "todo_write".into(),
            args,
        }
    }

    #[tokio::test]
    async fn writes_and_reads_todos() {
        let (write, read, todos, _rx) = make_tools();
        let out = write
            .execute(&call(json!({"todos": [
                {"id": 1, "content": "analyze", "status": "in_progress", "priority": 1},
                {"id": 2, "content": "implement", "status": "pending", "priority": 2,
                 "file_path": "src/lib.rs"}
            ]})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(todos.lock().await.len(), 2);

        let shown = read
            .execute(&ToolCall {
                id: "r".into(),
                name: "todo_read".into(),
                args: json!({}),
            })
            .await;
        assert!(shown.content.contains("analyze"));
        assert!(shown.content.contains("src/lib.rs"));
    }

    #[tokio::test]
    async fn emits_update_event() {
        let (write, _read, _todos, mut rx) = make_tools();
        write
            .execute(&call(json!({"todos": [
                {"id": 1, "content": "x", "status": "pending", "priority": 1}
            ]})))
            .await;
        let event = rx.try_recv().expect("event emitted");
        assert!(matches!(event, ToolEvent::TodoUpdate(items) if items.len() == 1));
    }

    #[tokio::test]
    async fn bad_status_is_invalid_shape() {
        let (write, _read, _todos, _rx) = make_tools();
        let out = write
            .execute(&call(json!({"todos": [
                {"id": 1, "content": "x", "status": "doing", "priority": 1}
            ]})))
            .await;
        assert!(out.is_error);
        assert_eq!(out.error_kind, Some(ToolErrorKind::InvalidShape));
    }

    #[tokio::test]
    async fn missing_todos_is_invalid_shape() {
        let (write, _read, _todos, _rx) = make_tools();
        let out = write.execute(&call(json!({}))).await;
        assert_eq!(out.error_kind, Some(ToolErrorKind::InvalidShape));
    }

    #[tokio::test]
    async fn empty_list_reads_as_empty() {
        let (_write, read, _todos, _rx) = make_tools();
        let out = read
            .execute(&ToolCall {
                id: "r".into(),
                name: "todo_read".into(),
                args: json!({}),
            })
            .await;
        assert!(out.content.contains("empty"));
    }
}
