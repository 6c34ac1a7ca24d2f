// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Lifecycle state of a todo item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A structured todo item managed by the todo_write tool and the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    /// Unique within the session
    pub id: u32,
    /// Short title
    pub content: String,
    #[serde(default)]
    pub description: String,
    pub status: TodoStatus,
    /// 1 is highest
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl TodoItem {
    pub fn new(id: u32, content: impl Into<String>, priority: u8) -> Self {
        Self {
            id,
            content: content.into(),
            description: String::new(),
            status: TodoStatus::Pending,
            priority,
            file_path: None,
        }
    }
}

/// Events emitted by stateful tools back to the agent loop.
#[derive(Debug)]
pub enum ToolEvent {
    TodoUpdate(Vec<TodoItem>),
}
