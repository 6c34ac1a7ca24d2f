// SPDX-License-Identifier: Apache-2.0
use ledit_tools::TodoItem;

/// Events emitted by the engine during a run.  Consumers (the CLI printer,
/// tests) subscribe through an mpsc channel; the engine never blocks on a
/// missing consumer.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model
    TextDelta(String),
    /// A complete assistant response
    TextComplete(String),
    /// A tool call is about to execute
    ToolCallStarted { call_id: String, tool_name: String },
    /// A tool call finished
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// The conversation was pruned; statistics for display
    Pruned {
        messages_before: usize,
        messages_after: usize,
        tokens_before: usize,
        tokens_after: usize,
    },
    /// The todo list changed
    TodoUpdate(Vec<TodoItem>),
    /// A provider rate limit was hit; the engine is backing off
    RateLimited { provider: String, delay_secs: u64 },
    /// The current run finished
    TurnComplete,
    /// A recoverable error
    Error(String),
}
