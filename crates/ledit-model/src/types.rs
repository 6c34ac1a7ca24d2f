// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the conversation history.
///
/// Follows the chat-completions wire shape: an assistant message may carry a
/// list of tool calls, and a tool-role message references its originating
/// call through `tool_call_id`.  Every tool-role message must be preceded in
/// history by an assistant message whose `tool_calls` contain that id; the
/// sanitizer drops any orphan before a request is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Reasoning text emitted by thinking models alongside the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Image attachments as data URLs (`data:<mime>;base64,...`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCallRef>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, text)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            reasoning: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            images: Vec::new(),
        }
    }

    /// True when the message has neither visible content nor tool calls.
    /// Whitespace-only content counts as blank.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty() && self.tool_calls.is_empty()
    }

    /// Approximate token count used for context management: ⌈chars/4⌉ over
    /// content and reasoning text, plus the serialized tool-call arguments.
    /// Images use a flat 765-token estimate each.  Adding text never
    /// decreases the estimate, and there is no randomness.
    pub fn approx_tokens(&self) -> usize {
        let mut chars = self.content.len();
        if let Some(r) = &self.reasoning {
            chars += r.len();
        }
        for tc in &self.tool_calls {
            chars += tc.function.name.len() + tc.function.arguments.len();
        }
        let text_tokens = chars.div_ceil(4);
        text_tokens + self.images.len() * 765
    }
}

/// A structured request from the model to invoke a named tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRef {
    /// Provider-supplied, or synthesized as `call_<monotonic>`
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCallRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parse the JSON arguments object.  Empty arguments resolve to `{}`.
    pub fn parsed_args(&self) -> serde_json::Value {
        if self.function.arguments.trim().is_empty() {
            return serde_json::Value::Object(Default::default());
        }
        serde_json::from_str(&self.function.arguments)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object
    pub arguments: String,
}

// ─── Usage accounting ─────────────────────────────────────────────────────────

/// Token usage from one provider call.  `total == prompt + completion`;
/// `cached ≤ prompt`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cached_tokens: u64,
    pub estimated_cost: f64,
}

impl TokenUsage {
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
            cached_tokens: 0,
            estimated_cost: 0.0,
        }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.cached_tokens += other.cached_tokens;
        self.estimated_cost += other.estimated_cost;
    }
}

// ─── Requests & streamed responses ────────────────────────────────────────────

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// A text delta streamed from the model
    TextDelta(String),
    /// A reasoning/thinking delta
    ReasoningDelta(String),
    /// A fragment of a tool call.  Providers interleave fragments for
    /// parallel calls by `index`; arguments accumulate across deltas.
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// Final usage statistics
    Usage(TokenUsage),
    /// The stream finished normally
    Done,
    /// A recoverable error (non-fatal warning)
    Error(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_role_and_content() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").content, "u");
        assert_eq!(Message::assistant("a").role, Role::Assistant);
        let t = Message::tool_result("call-1", "out");
        assert_eq!(t.role, Role::Tool);
        assert_eq!(t.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn blank_detects_whitespace_only() {
        assert!(Message::assistant("   \n\t  ").is_blank());
        assert!(!Message::assistant("text").is_blank());
        let with_call =
            Message::assistant_with_calls("", vec![ToolCallRef::new("1", "read_file", "{}")]);
        assert!(!with_call.is_blank());
    }

    #[test]
    fn approx_tokens_divides_by_four_rounding_up() {
        assert_eq!(Message::user("12345678").approx_tokens(), 2);
        assert_eq!(Message::user("123456789").approx_tokens(), 3);
        assert_eq!(Message::user("").approx_tokens(), 0);
    }

    #[test]
    fn approx_tokens_counts_reasoning() {
        let mut m = Message::assistant("abcd"); // 1 token
        m.reasoning = Some("x".repeat(8)); // +2 tokens
        assert_eq!(m.approx_tokens(), 3);
    }

    #[test]
    fn approx_tokens_is_monotonic_in_content() {
        let short = Message::user("hello");
        let long = Message::user("hello world, considerably longer");
        assert!(long.approx_tokens() >= short.approx_tokens());
    }

    #[test]
    fn approx_tokens_counts_tool_call_arguments() {
        let m = Message::assistant_with_calls(
            "",
            vec![ToolCallRef::new("1", "aaaa", "bbbbbbbb")], // 12 chars → 3 tokens
        );
        assert_eq!(m.approx_tokens(), 3);
    }

    #[test]
    fn approx_tokens_image_uses_flat_estimate() {
        let mut m = Message::user("");
        m.images.push("data:image/png;base64,A".into());
        assert_eq!(m.approx_tokens(), 765);
    }

    #[test]
    fn usage_total_is_prompt_plus_completion() {
        let u = TokenUsage::new(100, 50);
        assert_eq!(u.total_tokens, 150);
    }

    #[test]
    fn usage_add_accumulates() {
        let mut u = TokenUsage::new(100, 50);
        u.add(&TokenUsage::new(200, 100));
        assert_eq!(u.prompt_tokens, 300);
        assert_eq!(u.completion_tokens, 150);
        assert_eq!(u.total_tokens, 450);
    }

    #[test]
    fn message_serialises_to_wire_shape() {
        let m = Message::assistant_with_calls(
            "",
            vec![ToolCallRef::new("call_1", "shell_command", r#"{"command":"ls"}"#)],
        );
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains(r#""type":"function""#));
        assert!(json.contains(r#""name":"shell_command""#));
        // absent optionals stay off the wire
        assert!(!json.contains("tool_call_id"));
        assert!(!json.contains("reasoning"));
    }

    #[test]
    fn message_round_trips() {
        let m = Message::tool_result("call-9", "output text");
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::Tool);
        assert_eq!(back.tool_call_id.as_deref(), Some("call-9"));
        assert_eq!(back.content, "output text");
    }

    #[test]
    fn parsed_args_tolerates_empty_and_garbage() {
        let tc = ToolCallRef::new("1", "t", "");
        assert!(tc.parsed_args().is_object());
        let tc = ToolCallRef::new("1", "t", "not json");
        assert!(tc.parsed_args().is_object());
        let tc = ToolCallRef::new("1", "t", r#"{"path":"a.rs","start_line":3}"#);
        assert_eq!(tc.parsed_args()["start_line"], 3);
    }
}
