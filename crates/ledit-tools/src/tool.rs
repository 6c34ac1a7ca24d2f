// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use ledit_model::TokenUsage;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Provider-supplied or synthesized; forwarded verbatim into the
    /// tool-result message.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

impl ToolCall {
    /// Read a string argument under any of the given alias names.
    pub fn str_arg(&self, names: &[&str]) -> Option<String> {
        for name in names {
            if let Some(v) = self.args.get(name) {
                if let Some(s) = v.as_str() {
                    return Some(s.to_string());
                }
                // Tolerate numbers where a string was expected.
                if v.is_number() {
                    return Some(v.to_string());
                }
            }
        }
        None
    }

    /// Read an integer argument under any of the given alias names,
    /// tolerating string-encoded numbers.
    pub fn u64_arg(&self, names: &[&str]) -> Option<u64> {
        for name in names {
            if let Some(v) = self.args.get(name) {
                if let Some(n) = v.as_u64() {
                    return Some(n);
                }
                if let Some(s) = v.as_str() {
                    if let Ok(n) = s.trim().parse::<u64>() {
                        return Some(n);
                    }
                }
            }
        }
        None
    }

    pub fn bool_arg(&self, names: &[&str]) -> Option<bool> {
        for name in names {
            if let Some(b) = self.args.get(name).and_then(|v| v.as_bool()) {
                return Some(b);
            }
        }
        None
    }
}

/// Classification of tool failures.  The loop turns these into tool-result
/// messages; a few of them also change control flow (security errors stop a
/// sub-agent, user denials are never retried).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ToolErrorKind {
    #[error("unsafe command")]
    UnsafeCommand,
    #[error("git write operations require the git tool")]
    GitWriteThroughShell,
    #[error("command execution failed")]
    ExecFailed,
    #[error("not found")]
    NotFound,
    #[error("path outside workspace")]
    OutsideWorkspace,
    #[error("io error")]
    IoError,
    #[error("substring is not unique")]
    SubstringNotUnique,
    #[error("file already exists")]
    AlreadyExists,
    #[error("invalid operation")]
    InvalidOp,
    #[error("denied by user")]
    UserDenied,
    #[error("invalid shape")]
    InvalidShape,
    #[error("build failed")]
    BuildFailed,
    #[error("skill not found")]
    SkillNotFound,
    #[error("nothing to revert")]
    NothingToRevert,
    #[error("unknown tool")]
    UnknownTool,
    #[error("invalid arguments")]
    InvalidArgs,
    #[error("network error")]
    NetworkError,
}

/// The result of executing a tool, as returned to the conversation loop.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Plain-text output shown to the model.
    pub content: String,
    pub is_error: bool,
    pub error_kind: Option<ToolErrorKind>,
    /// Optional structured payload for programmatic consumers.
    pub data: Option<Value>,
    /// Files created or modified by this call.
    pub affected_files: Vec<PathBuf>,
    pub warnings: Vec<String>,
    /// Wall-clock duration; filled in by the registry.
    pub duration: Duration,
    /// Token usage charged by tools that make their own model calls
    /// (vision analysis); rolled into session metrics by the loop.
    pub usage: Option<TokenUsage>,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
            error_kind: None,
            data: None,
            affected_files: Vec::new(),
            warnings: Vec::new(),
            duration: Duration::ZERO,
            usage: None,
        }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::ok(call_id, msg)
        }
    }

    /// Error with a typed kind the loop can branch on.
    pub fn err_kind(
        call_id: impl Into<String>,
        kind: ToolErrorKind,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            error_kind: Some(kind),
            ..Self::err(call_id, msg)
        }
    }

    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.affected_files = files;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Coarse grouping used for permission display and duration estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    FileSystem,
    Execution,
    Git,
    Search,
    Web,
    Vision,
    Planning,
    Agent,
    History,
}

/// Describes the shape of a tool's text output for context-aware truncation.
///
/// When a result is compacted, the optimizer uses this to pick the right
/// extraction strategy; tools declare their own category so the engine never
/// hard-codes tool names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Terminal output: head and tail both matter (errors come last).
    HeadTail,
    /// Ordered match list: leading entries are the most relevant.
    MatchList,
    /// File content: head (imports/declarations) plus tail.
    FileContent,
    /// Anything else: hard truncate.
    #[default]
    Generic,
}

/// Trait every built-in tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    fn category(&self) -> ToolCategory;
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }
    /// Rough duration estimate for progress display.
    fn estimated_duration(&self) -> Duration {
        Duration::from_secs(1)
    }
    /// Availability check; unavailable tools are excluded from schemas.
    fn is_available(&self) -> bool {
        true
    }
    /// Execute the tool.  Errors are values ([`ToolOutput::err`]), not panics.
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
