// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use ledit_history::ChangeTracker;

use crate::tool::{Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};
use crate::workspace::Workspace;

/// Overwrite or create a file, recording the change for rollback.
pub struct WriteFileTool {
    pub workspace: Workspace,
    pub tracker: Arc<Mutex<ChangeTracker>>,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it (and parent directories) if\n\
         needed, overwriting if it exists.  The previous contents are recorded\n\
         so the change can be rolled back with rollback_changes.\n\
         For small targeted changes prefer edit_file — it replaces one exact\n\
         substring instead of rewriting the whole file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "content": {
                    "type": "string",
                    "description": "Full new file content"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::FileSystem
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let raw_path = match call.str_arg(&["path", "file_path"]) {
            Some(p) => p,
            None => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::InvalidArgs,
                    "missing required parameter 'path'",
                )
            }
        };
        let content = match call.str_arg(&["content", "file_text"]) {
            Some(c) => c,
            None => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::InvalidArgs,
                    "missing required parameter 'content'. This usually means the \
                     JSON was truncated because the content was too large for a \
                     single generation.",
                )
            }
        };
        let path = match self.workspace.resolve(&raw_path) {
            Ok(p) => p,
            Err(kind) => {
                return ToolOutput::err_kind(
                    &call.id,
                    kind,
                    format!("'{raw_path}' is outside the workspace"),
                )
            }
        };

        debug!(path = %path.display(), bytes = content.len(), "write_file");

        // Snapshot the current contents before touching the file.
        if let Ok(mut tracker) = self.tracker.lock() {
            if tracker.is_enabled() {
                let _ = tracker.track_write(&path, content.as_bytes());
            }
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolOutput::err_kind(
                        &call.id,
                        ToolErrorKind::IoError,
                        format!("failed to create parent directories: {e}"),
                    );
                }
            }
        }

        match tokio::fs::write(&path, &content).await {
            Ok(()) => ToolOutput::ok(
                &call.id,
                format!("wrote {} bytes to {raw_path}", content.len()),
            )
            .with_files(vec![path]),
            Err(e) => ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::IoError,
                format!("write error: {e}"),
            ),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
