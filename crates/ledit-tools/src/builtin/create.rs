// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use ledit_history::ChangeTracker;

use crate::tool::{Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};
use crate::workspace::Workspace;

/// Create a new file; fails if it already exists.
pub struct CreateTool {
    pub workspace: Workspace,
    pub tracker: Arc<Mutex<ChangeTracker>>,
}

#[async_trait]
impl Tool for CreateTool {
    fn name(&self) -> &str {
        "create"
    }

    fn description(&self) -> &str {
        "Create a new file with the given content.  Fails if the file already\n\
         exists — use write_file to overwrite or edit_file for targeted changes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "file_text": {
                    "type": "string",
                    "description": "Content of the new file"
                }
            },
            "required": ["path", "file_text"],
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
        let content = match call.str_arg(&["file_text", "content"]) {
            Some(c) => c,
            None => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::InvalidArgs,
                    "missing required parameter 'file_text'",
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

        if path.exists() {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::AlreadyExists,
                format!("{raw_path} already exists; use write_file to overwrite"),
            );
        }

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
                format!("created {raw_path} ({} bytes)", content.len()),
            )
            .with_files(vec![path]),
            Err(e) => ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::IoError,
                format!("create error: {e}"),
            ),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn setup() -> (tempfile::TempDir, CreateTool) {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ChangeTracker::new();
        tracker.enable("test");
        let tool = CreateTool {
            workspace: Workspace::new(dir.path()),
            tracker: Arc::new(Mutex::new(tracker)),
        };
        (dir, tool)
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "c".into(),
            name: "create".into(),
            args,
        }
    }

    #[tokio::test]
    async fn creates_new_file() {
        let (dir, tool) = setup();
        let out = tool
            .execute(&call(json!({"path": "fresh.txt", "file_text": "content"})))
            .await;
        assert!(!out.is_error);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("fresh.txt")).unwrap(),
            "content"
        );
    }

    #[tokio::test]
    async fn existing_file_is_rejected() {
        let (dir, tool) = setup();
        std::fs::write(dir.path().join("taken.txt"), "old").unwrap();
        let out = tool
            .execute(&call(json!({"path": "taken.txt", "file_text": "new"})))
            .await;
        assert!(out.is_error);
        assert_eq!(out.error_kind, Some(ToolErrorKind::AlreadyExists));
        // untouched
        assert_eq!(
            std::fs::read_to_string(dir.path().join("taken.txt")).unwrap(),
            "old"
        );
    }

    #[tokio::test]
    async fn content_alias_accepted() {
        let (_dir, tool) = setup();
        let out = tool
            .execute(&call(json!({"path": "a.txt", "content": "via alias"})))
            .await;
        assert!(!out.is_error);
    }
}
