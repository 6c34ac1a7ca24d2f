// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use ledit_history::ChangeTracker;

use crate::tool::{Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};
use crate::workspace::Workspace;

/// Replace one exact substring in a file, recording the change for rollback.
pub struct EditFileTool {
    pub workspace: Workspace,
    pub tracker: Arc<Mutex<ChangeTracker>>,
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace ONE exact substring in a file.\n\
         'old_str' must appear exactly once — include enough surrounding\n\
         context to make it unique.  Fails when the substring is missing or\n\
         ambiguous.  The change is recorded for rollback_changes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to replace (must be unique in the file)"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_str", "new_str"],
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
        let (old_str, new_str) = match (
            call.str_arg(&["old_str", "old_string"]),
            call.str_arg(&["new_str", "new_string"]),
        ) {
            (Some(o), Some(n)) => (o, n),
            _ => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::InvalidArgs,
                    "edit_file requires 'old_str' and 'new_str'",
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

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::NotFound,
                    format!("file not found: {raw_path}"),
                )
            }
            Err(e) => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::IoError,
                    format!("read error: {e}"),
                )
            }
        };

        let occurrences = text.matches(&old_str).count();
        if occurrences == 0 {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::NotFound,
                format!(
                    "old_str not found in {raw_path}. Read the file again — \
                     the content may have changed since you last saw it."
                ),
            );
        }
        if occurrences > 1 {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::SubstringNotUnique,
                format!(
                    "old_str appears {occurrences} times in {raw_path}; \
                     include more surrounding context to make it unique"
                ),
            );
        }

        debug!(path = %path.display(), "edit_file");

        if let Ok(mut tracker) = self.tracker.lock() {
            if tracker.is_enabled() {
                let _ = tracker.track_edit(&path, &old_str, &new_str);
            }
        }

        let updated = text.replacen(&old_str, &new_str, 1);
        match tokio::fs::write(&path, updated).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("edited {raw_path}"))
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

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn setup() -> (tempfile::TempDir, EditFileTool, Arc<Mutex<ChangeTracker>>) {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ChangeTracker::new();
        tracker.enable("test");
        let tracker = Arc::new(Mutex::new(tracker));
        let tool = EditFileTool {
            workspace: Workspace::new(dir.path()),
            tracker: tracker.clone(),
        };
        (dir, tool, tracker)
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "e".into(),
            name: "edit_file".into(),
            args,
        }
    }

    #[tokio::test]
    async fn replaces_unique_substring() {
        let (dir, tool, _t) = setup();
        std::fs::write(dir.path().join("f.rs"), "fn old_name() {}\nfn other() {}").unwrap();
        let out = tool
            .execute(&call(json!({
                "path": "f.rs", "old_str": "old_name", "new_str": "new_name"
            })))
            .await;
        assert!(!out.is_error, "{}", out.content);
        let text = std::fs::read_to_string(dir.path().join("f.rs")).unwrap();
        assert!(text.contains("fn new_name()"));
        assert!(!text.contains("old_name"));
    }

    #[tokio::test]
    async fn missing_substring_is_not_found() {
        let (dir, tool, _t) = setup();
        std::fs::write(dir.path().join("f.rs"), "content").unwrap();
        let out = tool
            .execute(&call(json!({
                "path": "f.rs", "old_str": "absent", "new_str": "x"
            })))
            .await;
        assert!(out.is_error);
        assert_eq!(out.error_kind, Some(ToolErrorKind::NotFound));
    }

    #[tokio::test]
    async fn ambiguous_substring_is_rejected() {
        let (dir, tool, _t) = setup();
        std::fs::write(dir.path().join("f.rs"), "dup\ndup\n").unwrap();
        let out = tool
            .execute(&call(json!({
                "path": "f.rs", "old_str": "dup", "new_str": "x"
            })))
            .await;
        assert!(out.is_error);
        assert_eq!(out.error_kind, Some(ToolErrorKind::SubstringNotUnique));
        assert!(out.content.contains("2 times"));
    }

    #[tokio::test]
    async fn edit_is_recorded_and_rolls_back() {
        let (dir, tool, tracker) = setup();
        std::fs::write(dir.path().join("f.rs"), "let a = 1;").unwrap();
        tool.execute(&call(json!({
            "path": "f.rs", "old_str": "a = 1", "new_str": "a = 2"
        })))
        .await;
        let rev = tracker.lock().unwrap().commit("edit").unwrap();
        tracker.lock().unwrap().rollback(&rev).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.rs")).unwrap(),
            "let a = 1;"
        );
    }

    #[tokio::test]
    async fn old_string_alias_accepted() {
        let (dir, tool, _t) = setup();
        std::fs::write(dir.path().join("f.rs"), "alpha").unwrap();
        let out = tool
            .execute(&call(json!({
                "path": "f.rs", "old_string": "alpha", "new_string": "beta"
            })))
            .await;
        assert!(!out.is_error);
    }
}
