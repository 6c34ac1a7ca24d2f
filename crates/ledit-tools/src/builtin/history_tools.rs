// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use ledit_history::{ChangeStatus, ChangeTracker, HistoryError};

use crate::tool::{Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};

/// Inspect the change history recorded by the tracker.
pub struct ViewHistoryTool {
    pub tracker: Arc<Mutex<ChangeTracker>>,
}

#[async_trait]
impl Tool for ViewHistoryTool {
    fn name(&self) -> &str {
        "view_history"
    }

    fn description(&self) -> &str {
        "List recorded file changes: revision id, file, status, and the\n\
         instruction each revision was made under.  Filter with revision_id\n\
         or file_path."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "revision_id": { "type": "string", "description": "Show one revision (optional)" },
                "file_path": { "type": "string", "description": "Show changes to one file (optional)" }
            },
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::History
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let tracker = match self.tracker.lock() {
            Ok(t) => t,
            Err(_) => {
                return ToolOutput::err_kind(&call.id, ToolErrorKind::IoError, "tracker unavailable")
            }
        };
        let revision = call.str_arg(&["revision_id"]);
        let file = call.str_arg(&["file_path", "path"]);

        let mut lines = Vec::new();
        for record in tracker.history() {
            if let Some(rev) = &revision {
                if &record.revision_id != rev {
                    continue;
                }
            }
            if let Some(f) = &file {
                if record.file_path.to_string_lossy() != f.as_str() {
                    continue;
                }
            }
            let status = match record.status {
                ChangeStatus::Active => "active",
                ChangeStatus::Reverted => "reverted",
            };
            let instruction: String = record.instruction.chars().take(60).collect();
            lines.push(format!(
                "{} {} {} [{}] {}",
                record.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
                record.revision_id,
                record.file_path.display(),
                status,
                instruction
            ));
        }

        if lines.is_empty() {
            return ToolOutput::ok(&call.id, "(no recorded changes)");
        }
        ToolOutput::ok(&call.id, lines.join("\n"))
    }
}

/// Undo a committed revision by id (or the latest revision touching a file).
pub struct RollbackChangesTool {
    pub tracker: Arc<Mutex<ChangeTracker>>,
}

#[async_trait]
impl Tool for RollbackChangesTool {
    fn name(&self) -> &str {
        "rollback_changes"
    }

    fn description(&self) -> &str {
        "Roll back a committed revision: restores the original contents of\n\
         every file in that revision.  Pass revision_id (from view_history)\n\
         or file_path to target the latest revision touching that file.\n\
         Requires confirm=true."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "revision_id": { "type": "string", "description": "Revision to roll back" },
                "file_path": { "type": "string", "description": "Roll back the latest revision touching this file" },
                "confirm": { "type": "boolean", "description": "Must be true" }
            },
            "required": ["confirm"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::History
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        if !call.bool_arg(&["confirm"]).unwrap_or(false) {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::InvalidArgs,
                "rollback requires confirm=true",
            );
        }
        let mut tracker = match self.tracker.lock() {
            Ok(t) => t,
            Err(_) => {
                return ToolOutput::err_kind(&call.id, ToolErrorKind::IoError, "tracker unavailable")
            }
        };

        let revision = match call.str_arg(&["revision_id"]) {
            Some(r) => r,
            None => match call.str_arg(&["file_path", "path"]) {
                // Latest active revision touching the file.
                Some(f) => {
                    let found = tracker
                        .history()
                        .iter()
                        .rev()
                        .find(|r| {
                            r.status == ChangeStatus::Active
                                && r.file_path.to_string_lossy() == f.as_str()
                        })
                        .map(|r| r.revision_id.clone());
                    match found {
                        Some(rev) => rev,
                        None => {
                            return ToolOutput::err_kind(
                                &call.id,
                                ToolErrorKind::NothingToRevert,
                                format!("no active revision touches {f}"),
                            )
                        }
                    }
                }
                None => {
                    return ToolOutput::err_kind(
                        &call.id,
                        ToolErrorKind::InvalidArgs,
                        "pass revision_id or file_path",
                    )
                }
            },
        };

        match tracker.rollback(&revision) {
            Ok(files) => ToolOutput::ok(
                &call.id,
                format!(
                    "rolled back revision {revision}: restored {}",
                    files
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )
            .with_files(files),
            Err(HistoryError::NothingToRevert(rev)) => ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::NothingToRevert,
                format!("nothing to revert for revision {rev}"),
            ),
            Err(e) => ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::IoError,
                format!("rollback failed: {e}"),
            ),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn setup() -> (
        tempfile::TempDir,
        ViewHistoryTool,
        RollbackChangesTool,
        Arc<Mutex<ChangeTracker>>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ChangeTracker::new();
        tracker.enable("history test");
        let tracker = Arc::new(Mutex::new(tracker));
        (
            dir,
            ViewHistoryTool {
                tracker: tracker.clone(),
            },
            RollbackChangesTool {
                tracker: tracker.clone(),
            },
            tracker,
        )
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "h".into(),
            name: name.into(),
            args,
        }
    }

    #[tokio::test]
    async fn empty_history_reads_empty() {
        let (_dir, view, _rb, _t) = setup();
        let out = view.execute(&call("view_history", json!({}))).await;
        assert!(out.content.contains("no recorded changes"));
    }

    #[tokio::test]
    async fn rollback_by_revision_id_restores_file() {
        let (dir, view, rb, tracker) = setup();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "original").unwrap();
        tracker
            .lock()
            .unwrap()
            .track_write(&path, b"changed")
            .unwrap();
        std::fs::write(&path, "changed").unwrap();
        let rev = tracker.lock().unwrap().commit("change it").unwrap();

        let listed = view.execute(&call("view_history", json!({}))).await;
        assert!(listed.content.contains(&rev));
        assert!(listed.content.contains("active"));

        let out = rb
            .execute(&call(
                "rollback_changes",
                json!({"revision_id": rev, "confirm": true}),
            ))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
    }

    #[tokio::test]
    async fn rollback_by_file_path_targets_latest_revision() {
        let (dir, _view, rb, tracker) = setup();
        let path = dir.path().join("g.txt");
        std::fs::write(&path, "v1").unwrap();
        tracker.lock().unwrap().track_write(&path, b"v2").unwrap();
        std::fs::write(&path, "v2").unwrap();
        tracker.lock().unwrap().commit("to v2").unwrap();

        let out = rb
            .execute(&call(
                "rollback_changes",
                json!({"file_path": path.to_string_lossy(), "confirm": true}),
            ))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "v1");
    }

    #[tokio::test]
    async fn second_rollback_is_nothing_to_revert() {
        let (dir, _view, rb, tracker) = setup();
        let path = dir.path().join("h.txt");
        std::fs::write(&path, "a").unwrap();
        tracker.lock().unwrap().track_write(&path, b"b").unwrap();
        std::fs::write(&path, "b").unwrap();
        let rev = tracker.lock().unwrap().commit("x").unwrap();

        rb.execute(&call(
            "rollback_changes",
            json!({"revision_id": rev, "confirm": true}),
        ))
        .await;
        let out = rb
            .execute(&call(
                "rollback_changes",
                json!({"revision_id": rev, "confirm": true}),
            ))
            .await;
        assert!(out.is_error);
        assert_eq!(out.error_kind, Some(ToolErrorKind::NothingToRevert));
    }

    #[tokio::test]
    async fn missing_confirm_is_rejected() {
        let (_dir, _view, rb, _t) = setup();
        let out = rb
            .execute(&call("rollback_changes", json!({"revision_id": "x"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("confirm=true"));
    }
}
