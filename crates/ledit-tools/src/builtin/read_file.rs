// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{OutputCategory, Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};
use crate::workspace::Workspace;

/// Hard byte ceiling on returned content.
const MAX_BYTES: usize = 60_000;

pub struct ReadFileTool {
    pub workspace: Workspace,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a whole file or a line range.\n\
         'path' is required ('file_path' is accepted as an alias).\n\
         Ranges: start_line/end_line (1-indexed, inclusive) or view_range=[s,e].\n\
         Strategy: search_files first to locate the relevant region, then read\n\
         only those lines — avoid pulling whole large files into context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to read, 1-indexed (optional)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to read, inclusive (optional)"
                },
                "view_range": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "description": "[start, end] line range, 1-indexed inclusive (optional)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::FileSystem
    }
    fn output_category(&self) -> OutputCategory {
        OutputCategory::FileContent
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

        // Range from start_line/end_line, or view_range=[s,e].
        let mut start = call.u64_arg(&["start_line"]).map(|n| n as usize);
        let mut end = call.u64_arg(&["end_line"]).map(|n| n as usize);
        if let Some(range) = call.args.get("view_range").and_then(|v| v.as_array()) {
            if range.len() == 2 {
                start = range[0].as_u64().map(|n| n as usize);
                end = range[1].as_u64().map(|n| n as usize);
            }
        }

        debug!(path = %path.display(), ?start, ?end, "read_file");

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

        let content = match (start, end) {
            (None, None) => text,
            (s, e) => {
                let lines: Vec<&str> = text.lines().collect();
                let from = s.unwrap_or(1).saturating_sub(1).min(lines.len());
                let to = e.unwrap_or(lines.len()).min(lines.len());
                if from >= to {
                    return ToolOutput::err_kind(
                        &call.id,
                        ToolErrorKind::InvalidArgs,
                        format!(
                            "empty line range {}..{} (file has {} lines)",
                            s.unwrap_or(1),
                            e.unwrap_or(lines.len()),
                            lines.len()
                        ),
                    );
                }
                lines[from..to].join("\n")
            }
        };

        let content = if content.len() > MAX_BYTES {
            let mut limit = MAX_BYTES;
            while !content.is_char_boundary(limit) {
                limit -= 1;
            }
            let cut = content[..limit]
                .rfind('\n')
                .map(|p| p + 1)
                .unwrap_or(limit);
            format!(
                "{}\n...[{} bytes omitted; use start_line/end_line to read more]",
                &content[..cut],
                content.len() - cut
            )
        } else {
            content
        };

        ToolOutput::ok(&call.id, content)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn setup() -> (tempfile::TempDir, ReadFileTool) {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool {
            workspace: Workspace::new(dir.path()),
        };
        (dir, tool)
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "r".into(),
            name: "read_file".into(),
            args,
        }
    }

    #[tokio::test]
    async fn reads_whole_file() {
        let (dir, tool) = setup();
        std::fs::write(dir.path().join("f.txt"), "line1\nline2\nline3").unwrap();
        let out = tool.execute(&call(json!({"path": "f.txt"}))).await;
        assert!(!out.is_error);
        assert_eq!(out.content, "line1\nline2\nline3");
    }

    #[tokio::test]
    async fn file_path_alias_works() {
        let (dir, tool) = setup();
        std::fs::write(dir.path().join("f.txt"), "aliased").unwrap();
        let out = tool.execute(&call(json!({"file_path": "f.txt"}))).await;
        assert!(!out.is_error);
        assert_eq!(out.content, "aliased");
    }

    #[tokio::test]
    async fn start_end_lines_select_inclusive_range() {
        let (dir, tool) = setup();
        std::fs::write(dir.path().join("f.txt"), "a\nb\nc\nd\ne").unwrap();
        let out = tool
            .execute(&call(json!({"path": "f.txt", "start_line": 2, "end_line": 4})))
            .await;
        assert_eq!(out.content, "b\nc\nd");
    }

    #[tokio::test]
    async fn view_range_array_works() {
        let (dir, tool) = setup();
        std::fs::write(dir.path().join("f.txt"), "a\nb\nc\nd").unwrap();
        let out = tool
            .execute(&call(json!({"path": "f.txt", "view_range": [1, 2]})))
            .await;
        assert_eq!(out.content, "a\nb");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_dir, tool) = setup();
        let out = tool.execute(&call(json!({"path": "nope.txt"}))).await;
        assert!(out.is_error);
        assert_eq!(out.error_kind, Some(ToolErrorKind::NotFound));
    }

    #[tokio::test]
    async fn escape_is_outside_workspace() {
        let (_dir, tool) = setup();
        let out = tool.execute(&call(json!({"path": "../../etc/passwd"}))).await;
        assert!(out.is_error);
        assert_eq!(out.error_kind, Some(ToolErrorKind::OutsideWorkspace));
    }

    #[tokio::test]
    async fn oversized_file_is_truncated_with_notice() {
        let (dir, tool) = setup();
        let big: String = (0..10_000).map(|i| format!("line {i}\n")).collect();
        std::fs::write(dir.path().join("big.txt"), &big).unwrap();
        let out = tool.execute(&call(json!({"path": "big.txt"}))).await;
        assert!(out.content.len() < big.len());
        assert!(out.content.contains("omitted"));
    }
}
