// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{OutputCategory, Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};
use crate::workspace::Workspace;

/// Write operations the git tool will perform (with approval).
const WRITE_OPS: &[&str] = &[
    "commit",
    "push",
    "add",
    "rm",
    "mv",
    "reset",
    "rebase",
    "merge",
    "checkout",
    "tag",
    "clean",
    "stash",
    "am",
    "apply",
    "cherry-pick",
    "revert",
    "branch",
];

/// Asked before every git write.  Returns `false` to deny.
/// Non-interactive runs install a constant-true approver.
pub type GitApprover = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub struct GitTool {
    pub workspace: Workspace,
    pub approver: GitApprover,
}

#[async_trait]
impl Tool for GitTool {
    fn name(&self) -> &str {
        "git"
    }

    fn description(&self) -> &str {
        "Perform a git write operation (commit, push, add, reset, ...) with\n\
         user approval.  'operation' names the subcommand; 'args' is the list\n\
         of extra arguments.  Read-only git commands (status, log, diff) can\n\
         go through shell_command directly."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": WRITE_OPS,
                    "description": "Git subcommand to run"
                },
                "args": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Arguments after the subcommand, e.g. [\"-m\", \"message\"]"
                }
            },
            "required": ["operation"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }
    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let operation = match call.str_arg(&["operation", "op"]) {
            Some(o) => o,
            None => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::InvalidArgs,
                    "missing required parameter 'operation'",
                )
            }
        };
        if !WRITE_OPS.contains(&operation.as_str()) {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::InvalidOp,
                format!(
                    "'{operation}' is not a supported git write operation. \
                     Supported: {}",
                    WRITE_OPS.join(", ")
                ),
            );
        }
        let args: Vec<String> = call
            .args
            .get("args")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let cmd_display = format!("git {operation} {}", args.join(" "));
        if !(self.approver)(&cmd_display) {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::UserDenied,
                format!("user denied: {cmd_display}"),
            );
        }

        debug!(cmd = %cmd_display, "git tool");

        let mut cmd = Command::new("git");
        cmd.arg(&operation);
        cmd.args(&args);
        cmd.current_dir(self.workspace.root());
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        match cmd.output().await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let mut content = stdout.trim_end().to_string();
                if !stderr.trim().is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(stderr.trim_end());
                }
                if output.status.success() {
                    if content.is_empty() {
                        content = format!("{cmd_display}: ok");
                    }
                    ToolOutput::ok(&call.id, content)
                } else {
                    ToolOutput::err_kind(
                        &call.id,
                        ToolErrorKind::ExecFailed,
                        format!(
                            "[exit {}]\n{content}",
                            output.status.code().unwrap_or(-1)
                        ),
                    )
                }
            }
            Err(e) => ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::ExecFailed,
                format!("failed to run git: {e}"),
            ),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
