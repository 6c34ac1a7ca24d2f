// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::builtin::shell_command::head_tail_truncate;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};
use crate::workspace::Workspace;

/// Run the project's build commands and report success or failure.
///
/// The command list comes from the workspace base-context scan (go.mod →
/// `go build ./...`, Cargo.toml → `cargo build`, ...); with no detected
/// commands the tool reports that there is nothing to validate.
pub struct ValidateBuildTool {
    pub workspace: Workspace,
    pub commands: Vec<String>,
    pub timeout_secs: u64,
}

#[async_trait]
impl Tool for ValidateBuildTool {
    fn name(&self) -> &str {
        "validate_build"
    }

    fn description(&self) -> &str {
        "Run the project's build to check that the workspace still compiles.\n\
         Uses the build commands detected for this project; takes no arguments."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Execution
    }
    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }
    fn estimated_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(60)
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        if self.commands.is_empty() {
            return ToolOutput::ok(
                &call.id,
                "no build command detected for this project; nothing to validate",
            );
        }

        let mut report = String::new();
        for command in &self.commands {
            debug!(cmd = %command, "validate_build");
            let mut cmd = Command::new("bash");
            cmd.arg("-c").arg(command);
            cmd.current_dir(self.workspace.root());
            cmd.stdin(Stdio::null());
            cmd.kill_on_drop(true);

            let result = tokio::time::timeout(
                std::time::Duration::from_secs(self.timeout_secs),
                cmd.output(),
            )
            .await;

            match result {
                Ok(Ok(output)) => {
                    let combined = format!(
                        "{}{}",
                        String::from_utf8_lossy(&output.stdout),
                        String::from_utf8_lossy(&output.stderr)
                    );
                    if output.status.success() {
                        report.push_str(&format!("$ {command}\nok\n"));
                    } else {
                        return ToolOutput::err_kind(
                            &call.id,
                            ToolErrorKind::BuildFailed,
                            format!(
                                "{report}$ {command}\nBUILD FAILED [exit {}]\n{}",
                                output.status.code().unwrap_or(-1),
                                head_tail_truncate(&combined)
                            ),
                        );
                    }
                }
                Ok(Err(e)) => {
                    return ToolOutput::err_kind(
                        &call.id,
                        ToolErrorKind::BuildFailed,
                        format!("failed to spawn '{command}': {e}"),
                    )
                }
                Err(_) => {
                    return ToolOutput::err_kind(
                        &call.id,
                        ToolErrorKind::BuildFailed,
                        format!("'{command}' timed out after {}s", self.timeout_secs),
                    )
                }
            }
        }
        ToolOutput::ok(&call.id, format!("{report}build validated"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
