// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
#[cfg(unix)]
use libc;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::guard::{git_write_subcommand, looks_like_source_code, unsafe_shell_pattern};
use crate::policy::{ApprovalPolicy, ToolPolicy};
use crate::tool::{OutputCategory, Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};
use crate::workspace::Workspace;

/// Hard byte ceiling for combined stdout + stderr returned to the model.
const OUTPUT_LIMIT_BYTES: usize = 20_000;

/// Lines kept from the head of oversized output.
const HEAD_LINES: usize = 100;

/// Lines kept from the tail of oversized output.  Errors and summaries land
/// at the end of build/test output, so the tail matters at least as much as
/// the head.
const TAIL_LINES: usize = 100;

/// Built-in tool that runs a shell command inside the workspace.
pub struct ShellCommandTool {
    pub workspace: Workspace,
    pub timeout_secs: u64,
    pub policy: ToolPolicy,
}

#[async_trait]
impl Tool for ShellCommandTool {
    fn name(&self) -> &str {
        "shell_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr.\n\
         'command' is required and can be any bash one-liner.\n\
         Output is capped at ~20 KB; when larger, the first 100 and last 100 lines\n\
         are preserved with an omission marker in the middle.\n\
         Git write operations (commit, push, add, ...) are NOT allowed here —\n\
         use the git tool, which carries an approval step.\n\
         Prefer non-interactive commands; avoid anything that needs a TTY.\n\
         For large outputs (builds, test runs), pipe through `tail -200` to keep\n\
         only what matters."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The complete bash one-liner to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory relative to the workspace root (optional)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Execution
    }
    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }
    fn estimated_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.min(10))
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let command = match call.str_arg(&["command", "cmd", "shell_command"]) {
            Some(c) => c,
            None => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::InvalidArgs,
                    "missing required parameter 'command'",
                )
            }
        };

        // ── Guards, in order of specificity ──────────────────────────────────
        if looks_like_source_code(&command) {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::UnsafeCommand,
                "this looks like source code, not a shell command. \
                 Use write_file or edit_file to put code into files, then run them.",
            );
        }
        if let Some(sub) = git_write_subcommand(&command) {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::GitWriteThroughShell,
                format!(
                    "git write operations require the git tool: \
                     call git with operation=\"{sub}\" instead of shell_command"
                ),
            );
        }
        if let Some(pattern) = unsafe_shell_pattern(&command) {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::UnsafeCommand,
                format!("refusing unsafe command (matched \"{pattern}\")"),
            );
        }
        if self.policy.decide(&command) == ApprovalPolicy::Deny {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::UnsafeCommand,
                "command denied by configured deny patterns",
            );
        }

        let workdir = match call.str_arg(&["workdir"]) {
            Some(w) => match self.workspace.resolve(&w) {
                Ok(p) => p,
                Err(kind) => {
                    return ToolOutput::err_kind(
                        &call.id,
                        kind,
                        format!("workdir '{w}' is outside the workspace"),
                    )
                }
            },
            None => self.workspace.root().to_path_buf(),
        };
        let timeout = call.u64_arg(&["timeout_secs"]).unwrap_or(self.timeout_secs);

        debug!(cmd = %command, "executing shell_command");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&command);
        cmd.current_dir(&workdir);
        // Isolate the subprocess from the controlling terminal: stdin from
        // /dev/null defeats isatty probes, kill_on_drop reaps timed-out
        // children, and setsid() detaches the child so it cannot open
        // /dev/tty behind our back.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(timeout), cmd.output()).await;

        match result {
            Ok(Ok(output)) => {
                let mut content = String::new();
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                if !stdout.is_empty() {
                    content.push_str(&head_tail_truncate(&stdout));
                }
                if !stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str("[stderr]\n");
                    content.push_str(&head_tail_truncate(&stderr));
                }
                if content.is_empty() {
                    content = format!("[exit {}]", output.status.code().unwrap_or(-1));
                }

                let code = output.status.code().unwrap_or(-1);
                if code == 0 {
                    ToolOutput::ok(&call.id, content)
                } else if code == 1 {
                    // Exit code 1 is the Unix convention for "no matches"
                    // (grep/rg) and "condition false" (test) — not a hard
                    // failure.  Include the code for transparency.
                    ToolOutput::ok(&call.id, format!("[exit 1]\n{content}"))
                } else {
                    ToolOutput::err_kind(
                        &call.id,
                        ToolErrorKind::ExecFailed,
                        format!("[exit {code}]\n{content}"),
                    )
                }
            }
            Ok(Err(e)) => {
                ToolOutput::err_kind(&call.id, ToolErrorKind::ExecFailed, format!("spawn error: {e}"))
            }
            Err(_) => ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::ExecFailed,
                format!("timeout after {timeout}s"),
            ),
        }
    }
}

/// Truncate `s` to fit within `OUTPUT_LIMIT_BYTES`, keeping the first
/// `HEAD_LINES` and last `TAIL_LINES` with an omission marker between them.
pub(crate) fn head_tail_truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }

    let lines: Vec<&str> = s.lines().collect();
    let total = lines.len();

    if total <= HEAD_LINES + TAIL_LINES {
        // Byte budget exceeded by very long lines; fall back to a byte-level
        // head + tail split (aligned to char boundaries).
        let mut head_end = (OUTPUT_LIMIT_BYTES / 2).min(s.len());
        while !s.is_char_boundary(head_end) {
            head_end -= 1;
        }
        let mut tail_start = s.len().saturating_sub(OUTPUT_LIMIT_BYTES / 2);
        while !s.is_char_boundary(tail_start) {
            tail_start += 1;
        }
        let head_str = &s[..head_end];
        let tail_str = &s[tail_start..];
        let omitted = s.len() - head_str.len() - tail_str.len();
        return format!("{head_str}\n...[{omitted} bytes omitted]...\n{tail_str}");
    }

    let head = lines[..HEAD_LINES].join("\n");
    let tail = lines[total - TAIL_LINES..].join("\n");
    let omitted_lines = total - HEAD_LINES - TAIL_LINES;
    let omitted_bytes = s.len().saturating_sub(head.len() + tail.len());

    format!("{head}\n...[{omitted_lines} lines / ~{omitted_bytes} bytes omitted]...\n{tail}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
