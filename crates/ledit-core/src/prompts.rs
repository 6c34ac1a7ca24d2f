// SPDX-License-Identifier: Apache-2.0
//! Prompt text assembly.  All long-form instructions the engine sends live
//! here so the control flow stays readable.

/// Main agent system prompt.
pub fn system_prompt(workspace_summary: &str, custom: Option<&str>) -> String {
    if let Some(custom) = custom {
        return custom.to_string();
    }
    format!(
        "You are ledit, an autonomous coding agent working in a local workspace.\n\
         Use the available tools to read, search, and modify files; run shell\n\
         commands for builds and tests.  Git writes must go through the git tool.\n\
         Work step by step and verify your changes.  When the task is fully\n\
         complete, end your final message with [[TASK_COMPLETE]].\n\n\
         Workspace: {workspace_summary}"
    )
}

/// System prompt for analysis todos: encourage tool use, forbid mutation.
pub const ANALYSIS_SYSTEM: &str = "You are analyzing a codebase. Use search_files and read_file \
     liberally to ground every statement in real code. Do not modify anything. \
     Report findings as lines starting with \"Key finding:\" followed by a short \
     explanation, then finish with [[TASK_COMPLETE]].";

/// Ask for a todo plan as a JSON array.
pub fn planning_prompt(intent: &str, workspace_summary: &str, rollover: &str) -> String {
    let rollover_block = if rollover.is_empty() {
        String::new()
    } else {
        format!("\nContext from earlier work:\n{rollover}")
    };
    format!(
        "Plan the following request as a short list of concrete todos.\n\
         Request: {intent}\n\
         Workspace: {workspace_summary}{rollover_block}\n\n\
         Respond with a JSON array (and nothing after it) of objects:\n\
         [{{\"content\": \"short title\", \"description\": \"what and why\", \
         \"priority\": 1, \"file_path\": \"optional/path.ext\"}}]\n\
         priority 1 is highest. At most 10 items; prefer fewer, larger steps."
    )
}

/// Ask for a targeted documentation/config edit as JSON.
pub fn direct_edit_prompt(todo: &str, workspace_summary: &str) -> String {
    format!(
        "Produce a targeted edit for this task: {todo}\n\
         Workspace: {workspace_summary}\n\
         Respond with a JSON object (and nothing after it):\n\
         {{\"file_path\": \"path\", \"changes\": \"summary of the edit\", \
         \"content\": \"the new or updated text\"}}"
    )
}

/// Ask for shell commands as JSON.
pub fn shell_prompt(todo: &str, workspace_summary: &str) -> String {
    format!(
        "Produce the shell commands for this task: {todo}\n\
         Workspace: {workspace_summary}\n\
         Respond with a JSON object (and nothing after it):\n\
         {{\"commands\": [\"cmd1\", \"cmd2\"], \"explanation\": \"what they do\", \
         \"safety_notes\": \"anything risky\"}}\n\
         Commands must be non-interactive and idempotent where possible."
    )
}

/// Ask for the next batch of todos after a continuation.
pub fn continuation_prompt(completed_summary: &str, workspace_summary: &str) -> String {
    format!(
        "The following todos are complete:\n{completed_summary}\n\
         Workspace: {workspace_summary}\n\
         Plan the next phase as a JSON array of at most 10 todo objects \
         (same shape as before: content, description, priority, file_path). \
         Return an empty array if nothing remains."
    )
}
