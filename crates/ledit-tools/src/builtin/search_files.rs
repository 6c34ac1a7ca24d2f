// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::policy::glob_to_regex;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};
use crate::workspace::Workspace;

/// Directories never descended into.
const IGNORE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    "dist",
    "build",
    ".cache",
    ".venv",
    "target",
    "out",
    ".next",
];

const DEFAULT_MAX_RESULTS: usize = 100;
const DEFAULT_MAX_BYTES: usize = 20_000;

/// Regex content search over workspace files.
pub struct SearchFilesTool {
    pub workspace: Workspace,
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search file contents with a regex pattern.\n\
         'pattern' is required ('search_pattern' is accepted as an alias).\n\
         Optional: directory (search root, default workspace), file_glob\n\
         (e.g. '*.rs'), case_insensitive, max_results (default 100),\n\
         max_bytes (output cap), excludes (substrings of paths to skip).\n\
         Matches are returned as path:line: text, most relevant first.\n\
         Use this before read_file to locate the right region."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regex to search for" },
                "directory": { "type": "string", "description": "Subdirectory to search (optional)" },
                "file_glob": { "type": "string", "description": "Filename glob filter, e.g. '*.rs'" },
                "case_insensitive": { "type": "boolean" },
                "max_results": { "type": "integer" },
                "max_bytes": { "type": "integer" },
                "excludes": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Path substrings to skip"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Search
    }
    fn output_category(&self) -> OutputCategory {
        OutputCategory::MatchList
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let pattern = match call.str_arg(&["pattern", "search_pattern"]) {
            Some(p) => p,
            None => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::InvalidArgs,
                    "missing required parameter 'pattern'",
                )
            }
        };
        let case_insensitive = call.bool_arg(&["case_insensitive"]).unwrap_or(false);
        let regex = match RegexBuilder::new(&pattern)
            .case_insensitive(case_insensitive)
            .build()
        {
            Ok(r) => r,
            Err(e) => {
                return ToolOutput::err_kind(
                    &call.id,
                    ToolErrorKind::InvalidArgs,
                    format!("invalid regex pattern: {e}"),
                )
            }
        };

        let root = match call.str_arg(&["directory", "dir", "path"]) {
            Some(d) => match self.workspace.resolve(&d) {
                Ok(p) => p,
                Err(kind) => {
                    return ToolOutput::err_kind(
                        &call.id,
                        kind,
                        format!("'{d}' is outside the workspace"),
                    )
                }
            },
            None => self.workspace.root().to_path_buf(),
        };

        let glob = call
            .str_arg(&["file_glob", "glob"])
            .and_then(|g| glob_to_regex(&g));
        let max_results = call.u64_arg(&["max_results"]).unwrap_or(DEFAULT_MAX_RESULTS as u64) as usize;
        let max_bytes = call.u64_arg(&["max_bytes"]).unwrap_or(DEFAULT_MAX_BYTES as u64) as usize;
        let excludes: Vec<String> = call
            .args
            .get("excludes")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        debug!(pattern = %pattern, root = %root.display(), "search_files");

        let mut matches: Vec<String> = Vec::new();
        let mut bytes = 0usize;
        let mut truncated = false;

        'files: for entry in WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !(e.file_type().is_dir() && IGNORE_DIRS.contains(&name.as_ref()))
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let rel = entry
                .path()
                .strip_prefix(self.workspace.root())
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();

            if excludes.iter().any(|ex| rel.contains(ex.as_str())) {
                continue;
            }
            if let Some(g) = &glob {
                let file_name = entry.file_name().to_string_lossy();
                if !g.is_match(&file_name) {
                    continue;
                }
            }
            let Ok(text) = std::fs::read_to_string(entry.path()) else {
                continue; // binary or unreadable
            };
            for (lineno, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    let hit = format!("{rel}:{}: {}", lineno + 1, line.trim_end());
                    bytes += hit.len() + 1;
                    matches.push(hit);
                    if matches.len() >= max_results || bytes >= max_bytes {
                        truncated = true;
                        break 'files;
                    }
                }
            }
        }

        if matches.is_empty() {
            return ToolOutput::ok(&call.id, "(no matches)");
        }
        let mut content = matches.join("\n");
        if truncated {
            content.push_str("\n...[result limit reached; use a more specific pattern]");
        }
        ToolOutput::ok(&call.id, content)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
