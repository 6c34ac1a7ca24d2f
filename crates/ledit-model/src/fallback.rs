// SPDX-License-Identifier: Apache-2.0
//! Recovery parser for tool calls embedded in assistant text.
//!
//! Some models write their tool invocations into the content stream instead
//! of using the structured tool-call protocol: raw JSON (fenced or not),
//! Hermes-style `<function=...>` XML, `name:`/`arguments:` lines, or an
//! alternative `{"cmd": [...]}` shell shape.  When a response arrives without
//! structured calls but the content looks like one of these, the handler runs
//! it through [`FallbackParser`] and executes whatever can be extracted.

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::types::ToolCallRef;

/// Why a recognized-looking block could not be converted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FallbackError {
    /// `{"cmd": [...]}` whose first element is not a known shell
    #[error("unsupported cmd shape: first element must be sh, bash, or zsh")]
    UnsupportedCmdShape,
}

/// Result of a fallback extraction pass.
#[derive(Debug, Clone)]
pub struct FallbackParse {
    pub calls: Vec<ToolCallRef>,
    /// The content with all extracted tool-call text removed.
    pub cleaned: String,
    /// Non-fatal problems (e.g. a rejected cmd shape).
    pub warnings: Vec<String>,
}

/// Stateful extractor; the counter keeps synthesized ids unique within a
/// conversation.
pub struct FallbackParser {
    known_tools: Vec<String>,
    seq: u64,
}

impl FallbackParser {
    pub fn new(known_tools: Vec<String>) -> Self {
        Self { known_tools, seq: 0 }
    }

    /// Cheap pre-check: only run the full parse when the provider emitted no
    /// structured calls and the content pattern-matches a known format.
    pub fn should_use_fallback(content: &str, had_structured_calls: bool) -> bool {
        if had_structured_calls {
            return false;
        }
        content.contains("tool_calls")
            || content.contains("<function=")
            || content.contains("\"function\"")
            || (content.contains("name:") && content.contains("arguments:"))
            || content.contains("\"cmd\"")
    }

    /// Extract tool calls from `content`.  Formats are tried in order; the
    /// first one that yields calls wins.
    pub fn parse(&mut self, content: &str) -> FallbackParse {
        let mut warnings = Vec::new();

        let extractors: [fn(&mut Self, &str, &mut Vec<String>) -> (Vec<ToolCallRef>, Vec<(usize, usize)>); 5] = [
            Self::extract_tool_calls_json,
            Self::extract_function_objects,
            Self::extract_xml_blocks,
            Self::extract_name_arguments_lines,
            Self::extract_cmd_objects,
        ];

        for extract in extractors {
            let (calls, spans) = extract(self, content, &mut warnings);
            if !calls.is_empty() {
                debug!(count = calls.len(), "fallback parser extracted tool calls");
                let cleaned = remove_spans(content, &spans);
                return FallbackParse { calls, cleaned, warnings };
            }
        }

        FallbackParse {
            calls: Vec::new(),
            cleaned: content.to_string(),
            warnings,
        }
    }

    fn next_id(&mut self) -> String {
        self.seq += 1;
        format!("call_{}", self.seq)
    }

    fn is_known(&self, name: &str) -> bool {
        self.known_tools.iter().any(|t| t == name)
    }

    /// Build a call, synthesizing an id when the block carried none.
    fn make_call(&mut self, id: Option<&str>, name: &str, args: &Value) -> ToolCallRef {
        let id = match id {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => self.next_id(),
        };
        let arguments = match args {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        ToolCallRef::new(id, name, arguments)
    }

    // ── Format 1: JSON object containing a `tool_calls` array ────────────────

    fn extract_tool_calls_json(
        &mut self,
        content: &str,
        _warnings: &mut Vec<String>,
    ) -> (Vec<ToolCallRef>, Vec<(usize, usize)>) {
        let mut calls = Vec::new();
        let mut spans = Vec::new();
        for (start, end) in find_json_object_spans(content) {
            let Ok(value) = serde_json::from_str::<Value>(&content[start..end]) else {
                continue;
            };
            let Some(arr) = value.get("tool_calls").and_then(|v| v.as_array()) else {
                continue;
            };
            for item in arr {
                let (id, name, args) = match item.get("function") {
                    Some(f) => (
                        item.get("id").and_then(|v| v.as_str()),
                        f.get("name").and_then(|v| v.as_str()),
                        f.get("arguments"),
                    ),
                    None => (
                        item.get("id").and_then(|v| v.as_str()),
                        item.get("name").and_then(|v| v.as_str()),
                        item.get("arguments"),
                    ),
                };
                if let Some(name) = name {
                    let args = args.cloned().unwrap_or_else(|| Value::Object(Default::default()));
                    calls.push(self.make_call(id, name, &args));
                }
            }
            spans.push(expand_fence(content, start, end));
        }
        (calls, spans)
    }

    // ── Format 2: bare `{"function": {"name", "arguments"}}` objects ────────

    fn extract_function_objects(
        &mut self,
        content: &str,
        _warnings: &mut Vec<String>,
    ) -> (Vec<ToolCallRef>, Vec<(usize, usize)>) {
        let mut calls = Vec::new();
        let mut spans = Vec::new();
        for (start, end) in find_json_object_spans(content) {
            let Ok(value) = serde_json::from_str::<Value>(&content[start..end]) else {
                continue;
            };
            let (name, args) = match value.get("function") {
                Some(f) => (
                    f.get("name").and_then(|v| v.as_str()),
                    f.get("arguments").cloned(),
                ),
                None => (
                    value.get("name").and_then(|v| v.as_str()),
                    value.get("arguments").cloned(),
                ),
            };
            // Only recognized function names count here; a random JSON object
            // with a "name" key must not become a tool call.
            if let Some(name) = name {
                if self.is_known(name) {
                    let args = args.unwrap_or_else(|| Value::Object(Default::default()));
                    let id = value.get("id").and_then(|v| v.as_str()).map(str::to_string);
                    calls.push(self.make_call(id.as_deref(), name, &args));
                    spans.push(expand_fence(content, start, end));
                }
            }
        }
        (calls, spans)
    }

    // ── Format 3: XML-like `<function=NAME><parameter=KEY>VALUE</parameter>` ─

    fn extract_xml_blocks(
        &mut self,
        content: &str,
        _warnings: &mut Vec<String>,
    ) -> (Vec<ToolCallRef>, Vec<(usize, usize)>) {
        let block_re = Regex::new(r"(?s)<function=([a-zA-Z0-9_]+)>(.*?)</function>").unwrap();
        let param_re = Regex::new(r"(?s)<parameter=([a-zA-Z0-9_]+)>(.*?)</parameter>").unwrap();
        let stray_re = Regex::new(r"</?tool_call>").unwrap();

        let mut calls = Vec::new();
        let mut spans = Vec::new();
        for m in block_re.captures_iter(content) {
            let whole = m.get(0).unwrap();
            let name = m.get(1).unwrap().as_str();
            let body = m.get(2).unwrap().as_str();

            let mut args = serde_json::Map::new();
            for pm in param_re.captures_iter(body) {
                let key = pm.get(1).unwrap().as_str().to_string();
                let raw = pm.get(2).unwrap().as_str();
                args.insert(key, coerce_scalar(raw));
            }
            let args = Value::Object(args);
            calls.push(self.make_call(None, name, &args));
            spans.push((whole.start(), whole.end()));
        }
        if !calls.is_empty() {
            // Stray wrapper tags around (or left over from) the blocks are
            // noise; schedule them for removal too.
            for m in stray_re.find_iter(content) {
                spans.push((m.start(), m.end()));
            }
        }
        (calls, spans)
    }

    // ── Format 4: plain `name: X` / `arguments: {...}` lines ────────────────

    fn extract_name_arguments_lines(
        &mut self,
        content: &str,
        _warnings: &mut Vec<String>,
    ) -> (Vec<ToolCallRef>, Vec<(usize, usize)>) {
        let head_re = Regex::new(r"name:\s*([a-zA-Z0-9_]+)\s*\n?\s*arguments:\s*").unwrap();
        let mut calls = Vec::new();
        let mut spans = Vec::new();
        for m in head_re.captures_iter(content) {
            let whole = m.get(0).unwrap();
            let name = m.get(1).unwrap().as_str();
            if !self.is_known(name) {
                continue;
            }
            let after = &content[whole.end()..];
            let Some((rel_start, rel_end)) = first_json_object_span(after) else {
                continue;
            };
            // The arguments object must start right where the label ends.
            if after[..rel_start].trim() != "" {
                continue;
            }
            let args_text = &after[rel_start..rel_end];
            let Ok(args) = serde_json::from_str::<Value>(args_text) else {
                continue;
            };
            calls.push(self.make_call(None, name, &args));
            spans.push((whole.start(), whole.end() + rel_end));
        }
        (calls, spans)
    }

    // ── Format 5: `{"cmd": ["bash", "-lc", "..."]}` shell shape ──────────────

    fn extract_cmd_objects(
        &mut self,
        content: &str,
        warnings: &mut Vec<String>,
    ) -> (Vec<ToolCallRef>, Vec<(usize, usize)>) {
        let mut calls = Vec::new();
        let mut spans = Vec::new();
        for (start, end) in find_json_object_spans(content) {
            let Ok(value) = serde_json::from_str::<Value>(&content[start..end]) else {
                continue;
            };
            let Some(cmd) = value.get("cmd").and_then(|v| v.as_array()) else {
                continue;
            };
            match convert_cmd_array(cmd) {
                Ok(command) => {
                    let args = serde_json::json!({ "command": command });
                    calls.push(self.make_call(None, "shell_command", &args));
                    spans.push(expand_fence(content, start, end));
                }
                Err(e) => warnings.push(e.to_string()),
            }
        }
        (calls, spans)
    }
}

/// Convert a `cmd` array into a single shell command string.
///
/// `cmd[0]` must be a known shell; leading dash flags (`-c`, `-lc`, …) are
/// skipped and the remaining elements joined with spaces.
pub fn convert_cmd_array(cmd: &[Value]) -> Result<String, FallbackError> {
    let shell = cmd
        .first()
        .and_then(|v| v.as_str())
        .ok_or(FallbackError::UnsupportedCmdShape)?;
    let shell_name = shell.rsplit('/').next().unwrap_or(shell);
    if !matches!(shell_name, "sh" | "bash" | "zsh") {
        return Err(FallbackError::UnsupportedCmdShape);
    }
    let parts: Vec<&str> = cmd[1..]
        .iter()
        .filter_map(|v| v.as_str())
        .skip_while(|s| s.starts_with('-'))
        .collect();
    if parts.is_empty() {
        return Err(FallbackError::UnsupportedCmdShape);
    }
    Ok(parts.join(" "))
}

/// Scalar coercion for XML parameter values: integers stay numbers, booleans
/// stay booleans, everything else is a string.
fn coerce_scalar(raw: &str) -> Value {
    let t = raw.trim();
    if let Ok(n) = t.parse::<i64>() {
        // Leading zeros mean "this is really a string" (e.g. a file mode).
        if !t.starts_with('0') || t == "0" {
            return Value::Number(n.into());
        }
    }
    match t {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(t.to_string()),
    }
}

/// Find the byte spans of all top-level JSON objects in `s` (string-aware
/// brace matching; malformed candidates are simply skipped by callers when
/// serde rejects them).
fn find_json_object_spans(s: &str) -> Vec<(usize, usize)> {
    let bytes = s.as_bytes();
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        spans.push((start, i + 1));
                    }
                }
            }
            _ => {}
        }
    }
    spans
}

/// First JSON object span in `s`, if any.
fn first_json_object_span(s: &str) -> Option<(usize, usize)> {
    find_json_object_spans(s).into_iter().next()
}

/// Grow a span to swallow a directly-surrounding markdown code fence.
fn expand_fence(content: &str, start: usize, end: usize) -> (usize, usize) {
    let before = &content[..start];
    let after = &content[end..];
    let fence_open = Regex::new(r"(?s)```(?:json)?\s*\z").unwrap();
    let fence_close = Regex::new(r"(?s)\A\s*```").unwrap();
    if let (Some(open), Some(close)) = (fence_open.find(before), fence_close.find(after)) {
        (open.start(), end + close.end())
    } else {
        (start, end)
    }
}

/// Remove byte spans from `content`, then tidy whitespace: consecutive blank
/// lines collapse and the edges are trimmed.
fn remove_spans(content: &str, spans: &[(usize, usize)]) -> String {
    let mut sorted: Vec<(usize, usize)> = spans.to_vec();
    sorted.sort();
    sorted.dedup();

    let mut out = String::with_capacity(content.len());
    let mut pos = 0usize;
    for &(start, end) in &sorted {
        if start >= pos {
            out.push_str(&content[pos..start]);
            pos = end;
        } else if end > pos {
            // Overlapping span (e.g. stray tag inside a removed block)
            pos = end;
        }
    }
    out.push_str(&content[pos..]);

    let collapsed = Regex::new(r"\n\s*\n").unwrap().replace_all(&out, "\n");
    collapsed.trim().to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
