// SPDX-License-Identifier: Apache-2.0
//! Sub-agent spawner: run child agents (singly or in parallel) with their
//! own tool registry, a token budget, and structured result collection.
//!
//! Children run in-process with the same contract a child process would
//! have: a prefixed output stream, a `SUBAGENT_METRICS:` line, and the
//! `SUBAGENT_SECURITY_ERROR` / `SUBAGENT_TOKEN_BUDGET_EXCEEDED` /
//! `SUBAGENT_FAILED` return prefixes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use regex::Regex;
use tracing::{debug, warn};

use ledit_config::{AgentConfig, Config, EnvFlags, ProviderProfile};
use ledit_model::{Message, MessageSender, ModelProvider};
use ledit_tools::ToolRegistry;

use crate::handler::ConversationHandler;
use crate::metrics::SessionMetrics;
use crate::output::AsyncOutputBuffer;
use crate::prune::ConversationPruner;
use crate::session::{Session, TaskAction};

/// Hard cap on the enhanced prompt handed to a child.
pub const MAX_SUBAGENT_CONTEXT_SIZE: usize = 1024 * 1024;

/// Hard cap on total child output returned to the parent.
pub const MAX_SUBAGENT_OUTPUT_SIZE: usize = 10 * 1024 * 1024;

/// Concurrency bound for `run_parallel_subagents`.
pub const MAX_PARALLEL_SUBAGENTS: usize = 5;

/// How many recent parent actions a child sees.
const RECENT_ACTIONS_IN_PROMPT: usize = 10;

/// Commands reported in the structured summary.
const MAX_REPORTED_COMMANDS: usize = 10;

#[derive(Debug, Clone)]
pub struct SubagentRequest {
    pub task_id: String,
    pub prompt: String,
    pub context: Option<String>,
    pub files: Vec<String>,
    pub auto_files: bool,
    pub persona: Option<String>,
}

impl SubagentRequest {
    pub fn new(task_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            prompt: prompt.into(),
            context: None,
            files: Vec::new(),
            auto_files: true,
            persona: None,
        }
    }
}

/// Token metrics parsed from the child's `SUBAGENT_METRICS:` line.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SubagentMetricsLine {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_cost: f64,
    pub cached_tokens: u64,
}

/// Structured summary extracted from child output.
#[derive(Debug, Clone, Default)]
pub struct SubagentSummary {
    pub files_changed: Vec<String>,
    pub build_status: Option<String>,
    pub tests_passed: Option<u32>,
    pub tests_failed: Option<u32>,
    pub errors: Vec<String>,
    /// First 10 commands only.
    pub commands_executed: Vec<String>,
    pub metrics: Option<SubagentMetricsLine>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubagentError {
    #[error("SUBAGENT_SECURITY_ERROR: {message}")]
    Security {
        message: String,
        /// Set when this process is itself a sub-agent (LEDIT_FROM_AGENT=1):
        /// the caller must halt rather than retry.
        non_retryable: bool,
    },
    #[error("SUBAGENT_TOKEN_BUDGET_EXCEEDED: used {used} of {budget} tokens. Do not automatically retry this task.")]
    BudgetExceeded {
        used: u64,
        budget: u64,
        partial_output: String,
    },
    #[error("sub-agent context too large: {0} bytes (limit {MAX_SUBAGENT_CONTEXT_SIZE})")]
    ContextTooLarge(usize),
    #[error("sub-agent cancelled by user interrupt")]
    Interrupted,
    #[error("SUBAGENT_FAILED: {0}")]
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SubagentOutcome {
    pub task_id: String,
    pub output: String,
    pub summary: SubagentSummary,
}

/// Everything needed to construct child agents.  Factories keep this crate
/// free of concrete provider knowledge and make the spawner testable with
/// scripted mocks.
pub struct SubagentSpawner {
    pub config: Arc<Config>,
    pub flags: EnvFlags,
    /// (provider tag, model) → provider instance.
    pub provider_factory:
        Arc<dyn Fn(&str, &str) -> anyhow::Result<Arc<dyn ModelProvider>> + Send + Sync>,
    /// Child tool registry builder (sub-agent tools excluded to limit nesting).
    pub registry_factory: Arc<dyn Fn() -> ToolRegistry + Send + Sync>,
    pub workspace_root: std::path::PathBuf,
    /// Parent metrics; child usage is absorbed here.
    pub metrics: Arc<Mutex<SessionMetrics>>,
    /// Parent action trail shared with the facade.
    pub shared_actions: Arc<Mutex<Vec<TaskAction>>>,
    /// User-visible output (child lines are prefixed per task).
    pub output: Option<AsyncOutputBuffer>,
    /// Checked before spawning; set by the Ctrl-C handler.
    pub interrupt: Option<Arc<std::sync::atomic::AtomicBool>>,
}

impl SubagentSpawner {
    /// Run one child agent to completion.
    pub async fn run_subagent(
        &self,
        req: SubagentRequest,
    ) -> Result<SubagentOutcome, SubagentError> {
        if let Some(flag) = &self.interrupt {
            if flag.load(std::sync::atomic::Ordering::Relaxed) {
                return Err(SubagentError::Interrupted);
            }
        }
        let (provider_tag, model, persona_prompt) = self.resolve_persona(req.persona.as_deref());
        let provider = (self.provider_factory)(&provider_tag, &model)
            .map_err(|e| SubagentError::Failed(format!("provider setup: {e:#}")))?;

        let enhanced = self.build_enhanced_prompt(&req);
        if enhanced.len() > MAX_SUBAGENT_CONTEXT_SIZE {
            return Err(SubagentError::ContextTooLarge(enhanced.len()));
        }

        let profile = ProviderProfile::for_provider(&provider_tag, &model);
        let child_metrics = Arc::new(Mutex::new(SessionMetrics::default()));
        let registry = Arc::new((self.registry_factory)());
        let sender = Arc::new(MessageSender::new(provider, self.config.model.stream));

        let mut handler = ConversationHandler::new(
            sender,
            None,
            registry,
            ConversationPruner::new(self.config.pruning.clone()),
            profile,
            Arc::new(self.config.agent.clone()),
            child_metrics.clone(),
        );

        // Stream child activity to the user, prefixed with the task id.
        let (event_tx, mut event_rx) = tokio::sync::mpsc::channel(64);
        handler.set_events(event_tx);
        let forwarder = self.output.clone().map(|out| {
            let task_id = req.task_id.clone();
            tokio::spawn(async move {
                use crate::events::AgentEvent;
                while let Some(event) = event_rx.recv().await {
                    let line = match event {
                        AgentEvent::TextComplete(t) => t,
                        AgentEvent::ToolCallFinished {
                            tool_name, is_error, ..
                        } => format!("{tool_name} {}", if is_error { "failed" } else { "ok" }),
                        _ => continue,
                    };
                    for l in line.lines() {
                        out.print_line(format!("[{task_id}] Subagent: {l}")).await;
                    }
                }
            })
        });

        let system = persona_prompt.unwrap_or_else(|| {
            "You are a focused sub-agent completing one delegated task. Work \
             autonomously with the available tools and emit [[TASK_COMPLETE]] \
             when finished."
                .to_string()
        });

        let mut session = Session::new();
        session.push(Message::user(enhanced));
        debug!(task = %req.task_id, provider = %provider_tag, "spawning sub-agent");

        let run_result = handler.run(&mut session, &system).await;
        drop(handler); // closes the event channel so the forwarder ends
        if let Some(f) = forwarder {
            let _ = f.await;
        }

        let child = child_metrics.lock().expect("metrics mutex poisoned").clone();
        self.metrics
            .lock()
            .expect("metrics mutex poisoned")
            .absorb(&child);

        let mut output = match run_result {
            Ok(report) => report.final_text,
            Err(e) => {
                let msg = format!("{e:#}");
                if is_security_text(&msg) {
                    return Err(SubagentError::Security {
                        message: msg,
                        non_retryable: self.flags.from_agent,
                    });
                }
                return Err(SubagentError::Failed(msg));
            }
        };

        if output.len() > MAX_SUBAGENT_OUTPUT_SIZE {
            let mut cut = MAX_SUBAGENT_OUTPUT_SIZE;
            while !output.is_char_boundary(cut) {
                cut -= 1;
            }
            output.truncate(cut);
            output.push_str("\n[output truncated at 10 MiB]");
        }

        if is_security_text(&output) && output.contains("SUBAGENT_SECURITY_ERROR") {
            return Err(SubagentError::Security {
                message: output,
                non_retryable: self.flags.from_agent,
            });
        }

        // The in-process child reports its metrics the same way a child
        // process would: one machine-readable line at the end of its output.
        output.push_str(&format!(
            "\nSUBAGENT_METRICS: total_tokens={} prompt_tokens={} completion_tokens={} total_cost={:.6} cached_tokens={}",
            child.total_tokens,
            child.prompt_tokens,
            child.completion_tokens,
            child.total_cost,
            child.cached_tokens
        ));

        let budget = self.config.agent.subagent_token_budget;
        if budget > 0 && child.total_tokens > budget {
            return Err(SubagentError::BudgetExceeded {
                used: child.total_tokens,
                budget,
                partial_output: output,
            });
        }

        let summary = parse_subagent_output(&output);
        Ok(SubagentOutcome {
            task_id: req.task_id,
            output,
            summary,
        })
    }

    /// Run several children with bounded concurrency, aggregating results by
    /// task id.  Any security error bubbles up as one aggregated security
    /// error so callers cannot retry-loop around it.
    pub async fn run_parallel_subagents(
        &self,
        tasks: Vec<SubagentRequest>,
    ) -> Result<HashMap<String, Result<SubagentOutcome, String>>, SubagentError> {
        let outcomes: Vec<(String, Result<SubagentOutcome, SubagentError>)> =
            stream::iter(tasks.into_iter().map(|req| {
                let task_id = req.task_id.clone();
                async move { (task_id, self.run_subagent(req).await) }
            }))
            .buffer_unordered(MAX_PARALLEL_SUBAGENTS)
            .collect()
            .await;

        let mut security: Option<SubagentError> = None;
        let mut map = HashMap::new();
        for (task_id, result) in outcomes {
            match result {
                Ok(outcome) => {
                    map.insert(task_id, Ok(outcome));
                }
                Err(e @ SubagentError::Security { .. }) => {
                    warn!(task = %task_id, "sub-agent security error");
                    if security.is_none() {
                        security = Some(SubagentError::Security {
                            message: format!("task {task_id}: {e}"),
                            non_retryable: self.flags.from_agent,
                        });
                    }
                    map.insert(task_id, Err(e.to_string()));
                }
                Err(e) => {
                    map.insert(task_id, Err(e.to_string()));
                }
            }
        }
        if let Some(err) = security {
            return Err(err);
        }
        Ok(map)
    }

    /// Resolve (provider, model, system prompt) for a persona, falling back
    /// to the configured sub-agent defaults, then the main model.
    fn resolve_persona(&self, persona: Option<&str>) -> (String, String, Option<String>) {
        if let Some(name) = persona {
            if let Some(p) = self.config.personas.get(name) {
                let prompt = p
                    .system_prompt_path
                    .as_deref()
                    .and_then(|path| std::fs::read_to_string(path).ok())
                    .map(|text| ledit_tools::builtin::skills::parse_front_matter(&text).1.to_string());
                return (p.provider.clone(), p.model.clone(), prompt);
            }
            warn!(persona = name, "unknown persona; using sub-agent defaults");
        }
        let provider = self
            .config
            .agent
            .subagent_provider
            .clone()
            .unwrap_or_else(|| self.config.model.provider.clone());
        let model = self
            .config
            .agent
            .subagent_model
            .clone()
            .unwrap_or_else(|| self.config.model.name.clone());
        (provider, model, None)
    }

    /// Assemble the child prompt: prior context, recent parent work, relevant
    /// file contents, then the task itself.
    fn build_enhanced_prompt(&self, req: &SubagentRequest) -> String {
        let mut prompt = String::new();

        if let Some(ctx) = &req.context {
            prompt.push_str("## Previous Work Context\n");
            prompt.push_str(ctx);
            prompt.push_str("\n\n");
        }

        {
            let actions = self.shared_actions.lock().expect("actions mutex poisoned");
            if !actions.is_empty() {
                prompt.push_str("## Recent Work\n");
                let start = actions.len().saturating_sub(RECENT_ACTIONS_IN_PROMPT);
                for a in &actions[start..] {
                    prompt.push_str(&format!("- {}: {}\n", a.kind, a.description));
                }
                prompt.push('\n');
            }
        }

        let mut files = req.files.clone();
        if req.auto_files {
            for f in extract_file_paths(&req.prompt) {
                if !files.contains(&f) {
                    files.push(f);
                }
            }
        }
        let readable: Vec<(String, String)> = files
            .iter()
            .filter_map(|f| {
                let path = self.workspace_root.join(f);
                // Containment: never leak files from outside the workspace.
                if !path.starts_with(&self.workspace_root) {
                    return None;
                }
                std::fs::read_to_string(&path).ok().map(|c| (f.clone(), c))
            })
            .collect();
        if !readable.is_empty() {
            prompt.push_str("## Relevant Files\n");
            for (name, content) in readable {
                prompt.push_str(&format!("### {name}\n```\n{content}\n```\n"));
            }
            prompt.push('\n');
        }

        prompt.push_str("## Task\n");
        prompt.push_str(&req.prompt);
        prompt
    }
}

/// Likely file paths mentioned in free text.
pub fn extract_file_paths(text: &str) -> Vec<String> {
    let re = Regex::new(r"[A-Za-z0-9_./-]+\.[A-Za-z0-9]{1,5}").unwrap();
    let mut out = Vec::new();
    for m in re.find_iter(text) {
        let s = m.as_str().trim_start_matches("./").to_string();
        // Skip bare version numbers and URL fragments caught by the loose
        // pattern (the scheme's colon is outside the match, so URLs surface
        // as a leading "//").
        if s.contains("//") || s.chars().all(|c| c.is_ascii_digit() || c == '.') {
            continue;
        }
        if !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

fn is_security_text(text: &str) -> bool {
    text.contains("outside working directory")
        || text.contains("outside the workspace")
        || text.contains("ErrOutsideWorkingDirectory")
        || text.contains("SUBAGENT_SECURITY_ERROR")
        || text.to_lowercase().contains("security violation")
}

/// Parse a child's stdout into a structured summary.
pub fn parse_subagent_output(output: &str) -> SubagentSummary {
    let mut summary = SubagentSummary::default();

    let metrics_re = Regex::new(
        r"SUBAGENT_METRICS: total_tokens=(\d+) prompt_tokens=(\d+) completion_tokens=(\d+) total_cost=([0-9.]+) cached_tokens=(\d+)",
    )
    .unwrap();
    if let Some(c) = metrics_re.captures(output) {
        summary.metrics = Some(SubagentMetricsLine {
            total_tokens: c[1].parse().unwrap_or(0),
            prompt_tokens: c[2].parse().unwrap_or(0),
            completion_tokens: c[3].parse().unwrap_or(0),
            total_cost: c[4].parse().unwrap_or(0.0),
            cached_tokens: c[5].parse().unwrap_or(0),
        });
    }

    let changed_re = Regex::new(r"(?m)^\s*(?:modified|created|wrote|edited):?\s+(\S+)").unwrap();
    for c in changed_re.captures_iter(output) {
        let f = c[1].trim_end_matches(['.', ',']).to_string();
        if !summary.files_changed.contains(&f) {
            summary.files_changed.push(f);
        }
    }

    let lower = output.to_lowercase();
    if lower.contains("build succeeded") || lower.contains("build passed") {
        summary.build_status = Some("succeeded".into());
    } else if lower.contains("build failed") {
        summary.build_status = Some("failed".into());
    }

    if let Some(c) = Regex::new(r"(\d+) (?:tests? )?passed").unwrap().captures(&lower) {
        summary.tests_passed = c[1].parse().ok();
    }
    if let Some(c) = Regex::new(r"(\d+) (?:tests? )?failed").unwrap().captures(&lower) {
        summary.tests_failed = c[1].parse().ok();
    }

    for line in output.lines() {
        let t = line.trim();
        if let Some(cmd) = t.strip_prefix("$ ") {
            if summary.commands_executed.len() < MAX_REPORTED_COMMANDS {
                summary.commands_executed.push(cmd.to_string());
            }
        }
        if t.to_lowercase().starts_with("error") {
            summary.errors.push(t.to_string());
        }
    }

    summary
}

// ─── Tool surface ─────────────────────────────────────────────────────────────

use async_trait::async_trait;
use serde_json::{json, Value};

use ledit_tools::{Tool, ToolCall, ToolCategory, ToolErrorKind, ToolOutput};

fn spawn_error_output(call_id: &str, err: SubagentError) -> ToolOutput {
    match &err {
        SubagentError::Security { .. } => {
            ToolOutput::err_kind(call_id, ToolErrorKind::UnsafeCommand, err.to_string())
        }
        SubagentError::BudgetExceeded { partial_output, .. } => {
            // Budget failures return the partial output with explicit
            // guidance; the caller must not auto-retry.
            let mut out =
                ToolOutput::err_kind(call_id, ToolErrorKind::ExecFailed, err.to_string());
            out.content = format!("{err}\n\nPartial output:\n{partial_output}");
            out
        }
        _ => ToolOutput::err_kind(call_id, ToolErrorKind::ExecFailed, err.to_string()),
    }
}

/// `run_subagent`: delegate one focused task to a child agent.
pub struct RunSubagentTool {
    pub spawner: Arc<SubagentSpawner>,
}

#[async_trait]
impl Tool for RunSubagentTool {
    fn name(&self) -> &str {
        "run_subagent"
    }

    fn description(&self) -> &str {
        "Spawn a child agent to complete a focused task and return its output\n\
         and summary.  'prompt' is required.  Optional: context (text carried\n\
         into the child), files (paths to include), auto_files (default true:\n\
         also include files mentioned in the prompt), persona (named\n\
         provider/model/prompt bundle from config)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "Task for the child agent" },
                "context": { "type": "string", "description": "Prior context to carry over" },
                "files": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Workspace files to include in the child prompt"
                },
                "auto_files": { "type": "boolean", "description": "Also include files mentioned in the prompt (default true)" },
                "persona": { "type": "string", "description": "Named persona from config" }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Agent
    }
    fn estimated_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(120)
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(prompt) = call.str_arg(&["prompt", "task"]) else {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::InvalidArgs,
                "missing required parameter 'prompt'",
            );
        };
        let mut req = SubagentRequest::new(format!("task-{}", call.id), prompt);
        req.context = call.str_arg(&["context"]);
        req.persona = call.str_arg(&["persona"]);
        req.auto_files = call.bool_arg(&["auto_files"]).unwrap_or(true);
        if let Some(files) = call.args.get("files").and_then(|v| v.as_array()) {
            req.files = files
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
        }

        match self.spawner.run_subagent(req).await {
            Ok(outcome) => ToolOutput::ok(&call.id, outcome.output)
                .with_data(json!({
                    "task_id": outcome.task_id,
                    "files_changed": outcome.summary.files_changed,
                    "build_status": outcome.summary.build_status,
                    "tests_passed": outcome.summary.tests_passed,
                    "tests_failed": outcome.summary.tests_failed,
                })),
            Err(e) => spawn_error_output(&call.id, e),
        }
    }
}

/// `run_parallel_subagents`: several independent tasks at once (≤5 running).
pub struct RunParallelSubagentsTool {
    pub spawner: Arc<SubagentSpawner>,
}

#[async_trait]
impl Tool for RunParallelSubagentsTool {
    fn name(&self) -> &str {
        "run_parallel_subagents"
    }

    fn description(&self) -> &str {
        "Run several independent tasks as parallel child agents (at most 5\n\
         concurrently).  'tasks' is an array of prompt strings or of\n\
         {id, prompt} objects.  Results come back keyed by task id."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "description": "Prompt strings or {id, prompt} objects",
                    "items": {}
                }
            },
            "required": ["tasks"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Agent
    }
    fn estimated_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(300)
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(raw_tasks) = call.args.get("tasks").and_then(|v| v.as_array()) else {
            return ToolOutput::err_kind(
                &call.id,
                ToolErrorKind::InvalidArgs,
                "missing required parameter 'tasks'",
            );
        };
        let mut requests = Vec::with_capacity(raw_tasks.len());
        for (i, t) in raw_tasks.iter().enumerate() {
            let req = match t {
                Value::String(prompt) => SubagentRequest::new(format!("task-{i}"), prompt.clone()),
                Value::Object(obj) => {
                    let Some(prompt) = obj.get("prompt").and_then(|v| v.as_str()) else {
                        return ToolOutput::err_kind(
                            &call.id,
                            ToolErrorKind::InvalidArgs,
                            format!("task #{i} has no 'prompt'"),
                        );
                    };
                    let id = obj
                        .get("id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("task-{i}"));
                    SubagentRequest::new(id, prompt.to_string())
                }
                _ => {
                    return ToolOutput::err_kind(
                        &call.id,
                        ToolErrorKind::InvalidArgs,
                        format!("task #{i} must be a string or an object"),
                    )
                }
            };
            requests.push(req);
        }

        match self.spawner.run_parallel_subagents(requests).await {
            Ok(results) => {
                let mut report = String::new();
                let mut data = serde_json::Map::new();
                let mut ids: Vec<&String> = results.keys().collect();
                ids.sort();
                for id in ids {
                    match &results[id] {
                        Ok(outcome) => {
                            report.push_str(&format!("=== {id} ===\n{}\n", outcome.output));
                            data.insert(id.clone(), json!({ "ok": true }));
                        }
                        Err(e) => {
                            report.push_str(&format!("=== {id} ===\nFAILED: {e}\n"));
                            data.insert(id.clone(), json!({ "ok": false, "error": e }));
                        }
                    }
                }
                ToolOutput::ok(&call.id, report).with_data(Value::Object(data))
            }
            Err(e) => spawn_error_output(&call.id, e),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
