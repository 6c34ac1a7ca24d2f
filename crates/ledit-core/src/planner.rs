// SPDX-License-Identifier: Apache-2.0
//! Todo-driven task planning and execution.
//!
//! The planner classifies the user's intent, asks the model for a todo list,
//! routes each todo to an execution path (analysis, direct edit, shell,
//! code edit, continuation), and re-prioritizes the remaining work from what
//! analysis turns out to be true about the codebase.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context as _;
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use ledit_config::{Config, EnvFlags, ProviderProfile};
use ledit_model::{Message, MessageSender, TokenUsage};
use ledit_tools::{
    guard, ToolCall, ToolRegistry, TodoItem, TodoStatus,
};

use crate::base_context::BaseContext;
use crate::context::{PersistentContext, Severity};
use crate::editing::{EditRequest, EditStrategy, OptimizedEditingService};
use crate::handler::ConversationHandler;
use crate::metrics::{SessionMetrics, UsagePhase};
use crate::prompts;
use crate::prune::ConversationPruner;
use crate::session::Session;
use crate::subagent::extract_file_paths;

/// Upper bound on todos per batch; a tenth slot may become a continuation.
const MAX_TODOS: usize = 10;

/// Retry spacing for failed todos.
const RETRY_DELAY: Duration = Duration::from_secs(2);
const MAX_TODO_RETRIES: u32 = 2;

// ─── Intent classification ────────────────────────────────────────────────────

/// Coarse classification of the user's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    Documentation,
    Creation,
    Analysis,
    Question,
    Command,
    CodeUpdate,
}

/// Single-pass rule classification over the lowercased intent.
pub fn classify_intent(intent: &str) -> IntentKind {
    let lower = intent.to_lowercase();
    let lower = lower.trim();

    const DOC_PHRASES: &[&str] = &["document", "generate docs", "api docs", "write docs"];
    const CREATION_PHRASES: &[&str] = &[
        "create new",
        "generate new",
        "build new",
        "setup new",
        "initialize new",
    ];
    const ANALYSIS_WORDS: &[&str] = &[
        "analyze", "analyse", "examine", "review", "inspect", "investigate", "explore",
    ];
    const QUESTION_STARTS: &[&str] = &[
        "what ", "how ", "why ", "when ", "where ", "which ", "who ", "list ",
    ];
    const COMMAND_VERBS: &[&str] = &[
        "run ", "execute ", "start ", "stop ", "build ", "deploy ", "install ", "uninstall ",
    ];

    if DOC_PHRASES.iter().any(|p| lower.contains(p)) {
        return IntentKind::Documentation;
    }
    let is_creation = CREATION_PHRASES.iter().any(|p| lower.contains(p));
    if is_creation {
        return IntentKind::Creation;
    }
    if ANALYSIS_WORDS.iter().any(|w| lower.contains(w)) {
        return IntentKind::Analysis;
    }
    if QUESTION_STARTS.iter().any(|p| lower.starts_with(p))
        || lower.contains("can you explain")
        || lower.contains("could you explain")
    {
        return IntentKind::Question;
    }
    if COMMAND_VERBS.iter().any(|v| lower.starts_with(v)) {
        return IntentKind::Command;
    }
    // "test ..." is a command only when followed by another action verb
    // ("test run the suite"), not for "test the parser handles unicode".
    if let Some(rest) = lower.strip_prefix("test ") {
        const FOLLOWERS: &[&str] = &["run", "build", "deploy", "install", "start", "stop"];
        if FOLLOWERS.iter().any(|f| rest.starts_with(f)) {
            return IntentKind::Command;
        }
    }
    IntentKind::CodeUpdate
}

/// Finer task intent driving editing-strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskIntent {
    Documentation,
    Creation,
    Analysis,
    Refactoring,
    Modification,
}

pub fn classify_task_intent(text: &str) -> TaskIntent {
    let lower = text.to_lowercase();
    if lower.contains("document") || lower.contains("readme") || lower.contains("docs") {
        TaskIntent::Documentation
    } else if lower.contains("create new") || lower.contains("scaffold") || lower.contains("generate new") {
        TaskIntent::Creation
    } else if lower.contains("analyze") || lower.contains("examine") || lower.contains("review") {
        TaskIntent::Analysis
    } else if lower.contains("refactor") || lower.contains("restructure") || lower.contains("migrate")
    {
        TaskIntent::Refactoring
    } else {
        TaskIntent::Modification
    }
}

// ─── Execution-type routing ───────────────────────────────────────────────────

/// How a single todo is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionType {
    Analysis,
    DirectEdit,
    CodeCommand,
    ShellCommand,
    Continuation,
}

/// Filesystem-flavoured keywords that route work to the shell path.
const FILESYSTEM_KEYWORDS: &[&str] = &[
    "create directory",
    "create folder",
    "mkdir",
    "setup project",
    "setup monorepo",
    "initialize",
    "install",
    "create backend",
    "create frontend",
];

fn has_filesystem_keywords(lower: &str) -> bool {
    if FILESYSTEM_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }
    Regex::new(r"directory (for|called|named|in)\b")
        .unwrap()
        .is_match(lower)
}

/// Route a todo to its execution path.
pub fn route_execution(todo: &TodoItem) -> ExecutionType {
    let lower = format!("{} {}", todo.content, todo.description).to_lowercase();

    if lower.contains("continue with next phase")
        || lower.starts_with("continue with")
        || lower.contains("proceed with next")
    {
        return ExecutionType::Continuation;
    }

    const DIRECT_EDIT_PHRASES: &[&str] = &[
        "update readme",
        "update documentation",
        "update docs",
        "fix typo",
        "add comment",
    ];
    if DIRECT_EDIT_PHRASES.iter().any(|p| lower.contains(p))
        || Regex::new(r"(generate|create|write).*\.(md|txt|json|ya?ml)\b")
            .unwrap()
            .is_match(&lower)
    {
        return ExecutionType::DirectEdit;
    }

    if has_filesystem_keywords(&lower) {
        return ExecutionType::ShellCommand;
    }

    const ANALYSIS_WORDS: &[&str] = &[
        "analyze", "examine", "explore", "read", "review", "understand", "investigate",
        "check", "verify", "list", "show", "find", "search", "discover", "identify",
    ];
    if ANALYSIS_WORDS.iter().any(|w| lower.contains(w)) {
        return ExecutionType::Analysis;
    }

    ExecutionType::CodeCommand
}

// ─── Lenient JSON extraction ──────────────────────────────────────────────────

/// Locate a JSON array in model output that may be wrapped in reasoning
/// prose or code fences.  The *last* parseable array wins, since plans are
/// requested at the tail of the response.
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    let bytes = text.as_bytes();
    let mut candidates: Vec<usize> = Vec::new();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'[' {
            candidates.push(i);
        }
    }
    for &start in candidates.iter().rev() {
        if let Some(end) = matching_bracket(text, start) {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&text[start..=end]) {
                // An array of scalars is not a plan.
                if items.iter().all(|v| v.is_object()) {
                    return Some(items);
                }
            }
        }
    }
    None
}

/// Locate a JSON object in model output, last parseable wins.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let mut best = None;
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Ok(v) = serde_json::from_str::<Value>(&text[start..=i]) {
                            best = Some(v);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    best
}

fn matching_bracket(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
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
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ─── Dynamic scoring ──────────────────────────────────────────────────────────

const URGENCY_KEYWORDS: &[&str] = &[
    "fix", "error", "failing", "build", "lint", "security", "vuln", "panic", "crash",
    "broken", "blocking",
];

/// Score one todo against the accumulated context.
pub fn score_todo(
    todo: &TodoItem,
    persistent: &PersistentContext,
    analysis_results: &HashMap<u32, String>,
) -> i64 {
    let base = (100 - 10 * todo.priority as i64).max(0);
    let text = format!("{} {}", todo.content, todo.description).to_lowercase();

    let urgency: i64 = URGENCY_KEYWORDS
        .iter()
        .filter(|k| text.contains(*k))
        .count() as i64
        * 6;

    let mut findings_bonus = 0i64;
    for finding in persistent.recent_findings(10) {
        let file_match = match (&finding.file_path, &todo.file_path) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        let title_match = text.contains(&finding.title.to_lowercase());
        if file_match || title_match {
            findings_bonus += finding.severity.priority_bonus();
        }
    }

    let knowledge_bonus = persistent
        .knowledge
        .iter()
        .filter(|k| {
            todo.file_path
                .as_ref()
                .map(|f| k.related_files.contains(f))
                .unwrap_or(false)
        })
        .count() as i64
        * 3;

    let analysis_bonus = todo
        .file_path
        .as_ref()
        .filter(|f| analysis_results.values().any(|a| a.contains(f.as_str())))
        .map(|_| 4)
        .unwrap_or(0);

    base + urgency + findings_bonus + knowledge_bonus + analysis_bonus
}

// ─── Planner ──────────────────────────────────────────────────────────────────

/// Result of one parallel todo execution.
#[derive(Debug, Clone)]
pub struct ParallelTodoResult {
    pub todo_id: u32,
    pub status: TodoStatus,
    pub output: String,
    pub usage: TokenUsage,
    pub error: Option<String>,
}

/// Outcome of one todo's execution.
#[derive(Debug, Clone, Default)]
struct TodoExecution {
    output: String,
    files_modified: bool,
}

pub struct TodoPlanner {
    pub sender: Arc<MessageSender>,
    pub registry: Arc<ToolRegistry>,
    pub profile: ProviderProfile,
    pub config: Arc<Config>,
    pub flags: EnvFlags,
    pub metrics: Arc<Mutex<SessionMetrics>>,
    pub todos: Arc<AsyncMutex<Vec<TodoItem>>>,
    pub persistent: PersistentContext,
    pub editing: Arc<OptimizedEditingService>,
    pub base: BaseContext,
    /// Full analysis output per todo id, consulted by scoring and refinement.
    pub analysis_results: HashMap<u32, String>,
    next_id: u32,
}

impl TodoPlanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sender: Arc<MessageSender>,
        registry: Arc<ToolRegistry>,
        profile: ProviderProfile,
        config: Arc<Config>,
        flags: EnvFlags,
        metrics: Arc<Mutex<SessionMetrics>>,
        todos: Arc<AsyncMutex<Vec<TodoItem>>>,
        editing: Arc<OptimizedEditingService>,
        base: BaseContext,
    ) -> Self {
        Self {
            sender,
            registry,
            profile,
            config,
            flags,
            metrics,
            todos,
            persistent: PersistentContext::default(),
            editing,
            base,
            analysis_results: HashMap::new(),
            next_id: 0,
        }
    }

    /// Plan and execute todos for `intent`.  Returns a run summary.
    pub async fn run(&mut self, intent: &str, session: &mut Session) -> anyhow::Result<String> {
        let generated = self.generate_todos(intent).await?;
        let count = generated.len();
        *self.todos.lock().await = generated;
        session.record_action("plan", format!("created {count} todos"), intent.to_string());
        info!(todos = count, "plan created");

        let mut completed = 0u32;
        let mut failed = 0u32;

        // Independent batches — analysis todos and documentation edits on
        // disjoint files — run through the worker pool.
        let pending_snapshot: Vec<TodoItem> = self.todos.lock().await.clone();
        if pending_snapshot.len() > 1 && can_parallelize(&pending_snapshot) {
            let results = self.run_parallel_batch(pending_snapshot).await;
            for r in &results {
                match r.status {
                    TodoStatus::Completed => completed += 1,
                    _ => failed += 1,
                }
            }
            return Ok(format!(
                "parallel batch finished: {completed} completed, {failed} failed"
            ));
        }

        while let Some(todo) = self.select_next().await {
            self.set_status(todo.id, TodoStatus::InProgress).await;

            if route_execution(&todo) == ExecutionType::Continuation {
                self.set_status(todo.id, TodoStatus::Completed).await;
                completed += 1;
                if !self.handle_continuation(session).await? {
                    break;
                }
                continue;
            }

            match self.execute_with_retry(&todo, session).await {
                Ok(exec) => {
                    self.set_status(todo.id, TodoStatus::Completed).await;
                    completed += 1;
                    session.record_action(
                        "todo",
                        format!("completed: {}", todo.content),
                        truncate_for_action(&exec.output),
                    );
                }
                Err(e) => {
                    warn!(todo = todo.id, "todo failed: {e:#}");
                    self.set_status(todo.id, TodoStatus::Failed).await;
                    failed += 1;
                    session.record_action(
                        "todo",
                        format!("failed: {}", todo.content),
                        format!("{e:#}"),
                    );
                }
            }
        }

        Ok(format!("{completed} todos completed, {failed} failed"))
    }

    /// Ask the model for a todo plan and parse it leniently.
    pub async fn generate_todos(&mut self, intent: &str) -> anyhow::Result<Vec<TodoItem>> {
        let prompt = prompts::planning_prompt(
            intent,
            &self.base.summary(),
            &self.persistent.rollover_summary(5),
        );
        let outcome = self
            .sender
            .send(&[Message::user(prompt)], &[], None)
            .await
            .context("todo generation failed")?;
        self.track(UsagePhase::Planning, &outcome.usage);

        let items = extract_json_array(&outcome.message.content)
            .context("no JSON todo array found in planning response")?;

        let mut todos: Vec<TodoItem> = items
            .into_iter()
            .filter_map(|item| {
                let content = item.get("content")?.as_str()?.to_string();
                let mut todo = TodoItem::new(0, content, 5);
                if let Some(d) = item.get("description").and_then(|v| v.as_str()) {
                    todo.description = d.to_string();
                }
                if let Some(p) = item.get("priority").and_then(|v| v.as_u64()) {
                    todo.priority = p.clamp(1, 99) as u8;
                }
                if let Some(f) = item.get("file_path").and_then(|v| v.as_str()) {
                    if !f.is_empty() {
                        todo.file_path = Some(f.to_string());
                    }
                }
                Some(todo)
            })
            .collect();

        todos.sort_by_key(|t| t.priority);
        let overflow = todos.len() > MAX_TODOS;
        todos.truncate(MAX_TODOS);
        if overflow {
            // The tenth slot becomes a continuation that plans the rest.
            let last = todos.last_mut().expect("max todos > 0");
            last.content = "Continue with next phase".into();
            last.description = "Generate the next batch of todos for the remaining work".into();
        }
        for todo in &mut todos {
            self.next_id += 1;
            todo.id = self.next_id;
        }
        Ok(todos)
    }

    /// Pick the highest-scoring pending todo; ties break toward the lower
    /// static priority value.  The top candidates are logged for
    /// transparency.
    pub async fn select_next(&self) -> Option<TodoItem> {
        let todos = self.todos.lock().await;
        let mut scored: Vec<(i64, &TodoItem)> = todos
            .iter()
            .filter(|t| t.status == TodoStatus::Pending)
            .map(|t| (score_todo(t, &self.persistent, &self.analysis_results), t))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.priority.cmp(&b.1.priority)));

        for (score, todo) in scored.iter().take(3) {
            debug!(todo = todo.id, score, content = %todo.content, "selection candidate");
        }
        scored.first().map(|(_, t)| (*t).clone())
    }

    async fn set_status(&self, id: u32, status: TodoStatus) {
        let mut todos = self.todos.lock().await;
        if let Some(t) = todos.iter_mut().find(|t| t.id == id) {
            t.status = status;
        }
    }

    /// Execute with the smart-retry policy: a review-revisions failure on a
    /// filesystem-flavoured todo switches to the shell path; anything else
    /// gets up to two spaced retries.
    async fn execute_with_retry(
        &mut self,
        todo: &TodoItem,
        session: &mut Session,
    ) -> anyhow::Result<TodoExecution> {
        let mut attempt = 0u32;
        loop {
            let result = self.execute_todo(todo, session).await;
            match result {
                Ok(exec) => return Ok(exec),
                Err(e) => {
                    let msg = format!("{e:#}");
                    let lower_todo =
                        format!("{} {}", todo.content, todo.description).to_lowercase();
                    if msg.contains("code review requires revisions")
                        && has_filesystem_keywords(&lower_todo)
                    {
                        debug!(todo = todo.id, "review rejected a code edit; retrying via shell path");
                        return self.execute_shell(todo).await;
                    }
                    if msg.contains("SUBAGENT_TOKEN_BUDGET_EXCEEDED")
                        || msg.contains("SUBAGENT_SECURITY_ERROR")
                    {
                        return Err(e); // never auto-retry these
                    }
                    if attempt >= MAX_TODO_RETRIES {
                        return Err(e);
                    }
                    attempt += 1;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    async fn execute_todo(
        &mut self,
        todo: &TodoItem,
        session: &mut Session,
    ) -> anyhow::Result<TodoExecution> {
        match route_execution(todo) {
            ExecutionType::Analysis => self.execute_analysis(todo).await,
            ExecutionType::DirectEdit => self.execute_direct_edit(todo).await,
            ExecutionType::ShellCommand => self.execute_shell(todo).await,
            ExecutionType::CodeCommand => self.execute_code(todo).await,
            ExecutionType::Continuation => {
                // handled by the run loop; reaching here means a nested
                // continuation, which is a no-op
                let _ = session;
                Ok(TodoExecution::default())
            }
        }
    }

    /// Analysis path: a tool-driven conversation whose output feeds the
    /// persistent context and refines the remaining todos.
    async fn execute_analysis(&mut self, todo: &TodoItem) -> anyhow::Result<TodoExecution> {
        let mut handler = ConversationHandler::new(
            self.sender.clone(),
            None,
            self.registry.clone(),
            ConversationPruner::new(self.config.pruning.clone()),
            self.profile.clone(),
            Arc::new(self.config.agent.clone()),
            self.metrics.clone(),
        );
        handler.set_phase(UsagePhase::Progress);

        let mut analysis_session = Session::new();
        analysis_session.push(Message::user(format!(
            "{}\n{}\nWorkspace: {}",
            todo.content,
            todo.description,
            self.base.summary()
        )));
        let report = handler
            .run(&mut analysis_session, prompts::ANALYSIS_SYSTEM)
            .await?;

        self.analysis_results.insert(todo.id, report.final_text.clone());
        self.extract_findings(todo, &report.final_text);
        self.refine_remaining_todos(&report.final_text).await;

        Ok(TodoExecution {
            output: report.final_text,
            files_modified: false,
        })
    }

    /// Pull structured findings out of analysis text.
    fn extract_findings(&mut self, todo: &TodoItem, analysis: &str) {
        for line in analysis.lines() {
            let t = line.trim();
            let body = t
                .strip_prefix("Key finding:")
                .or_else(|| t.strip_prefix("- "))
                .or_else(|| t.strip_prefix("* "));
            let Some(body) = body else { continue };
            let body = body.trim();
            if body.len() < 8 {
                continue;
            }
            let lower = body.to_lowercase();
            let severity = if lower.contains("panic") || lower.contains("crash") || lower.contains("critical") {
                Severity::Critical
            } else if lower.contains("error") || lower.contains("security") || lower.contains("vuln") {
                Severity::High
            } else if lower.contains("warning") || lower.contains("should") {
                Severity::Medium
            } else {
                Severity::Low
            };
            let file = extract_file_paths(body).into_iter().next();
            self.persistent.add_finding(
                "analysis",
                severity,
                body.chars().take(80).collect::<String>(),
                body,
                file,
                Some(todo.id),
            );
        }
    }

    /// Attach files discovered by analysis to pending todos that lack one,
    /// and synthesize a follow-up apply todo when the analysis recommends
    /// changes but nothing pending would make them.
    pub async fn refine_remaining_todos(&mut self, analysis: &str) {
        let discovered = extract_file_paths(analysis);
        let mut todos = self.todos.lock().await;

        for todo in todos.iter_mut().filter(|t| t.status == TodoStatus::Pending) {
            if todo.file_path.is_some() {
                continue;
            }
            let content_lower = todo.content.to_lowercase();
            for file in &discovered {
                let stem = file
                    .rsplit('/')
                    .next()
                    .and_then(|f| f.split('.').next())
                    .unwrap_or_default()
                    .to_lowercase();
                if !stem.is_empty() && content_lower.contains(&stem) {
                    debug!(todo = todo.id, file = %file, "attached file discovered by analysis");
                    todo.file_path = Some(file.clone());
                    break;
                }
            }
        }

        let lower = analysis.to_lowercase();
        let recommends_changes =
            lower.contains("recommend") || lower.contains("should ") || lower.contains("needs ");
        let has_pending_apply = todos.iter().any(|t| {
            t.status == TodoStatus::Pending
                && matches!(
                    route_execution(t),
                    ExecutionType::CodeCommand | ExecutionType::DirectEdit
                )
        });
        if recommends_changes && !has_pending_apply {
            self.next_id += 1;
            let mut follow_up = TodoItem::new(self.next_id, "Apply changes based on analysis", 3);
            follow_up.description =
                "Implement the changes the analysis recommended".to_string();
            follow_up.file_path = discovered.into_iter().next();
            todos.push(follow_up);
        }
    }

    /// Direct-edit path: ask for a targeted JSON edit, delegate to the
    /// editor (never a whole-file rewrite through this path).
    async fn execute_direct_edit(&mut self, todo: &TodoItem) -> anyhow::Result<TodoExecution> {
        let prompt = prompts::direct_edit_prompt(
            &format!("{} — {}", todo.content, todo.description),
            &self.base.summary(),
        );
        let outcome = self
            .sender
            .send(&[Message::user(prompt)], &[], None)
            .await
            .context("direct edit planning failed")?;
        self.track(UsagePhase::Codegen, &outcome.usage);

        let plan = extract_json_object(&outcome.message.content)
            .context("no JSON edit object in direct-edit response")?;
        let file_path = plan
            .get("file_path")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| todo.file_path.clone())
            .context("direct edit did not name a file")?;
        let changes = plan
            .get("changes")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let content = plan.get("content").and_then(|v| v.as_str()).unwrap_or("");

        let result = self
            .editing
            .editor
            .apply(EditRequest {
                instruction: format!(
                    "Apply this targeted edit to {file_path}: {changes}\n\
                     New or updated text:\n{content}"
                ),
                file_path: Some(file_path),
                strategy: EditStrategy::Doc,
            })
            .await?;

        Ok(TodoExecution {
            output: result.summary,
            files_modified: !result.files_modified.is_empty(),
        })
    }

    /// Shell path: ask for commands, validate and harden each, run them
    /// sequentially through the shell tool.
    async fn execute_shell(&mut self, todo: &TodoItem) -> anyhow::Result<TodoExecution> {
        let prompt = prompts::shell_prompt(
            &format!("{} — {}", todo.content, todo.description),
            &self.base.summary(),
        );
        let outcome = self
            .sender
            .send(&[Message::user(prompt)], &[], None)
            .await
            .context("shell planning failed")?;
        self.track(UsagePhase::Codegen, &outcome.usage);

        let plan = extract_json_object(&outcome.message.content)
            .context("no JSON command object in shell response")?;
        let commands: Vec<String> = plan
            .get("commands")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        anyhow::ensure!(!commands.is_empty(), "shell plan contained no commands");

        let mut output = String::new();
        for raw in commands {
            if let Some(pattern) = guard::unsafe_shell_pattern(&raw) {
                anyhow::bail!("refusing planned command (matched \"{pattern}\"): {raw}");
            }
            if guard::looks_like_source_code(&raw) {
                anyhow::bail!("planned command looks like source code, not shell: {raw}");
            }
            let command = harden_command(&raw);
            let call = ToolCall {
                id: format!("plan_{}", todo.id),
                name: "shell_command".into(),
                args: serde_json::json!({ "command": command }),
            };
            let result = self.registry.execute(&call).await;
            output.push_str(&format!("$ {command}\n{}\n", result.content));
            if result.is_error {
                anyhow::bail!("command failed: {command}\n{}", result.content);
            }
        }
        Ok(TodoExecution {
            output,
            files_modified: true,
        })
    }

    /// Code path: full editing service with rollback capture.
    async fn execute_code(&mut self, todo: &TodoItem) -> anyhow::Result<TodoExecution> {
        let intent = classify_task_intent(&format!("{} {}", todo.content, todo.description));
        let outcome = self.editing.execute(todo, Some(intent)).await;
        if outcome.revision_ids.is_empty() && outcome.diff.is_empty() {
            // Editor declined or failed; surface as a retryable failure.
            anyhow::bail!("code edit produced no changes for: {}", todo.content);
        }
        Ok(TodoExecution {
            output: outcome.diff,
            files_modified: !outcome.revision_ids.is_empty(),
        })
    }

    /// Continuation: confirm (unless skip-prompt), then ask for the next
    /// batch and append it.  Returns false when the user declined.
    async fn handle_continuation(&mut self, session: &mut Session) -> anyhow::Result<bool> {
        if !self.config.agent.skip_prompt && !self.flags.skip_prompt {
            eprint!("Continue with the next phase? [y/N] ");
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_err()
                || !line.trim().eq_ignore_ascii_case("y")
            {
                info!("continuation declined");
                return Ok(false);
            }
        }

        let completed_summary: String = {
            let todos = self.todos.lock().await;
            todos
                .iter()
                .filter(|t| t.status == TodoStatus::Completed)
                .map(|t| format!("- {}\n", t.content))
                .collect()
        };
        let prompt = prompts::continuation_prompt(&completed_summary, &self.base.summary());
        let outcome = self
            .sender
            .send(&[Message::user(prompt)], &[], None)
            .await
            .context("continuation planning failed")?;
        self.track(UsagePhase::Planning, &outcome.usage);

        let Some(items) = extract_json_array(&outcome.message.content) else {
            return Ok(false);
        };
        let mut appended = 0usize;
        {
            let mut todos = self.todos.lock().await;
            for item in items.into_iter().take(MAX_TODOS) {
                let Some(content) = item.get("content").and_then(|v| v.as_str()) else {
                    continue;
                };
                self.next_id += 1;
                let mut todo = TodoItem::new(self.next_id, content, 5);
                if let Some(d) = item.get("description").and_then(|v| v.as_str()) {
                    todo.description = d.to_string();
                }
                if let Some(p) = item.get("priority").and_then(|v| v.as_u64()) {
                    todo.priority = p.clamp(1, 99) as u8;
                }
                if let Some(f) = item.get("file_path").and_then(|v| v.as_str()) {
                    todo.file_path = Some(f.to_string());
                }
                todos.push(todo);
                appended += 1;
            }
        }
        session.record_action("plan", format!("continuation added {appended} todos"), "");
        Ok(appended > 0)
    }

    /// Run independent todos through a provider-sized worker pool.  Each
    /// member keeps its own execution path: analysis todos take a single
    /// model turn, documentation direct-edits go through the editor.
    pub async fn run_parallel_batch(&mut self, batch: Vec<TodoItem>) -> Vec<ParallelTodoResult> {
        let workers = self.profile.parallel_workers.min(batch.len().max(1));
        debug!(count = batch.len(), workers, "running parallel todo batch");

        let sender = self.sender.clone();
        let editing = self.editing.clone();
        let base_summary = self.base.summary();
        let results: Vec<ParallelTodoResult> = stream::iter(batch.into_iter().map(|todo| {
            let sender = sender.clone();
            let editing = editing.clone();
            let base_summary = base_summary.clone();
            async move {
                match route_execution(&todo) {
                    ExecutionType::DirectEdit => {
                        parallel_direct_edit(todo, sender, editing, base_summary).await
                    }
                    _ => parallel_analysis(todo, sender, base_summary).await,
                }
            }
        }))
        .buffer_unordered(workers)
        .collect()
        .await;

        // Update statuses atomically at the end; analysis outputs feed the
        // scoring and refinement state, edit outputs do not.
        let mut analysis_outputs: Vec<(u32, String)> = Vec::new();
        {
            let mut todos = self.todos.lock().await;
            for r in &results {
                if let Some(t) = todos.iter_mut().find(|t| t.id == r.todo_id) {
                    t.status = r.status;
                    if r.status == TodoStatus::Completed
                        && route_execution(t) == ExecutionType::Analysis
                    {
                        analysis_outputs.push((t.id, r.output.clone()));
                    }
                }
            }
        }
        for r in &results {
            self.track(UsagePhase::Progress, &r.usage);
        }
        for (id, output) in analysis_outputs {
            self.analysis_results.insert(id, output);
        }
        results
    }

    fn track(&self, phase: UsagePhase, usage: &TokenUsage) {
        self.metrics
            .lock()
            .expect("metrics mutex poisoned")
            .track(phase, Some(usage));
    }
}

/// One analysis todo executed as a single model turn (parallel path).
async fn parallel_analysis(
    todo: TodoItem,
    sender: Arc<MessageSender>,
    base_summary: String,
) -> ParallelTodoResult {
    let prompt = format!(
        "{}\n{}\nWorkspace: {}\nReport findings as lines starting with \"Key finding:\".",
        todo.content, todo.description, base_summary
    );
    match sender.send(&[Message::user(prompt)], &[], None).await {
        Ok(outcome) => ParallelTodoResult {
            todo_id: todo.id,
            status: TodoStatus::Completed,
            output: outcome.message.content,
            usage: outcome.usage,
            error: None,
        },
        Err(e) => failed_result(todo.id, TokenUsage::default(), format!("{e:#}")),
    }
}

/// One documentation direct-edit executed through the editor (parallel path).
async fn parallel_direct_edit(
    todo: TodoItem,
    sender: Arc<MessageSender>,
    editing: Arc<OptimizedEditingService>,
    base_summary: String,
) -> ParallelTodoResult {
    let prompt = prompts::direct_edit_prompt(
        &format!("{} — {}", todo.content, todo.description),
        &base_summary,
    );
    let outcome = match sender.send(&[Message::user(prompt)], &[], None).await {
        Ok(o) => o,
        Err(e) => return failed_result(todo.id, TokenUsage::default(), format!("{e:#}")),
    };
    let usage = outcome.usage;

    let Some(plan) = extract_json_object(&outcome.message.content) else {
        return failed_result(
            todo.id,
            usage,
            "no JSON edit object in direct-edit response".to_string(),
        );
    };
    let file_path = plan
        .get("file_path")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| todo.file_path.clone());
    let Some(file_path) = file_path else {
        return failed_result(todo.id, usage, "direct edit did not name a file".to_string());
    };
    let changes = plan
        .get("changes")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let content = plan.get("content").and_then(|v| v.as_str()).unwrap_or("");

    match editing
        .editor
        .apply(EditRequest {
            instruction: format!(
                "Apply this targeted edit to {file_path}: {changes}\n\
                 New or updated text:\n{content}"
            ),
            file_path: Some(file_path),
            strategy: EditStrategy::Doc,
        })
        .await
    {
        Ok(result) => ParallelTodoResult {
            todo_id: todo.id,
            status: TodoStatus::Completed,
            output: result.summary,
            usage,
            error: None,
        },
        Err(e) => failed_result(todo.id, usage, format!("{e:#}")),
    }
}

fn failed_result(todo_id: u32, usage: TokenUsage, error: String) -> ParallelTodoResult {
    ParallelTodoResult {
        todo_id,
        status: TodoStatus::Failed,
        output: String::new(),
        usage,
        error: Some(error),
    }
}

/// A batch is parallelizable when no two todos write the same file and every
/// member is an analysis or documentation direct-edit (everything else needs
/// sequential execution).
pub fn can_parallelize(todos: &[TodoItem]) -> bool {
    let mut seen_files = std::collections::HashSet::new();
    for todo in todos {
        match route_execution(todo) {
            ExecutionType::Analysis => {}
            ExecutionType::DirectEdit => {}
            _ => return false,
        }
        if let Some(f) = &todo.file_path {
            if !seen_files.insert(f.clone()) {
                return false;
            }
        }
    }
    true
}

fn truncate_for_action(s: &str) -> String {
    if s.chars().count() <= 200 {
        s.to_string()
    } else {
        let head: String = s.chars().take(200).collect();
        format!("{head}…")
    }
}

/// Make a planned command safe to re-run: pre-create target directories for
/// redirects and guard `go mod init` behind an existence check.
pub fn harden_command(command: &str) -> String {
    let mut cmd = command.to_string();

    // `go mod init foo` fails when go.mod exists; make it idempotent.
    if let Some(c) = Regex::new(r"^go mod init\b.*$").unwrap().find(&cmd) {
        cmd = format!("(test -f go.mod || {})", c.as_str());
    }

    // Redirects and heredocs into nested paths need the parent directory.
    if let Some(c) = Regex::new(r">{1,2}\s*([\w./-]+/[\w./-]+)").unwrap().captures(&cmd) {
        let target = &c[1];
        if let Some(dir) = std::path::Path::new(target).parent() {
            if !dir.as_os_str().is_empty() {
                cmd = format!("mkdir -p {} && {}", dir.display(), cmd);
            }
        }
    }
    cmd
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Intent classification ─────────────────────────────────────────────────

    #[test]
    fn documentation_intents() {
        assert_eq!(classify_intent("document the API"), IntentKind::Documentation);
        assert_eq!(classify_intent("please generate docs"), IntentKind::Documentation);
    }

    #[test]
    fn creation_intents() {
        assert_eq!(
            classify_intent("create new user service"),
            IntentKind::Creation
        );
        assert_eq!(classify_intent("setup new monorepo"), IntentKind::Creation);
    }

    #[test]
    fn analysis_intents() {
        assert_eq!(classify_intent("analyze the auth flow"), IntentKind::Analysis);
        assert_eq!(
            classify_intent("investigate the memory leak"),
            IntentKind::Analysis
        );
    }

    #[test]
    fn creation_beats_analysis() {
        // "review" appears, but the creation phrase wins
        assert_eq!(
            classify_intent("create new review pipeline"),
            IntentKind::Creation
        );
    }

    #[test]
    fn question_intents() {
        assert_eq!(classify_intent("what does main.go do"), IntentKind::Question);
        assert_eq!(
            classify_intent("can you explain the retry logic"),
            IntentKind::Question
        );
        assert_eq!(classify_intent("list the endpoints"), IntentKind::Question);
    }

    #[test]
    fn command_intents() {
        assert_eq!(classify_intent("run the tests"), IntentKind::Command);
        assert_eq!(classify_intent("deploy to staging"), IntentKind::Command);
        assert_eq!(classify_intent("install dependencies"), IntentKind::Command);
    }

    #[test]
    fn bare_test_is_not_a_command() {
        assert_eq!(
            classify_intent("test the parser handles unicode"),
            IntentKind::CodeUpdate
        );
        assert_eq!(classify_intent("test run the suite"), IntentKind::Command);
    }

    #[test]
    fn default_is_code_update() {
        assert_eq!(classify_intent("fix the login bug"), IntentKind::CodeUpdate);
    }

    // ── Execution routing ─────────────────────────────────────────────────────

    fn todo(content: &str) -> TodoItem {
        TodoItem::new(1, content, 1)
    }

    #[test]
    fn continuation_routes_first() {
        assert_eq!(
            route_execution(&todo("Continue with next phase")),
            ExecutionType::Continuation
        );
        assert_eq!(
            route_execution(&todo("proceed with next steps")),
            ExecutionType::Continuation
        );
    }

    #[test]
    fn direct_edit_phrases_route() {
        assert_eq!(
            route_execution(&todo("update README with usage")),
            ExecutionType::DirectEdit
        );
        assert_eq!(
            route_execution(&todo("fix typo in error message")),
            ExecutionType::DirectEdit
        );
        assert_eq!(
            route_execution(&todo("generate CHANGELOG.md for release")),
            ExecutionType::DirectEdit
        );
    }

    #[test]
    fn filesystem_keywords_route_to_shell() {
        assert_eq!(
            route_execution(&todo("create directory for migrations")),
            ExecutionType::ShellCommand
        );
        assert_eq!(
            route_execution(&todo("install project dependencies")),
            ExecutionType::ShellCommand
        );
        assert_eq!(
            route_execution(&todo("initialize the go module")),
            ExecutionType::ShellCommand
        );
    }

    #[test]
    fn analysis_words_route() {
        assert_eq!(
            route_execution(&todo("examine the request pipeline")),
            ExecutionType::Analysis
        );
        assert_eq!(
            route_execution(&todo("verify error handling in server.go")),
            ExecutionType::Analysis
        );
    }

    #[test]
    fn everything_else_is_code() {
        assert_eq!(
            route_execution(&todo("implement retry backoff for uploads")),
            ExecutionType::CodeCommand
        );
    }

    // ── JSON extraction ───────────────────────────────────────────────────────

    #[test]
    fn extracts_array_from_tail_of_prose() {
        let text = "Thinking about it... here is my plan, considering [1] and [2]:\n\
            [{\"content\": \"a\", \"priority\": 1}, {\"content\": \"b\", \"priority\": 2}]";
        let items = extract_json_array(text).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["content"], "a");
    }

    #[test]
    fn extracts_array_from_code_fence() {
        let text = "```json\n[{\"content\": \"only\"}]\n```";
        let items = extract_json_array(text).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn scalar_arrays_are_rejected() {
        assert!(extract_json_array("pick [1, 2, 3] of these").is_none());
    }

    #[test]
    fn no_array_returns_none() {
        assert!(extract_json_array("no structured output here").is_none());
    }

    #[test]
    fn object_extractor_takes_last_valid() {
        let text = "draft: {\"a\": 1} final: {\"commands\": [\"ls\"], \"explanation\": \"x\"}";
        let obj = extract_json_object(text).unwrap();
        assert!(obj.get("commands").is_some());
    }

    // ── Scoring ───────────────────────────────────────────────────────────────

    #[test]
    fn base_score_decreases_with_priority() {
        let ctx = PersistentContext::default();
        let none = HashMap::new();
        let p1 = score_todo(&TodoItem::new(1, "neutral work item", 1), &ctx, &none);
        let p5 = score_todo(&TodoItem::new(2, "neutral work item", 5), &ctx, &none);
        assert_eq!(p1, 90);
        assert_eq!(p5, 50);
    }

    #[test]
    fn urgency_keywords_add_six_each() {
        let ctx = PersistentContext::default();
        let none = HashMap::new();
        let plain = score_todo(&TodoItem::new(1, "improve naming", 1), &ctx, &none);
        let urgent = score_todo(
            &TodoItem::new(2, "fix the failing build", 1),
            &ctx,
            &none,
        );
        assert_eq!(urgent - plain, 18); // fix + failing + build
    }

    #[test]
    fn findings_boost_matching_todos() {
        let mut ctx = PersistentContext::default();
        ctx.add_finding(
            "bug",
            Severity::Critical,
            "race condition",
            "details",
            Some("src/pool.rs".into()),
            None,
        );
        let none = HashMap::new();
        let mut related = TodoItem::new(1, "harden the worker pool", 2);
        related.file_path = Some("src/pool.rs".into());
        let unrelated = TodoItem::new(2, "harden the worker pool", 2);
        let with = score_todo(&related, &ctx, &none);
        let without = score_todo(&unrelated, &ctx, &none);
        assert_eq!(with - without, 20);
    }

    #[test]
    fn analysis_results_add_bonus() {
        let ctx = PersistentContext::default();
        let mut analysis = HashMap::new();
        analysis.insert(1u32, "the problem is in src/io.rs near line 40".to_string());
        let mut t = TodoItem::new(2, "improve buffering", 2);
        t.file_path = Some("src/io.rs".into());
        let with = score_todo(&t, &ctx, &analysis);
        t.file_path = Some("src/other.rs".into());
        let without = score_todo(&t, &ctx, &analysis);
        assert_eq!(with - without, 4);
    }

    // ── Parallelizability ─────────────────────────────────────────────────────

    #[test]
    fn analysis_only_batches_parallelize() {
        let todos = vec![
            todo("examine the parser"),
            todo("review the scheduler"),
        ];
        assert!(can_parallelize(&todos));
    }

    #[test]
    fn shared_file_blocks_parallelism() {
        let mut a = todo("examine the parser");
        a.file_path = Some("src/parse.rs".into());
        let mut b = todo("review the parser error paths");
        b.file_path = Some("src/parse.rs".into());
        assert!(!can_parallelize(&[a, b]));
    }

    #[test]
    fn code_todos_block_parallelism() {
        let todos = vec![todo("examine the parser"), todo("implement the fix")];
        assert!(!can_parallelize(&todos));
    }

    #[test]
    fn doc_edits_on_disjoint_files_parallelize() {
        let analysis = todo("examine the parser");
        let mut doc = todo("update README with usage");
        doc.file_path = Some("README.md".into());
        assert!(can_parallelize(&[analysis, doc]));
    }

    // ── Parallel batch execution ──────────────────────────────────────────────

    struct CannedDocEditor;

    #[async_trait::async_trait]
    impl crate::editing::CodeEditor for CannedDocEditor {
        async fn apply(
            &self,
            req: crate::editing::EditRequest,
        ) -> anyhow::Result<crate::editing::EditResult> {
            Ok(crate::editing::EditResult {
                summary: format!("edited {}", req.file_path.unwrap_or_default()),
                ..Default::default()
            })
        }
    }

    fn planner_with_replies(reply: &str, calls: usize) -> TodoPlanner {
        use ledit_model::{ResponseEvent, ScriptedMockProvider};
        let scripts: Vec<Vec<ResponseEvent>> = (0..calls)
            .map(|_| {
                vec![
                    ResponseEvent::TextDelta(reply.to_string()),
                    ResponseEvent::Usage(TokenUsage::new(10, 5)),
                    ResponseEvent::Done,
                ]
            })
            .collect();
        let sender = Arc::new(MessageSender::new(
            Arc::new(ScriptedMockProvider::new(scripts)),
            true,
        ));
        let tracker = Arc::new(Mutex::new(ledit_history::ChangeTracker::new()));
        let editing = Arc::new(OptimizedEditingService::new(Arc::new(CannedDocEditor), tracker));
        TodoPlanner::new(
            sender,
            Arc::new(ToolRegistry::new()),
            ProviderProfile::for_provider("mock", "mock-model"),
            Arc::new(Config::default()),
            EnvFlags::default(),
            Arc::new(Mutex::new(SessionMetrics::default())),
            Arc::new(AsyncMutex::new(Vec::new())),
            editing,
            BaseContext::default(),
        )
    }

    #[tokio::test]
    async fn parallel_batch_handles_doc_edits_alongside_analysis() {
        // The same reply serves both paths regardless of completion order:
        // the analysis path stores the text, the doc-edit path extracts the
        // JSON object from it.
        let reply = r###"Key finding: the README lacks a usage section. {"file_path": "README.md", "changes": "add usage section", "content": "## Usage"}"###;
        let mut planner = planner_with_replies(reply, 2);

        let analysis = TodoItem::new(1, "examine the parser", 1);
        let mut doc = TodoItem::new(2, "update README with usage", 2);
        doc.file_path = Some("README.md".into());
        *planner.todos.lock().await = vec![analysis.clone(), doc.clone()];

        let results = planner.run_parallel_batch(vec![analysis, doc]).await;
        assert_eq!(results.len(), 2);
        assert!(
            results.iter().all(|r| r.status == TodoStatus::Completed),
            "{results:?}"
        );
        let doc_result = results.iter().find(|r| r.todo_id == 2).unwrap();
        assert!(doc_result.output.contains("README.md"), "{}", doc_result.output);

        // statuses updated atomically; only analysis output feeds refinement
        let todos = planner.todos.lock().await;
        assert!(todos.iter().all(|t| t.status == TodoStatus::Completed));
        drop(todos);
        assert!(planner.analysis_results.contains_key(&1));
        assert!(!planner.analysis_results.contains_key(&2));
    }

    // ── Command hardening ─────────────────────────────────────────────────────

    #[test]
    fn go_mod_init_becomes_idempotent() {
        assert_eq!(
            harden_command("go mod init example.com/app"),
            "(test -f go.mod || go mod init example.com/app)"
        );
    }

    #[test]
    fn redirect_into_nested_path_gets_mkdir() {
        let hardened = harden_command("echo content > configs/app/dev.yaml");
        assert!(hardened.starts_with("mkdir -p configs/app && "));
        assert!(hardened.ends_with("echo content > configs/app/dev.yaml"));
    }

    #[test]
    fn plain_commands_are_untouched() {
        assert_eq!(harden_command("cargo build"), "cargo build");
        assert_eq!(harden_command("echo hi > top.txt"), "echo hi > top.txt");
    }
}
