// SPDX-License-Identifier: Apache-2.0
//! Optimized editing service: pick a strategy for a code-editing todo,
//! delegate to the editor, and make the result revertible.
//!
//! The editor itself is a seam ([`CodeEditor`]); the default implementation
//! drives a focused conversation loop with the file tools.  Whatever the
//! editor touches is captured by the change tracker and committed as one
//! revision, so a bad edit is a single `rollback_changes` away.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use ledit_config::{AgentConfig, ProviderProfile};
use ledit_history::ChangeTracker;
use ledit_model::{MessageSender, TokenUsage};
use ledit_tools::{TodoItem, ToolRegistry};

use crate::handler::ConversationHandler;
use crate::metrics::{SessionMetrics, UsagePhase};
use crate::planner::TaskIntent;
use crate::prune::ConversationPruner;
use crate::session::Session;

/// Editing strategies, from cheapest to most involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditStrategy {
    /// Single-file, small, simple change.
    Quick,
    /// Multi-file or structurally complex change.
    Full,
    /// New files rather than modifications.
    Creation,
    /// Documentation-only output.
    Doc,
    /// Read and report; no mutation expected.
    AnalysisOnly,
}

/// Signals extracted from a todo description to drive strategy selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComplexityFactors {
    pub single_file: bool,
    pub multi_file: bool,
    pub simple_op: bool,
    pub complex_op: bool,
    pub requires_shell: bool,
    pub estimated_size: usize,
    pub estimated_cost: f64,
}

/// Cost threshold above which auto-selection escalates to Full.
const FULL_COST_THRESHOLD: f64 = 0.05;

/// Inspect a description for complexity signals.
pub fn analyze_complexity(description: &str) -> ComplexityFactors {
    let lower = description.to_lowercase();
    let file_mentions = regex::Regex::new(r"[\w./-]+\.(go|rs|py|js|ts|java|c|h|md)")
        .unwrap()
        .find_iter(&lower)
        .count();

    let simple_keywords = ["add", "fix", "update", "change", "modify", "remove"];
    let complex_keywords = [
        "refactor",
        "restructure",
        "architecture",
        "design",
        "migrate",
        "overhaul",
    ];
    let shell_keywords = [
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

    let estimated_size = description.len() * 10;
    // chars/4 tokens for the description round-trip, at a nominal output rate
    let estimated_tokens = (estimated_size / 4) as f64;
    ComplexityFactors {
        single_file: file_mentions == 1 || (file_mentions == 0 && lower.contains("file")),
        multi_file: file_mentions > 1
            || lower.contains("multiple files")
            || lower.contains("across files"),
        simple_op: simple_keywords.iter().any(|k| lower.contains(k)),
        complex_op: complex_keywords.iter().any(|k| lower.contains(k)),
        requires_shell: shell_keywords.iter().any(|k| lower.contains(k)),
        estimated_size,
        estimated_cost: estimated_tokens * 15.0e-6,
    }
}

/// Choose the strategy for a todo.  `intent`, when known, overrides the
/// complexity-driven auto selection.
pub fn choose_strategy(description: &str, intent: Option<TaskIntent>) -> EditStrategy {
    match intent {
        Some(TaskIntent::Documentation) | Some(TaskIntent::Analysis) => {
            return match intent {
                Some(TaskIntent::Documentation) => EditStrategy::Doc,
                _ => EditStrategy::AnalysisOnly,
            }
        }
        Some(TaskIntent::Creation) => return EditStrategy::Creation,
        Some(TaskIntent::Refactoring) => return EditStrategy::Full,
        _ => {}
    }

    let factors = analyze_complexity(description);
    if factors.requires_shell {
        // The surrounding routing sends shell work elsewhere; anything that
        // still lands here gets the conservative path.
        return EditStrategy::Full;
    }
    if factors.single_file && factors.estimated_size < 1000 && factors.simple_op {
        return EditStrategy::Quick;
    }
    if factors.multi_file || factors.complex_op || factors.estimated_cost > FULL_COST_THRESHOLD {
        return EditStrategy::Full;
    }
    EditStrategy::Quick
}

/// Request handed to the editor.
#[derive(Debug, Clone)]
pub struct EditRequest {
    pub instruction: String,
    pub file_path: Option<String>,
    pub strategy: EditStrategy,
}

/// What the editor reports back.
#[derive(Debug, Clone, Default)]
pub struct EditResult {
    pub summary: String,
    pub files_modified: Vec<PathBuf>,
    pub review_iterations: u32,
    pub usage: TokenUsage,
}

/// Seam to the actual code editor.
#[async_trait]
pub trait CodeEditor: Send + Sync {
    async fn apply(&self, req: EditRequest) -> anyhow::Result<EditResult>;
}

/// Per-strategy execution metrics.
#[derive(Debug, Clone, Default)]
pub struct EditMetrics {
    pub strategy_used: Option<EditStrategy>,
    pub editing_tokens: u64,
    pub review_iterations: u32,
    pub duration: Duration,
    pub files_modified: usize,
}

/// Outcome returned to the planner.
#[derive(Debug, Clone, Default)]
pub struct EditOutcome {
    pub diff: String,
    pub revision_ids: Vec<String>,
    pub metrics: EditMetrics,
}

/// Wraps a [`CodeEditor`] with strategy selection, revision capture, and
/// metrics.
pub struct OptimizedEditingService {
    pub editor: Arc<dyn CodeEditor>,
    pub tracker: Arc<Mutex<ChangeTracker>>,
}

impl OptimizedEditingService {
    pub fn new(editor: Arc<dyn CodeEditor>, tracker: Arc<Mutex<ChangeTracker>>) -> Self {
        Self { editor, tracker }
    }

    /// Execute a code todo.  On any editor error, nothing is committed and
    /// the outcome carries an empty diff and no revision ids.
    pub async fn execute(&self, todo: &TodoItem, intent: Option<TaskIntent>) -> EditOutcome {
        let description = if todo.description.is_empty() {
            todo.content.clone()
        } else {
            format!("{}: {}", todo.content, todo.description)
        };
        let strategy = choose_strategy(&description, intent);
        let started = Instant::now();

        {
            let mut tracker = self.tracker.lock().expect("tracker mutex poisoned");
            if !tracker.is_enabled() {
                tracker.enable(&description);
            }
        }

        let req = EditRequest {
            instruction: description.clone(),
            file_path: todo.file_path.clone(),
            strategy,
        };
        debug!(strategy = ?strategy, todo = todo.id, "editing service dispatch");

        match self.editor.apply(req).await {
            Ok(result) => {
                let (revision_ids, diff) = {
                    let mut tracker = self.tracker.lock().expect("tracker mutex poisoned");
                    match tracker.commit(&result.summary) {
                        Some(rev) => {
                            let diff = render_revision_diff(&tracker, &rev);
                            (vec![rev], diff)
                        }
                        None => (Vec::new(), String::new()),
                    }
                };
                EditOutcome {
                    diff,
                    revision_ids,
                    metrics: EditMetrics {
                        strategy_used: Some(strategy),
                        editing_tokens: result.usage.total_tokens,
                        review_iterations: result.review_iterations,
                        duration: started.elapsed(),
                        files_modified: result.files_modified.len(),
                    },
                }
            }
            Err(e) => {
                warn!(todo = todo.id, "editor failed: {e:#}");
                EditOutcome {
                    diff: String::new(),
                    revision_ids: Vec::new(),
                    metrics: EditMetrics {
                        strategy_used: Some(strategy),
                        duration: started.elapsed(),
                        ..Default::default()
                    },
                }
            }
        }
    }
}

/// Unified diff of every record in a revision (original → new).
fn render_revision_diff(tracker: &ChangeTracker, revision_id: &str) -> String {
    let mut out = String::new();
    for record in tracker.records_for(revision_id) {
        let before = record
            .original
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        let after = String::from_utf8_lossy(&record.new).into_owned();
        let path = record.file_path.display();
        out.push_str(&format!("--- {path}\n+++ {path}\n"));
        let diff = similar::TextDiff::from_lines(before.as_str(), after.as_str());
        for change in diff.iter_all_changes() {
            let sign = match change.tag() {
                similar::ChangeTag::Delete => "-",
                similar::ChangeTag::Insert => "+",
                similar::ChangeTag::Equal => " ",
            };
            out.push_str(sign);
            out.push_str(change.value());
            if !change.value().ends_with('\n') {
                out.push('\n');
            }
        }
    }
    out
}

/// Default editor: runs a focused conversation loop with the file tools.
pub struct LoopCodeEditor {
    pub sender: Arc<MessageSender>,
    pub registry: Arc<ToolRegistry>,
    pub profile: ProviderProfile,
    pub config: Arc<AgentConfig>,
    pub metrics: Arc<Mutex<SessionMetrics>>,
}

#[async_trait]
impl CodeEditor for LoopCodeEditor {
    async fn apply(&self, req: EditRequest) -> anyhow::Result<EditResult> {
        let system = match req.strategy {
            EditStrategy::Quick => {
                "You are a focused code editor. Make the smallest correct change \
                 with edit_file; never rewrite whole files for small edits. \
                 Emit [[TASK_COMPLETE]] when done."
            }
            EditStrategy::Full => {
                "You are a careful software engineer. Read the relevant files, \
                 make the required changes with edit_file/write_file, and verify \
                 consistency across files. Emit [[TASK_COMPLETE]] when done."
            }
            EditStrategy::Creation => {
                "You create new files with the create tool. Follow the project's \
                 existing conventions. Emit [[TASK_COMPLETE]] when done."
            }
            EditStrategy::Doc => {
                "You write documentation. Edit only documentation files. \
                 Emit [[TASK_COMPLETE]] when done."
            }
            EditStrategy::AnalysisOnly => {
                "You analyze code without modifying it. Use read_file and \
                 search_files, then report findings. Emit [[TASK_COMPLETE]] when done."
            }
        };

        let mut instruction = req.instruction.clone();
        if let Some(path) = &req.file_path {
            instruction.push_str(&format!("\nFocus on: {path}"));
        }

        let mut handler = ConversationHandler::new(
            self.sender.clone(),
            None,
            self.registry.clone(),
            ConversationPruner::new(Default::default()),
            self.profile.clone(),
            self.config.clone(),
            self.metrics.clone(),
        );
        handler.set_phase(UsagePhase::Codegen);

        let mut session = Session::new();
        session.push(ledit_model::Message::user(instruction));
        let report = handler.run(&mut session, system).await?;

        Ok(EditResult {
            summary: report.final_text,
            files_modified: Vec::new(),
            review_iterations: report.iterations,
            usage: TokenUsage::default(),
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
