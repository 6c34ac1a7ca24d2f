// SPDX-License-Identifier: Apache-2.0
//! The agent facade: session lifecycle, tool registration, state save/load,
//! and the single `execute` entry point.
//!
//! The facade stays thin — it owns state and wiring; the conversation loop
//! and the planner do the actual work and only see the narrow pieces they
//! need (sender, registry, metrics).

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Context as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use ledit_config::{smart_timeout, Complexity, Config, EnvFlags, ProviderProfile, TaskType};
use ledit_history::ChangeTracker;
use ledit_model::{Message, MessageSender, ModelProvider};
use ledit_tools::{
    builtin::git::GitApprover, ActivateSkillTool, AnalyzeImageTool, CreateTool, EditFileTool,
    FetchUrlTool, GitTool, ImageMode, ListSkillsTool, ReadFileTool, RollbackChangesTool,
    SearchFilesTool, ShellCommandTool, SkillLibrary, TodoItem, TodoReadTool, TodoWriteTool,
    ToolPolicy, ToolRegistry, ValidateBuildTool, ViewHistoryTool, WebSearchTool, Workspace,
    WriteFileTool,
};

use crate::base_context::{self, BaseContext};
use crate::editing::{LoopCodeEditor, OptimizedEditingService};
use crate::handler::ConversationHandler;
use crate::metrics::{SessionMetrics, UsagePhase};
use crate::output::AsyncOutputBuffer;
use crate::planner::{classify_intent, IntentKind, TodoPlanner};
use crate::prompts;
use crate::prune::ConversationPruner;
use crate::session::{Session, TaskAction};
use crate::subagent::{RunParallelSubagentsTool, RunSubagentTool, SubagentSpawner};

pub type ProviderFactory =
    Arc<dyn Fn(&str, &str) -> anyhow::Result<Arc<dyn ModelProvider>> + Send + Sync>;

/// On-disk session state (`session_<id>.json`).
#[derive(Debug, Serialize, Deserialize)]
struct AgentStateFile {
    messages: Vec<Message>,
    #[serde(default)]
    previous_summary: String,
    #[serde(default)]
    compact_summary: String,
    #[serde(default)]
    task_actions: Vec<TaskAction>,
    session_id: String,
    total_tokens: u64,
    total_cost: f64,
    prompt_tokens: u64,
    completion_tokens: u64,
    cached_tokens: u64,
    cached_cost_savings: f64,
    /// RFC 3339
    last_updated: String,
    #[serde(default)]
    name: Option<String>,
}

/// One entry in `~/.ledit/agent_costs.json`.
#[derive(Debug, Serialize, Deserialize)]
struct CostHistoryEntry {
    timestamp: String,
    total_tokens: u64,
    total_cost: f64,
    duration_ms: u64,
}

pub struct Agent {
    config: Arc<Config>,
    flags: EnvFlags,
    profile: ProviderProfile,
    provider: Arc<dyn ModelProvider>,
    provider_factory: ProviderFactory,
    sender: Arc<MessageSender>,
    registry: Arc<ToolRegistry>,
    tracker: Arc<Mutex<ChangeTracker>>,
    todos: Arc<AsyncMutex<Vec<TodoItem>>>,
    metrics: Arc<Mutex<SessionMetrics>>,
    shared_actions: Arc<Mutex<Vec<TaskAction>>>,
    session: Session,
    base: BaseContext,
    workspace_root: PathBuf,
    /// Where session_<id>.json lands; defaults to <workspace>/.ledit
    state_dir: PathBuf,
    /// Cost-history file; defaults to ~/.ledit/agent_costs.json
    cost_history_path: Option<PathBuf>,
    output: Option<AsyncOutputBuffer>,
    interrupt: Arc<AtomicBool>,
    started: Instant,
}

impl Agent {
    pub fn new(
        config: Config,
        provider: Arc<dyn ModelProvider>,
        workspace_root: impl Into<PathBuf>,
    ) -> anyhow::Result<Self> {
        let workspace_root: PathBuf = workspace_root.into();
        let config = Arc::new(config);
        let flags = EnvFlags::from_env();
        let profile = ProviderProfile::for_provider(&config.model.provider, &config.model.name);
        let base = base_context::load_or_scan(&workspace_root, flags.base_context_disabled);

        let tracker = Arc::new(Mutex::new(ChangeTracker::new()));
        let todos: Arc<AsyncMutex<Vec<TodoItem>>> = Arc::new(AsyncMutex::new(Vec::new()));
        let metrics = Arc::new(Mutex::new(SessionMetrics::default()));
        let shared_actions: Arc<Mutex<Vec<TaskAction>>> = Arc::new(Mutex::new(Vec::new()));
        let sender = Arc::new(
            MessageSender::new(provider.clone(), config.model.stream)
                .with_timeout(smart_timeout(&profile, TaskType::CodeGeneration, Complexity::Moderate)),
        );

        let main_provider = provider.clone();
        let provider_factory: ProviderFactory = Arc::new(move |_tag, _model| {
            // Concrete per-persona HTTP clients are wired by the binary; the
            // engine default reuses the session provider.
            Ok(main_provider.clone())
        });

        let mut agent = Self {
            state_dir: workspace_root.join(".ledit"),
            cost_history_path: dirs::home_dir().map(|h| h.join(".ledit").join("agent_costs.json")),
            config,
            flags,
            profile,
            provider,
            provider_factory,
            sender,
            registry: Arc::new(ToolRegistry::new()),
            tracker,
            todos,
            metrics,
            shared_actions,
            session: Session::new(),
            base,
            workspace_root,
            output: None,
            interrupt: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
        };
        agent.registry = Arc::new(agent.build_registry(true));
        Ok(agent)
    }

    /// Override where providers for sub-agent personas come from.
    pub fn set_provider_factory(&mut self, factory: ProviderFactory) {
        self.provider_factory = factory;
        self.registry = Arc::new(self.build_registry(true));
    }

    /// Attach a user-visible output buffer (streamed sub-agent output etc.).
    pub fn set_output(&mut self, output: AsyncOutputBuffer) {
        self.output = Some(output);
        self.registry = Arc::new(self.build_registry(true));
    }

    pub fn set_state_dir(&mut self, dir: impl Into<PathBuf>) {
        self.state_dir = dir.into();
    }

    pub fn set_cost_history_path(&mut self, path: impl Into<PathBuf>) {
        self.cost_history_path = Some(path.into());
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn metrics_snapshot(&self) -> SessionMetrics {
        self.metrics.lock().expect("metrics mutex poisoned").clone()
    }

    pub fn set_session_name(&mut self, name: &str) {
        self.session.set_name(name);
    }

    /// Register the complete tool surface.  `with_subagents` is false for
    /// child registries, which must not nest further spawns.
    fn build_registry(&self, with_subagents: bool) -> ToolRegistry {
        let workspace = Workspace::new(&self.workspace_root);
        let policy = ToolPolicy::from_config(&self.config.tools);
        let approver = make_git_approver(self.config.agent.skip_prompt || self.flags.skip_prompt);
        let (tool_event_tx, _tool_event_rx) = tokio::sync::mpsc::channel(64);
        let skills = SkillLibrary::new(
            self.config
                .tools
                .skills_dir
                .as_ref()
                .map(PathBuf::from)
                .or_else(|| Some(self.workspace_root.join(".ledit").join("skills"))),
        );
        let search_key = self
            .config
            .tools
            .search_api_key
            .clone()
            .or_else(|| std::env::var("LEDIT_SEARCH_API_KEY").ok());

        let mut reg = ToolRegistry::new();
        reg.register(ShellCommandTool {
            workspace: workspace.clone(),
            timeout_secs: self.config.tools.timeout_secs,
            policy,
        });
        reg.register(ReadFileTool {
            workspace: workspace.clone(),
        });
        reg.register(WriteFileTool {
            workspace: workspace.clone(),
            tracker: self.tracker.clone(),
        });
        reg.register(EditFileTool {
            workspace: workspace.clone(),
            tracker: self.tracker.clone(),
        });
        reg.register(CreateTool {
            workspace: workspace.clone(),
            tracker: self.tracker.clone(),
        });
        reg.register(GitTool {
            workspace: workspace.clone(),
            approver,
        });
        reg.register(TodoWriteTool::new(self.todos.clone(), tool_event_tx));
        reg.register(TodoReadTool::new(self.todos.clone()));
        reg.register(ValidateBuildTool {
            workspace: workspace.clone(),
            commands: self.base.build_suggestions.clone(),
            timeout_secs: 300,
        });
        reg.register(SearchFilesTool {
            workspace: workspace.clone(),
        });
        reg.register(WebSearchTool::new(search_key));
        reg.register(FetchUrlTool::new(self.config.tools.fetch_max_chars));
        reg.register(AnalyzeImageTool {
            workspace: workspace.clone(),
            vision: self.provider.clone(),
            mode: ImageMode::UiScreenshot,
        });
        reg.register(AnalyzeImageTool {
            workspace: workspace.clone(),
            vision: self.provider.clone(),
            mode: ImageMode::Content,
        });
        reg.register(ViewHistoryTool {
            tracker: self.tracker.clone(),
        });
        reg.register(RollbackChangesTool {
            tracker: self.tracker.clone(),
        });
        reg.register(ListSkillsTool {
            library: skills.clone(),
        });
        reg.register(ActivateSkillTool { library: skills });

        if with_subagents {
            let spawner = Arc::new(self.build_spawner());
            reg.register(RunSubagentTool {
                spawner: spawner.clone(),
            });
            reg.register(RunParallelSubagentsTool { spawner });
        }
        reg
    }

    /// Children get their own todo list (a child managing the parent's plan
    /// would race the planner) but share the tracker, so their file changes
    /// stay revertible through the same history.
    fn build_spawner(&self) -> SubagentSpawner {
        let registry_factory = {
            let config = self.config.clone();
            let tracker = self.tracker.clone();
            let workspace_root = self.workspace_root.clone();
            let base = self.base.clone();
            Arc::new(move || child_registry(&config, &tracker, &workspace_root, &base))
        };

        SubagentSpawner {
            config: self.config.clone(),
            flags: self.flags.clone(),
            provider_factory: self.provider_factory.clone(),
            registry_factory,
            workspace_root: self.workspace_root.clone(),
            metrics: self.metrics.clone(),
            shared_actions: self.shared_actions.clone(),
            output: self.output.clone(),
            interrupt: Some(self.interrupt.clone()),
        }
    }

    /// Shared cancellation flag; set it (e.g. from a Ctrl-C handler) to stop
    /// the loop before the next model call and block new sub-agent spawns.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Execute one intent: question/command intents take a single
    /// conversation turn; structured work goes through the planner.
    pub async fn execute(&mut self, intent: &str) -> anyhow::Result<String> {
        info!(intent, "execute");
        self.tracker
            .lock()
            .expect("tracker mutex poisoned")
            .enable(intent);
        // Children see the action trail accumulated so far.
        *self.shared_actions.lock().expect("actions mutex poisoned") =
            self.session.task_actions.clone();

        let kind = classify_intent(intent);
        debug!(?kind, "classified intent");

        let result = match kind {
            IntentKind::Question | IntentKind::Command => self.run_single_turn(intent).await,
            _ => self.run_planned(intent).await,
        };

        // State survives partial failure; a save error must not mask the
        // run's own error.
        if let Err(e) = self.save_state() {
            warn!("failed to save session state: {e:#}");
        }
        if let Err(e) = self.append_cost_history() {
            debug!("failed to append cost history: {e:#}");
        }

        result
    }

    async fn run_single_turn(&mut self, intent: &str) -> anyhow::Result<String> {
        let mut handler = ConversationHandler::new(
            self.sender.clone(),
            self.fast_sender(),
            self.registry.clone(),
            ConversationPruner::new(self.config.pruning.clone()),
            self.profile.clone(),
            Arc::new(self.config.agent.clone()),
            self.metrics.clone(),
        );
        handler.set_phase(UsagePhase::Intent);
        handler.set_interrupt(self.interrupt.clone());

        self.session.push(Message::user(intent));
        let system = prompts::system_prompt(
            &self.base.summary(),
            self.config.agent.system_prompt.as_deref(),
        );
        let report = handler.run(&mut self.session, &system).await?;
        self.session
            .record_action("turn", intent.to_string(), String::new());
        Ok(report.final_text)
    }

    async fn run_planned(&mut self, intent: &str) -> anyhow::Result<String> {
        let editor = Arc::new(LoopCodeEditor {
            sender: self.sender.clone(),
            registry: self.registry.clone(),
            profile: self.profile.clone(),
            config: Arc::new(self.config.agent.clone()),
            metrics: self.metrics.clone(),
        });
        let editing = Arc::new(OptimizedEditingService::new(editor, self.tracker.clone()));

        let mut planner = TodoPlanner::new(
            self.sender.clone(),
            self.registry.clone(),
            self.profile.clone(),
            self.config.clone(),
            self.flags.clone(),
            self.metrics.clone(),
            self.todos.clone(),
            editing,
            self.base.clone(),
        );
        planner.run(intent, &mut self.session).await
    }

    fn fast_sender(&self) -> Option<Arc<MessageSender>> {
        // The default factory reuses the session provider, so the fast-model
        // id only changes behaviour when the binary installs a real factory.
        let fast_model = self.profile.fast_model.as_ref()?;
        let provider = (self.provider_factory)(&self.profile.tag, fast_model).ok()?;
        Some(Arc::new(MessageSender::new(provider, false)))
    }

    // ── State persistence ─────────────────────────────────────────────────────

    pub fn export_state(&self) -> anyhow::Result<Vec<u8>> {
        let m = self.metrics_snapshot();
        let state = AgentStateFile {
            messages: self.session.messages.clone(),
            previous_summary: self.session.previous_summary.clone(),
            compact_summary: self.session.compact_summary.clone(),
            task_actions: self.session.task_actions.clone(),
            session_id: self.session.id.clone(),
            total_tokens: m.total_tokens,
            total_cost: m.total_cost,
            prompt_tokens: m.prompt_tokens,
            completion_tokens: m.completion_tokens,
            cached_tokens: m.cached_tokens,
            cached_cost_savings: m.cached_cost_savings,
            last_updated: Utc::now().to_rfc3339(),
            name: self.session.name(),
        };
        Ok(serde_json::to_vec_pretty(&state)?)
    }

    pub fn import_state(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        let state: AgentStateFile =
            serde_json::from_slice(bytes).context("corrupt session state file")?;
        self.session.id = state.session_id;
        self.session.messages = state.messages;
        self.session.previous_summary = state.previous_summary;
        self.session.compact_summary = state.compact_summary;
        self.session.task_actions = state.task_actions;
        if let Some(name) = state.name {
            self.session.set_name(&name);
        }
        {
            let mut m = self.metrics.lock().expect("metrics mutex poisoned");
            m.total_tokens = state.total_tokens;
            m.total_cost = state.total_cost;
            m.prompt_tokens = state.prompt_tokens;
            m.completion_tokens = state.completion_tokens;
            m.cached_tokens = state.cached_tokens;
            m.cached_cost_savings = state.cached_cost_savings;
        }
        // Seed continuation context; the compact summary wins over the
        // legacy previous_summary when both exist.
        let summary = if !self.session.compact_summary.is_empty() {
            Some(self.session.compact_summary.clone())
        } else if !self.session.previous_summary.is_empty() {
            Some(self.session.previous_summary.clone())
        } else {
            None
        };
        if let Some(summary) = summary {
            self.session.push(Message::assistant(format!(
                "[Previous session summary]\n{summary}"
            )));
        }
        Ok(())
    }

    /// Write `session_<id>.json` (mode 0600) into the state directory.
    pub fn save_state(&self) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.state_dir)?;
        let path = self
            .state_dir
            .join(format!("session_{}.json", self.session.id));
        std::fs::write(&path, self.export_state()?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        debug!(path = %path.display(), "saved session state");
        Ok(path)
    }

    pub fn load_state_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read state file {}", path.display()))?;
        self.import_state(&bytes)
    }

    fn append_cost_history(&self) -> anyhow::Result<()> {
        let Some(path) = &self.cost_history_path else {
            return Ok(());
        };
        let m = self.metrics_snapshot();
        let mut entries: Vec<CostHistoryEntry> = std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        entries.push(CostHistoryEntry {
            timestamp: Utc::now().to_rfc3339(),
            total_tokens: m.total_tokens,
            total_cost: m.total_cost,
            duration_ms: self.started.elapsed().as_millis() as u64,
        });
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }

    /// Final user-visible summary line.
    pub fn summary(&self) -> String {
        let m = self.metrics_snapshot();
        format!(
            "tokens: {} (prompt {}, completion {}, cached {}) · cost: ${:.4} (saved ${:.4})",
            m.total_tokens,
            m.prompt_tokens,
            m.completion_tokens,
            m.cached_tokens,
            m.total_cost,
            m.cached_cost_savings
        )
    }
}

/// Child-agent tool registry: full surface minus the spawn tools.
fn child_registry(
    config: &Arc<Config>,
    tracker: &Arc<Mutex<ChangeTracker>>,
    workspace_root: &Path,
    base: &BaseContext,
) -> ToolRegistry {
    let workspace = Workspace::new(workspace_root);
    let policy = ToolPolicy::from_config(&config.tools);
    let approver = make_git_approver(true); // children never prompt
    let todos: Arc<AsyncMutex<Vec<TodoItem>>> = Arc::new(AsyncMutex::new(Vec::new()));
    let (tool_event_tx, _rx) = tokio::sync::mpsc::channel(64);

    let mut reg = ToolRegistry::new();
    reg.register(ShellCommandTool {
        workspace: workspace.clone(),
        timeout_secs: config.tools.timeout_secs,
        policy,
    });
    reg.register(ReadFileTool {
        workspace: workspace.clone(),
    });
    reg.register(WriteFileTool {
        workspace: workspace.clone(),
        tracker: tracker.clone(),
    });
    reg.register(EditFileTool {
        workspace: workspace.clone(),
        tracker: tracker.clone(),
    });
    reg.register(CreateTool {
        workspace: workspace.clone(),
        tracker: tracker.clone(),
    });
    reg.register(GitTool {
        workspace: workspace.clone(),
        approver,
    });
    reg.register(TodoWriteTool::new(todos.clone(), tool_event_tx));
    reg.register(TodoReadTool::new(todos));
    reg.register(SearchFilesTool {
        workspace: workspace.clone(),
    });
    reg.register(FetchUrlTool::new(config.tools.fetch_max_chars));
    reg.register(ValidateBuildTool {
        workspace,
        commands: base.build_suggestions.clone(),
        timeout_secs: 300,
    });
    reg
}

fn make_git_approver(skip_prompt: bool) -> GitApprover {
    if skip_prompt {
        Arc::new(|_| true)
    } else {
        Arc::new(|command: &str| {
            eprint!("Approve {command}? [y/N] ");
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).is_ok()
                && line.trim().eq_ignore_ascii_case("y")
        })
    }
}
