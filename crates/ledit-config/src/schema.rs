// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so config fields that should be enabled unless explicitly
/// disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub pruning: PruningConfig,
    /// Named sub-agent persona configurations.
    ///
    /// A persona bundles a provider, a model, and an optional system prompt
    /// file, and is selected per `run_subagent` call:
    ///
    /// ```yaml
    /// personas:
    ///   reviewer:
    ///     provider: openai
    ///     model: gpt-4o-mini
    ///     system_prompt_path: ~/.ledit/personas/reviewer.md
    /// ```
    #[serde(default)]
    pub personas: HashMap<String, PersonaConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "openai" | "groq" | "deepinfra" | "ollama" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override for local proxies or compatible endpoints
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
    /// Stream responses token by token instead of waiting for the full body
    #[serde(default = "default_true")]
    pub stream: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            name: "gpt-4o".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
            stream: true,
        }
    }
}

fn default_max_iterations() -> u32 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_secs() -> u64 {
    1
}
fn default_subagent_token_budget() -> u64 {
    500_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of conversation-loop iterations before stopping
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Maximum provider-call retries for transient errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in seconds for the transient-error retry schedule
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
    /// Skip every interactive prompt and proceed with defaults.
    /// Also forced on by the LEDIT_SKIP_PROMPT environment variable.
    #[serde(default)]
    pub skip_prompt: bool,
    /// Ask a cheap provider-specific model whether a short, tool-free
    /// response is a premature stop, and nudge the model to continue if so.
    #[serde(default = "default_true")]
    pub false_stop_check: bool,
    /// Total token budget for a single sub-agent run.  A child that exceeds
    /// it is stopped and its partial output returned with an explicit
    /// budget-exceeded marker.
    #[serde(default = "default_subagent_token_budget")]
    pub subagent_token_budget: u64,
    /// Provider override for sub-agents; falls back to the main model config.
    #[serde(default)]
    pub subagent_provider: Option<String>,
    /// Model override for sub-agents.
    #[serde(default)]
    pub subagent_model: Option<String>,
    /// System prompt override; leave None to use the built-in prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_retries: default_max_retries(),
            retry_base_secs: default_retry_base_secs(),
            skip_prompt: false,
            false_stop_check: true,
            subagent_token_budget: default_subagent_token_budget(),
            subagent_provider: None,
            subagent_model: None,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Automatically approve shell commands matching these glob patterns
    pub auto_approve_patterns: Vec<String>,
    /// Block shell commands matching these glob patterns
    pub deny_patterns: Vec<String>,
    /// Timeout in seconds for a single tool call
    pub timeout_secs: u64,
    /// Directory holding skill playbooks (markdown with front-matter)
    pub skills_dir: Option<String>,
    /// Search API key for the web_search tool (also via LEDIT_SEARCH_API_KEY)
    pub search_api_key: Option<String>,
    /// Default maximum characters for fetch_url
    #[serde(default = "default_fetch_max_chars")]
    pub fetch_max_chars: usize,
}

fn default_fetch_max_chars() -> usize {
    50_000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: vec![
                "cat *".into(),
                "ls *".into(),
                "find *".into(),
                "rg *".into(),
                "grep *".into(),
                "git status*".into(),
                "git log*".into(),
                "git diff*".into(),
            ],
            deny_patterns: vec!["rm -rf /*".into(), "dd if=*".into()],
            timeout_secs: 30,
            skills_dir: None,
            search_api_key: None,
            fetch_max_chars: default_fetch_max_chars(),
        }
    }
}

fn default_prune_threshold() -> f32 {
    0.85
}
fn default_recent_to_keep() -> usize {
    10
}
fn default_sliding_window() -> usize {
    30
}
fn default_min_messages_to_keep() -> usize {
    5
}
fn default_aggressive_keep_recent() -> usize {
    8
}
fn default_truncate_chars() -> usize {
    1200
}

/// Strategy used when pruning the conversation.
///
/// `Adaptive` (default) picks between aggressive compaction, hybrid
/// dedupe-plus-importance, dedupe-plus-sliding-window, and pure importance
/// scoring based on the shape of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PruneStrategy {
    SlidingWindow,
    Importance,
    Hybrid,
    #[default]
    Adaptive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningConfig {
    #[serde(default)]
    pub strategy: PruneStrategy,
    /// Context fraction at which pruning triggers (0.0–1.0)
    #[serde(default = "default_prune_threshold")]
    pub threshold: f32,
    /// Number of most-recent messages always preserved by importance pruning
    #[serde(default = "default_recent_to_keep")]
    pub recent_to_keep: usize,
    /// Window size for the sliding-window strategy
    #[serde(default = "default_sliding_window")]
    pub sliding_window: usize,
    /// Pruning never reduces the history below this many messages
    /// (when the history had at least that many)
    #[serde(default = "default_min_messages_to_keep")]
    pub min_messages_to_keep: usize,
    /// Messages kept verbatim by aggressive compaction
    #[serde(default = "default_aggressive_keep_recent")]
    pub aggressive_keep_recent: usize,
    /// Character cap applied to older messages by aggressive compaction
    #[serde(default = "default_truncate_chars")]
    pub truncate_chars: usize,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            strategy: PruneStrategy::default(),
            threshold: default_prune_threshold(),
            recent_to_keep: default_recent_to_keep(),
            sliding_window: default_sliding_window(),
            min_messages_to_keep: default_min_messages_to_keep(),
            aggressive_keep_recent: default_aggressive_keep_recent(),
            truncate_chars: default_truncate_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub provider: String,
    pub model: String,
    /// Path to a markdown file whose body becomes the persona system prompt
    pub system_prompt_path: Option<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
