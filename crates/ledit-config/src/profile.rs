// SPDX-License-Identifier: Apache-2.0
//! Per-provider behaviour consolidated into a single value.
//!
//! Pruning thresholds, fast-model selection, request timeouts, worker-pool
//! sizing, and sanitization strictness all vary by provider.  Rather than
//! scattering `match provider` arms through the engine, every consumer asks
//! for a [`ProviderProfile`] once and reads plain fields from it.

use std::time::Duration;

/// How the conversation pruner decides when to fire for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruningClass {
    /// Small or unknown context windows: prune on an absolute token count
    /// as well as a usage fraction.
    Default,
    /// Providers with ≥128K context windows: prune on usage fraction only.
    HighContext,
    /// Providers with discounted cached input: prune when the remaining
    /// headroom (absolute or fractional) gets small.
    CachedDiscount,
}

/// Task category used to scale request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Analysis,
    Documentation,
    Refactoring,
    Creation,
    CodeGeneration,
}

/// Coarse complexity level of the work a single request represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

/// Everything the engine needs to know about a provider, in one value.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    /// Stable provider tag ("openai", "groq", ...)
    pub tag: String,
    /// Context window in tokens
    pub context_window: usize,
    pub pruning_class: PruningClass,
    /// Cheap model used for yes/no checks (false-stop detection)
    pub fast_model: Option<String>,
    /// Base request timeout before task/complexity scaling
    pub timeout_base: Duration,
    /// Worker-pool size for the parallel todo executor
    pub parallel_workers: usize,
    /// Apply the strict exactly-once tool-result pairing pass before
    /// each request (some providers reject anything looser with a 400)
    pub strict_sanitize: bool,
}

impl ProviderProfile {
    /// Resolve the profile for a provider tag.  `model` is consulted only to
    /// detect reasoning models, which get a longer timeout base.
    pub fn for_provider(tag: &str, model: &str) -> Self {
        let reasoning = is_reasoning_model(model);
        match tag {
            "openai" => Self {
                tag: tag.into(),
                context_window: 128_000,
                pruning_class: PruningClass::HighContext,
                fast_model: Some("gpt-4o-mini".into()),
                timeout_base: Duration::from_secs(if reasoning { 300 } else { 120 }),
                parallel_workers: 4,
                strict_sanitize: true,
            },
            "groq" => Self {
                tag: tag.into(),
                context_window: 131_072,
                pruning_class: PruningClass::HighContext,
                fast_model: Some("llama-3.1-8b-instant".into()),
                timeout_base: Duration::from_secs(if reasoning { 300 } else { 60 }),
                parallel_workers: 5,
                strict_sanitize: true,
            },
            "deepinfra" => Self {
                tag: tag.into(),
                context_window: 128_000,
                pruning_class: PruningClass::HighContext,
                fast_model: None,
                timeout_base: Duration::from_secs(if reasoning { 300 } else { 180 }),
                parallel_workers: 2,
                strict_sanitize: false,
            },
            "ollama" => Self {
                tag: tag.into(),
                context_window: 32_768,
                pruning_class: PruningClass::Default,
                fast_model: None,
                timeout_base: Duration::from_secs(300),
                parallel_workers: 3,
                strict_sanitize: false,
            },
            _ => Self {
                tag: tag.into(),
                context_window: 100_000,
                pruning_class: PruningClass::Default,
                fast_model: None,
                timeout_base: Duration::from_secs(if reasoning { 300 } else { 120 }),
                parallel_workers: 3,
                strict_sanitize: false,
            },
        }
    }
}

/// Reasoning-tuned models think before answering and need the long timeout
/// base regardless of provider.
fn is_reasoning_model(model: &str) -> bool {
    let m = model.to_lowercase();
    m.starts_with("o1") || m.starts_with("o3") || m.contains("-r1") || m.contains("reasoner") || m.contains("qwq")
}

/// Deadline for one external call: provider base scaled by what the call is
/// for and how hard it is.
pub fn smart_timeout(profile: &ProviderProfile, task: TaskType, complexity: Complexity) -> Duration {
    let task_factor = match task {
        TaskType::Analysis => 0.75,
        TaskType::Documentation => 1.5,
        TaskType::Refactoring => 1.25,
        TaskType::Creation => 1.25,
        TaskType::CodeGeneration => 1.0,
    };
    let complexity_factor = match complexity {
        Complexity::Simple => 0.6,
        Complexity::Moderate => 1.0,
        Complexity::Complex => 1.5,
        Complexity::VeryComplex => 2.0,
    };
    let secs = profile.timeout_base.as_secs_f64() * task_factor * complexity_factor;
    Duration::from_secs_f64(secs)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
