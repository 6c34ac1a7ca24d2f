// SPDX-License-Identifier: Apache-2.0
//! Session-wide token and cost accounting.
//!
//! One tracking path: every provider call — main loop, planner, editor,
//! sub-agents, vision — lands in [`SessionMetrics::track`] under the shared
//! session mutex, so totals sum correctly even when sub-agents report
//! concurrently.

use serde::{Deserialize, Serialize};

use ledit_model::TokenUsage;

/// Fallback per-token rates used when the provider reports no cost.
/// Not a billing source — only keeps relative cost accounting meaningful.
const DEFAULT_PROMPT_RATE: f64 = 3.0e-6;
const DEFAULT_COMPLETION_RATE: f64 = 15.0e-6;

/// Which part of the engine issued a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsagePhase {
    Intent,
    Planning,
    Progress,
    Codegen,
    Validation,
}

/// Prompt/completion split plus cost for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

/// Per-phase roll-up of token usage across the whole agent session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentTokenUsage {
    pub intent: PhaseUsage,
    pub planning: PhaseUsage,
    pub progress: PhaseUsage,
    pub codegen: PhaseUsage,
    pub validation: PhaseUsage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cached_tokens: u64,
    pub total_cost: f64,
    pub cached_cost_savings: f64,
    pub phases: AgentTokenUsage,
}

impl SessionMetrics {
    /// Record one provider call.  A `None` usage is a no-op, as is a usage
    /// with zero total — callers never need to guard.
    pub fn track(&mut self, phase: UsagePhase, usage: Option<&TokenUsage>) {
        let Some(u) = usage else { return };
        if u.total_tokens == 0 && u.prompt_tokens == 0 && u.completion_tokens == 0 {
            return;
        }
        let cost = if u.estimated_cost > 0.0 {
            u.estimated_cost
        } else {
            u.prompt_tokens as f64 * DEFAULT_PROMPT_RATE
                + u.completion_tokens as f64 * DEFAULT_COMPLETION_RATE
        };

        self.total_tokens += u.total_tokens;
        self.prompt_tokens += u.prompt_tokens;
        self.completion_tokens += u.completion_tokens;
        self.cached_tokens += u.cached_tokens;
        self.total_cost += cost;
        // Cached prompt tokens are billed at a fraction of the normal rate;
        // record what the cache saved relative to full price.
        self.cached_cost_savings += u.cached_tokens as f64 * DEFAULT_PROMPT_RATE * 0.9;

        let slot = match phase {
            UsagePhase::Intent => &mut self.phases.intent,
            UsagePhase::Planning => &mut self.phases.planning,
            UsagePhase::Progress => &mut self.phases.progress,
            UsagePhase::Codegen => &mut self.phases.codegen,
            UsagePhase::Validation => &mut self.phases.validation,
        };
        slot.prompt_tokens += u.prompt_tokens;
        slot.completion_tokens += u.completion_tokens;
        slot.cost += cost;
    }

    /// Merge a child agent's whole roll-up (used by the sub-agent spawner).
    pub fn absorb(&mut self, other: &SessionMetrics) {
        self.total_tokens += other.total_tokens;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cached_tokens += other.cached_tokens;
        self.total_cost += other.total_cost;
        self.cached_cost_savings += other.cached_cost_savings;
        for (mine, theirs) in [
            (&mut self.phases.intent, &other.phases.intent),
            (&mut self.phases.planning, &other.phases.planning),
            (&mut self.phases.progress, &other.phases.progress),
            (&mut self.phases.codegen, &other.phases.codegen),
            (&mut self.phases.validation, &other.phases.validation),
        ] {
            mine.prompt_tokens += theirs.prompt_tokens;
            mine.completion_tokens += theirs.completion_tokens;
            mine.cost += theirs.cost;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
