// SPDX-License-Identifier: Apache-2.0
//! Conversation pruning: when to shrink the history and how.
//!
//! `should_prune` is a pure threshold check parameterized by the provider's
//! pruning class.  The strategies trade faithfulness for headroom in
//! different ways; `Adaptive` (the default) picks one based on the shape of
//! the conversation.

use tracing::debug;

use ledit_config::{ProviderProfile, PruneStrategy, PruningClass, PruningConfig};
use ledit_model::{estimate, Message, Role};

use crate::optimize::{aggressive_compact, dedupe_tool_results};

/// Absolute token trigger for default-class providers.
const DEFAULT_CLASS_TOKEN_TRIGGER: usize = 85_000;

/// Remaining-headroom triggers for cached-discount providers.
const CACHED_HEADROOM_TOKENS: usize = 20_000;
const CACHED_HEADROOM_FRACTION: f32 = 0.20;

/// Usage fraction above which Adaptive switches to aggressive compaction.
const AGGRESSIVE_USAGE: f32 = 0.90;

#[derive(Debug, Clone)]
pub struct ConversationPruner {
    pub config: PruningConfig,
}

impl ConversationPruner {
    pub fn new(config: PruningConfig) -> Self {
        Self { config }
    }

    /// Decide whether to prune.  Monotone in `current` for a fixed
    /// (`max`, provider class).
    pub fn should_prune(&self, current: usize, max: usize, profile: &ProviderProfile) -> bool {
        if max == 0 {
            return false;
        }
        let fraction = current as f32 / max as f32;
        match profile.pruning_class {
            PruningClass::HighContext => fraction >= self.config.threshold,
            PruningClass::Default => {
                current >= DEFAULT_CLASS_TOKEN_TRIGGER || fraction >= self.config.threshold
            }
            PruningClass::CachedDiscount => {
                let headroom = max.saturating_sub(current);
                headroom <= CACHED_HEADROOM_TOKENS
                    || (headroom as f32 / max as f32) <= CACHED_HEADROOM_FRACTION
            }
        }
    }

    /// Apply the configured strategy.  The system message always survives
    /// and the result never drops below `min_messages_to_keep` when the
    /// input had at least that many messages.
    pub fn prune(&self, messages: Vec<Message>, profile: &ProviderProfile) -> Vec<Message> {
        let original_len = messages.len();
        let original = messages.clone();
        let pruned = match self.config.strategy {
            PruneStrategy::SlidingWindow => self.sliding_window(messages),
            PruneStrategy::Importance => self.importance(messages, profile),
            PruneStrategy::Hybrid => {
                self.importance(dedupe_tool_results(messages), profile)
            }
            PruneStrategy::Adaptive => self.adaptive(messages, profile),
        };
        let result = self.enforce_minimum(pruned, &original);
        debug!(
            strategy = ?self.config.strategy,
            before = original_len,
            after = result.len(),
            "pruned conversation"
        );
        result
    }

    fn sliding_window(&self, messages: Vec<Message>) -> Vec<Message> {
        keep_system_plus_tail(messages, self.config.sliding_window)
    }

    /// Importance-scored pruning: always keep the system message, the first
    /// user query and its response, and the last `recent_to_keep` messages;
    /// fill the middle with the highest-scoring messages until the target
    /// token budget is met.
    fn importance(&self, messages: Vec<Message>, profile: &ProviderProfile) -> Vec<Message> {
        let len = messages.len();
        let recent_from = len.saturating_sub(self.config.recent_to_keep);
        let first_user = messages.iter().position(|m| m.role == Role::User);

        let mut keep = vec![false; len];
        for (i, m) in messages.iter().enumerate() {
            if m.role == Role::System || i >= recent_from {
                keep[i] = true;
            }
        }
        if let Some(fu) = first_user {
            keep[fu] = true;
            // ... and the assistant response that follows it.
            if let Some(resp) = messages[fu + 1..]
                .iter()
                .position(|m| m.role == Role::Assistant)
            {
                keep[fu + 1 + resp] = true;
            }
        }

        let target = self.target_tokens(profile);
        let mut budget: usize = messages
            .iter()
            .enumerate()
            .filter(|(i, _)| keep[*i])
            .map(|(_, m)| m.approx_tokens())
            .sum();

        // Middle candidates by score, best first.
        let mut candidates: Vec<(usize, f32)> = (0..len)
            .filter(|i| !keep[*i])
            .map(|i| (i, score_message(&messages[i], i, len, first_user)))
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(b.0.cmp(&a.0)));

        for (i, _) in candidates {
            let cost = messages[i].approx_tokens();
            if budget + cost > target {
                continue;
            }
            keep[i] = true;
            budget += cost;
        }

        messages
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep[*i])
            .map(|(_, m)| m)
            .collect()
    }

    /// Adaptive selection:
    /// - ≥90% usage → aggressive compaction
    /// - long, tool-heavy conversation → hybrid
    /// - file-read-heavy → dedupe then sliding window
    /// - otherwise importance
    fn adaptive(&self, messages: Vec<Message>, profile: &ProviderProfile) -> Vec<Message> {
        let current = estimate::estimate_messages(&messages);
        let usage = current as f32 / profile.context_window.max(1) as f32;
        let tool_results = messages.iter().filter(|m| m.role == Role::Tool).count();
        let bulky_reads = messages
            .iter()
            .filter(|m| m.role == Role::Tool && m.content.lines().count() > 10)
            .count();

        if usage >= AGGRESSIVE_USAGE {
            return aggressive_compact(
                messages,
                self.config.aggressive_keep_recent,
                self.config.truncate_chars,
            );
        }
        if messages.len() > 50 && tool_results > 10 {
            return self.importance(dedupe_tool_results(messages), profile);
        }
        if bulky_reads > 5 {
            return keep_system_plus_tail(
                dedupe_tool_results(messages),
                self.config.sliding_window,
            );
        }
        self.importance(messages, profile)
    }

    /// Target token budget for importance pruning: ~85% of the window for
    /// high-context providers, ~60% of a 100K reference otherwise.
    fn target_tokens(&self, profile: &ProviderProfile) -> usize {
        match profile.pruning_class {
            PruningClass::HighContext => (profile.context_window as f32 * 0.85) as usize,
            _ => 60_000,
        }
    }

    /// Post-invariant: never drop below `min_messages_to_keep` (when the
    /// original had that many) — pad with the most recent messages.
    fn enforce_minimum(&self, pruned: Vec<Message>, original: &[Message]) -> Vec<Message> {
        let min = self.config.min_messages_to_keep;
        if pruned.len() >= min || original.len() < min {
            return pruned;
        }
        // Rebuild: system messages plus the most recent originals.
        let mut result: Vec<Message> = original
            .iter()
            .filter(|m| m.role == Role::System)
            .cloned()
            .collect();
        let tail_needed = min.saturating_sub(result.len());
        let tail: Vec<Message> = original
            .iter()
            .rev()
            .filter(|m| m.role != Role::System)
            .take(tail_needed)
            .cloned()
            .collect();
        result.extend(tail.into_iter().rev());
        result
    }
}

fn keep_system_plus_tail(messages: Vec<Message>, window: usize) -> Vec<Message> {
    let len = messages.len();
    let tail_from = len.saturating_sub(window);
    messages
        .into_iter()
        .enumerate()
        .filter(|(i, m)| m.role == Role::System || *i >= tail_from)
        .map(|(_, m)| m)
        .collect()
}

/// Importance score in [0, 1].  Additive factors, capped.
fn score_message(msg: &Message, idx: usize, total: usize, first_user: Option<usize>) -> f32 {
    let age = total - idx; // 1 = newest
    let mut score: f32 = match msg.role {
        Role::System => 1.0,
        Role::User => {
            if first_user == Some(idx) {
                0.9
            } else {
                0.6
            }
        }
        Role::Tool => {
            if age <= 5 {
                0.7
            } else {
                0.3
            }
        }
        Role::Assistant => 0.4 + if age <= 5 { 0.2 } else { 0.0 },
    };
    let lower = msg.content.to_lowercase();
    if lower.contains("error") || lower.contains("failed") {
        score += 0.8;
    }
    score.min(1.0)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ledit_config::ProviderProfile;

    fn profile(tag: &str) -> ProviderProfile {
        ProviderProfile::for_provider(tag, "some-model")
    }

    fn pruner(strategy: PruneStrategy) -> ConversationPruner {
        ConversationPruner::new(PruningConfig {
            strategy,
            ..PruningConfig::default()
        })
    }

    fn conversation(n: usize) -> Vec<Message> {
        let mut msgs = vec![Message::system("system prompt")];
        msgs.push(Message::user("first question"));
        msgs.push(Message::assistant("first answer"));
        for i in 0..n {
            msgs.push(Message::user(format!("question {i}")));
            msgs.push(Message::assistant(format!("answer {i}")));
        }
        msgs
    }

    // ── should_prune thresholds ───────────────────────────────────────────────

    #[test]
    fn high_context_prunes_at_85_percent() {
        let p = pruner(PruneStrategy::Adaptive);
        let prof = profile("openai");
        let max = 128_000;
        assert!(!p.should_prune(100_000, max, &prof));
        assert!(p.should_prune((max as f32 * 0.85) as usize, max, &prof));
        assert!(p.should_prune(120_000, max, &prof));
    }

    #[test]
    fn default_class_prunes_at_absolute_trigger() {
        let p = pruner(PruneStrategy::Adaptive);
        let prof = profile("ollama"); // Default class
        // below both triggers
        assert!(!p.should_prune(20_000, 1_000_000, &prof));
        // absolute trigger fires even with a huge window
        assert!(p.should_prune(85_000, 1_000_000, &prof));
        // fraction trigger fires with a small window
        assert!(p.should_prune(30_000, 32_768, &prof));
    }

    #[test]
    fn should_prune_is_monotone_in_current() {
        let p = pruner(PruneStrategy::Adaptive);
        for tag in ["openai", "ollama"] {
            let prof = profile(tag);
            let max = 100_000;
            let mut fired = false;
            for current in (0..=max).step_by(1000) {
                let now = p.should_prune(current, max, &prof);
                assert!(!(fired && !now), "monotonicity violated at {current} for {tag}");
                fired = now;
            }
        }
    }

    #[test]
    fn zero_max_never_prunes() {
        let p = pruner(PruneStrategy::Adaptive);
        assert!(!p.should_prune(1_000_000, 0, &profile("openai")));
    }

    // ── Strategies ────────────────────────────────────────────────────────────

    #[test]
    fn sliding_window_keeps_system_and_tail() {
        let mut cfg = PruningConfig::default();
        cfg.strategy = PruneStrategy::SlidingWindow;
        cfg.sliding_window = 6;
        let p = ConversationPruner::new(cfg);
        let msgs = conversation(20);
        let out = p.prune(msgs.clone(), &profile("openai"));
        assert_eq!(out[0].role, Role::System);
        assert!(out.len() <= 7);
        // tail preserved in order
        assert_eq!(out.last().unwrap().content, msgs.last().unwrap().content);
    }

    #[test]
    fn importance_keeps_system_first_query_and_recent() {
        let p = pruner(PruneStrategy::Importance);
        let msgs = conversation(100);
        let out = p.prune(msgs.clone(), &profile("openai"));
        assert_eq!(out[0].role, Role::System);
        assert!(out.iter().any(|m| m.content == "first question"));
        assert!(out.iter().any(|m| m.content == "first answer"));
        assert!(out.iter().any(|m| m.content == "answer 99"));
    }

    #[test]
    fn error_messages_survive_importance_pruning() {
        // Build an oversized conversation so the middle actually gets cut.
        let mut cfg = PruningConfig::default();
        cfg.strategy = PruneStrategy::Importance;
        cfg.recent_to_keep = 4;
        let p = ConversationPruner::new(cfg);
        let mut msgs = vec![Message::system("sys"), Message::user("q"), Message::assistant("a")];
        for i in 0..50 {
            msgs.push(Message::assistant(format!("{i} {}", "pad ".repeat(2000))));
        }
        msgs.insert(20, Message::assistant("error: the build failed here"));
        for i in 0..4 {
            msgs.push(Message::user(format!("recent {i}")));
        }
        let out = p.prune(msgs, &profile("ollama"));
        assert!(
            out.iter().any(|m| m.content.contains("the build failed")),
            "error-bearing message must be retained"
        );
    }

    #[test]
    fn adaptive_at_high_usage_compacts_aggressively() {
        let p = pruner(PruneStrategy::Adaptive);
        let prof = profile("ollama"); // 32K window
        // ~31K tokens of messages → >90% usage
        let mut msgs = vec![Message::system("sys")];
        for _ in 0..31 {
            msgs.push(Message::assistant("x".repeat(4000)));
        }
        let out = p.prune(msgs, &prof);
        assert!(out
            .iter()
            .any(|m| m.content.contains("truncated during compaction")));
    }

    // ── Invariants ────────────────────────────────────────────────────────────

    #[test]
    fn minimum_message_count_is_enforced() {
        let mut cfg = PruningConfig::default();
        cfg.strategy = PruneStrategy::SlidingWindow;
        cfg.sliding_window = 1;
        cfg.min_messages_to_keep = 5;
        let p = ConversationPruner::new(cfg);
        let msgs = conversation(20);
        let out = p.prune(msgs, &profile("openai"));
        assert!(out.len() >= 5);
    }

    #[test]
    fn short_history_is_left_alone_by_minimum() {
        let mut cfg = PruningConfig::default();
        cfg.strategy = PruneStrategy::SlidingWindow;
        cfg.sliding_window = 2;
        cfg.min_messages_to_keep = 10;
        let p = ConversationPruner::new(cfg);
        // only 3 messages — fewer than the minimum, invariant does not apply
        let msgs = vec![
            Message::system("s"),
            Message::user("u"),
            Message::assistant("a"),
        ];
        let out = p.prune(msgs, &profile("openai"));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn system_message_always_retained() {
        for strategy in [
            PruneStrategy::SlidingWindow,
            PruneStrategy::Importance,
            PruneStrategy::Hybrid,
            PruneStrategy::Adaptive,
        ] {
            let p = pruner(strategy);
            let out = p.prune(conversation(50), &profile("openai"));
            assert_eq!(out[0].role, Role::System, "{strategy:?}");
        }
    }
}
