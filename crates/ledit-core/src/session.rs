// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ledit_model::{estimate, Message, Role};

/// Prefix of the synthetic system message holding a custom session name.
pub const SESSION_NAME_PREFIX: &str = "[SESSION_NAME:]";

/// Maximum stored length of the compact summary.
pub const COMPACT_SUMMARY_LIMIT: usize = 5_000;

/// One recorded agent action, kept for sub-agent context and state export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub details: String,
}

/// In-memory conversation session: the message log plus the summaries and
/// action trail that survive state save/load.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    pub previous_summary: String,
    pub compact_summary: String,
    pub task_actions: Vec<TaskAction>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            previous_summary: String::new(),
            compact_summary: String::new(),
            task_actions: Vec::new(),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    /// Approximate token footprint of the current message log.
    pub fn token_estimate(&self) -> usize {
        estimate::estimate_messages(&self.messages)
    }

    pub fn record_action(
        &mut self,
        kind: impl Into<String>,
        description: impl Into<String>,
        details: impl Into<String>,
    ) {
        self.task_actions.push(TaskAction {
            kind: kind.into(),
            description: description.into(),
            details: details.into(),
        });
    }

    /// The most recent `n` actions, oldest first.
    pub fn recent_actions(&self, n: usize) -> &[TaskAction] {
        let start = self.task_actions.len().saturating_sub(n);
        &self.task_actions[start..]
    }

    /// Store the compact summary, enforcing the size limit.
    pub fn set_compact_summary(&mut self, summary: impl Into<String>) {
        let mut s: String = summary.into();
        if s.len() > COMPACT_SUMMARY_LIMIT {
            s.truncate(COMPACT_SUMMARY_LIMIT);
        }
        self.compact_summary = s;
    }

    /// Set a custom session name (stored as a synthetic system message).
    pub fn set_name(&mut self, name: &str) {
        let tagged = format!("{SESSION_NAME_PREFIX}{name}");
        if let Some(existing) = self.messages.iter_mut().find(|m| {
            m.role == Role::System && m.content.starts_with(SESSION_NAME_PREFIX)
        }) {
            existing.content = tagged;
        } else {
            self.messages.push(Message::system(tagged));
        }
    }

    /// The session name: the custom name when set, otherwise derived from
    /// the first user message (capped at 60 chars with an ellipsis).
    pub fn name(&self) -> Option<String> {
        if let Some(named) = self.messages.iter().find_map(|m| {
            (m.role == Role::System)
                .then(|| m.content.strip_prefix(SESSION_NAME_PREFIX))
                .flatten()
        }) {
            return Some(named.to_string());
        }
        let first_user = self
            .messages
            .iter()
            .find(|m| m.role == Role::User)?
            .content
            .trim();
        if first_user.is_empty() {
            return None;
        }
        if first_user.chars().count() <= 60 {
            Some(first_user.to_string())
        } else {
            let head: String = first_user.chars().take(60).collect();
            Some(format!("{head}…"))
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
