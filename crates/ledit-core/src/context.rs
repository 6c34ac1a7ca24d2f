// SPDX-License-Identifier: Apache-2.0
//! Knowledge accumulated across todos within a session.
//!
//! Analysis todos produce findings; later todos are re-prioritized by how
//! strongly recent findings relate to them (see the planner's scoring).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Score contribution when a finding relates to a pending todo.
    pub fn priority_bonus(self) -> i64 {
        match self {
            Severity::Critical => 20,
            Severity::High => 12,
            Severity::Medium => 6,
            Severity::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo_id: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub category: String,
    pub title: String,
    #[serde(default)]
    pub related_files: Vec<String>,
}

/// Accumulation across todos: findings, knowledge, and observed code
/// patterns.  Owned by the facade; the planner reads and extends it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistentContext {
    pub findings: Vec<Finding>,
    pub knowledge: Vec<KnowledgeItem>,
    pub code_patterns: Vec<String>,
}

impl PersistentContext {
    pub fn add_finding(
        &mut self,
        kind: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        file_path: Option<String>,
        todo_id: Option<u32>,
    ) {
        self.findings.push(Finding {
            kind: kind.into(),
            severity,
            title: title.into(),
            description: description.into(),
            file_path,
            todo_id,
            timestamp: Utc::now(),
        });
    }

    /// The most recent `n` findings, newest last.
    pub fn recent_findings(&self, n: usize) -> &[Finding] {
        let start = self.findings.len().saturating_sub(n);
        &self.findings[start..]
    }

    /// Compact text block for rollover into planning prompts.
    pub fn rollover_summary(&self, max_findings: usize) -> String {
        let mut out = String::new();
        for f in self.recent_findings(max_findings) {
            out.push_str(&format!(
                "- [{:?}] {}{}\n",
                f.severity,
                f.title,
                f.file_path
                    .as_deref()
                    .map(|p| format!(" ({p})"))
                    .unwrap_or_default()
            ));
        }
        for k in self.knowledge.iter().rev().take(5) {
            out.push_str(&format!("- known: {} [{}]\n", k.title, k.category));
        }
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_bonuses_match_ranking() {
        assert_eq!(Severity::Critical.priority_bonus(), 20);
        assert_eq!(Severity::High.priority_bonus(), 12);
        assert_eq!(Severity::Medium.priority_bonus(), 6);
        assert_eq!(Severity::Low.priority_bonus(), 3);
    }

    #[test]
    fn recent_findings_returns_tail() {
        let mut ctx = PersistentContext::default();
        for i in 0..10 {
            ctx.add_finding("bug", Severity::Low, format!("f{i}"), "", None, None);
        }
        let recent = ctx.recent_findings(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[2].title, "f9");
    }

    #[test]
    fn rollover_summary_mentions_findings_and_files() {
        let mut ctx = PersistentContext::default();
        ctx.add_finding(
            "bug",
            Severity::High,
            "panic in parser",
            "details",
            Some("src/parse.rs".into()),
            Some(2),
        );
        let summary = ctx.rollover_summary(5);
        assert!(summary.contains("panic in parser"));
        assert!(summary.contains("src/parse.rs"));
    }
}
