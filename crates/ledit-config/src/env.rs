// SPDX-License-Identifier: Apache-2.0
//! Recognised environment variables, read once into a plain struct.

/// Process-level flags controlling agent behaviour.
#[derive(Debug, Clone, Default)]
pub struct EnvFlags {
    /// LEDIT_BASE_CONTEXT_DISABLE — skip the workspace base-context scan
    pub base_context_disabled: bool,
    /// LEDIT_CI_MODE, CI, or GITHUB_ACTIONS — disable ANSI cursor control
    pub ci_mode: bool,
    /// LEDIT_FROM_AGENT=1 — this process is itself a sub-agent; security
    /// errors must propagate non-retryably
    pub from_agent: bool,
    /// LEDIT_SKIP_PROMPT — force non-interactive execution
    pub skip_prompt: bool,
    /// LEDIT_TEST_ENV — test-mode marker
    pub test_env: bool,
}

impl EnvFlags {
    pub fn from_env() -> Self {
        Self {
            base_context_disabled: set("LEDIT_BASE_CONTEXT_DISABLE"),
            ci_mode: set("LEDIT_CI_MODE") || set("CI") || set("GITHUB_ACTIONS"),
            from_agent: std::env::var("LEDIT_FROM_AGENT").map(|v| v == "1").unwrap_or(false),
            skip_prompt: set("LEDIT_SKIP_PROMPT"),
            test_env: set("LEDIT_TEST_ENV"),
        }
    }
}

fn set(name: &str) -> bool {
    std::env::var(name).map(|v| !v.is_empty()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags_are_all_off() {
        let f = EnvFlags::default();
        assert!(!f.base_context_disabled);
        assert!(!f.ci_mode);
        assert!(!f.from_agent);
        assert!(!f.skip_prompt);
        assert!(!f.test_env);
    }

    #[test]
    fn from_agent_requires_exact_one() {
        // Construct directly rather than mutating process env (tests run in
        // parallel and env vars are process-global).
        std::env::remove_var("LEDIT_FROM_AGENT");
        let f = EnvFlags::from_env();
        assert!(!f.from_agent);
    }
}
