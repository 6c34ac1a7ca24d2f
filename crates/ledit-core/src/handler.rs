// SPDX-License-Identifier: Apache-2.0
//! The iterative conversation loop.
//!
//! One call to [`ConversationHandler::run`] drives the model until it
//! finishes the task: send messages → parse the response (falling back to
//! text extraction when the provider emitted no structured calls) → execute
//! tools → sanitize and append history → prune if needed → decide whether
//! to stop.  Blank responses and announce-without-act "false stops" get a
//! corrective nudge instead of ending the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use ledit_config::{AgentConfig, ProviderProfile};
use ledit_model::{
    sanitize, FallbackParser, Message, MessageSender, Role, ToolSchema,
};
use ledit_tools::{ToolCall, ToolRegistry};

use crate::events::AgentEvent;
use crate::metrics::{SessionMetrics, UsagePhase};
use crate::prune::ConversationPruner;
use crate::session::Session;

/// Explicit completion marker the model may emit.
pub const TASK_COMPLETE_MARKER: &str = "[[TASK_COMPLETE]]";

/// Reminder appended after a blank iteration.
const BLANK_TURN_REMINDER: &str = "You provided no content. Either call a tool to \
     continue working, or finish the task and emit [[TASK_COMPLETE]] at the end \
     of your final message.";

/// Consecutive blank iterations tolerated before giving up.
const MAX_BLANK_TURNS: u32 = 3;

/// False-stop screening only applies to short responses in early turns.
const FALSE_STOP_MAX_LEN: usize = 150;
const FALSE_STOP_MAX_ITERATION: u32 = 10;

/// Result of one `run` invocation.
#[derive(Debug, Clone, Default)]
pub struct TurnReport {
    pub final_text: String,
    pub iterations: u32,
    pub tools_executed: u32,
    pub files_modified: bool,
    /// Set when the explicit completion marker was seen.
    pub explicit_complete: bool,
}

pub struct ConversationHandler {
    sender: Arc<MessageSender>,
    /// Cheap model for the false-stop yes/no check; absent on providers
    /// without a configured fast model.
    fast_sender: Option<Arc<MessageSender>>,
    registry: Arc<ToolRegistry>,
    pruner: ConversationPruner,
    profile: ProviderProfile,
    config: Arc<AgentConfig>,
    metrics: Arc<Mutex<SessionMetrics>>,
    parser: FallbackParser,
    phase: UsagePhase,
    events: Option<mpsc::Sender<AgentEvent>>,
    /// One-shot user hints injected before the next model call.
    pending_hints: Vec<String>,
    /// Checked before each model call; set by the Ctrl-C handler.
    interrupt: Option<Arc<AtomicBool>>,
}

impl ConversationHandler {
    pub fn new(
        sender: Arc<MessageSender>,
        fast_sender: Option<Arc<MessageSender>>,
        registry: Arc<ToolRegistry>,
        pruner: ConversationPruner,
        profile: ProviderProfile,
        config: Arc<AgentConfig>,
        metrics: Arc<Mutex<SessionMetrics>>,
    ) -> Self {
        let known = registry.names();
        Self {
            sender,
            fast_sender,
            registry,
            pruner,
            profile,
            config,
            metrics,
            parser: FallbackParser::new(known),
            phase: UsagePhase::Progress,
            events: None,
            pending_hints: Vec::new(),
            interrupt: None,
        }
    }

    pub fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }

    /// Attribute subsequent provider calls to this usage phase.
    pub fn set_phase(&mut self, phase: UsagePhase) {
        self.phase = phase;
    }

    pub fn set_events(&mut self, tx: mpsc::Sender<AgentEvent>) {
        self.events = Some(tx);
    }

    /// Queue a one-shot hint delivered as a user message before the next
    /// model call.
    pub fn queue_hint(&mut self, hint: impl Into<String>) {
        self.pending_hints.push(hint.into());
    }

    async fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Run the loop against `session` until the model completes the task,
    /// the blank-turn tolerance is exhausted, or `max_iterations` is hit.
    ///
    /// `system_prompt` is prepended when the session does not start with a
    /// system message.
    pub async fn run(
        &mut self,
        session: &mut Session,
        system_prompt: &str,
    ) -> anyhow::Result<TurnReport> {
        if session.messages.first().map(|m| m.role) != Some(Role::System) {
            session.messages.insert(0, Message::system(system_prompt));
        }
        for hint in self.pending_hints.drain(..) {
            session.push(Message::user(hint));
        }

        let schemas: Vec<ToolSchema> = self.registry.schemas();
        let mut report = TurnReport::default();
        let mut blank_streak = 0u32;

        loop {
            if let Some(flag) = &self.interrupt {
                if flag.load(Ordering::Relaxed) {
                    warn!("stopping: interrupted by user");
                    break;
                }
            }
            report.iterations += 1;
            if report.iterations > self.config.max_iterations {
                warn!(
                    iterations = report.iterations,
                    "stopping: iteration budget exhausted"
                );
                break;
            }

            // ── Send ─────────────────────────────────────────────────────────
            session.messages = sanitize::sanitize(std::mem::take(&mut session.messages));
            if self.profile.strict_sanitize {
                session.messages = sanitize::strict_sanitize(std::mem::take(&mut session.messages));
            }
            let outcome = self.sender.send(&session.messages, &schemas, None).await?;
            self.metrics
                .lock()
                .expect("metrics mutex poisoned")
                .track(self.phase, Some(&outcome.usage));

            let mut assistant = outcome.message;

            // ── Fallback parse ───────────────────────────────────────────────
            if assistant.tool_calls.is_empty()
                && FallbackParser::should_use_fallback(&assistant.content, false)
            {
                let parsed = self.parser.parse(&assistant.content);
                if !parsed.calls.is_empty() {
                    debug!(calls = parsed.calls.len(), "recovered tool calls from text");
                    assistant.content = parsed.cleaned;
                    assistant.tool_calls = parsed.calls;
                }
                for w in parsed.warnings {
                    warn!("fallback parser: {w}");
                }
            }

            // ── Blank iteration ─────────────────────────────────────────────
            if assistant.is_blank() {
                blank_streak += 1;
                session.push(assistant);
                if blank_streak >= MAX_BLANK_TURNS {
                    warn!("stopping after {blank_streak} consecutive blank responses");
                    break;
                }
                session.push(Message::user(BLANK_TURN_REMINDER));
                continue;
            }
            blank_streak = 0;

            let had_tool_calls = !assistant.tool_calls.is_empty();
            let content = assistant.content.clone();
            let calls = assistant.tool_calls.clone();
            session.push(assistant);
            if !content.is_empty() {
                self.emit(AgentEvent::TextComplete(content.clone())).await;
            }

            // ── Execute tools ────────────────────────────────────────────────
            if had_tool_calls {
                for call_ref in &calls {
                    let call = ToolCall {
                        id: call_ref.id.clone(),
                        name: call_ref.function.name.clone(),
                        args: call_ref.parsed_args(),
                    };
                    self.emit(AgentEvent::ToolCallStarted {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                    })
                    .await;

                    let output = self.registry.execute(&call).await;
                    report.tools_executed += 1;
                    if !output.affected_files.is_empty() {
                        report.files_modified = true;
                    }
                    if let Some(usage) = &output.usage {
                        self.metrics
                            .lock()
                            .expect("metrics mutex poisoned")
                            .track(self.phase, Some(usage));
                    }

                    self.emit(AgentEvent::ToolCallFinished {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        output: output.content.clone(),
                        is_error: output.is_error,
                    })
                    .await;

                    session.push(Message::tool_result(&call.id, &output.content));
                }

                self.prune_if_needed(session).await;
                continue;
            }

            // ── Terminal detection (plain text, no tool calls) ──────────────
            self.prune_if_needed(session).await;

            if content.contains(TASK_COMPLETE_MARKER) {
                report.explicit_complete = true;
                report.final_text = content.replace(TASK_COMPLETE_MARKER, "").trim().to_string();
                break;
            }

            if self.looks_like_false_stop(&content, report.iterations).await {
                debug!("false stop detected; nudging the model to continue");
                session.push(Message::user(
                    "You announced an action without performing it. Continue and \
                     actually do the work, or emit [[TASK_COMPLETE]] if everything \
                     is already done.",
                ));
                continue;
            }

            report.final_text = content;
            break;
        }

        self.emit(AgentEvent::TurnComplete).await;
        Ok(report)
    }

    async fn prune_if_needed(&self, session: &mut Session) {
        let current = session.token_estimate();
        if !self
            .pruner
            .should_prune(current, self.profile.context_window, &self.profile)
        {
            return;
        }
        let before_msgs = session.messages.len();
        let pruned = self
            .pruner
            .prune(std::mem::take(&mut session.messages), &self.profile);
        // Pruning can orphan tool results; always re-sanitize afterwards.
        session.messages = sanitize::sanitize(pruned);
        let after = session.token_estimate();
        self.emit(AgentEvent::Pruned {
            messages_before: before_msgs,
            messages_after: session.messages.len(),
            tokens_before: current,
            tokens_after: after,
        })
        .await;
    }

    /// Announce-without-act detection for short early responses, optionally
    /// confirmed by the provider's fast model.
    async fn looks_like_false_stop(&self, content: &str, iteration: u32) -> bool {
        if !self.config.false_stop_check {
            return false;
        }
        if content.len() >= FALSE_STOP_MAX_LEN || iteration >= FALSE_STOP_MAX_ITERATION {
            return false;
        }
        let lower = content.to_lowercase();
        if lower.contains("error") {
            return false;
        }
        const ANNOUNCE_PATTERNS: &[&str] = &[
            "i'll examine",
            "i'll check",
            "i'll look",
            "i'll start",
            "i will examine",
            "i will check",
            "let me check",
            "let me examine",
            "let me look",
            "let me start",
        ];
        if !ANNOUNCE_PATTERNS.iter().any(|p| lower.contains(p)) {
            return false;
        }

        // Pattern matched; confirm with the fast model when one exists,
        // otherwise trust the heuristic.
        let Some(fast) = &self.fast_sender else {
            return true;
        };
        let question = vec![
            Message::system(
                "You judge whether an assistant response completed its task. \
                 Reply with exactly COMPLETE or INCOMPLETE.",
            ),
            Message::user(format!(
                "The assistant replied:\n\"{content}\"\n\
                 It announced an action. Did it actually perform the task?"
            )),
        ];
        match fast.send(&question, &[], None).await {
            Ok(outcome) => {
                self.metrics
                    .lock()
                    .expect("metrics mutex poisoned")
                    .track(self.phase, Some(&outcome.usage));
                outcome.message.content.to_uppercase().contains("INCOMPLETE")
            }
            Err(e) => {
                warn!("false-stop check failed ({e}); accepting the stop");
                false
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ledit_config::{AgentConfig, PruningConfig};
    use ledit_model::{ResponseEvent, ScriptedMockProvider, TokenUsage};
    use ledit_tools::{TodoReadTool, Workspace};

    fn profile() -> ProviderProfile {
        ProviderProfile::for_provider("mock", "mock-model")
    }

    fn registry_with_read_file(dir: &std::path::Path) -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(ledit_tools::ReadFileTool {
            workspace: Workspace::new(dir),
        });
        let todos = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        reg.register(TodoReadTool::new(todos));
        Arc::new(reg)
    }

    fn handler_with(
        provider: ScriptedMockProvider,
        registry: Arc<ToolRegistry>,
    ) -> ConversationHandler {
        ConversationHandler::new(
            Arc::new(MessageSender::new(Arc::new(provider), true)),
            None,
            registry,
            ConversationPruner::new(PruningConfig::default()),
            profile(),
            Arc::new(AgentConfig::default()),
            Arc::new(Mutex::new(SessionMetrics::default())),
        )
    }

    fn text_script(text: &str) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::TextDelta(text.into()),
            ResponseEvent::Usage(TokenUsage::new(10, 5)),
            ResponseEvent::Done,
        ]
    }

    fn session_with_intent(intent: &str) -> Session {
        let mut s = Session::new();
        s.push(Message::user(intent));
        s
    }

    #[tokio::test]
    async fn plain_completion_stops_and_returns_text() {
        let dir = tempfile::tempdir().unwrap();
        let provider =
            ScriptedMockProvider::new(vec![text_script("All done. [[TASK_COMPLETE]]")]);
        let mut h = handler_with(provider, registry_with_read_file(dir.path()));
        let mut session = session_with_intent("do the thing");

        let report = h.run(&mut session, "system").await.unwrap();
        assert!(report.explicit_complete);
        assert_eq!(report.final_text, "All done.");
        assert_eq!(report.iterations, 1);
    }

    #[tokio::test]
    async fn system_prompt_is_prepended_once() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedMockProvider::new(vec![text_script("done [[TASK_COMPLETE]]")]);
        let mut h = handler_with(provider, registry_with_read_file(dir.path()));
        let mut session = session_with_intent("x");
        h.run(&mut session, "the system prompt").await.unwrap();
        assert_eq!(session.messages[0].role, Role::System);
        assert_eq!(session.messages[0].content, "the system prompt");
        assert_eq!(
            session
                .messages
                .iter()
                .filter(|m| m.role == Role::System)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn blank_turn_gets_reminder_and_does_not_stop() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedMockProvider::new(vec![
            text_script("   \n\t  "),
            text_script("Actually finished. [[TASK_COMPLETE]]"),
        ]);
        let mut h = handler_with(provider, registry_with_read_file(dir.path()));
        let mut session = session_with_intent("task");

        let report = h.run(&mut session, "sys").await.unwrap();
        assert!(report.explicit_complete, "loop must continue past the blank turn");

        let reminders: Vec<&Message> = session
            .messages
            .iter()
            .filter(|m| m.role == Role::User && m.content.contains("You provided no content."))
            .collect();
        assert_eq!(reminders.len(), 1, "exactly one reminder");
        assert!(reminders[0].content.contains("[[TASK_COMPLETE]]"));
        assert!(!session
            .messages
            .iter()
            .any(|m| m.content.contains("Use the exact tool name")));
    }

    #[tokio::test]
    async fn tool_call_executes_and_loop_continues() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "file body").unwrap();
        let provider = ScriptedMockProvider::tool_then_text(
            "call-1",
            "read_file",
            r#"{"path":"hello.txt"}"#,
            "Read it. [[TASK_COMPLETE]]",
        );
        let mut h = handler_with(provider, registry_with_read_file(dir.path()));
        let mut session = session_with_intent("read hello.txt");

        let report = h.run(&mut session, "sys").await.unwrap();
        assert_eq!(report.tools_executed, 1);
        assert!(report.explicit_complete);
        let tool_msg = session
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool result recorded");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call-1"));
        assert!(tool_msg.content.contains("file body"));
    }

    #[tokio::test]
    async fn xml_fallback_call_is_recovered_and_executed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let provider = ScriptedMockProvider::new(vec![
            text_script(
                "Reading now:\n<function=read_file><parameter=path>a.txt</parameter></function>",
            ),
            text_script("Got it. [[TASK_COMPLETE]]"),
        ]);
        let mut h = handler_with(provider, registry_with_read_file(dir.path()));
        let mut session = session_with_intent("read a.txt");

        let report = h.run(&mut session, "sys").await.unwrap();
        assert_eq!(report.tools_executed, 1);
        // the assistant message was cleaned of the XML block
        let assistant = session
            .messages
            .iter()
            .find(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
            .unwrap();
        assert_eq!(assistant.content, "Reading now:");
        assert!(session
            .messages
            .iter()
            .any(|m| m.role == Role::Tool && m.content.contains("alpha")));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_result_and_loop_adapts() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedMockProvider::tool_then_text(
            "c1",
            "exec",
            r#"{"command":"ls"}"#,
            "ok [[TASK_COMPLETE]]",
        );
        let mut h = handler_with(provider, registry_with_read_file(dir.path()));
        let mut session = session_with_intent("list");
        let report = h.run(&mut session, "sys").await.unwrap();
        assert!(report.explicit_complete);
        let tool_msg = session.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn false_stop_heuristic_nudges_without_fast_model() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedMockProvider::new(vec![
            text_script("I'll examine the codebase."),
            text_script("Examined everything; summary follows. [[TASK_COMPLETE]]"),
        ]);
        let mut h = handler_with(provider, registry_with_read_file(dir.path()));
        let mut session = session_with_intent("analyze");

        let report = h.run(&mut session, "sys").await.unwrap();
        assert!(report.explicit_complete);
        assert!(session
            .messages
            .iter()
            .any(|m| m.content.contains("announced an action")));
    }

    #[tokio::test]
    async fn false_stop_confirmed_complete_by_fast_model_stops() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedMockProvider::new(vec![text_script("Let me check — done already.")]);
        let fast = ScriptedMockProvider::new(vec![text_script("COMPLETE")]);
        let mut h = ConversationHandler::new(
            Arc::new(MessageSender::new(Arc::new(provider), true)),
            Some(Arc::new(MessageSender::new(Arc::new(fast), true))),
            registry_with_read_file(dir.path()),
            ConversationPruner::new(PruningConfig::default()),
            profile(),
            Arc::new(AgentConfig::default()),
            Arc::new(Mutex::new(SessionMetrics::default())),
        );
        let mut session = session_with_intent("quick question");
        let report = h.run(&mut session, "sys").await.unwrap();
        assert_eq!(report.iterations, 1);
        assert!(report.final_text.contains("done already"));
    }

    #[tokio::test]
    async fn long_responses_are_never_false_stops() {
        let dir = tempfile::tempdir().unwrap();
        let long = format!("I'll examine this thoroughly. {}", "detail ".repeat(40));
        let provider = ScriptedMockProvider::new(vec![text_script(&long)]);
        let mut h = handler_with(provider, registry_with_read_file(dir.path()));
        let mut session = session_with_intent("go");
        let report = h.run(&mut session, "sys").await.unwrap();
        assert_eq!(report.iterations, 1, "long response stops normally");
    }

    #[tokio::test]
    async fn metrics_accumulate_across_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedMockProvider::tool_then_text(
            "c1",
            "todo_read",
            "{}",
            "done [[TASK_COMPLETE]]",
        );
        let metrics = Arc::new(Mutex::new(SessionMetrics::default()));
        let mut h = ConversationHandler::new(
            Arc::new(MessageSender::new(Arc::new(provider), true)),
            None,
            registry_with_read_file(dir.path()),
            ConversationPruner::new(PruningConfig::default()),
            profile(),
            Arc::new(AgentConfig::default()),
            metrics.clone(),
        );
        let mut session = session_with_intent("x");
        h.run(&mut session, "sys").await.unwrap();
        // two provider calls at 15 total tokens each
        assert_eq!(metrics.lock().unwrap().total_tokens, 30);
    }

    #[tokio::test]
    async fn queued_hint_is_delivered_before_first_call() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedMockProvider::new(vec![text_script("ok [[TASK_COMPLETE]]")]);
        let mut h = handler_with(provider, registry_with_read_file(dir.path()));
        h.queue_hint("remember: tests must pass");
        let mut session = session_with_intent("x");
        h.run(&mut session, "sys").await.unwrap();
        assert!(session
            .messages
            .iter()
            .any(|m| m.role == Role::User && m.content.contains("tests must pass")));
    }
}
