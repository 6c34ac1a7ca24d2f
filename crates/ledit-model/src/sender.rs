// SPDX-License-Identifier: Apache-2.0
//! Sends a single LLM request, streaming or not, with retry and backoff.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::backoff::{
    is_rate_limit_error, is_transient_error, wait_with_progress, BackoffPolicy, RateLimitEvent,
};
use crate::provider::ModelProvider;
use crate::types::{
    CompletionRequest, Message, ResponseEvent, Role, TokenUsage, ToolCallRef, ToolSchema,
};

/// The assembled result of one provider call.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: Message,
    pub usage: TokenUsage,
}

type RateLimitHook = dyn Fn(&RateLimitEvent) + Send + Sync;

/// Sends one request at a time against a [`ModelProvider`], applying the
/// retry policy: transient errors back off 1s → 2s → 4s (doubling, with
/// jitter); rate limits follow the [`BackoffPolicy`] schedule; anything else
/// surfaces immediately.  After `max_retries` the last error is returned.
pub struct MessageSender {
    provider: Arc<dyn ModelProvider>,
    policy: BackoffPolicy,
    streaming: bool,
    /// Base for the transient-error schedule (1s by default)
    transient_base: Duration,
    /// Per-call deadline; `None` disables.  A timed-out call surfaces as a
    /// transient error and goes through the normal retry schedule.
    request_timeout: Option<Duration>,
    on_rate_limit: Option<Box<RateLimitHook>>,
    /// Monotonic counter for synthesized tool-call ids (`call_<n>`)
    call_seq: AtomicU64,
}

impl MessageSender {
    pub fn new(provider: Arc<dyn ModelProvider>, streaming: bool) -> Self {
        Self {
            provider,
            policy: BackoffPolicy::default(),
            streaming,
            transient_base: Duration::from_secs(1),
            request_timeout: None,
            on_rate_limit: None,
            call_seq: AtomicU64::new(0),
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Apply a deadline to every provider call (see the smart-timeout
    /// derivation in the config crate).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn on_rate_limit(mut self, hook: impl Fn(&RateLimitEvent) + Send + Sync + 'static) -> Self {
        self.on_rate_limit = Some(Box::new(hook));
        self
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    /// Send `messages` with the given tool schemas.  `on_chunk` receives
    /// each streamed text delta; pass `None` for silent accumulation.
    pub async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        mut on_chunk: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> anyhow::Result<SendOutcome> {
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..=self.policy.max_retries {
            let req = CompletionRequest {
                messages: messages.to_vec(),
                tools: tools.to_vec(),
                stream: self.streaming,
            };
            let attempt_result = match self.request_timeout {
                Some(deadline) => {
                    match tokio::time::timeout(deadline, self.collect_once(req, &mut on_chunk))
                        .await
                    {
                        Ok(r) => r,
                        Err(_) => Err(anyhow::anyhow!(
                            "request timeout after {}s",
                            deadline.as_secs()
                        )),
                    }
                }
                None => self.collect_once(req, &mut on_chunk).await,
            };
            match attempt_result {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < self.policy.max_retries => {
                    let msg = format!("{e:#}");
                    if is_rate_limit_error(&msg) {
                        let event = RateLimitEvent {
                            provider: self.provider.name().to_string(),
                            model: self.provider.model_name().to_string(),
                            total_tokens: 0,
                            error: msg.clone(),
                        };
                        if let Some(hook) = &self.on_rate_limit {
                            hook(&event);
                        }
                        let delay = self.policy.delay_for_attempt(attempt);
                        warn!(attempt, delay_ms = delay.as_millis() as u64, "rate limited; backing off");
                        wait_with_progress(delay, |_| {}).await;
                    } else if is_transient_error(&msg) {
                        // 1s, 2s, 4s with the same deterministic jitter source
                        let schedule = BackoffPolicy {
                            base: self.transient_base,
                            cap: Duration::from_secs(30),
                            max_retries: self.policy.max_retries,
                        };
                        let delay = schedule.delay_for_attempt(attempt);
                        warn!(attempt, delay_ms = delay.as_millis() as u64, "transient provider error; retrying");
                        tokio::time::sleep(delay).await;
                    } else {
                        return Err(e).context("model completion failed");
                    }
                    last_err = Some(e);
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no attempts made")))
            .context("model completion failed after retries")
    }

    /// One provider call: drain the stream into an assistant [`Message`].
    async fn collect_once(
        &self,
        req: CompletionRequest,
        on_chunk: &mut Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> anyhow::Result<SendOutcome> {
        let mut stream = self.provider.complete(req).await?;

        let mut content = String::new();
        let mut reasoning = String::new();
        let mut usage = TokenUsage::default();
        // Keyed by the parallel-tool-call index: providers interleave
        // argument fragments for different calls.
        let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();

        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(delta) => {
                    if let Some(cb) = on_chunk.as_deref_mut() {
                        cb(&delta);
                    }
                    content.push_str(&delta);
                }
                ResponseEvent::ReasoningDelta(delta) => reasoning.push_str(&delta),
                ResponseEvent::ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    let ptc = pending.entry(index).or_default();
                    if !id.is_empty() {
                        ptc.id = id;
                    }
                    if !name.is_empty() {
                        ptc.name = name;
                    }
                    ptc.args_buf.push_str(&arguments);
                }
                ResponseEvent::Usage(u) => usage = u,
                ResponseEvent::Done => break,
                ResponseEvent::Error(e) => warn!("model stream error: {e}"),
            }
        }

        // Flush accumulated tool calls in index order.  Calls with no name
        // cannot be dispatched and are dropped; an empty id gets a synthetic
        // replacement so the turn can still complete.
        let mut sorted: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
        sorted.sort_by_key(|(idx, _)| *idx);
        let mut tool_calls = Vec::with_capacity(sorted.len());
        for (_, ptc) in sorted {
            if ptc.name.is_empty() {
                warn!(tool_call_id = %ptc.id, "dropping tool call with empty name from model");
                continue;
            }
            let id = if ptc.id.is_empty() {
                self.next_call_id()
            } else {
                ptc.id
            };
            let args = if ptc.args_buf.trim().is_empty() {
                "{}".to_string()
            } else {
                ptc.args_buf
            };
            tool_calls.push(ToolCallRef::new(id, ptc.name, args));
        }

        debug!(
            content_len = content.len(),
            tool_calls = tool_calls.len(),
            "assembled model response"
        );

        let message = Message {
            role: Role::Assistant,
            content,
            reasoning: if reasoning.is_empty() { None } else { Some(reasoning) },
            tool_calls,
            tool_call_id: None,
            images: Vec::new(),
        };
        Ok(SendOutcome { message, usage })
    }

    /// Synthesize a fresh `call_<monotonic>` id.
    pub fn next_call_id(&self) -> String {
        let n = self.call_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("call_{n}")
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedMockProvider;

    fn msgs() -> Vec<Message> {
        vec![Message::user("hello")]
    }

    #[tokio::test]
    async fn assembles_text_response() {
        let provider = Arc::new(ScriptedMockProvider::new(vec![vec![
            ResponseEvent::TextDelta("hel".into()),
            ResponseEvent::TextDelta("lo".into()),
            ResponseEvent::Usage(TokenUsage::new(10, 5)),
            ResponseEvent::Done,
        ]]));
        let sender = MessageSender::new(provider, true);
        let out = sender.send(&msgs(), &[], None).await.unwrap();
        assert_eq!(out.message.content, "hello");
        assert_eq!(out.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn chunk_callback_sees_every_delta() {
        let provider = Arc::new(ScriptedMockProvider::new(vec![vec![
            ResponseEvent::TextDelta("a".into()),
            ResponseEvent::TextDelta("b".into()),
            ResponseEvent::Done,
        ]]));
        let sender = MessageSender::new(provider, true);
        let mut seen = String::new();
        let mut cb = |chunk: &str| seen.push_str(chunk);
        sender.send(&msgs(), &[], Some(&mut cb)).await.unwrap();
        assert_eq!(seen, "ab");
    }

    #[tokio::test]
    async fn accumulates_interleaved_tool_call_fragments() {
        let provider = Arc::new(ScriptedMockProvider::new(vec![vec![
            ResponseEvent::ToolCallDelta {
                index: 0,
                id: "c1".into(),
                name: "read_file".into(),
                arguments: r#"{"path":"#.into(),
            },
            ResponseEvent::ToolCallDelta {
                index: 1,
                id: "c2".into(),
                name: "shell_command".into(),
                arguments: r#"{"command":"ls"}"#.into(),
            },
            ResponseEvent::ToolCallDelta {
                index: 0,
                id: String::new(),
                name: String::new(),
                arguments: r#""a.rs"}"#.into(),
            },
            ResponseEvent::Done,
        ]]));
        let sender = MessageSender::new(provider, true);
        let out = sender.send(&msgs(), &[], None).await.unwrap();
        assert_eq!(out.message.tool_calls.len(), 2);
        assert_eq!(out.message.tool_calls[0].function.name, "read_file");
        assert_eq!(out.message.tool_calls[0].function.arguments, r#"{"path":"a.rs"}"#);
        assert_eq!(out.message.tool_calls[1].function.name, "shell_command");
    }

    #[tokio::test]
    async fn empty_call_id_gets_synthetic_replacement() {
        let provider = Arc::new(ScriptedMockProvider::new(vec![vec![
            ResponseEvent::ToolCallDelta {
                index: 0,
                id: String::new(),
                name: "read_file".into(),
                arguments: "{}".into(),
            },
            ResponseEvent::Done,
        ]]));
        let sender = MessageSender::new(provider, true);
        let out = sender.send(&msgs(), &[], None).await.unwrap();
        assert!(out.message.tool_calls[0].id.starts_with("call_"));
    }

    #[tokio::test]
    async fn nameless_call_is_dropped() {
        let provider = Arc::new(ScriptedMockProvider::new(vec![vec![
            ResponseEvent::ToolCallDelta {
                index: 0,
                id: "x".into(),
                name: String::new(),
                arguments: "{}".into(),
            },
            ResponseEvent::TextDelta("done".into()),
            ResponseEvent::Done,
        ]]));
        let sender = MessageSender::new(provider, true);
        let out = sender.send(&msgs(), &[], None).await.unwrap();
        assert!(out.message.tool_calls.is_empty());
        assert_eq!(out.message.content, "done");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_is_retried() {
        let provider = Arc::new(
            ScriptedMockProvider::new(vec![vec![
                ResponseEvent::TextDelta("recovered".into()),
                ResponseEvent::Done,
            ]])
            .failing_first(1, "stream error: connection reset"),
        );
        let sender = MessageSender::new(provider, true);
        let out = sender.send(&msgs(), &[], None).await.unwrap();
        assert_eq!(out.message.content, "recovered");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_fires_hook_and_retries() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = hits.clone();
        let provider = Arc::new(
            ScriptedMockProvider::new(vec![vec![
                ResponseEvent::TextDelta("ok".into()),
                ResponseEvent::Done,
            ]])
            .failing_first(1, "429 too many requests"),
        );
        let sender = MessageSender::new(provider, true)
            .on_rate_limit(move |_| { hits2.fetch_add(1, Ordering::SeqCst); });
        let out = sender.send(&msgs(), &[], None).await.unwrap();
        assert_eq!(out.message.content, "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_error() {
        let provider = Arc::new(
            ScriptedMockProvider::new(vec![]).failing_first(10, "stream error: EOF"),
        );
        let sender = MessageSender::new(provider, true);
        let err = sender.send(&msgs(), &[], None).await.unwrap_err();
        assert!(format!("{err:#}").contains("after retries"));
    }

    #[tokio::test]
    async fn non_retryable_error_surfaces_immediately() {
        let provider = Arc::new(
            ScriptedMockProvider::new(vec![]).failing_first(1, "invalid api key"),
        );
        let sender = MessageSender::new(provider, true);
        let err = sender.send(&msgs(), &[], None).await.unwrap_err();
        assert!(format!("{err:#}").contains("invalid api key"));
    }

    #[test]
    fn call_ids_are_monotonic() {
        let provider = Arc::new(ScriptedMockProvider::new(vec![]));
        let sender = MessageSender::new(provider, true);
        assert_eq!(sender.next_call_id(), "call_1");
        assert_eq!(sender.next_call_id(), "call_2");
    }

    /// Provider that never answers within any reasonable deadline.
    struct HangingProvider;

    #[async_trait::async_trait]
    impl crate::ModelProvider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }
        fn model_name(&self) -> &str {
            "hanging-model"
        }
        async fn complete(
            &self,
            _req: crate::CompletionRequest,
        ) -> anyhow::Result<crate::provider::ResponseStream> {
            tokio::time::sleep(std::time::Duration::from_secs(100_000)).await;
            unreachable!("the deadline always fires first")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_surfaces_after_retries() {
        let sender = MessageSender::new(Arc::new(HangingProvider), true)
            .with_timeout(std::time::Duration::from_secs(5));
        let err = sender.send(&msgs(), &[], None).await.unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("after retries"), "{text}");
        assert!(text.contains("timeout"), "{text}");
    }
}
