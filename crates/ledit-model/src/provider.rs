// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{CompletionRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// One LLM endpoint.  Concrete HTTP clients live outside this crate; the
/// engine only ever talks to this trait (the mock providers implement it for
/// tests).
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable provider tag for profile lookup ("openai", "groq", ...).
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Context window size in tokens.
    fn context_window(&self) -> usize {
        100_000
    }

    /// Send a completion request and return a streaming response.
    /// Non-streaming callers still consume the stream; it simply carries the
    /// full response in one batch of events.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;
}
