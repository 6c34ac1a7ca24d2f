// SPDX-License-Identifier: Apache-2.0
pub mod backoff;
pub mod estimate;
pub mod fallback;
pub mod sanitize;
mod mock;
mod provider;
mod sender;
mod types;

pub use backoff::{BackoffPolicy, RateLimitEvent};
pub use fallback::{FallbackError, FallbackParse, FallbackParser};
pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::{ModelProvider, ResponseStream};
pub use sender::{MessageSender, SendOutcome};
pub use types::*;
