// SPDX-License-Identifier: Apache-2.0
//! Rate-limit detection and retry backoff for provider calls.

use std::time::Duration;

/// Structured event emitted when a rate limit is detected, so the UI can
/// report which provider/model hit the wall and at what usage level.
#[derive(Debug, Clone)]
pub struct RateLimitEvent {
    pub provider: String,
    pub model: String,
    pub total_tokens: u64,
    pub error: String,
}

/// Return `true` when the error text indicates a provider rate limit.
///
/// The predicates are deliberately conservative: a bare "429" or a bare
/// "rate" is not enough, and text that explicitly rules a rate limit out
/// ("not due to rate limit") is never matched.
pub fn is_rate_limit_error(msg: &str) -> bool {
    let m = msg.to_lowercase();
    if m.contains("not due to rate limit") {
        return false;
    }
    if m.contains("429") && (m.contains("too many requests") || m.contains("rate")) {
        return true;
    }
    m.contains("rate limit")
        || m.contains("requests per minute")
        || m.contains("rpm exceeded")
        || m.contains("rate exceeded")
}

/// Return `true` for transient errors worth retrying without a rate-limit
/// schedule: stream hiccups, resets, timeouts.
pub fn is_transient_error(msg: &str) -> bool {
    let m = msg.to_lowercase();
    m.contains("stream error")
        || m.contains("internal_error")
        || m.contains("connection reset")
        || m.contains("eof")
        || m.contains("timeout")
}

/// Exponential backoff with a cap and deterministic jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// First-attempt delay
    pub base: Duration,
    /// Ceiling for the exponential term
    pub cap: Duration,
    /// Attempts after the first failure; the error surfaces past this
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
            max_retries: 3,
        }
    }
}

impl BackoffPolicy {
    /// `min(cap, base·2ⁿ)` plus uniform jitter in `[0, base/2)`.
    ///
    /// The jitter fraction comes from a multiplicative hash of the attempt
    /// number — deterministic, which keeps tests stable, and spread enough
    /// to avoid synchronized retries across concurrent sub-agents.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let exp_ms = base_ms * 2f64.powi(attempt as i32);
        let capped_ms = exp_ms.min(self.cap.as_millis() as f64);
        let jitter_ms = (base_ms / 2.0) * pseudo_random_fraction(attempt);
        Duration::from_millis((capped_ms + jitter_ms) as u64)
    }
}

/// Deterministic "random" fraction [0, 1) from the attempt number
/// (Knuth multiplicative hash).
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_add(1).wrapping_mul(2654435761);
    (hash as f64) / (u32::MAX as f64)
}

/// Sleep for `delay`, invoking `progress(remaining)` once a second so a UI
/// can render a countdown.  The final partial second is slept without a
/// callback.
pub async fn wait_with_progress<F: FnMut(Duration)>(delay: Duration, mut progress: F) {
    let mut remaining = delay;
    let tick = Duration::from_secs(1);
    while remaining > tick {
        progress(remaining);
        tokio::time::sleep(tick).await;
        remaining -= tick;
    }
    tokio::time::sleep(remaining).await;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
