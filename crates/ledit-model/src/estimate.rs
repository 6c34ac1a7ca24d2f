// SPDX-License-Identifier: Apache-2.0
//! Token footprint approximation for pruning decisions.
//!
//! Uses the ⌈chars/4⌉ heuristic.  Good enough for deciding when to prune;
//! never used for billing — provider-reported usage is authoritative there.

use crate::types::Message;

/// Approximate tokens for a plain string.
pub fn estimate_str(s: &str) -> usize {
    s.len().div_ceil(4)
}

/// Approximate tokens for a full message set.
pub fn estimate_messages(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.approx_tokens()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_str("abcd"), 1);
    }

    #[test]
    fn rounds_up() {
        assert_eq!(estimate_str("abcde"), 2);
        assert_eq!(estimate_str("a"), 1);
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(estimate_str(""), 0);
    }

    #[test]
    fn monotonic_adding_text_never_decreases() {
        let mut prev = 0;
        let mut s = String::new();
        for _ in 0..100 {
            s.push('x');
            let est = estimate_str(&s);
            assert!(est >= prev);
            prev = est;
        }
    }

    #[test]
    fn message_set_is_sum_of_parts() {
        let msgs = vec![Message::user("12345678"), Message::assistant("abcd")];
        assert_eq!(
            estimate_messages(&msgs),
            msgs.iter().map(|m| m.approx_tokens()).sum::<usize>()
        );
    }

    #[test]
    fn stable_no_randomness() {
        let msgs = vec![Message::user("deterministic input")];
        assert_eq!(estimate_messages(&msgs), estimate_messages(&msgs));
    }
}
