// SPDX-License-Identifier: Apache-2.0
//! History sanitization: keep tool-role messages paired with their calls.
//!
//! Providers reject a request whose history contains a tool result that does
//! not reference a tool call from an earlier assistant message.  Pruning,
//! fallback parsing, and model misbehaviour can all produce such orphans;
//! run [`sanitize`] after every history mutation and [`strict_sanitize`]
//! additionally for providers that demand exactly-once pairing.

use std::collections::HashSet;

use tracing::debug;

use crate::types::{Message, Role};

/// Drop every tool-role message whose `tool_call_id` does not match a
/// tool call in a *preceding* assistant message.
///
/// Never fails: an offending message is dropped with a debug log and the
/// rest of the history is preserved in order.
pub fn sanitize(messages: Vec<Message>) -> Vec<Message> {
    let mut seen_call_ids: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::Assistant => {
                for tc in &msg.tool_calls {
                    seen_call_ids.insert(tc.id.clone());
                }
                out.push(msg);
            }
            Role::Tool => {
                let paired = msg
                    .tool_call_id
                    .as_ref()
                    .map(|id| seen_call_ids.contains(id))
                    .unwrap_or(false);
                if paired {
                    out.push(msg);
                } else {
                    debug!(
                        tool_call_id = msg.tool_call_id.as_deref().unwrap_or("<none>"),
                        "dropping orphan tool result"
                    );
                }
            }
            _ => out.push(msg),
        }
    }
    out
}

/// Stricter pass for providers that reject anything other than exactly one
/// result per call id: in addition to dropping orphans, duplicate results
/// for the same id are reduced to the first occurrence.
pub fn strict_sanitize(messages: Vec<Message>) -> Vec<Message> {
    let mut seen_call_ids: HashSet<String> = HashSet::new();
    let mut answered: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(messages.len());

    for msg in sanitize(messages) {
        match msg.role {
            Role::Assistant => {
                for tc in &msg.tool_calls {
                    seen_call_ids.insert(tc.id.clone());
                }
                out.push(msg);
            }
            Role::Tool => {
                let id = msg.tool_call_id.clone().unwrap_or_default();
                if answered.contains(&id) {
                    debug!(tool_call_id = %id, "dropping duplicate tool result");
                    continue;
                }
                answered.insert(id);
                out.push(msg);
            }
            _ => out.push(msg),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCallRef;

    #[test]
    fn orphan_tool_result_is_dropped() {
        let messages = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::tool_result("call-orphan", "lost output"),
        ];
        let out = sanitize(messages);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|m| m.role != Role::Tool));
    }

    #[test]
    fn paired_tool_result_is_kept() {
        let messages = vec![
            Message::assistant_with_calls("", vec![ToolCallRef::new("c1", "read_file", "{}")]),
            Message::tool_result("c1", "contents"),
        ];
        let out = sanitize(messages);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].role, Role::Tool);
    }

    #[test]
    fn result_before_its_call_is_an_orphan() {
        let messages = vec![
            Message::tool_result("c1", "early"),
            Message::assistant_with_calls("", vec![ToolCallRef::new("c1", "read_file", "{}")]),
        ];
        let out = sanitize(messages);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::Assistant);
    }

    #[test]
    fn tool_result_without_id_is_dropped() {
        let mut orphan = Message::tool_result("x", "output");
        orphan.tool_call_id = None;
        let out = sanitize(vec![orphan]);
        assert!(out.is_empty());
    }

    #[test]
    fn sanitize_preserves_order_of_survivors() {
        let messages = vec![
            Message::system("sys"),
            Message::user("q"),
            Message::assistant_with_calls("", vec![ToolCallRef::new("a", "shell_command", "{}")]),
            Message::tool_result("a", "out-a"),
            Message::tool_result("ghost", "out-ghost"),
            Message::assistant("done"),
        ];
        let out = sanitize(messages);
        assert_eq!(out.len(), 5);
        assert_eq!(out[3].tool_call_id.as_deref(), Some("a"));
        assert_eq!(out[4].content, "done");
    }

    #[test]
    fn post_invariant_every_tool_message_is_paired() {
        let messages = vec![
            Message::assistant_with_calls("", vec![ToolCallRef::new("a", "t", "{}")]),
            Message::tool_result("a", "1"),
            Message::tool_result("b", "2"),
            Message::tool_result("a", "3"),
        ];
        let out = sanitize(messages);
        let mut known = HashSet::new();
        for m in &out {
            if m.role == Role::Assistant {
                for tc in &m.tool_calls {
                    known.insert(tc.id.clone());
                }
            }
            if m.role == Role::Tool {
                assert!(known.contains(m.tool_call_id.as_ref().unwrap()));
            }
        }
    }

    #[test]
    fn strict_drops_duplicate_results() {
        let messages = vec![
            Message::assistant_with_calls("", vec![ToolCallRef::new("a", "t", "{}")]),
            Message::tool_result("a", "first"),
            Message::tool_result("a", "second"),
        ];
        let out = strict_sanitize(messages);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].content, "first");
    }

    #[test]
    fn strict_also_drops_orphans() {
        let messages = vec![
            Message::user("q"),
            Message::tool_result("nope", "orphan"),
        ];
        let out = strict_sanitize(messages);
        assert_eq!(out.len(), 1);
    }
}
