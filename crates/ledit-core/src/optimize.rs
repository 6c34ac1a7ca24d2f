// SPDX-License-Identifier: Apache-2.0
//! Conversation optimizer: deduplication of repeated tool results and
//! aggressive compaction under context pressure.

use std::collections::HashMap;

use tracing::debug;

use ledit_model::{Message, Role};

/// Minimum payload size worth deduplicating.  Tiny results ("ok") repeat
/// legitimately and cost nothing to keep.
const DEDUPE_MIN_CHARS: usize = 200;

/// Collapse repeated identical tool-result payloads (e.g. successive reads
/// of the same unchanged file) to one full copy plus reference stubs.
pub fn dedupe_tool_results(messages: Vec<Message>) -> Vec<Message> {
    let mut first_seen: HashMap<String, String> = HashMap::new(); // content → call id
    let mut deduped = 0usize;
    let out = messages
        .into_iter()
        .map(|mut m| {
            if m.role != Role::Tool || m.content.len() < DEDUPE_MIN_CHARS {
                return m;
            }
            match first_seen.get(&m.content) {
                Some(original_call) => {
                    deduped += 1;
                    m.content = format!(
                        "[identical to the earlier result for call {original_call}; \
                         content omitted to save context]"
                    );
                    m
                }
                None => {
                    first_seen.insert(
                        m.content.clone(),
                        m.tool_call_id.clone().unwrap_or_default(),
                    );
                    m
                }
            }
        })
        .collect();
    if deduped > 0 {
        debug!(deduped, "deduplicated tool results");
    }
    out
}

/// Aggressive compaction: keep the last `keep_recent` messages verbatim,
/// truncate older message bodies to `truncate_chars`, and collapse older
/// multi-line file-read results to a short preview.
pub fn aggressive_compact(
    messages: Vec<Message>,
    keep_recent: usize,
    truncate_chars: usize,
) -> Vec<Message> {
    let len = messages.len();
    let verbatim_from = len.saturating_sub(keep_recent);

    messages
        .into_iter()
        .enumerate()
        .map(|(i, mut m)| {
            if i >= verbatim_from || m.role == Role::System {
                return m;
            }
            // Old bulky file reads: a 3-line preview beats a mid-file cut.
            if m.role == Role::Tool && m.content.lines().count() > 10 {
                let preview: Vec<&str> = m.content.lines().take(3).collect();
                let omitted = m.content.lines().count() - preview.len();
                m.content = format!(
                    "{}\n[file content compacted: {omitted} more lines omitted]",
                    preview.join("\n")
                );
                return m;
            }
            if m.content.len() > truncate_chars {
                let limit = floor_char_boundary(&m.content, truncate_chars);
                let cut = m.content[..limit]
                    .rfind('\n')
                    .map(|p| p + 1)
                    .unwrap_or(limit);
                m.content.truncate(cut);
                m.content.push_str("[... truncated during compaction]");
            }
            m
        })
        .collect()
}

/// Largest index ≤ `at` that falls on a char boundary.
fn floor_char_boundary(s: &str, at: usize) -> usize {
    let mut i = at.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
