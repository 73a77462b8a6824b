//! Dependency analysis over normalized requests.
//!
//! Reconstructs the implicit conversation forest: each request's message
//! prefix is compared against the expected continuation of every earlier
//! request. Exact prefix match is the common case (linear conversation
//! growth); a Levenshtein fallback over message-id sequences catches rewinds
//! and branches; a tool-set penalty disambiguates otherwise similar
//! conversations running with different tools. Model equality is a hard
//! filter so cross-provider traffic never links.

use llmtap_types::RequestNode;
use std::collections::HashSet;

/// Score penalty per tool id present in only one of the two requests.
const TOOL_DIFF_PENALTY: f64 = 0.5;

/// Set `parent_id` on every request. Input must be sorted by timestamp
/// ascending; the first request is always a root.
pub fn analyze(requests: &mut [RequestNode]) {
    for idx in 0..requests.len() {
        let (earlier, rest) = requests.split_at_mut(idx);
        let curr = &mut rest[0];
        curr.parent_id = if idx == 0 {
            None
        } else {
            find_parent(curr, earlier)
        };
    }
}

/// Expected continuation of a candidate: its request messages followed by
/// its response messages.
fn expected_prefix(candidate: &RequestNode) -> Vec<&str> {
    candidate
        .request_messages
        .iter()
        .chain(candidate.response_messages.iter())
        .map(String::as_str)
        .collect()
}

fn is_prefix(prefix: &[&str], sequence: &[&str]) -> bool {
    prefix.len() <= sequence.len() && prefix.iter().zip(sequence).all(|(a, b)| a == b)
}

fn find_parent(curr: &RequestNode, earlier: &[RequestNode]) -> Option<String> {
    let curr_messages: Vec<&str> = curr.request_messages.iter().map(String::as_str).collect();

    // Prefix pass: most recent candidate whose continuation the current
    // request extends verbatim. A parent must be strictly earlier in time.
    for candidate in earlier.iter().rev() {
        if candidate.model != curr.model || candidate.timestamp >= curr.timestamp {
            continue;
        }
        let prefix = expected_prefix(candidate);
        // An empty continuation would match everything; skip it
        if !prefix.is_empty() && is_prefix(&prefix, &curr_messages) {
            return Some(candidate.id.clone());
        }
    }

    // Similarity pass: best combined score of edit distance and tool
    // difference. Iterating from most recent with a strict comparison makes
    // ties resolve to the closest timestamp.
    let curr_tools: HashSet<&str> = curr.tools.iter().map(String::as_str).collect();
    let mut best: Option<(f64, usize, usize, &RequestNode)> = None;
    for candidate in earlier.iter().rev() {
        if candidate.model != curr.model || candidate.timestamp >= curr.timestamp {
            continue;
        }
        let prefix = expected_prefix(candidate);
        let edit = levenshtein(&prefix, &curr_messages);
        let candidate_tools: HashSet<&str> =
            candidate.tools.iter().map(String::as_str).collect();
        let tool_diff = curr_tools.symmetric_difference(&candidate_tools).count();
        let score = -(edit as f64) - TOOL_DIFF_PENALTY * tool_diff as f64;
        if best.map(|(s, _, _, _)| score > s).unwrap_or(true) {
            best = Some((score, edit, prefix.len(), candidate));
        }
    }

    let (_, edit, prefix_len, candidate) = best?;

    // Root threshold: a link that rewrites more than half of the shorter
    // sequence (plus slack) is no link at all.
    let shorter = prefix_len.min(curr_messages.len()) as f64;
    if edit as f64 > shorter / 2.0 + 2.0 {
        return None;
    }
    Some(candidate.id.clone())
}

/// Levenshtein distance between two id sequences, unit cost per
/// insert/delete/substitute. Operands are opaque ids; equality is
/// id-equality.
fn levenshtein(a: &[&str], b: &[&str]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, item_a) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, item_b) in b.iter().enumerate() {
            curr[j + 1] = if item_a == item_b {
                prev[j]
            } else {
                1 + prev[j].min(prev[j + 1]).min(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, ts: i64, req: &[&str], resp: &[&str], model: &str) -> RequestNode {
        RequestNode {
            id: id.to_string(),
            parent_id: None,
            timestamp: ts,
            request_messages: req.iter().map(|s| s.to_string()).collect(),
            response_messages: resp.iter().map(|s| s.to_string()).collect(),
            model: model.to_string(),
            tools: vec![],
            duration_ms: 0,
        }
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein(&[], &[]), 0);
        assert_eq!(levenshtein(&["a", "b"], &["a", "b"]), 0);
        assert_eq!(levenshtein(&["a", "b"], &["a", "b", "c"]), 1);
        assert_eq!(levenshtein(&["a", "b", "c"], &["a", "x", "c"]), 1);
        assert_eq!(levenshtein(&["a"], &["x", "y", "z"]), 3);
    }

    #[test]
    fn test_linear_chain() {
        let mut requests = vec![
            node("r1", 1, &["a"], &["b"], "gpt-4"),
            node("r2", 2, &["a", "b"], &["c"], "gpt-4"),
            node("r3", 3, &["a", "b", "c"], &["d"], "gpt-4"),
        ];
        analyze(&mut requests);
        assert_eq!(requests[0].parent_id, None);
        assert_eq!(requests[1].parent_id.as_deref(), Some("r1"));
        assert_eq!(requests[2].parent_id.as_deref(), Some("r2"));
    }

    #[test]
    fn test_rewind_branches_from_earlier_request() {
        // r3 continues r1's conversation, not r2's
        let mut requests = vec![
            node("r1", 1, &["a"], &["b"], "gpt-4"),
            node("r2", 2, &["a", "b"], &["c"], "gpt-4"),
            node("r3", 3, &["a", "b"], &["e"], "gpt-4"),
        ];
        analyze(&mut requests);
        assert_eq!(requests[2].parent_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_cross_model_split() {
        let mut requests = vec![
            node("r1", 1, &["a"], &["b"], "gpt-4"),
            node("r2", 2, &["a", "b"], &["c"], "claude-3-5-sonnet"),
        ];
        analyze(&mut requests);
        assert_eq!(requests[1].parent_id, None);
    }

    #[test]
    fn test_similarity_links_truncated_tail() {
        // r2's request rewrites r1's final expected message: no exact prefix,
        // but edit distance 1 is well under the threshold.
        let mut requests = vec![
            node("r1", 1, &["a", "b", "c", "d", "e"], &["f"], "gpt-4"),
            node("r2", 2, &["a", "b", "c", "d", "e", "x"], &["g"], "gpt-4"),
        ];
        analyze(&mut requests);
        assert_eq!(requests[1].parent_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_unrelated_conversation_becomes_root() {
        let mut requests = vec![
            node("r1", 1, &["a"], &["b"], "gpt-4"),
            node("r2", 2, &["u", "v", "w", "x", "y", "z"], &["q"], "gpt-4"),
        ];
        analyze(&mut requests);
        assert_eq!(requests[1].parent_id, None);
    }

    #[test]
    fn test_tool_penalty_breaks_near_ties() {
        // Same edit distance to both candidates; the matching tool set wins
        // over recency.
        let mut older = node("r1", 1, &["a", "b", "c", "d"], &["e"], "gpt-4");
        older.tools = vec!["t1".to_string()];
        let mut newer = node("r2", 2, &["a", "b", "c", "d"], &["f"], "gpt-4");
        newer.tools = vec!["t2".to_string()];
        let mut curr = node("r3", 3, &["a", "b", "c", "d", "x"], &["g"], "gpt-4");
        curr.tools = vec!["t1".to_string()];

        let mut requests = vec![older, newer, curr];
        analyze(&mut requests);
        assert_eq!(requests[2].parent_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_ties_resolve_to_most_recent() {
        let mut requests = vec![
            node("r1", 1, &["a", "b", "c"], &["d"], "gpt-4"),
            node("r2", 2, &["a", "b", "c"], &["d"], "gpt-4"),
            node("r3", 3, &["a", "b", "c", "d"], &["e"], "gpt-4"),
        ];
        analyze(&mut requests);
        // r2 links to r1 (identical content, earlier), r3 prefix-matches the
        // most recent candidate
        assert_eq!(requests[2].parent_id.as_deref(), Some("r2"));
    }

    #[test]
    fn test_forest_invariants() {
        let mut requests = vec![
            node("r1", 1, &["a"], &["b"], "gpt-4"),
            node("r2", 2, &["a", "b"], &["c"], "gpt-4"),
            node("r3", 3, &["a", "b"], &["d"], "gpt-4"),
            node("r4", 4, &["p"], &["q"], "claude-3-5-sonnet"),
        ];
        analyze(&mut requests);

        for (idx, request) in requests.iter().enumerate() {
            if let Some(parent_id) = &request.parent_id {
                let parent_idx = requests.iter().position(|r| &r.id == parent_id).unwrap();
                // Parent precedes child in time
                assert!(requests[parent_idx].timestamp < request.timestamp);
                assert!(parent_idx < idx);
                // Same model along every edge
                assert_eq!(requests[parent_idx].model, request.model);
            }
        }
    }
}
