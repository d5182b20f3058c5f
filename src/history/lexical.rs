// src/history/lexical.rs
// Token-overlap ranking used when no vectors are available.

use std::collections::HashSet;

use crate::sessions::Message;

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_string())
        .collect()
}

/// Cosine-style overlap between token sets: |A ∩ B| / sqrt(|A| · |B|).
pub fn overlap_score(query_tokens: &HashSet<String>, text: &str) -> f32 {
    let message_tokens = tokenize(text);
    if query_tokens.is_empty() || message_tokens.is_empty() {
        return 0.0;
    }
    let shared = query_tokens.intersection(&message_tokens).count() as f32;
    shared / ((query_tokens.len() as f32) * (message_tokens.len() as f32)).sqrt()
}

/// Rank messages against a query by token overlap, best first.
pub fn rank_by_overlap(query: &str, messages: Vec<Message>, k: usize) -> Vec<(Message, f32)> {
    let query_tokens = tokenize(query);

    let mut scored: Vec<(Message, f32)> = messages
        .into_iter()
        .map(|m| {
            let score = overlap_score(&query_tokens, &m.content);
            (m, score)
        })
        .filter(|(_, score)| *score > 0.0)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, content: &str) -> Message {
        Message {
            id: id.to_string(),
            chat_session_id: "s1".to_string(),
            run_id: None,
            role: "user".to_string(),
            content: content.to_string(),
            sql_query: None,
            sequence_order: 1,
            metadata: None,
            created_at: 0,
        }
    }

    #[test]
    fn ranks_related_text_higher() {
        let messages = vec![
            message("a", "top 5 customers by revenue last quarter"),
            message("b", "what is the weather today"),
            message("c", "customers ranked by total revenue"),
        ];

        let ranked = rank_by_overlap("top customers by revenue", messages, 2);
        assert_eq!(ranked.len(), 2);
        let ids: Vec<&str> = ranked.iter().map(|(m, _)| m.id.as_str()).collect();
        assert!(ids.contains(&"a"));
        assert!(ids.contains(&"c"));
    }

    #[test]
    fn unrelated_text_is_dropped() {
        let messages = vec![message("b", "completely unrelated words here")];
        let ranked = rank_by_overlap("orders shipped volume", messages, 5);
        assert!(ranked.is_empty());
    }
}
