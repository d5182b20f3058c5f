// src/history/render.rs
// Rendering of retrieved history into the prompt block.

use std::collections::HashSet;

use crate::sessions::Message;

fn format_item(message: &Message) -> String {
    let when = chrono::DateTime::from_timestamp(message.created_at, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());

    match message.sql_query.as_deref() {
        Some(sql) if !sql.is_empty() => {
            format!("[{}] {}: {} (SQL: {})", when, message.role, message.content, sql)
        }
        _ => format!("[{}] {}: {}", when, message.role, message.content),
    }
}

/// Bounded text block with `RECENT MESSAGES` and `SIMILAR CONVERSATIONS`
/// sections. Items are deduplicated by message id, recent ones taking
/// priority, and the overall count capped.
pub fn render_history(
    recent: &[Message],
    similar: &[(Message, f32)],
    max_messages: usize,
) -> String {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut remaining = max_messages;
    let mut sections = Vec::new();

    let recent_items: Vec<String> = recent
        .iter()
        .filter(|m| seen.insert(m.id.as_str()))
        .take(remaining)
        .map(format_item)
        .collect();
    remaining = remaining.saturating_sub(recent_items.len());
    if !recent_items.is_empty() {
        sections.push(format!("RECENT MESSAGES:\n{}", recent_items.join("\n")));
    }

    let similar_items: Vec<String> = similar
        .iter()
        .filter(|(m, _)| seen.insert(m.id.as_str()))
        .take(remaining)
        .map(|(m, _)| format_item(m))
        .collect();
    if !similar_items.is_empty() {
        sections.push(format!(
            "SIMILAR CONVERSATIONS:\n{}",
            similar_items.join("\n")
        ));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, role: &str, content: &str, sql: Option<&str>) -> Message {
        Message {
            id: id.to_string(),
            chat_session_id: "s1".to_string(),
            run_id: None,
            role: role.to_string(),
            content: content.to_string(),
            sql_query: sql.map(|s| s.to_string()),
            sequence_order: 1,
            metadata: None,
            created_at: 1754000000,
        }
    }

    #[test]
    fn renders_both_sections() {
        let recent = vec![message("a", "user", "how many orders?", None)];
        let similar = vec![(
            message("b", "assistant", "There are 42 orders.", Some("SELECT COUNT(*) FROM orders")),
            0.9,
        )];

        let block = render_history(&recent, &similar, 15);
        assert!(block.contains("RECENT MESSAGES:"));
        assert!(block.contains("SIMILAR CONVERSATIONS:"));
        assert!(block.contains("SELECT COUNT(*) FROM orders"));
    }

    #[test]
    fn deduplicates_by_message_id() {
        let shared = message("a", "user", "how many orders?", None);
        let block = render_history(&[shared.clone()], &[(shared, 1.0)], 15);
        assert_eq!(block.matches("how many orders?").count(), 1);
        assert!(!block.contains("SIMILAR CONVERSATIONS:"));
    }

    #[test]
    fn caps_total_items() {
        let recent: Vec<Message> = (0..10)
            .map(|i| message(&format!("r{i}"), "user", &format!("question {i}"), None))
            .collect();
        let similar: Vec<(Message, f32)> = (0..10)
            .map(|i| (message(&format!("s{i}"), "user", &format!("older {i}"), None), 0.5))
            .collect();

        let block = render_history(&recent, &similar, 12);
        let items = block.lines().filter(|l| l.starts_with('[')).count();
        assert_eq!(items, 12);
    }

    #[test]
    fn empty_inputs_render_empty() {
        assert_eq!(render_history(&[], &[], 15), "");
    }
}
