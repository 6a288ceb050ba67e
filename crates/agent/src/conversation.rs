use akka_core::domain::conversation::{ConversationTurn, Role};

/// Summarises recent routing history as `INTENT: query` lines, oldest first.
///
/// A pair is produced for every intent-tagged assistant turn whose preceding
/// turn is a user turn. Only the last `window` pairs are kept and each query
/// is cut to `max_length` characters, with `...` appended when cut.
pub fn extract(history: &[ConversationTurn], window: usize, max_length: usize) -> Vec<String> {
    if window == 0 {
        return Vec::new();
    }

    let mut pairs: Vec<String> = history
        .windows(2)
        .filter_map(|pair| {
            let (question, answer) = (&pair[0], &pair[1]);
            if question.role != Role::User || answer.role != Role::Assistant {
                return None;
            }
            let intent =
                answer.intent.as_ref().filter(|intent| !intent.as_str().trim().is_empty())?;
            Some(format!("{intent}: {}", truncate(question.content.trim(), max_length)))
        })
        .collect();

    let skip = pairs.len().saturating_sub(window);
    pairs.drain(..skip);
    pairs
}

fn truncate(text: &str, max_length: usize) -> String {
    match text.char_indices().nth(max_length) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
