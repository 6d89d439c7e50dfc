//! Shared text helpers.

/// Extract a JSON object from text that may contain other content.
///
/// A reply that is entirely one JSON object (optionally wrapped in a single
/// code fence) is taken as is. Otherwise the first `{` that starts a complete
/// object wins; string contents are parsed, not brace-counted.
pub fn extract_json_object(text: &str) -> Option<String> {
    let trimmed = text.trim();
    for candidate in [trimmed, strip_code_fence(trimmed).trim()] {
        if let Ok(serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(candidate) {
            return Some(candidate.to_string());
        }
    }
    first_object(trimmed)
}

fn first_object(text: &str) -> Option<String> {
    text.match_indices('{').find_map(|(start, _)| {
        let rest = &text[start..];
        let mut values = serde_json::Deserializer::from_str(rest).into_iter::<serde_json::Value>();
        match values.next() {
            Some(Ok(value)) if value.is_object() => Some(rest[..values.byte_offset()].to_string()),
            _ => None,
        }
    })
}

/// Body of a reply that is wrapped in one code fence (```json or ```), or
/// the input unchanged when it is not.
fn strip_code_fence(text: &str) -> &str {
    let Some(after_open) = text.strip_prefix("```") else {
        return text;
    };
    // Skip the info string ("json") up to the end of the fence line.
    let body = match after_open.find('\n') {
        Some(i) => &after_open[i + 1..],
        None => after_open,
    };
    body.strip_suffix("```").unwrap_or(body)
}

/// Truncate `text` to at most `max_chars` characters, appending an ellipsis
/// when anything was cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
