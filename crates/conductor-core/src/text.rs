//! Small text utilities shared across the workspace.

/// Truncate to at most `max_chars` characters, appending an ellipsis when
/// anything was cut. Operates on character boundaries, never bytes.
#[must_use]
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}…")
}
