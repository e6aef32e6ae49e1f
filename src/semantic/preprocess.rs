//! Text preprocessing for embedding input.
//!
//! Both corpus descriptions and query text go through `prepare_text` so
//! they are normalised the same way:
//! 1. Trim whitespace
//! 2. Collapse internal whitespace runs to a single space
//! 3. Truncate to a maximum length with ellipsis

/// Ellipsis suffix when content is truncated
const TRUNCATION_SUFFIX: &str = "...";

/// Normalise `text` for the encoder.
///
/// Returns `None` if nothing but whitespace remains. Content longer than
/// `max_chars` characters is cut and suffixed with an ellipsis.
pub fn prepare_text(text: &str, max_chars: usize) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        return None;
    }

    Some(truncate_chars(&collapsed, max_chars))
}

/// Truncate to `max_chars` characters, adding ellipsis if truncated.
pub fn truncate_chars(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }

    // Count in chars so UTF-8 sequences are never split
    let keep = max_chars.saturating_sub(TRUNCATION_SUFFIX.len());
    let truncated: String = content.chars().take(keep).collect();

    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}
