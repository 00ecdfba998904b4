//! Small string helpers shared by the snapshot and reporting code.

/// Truncate `input` to at most `max_chars` characters, respecting UTF-8
/// boundaries.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => input[..idx].to_string(),
        None => input.to_string(),
    }
}
