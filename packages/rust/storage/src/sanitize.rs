//! Filesystem-safe name segments.

/// Characters rejected by at least one supported filesystem.
const ILLEGAL: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Turn arbitrary text into a single path segment.
///
/// Strips illegal and control characters, trims, truncates to `max_chars`
/// characters, then drops trailing dots and spaces. Falls back to `fallback`
/// when nothing is left.
pub fn sanitize_segment(input: &str, max_chars: usize, fallback: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| !ILLEGAL.contains(c) && !c.is_control())
        .collect();

    let truncated: String = cleaned.trim().chars().take(max_chars).collect();
    let result = truncated.trim_end_matches(['.', ' ']);

    if result.is_empty() {
        fallback.to_string()
    } else {
        result.to_string()
    }
}
