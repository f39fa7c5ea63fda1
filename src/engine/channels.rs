// Astro Engine — Channel text helpers
// Outbound text is capped per message by the provider; long answers go out
// as several messages, broken at paragraph or word boundaries.

/// Split a long message into chunks of at most `max_len` bytes, preferring to
/// break on a newline, then a space. Never splits inside a UTF-8 character.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len || max_len == 0 {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }
        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        if limit == 0 {
            // A single character wider than the cap.
            limit = remaining.chars().next().map_or(remaining.len(), char::len_utf8);
        }
        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);
        chunks.push(remaining[..split_at].trim_end().to_string());
        remaining = remaining[split_at..].trim_start();
    }
    chunks
}
