//! Small string helpers shared by prompts, branch names and block reasons.

/// Truncate `text` to at most `max` characters on a char boundary.
#[must_use]
pub fn clip_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Truncate `text` to `max` characters and append `marker` if anything was cut.
#[must_use]
pub fn clip_with_marker(text: &str, max: usize, marker: &str) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut clipped = clip_chars(text, max);
    clipped.push_str(marker);
    clipped
}

/// Single-line preview: newlines escaped, length bounded.
#[must_use]
pub fn preview(text: &str, max: usize) -> String {
    clip_chars(text, max)
        .replace('\r', "\\r")
        .replace('\n', "\\n")
}

/// Lower-case slug: non-alphanumeric runs become one `-`, ends trimmed,
/// capped at `max_len` characters. Empty results fall back to `fallback`.
#[must_use]
pub fn slugify(text: &str, max_len: usize, fallback: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }
    let slug = clip_chars(&slug, max_len);
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug.to_string()
    }
}
