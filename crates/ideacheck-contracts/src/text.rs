//! Text normalization shared by the reconciler and its callers.
//!
//! Comparisons between a revised card and its base go through
//! [`normalize_comparable`], so echo prefixes, case and whitespace never make
//! two texts look different.

/// Meta-commentary tokens models tend to prepend to rewritten content.
pub const ECHO_PREFIXES: [&str; 5] = ["updated:", "revised:", "reframed:", "rewritten:", "refined:"];

pub const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Removes echo prefixes from the start of `text`, repeatedly, so
/// `"Revised: Revised: $46.9B"` becomes `"$46.9B"`. Text without a leading
/// prefix is returned untouched.
pub fn strip_known_prefixes(text: &str) -> String {
    let mut out = text;
    loop {
        let candidate = out.trim_start();
        let matched = ECHO_PREFIXES.iter().find(|prefix| {
            candidate
                .get(..prefix.len())
                .map(|head| head.eq_ignore_ascii_case(prefix))
                .unwrap_or(false)
        });
        let Some(prefix) = matched else {
            break;
        };
        out = candidate[prefix.len()..].trim_start();
    }
    out.to_string()
}

pub fn normalize_comparable(text: &str) -> String {
    strip_known_prefixes(text)
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase()
}

pub fn same_text(left: &str, right: &str) -> bool {
    normalize_comparable(left) == normalize_comparable(right)
}

pub fn same_text_list(left: &[String], right: &[String]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right.iter())
            .all(|(a, b)| same_text(a, b))
}

/// Splits on whitespace runs that follow `.`, `!` or `?`. Punctuation stays
/// with its sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut idx = 0;
    while idx < chars.len() {
        let (offset, ch) = chars[idx];
        let after_terminator = idx > 0 && matches!(chars[idx - 1].1, '.' | '!' | '?');
        if ch.is_whitespace() && after_terminator {
            let mut next = idx;
            while next < chars.len() && chars[next].1.is_whitespace() {
                next += 1;
            }
            parts.push(&text[start..offset]);
            start = chars.get(next).map(|(pos, _)| *pos).unwrap_or(text.len());
            idx = next;
            continue;
        }
        idx += 1;
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts.retain(|part| !part.is_empty());
    parts
}

pub fn limit_sentences(text: &str, max_sentences: usize) -> String {
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return String::new();
    }
    let parts = split_sentences(cleaned);
    if parts.len() <= max_sentences {
        return cleaned.to_string();
    }
    parts[..max_sentences].join(" ").trim().to_string()
}

/// Character-bounded cut with a visible marker, used when embedding large
/// payloads into prompts.
pub fn truncate_marked(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out = text.chars().take(max_chars).collect::<String>();
    out.push_str(TRUNCATION_MARKER);
    out
}

pub fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
