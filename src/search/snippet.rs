use crate::search::normalize::{normalize_for_search, normalize_with_offsets, original_span};

pub const ELLIPSIS: char = '\u{2026}';

/// Excerpt of `text` at most `max_len` chars long, centered on the first
/// occurrence of `normalized_query` (already folded).
///
/// Truncated edges are marked with an ellipsis. The match always lies inside
/// the excerpt unless it is longer than the excerpt itself.
pub fn build_snippet(text: &str, normalized_query: &str, max_len: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_len {
        return text.to_string();
    }
    if max_len == 0 {
        return String::new();
    }

    let Some((match_start, match_end)) = locate(text, normalized_query) else {
        let mut out: String = chars[..max_len - 1].iter().collect();
        out.push(ELLIPSIS);
        return out;
    };

    // room for an ellipsis on both sides
    let budget = max_len.saturating_sub(2).max(1);
    let match_len = match_end - match_start;
    let lead = budget.saturating_sub(match_len) / 2;
    let mut start = match_start.saturating_sub(lead);
    let end = (start + budget).min(chars.len());
    if end - start < budget {
        start = end.saturating_sub(budget);
    }

    let mut out = String::with_capacity(budget + 2);
    if start > 0 {
        out.push(ELLIPSIS);
    }
    out.extend(&chars[start..end]);
    if end < chars.len() {
        out.push(ELLIPSIS);
    }
    out
}

/// Char range `[start, end)` of the first match within the original text.
fn locate(text: &str, normalized_query: &str) -> Option<(usize, usize)> {
    if normalized_query.is_empty() {
        return None;
    }
    let (folded, offsets) = normalize_with_offsets(text);
    let byte_index = folded.find(normalized_query)?;
    let first = folded[..byte_index].chars().count();
    let span = original_span(text, &offsets, first, normalized_query.chars().count())?;
    Some((span.start, span.end))
}

/// Convenience for callers holding the raw query.
pub fn snippet_for_query(text: &str, raw_query: &str, max_len: usize) -> String {
    build_snippet(text, &normalize_for_search(raw_query.trim()), max_len)
}
