use crate::search::normalize::normalize_for_search;

const LIKE_ESCAPE: char = '\\';

/// Builds an FTS5 MATCH expression for a raw user query: a single quoted
/// phrase with a trailing prefix wildcard, so `caf` finds `cafeteria`.
///
/// Returns `None` when nothing searchable is left after escaping.
pub fn prepare_fts_query(raw: &str) -> Option<String> {
    let mut escaped = String::with_capacity(raw.len() + 4);
    for ch in raw.chars() {
        match ch {
            '"' => escaped.push_str("\"\""),
            '*' => {}
            '-' => escaped.push(' '),
            other => escaped.push(other),
        }
    }
    let collapsed = escaped.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() || collapsed.chars().all(|ch| ch == '"') {
        return None;
    }
    Some(format!("\"{collapsed}\"*"))
}

/// Pattern for `search_fold(column) LIKE ?1 ESCAPE '\'`: the folded query
/// with LIKE wildcards escaped, wrapped in `%`.
pub fn like_pattern(raw: &str) -> String {
    let folded = normalize_for_search(raw.trim());
    let mut pattern = String::with_capacity(folded.len() + 2);
    pattern.push('%');
    for ch in folded.chars() {
        if matches!(ch, '%' | '_' | LIKE_ESCAPE) {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}
