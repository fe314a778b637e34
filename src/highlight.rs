use std::ops::Range;

use crate::search::normalize::{normalize_for_search, normalize_with_offsets, original_span};

/// Markers wrapped around every highlighted span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightStyle {
    pub open: &'static str,
    pub close: &'static str,
}

impl HighlightStyle {
    pub const ANSI: Self = Self {
        open: "\u{1b}[1;33m",
        close: "\u{1b}[0m",
    };
    pub const BRACKETS: Self = Self {
        open: "[",
        close: "]",
    };
}

/// Char ranges of every non-overlapping occurrence of the folded query in
/// `text`, matched without regard to case or accents.
pub fn match_ranges(text: &str, normalized_query: &str) -> Vec<Range<usize>> {
    if normalized_query.is_empty() {
        return Vec::new();
    }
    let (folded, offsets) = normalize_with_offsets(text);
    let query_chars = normalized_query.chars().count();
    let mut ranges: Vec<Range<usize>> = Vec::new();
    for (byte_index, _) in folded.match_indices(normalized_query) {
        let first = folded[..byte_index].chars().count();
        let Some(range) = original_span(text, &offsets, first, query_chars) else {
            continue;
        };
        if ranges.last().is_some_and(|previous| previous.end > range.start) {
            continue;
        }
        ranges.push(range);
    }
    ranges
}

pub fn highlight(text: &str, raw_query: &str, style: HighlightStyle) -> String {
    let ranges = match_ranges(text, &normalize_for_search(raw_query.trim()));
    if ranges.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + ranges.len() * 8);
    let mut pending = ranges.iter().peekable();
    let mut open: Option<&Range<usize>> = None;
    for (index, ch) in text.chars().enumerate() {
        if open.is_none() {
            if let Some(range) = pending.next_if(|range| range.start == index) {
                out.push_str(style.open);
                open = Some(range);
            }
        }
        out.push(ch);
        if open.is_some_and(|range| range.end == index + 1) {
            out.push_str(style.close);
            open = None;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_every_occurrence() {
        assert_eq!(
            highlight("Pizza? pizza!", "pizza", HighlightStyle::BRACKETS),
            "[Pizza]? [pizza]!"
        );
    }

    #[test]
    fn ignores_accents_in_either_direction() {
        assert_eq!(
            highlight("Le Café de Flore", "cafe", HighlightStyle::BRACKETS),
            "Le [Café] de Flore"
        );
        assert_eq!(
            highlight("cafe au lait", "CAFÉ", HighlightStyle::BRACKETS),
            "[cafe] au lait"
        );
    }

    #[test]
    fn decomposed_input_maps_back_to_original_chars() {
        let ranges = match_ranges("e\u{0301}te\u{0301}", "ete");
        assert_eq!(ranges, vec![0..5]);
    }

    #[test]
    fn trailing_combining_mark_stays_inside_brackets() {
        assert_eq!(
            highlight("one cafe\u{0301} please", "cafe", HighlightStyle::BRACKETS),
            "one [cafe\u{0301}] please"
        );
    }

    #[test]
    fn blank_query_leaves_text_untouched() {
        assert_eq!(
            highlight("nothing here", "  ", HighlightStyle::ANSI),
            "nothing here"
        );
    }
}
