use std::ops::Range;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Folds text for diacritic- and case-insensitive matching: NFD decomposition,
/// combining marks dropped, lowercased.
pub fn normalize_for_search(text: &str) -> String {
    normalize_with_offsets(text).0
}

/// Like [`normalize_for_search`], but also returns, for every char of the
/// folded string, the index of the char in `text` it was produced from.
pub fn normalize_with_offsets(text: &str) -> (String, Vec<usize>) {
    let mut folded = String::with_capacity(text.len());
    let mut offsets = Vec::with_capacity(text.len());
    for (index, ch) in text.chars().enumerate() {
        for decomposed in std::iter::once(ch).nfd() {
            if is_combining_mark(decomposed) {
                continue;
            }
            for lower in decomposed.to_lowercase() {
                if is_combining_mark(lower) {
                    continue;
                }
                folded.push(lower);
                offsets.push(index);
            }
        }
    }
    (folded, offsets)
}

/// Char range in the original text covered by `count` folded chars starting
/// at folded index `first`. Combining marks trailing the last base char stay
/// inside the range.
pub fn original_span(
    text: &str,
    offsets: &[usize],
    first: usize,
    count: usize,
) -> Option<Range<usize>> {
    let start = *offsets.get(first)?;
    let last = *offsets.get(first + count.checked_sub(1)?)?;
    let marks = text
        .chars()
        .skip(last + 1)
        .take_while(|ch| is_combining_mark(*ch))
        .count();
    Some(start..last + 1 + marks)
}

/// `normalized_needle` must already be folded with [`normalize_for_search`].
pub fn contains_normalized(haystack: &str, normalized_needle: &str) -> bool {
    if normalized_needle.is_empty() {
        return true;
    }
    normalize_for_search(haystack).contains(normalized_needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_keeps_trailing_combining_marks() {
        let text = "cafe\u{0301}s";
        let (folded, offsets) = normalize_with_offsets(text);
        assert_eq!(folded, "cafes");
        assert_eq!(original_span(text, &offsets, 0, 4), Some(0..5));
        assert_eq!(original_span(text, &offsets, 4, 1), Some(5..6));
        assert_eq!(original_span(text, &offsets, 0, 0), None);
    }

    #[test]
    fn strips_accents_and_case() {
        assert_eq!(normalize_for_search("Café CRÈME"), "cafe creme");
        assert_eq!(normalize_for_search("Ångström"), "angstrom");
    }

    #[test]
    fn decomposed_input_folds_like_precomposed() {
        let decomposed = "cafe\u{0301}";
        assert_eq!(normalize_for_search(decomposed), "cafe");
        assert!(contains_normalized(decomposed, &normalize_for_search("CAFÉ")));
    }

    #[test]
    fn offsets_point_back_into_original_chars() {
        let (folded, offsets) = normalize_with_offsets("e\u{0301}tude Éa");
        assert_eq!(folded, "etude ea");
        // the combining accent on the first char is dropped, so index 1 is skipped
        assert_eq!(offsets, vec![0, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn empty_needle_always_matches() {
        assert!(contains_normalized("", ""));
        assert!(contains_normalized("anything", ""));
    }
}
