// Length-preserving masking helpers.
//
// Every mask here replaces characters one for one, so the masked text has
// the same character count as the input and rendered chat lines don't shift.

use std::sync::LazyLock;

use regex_lite::Regex;

/// The character used to hide offending content.
pub const MASK_CHAR: char = '*';

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").unwrap());

/// How a matched span is masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskPolicy {
    /// Every character becomes the mask character.
    Full,
    /// The first and last character survive; spans of one or two characters
    /// are fully masked.
    KeepEdges,
}

/// Mask a span according to the given policy.
pub fn mask_span(span: &str, policy: MaskPolicy) -> String {
    let len = span.chars().count();
    match policy {
        MaskPolicy::KeepEdges if len > 2 => {
            let mut chars = span.chars();
            let (Some(first), Some(last)) = (chars.next(), chars.next_back()) else {
                return mask_all(len);
            };
            let mut masked = String::with_capacity(span.len());
            masked.push(first);
            masked.extend(std::iter::repeat(MASK_CHAR).take(len - 2));
            masked.push(last);
            masked
        }
        _ => mask_all(len),
    }
}

fn mask_all(len: usize) -> String {
    std::iter::repeat(MASK_CHAR).take(len).collect()
}

/// Censor every word longer than three characters, keeping its first and
/// last character. Shorter words pass through unchanged.
///
/// Used when the remote model refuses to look at the text at all, so there
/// are no offending spans to target.
pub fn censor_words(text: &str) -> String {
    WORD.replace_all(text, |caps: &regex_lite::Captures<'_>| {
        let word = &caps[0];
        if word.chars().count() <= 3 {
            word.to_string()
        } else {
            mask_span(word, MaskPolicy::KeepEdges)
        }
    })
    .into_owned()
}
