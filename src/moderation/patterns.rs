// Local fallback classifier.
//
// An ordered table of (category, matcher, mask policy) rules. Every rule is
// checked against the original text; each rule that matches marks the text
// abusive and masks its spans in the running filtered text. Rules are applied
// in table order, so a later rule can re-mask a span an earlier rule already
// touched.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::LazyLock;

use regex_lite::Regex;

use super::censor::{mask_span, MaskPolicy};
use super::traits::ModerationVerdict;

/// Characters that count towards a symbol-spam run.
pub const SPAM_SYMBOLS: &[char] = &['!', '@', '#', '$', '%', '^', '&', '*'];

const PROFANITY: &[&str] = &[
    "fuck", "shit", "damn", "hell", "bitch", "asshole", "bastard", "crap", "piss", "cock", "dick",
    "pussy", "cunt",
];

const INSULTS: &[&str] = &[
    "stupid",
    "idiot",
    "fool",
    "dumb",
    "moron",
    "retard",
    "loser",
    "pathetic",
    "worthless",
    "useless",
];

const HATE: &[&str] = &[
    "hate",
    "kill",
    "die",
    "death",
    "murder",
    "racist",
    "sexist",
    "nazi",
    "terrorist",
    "faggot",
    "nigger",
];

const HARASSMENT: &[&str] = &[
    "shut up",
    "stfu",
    "kys",
    "kill yourself",
    "go die",
    "neck yourself",
];

const THREATS: &[&str] = &["threat", "bomb", "attack", "violence", "hurt", "harm", "destroy"];

static BUILTIN_RULES: LazyLock<Vec<PatternRule>> = LazyLock::new(|| {
    vec![
        PatternRule::new("PROFANITY", Matcher::builtin(PROFANITY), MaskPolicy::KeepEdges),
        PatternRule::new("INSULTS", Matcher::builtin(INSULTS), MaskPolicy::KeepEdges),
        PatternRule::new("HATE", Matcher::builtin(HATE), MaskPolicy::KeepEdges),
        PatternRule::new("HARASSMENT", Matcher::builtin(HARASSMENT), MaskPolicy::KeepEdges),
        PatternRule::new("THREATS", Matcher::builtin(THREATS), MaskPolicy::KeepEdges),
        PatternRule::new(
            "SPAM",
            Matcher::Runs {
                repeat_min: 5,
                symbol_min: 3,
            },
            MaskPolicy::KeepEdges,
        ),
    ]
});

/// How a rule finds offending spans.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Every non-overlapping match of a regular expression.
    Pattern(Regex),
    /// Runs of one repeated character (line breaks excluded) at least
    /// `repeat_min` long, or runs of `SPAM_SYMBOLS` at least `symbol_min`
    /// long. At each position the repeated-character run is tried first.
    Runs { repeat_min: usize, symbol_min: usize },
}

impl Matcher {
    /// Case-insensitive whole-word match against any of the given words or
    /// phrases. Words are matched literally.
    pub fn words(words: &[&str]) -> Result<Self, regex_lite::Error> {
        let alternatives: Vec<String> = words.iter().map(|w| regex_lite::escape(w)).collect();
        let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
        Ok(Self::Pattern(Regex::new(&pattern)?))
    }

    fn builtin(words: &[&str]) -> Self {
        Self::words(words).expect("built-in word lists compile")
    }

    /// Byte ranges of every span this matcher finds, in order.
    pub fn find_spans(&self, text: &str) -> Vec<Range<usize>> {
        match self {
            Self::Pattern(regex) => regex.find_iter(text).map(|m| m.range()).collect(),
            Self::Runs {
                repeat_min,
                symbol_min,
            } => run_spans(text, *repeat_min, *symbol_min),
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Pattern(regex) => regex.is_match(text),
            Self::Runs { .. } => !self.find_spans(text).is_empty(),
        }
    }
}

/// One row of the classification table.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub category: String,
    pub matcher: Matcher,
    pub mask: MaskPolicy,
}

impl PatternRule {
    pub fn new(category: &str, matcher: Matcher, mask: MaskPolicy) -> Self {
        Self {
            category: category.to_string(),
            matcher,
            mask,
        }
    }
}

/// Result of running the fallback classifier over a text.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub is_abusive: bool,
    pub filtered_text: String,
    /// Matched category labels in table order.
    pub categories: Vec<String>,
}

impl Classification {
    /// Convert into a verdict with the fixed fallback confidence and a reason
    /// listing the detected categories.
    pub fn into_verdict(self) -> ModerationVerdict {
        let reason = if self.is_abusive {
            format!("Detected {}", self.categories.join(", ").to_lowercase())
        } else {
            String::new()
        };

        ModerationVerdict {
            is_abusive: self.is_abusive,
            filtered_text: self.filtered_text,
            confidence: Some(if self.is_abusive { 0.8 } else { 0.1 }),
            categories: self.categories.into_iter().collect::<BTreeSet<_>>(),
            reason,
        }
    }
}

/// Deterministic, I/O-free classifier over an ordered rule table.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    rules: Cow<'static, [PatternRule]>,
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self {
            rules: Cow::Borrowed(BUILTIN_RULES.as_slice()),
        }
    }
}

impl PatternClassifier {
    /// Build a classifier over a caller-supplied rule table.
    pub fn with_rules(rules: Vec<PatternRule>) -> Self {
        Self {
            rules: Cow::Owned(rules),
        }
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// Classify a text. Never fails.
    ///
    /// Detection runs against the original text while masking runs against
    /// the progressively filtered text.
    pub fn classify(&self, text: &str) -> Classification {
        let mut filtered = text.to_string();
        let mut categories = Vec::new();

        for rule in self.rules.iter() {
            if !rule.matcher.is_match(text) {
                continue;
            }
            if !categories.contains(&rule.category) {
                categories.push(rule.category.clone());
            }
            let spans = rule.matcher.find_spans(&filtered);
            filtered = mask_spans(&filtered, &spans, rule.mask);
        }

        Classification {
            is_abusive: !categories.is_empty(),
            filtered_text: filtered,
            categories,
        }
    }
}

/// Replace each byte range with its mask. Ranges must be sorted and
/// non-overlapping.
fn mask_spans(text: &str, spans: &[Range<usize>], policy: MaskPolicy) -> String {
    if spans.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in spans {
        out.push_str(&text[cursor..span.start]);
        out.push_str(&mask_span(&text[span.clone()], policy));
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

fn is_line_break(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

fn run_spans(text: &str, repeat_min: usize, symbol_min: usize) -> Vec<Range<usize>> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let byte_at = |i: usize| chars.get(i).map_or(text.len(), |&(b, _)| b);

    let mut spans = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i].1;

        if !is_line_break(c) {
            let repeated = chars[i..].iter().take_while(|&&(_, d)| d == c).count();
            if repeated >= repeat_min {
                spans.push(byte_at(i)..byte_at(i + repeated));
                i += repeated;
                continue;
            }
        }

        let symbols = chars[i..]
            .iter()
            .take_while(|&&(_, d)| SPAM_SYMBOLS.contains(&d))
            .count();
        if symbols >= symbol_min {
            spans.push(byte_at(i)..byte_at(i + symbols));
            i += symbols;
            continue;
        }

        i += 1;
    }
    spans
}
