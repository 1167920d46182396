use std::sync::LazyLock;

use regex::Regex;

use super::transcript::Message;
use super::tuning::{Tuning, STEM_KEYWORDS};

static Q_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\s*q\)\s*").unwrap());

/// Decide whether a message reads like a question stem. Looks at the text only,
/// never at neighbouring messages. First matching rule wins.
pub fn is_stem(normalized: &str, tuning: &Tuning) -> bool {
    let text = normalized.trim();
    if text.is_empty() {
        return false;
    }

    // "Q) ..." convention
    if Q_MARKER_RE.is_match(text) {
        return true;
    }

    if text.ends_with('?') {
        return true;
    }

    if STEM_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        let words = text.split_whitespace().count();
        if words > tuning.keyword_min_words {
            return true;
        }
        // Short topic labels like "Treatment:"
        if text.contains(':') {
            return true;
        }
    }

    // "Immature teratoma grading based on :" and friends
    if let Some((_, tail)) = text.rsplit_once(':') {
        if tail.trim().chars().count() < tuning.colon_tail_max_chars {
            return true;
        }
    }

    false
}

/// Set `is_stem` on every message.
pub fn annotate(messages: &mut [Message], tuning: &Tuning) {
    for message in messages.iter_mut() {
        message.is_stem = is_stem(&message.normalized_text, tuning);
    }
}
