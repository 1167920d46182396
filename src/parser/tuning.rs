use serde::Deserialize;

/// Phrases that mark a message as a likely question stem. Matched as plain
/// substrings of the lowercased text.
pub const STEM_KEYWORDS: &[&str] = &[
    "who", "what", "when", "where", "why", "how",
    "which of the following", "choose the", "select the",
    "next best step", "next best line", "approach", "management",
    "treatment", "indication", "contraindication", "c/i",
    "risk factor", "cause", "causes", "except", "not a", "incorrect", "correct statement",
    "definition", "diagnosis", "diagnose", "differentiate",
    "complication", "complicating", "predictor", "based on",
    "investigation of choice", "most likely", "picture", "sign",
    "technique", "trial", "referencing", "parameter", "value",
    "count", "grading", "placement", "entry", "criteria",
];

/// Every threshold the classifier, extractor and association engine use.
///
/// Defaults reproduce the production constants; a config file or `MCQ_TUNING__*`
/// environment variables can override individual fields.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// How many messages back a stem may sit from an orphan option block.
    pub search_window: usize,
    /// How far back in time a stem may sit, when both sides are timestamped.
    pub time_window_minutes: i64,
    /// Minimum token-set score (0-100) for a similarity association.
    pub similarity_threshold: u8,
    /// Option lines used to build the similarity preview.
    pub preview_lines: usize,
    /// Character cap on the similarity preview.
    pub preview_chars: usize,
    /// Keyword stems need strictly more words than this.
    pub keyword_min_words: usize,
    /// Text after the last colon must be shorter than this for a topic-label stem.
    pub colon_tail_max_chars: usize,
    /// Lines shorter than this count as "short" (option continuation, fallback).
    pub short_line_chars: usize,
    /// A stem line longer than this followed by a short line flips to options.
    pub long_stem_line_chars: usize,
    /// A marker-less line longer than this closes an explicit option section.
    pub section_break_chars: usize,
    pub fallback_max_lines: usize,
    pub fallback_max_chars: usize,
    /// Share of short lines needed for the structural fallback.
    pub fallback_short_ratio: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Tuning {
            search_window: 15,
            time_window_minutes: 20,
            similarity_threshold: 65,
            preview_lines: 3,
            preview_chars: 200,
            keyword_min_words: 3,
            colon_tail_max_chars: 15,
            short_line_chars: 80,
            long_stem_line_chars: 50,
            section_break_chars: 100,
            fallback_max_lines: 6,
            fallback_max_chars: 200,
            fallback_short_ratio: 0.6,
        }
    }
}
