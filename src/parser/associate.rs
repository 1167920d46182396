use chrono::{Duration, NaiveDateTime};
use itertools::Itertools;
use serde::Serialize;
use tracing::debug;

use super::options::{extract_options, has_marker, is_bare_marker, strip_marker};
use super::similarity::token_set_ratio;
use super::transcript::Message;
use super::tuning::Tuning;
use super::{dedup_by_stem, CollatedQuestion, OptionSource};

/// How an option block got attached to its stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssociationMethod {
    /// Options written inside the stem message itself.
    Internal,
    /// Options in the message right after the stem.
    Adjacent,
    /// Matched to an earlier stem by token-set score.
    Similarity { score: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionBlock {
    pub source_sequence_id: usize,
    pub method: AssociationMethod,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StemCandidate {
    pub sequence_id: usize,
    pub timestamp: Option<NaiveDateTime>,
    /// Stem text with any internal options removed.
    pub stem_text_only: String,
    pub blocks: Vec<OptionBlock>,
}

/// Link option blocks to stems and build the final question list.
///
/// `messages` must already carry `is_stem` and be in `sequence_id` order.
pub fn associate(messages: &[Message], tuning: &Tuning) -> Vec<CollatedQuestion> {
    let mut candidates = collect_stems(messages, tuning);
    attach_external(messages, &mut candidates, tuning);
    finalize(candidates)
}

// ── Pass 1: stems and their internal options ──

fn collect_stems(messages: &[Message], tuning: &Tuning) -> Vec<StemCandidate> {
    messages
        .iter()
        .filter(|m| m.is_stem)
        .map(|m| {
            let (stem_text_only, internal) = split_internal(&m.raw_text, tuning);
            let mut blocks = Vec::new();
            if !internal.is_empty() {
                debug!(stem = m.sequence_id, options = internal.len(), "internal options");
                blocks.push(OptionBlock {
                    source_sequence_id: m.sequence_id,
                    method: AssociationMethod::Internal,
                    options: internal,
                });
            }
            StemCandidate {
                sequence_id: m.sequence_id,
                timestamp: m.timestamp,
                stem_text_only,
                blocks,
            }
        })
        .collect()
}

/// Partition a stem message into its question text and trailing options.
///
/// Option mode starts at the first marker line, or at a short line right after
/// a long stem line, and never switches back.
pub fn split_internal(raw: &str, tuning: &Tuning) -> (String, Vec<String>) {
    let mut stem_lines: Vec<&str> = Vec::new();
    let mut options: Vec<String> = Vec::new();
    let mut in_options = false;

    for line in raw.lines().map(str::trim) {
        if line.is_empty() || is_bare_marker(line) {
            continue;
        }
        if !in_options {
            let len = line.chars().count();
            let after_long_stem_line = stem_lines
                .last()
                .is_some_and(|prev| prev.chars().count() > tuning.long_stem_line_chars);
            in_options =
                has_marker(line) || (after_long_stem_line && len < tuning.short_line_chars);
        }
        if in_options {
            options.push(line.to_string());
        } else {
            stem_lines.push(line);
        }
    }

    let stem_text = stem_lines.join("\n").trim().to_string();
    let stem_text = if stem_text.is_empty() {
        raw.trim().to_string()
    } else {
        stem_text
    };
    (stem_text, options)
}

// ── Pass 2: option blocks in other messages ──

fn attach_external(messages: &[Message], candidates: &mut [StemCandidate], tuning: &Tuning) {
    for (i, msg) in messages.iter().enumerate() {
        if msg.is_stem {
            continue;
        }
        let options = extract_options(&msg.raw_text, tuning);
        if options.is_empty() {
            continue;
        }

        let adjacent = match i.checked_sub(1).map(|p| &messages[p]) {
            Some(prev) if prev.is_stem => find_candidate(candidates, prev.sequence_id),
            _ => None,
        };
        if let Some(idx) = adjacent {
            debug!(
                options_from = msg.sequence_id,
                stem = candidates[idx].sequence_id,
                "adjacent association"
            );
            candidates[idx].blocks.push(OptionBlock {
                source_sequence_id: msg.sequence_id,
                method: AssociationMethod::Adjacent,
                options,
            });
            continue;
        }

        match best_similar_stem(msg, &options, candidates, tuning) {
            Some((idx, score)) => {
                debug!(
                    options_from = msg.sequence_id,
                    stem = candidates[idx].sequence_id,
                    score,
                    "similarity association"
                );
                candidates[idx].blocks.push(OptionBlock {
                    source_sequence_id: msg.sequence_id,
                    method: AssociationMethod::Similarity { score },
                    options,
                });
            }
            None => debug!(options_from = msg.sequence_id, "orphan option block"),
        }
    }
}

fn find_candidate(candidates: &[StemCandidate], sequence_id: usize) -> Option<usize> {
    candidates
        .binary_search_by_key(&sequence_id, |c| c.sequence_id)
        .ok()
}

fn best_similar_stem(
    msg: &Message,
    options: &[String],
    candidates: &[StemCandidate],
    tuning: &Tuning,
) -> Option<(usize, u8)> {
    let lowest = msg.sequence_id.saturating_sub(tuning.search_window);
    // A window too wide to represent means no lower bound.
    let earliest_time = msg.timestamp.and_then(|ts| {
        Duration::try_minutes(tuning.time_window_minutes).and_then(|w| ts.checked_sub_signed(w))
    });
    let preview: String = options
        .iter()
        .take(tuning.preview_lines)
        .join(" ")
        .chars()
        .take(tuning.preview_chars)
        .collect();

    let scores = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.sequence_id >= lowest && c.sequence_id < msg.sequence_id)
        .filter(|(_, c)| match (earliest_time, c.timestamp) {
            (Some(earliest), Some(ts)) => ts >= earliest,
            _ => true,
        })
        .map(|(idx, c)| (idx, token_set_ratio(&preview, &c.stem_text_only)));

    select_best(scores, tuning.similarity_threshold)
}

/// Highest score wins, the first one seen on ties. `None` when the winner is
/// below `threshold`.
pub fn select_best(
    scores: impl IntoIterator<Item = (usize, u8)>,
    threshold: u8,
) -> Option<(usize, u8)> {
    let mut best: Option<(usize, u8)> = None;
    for (idx, score) in scores {
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((idx, score));
        }
    }
    best.filter(|&(_, score)| score >= threshold)
}

// ── Pass 3: finalize ──

fn finalize(candidates: Vec<StemCandidate>) -> Vec<CollatedQuestion> {
    let questions = candidates
        .into_iter()
        .filter_map(|c| {
            let options: Vec<String> = c
                .blocks
                .iter()
                .flat_map(|b| b.options.iter())
                .map(|o| strip_marker(o))
                .filter(|o| !o.is_empty())
                .unique_by(|o| o.to_lowercase())
                .collect();
            if options.is_empty() || c.stem_text_only.is_empty() {
                return None;
            }
            let sources = c
                .blocks
                .iter()
                .map(|b| OptionSource {
                    sequence_id: b.source_sequence_id,
                    method: b.method,
                })
                .collect();
            Some(CollatedQuestion {
                stem_text: c.stem_text_only,
                options,
                stem_sequence_id: Some(c.sequence_id),
                sources,
            })
        })
        .collect();
    dedup_by_stem(questions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::collate_transcript;
    use crate::parser::stems::annotate;
    use chrono::NaiveDate;

    const FILLER: &str = "honestly the exam hall was freezing and my pen ran out of ink halfway through the paper today";

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    /// Stem "Which drug cardiac?" at `stem_at`, "- cardiac stent" at `option_at`,
    /// fillers everywhere else.
    fn distant_block(
        stem_at: usize,
        option_at: usize,
        stem_ts: Option<NaiveDateTime>,
        option_ts: Option<NaiveDateTime>,
        tuning: &Tuning,
    ) -> Vec<CollatedQuestion> {
        let mut msgs: Vec<Message> = (1..=option_at)
            .map(|seq| {
                if seq == stem_at {
                    Message::new(seq, stem_ts, "alice", "Which drug cardiac?")
                } else if seq == option_at {
                    Message::new(seq, option_ts, "bob", "- cardiac stent")
                } else {
                    Message::new(seq, None, "carol", FILLER)
                }
            })
            .collect();
        annotate(&mut msgs, tuning);
        associate(&msgs, tuning)
    }

    #[test]
    fn adjacent_options() {
        let text = "01/01/24, 10:00 - Alice: What is the capital of France?\n\
                    01/01/24, 10:01 - Bob: A. Paris\nB. Lyon";
        let qs = collate_transcript(text, &Tuning::default());
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].stem_text, "What is the capital of France?");
        assert_eq!(qs[0].options, vec!["Paris", "Lyon"]);
        assert_eq!(qs[0].stem_sequence_id, Some(1));
        assert_eq!(qs[0].sources.len(), 1);
        assert_eq!(qs[0].sources[0].sequence_id, 2);
        assert_eq!(qs[0].sources[0].method, AssociationMethod::Adjacent);
    }

    #[test]
    fn similarity_across_gap() {
        let qs = distant_block(5, 12, None, None, &Tuning::default());
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].stem_text, "Which drug cardiac?");
        assert_eq!(qs[0].options, vec!["cardiac stent"]);
        assert_eq!(
            qs[0].sources[0].method,
            AssociationMethod::Similarity { score: 70 }
        );
    }

    #[test]
    fn similarity_below_threshold_is_orphaned() {
        let tuning = Tuning {
            similarity_threshold: 71,
            ..Tuning::default()
        };
        assert!(distant_block(5, 12, None, None, &tuning).is_empty());
    }

    #[test]
    fn threshold_boundary() {
        assert_eq!(select_best([(0, 65)], 65), Some((0, 65)));
        assert_eq!(select_best([(0, 64)], 65), None);
        assert_eq!(select_best(std::iter::empty(), 65), None);
    }

    #[test]
    fn best_score_wins_earliest_on_ties() {
        assert_eq!(select_best([(0, 66), (1, 80), (2, 70)], 65), Some((1, 80)));
        assert_eq!(select_best([(0, 70), (1, 70)], 65), Some((0, 70)));
    }

    #[test]
    fn search_window_bounds() {
        let tuning = Tuning::default();
        // 20 - 15 = 5: still inside
        assert_eq!(distant_block(5, 20, None, None, &tuning).len(), 1);
        assert!(distant_block(5, 21, None, None, &tuning).is_empty());
    }

    #[test]
    fn time_window_applies_only_when_both_timed() {
        let tuning = Tuning::default();
        assert_eq!(
            distant_block(5, 12, Some(at(10, 0)), Some(at(10, 20)), &tuning).len(),
            1
        );
        assert!(distant_block(5, 12, Some(at(10, 0)), Some(at(10, 21)), &tuning).is_empty());
        assert_eq!(distant_block(5, 12, None, Some(at(23, 0)), &tuning).len(), 1);
        assert_eq!(distant_block(5, 12, Some(at(1, 0)), None, &tuning).len(), 1);
    }

    #[test]
    fn oversized_time_window_has_no_lower_bound() {
        for minutes in [1_000_000_000_000, i64::MAX] {
            let tuning = Tuning {
                time_window_minutes: minutes,
                ..Tuning::default()
            };
            let qs = distant_block(5, 12, Some(at(1, 0)), Some(at(23, 0)), &tuning);
            assert_eq!(qs.len(), 1);
            assert_eq!(qs[0].options, vec!["cardiac stent"]);
        }
    }

    #[test]
    fn chit_chat_only() {
        let text = "01/01/24, 10:00 - Alice: lol\n\
                    01/01/24, 10:01 - Bob: thanks\n\
                    01/01/24, 10:02 - Carol: see you tomorrow then";
        assert!(collate_transcript(text, &Tuning::default()).is_empty());
        assert!(collate_transcript("", &Tuning::default()).is_empty());
    }

    #[test]
    fn notice_between_stem_and_options() {
        let text = "01/01/24, 10:00 - Alice: What is the capital of France?\n\
                    01/01/24, 10:01 - Bob left\n\
                    Dave left the group\n\
                    01/01/24, 10:02 - Carol: A. Paris\nB. Lyon";
        let qs = collate_transcript(text, &Tuning::default());
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].options, vec!["Paris", "Lyon"]);
        assert_eq!(qs[0].sources[0].method, AssociationMethod::Adjacent);
    }

    #[test]
    fn internal_options_after_marker() {
        let text = "01/01/24, 10:00 - Alice: What is the capital of France?\nA. Paris\nB. Lyon";
        let qs = collate_transcript(text, &Tuning::default());
        assert_eq!(qs[0].stem_text, "What is the capital of France?");
        assert_eq!(qs[0].options, vec!["Paris", "Lyon"]);
        assert_eq!(qs[0].sources[0].method, AssociationMethod::Internal);
    }

    #[test]
    fn internal_options_after_long_stem_line() {
        let raw = "Most likely diagnosis for a patient with crushing chest pain radiating to the jaw\n\
                   Myocardial infarction\n\
                   Aortic dissection";
        let (stem, options) = split_internal(raw, &Tuning::default());
        assert_eq!(
            stem,
            "Most likely diagnosis for a patient with crushing chest pain radiating to the jaw"
        );
        assert_eq!(options, vec!["Myocardial infarction", "Aortic dissection"]);
    }

    #[test]
    fn short_stem_lines_stay_in_stem() {
        let (stem, options) = split_internal("Capital of\nFrance?", &Tuning::default());
        assert_eq!(stem, "Capital of\nFrance?");
        assert!(options.is_empty());
    }

    #[test]
    fn option_mode_never_reverts() {
        let raw = "Which is correct?\nA. Paris\nthis is a long trailing remark that is clearly not part of the option list at all";
        let (stem, options) = split_internal(raw, &Tuning::default());
        assert_eq!(stem, "Which is correct?");
        assert_eq!(options.len(), 2);
    }

    #[test]
    fn stem_text_falls_back_to_raw() {
        let (stem, options) = split_internal("A. Paris?\nB. Lyon", &Tuning::default());
        assert_eq!(stem, "A. Paris?\nB. Lyon");
        assert_eq!(options, vec!["A. Paris?", "B. Lyon"]);
    }

    #[test]
    fn stem_without_options_is_dropped() {
        let text = format!(
            "01/01/24, 10:00 - Alice: What is the capital of France?\n\
             01/01/24, 10:01 - Bob: {FILLER}"
        );
        assert!(collate_transcript(&text, &Tuning::default()).is_empty());
    }

    #[test]
    fn options_merge_and_dedupe() {
        let text = "01/01/24, 10:00 - Alice: What is the capital of France?\nA. Paris\nB. Lyon\n\
                    01/01/24, 10:01 - Bob: - paris\n- Nice";
        let qs = collate_transcript(text, &Tuning::default());
        assert_eq!(qs[0].options, vec!["Paris", "Lyon", "Nice"]);
        assert_eq!(qs[0].sources.len(), 2);
        assert_eq!(qs[0].sources[0].method, AssociationMethod::Internal);
        assert_eq!(qs[0].sources[1].method, AssociationMethod::Adjacent);
    }

    #[test]
    fn duplicate_stems_keep_first() {
        let text = "01/01/24, 10:00 - Alice: What is the capital of France?\n\
                    01/01/24, 10:01 - Bob: A. Paris\n\
                    01/01/24, 10:02 - Carol: what is the capital of france?\n\
                    01/01/24, 10:03 - Dan: A. Marseille";
        let qs = collate_transcript(text, &Tuning::default());
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].stem_text, "What is the capital of France?");
        assert_eq!(qs[0].options, vec!["Paris"]);
    }

    #[test]
    fn repeated_runs_agree() {
        let text = "01/01/24, 10:00 - Alice: What is the capital of France?\n\
                    01/01/24, 10:01 - Bob: A. Paris\nB. Lyon\n\
                    01/01/24, 10:05 - Carol: Which river flows through Paris?\n\
                    01/01/24, 10:06 - Dan: Seine\nLoire";
        let tuning = Tuning::default();
        assert_eq!(
            collate_transcript(text, &tuning),
            collate_transcript(text, &tuning)
        );
    }
}
