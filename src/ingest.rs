use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use crate::config::Chunking;
use crate::error::{Error, Result};
use crate::parser::transcript::{parse_timestamp, split_prefix};

/// UTF-8 with invalid sequences replaced and a leading BOM removed.
pub fn decode_lossy(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_prefix('\u{feff}').unwrap_or(&text).to_string()
}

pub fn read_transcript(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(decode_lossy(&bytes))
}

/// `YYYY-MM-DD`.
pub fn parse_day(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| Error::InvalidDate(format!("{}: {}", s, e)))
}

/// Whole days, both ends included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// `None` (and a warning) when `start` is after `end`.
    pub fn inclusive(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        if start > end {
            warn!(%start, %end, "start date after end date, ignoring date filter");
            return None;
        }
        Some(DateRange { start, end })
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        let day = ts.date();
        self.start <= day && day <= self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub text: String,
    pub lines_seen: usize,
    pub lines_kept: usize,
}

/// Drop timestamped lines outside `range`. Lines without a timestamp prefix
/// are continuation lines and always kept; a prefix that does not parse counts
/// as outside.
pub fn filter_by_date_range(text: &str, range: &DateRange) -> FilterOutcome {
    let mut kept = Vec::new();
    let mut lines_seen = 0;
    for line in text.lines() {
        lines_seen += 1;
        let keep = match split_prefix(line) {
            Some(prefix) => parse_timestamp(prefix.stamp).is_some_and(|ts| range.contains(ts)),
            None => true,
        };
        if keep {
            kept.push(line);
        }
    }
    debug!(lines_seen, lines_kept = kept.len(), "date filter applied");
    FilterOutcome {
        lines_kept: kept.len(),
        text: kept.join("\n"),
        lines_seen,
    }
}

/// Timestamps found in a transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct DateSpan {
    pub earliest: NaiveDateTime,
    pub latest: NaiveDateTime,
    pub timestamped_lines: usize,
    pub total_lines: usize,
    /// 1-based line numbers of the first and last parseable timestamp.
    pub first_line: usize,
    pub last_line: usize,
}

pub fn scan_date_span(text: &str) -> Option<DateSpan> {
    let mut span: Option<DateSpan> = None;
    let mut total_lines = 0;
    for (idx, line) in text.lines().enumerate() {
        total_lines += 1;
        let Some(ts) = split_prefix(line).and_then(|p| parse_timestamp(p.stamp)) else {
            continue;
        };
        let line_no = idx + 1;
        match span.as_mut() {
            Some(s) => {
                s.earliest = s.earliest.min(ts);
                s.latest = s.latest.max(ts);
                s.timestamped_lines += 1;
                s.last_line = line_no;
            }
            None => {
                span = Some(DateSpan {
                    earliest: ts,
                    latest: ts,
                    timestamped_lines: 1,
                    total_lines: 0,
                    first_line: line_no,
                    last_line: line_no,
                })
            }
        }
    }
    span.map(|s| DateSpan { total_lines, ..s })
}

/// Split into chunks of whole lines for the external extractor.
///
/// Each chunk stays within `target_chars` unless a single line is longer. The
/// next chunk repeats the last `overlap_lines` lines of the previous one but
/// always starts at least one line further on.
pub fn chunk_transcript(text: &str, chunking: &Chunking) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < lines.len() {
        let mut end = start;
        let mut size = 0;
        while end < lines.len() {
            let add = lines[end].chars().count() + 1;
            if end > start && size + add > chunking.target_chars {
                break;
            }
            size += add;
            end += 1;
        }
        chunks.push(lines[start..end].join("\n"));
        if end >= lines.len() {
            break;
        }
        start = end.saturating_sub(chunking.overlap_lines).max(start + 1);
    }

    chunks.retain(|c| !c.trim().is_empty());
    debug!(chunks = chunks.len(), "transcript chunked");
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        parse_day(s).unwrap()
    }

    const CHAT: &str = "01/03/24, 09:00 - Alice: Which nerve?\n\
                        A. Ulnar\n\
                        02/03/24, 10:00 - Bob: - Radial\n\
                        03/03/24, 11:00 - Carol: thanks\n\
                        31/31/24, 12:00 - Dan: broken stamp";

    #[test]
    fn bom_and_invalid_bytes() {
        assert_eq!(decode_lossy(b"\xef\xbb\xbfhello"), "hello");
        assert_eq!(decode_lossy(b"caf\xe9"), "caf\u{fffd}");
    }

    #[test]
    fn parse_day_rejects_garbage() {
        assert_eq!(day("2024-03-02"), NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert!(matches!(parse_day("02/03/2024"), Err(Error::InvalidDate(_))));
    }

    #[test]
    fn inclusive_range_covers_whole_days() {
        let range = DateRange::inclusive(day("2024-03-02"), day("2024-03-02")).unwrap();
        let late = day("2024-03-02").and_hms_opt(23, 59, 59).unwrap();
        let next = day("2024-03-03").and_hms_opt(0, 0, 0).unwrap();
        assert!(range.contains(late));
        assert!(!range.contains(next));
        assert!(DateRange::inclusive(day("2024-03-03"), day("2024-03-02")).is_none());
    }

    #[test]
    fn filter_keeps_continuations() {
        let range = DateRange::inclusive(day("2024-03-01"), day("2024-03-02")).unwrap();
        let out = filter_by_date_range(CHAT, &range);
        assert_eq!(out.lines_seen, 5);
        assert_eq!(out.lines_kept, 3);
        assert_eq!(
            out.text,
            "01/03/24, 09:00 - Alice: Which nerve?\nA. Ulnar\n02/03/24, 10:00 - Bob: - Radial"
        );
    }

    #[test]
    fn date_span() {
        let span = scan_date_span(CHAT).unwrap();
        assert_eq!(span.earliest, day("2024-03-01").and_hms_opt(9, 0, 0).unwrap());
        assert_eq!(span.latest, day("2024-03-03").and_hms_opt(11, 0, 0).unwrap());
        assert_eq!(span.timestamped_lines, 3);
        assert_eq!(span.total_lines, 5);
        assert_eq!((span.first_line, span.last_line), (1, 4));
        assert!(scan_date_span("no stamps here\nat all").is_none());
    }

    #[test]
    fn chunks_overlap() {
        let text = (1..=10).map(|i| format!("a{}", i)).collect::<Vec<_>>().join("\n");
        let chunking = Chunking {
            target_chars: 9,
            overlap_lines: 1,
        };
        let chunks = chunk_transcript(&text, &chunking);
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0], "a1\na2\na3");
        assert_eq!(chunks[1], "a3\na4\na5");
        assert_eq!(chunks[4], "a9\na10");
    }

    #[test]
    fn oversized_line_is_its_own_chunk() {
        let long = "x".repeat(50);
        let text = format!("short\n{}\ntail", long);
        let chunking = Chunking {
            target_chars: 20,
            overlap_lines: 0,
        };
        assert_eq!(chunk_transcript(&text, &chunking), vec!["short", long.as_str(), "tail"]);
    }

    #[test]
    fn overlap_always_progresses() {
        let chunking = Chunking {
            target_chars: 5,
            overlap_lines: 10,
        };
        let chunks = chunk_transcript("aaaa\nbbbb\ncccc", &chunking);
        assert_eq!(chunks, vec!["aaaa", "bbbb", "cccc"]);
    }

    #[test]
    fn blank_chunks_dropped() {
        assert!(chunk_transcript("", &Chunking::default()).is_empty());
        assert!(chunk_transcript("  \n   ", &Chunking::default()).is_empty());
    }
}
