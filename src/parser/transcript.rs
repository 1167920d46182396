use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::debug;

use super::options::has_marker;

pub const UNKNOWN_AUTHOR: &str = "unknown";

/// `[d/m/yy, H:MM(:SS)( AM)] - ` or `d/m/yyyy, H:MM - ` at the start of a line.
static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*\[?(\d{1,2}/\d{1,2}/\d{2,4},?\s+\d{1,2}:\d{2}(?::\d{2})?(?:\s*[AP]M)?)(?:\]\s*-?|\s*-)\s*(.*)$",
    )
    .unwrap()
});
static AUTHOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([^:]{1,60}):(?:\s+|$)(.*)$").unwrap());
static MEMBERSHIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\bleft$|\bleft the group$|\badded$|joined using this group's invite link|created group|changed the subject|changed this group's icon|changed the group description|end-to-end encrypted)",
    )
    .unwrap()
});
static MEDIA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\b(?:image|video|sticker|document|audio|gif) omitted$|<media omitted>)").unwrap()
});

/// Tried in order; the first that parses wins. Formats whose year width does not
/// match the input are skipped, so `24` is never read as the year 24 AD.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%d/%m/%y %H:%M",
    "%d/%m/%y %H:%M:%S",
    "%d/%m/%y %I:%M %p",
    "%d/%m/%y %I:%M:%S %p",
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %I:%M %p",
    "%d/%m/%Y %I:%M:%S %p",
    "%m/%d/%y %H:%M",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%y %I:%M %p",
    "%m/%d/%y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %I:%M:%S %p",
];

/// One logical chat message: a timestamped line plus its continuation lines.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sequence_id: usize,
    pub timestamp: Option<NaiveDateTime>,
    pub author: String,
    pub raw_text: String,
    /// Lowercased `raw_text`, for matching only.
    pub normalized_text: String,
    pub is_stem: bool,
}

impl Message {
    pub fn new(
        sequence_id: usize,
        timestamp: Option<NaiveDateTime>,
        author: impl Into<String>,
        raw_text: impl Into<String>,
    ) -> Self {
        let raw_text = raw_text.into();
        let normalized_text = raw_text.to_lowercase();
        Message {
            sequence_id,
            timestamp,
            author: author.into(),
            raw_text,
            normalized_text,
            is_stem: false,
        }
    }
}

/// The timestamp prefix of a chat line, split from the rest of the line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinePrefix<'a> {
    pub stamp: &'a str,
    pub rest: &'a str,
}

pub fn split_prefix(line: &str) -> Option<LinePrefix<'_>> {
    let caps = LINE_RE.captures(line)?;
    Some(LinePrefix {
        stamp: caps.get(1)?.as_str(),
        rest: caps.get(2).map_or("", |m| m.as_str()),
    })
}

/// Parse the timestamp text captured by [`split_prefix`].
pub fn parse_timestamp(stamp: &str) -> Option<NaiveDateTime> {
    let cleaned = stamp
        .replace(['[', ']', ','], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let four_digit_year = cleaned
        .split_whitespace()
        .next()
        .and_then(|date| date.rsplit('/').next())
        .is_some_and(|year| year.len() == 4);

    TIMESTAMP_FORMATS
        .iter()
        .filter(|fmt| fmt.contains("%Y") == four_digit_year)
        .find_map(|fmt| NaiveDateTime::parse_from_str(&cleaned, fmt).ok())
}

/// Membership changes, group edits and media placeholders.
pub fn is_system_notice(text: &str) -> bool {
    let text = text.trim();
    MEMBERSHIP_RE.is_match(text) || MEDIA_RE.is_match(text)
}

fn is_media_placeholder(text: &str) -> bool {
    MEDIA_RE.is_match(text.trim())
}

/// Split the chat export into messages, merging continuation lines and dropping
/// system notices. Sequence ids are assigned 1-based in output order.
pub fn read_messages(text: &str) -> Vec<Message> {
    let mut done: Vec<Pending> = Vec::new();
    let mut current: Option<Pending> = None;
    let mut dropped = 0usize;

    for physical in text.lines() {
        let line = clean_line(physical);
        if line.is_empty() {
            continue;
        }

        if let Some(prefix) = split_prefix(&line) {
            let (author, body) = split_author(prefix.rest);
            // Membership notices carry no author; media placeholders do.
            if (author.is_none() && is_system_notice(body)) || is_media_placeholder(body) {
                debug!("dropping system notice: {}", body);
                dropped += 1;
                continue;
            }
            if let Some(prev) = current.take() {
                done.push(prev);
            }
            let mut next = Pending::new(
                parse_timestamp(prefix.stamp),
                author.unwrap_or(UNKNOWN_AUTHOR),
            );
            next.push(body);
            current = Some(next);
            continue;
        }

        // "B. Left" is an answer choice, not a member leaving.
        if !has_marker(&line) && is_system_notice(&line) {
            debug!("dropping system notice: {}", line);
            dropped += 1;
            continue;
        }

        match current.as_mut() {
            Some(pending) => pending.push(&line),
            None => {
                let mut pending = Pending::new(None, UNKNOWN_AUTHOR);
                pending.push(&line);
                current = Some(pending);
            }
        }
    }
    done.extend(current);

    let messages: Vec<Message> = done
        .into_iter()
        .filter(|p| !p.lines.is_empty())
        .enumerate()
        .map(|(i, p)| p.finish(i + 1))
        .collect();
    debug!(messages = messages.len(), dropped, "read transcript");
    messages
}

struct Pending {
    timestamp: Option<NaiveDateTime>,
    author: String,
    lines: Vec<String>,
}

impl Pending {
    fn new(timestamp: Option<NaiveDateTime>, author: &str) -> Self {
        Pending {
            timestamp,
            author: author.to_string(),
            lines: Vec::new(),
        }
    }

    fn push(&mut self, line: &str) {
        let line = line.trim();
        if !line.is_empty() {
            self.lines.push(line.to_string());
        }
    }

    fn finish(self, sequence_id: usize) -> Message {
        Message::new(sequence_id, self.timestamp, self.author, self.lines.join("\n"))
    }
}

/// Strip bidi marks some exporters sprinkle around names and media notices.
fn clean_line(line: &str) -> String {
    line.replace(['\u{200e}', '\u{200f}', '\u{feff}'], "")
        .trim()
        .to_string()
}

fn split_author(rest: &str) -> (Option<&str>, &str) {
    match AUTHOR_RE.captures(rest) {
        Some(caps) => {
            let author = caps.get(1).map_or("", |m| m.as_str()).trim();
            let body = caps.get(2).map_or("", |m| m.as_str());
            if author.is_empty() {
                (None, rest)
            } else {
                (Some(author), body)
            }
        }
        None => (None, rest),
    }
}
