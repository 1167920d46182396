use std::sync::LazyLock;

use regex::Regex;

use super::tuning::Tuning;

/// `A.`, `b)`, `3:`, `-`, `•`, `*` followed by whitespace.
static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:[a-d][.):]|[1-4][.):]|[-•*])\s+").unwrap());
static ONLY_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:[a-d][.):]?|[1-4][.):]?|[-•*])\s*$").unwrap());
/// "Options were", "Options:", "optns -" opening an explicit option list.
static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:options\s+were|options?|optns?)\b\s*(?:[:\-]\s*(.*))?").unwrap()
});

pub fn has_marker(line: &str) -> bool {
    MARKER_RE.is_match(line)
}

/// A line that is nothing but a marker, e.g. `A.` or `-`.
pub fn is_bare_marker(line: &str) -> bool {
    ONLY_MARKER_RE.is_match(line)
}

/// Remove one leading marker; returns the trimmed remainder.
pub fn strip_marker(option: &str) -> String {
    MARKER_RE.replace(option, "").trim().to_string()
}

/// Pull the lines of `text` that look like answer options. Markers are kept;
/// they are stripped when the question is finalized.
pub fn extract_options(text: &str, tuning: &Tuning) -> Vec<String> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !is_bare_marker(l))
        .collect();

    let mut options: Vec<String> = Vec::new();
    let mut in_section = false;
    // Whether the previous kept line was accepted, and whether it qualifies as
    // an anchor for a short continuation line.
    let mut prev_anchor = false;

    for line in &lines {
        if let Some(caps) = SECTION_RE.captures(line) {
            in_section = true;
            let inline = caps.get(1).map_or("", |m| m.as_str()).trim();
            if !inline.is_empty() {
                options.push(inline.to_string());
            }
            prev_anchor = !inline.is_empty();
            continue;
        }

        let len = line.chars().count();
        let marked = has_marker(line);

        if in_section && len > tuning.section_break_chars && !marked {
            in_section = false;
            prev_anchor = false;
            continue;
        }

        if in_section || marked || (prev_anchor && len < tuning.short_line_chars) {
            options.push(line.to_string());
            prev_anchor = marked || len < tuning.short_line_chars;
        } else {
            prev_anchor = false;
        }
    }

    if options.is_empty() {
        options = short_block_fallback(&lines, tuning);
    }
    options
}

/// A handful of short lines with no markers at all, e.g. "Paris\nLyon\nNice".
fn short_block_fallback(lines: &[&str], tuning: &Tuning) -> Vec<String> {
    let total_chars: usize = lines.iter().map(|l| l.chars().count()).sum();
    if lines.is_empty()
        || lines.len() > tuning.fallback_max_lines
        || total_chars >= tuning.fallback_max_chars
    {
        return Vec::new();
    }

    let short = lines
        .iter()
        .filter(|l| l.chars().count() < tuning.short_line_chars)
        .count();
    if short as f64 >= lines.len() as f64 * tuning.fallback_short_ratio {
        lines.iter().map(|l| l.to_string()).collect()
    } else {
        Vec::new()
    }
}
