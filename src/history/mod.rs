//! Poll history reconstruction from cycle log lines
//!
//! The live monitor keeps only the most recent cycles in memory. Every cycle
//! is also written to an append-only text log, and this module turns those
//! lines back into [`HistoryEntry`] records. Three line shapes are
//! recognised, tried in order: the cycle summary, the error line and the
//! legacy raw availability document. Lines sharing a timestamp (to the
//! second) collapse into the first recognised one.

pub mod log_files;

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde_json::Value;
use tracing::trace;

use crate::monitor::{
    availability::{parse, AvailabilityDocument},
    model::{DateFilter, HistoryEntry, TIMESTAMP_FORMAT},
};

const SUMMARY_LEVEL: &str = "INFO";
const ERROR_LEVEL: &str = "ERROR";
const ERROR_PREFIXES: [&str; 2] = ["Monitoring error: ", "Error during monitoring cycle: "];

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})(?:,\d+)? ([A-Z]+): (.*)$")
        .expect("static header regex")
});

static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Monitor cycle: (\d+) available dates: \[(.*)\]\s*$")
        .expect("static summary regex")
});

/// Timestamp, level and message of one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine<'a> {
    pub timestamp: NaiveDateTime,
    pub level: &'a str,
    pub message: &'a str,
}

impl<'a> LogLine<'a> {
    pub fn parse(line: &'a str) -> Option<Self> {
        let captures = HEADER_RE.captures(line.trim_end_matches(['\r', '\n']))?;
        let timestamp =
            NaiveDateTime::parse_from_str(captures.get(1)?.as_str(), TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            timestamp,
            level: captures.get(2)?.as_str(),
            message: captures.get(3)?.as_str(),
        })
    }
}

/// One recognised log line shape.
pub trait LineMatcher: Sync {
    fn name(&self) -> &'static str;

    /// Returns `None` when the line is not of this shape or is malformed.
    fn parse(&self, line: &LogLine<'_>) -> Option<HistoryEntry>;
}

/// `Monitor cycle: 2 available dates: ['20260213', '20260215']`
pub struct CycleSummaryMatcher;

impl LineMatcher for CycleSummaryMatcher {
    fn name(&self) -> &'static str {
        "cycle_summary"
    }

    fn parse(&self, line: &LogLine<'_>) -> Option<HistoryEntry> {
        let captures = SUMMARY_RE.captures(line.message)?;
        let count = captures.get(1)?.as_str().parse::<usize>().ok()?;
        let dates = parse_date_list(captures.get(2)?.as_str())?;
        Some(HistoryEntry::success(line.timestamp, count, dates, None))
    }
}

/// `ERROR: Monitoring error: <text>`
pub struct ErrorMatcher;

impl LineMatcher for ErrorMatcher {
    fn name(&self) -> &'static str {
        "error"
    }

    fn parse(&self, line: &LogLine<'_>) -> Option<HistoryEntry> {
        if line.level != ERROR_LEVEL {
            return None;
        }
        let text = ERROR_PREFIXES
            .iter()
            .find_map(|prefix| line.message.strip_prefix(prefix))?;
        Some(HistoryEntry::failure(line.timestamp, text.trim()))
    }
}

/// Older runs logged the whole response body on an INFO line.
pub struct RawDocumentMatcher;

impl LineMatcher for RawDocumentMatcher {
    fn name(&self) -> &'static str {
        "raw_document"
    }

    fn parse(&self, line: &LogLine<'_>) -> Option<HistoryEntry> {
        if line.level != SUMMARY_LEVEL {
            return None;
        }
        let body = line.message.trim();
        if !(body.starts_with('{') && body.ends_with('}')) {
            return None;
        }

        let value = serde_json::from_str::<Value>(body)
            .or_else(|_| serde_json::from_str::<Value>(&python_literal_to_json(body)))
            .ok()
            .filter(Value::is_object)?;
        let document = AvailabilityDocument::from_value(value);
        let (count, dates) = parse(&document, &DateFilter::All);
        Some(HistoryEntry::success(
            line.timestamp,
            count,
            dates,
            document.provider_code(),
        ))
    }
}

/// Matchers in priority order. New log formats are appended here.
pub static LINE_MATCHERS: &[&dyn LineMatcher] =
    &[&CycleSummaryMatcher, &ErrorMatcher, &RawDocumentMatcher];

/// Rebuilds history from lines in the order given (oldest source first).
pub fn reconstruct<'a, I>(lines: I) -> Vec<HistoryEntry>
where
    I: IntoIterator<Item = &'a str>,
{
    reconstruct_with(lines, LINE_MATCHERS)
}

pub fn reconstruct_with<'a, I>(lines: I, matchers: &[&dyn LineMatcher]) -> Vec<HistoryEntry>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for raw in lines {
        let Some(line) = LogLine::parse(raw) else {
            continue;
        };
        if seen.contains(&line.timestamp) {
            continue;
        }

        let recognised = matchers
            .iter()
            .find_map(|matcher| matcher.parse(&line).map(|entry| (matcher.name(), entry)));
        if let Some((shape, entry)) = recognised {
            trace!(shape, timestamp = %line.timestamp, "recognised cycle log line");
            seen.insert(line.timestamp);
            entries.push(entry);
        }
    }

    entries
}

pub fn format_summary_line(checked_at: &NaiveDateTime, count: usize, dates: &[String]) -> String {
    let quoted: Vec<String> = dates.iter().map(|date| format!("'{date}'")).collect();
    format!(
        "{} {SUMMARY_LEVEL}: Monitor cycle: {count} available dates: [{}]",
        checked_at.format(TIMESTAMP_FORMAT),
        quoted.join(", ")
    )
}

pub fn format_error_line(checked_at: &NaiveDateTime, error: &str) -> String {
    let single_line = error.replace(['\r', '\n'], " ");
    format!(
        "{} {ERROR_LEVEL}: {}{}",
        checked_at.format(TIMESTAMP_FORMAT),
        ERROR_PREFIXES[0],
        single_line
    )
}

fn parse_date_list(inner: &str) -> Option<Vec<String>> {
    let inner = inner.trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }

    inner
        .split(',')
        .map(|item| {
            let item = item.trim();
            let quote = item.chars().next().filter(|c| *c == '\'' || *c == '"')?;
            let unquoted = item.strip_prefix(quote)?.strip_suffix(quote)?;
            if item.len() < 2 || unquoted.contains(quote) {
                return None;
            }
            Some(unquoted.to_string())
        })
        .collect()
}

/// Converts a single-quoted literal dump (`{'a': 'F', 'b': None}`) into JSON.
fn python_literal_to_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(open) = quote {
            match c {
                '\\' => match chars.next() {
                    Some('\'') => out.push('\''),
                    Some(escaped) => {
                        out.push('\\');
                        out.push(escaped);
                    }
                    None => out.push('\\'),
                },
                _ if c == open => {
                    out.push('"');
                    quote = None;
                }
                '"' => out.push_str("\\\""),
                _ => out.push(c),
            }
            continue;
        }

        match c {
            '\'' | '"' => {
                out.push('"');
                quote = Some(c);
            }
            _ if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !(next.is_ascii_alphanumeric() || next == '_') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                out.push_str(match word.as_str() {
                    "None" => "null",
                    "True" => "true",
                    "False" => "false",
                    other => other,
                });
            }
            _ => out.push(c),
        }
    }

    out
}
