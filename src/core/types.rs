//! Shared check-engine types and timestamp handling.

use chrono::{DateTime, Local, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Timestamp format used everywhere a time is shown or persisted.
pub const TIME_FORMAT: &str = "%d %b %Y %H:%M %Z";

/// Common local timezone labels chrono cannot parse by name.
pub const LOCAL_ZONES: &[(&str, &str)] = &[
    ("AEST", "+10:00"),
    ("AEDT", "+11:00"),
    ("ACST", "+09:30"),
    ("ACDT", "+10:30"),
];

/// Public verdict of a check.
///
/// Normally a plain flag, but a sequence check reports the comma-separated
/// names of its failing members so that membership changes are visible as
/// value changes. `Named("")` is a pass. Serialized untagged, so the
/// document carries a JSON bool or string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FailState {
    Flag(bool),
    Named(String),
}

impl FailState {
    pub const PASS: FailState = FailState::Flag(false);
    pub const FAIL: FailState = FailState::Flag(true);

    pub fn is_fail(&self) -> bool {
        match self {
            FailState::Flag(f) => *f,
            FailState::Named(s) => !s.is_empty(),
        }
    }
}

impl Default for FailState {
    // A new check reports FAIL until its first pass.
    fn default() -> Self {
        FailState::FAIL
    }
}

impl std::fmt::Display for FailState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailState::Flag(v) => write!(f, "{}", v),
            FailState::Named(s) => write!(f, "{}", s),
        }
    }
}

/// Current time formatted in the site timezone, or local time without one.
pub fn time_string(timezone: Option<Tz>) -> String {
    match timezone {
        Some(tz) => Utc::now().with_timezone(&tz).format(TIME_FORMAT).to_string(),
        None => Local::now().format(TIME_FORMAT).to_string(),
    }
}

/// Resolve a zone name, logging and discarding anything unknown.
pub fn get_zone(name: &str) -> Option<Tz> {
    match name.parse::<Tz>() {
        Ok(tz) => Some(tz),
        Err(_) => {
            tracing::warn!("Ignored invalid timezone {:?}", name);
            None
        }
    }
}

fn zone_alias_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(AEST|AEDT|ACST|ACDT)\b").unwrap())
}

/// Parse a timestamp in any of the formats the monitor emits or receives.
///
/// Accepts RFC3339/RFC2822, the monitor's own display format, and a few
/// common layouts. The zone aliases in [`LOCAL_ZONES`] are rewritten to
/// numeric offsets first; any other trailing zone name is resolved through
/// the tz database, and an unknown abbreviation is read as `timezone` time
/// so `time_string` output always round-trips. Naive timestamps are
/// interpreted in `timezone` (local time without one).
pub fn parse_timestamp(text: &str, timezone: Option<Tz>) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let text = zone_alias_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            LOCAL_ZONES
                .iter()
                .find(|(name, _)| *name == &caps[1])
                .map(|(_, off)| *off)
                .unwrap_or("")
                .to_string()
        })
        .trim()
        .to_string();

    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(&text) {
        return Some(dt.with_timezone(&Utc));
    }
    const ZONED: &[&str] = &[
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M %z",
    ];
    for fmt in ZONED {
        if let Ok(dt) = DateTime::parse_from_str(&text, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    // a trailing zone name the formats above cannot carry, such as
    // "01 Aug 2026 12:00 UTC" written by time_string
    if let Some((head, zone)) = split_zone_name(&text) {
        let naive = parse_naive(head)?;
        return match zone.parse::<Tz>() {
            Ok(tz) => localize(naive, Some(tz)),
            // unknown abbreviation: read as site time
            Err(_) => localize(naive, timezone),
        };
    }
    localize(parse_naive(&text)?, timezone)
}

/// Split off a trailing alphabetic zone token, e.g. "UTC" or "CEST".
fn split_zone_name(text: &str) -> Option<(&str, &str)> {
    let (head, tail) = text.rsplit_once(|c: char| c.is_whitespace())?;
    if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_alphabetic()) {
        Some((head.trim_end(), tail))
    } else {
        None
    }
}

fn parse_naive(text: &str) -> Option<chrono::NaiveDateTime> {
    const NAIVE: &[&str] = &[
        "%d %b %Y %H:%M",
        "%d %b %Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in NAIVE {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive);
        }
    }
    None
}

fn localize(naive: chrono::NaiveDateTime, timezone: Option<Tz>) -> Option<DateTime<Utc>> {
    match timezone {
        Some(tz) => tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
        None => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}
