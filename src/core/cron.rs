//! Calendar-expression evaluation for cron triggers.
//!
//! Fields support `*`, `*/n`, single values, ranges, comma lists, and
//! month / weekday names. `*/n` steps count from the field minimum, so
//! day `*/2` means the 1st, 3rd, 5th… Fields more significant than the
//! least significant one given default to `*`; less significant fields
//! default to their minimum, except `week` and `day_of_week` which always
//! default to `*`. Weekdays are numbered from Monday = 0.

use crate::core::trigger::CronSpec;
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Timelike};

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: &[&str] = &["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

// `min` is both the field's lowest legal value and the offset of the first
// name: `*/n` steps count from it, so month "*/2" means Jan, Mar, May.
fn parse_atom(token: &str, names: &[&str], min: u32) -> Option<u32> {
    if let Ok(n) = token.parse::<u32>() {
        return Some(n);
    }
    names
        .iter()
        .position(|n| *n == token)
        .map(|i| i as u32 + min)
}

fn expr_ok(expr: &str, names: &[&str], min: u32) -> bool {
    if expr == "*" {
        return true;
    }
    expr.split(',').all(|part| {
        if let Some(step) = part.strip_prefix("*/") {
            return step.parse::<u32>().map(|n| n > 0).unwrap_or(false);
        }
        match part.split_once('-') {
            Some((lo, hi)) => {
                parse_atom(lo, names, min).is_some() && parse_atom(hi, names, min).is_some()
            }
            None => parse_atom(part, names, min).is_some(),
        }
    })
}

fn expr_matches(expr: &str, value: u32, names: &[&str], min: u32) -> bool {
    if expr == "*" {
        return true;
    }
    expr.split(',').any(|part| {
        if let Some(step) = part.strip_prefix("*/") {
            return step
                .parse::<u32>()
                .map(|n| n > 0 && value >= min && (value - min) % n == 0)
                .unwrap_or(false);
        }
        match part.split_once('-') {
            Some((lo, hi)) => match (parse_atom(lo, names, min), parse_atom(hi, names, min)) {
                (Some(lo), Some(hi)) => value >= lo && value <= hi,
                _ => false,
            },
            None => parse_atom(part, names, min) == Some(value),
        }
    })
}

/// Syntax check for every field present in the spec.
pub fn validate(spec: &CronSpec) -> bool {
    let plain = [
        (&spec.year, 0u32),
        (&spec.week, 1),
        (&spec.hour, 0),
        (&spec.minute, 0),
        (&spec.second, 0),
        (&spec.day, 1),
    ];
    for (field, min) in plain {
        if let Some(expr) = field {
            if !expr_ok(expr, &[], min) {
                return false;
            }
        }
    }
    if let Some(expr) = &spec.month {
        if !expr_ok(expr, MONTH_NAMES, 1) {
            return false;
        }
    }
    if let Some(expr) = &spec.day_of_week {
        if !expr_ok(expr, DAY_NAMES, 0) {
            return false;
        }
    }
    true
}

struct Resolved {
    year: String,
    month: String,
    day: String,
    week: String,
    day_of_week: String,
    hour: String,
    minute: String,
    second: String,
}

fn resolve(spec: &CronSpec) -> Resolved {
    // Significance positions: year 0, month 1, day-level 2, hour 3,
    // minute 4, second 5. week/day_of_week share the day level.
    let day_level_set =
        spec.day.is_some() || spec.week.is_some() || spec.day_of_week.is_some();
    let least = [
        spec.year.is_some(),
        spec.month.is_some(),
        day_level_set,
        spec.hour.is_some(),
        spec.minute.is_some(),
        spec.second.is_some(),
    ]
    .iter()
    .rposition(|set| *set)
    .map(|p| p as i32)
    .unwrap_or(-1);

    let pick = |field: &Option<String>, pos: i32, min: &str| -> String {
        match field {
            Some(v) => v.clone(),
            None if pos <= least => "*".to_string(),
            None => min.to_string(),
        }
    };
    Resolved {
        year: spec.year.clone().unwrap_or_else(|| "*".to_string()),
        month: pick(&spec.month, 1, "1"),
        day: pick(&spec.day, 2, "1"),
        week: spec.week.clone().unwrap_or_else(|| "*".to_string()),
        day_of_week: spec.day_of_week.clone().unwrap_or_else(|| "*".to_string()),
        hour: pick(&spec.hour, 3, "0"),
        minute: pick(&spec.minute, 4, "0"),
        second: pick(&spec.second, 5, "0"),
    }
}

fn minute_matches(r: &Resolved, dt: &NaiveDateTime) -> bool {
    expr_matches(&r.year, dt.year().max(0) as u32, &[], 0)
        && expr_matches(&r.month, dt.month(), MONTH_NAMES, 1)
        && expr_matches(&r.day, dt.day(), &[], 1)
        && expr_matches(&r.week, dt.iso_week().week(), &[], 1)
        && expr_matches(
            &r.day_of_week,
            dt.weekday().num_days_from_monday(),
            DAY_NAMES,
            0,
        )
        && expr_matches(&r.hour, dt.hour(), &[], 0)
        && expr_matches(&r.minute, dt.minute(), &[], 0)
}

/// Next matching instant strictly after `after`, evaluated in its timezone.
///
/// Local times erased by a DST gap are skipped; ambiguous times take the
/// earliest mapping. Gives up after scanning one year.
pub fn next_fire<Z: TimeZone>(spec: &CronSpec, after: &DateTime<Z>) -> Option<DateTime<Z>> {
    if !validate(spec) {
        return None;
    }
    let r = resolve(spec);
    let tz = after.timezone();
    let after_naive = after.naive_local();

    let mut cursor = after_naive
        .with_second(0)
        .unwrap_or(after_naive)
        .with_nanosecond(0)
        .unwrap_or(after_naive);
    let max_minutes = 366 * 24 * 60;
    for _ in 0..max_minutes {
        if minute_matches(&r, &cursor) {
            for sec in 0..60u32 {
                if !expr_matches(&r.second, sec, &[], 0) {
                    continue;
                }
                let candidate = match cursor.with_second(sec) {
                    Some(c) => c,
                    None => continue,
                };
                if candidate <= after_naive {
                    continue;
                }
                match tz.from_local_datetime(&candidate) {
                    chrono::LocalResult::Single(dt) => return Some(dt),
                    chrono::LocalResult::Ambiguous(earliest, _) => return Some(earliest),
                    chrono::LocalResult::None => continue,
                }
            }
        }
        cursor += Duration::minutes(1);
    }
    None
}
