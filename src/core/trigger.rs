//! Trigger schedules and the textual trigger grammar.
//!
//! A trigger is either an interval (`{"interval": {...}}`) or a calendar
//! expression (`{"cron": {...}}`). The textual form is a token stream of
//! `value unit` pairs with a fixed alias table, e.g. `"interval 5 min"` or
//! `"cron mon-fri weekday 9 hr 30 min"`.

use crate::core::cron;
use crate::core::types::{get_zone, parse_timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Trigger {
    #[serde(rename = "interval")]
    Interval(IntervalSpec),
    #[serde(rename = "cron")]
    Cron(CronSpec),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntervalSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weeks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,
    /// Upper bound of the uniform random delay added to each firing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CronSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<u64>,
}

// Alias tables, in emission order. Both the field name and its alias are
// accepted on input; the alias is used on output.
const INTERVAL_ALIASES: &[(&str, &str)] = &[
    ("weeks", "week"),
    ("days", "day"),
    ("hours", "hr"),
    ("minutes", "min"),
    ("seconds", "sec"),
    ("start_date", "start"),
    ("end_date", "end"),
    ("timezone", "z"),
    ("jitter", "delay"),
];
const CRON_ALIASES: &[(&str, &str)] = &[
    ("year", "year"),
    ("month", "month"),
    ("day", "day"),
    ("week", "week"),
    ("day_of_week", "weekday"),
    ("hour", "hr"),
    ("minute", "min"),
    ("second", "sec"),
    ("start_date", "start"),
    ("end_date", "end"),
    ("timezone", "z"),
    ("jitter", "delay"),
];
const INT_FIELDS: &[&str] = &["weeks", "days", "hours", "minutes", "seconds", "jitter"];

impl IntervalSpec {
    /// Sum of the period fields. Zero means the spec cannot be scheduled.
    pub fn period(&self) -> Duration {
        let secs = self.weeks.unwrap_or(0) * 7 * 86400
            + self.days.unwrap_or(0) * 86400
            + self.hours.unwrap_or(0) * 3600
            + self.minutes.unwrap_or(0) * 60
            + self.seconds.unwrap_or(0);
        Duration::from_secs(secs)
    }

    fn get(&self, field: &str) -> Option<String> {
        match field {
            "weeks" => self.weeks.map(|v| v.to_string()),
            "days" => self.days.map(|v| v.to_string()),
            "hours" => self.hours.map(|v| v.to_string()),
            "minutes" => self.minutes.map(|v| v.to_string()),
            "seconds" => self.seconds.map(|v| v.to_string()),
            "jitter" => self.jitter.map(|v| v.to_string()),
            "start_date" => self.start_date.clone(),
            "end_date" => self.end_date.clone(),
            "timezone" => self.timezone.clone(),
            _ => None,
        }
    }

    fn set(&mut self, field: &str, value: &str) -> Result<(), ()> {
        if INT_FIELDS.contains(&field) {
            let n = value.parse::<u64>().map_err(|_| ())?;
            match field {
                "weeks" => self.weeks = Some(n),
                "days" => self.days = Some(n),
                "hours" => self.hours = Some(n),
                "minutes" => self.minutes = Some(n),
                "seconds" => self.seconds = Some(n),
                "jitter" => self.jitter = Some(n),
                _ => return Err(()),
            }
            return Ok(());
        }
        match field {
            "start_date" => self.start_date = Some(value.to_string()),
            "end_date" => self.end_date = Some(value.to_string()),
            "timezone" => self.timezone = Some(value.to_string()),
            _ => return Err(()),
        }
        Ok(())
    }
}

impl CronSpec {
    fn get(&self, field: &str) -> Option<String> {
        match field {
            "year" => self.year.clone(),
            "month" => self.month.clone(),
            "day" => self.day.clone(),
            "week" => self.week.clone(),
            "day_of_week" => self.day_of_week.clone(),
            "hour" => self.hour.clone(),
            "minute" => self.minute.clone(),
            "second" => self.second.clone(),
            "start_date" => self.start_date.clone(),
            "end_date" => self.end_date.clone(),
            "timezone" => self.timezone.clone(),
            "jitter" => self.jitter.map(|v| v.to_string()),
            _ => None,
        }
    }

    fn set(&mut self, field: &str, value: &str) -> Result<(), ()> {
        if field == "jitter" {
            self.jitter = Some(value.parse::<u64>().map_err(|_| ())?);
            return Ok(());
        }
        let slot = match field {
            "year" => &mut self.year,
            "month" => &mut self.month,
            "day" => &mut self.day,
            "week" => &mut self.week,
            "day_of_week" => &mut self.day_of_week,
            "hour" => &mut self.hour,
            "minute" => &mut self.minute,
            "second" => &mut self.second,
            "start_date" => &mut self.start_date,
            "end_date" => &mut self.end_date,
            "timezone" => &mut self.timezone,
            _ => return Err(()),
        };
        *slot = Some(value.to_string());
        Ok(())
    }
}

/// Whether a trigger can actually be scheduled.
pub fn validate(trigger: &Trigger) -> bool {
    let (start, end, tz, cron_ok) = match trigger {
        Trigger::Interval(spec) => {
            if spec.period().is_zero() {
                return false;
            }
            (&spec.start_date, &spec.end_date, &spec.timezone, true)
        }
        Trigger::Cron(spec) => (
            &spec.start_date,
            &spec.end_date,
            &spec.timezone,
            cron::validate(spec),
        ),
    };
    if !cron_ok {
        return false;
    }
    if let Some(name) = tz {
        if get_zone(name).is_none() {
            return false;
        }
    }
    for date in [start, end].into_iter().flatten() {
        if parse_timestamp(date, None).is_none() {
            return false;
        }
    }
    true
}

/// Render a trigger in its textual form.
pub fn trigger_to_text(trigger: &Trigger) -> String {
    let mut out: Vec<String> = Vec::new();
    match trigger {
        Trigger::Interval(spec) => {
            out.push("interval".to_string());
            for &(field, alias) in INTERVAL_ALIASES {
                if let Some(value) = spec.get(field) {
                    out.push(value);
                    out.push(alias.to_string());
                }
            }
        }
        Trigger::Cron(spec) => {
            out.push("cron".to_string());
            for &(field, alias) in CRON_ALIASES {
                if let Some(value) = spec.get(field) {
                    out.push(value);
                    out.push(alias.to_string());
                }
            }
        }
    }
    out.join(" ")
}

/// Parse the textual trigger grammar, returning `None` for anything that
/// cannot be scheduled.
pub fn text_to_trigger(text: &str) -> Option<Trigger> {
    let lowered = text.to_lowercase();
    let mut tokens: Vec<&str> = lowered.split_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }

    let mut trigger = match tokens[0] {
        "interval" => {
            tokens.remove(0);
            Trigger::Interval(IntervalSpec::default())
        }
        "cron" => {
            tokens.remove(0);
            Trigger::Cron(CronSpec::default())
        }
        _ => Trigger::Interval(IntervalSpec::default()),
    };

    let aliases = match &trigger {
        Trigger::Interval(_) => INTERVAL_ALIASES,
        Trigger::Cron(_) => CRON_ALIASES,
    };
    let mut key_map: HashMap<&str, &str> = HashMap::new();
    for &(field, alias) in aliases {
        key_map.insert(field, field);
        key_map.insert(alias, field);
    }

    let mut set = |trigger: &mut Trigger, field: &str, value: &str| -> Result<(), ()> {
        let present = match trigger {
            Trigger::Interval(spec) => spec.get(field).is_some(),
            Trigger::Cron(spec) => spec.get(field).is_some(),
        };
        if present {
            tracing::warn!("Trigger key {} re-defined", field);
        }
        match trigger {
            Trigger::Interval(spec) => spec.set(field, value),
            Trigger::Cron(spec) => spec.set(field, value),
        }
    };

    let mut pending: Vec<&str> = Vec::new();
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        if pending.is_empty() && key_map.contains_key(token) {
            tracing::debug!("Ignoring spurious unit {}", token);
            continue;
        }
        pending.push(token);
        if let Some(next) = iter.peek() {
            if let Some(field) = key_map.get(next).copied() {
                iter.next();
                let value = pending.join(" ");
                pending.clear();
                set(&mut trigger, field, &value).ok()?;
            }
        }
    }
    if !pending.is_empty() {
        // Lazily assume minutes for degenerate input
        let value = pending.join(" ");
        tracing::debug!("Extra value without units {}, assuming minutes", value);
        let field = key_map.get("min").copied()?;
        set(&mut trigger, field, &value).ok()?;
    }

    if validate(&trigger) {
        Some(trigger)
    } else {
        tracing::info!("Invalid trigger ignored: {:?}", text);
        None
    }
}
