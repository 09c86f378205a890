//! The monitored-item model and its transition arithmetic.
//!
//! A [`Check`] carries both configuration and runtime state. Probe bodies
//! live in [`crate::core::probes`]; the site drives the full update cycle
//! (dependency scan, retry loop, settle, notify) because dependencies,
//! sequence members and actions are resolved through the site's maps.

use crate::config;
use crate::core::trigger::Trigger;
use crate::core::types::{get_zone, FailState};
use chrono_tz::Tz;
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

/// Closed set of check implementations; the on-disk `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Cert,
    Smtp,
    Submit,
    Imap,
    Https,
    Ssh,
    Sequence,
    Ups,
    UpsTest,
    Remote,
    Disk,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Cert => "cert",
            CheckKind::Smtp => "smtp",
            CheckKind::Submit => "submit",
            CheckKind::Imap => "imap",
            CheckKind::Https => "https",
            CheckKind::Ssh => "ssh",
            CheckKind::Sequence => "sequence",
            CheckKind::Ups => "ups",
            CheckKind::UpsTest => "upstest",
            CheckKind::Remote => "remote",
            CheckKind::Disk => "disk",
        }
    }
}

impl FromStr for CheckKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cert" => Ok(CheckKind::Cert),
            "smtp" => Ok(CheckKind::Smtp),
            "submit" => Ok(CheckKind::Submit),
            "imap" => Ok(CheckKind::Imap),
            "https" => Ok(CheckKind::Https),
            "ssh" => Ok(CheckKind::Ssh),
            "sequence" => Ok(CheckKind::Sequence),
            "ups" => Ok(CheckKind::Ups),
            "upstest" => Ok(CheckKind::UpsTest),
            "remote" => Ok(CheckKind::Remote),
            "disk" => Ok(CheckKind::Disk),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named monitored item.
#[derive(Debug, Clone)]
pub struct Check {
    pub name: String,
    pub kind: CheckKind,
    pub sub_type: Option<String>,
    pub options: Map<String, Value>,
    pub trigger: Option<Trigger>,
    /// Consecutive failing updates required before the public state flips.
    pub threshold: u64,
    /// Probe attempts within a single update before one failure is recorded.
    pub retries: u64,
    pub priority: i64,
    pub fail_action: bool,
    pub pass_action: bool,
    pub publish: Option<String>,
    /// Attached action names, in attach order.
    pub actions: Vec<String>,
    /// Soft dependencies, in declaration order.
    pub depends: Vec<String>,
    /// Sequence membership, in declaration order. Empty for other kinds.
    pub members: Vec<String>,
    pub timezone: Option<Tz>,

    // runtime state
    pub fail_state: FailState,
    pub fail_count: u64,
    pub soft_fail: Option<String>,
    pub log: Vec<String>,
    pub old_log: Vec<String>,
    pub last_check: Option<String>,
    pub last_update: Option<String>,
    pub last_fail: Option<String>,
    pub last_pass: Option<String>,
}

impl Check {
    pub fn new(name: &str, kind: CheckKind) -> Self {
        Check {
            name: name.to_string(),
            kind,
            sub_type: None,
            options: Map::new(),
            trigger: None,
            threshold: 1,
            retries: 1,
            priority: 0,
            fail_action: true,
            pass_action: true,
            publish: None,
            actions: Vec::new(),
            depends: Vec::new(),
            members: Vec::new(),
            timezone: None,
            fail_state: FailState::default(),
            fail_count: 0,
            soft_fail: None,
            log: Vec::new(),
            old_log: Vec::new(),
            last_check: None,
            last_update: None,
            last_fail: None,
            last_pass: None,
        }
    }

    pub fn get_state(&self) -> &'static str {
        if self.fail_state.is_fail() {
            "FAIL"
        } else {
            "PASS"
        }
    }

    /// Short text summary of the current state for notification bodies.
    pub fn get_summary(&self) -> String {
        if !self.fail_state.is_fail() {
            return String::new();
        }
        if self.kind == CheckKind::Sequence {
            if let FailState::Named(csv) = &self.fail_state {
                return csv
                    .split(',')
                    .filter(|n| !n.is_empty())
                    .map(|n| format!(" {} \u{26a0}\u{fe0f}", n))
                    .collect::<Vec<_>>()
                    .join("\n");
            }
        }
        self.log.last().cloned().unwrap_or_default()
    }

    /// Fold one observed outcome into the state machine.
    ///
    /// Returns true when the attached actions should fire: a value change
    /// after `threshold` consecutive failures, or the first pass after a
    /// failure. Comparison is by value, so a sequence transitions whenever
    /// its set of failing members changes.
    pub fn settle(&mut self, cur_fail: FailState, now: &str) -> bool {
        if cur_fail.is_fail() {
            self.fail_count += 1;
            if self.fail_count >= self.threshold && cur_fail != self.fail_state {
                tracing::warn!("{} ({}) Log: {:?}", self.name, self.kind, self.log);
                tracing::warn!("{} ({}) FAIL", self.name, self.kind);
                self.fail_state = cur_fail;
                self.last_fail = Some(now.to_string());
                return self.fail_action;
            }
        } else {
            self.fail_count = 0;
            if self.fail_state.is_fail() {
                tracing::warn!("{} ({}) PASS", self.name, self.kind);
                self.fail_state = cur_fail;
                self.last_pass = Some(now.to_string());
                return self.pass_action;
            }
        }
        false
    }

    pub fn add_action(&mut self, name: &str) {
        if !self.actions.iter().any(|a| a == name) {
            self.actions.push(name.to_string());
        }
    }

    pub fn del_action(&mut self, name: &str) {
        self.actions.retain(|a| a != name);
    }

    pub fn add_depend(&mut self, name: &str) {
        if name != self.name && !self.depends.iter().any(|d| d == name) {
            self.depends.push(name.to_string());
            tracing::debug!("Added dependency {} to {}", name, self.name);
        }
    }

    pub fn del_depend(&mut self, name: &str) {
        if self.depends.iter().any(|d| d == name) {
            self.depends.retain(|d| d != name);
            tracing::debug!("Removed dependency {} from {}", name, self.name);
        }
    }

    /// Swap a dependency for a renamed check, keeping it only if it existed.
    pub fn replace_depend(&mut self, old: &str, new: &str) {
        if self.depends.iter().any(|d| d == old) {
            self.del_depend(old);
            self.add_depend(new);
        }
    }

    pub fn add_member(&mut self, name: &str) {
        if name != self.name && !self.members.iter().any(|m| m == name) {
            self.members.push(name.to_string());
            tracing::debug!("Added check {} to sequence {}", name, self.name);
        }
    }

    pub fn del_member(&mut self, name: &str) {
        if self.members.iter().any(|m| m == name) {
            self.members.retain(|m| m != name);
            tracing::debug!("Removed check {} from sequence {}", name, self.name);
        }
    }

    pub fn replace_member(&mut self, old: &str, new: &str) {
        if self.members.iter().any(|m| m == old) {
            self.del_member(old);
            self.add_member(new);
        }
    }

    /// Remote notification object describing this check.
    pub fn msg_obj(&self) -> Value {
        json!({
            "name": self.name,
            "type": self.kind.as_str(),
            "data": {
                "threshold": self.threshold,
                "failState": self.fail_state,
                "failCount": self.fail_count,
                "log": self.log,
                "softFail": self.soft_fail,
                "lastCheck": self.last_check,
                "lastFail": self.last_fail,
                "lastPass": self.last_pass,
            }
        })
    }

    /// Persisted form, as stored under the document's `checks` map.
    pub fn flatten(&self) -> Value {
        json!({
            "type": self.kind.as_str(),
            "subType": self.sub_type,
            "trigger": self.trigger,
            "threshold": self.threshold,
            "retries": self.retries,
            "priority": self.priority,
            "failAction": self.fail_action,
            "passAction": self.pass_action,
            "publish": self.publish,
            "options": self.options,
            "actions": self.actions,
            "depends": self.depends,
            "data": {
                "failState": self.fail_state,
                "failCount": self.fail_count,
                "log": self.log,
                "softFail": self.soft_fail,
                "lastCheck": self.last_check,
                "lastUpdate": self.last_update,
                "lastFail": self.last_fail,
                "lastPass": self.last_pass,
            }
        })
    }
}

/// Build a check from its flat configuration map.
///
/// Unknown types are rejected; everything else is taken leniently, field by
/// field, so a single malformed value never loses the whole check.
pub fn load_check(name: &str, cfg: &Map<String, Value>, site_tz: Option<Tz>) -> Option<Check> {
    let kind = match config::opt_str(cfg, "type").and_then(|t| t.parse::<CheckKind>().ok()) {
        Some(kind) => kind,
        None => {
            tracing::warn!("Invalid check type ignored for {:?}", name);
            return None;
        }
    };
    let mut check = Check::new(name, kind);
    check.timezone = site_tz;

    if let Some(options) = config::opt_dict(cfg, "options") {
        check.options = options.clone();
        if let Some(tz) = config::opt_str(options, "timezone") {
            check.timezone = get_zone(&tz).or(site_tz);
        }
        if kind == CheckKind::Sequence {
            check.members = config::opt_str_list(options, "checks").unwrap_or_default();
            check.members.retain(|m| m != name);
        }
    }
    if let Some(trigger) = cfg.get("trigger").filter(|v| !v.is_null()) {
        match serde_json::from_value::<Trigger>(trigger.clone()) {
            Ok(t) => check.trigger = Some(t),
            Err(_) => tracing::info!("Malformed trigger for {} ignored", name),
        }
    }
    if let Some(threshold) = config::opt_u64(cfg, "threshold").filter(|t| *t > 0) {
        check.threshold = threshold;
    }
    if let Some(retries) = config::opt_u64(cfg, "retries").filter(|r| *r > 0) {
        check.retries = retries;
    }
    check.sub_type = config::opt_str(cfg, "subType");
    if let Some(priority) = config::opt_i64(cfg, "priority") {
        check.priority = priority;
    }
    if let Some(fail_action) = config::opt_bool(cfg, "failAction") {
        check.fail_action = fail_action;
    }
    if let Some(pass_action) = config::opt_bool(cfg, "passAction") {
        check.pass_action = pass_action;
    }
    check.publish = config::opt_str(cfg, "publish");

    if let Some(data) = config::opt_dict(cfg, "data") {
        match data.get("failState") {
            Some(Value::Bool(b)) => check.fail_state = FailState::Flag(*b),
            Some(Value::String(s)) => check.fail_state = FailState::Named(s.clone()),
            Some(Value::Null) | None => {}
            Some(other) => tracing::info!("ignored invalid failState {}", other),
        }
        if let Some(count) = config::opt_u64(data, "failCount") {
            check.fail_count = count;
        }
        if let Some(threshold) = config::opt_u64(data, "threshold") {
            check.threshold = threshold.max(1);
        }
        check.soft_fail = config::opt_str(data, "softFail");
        check.last_check = config::opt_str(data, "lastCheck");
        check.last_update = config::opt_str(data, "lastUpdate");
        check.last_fail = config::opt_str(data, "lastFail");
        check.last_pass = config::opt_str(data, "lastPass");
        if let Some(log) = config::opt_str_list(data, "log") {
            check.log = log;
        }
    }
    Some(check)
}
