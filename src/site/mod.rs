//! The site: root object owning checks, actions, scheduler and the
//! persisted document, plus the update engine that drives every check
//! through its state machine.
//!
//! All maps live behind one async mutex. The lock is held for bookkeeping
//! only, never across probe I/O or action dispatch: an update snapshots
//! what it needs, runs the probe, then re-locks to settle the outcome.

pub mod log;
pub mod persist;

use crate::cli::Cli;
use crate::config::{self, defaults};
use crate::core::action::{Action, CheckView};
use crate::core::check::{self, Check, CheckKind};
use crate::core::probes::{self, ProbeCtx};
use crate::core::scheduler::Scheduler;
use crate::core::trigger::{self, Trigger};
use crate::core::types::{get_zone, parse_timestamp, time_string, FailState};
use chrono::Utc;
use chrono_tz::Tz;
use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{Mutex, Notify};

pub use log::{SiteLog, SiteLogLayer};

#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    #[error("check {0} already exists")]
    DuplicateCheck(String),
    #[error("invalid check config for {0}")]
    InvalidCheck(String),
    #[error("config: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Status snapshot served to the web surface; self-contained, no further
/// queries needed to render it.
#[derive(Debug, Clone, Serialize)]
pub struct SiteStatus {
    pub fail: bool,
    pub info: Option<String>,
    pub checks: IndexMap<String, CheckStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStatus {
    pub check_type: String,
    pub fail_state: FailState,
    pub trigger: Option<Trigger>,
    pub soft_fail: String,
    pub last_fail: String,
    pub last_pass: String,
}

pub struct SiteState {
    pub config_file: PathBuf,
    pub base: PathBuf,
    pub timezone: Option<Tz>,
    pub web_cfg: Option<Value>,
    pub actions: IndexMap<String, Action>,
    pub checks: IndexMap<String, Check>,
}

/// Handle to a running site. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Site {
    state: Arc<Mutex<SiteState>>,
    running: Arc<Mutex<HashSet<String>>>,
    scheduler: Arc<Scheduler>,
    log: SiteLog,
    shutdown: Arc<Notify>,
    web_ui: Arc<std::sync::atomic::AtomicBool>,
}

impl Site {
    pub fn new(site_log: SiteLog) -> Self {
        Site {
            state: Arc::new(Mutex::new(SiteState {
                config_file: PathBuf::from(defaults::CONFIG_FILE),
                base: PathBuf::from("."),
                timezone: None,
                web_cfg: None,
                actions: IndexMap::new(),
                checks: IndexMap::new(),
            })),
            running: Arc::new(Mutex::new(HashSet::new())),
            scheduler: Arc::new(Scheduler::new()),
            log: site_log,
            shutdown: Arc::new(Notify::new()),
            web_ui: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn site_log(&self) -> &SiteLog {
        &self.log
    }

    /// Apply command line choices; false aborts startup.
    pub async fn select_config(&self, cli: &Cli) -> Result<bool, SiteError> {
        let base = {
            let mut st = self.state.lock().await;
            if let Some(config) = &cli.config {
                let dir = config.parent().map(PathBuf::from).unwrap_or_default();
                let dir = if dir.as_os_str().is_empty() {
                    PathBuf::from(".")
                } else {
                    dir
                };
                st.base = std::fs::canonicalize(&dir).unwrap_or(dir);
                // anchor the file under the resolved base so a later chdir
                // cannot orphan a relative path
                let file = config
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(defaults::CONFIG_FILE));
                st.config_file = st.base.join(file);
            }
            self.web_ui
                .store(cli.webui, std::sync::atomic::Ordering::Relaxed);
            if !cli.webui {
                tracing::info!("Web UI disabled by command line option");
            }
            st.base.clone()
        };
        if cli.init {
            if !persist::init_site(&base, cli.webui)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn config_file(&self) -> PathBuf {
        self.state.lock().await.config_file.clone()
    }

    pub async fn base(&self) -> PathBuf {
        self.state.lock().await.base.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Load the document, build actions then checks, link dependency and
    /// sequence edges, then register every valid trigger.
    pub async fn load_config(&self) -> Result<(), SiteError> {
        let path = self.config_file().await;
        let doc = persist::load_document(&path)?;
        let root = doc
            .as_object()
            .ok_or_else(|| SiteError::Config("site document is not an object".into()))?;

        let mut st = self.state.lock().await;
        if let Some(base) = config::opt_str(root, "base") {
            st.base = PathBuf::from(base);
        }
        if let Some(tz) = config::opt_str(root, "timezone") {
            st.timezone = get_zone(&tz);
        }
        if let Some(web) = config::opt_dict(root, "webui") {
            let mut merged = defaults::webui_config();
            if let Value::Object(defaults_map) = &mut merged {
                for (key, slot) in defaults_map.iter_mut() {
                    if let Some(given) = web.get(key) {
                        *slot = given.clone();
                    }
                }
            }
            st.web_cfg = Some(merged);
        }
        if let Some(lines) = config::opt_str_list(root, "log") {
            self.log.replace(lines);
        }

        st.actions.clear();
        if let Some(actions) = config::opt_dict(root, "actions") {
            for (name, cfg) in actions {
                match Action::load(name, cfg) {
                    Some(action) => {
                        tracing::debug!("Load action {:?} ({})", name, action.action_type);
                        st.actions.insert(name.clone(), action);
                    }
                    None => tracing::info!("Invalid action {:?} ignored", name),
                }
            }
        }

        st.checks.clear();
        if let Some(checks) = config::opt_dict(root, "checks") {
            for (name, cfg) in checks {
                let Some(cfg) = cfg.as_object() else {
                    tracing::info!("Invalid check config {:?} ignored", name);
                    continue;
                };
                if let Some(mut check) = check::load_check(name, cfg, st.timezone) {
                    if let Some(names) = config::opt_str_list(cfg, "actions") {
                        for action in names {
                            if st.actions.contains_key(&action) {
                                check.add_action(&action);
                            } else {
                                tracing::info!("{} ignored unknown action {}", name, action);
                            }
                        }
                    }
                    tracing::debug!("Load check {:?} ({})", name, check.kind);
                    st.checks.insert(name.clone(), check);
                }
            }

            // second pass: dependency and sequence edges, now that every
            // check is present
            let names: Vec<String> = st.checks.keys().cloned().collect();
            for name in &names {
                let depends = checks
                    .get(name)
                    .and_then(|c| c.as_object())
                    .and_then(|c| config::opt_str_list(c, "depends"))
                    .unwrap_or_default();
                for dep in depends {
                    if st.checks.contains_key(&dep) {
                        if let Some(check) = st.checks.get_mut(name) {
                            check.add_depend(&dep);
                        }
                    }
                }
                let members: Vec<String> = st
                    .checks
                    .get(name)
                    .map(|c| c.members.clone())
                    .unwrap_or_default();
                let members: Vec<String> = members
                    .into_iter()
                    .filter(|m| st.checks.contains_key(m))
                    .collect();
                if let Some(check) = st.checks.get_mut(name) {
                    check.members = members;
                }
            }
        }

        let schedule: Vec<(String, Trigger, Option<Tz>)> = st
            .checks
            .iter_mut()
            .filter_map(|(name, check)| match &check.trigger {
                Some(t) if trigger::validate(t) => {
                    Some((name.clone(), t.clone(), check.timezone))
                }
                Some(_) => {
                    tracing::info!("Invalid trigger for {} ignored", name);
                    check.trigger = None;
                    None
                }
                None => None,
            })
            .collect();
        drop(st);

        for (name, trigger, tz) in schedule {
            tracing::debug!("Adding {} trigger to schedule", name);
            self.schedule(&name, &trigger, tz);
        }
        Ok(())
    }

    /// Serialize the whole site back to the document path, atomically.
    pub async fn save_config(&self) -> Result<(), SiteError> {
        let (path, doc) = {
            let st = self.state.lock().await;
            let mut actions = Map::new();
            for (name, action) in &st.actions {
                actions.insert(name.clone(), action.flatten());
            }
            let mut checks = Map::new();
            for (name, check) in &st.checks {
                checks.insert(name.clone(), check.flatten());
            }
            let mut doc = json!({
                "base": st.base.display().to_string(),
                "webui": st.web_cfg.clone().unwrap_or(Value::Null),
                "actions": actions,
                "checks": checks,
                "log": self.log.snapshot(),
            });
            if let Some(tz) = st.timezone {
                doc["timezone"] = json!(tz.name());
            }
            (st.config_file.clone(), doc)
        };
        let saved_path = path.clone();
        tokio::task::spawn_blocking(move || persist::save_document(&saved_path, &doc))
            .await
            .map_err(|e| SiteError::Config(format!("save task: {}", e)))??;
        tracing::debug!("Saved site config to {:?}", path);
        Ok(())
    }

    fn schedule(&self, name: &str, trigger: &Trigger, timezone: Option<Tz>) {
        let site = self.clone();
        let id = name.to_string();
        self.scheduler.add(name, trigger, timezone, move || {
            let site = site.clone();
            let id = id.clone();
            async move {
                site.update_check(&id).await;
            }
        });
    }

    /// Add a new check to the running site and schedule it.
    pub async fn add_check(&self, name: &str, cfg: &Value) -> Result<(), SiteError> {
        let cfg_map = cfg
            .as_object()
            .ok_or_else(|| SiteError::InvalidCheck(name.to_string()))?;
        let (trigger, timezone) = {
            let mut st = self.state.lock().await;
            if st.checks.contains_key(name) {
                return Err(SiteError::DuplicateCheck(name.to_string()));
            }
            let mut check = check::load_check(name, cfg_map, st.timezone)
                .ok_or_else(|| SiteError::InvalidCheck(name.to_string()))?;
            if let Some(names) = config::opt_str_list(cfg_map, "actions") {
                for action in names {
                    if st.actions.contains_key(&action) {
                        check.add_action(&action);
                    } else {
                        tracing::info!("{} ignored unknown action {}", name, action);
                    }
                }
            }
            if let Some(depends) = config::opt_str_list(cfg_map, "depends") {
                for dep in depends {
                    if st.checks.contains_key(&dep) {
                        check.add_depend(&dep);
                    }
                }
            }
            let present: Vec<String> = check
                .members
                .iter()
                .filter(|m| st.checks.contains_key(*m))
                .cloned()
                .collect();
            check.members = present;
            tracing::debug!("Load check {:?} ({})", name, check.kind);
            let trigger = check.trigger.clone();
            let timezone = check.timezone;
            st.checks.insert(name.to_string(), check);
            (trigger, timezone)
        };
        if let Some(trigger) = trigger {
            if trigger::validate(&trigger) {
                tracing::debug!("Adding {} trigger to schedule", name);
                self.schedule(name, &trigger, timezone);
            } else {
                tracing::info!("Invalid trigger for {} ignored", name);
                let mut st = self.state.lock().await;
                if let Some(check) = st.checks.get_mut(name) {
                    check.trigger = None;
                }
            }
        }
        Ok(())
    }

    /// Replace a check, rewriting every reference to its old name.
    pub async fn update_check_config(
        &self,
        old_name: &str,
        new_name: &str,
        cfg: &Value,
    ) -> Result<(), SiteError> {
        self.scheduler.remove(old_name);
        {
            let mut st = self.state.lock().await;
            st.checks.shift_remove(old_name);
        }
        self.add_check(new_name, cfg).await?;

        let mut st = self.state.lock().await;
        let others: Vec<String> = st
            .checks
            .keys()
            .filter(|n| n.as_str() != new_name)
            .cloned()
            .collect();
        for name in others {
            let Some(check) = st.checks.get_mut(&name) else {
                continue;
            };
            check.replace_depend(old_name, new_name);
            if check.kind == CheckKind::Sequence {
                check.replace_member(old_name, new_name);
            }
            if old_name != new_name {
                if let Some(Value::Array(list)) = check.options.get_mut("checks") {
                    for entry in list.iter_mut() {
                        if entry.as_str() == Some(old_name) {
                            *entry = Value::String(new_name.to_string());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Drop a check, scrubbing dependency edges and sequence memberships.
    pub async fn delete_check(&self, name: &str) {
        self.scheduler.remove(name);
        let mut st = self.state.lock().await;
        if st.checks.shift_remove(name).is_some() {
            let others: Vec<String> = st.checks.keys().cloned().collect();
            for other in others {
                let Some(check) = st.checks.get_mut(&other) else {
                    continue;
                };
                check.del_depend(name);
                if check.kind == CheckKind::Sequence {
                    check.del_member(name);
                }
                if let Some(Value::Array(list)) = check.options.get_mut("checks") {
                    let before = list.len();
                    list.retain(|entry| entry.as_str() != Some(name));
                    if list.len() != before {
                        tracing::debug!("Removing {} from {} options", name, other);
                    }
                }
            }
            tracing::warn!("Deleted check {} from site", name);
        }
    }

    /// Run one check by name, synchronously from the caller's view.
    pub async fn run_check(&self, name: &str) -> Option<FailState> {
        let known = {
            let st = self.state.lock().await;
            st.checks.contains_key(name)
        };
        if !known {
            return None;
        }
        tracing::debug!("Running check {}", name);
        Some(self.update_check(name).await)
    }

    /// Drive a check through a full update: dependency scan, probe attempts
    /// with retries, threshold settling, and action dispatch. Returns the
    /// post-update fail state; a soft-failed or missing check reports FAIL
    /// to its caller without transitioning.
    pub fn update_check<'a>(&'a self, name: &'a str) -> BoxFuture<'a, FailState> {
        async move {
            {
                let mut running = self.running.lock().await;
                if !running.insert(name.to_string()) {
                    // already mid-update, coalesce
                    let st = self.state.lock().await;
                    return st
                        .checks
                        .get(name)
                        .map(|c| c.fail_state.clone())
                        .unwrap_or(FailState::FAIL);
                }
            }
            let result = self.update_check_inner(name).await;
            self.running.lock().await.remove(name);
            result
        }
        .boxed()
    }

    async fn update_check_inner(&self, name: &str) -> FailState {
        enum Plan {
            Probe {
                kind: CheckKind,
                retries: u64,
                options: Map<String, Value>,
            },
            Sequence {
                members: Vec<String>,
            },
            Remote {
                prior: FailState,
                last_update: Option<String>,
                old_log: Vec<String>,
                timeout: Option<u64>,
                timezone: Option<Tz>,
            },
        }

        // bookkeeping under the lock: stamp, dependency scan, log rotation
        let (now, plan) = {
            let mut st = self.state.lock().await;
            let timezone = st.timezone;
            let dep_states: Vec<(String, bool)> = match st.checks.get(name) {
                Some(check) => check
                    .depends
                    .iter()
                    .map(|d| {
                        (
                            d.clone(),
                            st.checks.get(d).map(|c| c.fail_state.is_fail()).unwrap_or(false),
                        )
                    })
                    .collect(),
                None => return FailState::FAIL,
            };
            let check = match st.checks.get_mut(name) {
                Some(check) => check,
                None => return FailState::FAIL,
            };
            let now = time_string(check.timezone.or(timezone));
            check.last_check = Some(now.clone());
            let was_soft = check.soft_fail.take().is_some();

            if let Some((dep, _)) = dep_states.iter().find(|(_, failing)| *failing) {
                tracing::info!(
                    "{} ({}) SOFTFAIL (depends={}) {}",
                    name,
                    check.kind,
                    dep,
                    now
                );
                check.soft_fail = Some(dep.clone());
                if !was_soft {
                    // keep the last real report until the dependency clears
                    check.old_log = std::mem::take(&mut check.log);
                }
                check.log = vec![format!("SOFTFAIL (depends={})", dep)];
                // a soft-failed member counts as failing to its sequence
                return FailState::FAIL;
            }

            if was_soft {
                // keep the pre-soft-fail log so it survives the outage
                check.log.clear();
            } else {
                check.old_log = std::mem::take(&mut check.log);
            }

            let kind = check.kind;
            let retries = check.retries.max(1);
            let options = check.options.clone();
            let prior = check.fail_state.clone();
            let last_update = check.last_update.clone();
            let old_log = check.old_log.clone();
            let check_tz = check.timezone;

            let plan = match kind {
                CheckKind::Sequence => Plan::Sequence {
                    members: sorted_members(&st, name),
                },
                CheckKind::Remote => Plan::Remote {
                    prior,
                    last_update,
                    old_log,
                    timeout: config::opt_u64(&options, "timeout"),
                    timezone: check_tz,
                },
                kind => Plan::Probe {
                    kind,
                    retries,
                    options,
                },
            };
            (now, plan)
        };

        // probe phase, no site lock held
        let (cur_fail, new_log, learned_hostkey) = match plan {
            Plan::Probe {
                kind,
                retries,
                options,
            } => {
                let mut ctx = ProbeCtx::new(name, options);
                let mut cur_fail = FailState::FAIL;
                for attempt in 1..=retries {
                    if attempt > 1 {
                        tracing::info!("{} ({}): Retrying {}/{}", name, kind, attempt, retries);
                    }
                    cur_fail = probes::run_once(kind, &mut ctx).await;
                    if !cur_fail.is_fail() {
                        break;
                    }
                }
                (cur_fail, ctx.log, ctx.learned_hostkey)
            }
            Plan::Sequence { members } => {
                let mut failing: Vec<String> = Vec::new();
                let mut log = Vec::new();
                for member in &members {
                    let fail = self.update_check(member).await;
                    let (kind, member_log) = {
                        let st = self.state.lock().await;
                        match st.checks.get(member) {
                            Some(c) => (c.kind.to_string(), c.log.clone()),
                            None => continue,
                        }
                    };
                    if fail.is_fail() {
                        failing.push(member.clone());
                        log.push(format!("{} ({}): FAIL", member, kind));
                        log.extend(member_log);
                        log.push(String::new());
                    } else {
                        log.push(format!("{} ({}): PASS", member, kind));
                    }
                }
                (FailState::Named(failing.join(",")), log, None)
            }
            Plan::Remote {
                prior,
                last_update,
                old_log,
                timeout,
                timezone,
            } => {
                let mut log = Vec::new();
                let mut cur_fail = prior;
                if let (Some(timeout), Some(last)) =
                    (timeout.filter(|t| *t > 0), last_update.as_deref())
                {
                    match parse_timestamp(last, timezone) {
                        Some(seen) => {
                            let elapsed = (Utc::now() - seen).num_seconds();
                            if elapsed > timeout as i64 {
                                tracing::debug!(
                                    "{} (remote): Timeout waiting for update {} sec / {}",
                                    name,
                                    elapsed,
                                    last
                                );
                                log.push(format!(
                                    "Timeout waiting for update {} sec ({})",
                                    elapsed, last
                                ));
                                cur_fail = FailState::FAIL;
                            } else if !old_log.is_empty() {
                                // fresh enough: surface the last remote report
                                log = old_log;
                            }
                        }
                        None => {
                            if !old_log.is_empty() {
                                log = old_log;
                            }
                        }
                    }
                }
                (cur_fail, log, None)
            }
        };

        // settle under the lock, collect any actions to fire
        let (result, dispatch) = {
            let mut st = self.state.lock().await;
            let check = match st.checks.get_mut(name) {
                Some(check) => check,
                None => return FailState::FAIL,
            };
            check.log = new_log;
            if let Some(hostkey) = learned_hostkey {
                check.options.insert("hostkey".to_string(), Value::String(hostkey));
            }
            tracing::info!(
                "{} ({}): {} curFail={} prevFail={} failCount={} {}",
                name,
                check.kind,
                check.get_state(),
                cur_fail,
                check.fail_state,
                check.fail_count,
                now
            );
            let notify = check.settle(cur_fail, &now);
            let result = check.fail_state.clone();
            let dispatch = if notify {
                let view = CheckView::of(check);
                let names = check.actions.clone();
                let actions: Vec<Action> = names
                    .iter()
                    .filter_map(|n| st.actions.get(n).cloned())
                    .collect();
                Some((actions, view))
            } else {
                None
            };
            (result, dispatch)
        };

        if let Some((actions, view)) = dispatch {
            for action in actions {
                action.trigger(&view).await;
            }
        }
        result
    }

    /// Fold a remotely reported transition into a remote check, applying the
    /// same notification decision as a local update.
    pub async fn remote_update(&self, name: &str, check_type: &str, data: &Map<String, Value>) {
        let dispatch = {
            let mut st = self.state.lock().await;
            let site_tz = st.timezone;
            let check = match st.checks.get_mut(name) {
                Some(check) if check.kind == CheckKind::Remote => check,
                Some(_) => {
                    tracing::info!("Remote update for non-remote check {} ignored", name);
                    return;
                }
                None => {
                    tracing::info!("Remote update for unknown check {} ignored", name);
                    return;
                }
            };
            check.sub_type = Some(check_type.to_string());
            let timezone = check.timezone.or(site_tz);

            let new_state = match data.get("failState") {
                Some(Value::Bool(b)) => FailState::Flag(*b),
                Some(Value::String(s)) => FailState::Named(s.clone()),
                _ => check.fail_state.clone(),
            };
            let fail_count = config::opt_u64(data, "failCount").unwrap_or(0);
            let threshold = config::opt_u64(data, "threshold").unwrap_or(1).max(1);

            let mut notify = false;
            if new_state.is_fail() {
                if fail_count >= threshold && new_state != check.fail_state {
                    tracing::warn!(
                        "{} ({}.{}) Log: {:?}",
                        name,
                        check.kind,
                        check_type,
                        config::opt_str_list(data, "log").unwrap_or_default()
                    );
                    tracing::warn!("{} ({}.{}) FAIL", name, check.kind, check_type);
                    notify = check.fail_action;
                }
            } else if check.fail_state.is_fail() {
                tracing::warn!("{} ({}.{}) PASS", name, check.kind, check_type);
                notify = check.pass_action;
            }

            let mut last_update = time_string(timezone);
            if let Some(reported) = config::opt_str(data, "lastCheck").filter(|s| !s.is_empty()) {
                if parse_timestamp(&reported, timezone).is_some() {
                    last_update = reported;
                } else {
                    tracing::info!(
                        "{} ({}.{}): Ignored invalid last update time",
                        name,
                        check.kind,
                        check_type
                    );
                }
            }

            check.fail_state = new_state;
            check.last_update = Some(last_update);
            check.fail_count = fail_count;
            check.threshold = threshold;
            check.log = config::opt_str_list(data, "log").unwrap_or_default();
            check.soft_fail = config::opt_str(data, "softFail");
            check.last_check = config::opt_str(data, "lastCheck");
            check.last_fail = config::opt_str(data, "lastFail");
            check.last_pass = config::opt_str(data, "lastPass");

            if notify {
                let view = CheckView::of(check);
                let names = check.actions.clone();
                let actions: Vec<Action> = names
                    .iter()
                    .filter_map(|n| st.actions.get(n).cloned())
                    .collect();
                Some((actions, view))
            } else {
                None
            }
        };
        if let Some((actions, view)) = dispatch {
            for action in actions {
                action.trigger(&view).await;
            }
        }
    }

    /// Check names in (priority, insertion) order.
    pub async fn sorted_checks(&self) -> Vec<String> {
        let st = self.state.lock().await;
        sorted_names(&st.checks)
    }

    pub async fn get_status(&self) -> SiteStatus {
        let st = self.state.lock().await;
        let mut status = SiteStatus {
            fail: false,
            info: None,
            checks: IndexMap::new(),
        };
        let mut fail_count = 0usize;
        for name in sorted_names(&st.checks) {
            let check = &st.checks[&name];
            if check.fail_state.is_fail() {
                fail_count += 1;
                status.fail = true;
            }
            status.checks.insert(
                name.clone(),
                CheckStatus {
                    check_type: check.kind.to_string(),
                    fail_state: check.fail_state.clone(),
                    trigger: check.trigger.clone(),
                    soft_fail: check.soft_fail.clone().unwrap_or_default(),
                    last_fail: check.last_fail.clone().unwrap_or_default(),
                    last_pass: check.last_pass.clone().unwrap_or_default(),
                },
            );
        }
        if fail_count > 0 {
            status.info = Some(format!(
                "{} check{} in fail state",
                fail_count,
                if fail_count > 1 { "s" } else { "" }
            ));
        }
        status
    }

    /// Exercise the email and sms actions with a synthetic passing check.
    pub async fn test_actions(&self) -> bool {
        tracing::warn!("Manually notifying email and sms");
        let (email, sms, timezone) = {
            let st = self.state.lock().await;
            (
                st.actions.get("email").cloned(),
                st.actions.get("sms").cloned(),
                st.timezone,
            )
        };
        let view = CheckView {
            name: "Notification".to_string(),
            check_type: "action-test".to_string(),
            state: "PASS".to_string(),
            summary: String::new(),
            last_check: time_string(timezone),
            log: vec![
                "Testing action notification to:".to_string(),
                "email".to_string(),
                "sms".to_string(),
            ],
        };
        let email_ok = match email {
            Some(action) => action.trigger(&view).await,
            None => false,
        };
        let sms_ok = match sms {
            Some(action) => action.trigger(&view).await,
            None => false,
        };
        email_ok && sms_ok
    }

    /// Run until SIGTERM, then stop the scheduler and save state.
    pub async fn run(&self) -> i32 {
        if let Err(e) = self.load_config().await {
            tracing::error!("Error reading site config: {}", e);
            return -1;
        }
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    term.recv().await;
                    tracing::warn!("Site terminated by SIGTERM");
                    shutdown.notify_one();
                }
                Err(e) => tracing::error!("signal handler: {}", e),
            }
        });
        if !self.web_ui.load(std::sync::atomic::Ordering::Relaxed) {
            tracing::info!("Running without webui");
        }
        tracing::warn!("Starting");
        self.shutdown.notified().await;
        self.scheduler.shutdown();
        if let Err(e) = self.save_config().await {
            tracing::error!("Error saving site config: {}", e);
        }
        0
    }

    /// Peek at a check's state; test and UI support.
    pub async fn with_check<T>(&self, name: &str, f: impl FnOnce(&Check) -> T) -> Option<T> {
        let st = self.state.lock().await;
        st.checks.get(name).map(f)
    }

    pub async fn check_names(&self) -> Vec<String> {
        let st = self.state.lock().await;
        st.checks.keys().cloned().collect()
    }

    pub async fn action_names(&self) -> Vec<String> {
        let st = self.state.lock().await;
        st.actions.keys().cloned().collect()
    }

    pub async fn web_cfg(&self) -> Option<Value> {
        let st = self.state.lock().await;
        st.web_cfg.clone()
    }
}

fn sorted_names(checks: &IndexMap<String, Check>) -> Vec<String> {
    let mut aux: Vec<(i64, usize, String)> = checks
        .iter()
        .enumerate()
        .map(|(index, (name, check))| (check.priority, index, name.clone()))
        .collect();
    aux.sort();
    aux.into_iter().map(|(_, _, name)| name).collect()
}

/// Live sequence members in (priority, insertion) order.
fn sorted_members(st: &SiteState, name: &str) -> Vec<String> {
    let Some(seq) = st.checks.get(name) else {
        return Vec::new();
    };
    let mut aux: Vec<(i64, usize, String)> = seq
        .members
        .iter()
        .enumerate()
        .filter_map(|(index, member)| {
            st.checks
                .get(member)
                .map(|c| (c.priority, index, member.clone()))
        })
        .collect();
    aux.sort();
    aux.into_iter().map(|(_, _, member)| member).collect()
}
