//! Job scheduling for check triggers.
//!
//! One background task per scheduled check, keyed by check name. The task
//! computes the next fire instant, sleeps, and awaits the fire callback to
//! completion before computing the next one, so a job never overlaps itself
//! and backlogged firings coalesce into at most one make-up run.

use crate::core::cron;
use crate::core::trigger::{IntervalSpec, Trigger};
use crate::core::types::parse_timestamp;
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct Scheduler {
    jobs: StdMutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler::default()
    }

    /// Schedule `fire` under the given id, replacing any previous job.
    pub fn add<F, Fut>(&self, id: &str, trigger: &Trigger, timezone: Option<Tz>, fire: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(job_loop(
            id.to_string(),
            trigger.clone(),
            timezone,
            fire,
        ));
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = jobs.insert(id.to_string(), handle) {
            old.abort();
        }
    }

    /// Drop a job. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) -> bool {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        match jobs.remove(id) {
            Some(handle) => {
                tracing::debug!("Removing {} from schedule", id);
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.contains_key(id)
    }

    pub fn job_count(&self) -> usize {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.len()
    }

    /// Abort every job; in-flight updates are cancelled at their next await.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
    }
}

fn effective_zone(spec_tz: &Option<String>, site_tz: Option<Tz>) -> Option<Tz> {
    spec_tz
        .as_deref()
        .and_then(crate::core::types::get_zone)
        .or(site_tz)
}

async fn sleep_until(due: DateTime<Utc>) {
    let wait = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    tokio::time::sleep(wait).await;
}

fn with_jitter(at: DateTime<Utc>, jitter: u64) -> DateTime<Utc> {
    if jitter == 0 {
        return at;
    }
    let delay = rand::thread_rng().gen_range(0..=jitter);
    at + chrono::Duration::seconds(delay as i64)
}

async fn job_loop<F, Fut>(id: String, trigger: Trigger, site_tz: Option<Tz>, fire: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    match trigger {
        Trigger::Interval(spec) => interval_loop(&id, &spec, site_tz, fire).await,
        Trigger::Cron(spec) => cron_loop(&id, &spec, site_tz, fire).await,
    }
}

async fn interval_loop<F, Fut>(id: &str, spec: &IntervalSpec, site_tz: Option<Tz>, fire: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = match chrono::Duration::from_std(spec.period()) {
        Ok(period) if !period.is_zero() => period,
        _ => {
            tracing::info!("Interval trigger for {} has no period, not scheduled", id);
            return;
        }
    };
    let tz = effective_zone(&spec.timezone, site_tz);
    let jitter = spec.jitter.unwrap_or(0);
    let end = spec.end_date.as_deref().and_then(|d| parse_timestamp(d, tz));
    let mut target = match spec.start_date.as_deref().and_then(|d| parse_timestamp(d, tz)) {
        Some(start) if start > Utc::now() => start,
        _ => Utc::now() + period,
    };
    loop {
        let due = with_jitter(target, jitter);
        if let Some(end) = end {
            if due > end {
                tracing::debug!("Job {} past end date, stopping", id);
                return;
            }
        }
        sleep_until(due).await;
        fire().await;
        target += period;
        if target < Utc::now() {
            // backlog: one make-up run already happened, skip the rest
            target = Utc::now();
        }
    }
}

async fn cron_loop<F, Fut>(
    id: &str,
    spec: &crate::core::trigger::CronSpec,
    site_tz: Option<Tz>,
    fire: F,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let tz = effective_zone(&spec.timezone, site_tz);
    let jitter = spec.jitter.unwrap_or(0);
    let end = spec.end_date.as_deref().and_then(|d| parse_timestamp(d, tz));
    let start = spec.start_date.as_deref().and_then(|d| parse_timestamp(d, tz));
    loop {
        let mut after = Utc::now();
        if let Some(start) = start {
            if start > after {
                after = start;
            }
        }
        let next = match tz {
            Some(tz) => cron::next_fire(spec, &after.with_timezone(&tz))
                .map(|d| d.with_timezone(&Utc)),
            None => cron::next_fire(spec, &after.with_timezone(&Local))
                .map(|d| d.with_timezone(&Utc)),
        };
        let next = match next {
            Some(next) => next,
            None => {
                tracing::info!("No further firings for {}, not scheduled", id);
                return;
            }
        };
        if let Some(end) = end {
            if next > end {
                tracing::debug!("Job {} past end date, stopping", id);
                return;
            }
        }
        sleep_until(with_jitter(next, jitter)).await;
        fire().await;
    }
}
