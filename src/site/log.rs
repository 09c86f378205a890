//! The site's bounded log ring and its tracing bridge.

use crate::config::defaults;
use chrono::Local;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Shared, bounded ring of log lines persisted with the site document.
/// Pruned in blocks from the head so persistence stays cheap.
#[derive(Debug, Clone, Default)]
pub struct SiteLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl SiteLog {
    pub fn new() -> Self {
        SiteLog::default()
    }

    pub fn push(&self, line: String) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(line);
        if entries.len() > defaults::LOG_LIMIT {
            entries.drain(..defaults::LOG_PRUNE);
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn replace(&self, lines: Vec<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        *entries = lines;
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mirrors WARN and ERROR records into the site log so recent trouble is
/// visible in the status surface and survives restarts.
pub struct SiteLogLayer {
    log: SiteLog,
}

impl SiteLogLayer {
    pub fn new(log: SiteLog) -> Self {
        SiteLogLayer { log }
    }
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            write!(self.message, "{:?}", value).ok();
        }
    }
}

impl<S: Subscriber> Layer<S> for SiteLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::WARN {
            return;
        }
        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);
        self.log.push(format!(
            "{} {} {}: {}",
            Local::now().format("%d %b %Y %H:%M"),
            meta.level(),
            meta.target(),
            visitor.message
        ));
    }
}
