//! Notification actions fired on check transitions.
//!
//! Actions are opaque to the check engine: the only contract is
//! `trigger(check view) -> bool` plus the `flatten` serializer. Message
//! transports live behind the [`Notifier`] trait; the built-in `exec`
//! transport hands the message to a configured command, anything else is
//! written to the log so an external relay can pick it up.

use crate::config;
use crate::core::check::Check;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

/// Snapshot of the check fields a notification message is built from.
#[derive(Debug, Clone)]
pub struct CheckView {
    pub name: String,
    pub check_type: String,
    pub state: String,
    pub summary: String,
    pub last_check: String,
    pub log: Vec<String>,
}

impl CheckView {
    pub fn of(check: &Check) -> Self {
        CheckView {
            name: check.name.clone(),
            check_type: check.kind.to_string(),
            state: check.get_state().to_string(),
            summary: check.get_summary(),
            last_check: check.last_check.clone().unwrap_or_default(),
            log: check.log.clone(),
        }
    }

    fn subject(&self) -> String {
        format!("{} {}", self.name, self.state)
    }

    fn body(&self) -> String {
        let mut lines = vec![format!(
            "{} ({}) {} at {}",
            self.name, self.check_type, self.state, self.last_check
        )];
        if !self.summary.is_empty() {
            lines.push(self.summary.clone());
        }
        lines.extend(self.log.iter().cloned());
        lines.join("\n")
    }
}

/// Message transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> bool;
}

/// Pipes the message into a configured command: subject as the single
/// argument, body on stdin.
pub struct ExecNotifier {
    command: String,
}

#[async_trait]
impl Notifier for ExecNotifier {
    async fn send(&self, subject: &str, body: &str) -> bool {
        let spawned = tokio::process::Command::new(&self.command)
            .arg(subject)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("notify command {:?} failed to start: {}", self.command, e);
                return false;
            }
        };
        if let Some(mut stdin) = child.stdin.take() {
            if stdin.write_all(body.as_bytes()).await.is_err() {
                tracing::error!("notify command {:?} rejected message", self.command);
            }
        }
        match child.wait().await {
            Ok(status) if status.success() => true,
            Ok(status) => {
                tracing::error!("notify command {:?} exited {}", self.command, status);
                false
            }
            Err(e) => {
                tracing::error!("notify command {:?}: {}", self.command, e);
                false
            }
        }
    }
}

/// Fallback transport: the message lands in the site log.
pub struct LogNotifier {
    action_type: String,
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str) -> bool {
        tracing::warn!("[{}] {}: {}", self.action_type, subject, body);
        true
    }
}

/// A named, immutable notification action.
#[derive(Debug, Clone)]
pub struct Action {
    pub name: String,
    pub action_type: String,
    pub options: Map<String, Value>,
}

impl Action {
    /// Build an action from its flat configuration; a missing type tag
    /// rejects the entry.
    pub fn load(name: &str, cfg: &Value) -> Option<Action> {
        let cfg = cfg.as_object()?;
        let action_type = config::opt_str(cfg, "type")?;
        let options = config::opt_dict(cfg, "options").cloned().unwrap_or_default();
        Some(Action {
            name: name.to_string(),
            action_type,
            options,
        })
    }

    fn notifier(&self) -> Box<dyn Notifier> {
        match config::opt_str(&self.options, "command") {
            Some(command) => Box::new(ExecNotifier { command }),
            None => Box::new(LogNotifier {
                action_type: self.action_type.clone(),
            }),
        }
    }

    /// Deliver a transition notification for the given check.
    pub async fn trigger(&self, view: &CheckView) -> bool {
        tracing::info!("action {} ({}) for {}", self.name, self.action_type, view.name);
        self.notifier().send(&view.subject(), &view.body()).await
    }

    /// Persisted form, as stored under the document's `actions` map.
    pub fn flatten(&self) -> Value {
        json!({
            "type": self.action_type,
            "options": self.options,
        })
    }
}
