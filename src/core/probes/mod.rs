//! Probe bodies for the I/O-backed check kinds.
//!
//! A probe performs exactly one attempt and reports pass or fail; retry
//! counting, thresholds and transitions are the site's business. Probes
//! append to the attempt log and never touch check state directly. The
//! `sequence` and `remote` kinds have no body here: their outcomes are
//! composed from other checks' state by the site.

pub mod net;
pub mod resource;

use crate::config;
use crate::core::check::CheckKind;
use crate::core::types::FailState;
use serde_json::{Map, Value};

/// Transient probe failure. Only ever rendered into the attempt log.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("TLS: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("Certificate expires in {0} days")]
    CertExpiry(i64),
    #[error("{0}")]
    Protocol(String),
}

/// Working state handed to a probe body: an options snapshot and the
/// attempt log. The site writes `learned_hostkey` back into the check's
/// persisted options.
pub struct ProbeCtx {
    pub name: String,
    pub options: Map<String, Value>,
    pub log: Vec<String>,
    pub learned_hostkey: Option<String>,
}

impl ProbeCtx {
    pub fn new(name: &str, options: Map<String, Value>) -> Self {
        ProbeCtx {
            name: name.to_string(),
            options,
            log: Vec::new(),
            learned_hostkey: None,
        }
    }

    pub fn opt_str(&self, key: &str, default: &str) -> String {
        config::opt_str_or(&self.options, key, default)
    }

    pub fn opt_u64(&self, key: &str, default: u64) -> u64 {
        config::opt_u64(&self.options, key).unwrap_or(default)
    }

    pub fn opt_bool(&self, key: &str, default: bool) -> bool {
        config::opt_bool(&self.options, key).unwrap_or(default)
    }
}

/// Run a single attempt of the probe body for `kind`.
pub async fn run_once(kind: CheckKind, ctx: &mut ProbeCtx) -> FailState {
    let fail = match kind {
        CheckKind::Smtp => net::smtp(ctx).await,
        CheckKind::Submit => net::submit(ctx).await,
        CheckKind::Imap => net::imap(ctx).await,
        CheckKind::Https => net::https(ctx).await,
        CheckKind::Cert => net::cert(ctx).await,
        CheckKind::Ssh => net::ssh(ctx).await,
        CheckKind::Disk => resource::disk(ctx).await,
        CheckKind::Ups => resource::ups_status(ctx).await,
        CheckKind::UpsTest => resource::ups_test(ctx).await,
        // composed by the site, never probed here
        CheckKind::Sequence | CheckKind::Remote => false,
    };
    FailState::Flag(fail)
}
