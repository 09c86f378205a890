//! Shared helpers for integration tests.

use serde_json::{json, Value};
use sitewatch::cli::Cli;
use sitewatch::site::{Site, SiteLog};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write `doc` as the site document in `dir` and load a site from it.
pub async fn site_with_doc(dir: &TempDir, doc: &Value) -> Site {
    let path = dir.path().join("config.json");
    fs::write(&path, serde_json::to_string_pretty(doc).unwrap()).unwrap();
    let site = Site::new(SiteLog::new());
    let cli = Cli {
        config: Some(path),
        init: false,
        webui: true,
    };
    assert!(site.select_config(&cli).await.unwrap());
    site.load_config().await.unwrap();
    site
}

/// A disk check that fails (level 0) or passes (level 101) deterministically.
/// `pass_initially` seeds the runtime state so transition tests start from a
/// known fail state value.
pub fn disk_check(level: u64, threshold: u64, pass_initially: bool) -> Value {
    json!({
        "type": "disk",
        "threshold": threshold,
        "options": {"volume": "/", "level": level},
        "data": {"failState": !pass_initially}
    })
}

/// Install a notify script that appends its subject argument to a log file;
/// returns (command path, log path).
pub fn notify_script(dir: &Path) -> (PathBuf, PathBuf) {
    let script = dir.join("notify.sh");
    let log = dir.join("notify.log");
    fs::write(
        &script,
        format!("#!/bin/sh\necho \"$1\" >> {}\n", log.display()),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    (script, log)
}

pub fn notify_lines(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .map(|text| text.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
