//! Built-in defaults for site configuration and probe options.

use serde_json::{json, Value};

/// Default site document file name, relative to the base directory.
pub const CONFIG_FILE: &str = "config.json";

/// Minimum remaining certificate lifetime before a TLS probe fails.
pub const CERT_EXPIRY_DAYS: i64 = 7;

// Per-kind probe timeouts in seconds, overridable via the check's
// `timeout` option.
pub const SMTP_TIMEOUT: u64 = 10;
pub const SUBMIT_TIMEOUT: u64 = 10;
pub const IMAP_TIMEOUT: u64 = 10;
pub const CERT_TIMEOUT: u64 = 10;
pub const HTTPS_TIMEOUT: u64 = 10;
pub const SSH_TIMEOUT: u64 = 10;
pub const UPS_TIMEOUT: u64 = 15;

/// Disk usage percentage at which the disk check fails.
pub const DISK_LEVEL: u64 = 90;

/// Site log ring bound and prune block size.
pub const LOG_LIMIT: usize = 200;
pub const LOG_PRUNE: usize = 10;

/// Web UI TLS material file names, created under the site base by `--init`.
pub const SSL_CERT: &str = "webui-cert.pem";
pub const SSL_KEY: &str = "webui-key.pem";

// Generated passwords draw from an unambiguous 32-character alphabet,
// sized to PASS_BITS bits of entropy.
pub const PASS_CHARS: &str = "abcdefghjkmnpqrstuvwxyz23456789!";
pub const PASS_BITS: u32 = 70;

/// Web UI configuration skeleton merged with whatever the document carries.
pub fn webui_config() -> Value {
    json!({
        "host": "0.0.0.0",
        "port": 8443,
        "hostname": "localhost",
        "cert": null,
        "key": null,
        "users": {}
    })
}
