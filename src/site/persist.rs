//! Site document persistence and first-run provisioning.
//!
//! Saves are atomic: an existing target is hard-linked aside, the new
//! content is written to a temp file in the same directory and fsynced,
//! then renamed over the target; the link becomes `<path>.bak`. A reader
//! never observes a truncated document and a crash mid-save leaves the
//! previous document in place.

use super::SiteError;
use crate::config::defaults;
use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
use argon2::Argon2;
use rand::Rng;
use serde_json::{json, Value};
use std::fs;
use std::io::{IsTerminal, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

fn rand_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect()
}

pub fn load_document(path: &Path) -> Result<Value, SiteError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

pub fn save_document(path: &Path, doc: &Value) -> Result<(), SiteError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    // keep a handle on the previous document for the .bak rename
    let mut backup = None;
    if path.exists() {
        let link = PathBuf::from(format!("{}.{}", path.display(), rand_hex(12)));
        fs::hard_link(path, &link)?;
        backup = Some(link);
    }

    let tmp = dir.join(format!("sav_{}.tmp", rand_hex(8)));
    let result = (|| -> Result<(), SiteError> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(serde_json::to_string_pretty(doc)?.as_bytes())?;
        file.sync_all()?;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();
    if let Err(e) = result {
        fs::remove_file(&tmp).ok();
        if let Some(link) = backup {
            fs::remove_file(link).ok();
        }
        return Err(e);
    }
    if let Some(link) = backup {
        fs::rename(link, PathBuf::from(format!("{}.bak", path.display())))?;
    }
    Ok(())
}

/// Random passkey from the configured alphabet.
pub fn rand_pass() -> String {
    let chars: Vec<char> = defaults::PASS_CHARS.chars().collect();
    // 32-character alphabet carries 5 bits per symbol
    let length = (defaults::PASS_BITS as usize).div_ceil(5);
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| chars[rng.gen_range(0..chars.len())])
        .collect()
}

pub fn create_hash(password: &str) -> Result<String, SiteError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SiteError::Config(format!("password hash: {}", e)))
}

/// Mint a self-signed certificate for the web UI with the system openssl.
fn mk_cert(base: &Path, hostname: &str) -> Result<(PathBuf, PathBuf), SiteError> {
    tracing::debug!("Creating self-signed SSL cert for {:?} at {:?}", hostname, base);
    let cert_out = base.join(defaults::SSL_CERT);
    let key_out = base.join(defaults::SSL_KEY);
    let cert_tmp = base.join(format!("sav_{}.tmp", rand_hex(8)));
    let key_tmp = base.join(format!("sav_{}.tmp", rand_hex(8)));
    let template = format!(
        "[dn]\nCN={host}\n[req]\ndistinguished_name = dn\n[EXT]\nsubjectAltName=DNS:{host}\nkeyUsage=digitalSignature\nextendedKeyUsage=serverAuth\n",
        host = hostname
    );
    let mut child = Command::new("openssl")
        .args([
            "req",
            "-x509",
            "-out",
            &cert_tmp.display().to_string(),
            "-keyout",
            &key_tmp.display().to_string(),
            "-newkey",
            "rsa:2048",
            "-nodes",
            "-sha256",
            "-subj",
            &format!("/CN={}", hostname),
            "-extensions",
            "EXT",
            "-config",
            "-",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| SiteError::Config(format!("openssl: {}", e)))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(template.as_bytes()).ok();
    }
    let status = child
        .wait()
        .map_err(|e| SiteError::Config(format!("openssl: {}", e)))?;
    if !status.success() {
        return Err(SiteError::Config(format!("openssl exited {}", status)));
    }
    fs::rename(&cert_tmp, &cert_out)?;
    fs::rename(&key_tmp, &key_out)?;
    tracing::debug!("SSL certificate created OK");
    Ok((cert_out, key_out))
}

fn confirm(prompt: &str, default_yes: bool) -> bool {
    print!("{}", prompt);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    match line.trim().chars().next() {
        Some(c) => {
            if default_yes {
                c.to_ascii_lowercase() != 'n'
            } else {
                c.to_ascii_lowercase() == 'y'
            }
        }
        None => default_yes,
    }
}

/// Prepare a new empty site under `base`. Returns false when the operator
/// backs out; true means continue into the normal run.
pub fn init_site(base: &Path, web_ui: bool) -> Result<bool, SiteError> {
    if !std::io::stdin().is_terminal() {
        tracing::error!("Init requires user input - exiting");
        return Ok(false);
    }
    let cfg_file = base.join(defaults::CONFIG_FILE);
    if cfg_file.exists() && !confirm("Replace existing site? (y/N) ", false) {
        tracing::error!("Existing site not overwritten");
        return Ok(false);
    }

    let mut doc = json!({
        "base": base.display().to_string(),
        "webui": Value::Null,
        "actions": {},
        "checks": {},
    });
    let mut admin_pass = None;
    if web_ui {
        let mut web = defaults::webui_config();
        let port = 30000 + rand::thread_rng().gen_range(0..32768u64);
        web["port"] = json!(port);
        let hostname = web["hostname"].as_str().unwrap_or("localhost").to_string();
        let (cert, key) = mk_cert(base, &hostname)?;
        web["cert"] = json!(cert.display().to_string());
        web["key"] = json!(key.display().to_string());

        let password = rand_pass();
        web["users"] = json!({
            "admin": create_hash(&password)?,
            // dummy hash so unknown users burn the same verification time
            "": create_hash(&rand_pass())?,
        });
        doc["webui"] = web;
        admin_pass = Some((hostname, port, password));
    }

    save_document(&cfg_file, &doc)?;

    match &admin_pass {
        Some((hostname, port, password)) => println!(
            "\nSite address:\thttps://{}:{}\nAdmin password:\t{}\n",
            hostname, port, password
        ),
        None => println!("\nConfigured without web interface.\n"),
    }
    Ok(confirm("Start? (Y/n) ", true))
}
