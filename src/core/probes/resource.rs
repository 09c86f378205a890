//! Local resource probes: disk usage and Megatec-style UPS units on a
//! serial port.

use super::{ProbeCtx, ProbeError};
use crate::config::defaults;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;

const TERA: f64 = (1u64 << 40) as f64;
const GIGA: f64 = (1u64 << 30) as f64;

/// Serial ports are mutually exclusive across all checks. The registry-wide
/// lock guards lazy creation of the per-path mutex.
fn serial_lock(path: &str) -> Arc<Mutex<()>> {
    static REGISTRY: OnceLock<StdMutex<HashMap<String, Arc<Mutex<()>>>>> = OnceLock::new();
    let registry = REGISTRY.get_or_init(|| StdMutex::new(HashMap::new()));
    let mut map = registry.lock().unwrap_or_else(|e| e.into_inner());
    map.entry(path.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

struct DiskUsage {
    total: u64,
    used: u64,
    free: u64,
}

fn disk_usage(path: &str) -> std::io::Result<DiskUsage> {
    let c_path = std::ffi::CString::new(path)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    let mut vfs: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut vfs) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let frsize = vfs.f_frsize as u64;
    let total = frsize.saturating_mul(vfs.f_blocks as u64);
    let avail = frsize.saturating_mul(vfs.f_bavail as u64);
    let unused = frsize.saturating_mul(vfs.f_bfree as u64);
    Ok(DiskUsage {
        total,
        used: total.saturating_sub(unused),
        free: avail,
    })
}

/// Volume free-space check: fails when usage reaches the `level` percentage.
pub async fn disk(ctx: &mut ProbeCtx) -> bool {
    let volume = ctx.opt_str("volume", "/");
    let level = ctx.opt_u64("level", defaults::DISK_LEVEL);

    let lookup = {
        let volume = volume.clone();
        tokio::task::spawn_blocking(move || disk_usage(&volume)).await
    };
    let du = match lookup {
        Ok(Ok(du)) if du.total > 0 => du,
        Ok(Ok(_)) => {
            ctx.log.push(format!("{}: empty filesystem", volume));
            return true;
        }
        Ok(Err(e)) => {
            ctx.log.push(format!("{}: {}", volume, e));
            return true;
        }
        Err(e) => {
            ctx.log.push(format!("{}: {}", volume, e));
            return true;
        }
    };

    let pct = 100.0 * du.used as f64 / du.total as f64;
    let msg = if du.total as f64 > 0.8 * TERA {
        format!(
            "{} (disk) {}: {:2.0}% {:.2}/{:.2}TiB, {:.2}TiB Free",
            ctx.name,
            volume,
            pct,
            du.used as f64 / TERA,
            du.total as f64 / TERA,
            du.free as f64 / TERA
        )
    } else {
        format!(
            "{} (disk) {}: {:2.0}% {:.0}/{:.0}GiB, {:.0}GiB Free",
            ctx.name,
            volume,
            pct,
            du.used as f64 / GIGA,
            du.total as f64 / GIGA,
            du.free as f64 / GIGA
        )
    };
    ctx.log.push(msg);
    pct >= level as f64
}

/// Parsed Megatec Q1 status reply.
struct UpsState {
    input_volts: f64,
    output_volts: f64,
    load_pct: u32,
    frequency: f64,
    battery_volts: f64,
    temperature: f64,
    utility_fail: bool,
    battery_low: bool,
    ups_failed: bool,
    test_in_progress: bool,
    shutdown_active: bool,
    beeper_on: bool,
}

impl UpsState {
    fn is_fail(&self) -> bool {
        self.utility_fail || self.battery_low || self.ups_failed || self.shutdown_active
    }

    fn info(&self) -> String {
        format!(
            "Input: {:.1}V, Output: {:.1}V, Freq: {:.1}Hz, Temp: {:.1}C",
            self.input_volts, self.output_volts, self.frequency, self.temperature
        )
    }
}

fn parse_q1(reply: &str) -> Result<UpsState, ProbeError> {
    let body = reply.trim().trim_start_matches('(');
    let fields: Vec<&str> = body.split_whitespace().collect();
    if fields.len() < 8 {
        return Err(ProbeError::Protocol(format!("short status reply {:?}", reply)));
    }
    let bits = fields[7].as_bytes();
    if bits.len() < 8 {
        return Err(ProbeError::Protocol(format!("short status bits {:?}", fields[7])));
    }
    let num = |s: &str| s.parse::<f64>().unwrap_or(0.0);
    Ok(UpsState {
        input_volts: num(fields[0]),
        output_volts: num(fields[2]),
        load_pct: fields[3].parse::<u32>().unwrap_or(0),
        frequency: num(fields[4]),
        battery_volts: num(fields[5]),
        temperature: num(fields[6]),
        utility_fail: bits[0] == b'1',
        battery_low: bits[1] == b'1',
        ups_failed: bits[3] == b'1',
        test_in_progress: bits[5] == b'1',
        shutdown_active: bits[6] == b'1',
        beeper_on: bits[7] == b'1',
    })
}

fn read_until_cr(port: &mut std::fs::File) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while buf.len() < 128 {
        let n = port.read(&mut byte)?;
        if n == 0 || byte[0] == b'\r' {
            break;
        }
        buf.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&buf).to_string())
}

fn query_ups(path: &str) -> Result<UpsState, ProbeError> {
    let mut port = OpenOptions::new().read(true).write(true).open(path)?;
    port.write_all(b"Q1\r")?;
    let reply = read_until_cr(&mut port)?;
    parse_q1(&reply)
}

fn set_beeper(path: &str, want: bool) -> Result<UpsState, ProbeError> {
    let state = query_ups(path)?;
    if state.beeper_on != want {
        let mut port = OpenOptions::new().read(true).write(true).open(path)?;
        port.write_all(b"Q\r")?;
    }
    Ok(state)
}

/// UPS status check over the configured serial port.
pub async fn ups_status(ctx: &mut ProbeCtx) -> bool {
    let serial_port = ctx.opt_str("serialPort", "");
    let beeper = ctx.opt_bool("beeper", true);
    let timeout = ctx.opt_u64("timeout", defaults::UPS_TIMEOUT);

    tracing::debug!("Waiting for serialport");
    let lock = serial_lock(&serial_port);
    let _guard = lock.lock().await;

    let query = {
        let path = serial_port.clone();
        tokio::task::spawn_blocking(move || set_beeper(&path, beeper))
    };
    match tokio::time::timeout(Duration::from_secs(timeout), query).await {
        Ok(Ok(Ok(state))) => {
            ctx.log.push(format!(
                "Load: {}%, Battery: {:.1}V",
                state.load_pct, state.battery_volts
            ));
            ctx.log.push(state.info());
            if state.battery_low {
                ctx.log
                    .push(format!("Low battery warning: {:.1}V", state.battery_volts));
            }
            state.is_fail()
        }
        Ok(Ok(Err(e))) => {
            ctx.log.push(format!("{}: {}", serial_port, e));
            true
        }
        Ok(Err(e)) => {
            ctx.log.push(format!("{}: {}", serial_port, e));
            true
        }
        Err(_) => {
            ctx.log
                .push(format!("{}: timeout after {} sec", serial_port, timeout));
            true
        }
    }
}

fn run_self_test(path: &str) -> Result<(bool, String), ProbeError> {
    let mut port = OpenOptions::new().read(true).write(true).open(path)?;
    port.write_all(b"T\r")?;
    drop(port);

    // poll until the unit reports the test finished
    loop {
        std::thread::sleep(Duration::from_millis(1000));
        let state = query_ups(path)?;
        if state.test_in_progress {
            continue;
        }
        let msg = if state.ups_failed || state.battery_low {
            format!(
                "Self test failed: battery {:.1}V, {}",
                state.battery_volts,
                state.info()
            )
        } else {
            format!("Self test OK: battery {:.1}V", state.battery_volts)
        };
        return Ok((state.ups_failed || state.battery_low, msg));
    }
}

/// Trigger a UPS self-test and report its verdict.
pub async fn ups_test(ctx: &mut ProbeCtx) -> bool {
    let serial_port = ctx.opt_str("serialPort", "");
    let timeout = ctx.opt_u64("timeout", defaults::UPS_TIMEOUT);

    tracing::debug!("Waiting for serialport");
    let lock = serial_lock(&serial_port);
    let _guard = lock.lock().await;

    let test = {
        let path = serial_port.clone();
        tokio::task::spawn_blocking(move || run_self_test(&path))
    };
    match tokio::time::timeout(Duration::from_secs(timeout), test).await {
        Ok(Ok(Ok((fail, msg)))) => {
            tracing::info!("{} (upstest) {}: {}", ctx.name, serial_port, msg);
            ctx.log.push(msg);
            fail
        }
        Ok(Ok(Err(e))) => {
            ctx.log.push(format!("{}: {}", serial_port, e));
            true
        }
        Ok(Err(e)) => {
            ctx.log.push(format!("{}: {}", serial_port, e));
            true
        }
        Err(_) => {
            ctx.log
                .push(format!("{}: timeout after {} sec", serial_port, timeout));
            true
        }
    }
}
