//! Network service probes: SMTP, submissions, IMAP, HTTPS, certificate
//! expiry and SSH reachability.
//!
//! Every TLS handshake runs the certificate expiry guard: a peer
//! certificate inside `CERT_EXPIRY_DAYS` of its `notAfter` fails the probe
//! even when the service itself answers.

use super::{ProbeCtx, ProbeError};
use crate::config::defaults;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;

const EHLO_NAME: &str = "sitewatch";

/// Collapse a timed probe attempt into the fail flag, logging the reason.
fn settle(
    ctx: &mut ProbeCtx,
    target: &str,
    timeout: u64,
    outcome: Result<Result<(), ProbeError>, tokio::time::error::Elapsed>,
) -> bool {
    match outcome {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            ctx.log.push(format!("{}: {}", target, e));
            true
        }
        Err(_) => {
            ctx.log.push(format!("{}: timeout after {} sec", target, timeout));
            true
        }
    }
}

async fn tls_handshake<S>(
    domain: &str,
    stream: S,
    selfsigned: bool,
) -> Result<TlsStream<S>, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut builder = native_tls::TlsConnector::builder();
    if selfsigned {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }
    let connector = tokio_native_tls::TlsConnector::from(builder.build()?);
    Ok(connector.connect(domain, stream).await?)
}

/// Fail when the peer certificate is close to expiry. A missing peer
/// certificate skips the guard.
fn cert_expiry_guard<S>(stream: &TlsStream<S>) -> Result<(), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let cert = match stream.get_ref().peer_certificate()? {
        Some(cert) => cert,
        None => {
            tracing::debug!("Certificate missing - expiry check skipped");
            return Ok(());
        }
    };
    let der = cert.to_der()?;
    let (_, parsed) = x509_parser::parse_x509_certificate(&der)
        .map_err(|e| ProbeError::Protocol(format!("certificate parse: {}", e)))?;
    let not_after = parsed.validity().not_after.timestamp();
    let days_left = (not_after - chrono::Utc::now().timestamp()) / 86400;
    tracing::debug!(
        "Certificate {:?} expiry in {} days",
        parsed.subject().to_string(),
        days_left
    );
    if days_left < defaults::CERT_EXPIRY_DAYS {
        return Err(ProbeError::CertExpiry(days_left));
    }
    Ok(())
}

/// Byte-buffered line reader over any async stream.
#[derive(Default)]
struct LineReader {
    buf: Vec<u8>,
}

impl LineReader {
    async fn read_line<S: AsyncRead + Unpin>(&mut self, s: &mut S) -> Result<String, ProbeError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                return Ok(String::from_utf8_lossy(&line).trim_end().to_string());
            }
            let mut chunk = [0u8; 1024];
            let n = s.read(&mut chunk).await?;
            if n == 0 {
                return Err(ProbeError::Protocol("connection closed".into()));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

async fn send_line<S: AsyncWrite + Unpin>(s: &mut S, line: &str) -> Result<(), ProbeError> {
    s.write_all(line.as_bytes()).await?;
    s.write_all(b"\r\n").await?;
    s.flush().await?;
    Ok(())
}

/// Read a possibly multi-line SMTP reply and return its final line.
async fn read_smtp_reply<S: AsyncRead + Unpin>(
    lr: &mut LineReader,
    s: &mut S,
) -> Result<String, ProbeError> {
    loop {
        let line = lr.read_line(s).await?;
        if line.len() < 4 || line.as_bytes()[3] != b'-' {
            return Ok(line);
        }
    }
}

fn expect_smtp(line: String, ctx: &mut ProbeCtx) -> Result<(), ProbeError> {
    let ok = line.starts_with('2');
    ctx.log.push(line.clone());
    if ok {
        Ok(())
    } else {
        Err(ProbeError::Protocol(line))
    }
}

async fn smtp_commands<S>(
    s: &mut S,
    lr: &mut LineReader,
    ctx: &mut ProbeCtx,
) -> Result<(), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    send_line(s, &format!("EHLO {}", EHLO_NAME)).await?;
    let reply = read_smtp_reply(lr, s).await?;
    expect_smtp(reply, ctx)?;
    send_line(s, "NOOP").await?;
    let reply = read_smtp_reply(lr, s).await?;
    expect_smtp(reply, ctx)?;
    send_line(s, "QUIT").await?;
    let reply = read_smtp_reply(lr, s).await?;
    expect_smtp(reply, ctx)?;
    Ok(())
}

/// SMTP service check, STARTTLS by default.
pub async fn smtp(ctx: &mut ProbeCtx) -> bool {
    let hostname = ctx.opt_str("hostname", "");
    let timeout = ctx.opt_u64("timeout", defaults::SMTP_TIMEOUT);
    let run = async {
        let port = ctx.opt_u64("port", 25) as u16;
        let tls = ctx.opt_bool("tls", true);
        let selfsigned = ctx.opt_bool("selfsigned", false);

        let mut tcp = TcpStream::connect((hostname.as_str(), port)).await?;
        let mut lr = LineReader::default();
        let greeting = read_smtp_reply(&mut lr, &mut tcp).await?;
        expect_smtp(greeting, ctx)?;
        if tls {
            send_line(&mut tcp, &format!("EHLO {}", EHLO_NAME)).await?;
            let reply = read_smtp_reply(&mut lr, &mut tcp).await?;
            expect_smtp(reply, ctx)?;
            send_line(&mut tcp, "STARTTLS").await?;
            let reply = read_smtp_reply(&mut lr, &mut tcp).await?;
            expect_smtp(reply, ctx)?;
            let mut stream = tls_handshake(&hostname, tcp, selfsigned).await?;
            cert_expiry_guard(&stream)?;
            let mut lr = LineReader::default();
            smtp_commands(&mut stream, &mut lr, ctx).await
        } else {
            smtp_commands(&mut tcp, &mut lr, ctx).await
        }
    };
    let outcome = tokio::time::timeout(Duration::from_secs(timeout), run).await;
    settle(ctx, &hostname, timeout, outcome)
}

/// SMTP-over-TLS submissions check.
pub async fn submit(ctx: &mut ProbeCtx) -> bool {
    let hostname = ctx.opt_str("hostname", "");
    let timeout = ctx.opt_u64("timeout", defaults::SUBMIT_TIMEOUT);
    let run = async {
        let port = ctx.opt_u64("port", 465) as u16;
        let selfsigned = ctx.opt_bool("selfsigned", false);

        let tcp = TcpStream::connect((hostname.as_str(), port)).await?;
        let mut stream = tls_handshake(&hostname, tcp, selfsigned).await?;
        cert_expiry_guard(&stream)?;
        let mut lr = LineReader::default();
        let greeting = read_smtp_reply(&mut lr, &mut stream).await?;
        expect_smtp(greeting, ctx)?;
        smtp_commands(&mut stream, &mut lr, ctx).await
    };
    let outcome = tokio::time::timeout(Duration::from_secs(timeout), run).await;
    settle(ctx, &hostname, timeout, outcome)
}

/// IMAP4-over-TLS service check.
pub async fn imap(ctx: &mut ProbeCtx) -> bool {
    let hostname = ctx.opt_str("hostname", "");
    let timeout = ctx.opt_u64("timeout", defaults::IMAP_TIMEOUT);
    let run = async {
        let port = ctx.opt_u64("port", 993) as u16;
        let selfsigned = ctx.opt_bool("selfsigned", false);

        let tcp = TcpStream::connect((hostname.as_str(), port)).await?;
        let mut stream = tls_handshake(&hostname, tcp, selfsigned).await?;
        cert_expiry_guard(&stream)?;
        let mut lr = LineReader::default();
        let greeting = lr.read_line(&mut stream).await?;
        ctx.log.push(greeting.clone());
        if !greeting.starts_with("* OK") {
            return Err(ProbeError::Protocol(greeting));
        }
        send_line(&mut stream, "a1 NOOP").await?;
        loop {
            let line = lr.read_line(&mut stream).await?;
            ctx.log.push(line.clone());
            if line.starts_with("a1 ") {
                if !line.starts_with("a1 OK") {
                    return Err(ProbeError::Protocol(line));
                }
                break;
            }
        }
        send_line(&mut stream, "a2 LOGOUT").await?;
        let line = lr.read_line(&mut stream).await?;
        ctx.log.push(line);
        Ok(())
    };
    let outcome = tokio::time::timeout(Duration::from_secs(timeout), run).await;
    settle(ctx, &hostname, timeout, outcome)
}

/// HTTPS service check: one request, any completed response passes.
pub async fn https(ctx: &mut ProbeCtx) -> bool {
    let hostname = ctx.opt_str("hostname", "");
    let timeout = ctx.opt_u64("timeout", defaults::HTTPS_TIMEOUT);
    let run = async {
        let port = ctx.opt_u64("port", 443) as u16;
        let selfsigned = ctx.opt_bool("selfsigned", false);
        let req_type = ctx.opt_str("reqType", "HEAD");
        let req_path = ctx.opt_str("reqPath", "/");

        let tcp = TcpStream::connect((hostname.as_str(), port)).await?;
        let mut stream = tls_handshake(&hostname, tcp, selfsigned).await?;
        cert_expiry_guard(&stream)?;
        let request = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}/{}\r\nConnection: close\r\n\r\n",
            req_type,
            req_path,
            hostname,
            EHLO_NAME,
            env!("CARGO_PKG_VERSION")
        );
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;
        let mut lr = LineReader::default();
        let status = lr.read_line(&mut stream).await?;
        if !status.starts_with("HTTP/") {
            return Err(ProbeError::Protocol(status));
        }
        ctx.log.push(status);
        loop {
            let line = lr.read_line(&mut stream).await?;
            if line.is_empty() {
                break;
            }
            ctx.log.push(line);
        }
        Ok(())
    };
    let outcome = tokio::time::timeout(Duration::from_secs(timeout), run).await;
    settle(ctx, &hostname, timeout, outcome)
}

/// TLS certificate check. With `selfsigned` the chain is not validated but
/// the expiry guard still applies. An optional `probe` payload is written
/// and the first response chunk logged.
pub async fn cert(ctx: &mut ProbeCtx) -> bool {
    let hostname = ctx.opt_str("hostname", "");
    let timeout = ctx.opt_u64("timeout", defaults::CERT_TIMEOUT);
    let run = async {
        let port = ctx.opt_u64("port", 443) as u16;
        let selfsigned = ctx.opt_bool("selfsigned", false);
        let probe = match ctx.options.get("probe") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            _ => None,
        };

        let tcp = TcpStream::connect((hostname.as_str(), port)).await?;
        let mut stream = tls_handshake(&hostname, tcp, selfsigned).await?;
        cert_expiry_guard(&stream)?;
        if let Some(payload) = probe {
            stream.write_all(payload.as_bytes()).await?;
            stream.flush().await?;
            ctx.log.push(format!("send: {:?}", payload));
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).await?;
            ctx.log
                .push(format!("recv: {:?}", String::from_utf8_lossy(&buf[..n])));
        }
        stream.shutdown().await.ok();
        Ok(())
    };
    let outcome = tokio::time::timeout(Duration::from_secs(timeout), run).await;
    settle(ctx, &hostname, timeout, outcome)
}

/// SSH reachability check with identity pinning.
///
/// The server's protocol identification string is pinned: stored into the
/// `hostkey` option on first contact, required to match afterwards.
pub async fn ssh(ctx: &mut ProbeCtx) -> bool {
    let hostname = ctx.opt_str("hostname", "");
    let timeout = ctx.opt_u64("timeout", defaults::SSH_TIMEOUT);
    let port = ctx.opt_u64("port", 22) as u16;
    let hostkey = match ctx.options.get("hostkey") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        _ => None,
    };
    let run = async {
        let mut tcp = TcpStream::connect((hostname.as_str(), port)).await?;
        send_line(
            &mut tcp,
            &format!("SSH-2.0-{}_{}", EHLO_NAME, env!("CARGO_PKG_VERSION")),
        )
        .await?;
        let mut lr = LineReader::default();
        let banner = loop {
            // servers may send pre-banner lines before the identification
            let line = lr.read_line(&mut tcp).await?;
            if line.starts_with("SSH-") {
                break line;
            }
        };
        ctx.log.push(format!("{}:{} {:?}", hostname, port, banner));
        match &hostkey {
            Some(known) if known != &banner => {
                return Err(ProbeError::Protocol("Invalid host key".into()));
            }
            Some(_) => {}
            None => {
                tracing::info!("{} (ssh) {}: Adding hostkey={}", ctx.name, hostname, banner);
                ctx.learned_hostkey = Some(banner);
            }
        }
        tcp.shutdown().await.ok();
        Ok(())
    };
    let outcome = tokio::time::timeout(Duration::from_secs(timeout), run).await;
    settle(ctx, &hostname, timeout, outcome)
}
