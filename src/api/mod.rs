//! Loopback admin interface.
//!
//! `GET /health` is open. Everything else needs `Authorization: Bearer <token>`
//! with the capability token generated at startup (optionally written to
//! `token_path`). Routes:
//!
//! - `POST /blacklist` `{"action": "add"|"remove", "numberplate": "..."}`
//! - `POST /threshold` `{"threshold": 80.0}`
//! - `GET /stats`
//!
//! Mutations go through the shared `PolicyStore`; the frame loop picks up a new
//! threshold at its next frame.

use anyhow::{anyhow, Result};
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::policy::PolicyStore;
use crate::storage::StatsSource;

const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Clone, Debug)]
pub struct AdminConfig {
    pub addr: String,
    pub token_path: Option<PathBuf>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8798".to_string(),
            token_path: None,
        }
    }
}

#[derive(Debug)]
pub struct AdminHandle {
    pub addr: SocketAddr,
    pub token: String,
    pub token_path: Option<PathBuf>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl AdminHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("admin server thread panicked"))?;
        }
        Ok(())
    }
}

/// Random 32-byte bearer token, hex encoded on the wire.
#[derive(Clone, Debug)]
pub struct CapabilityToken {
    token: [u8; 32],
}

impl CapabilityToken {
    pub fn generate() -> Self {
        let mut token = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token);
        Self { token }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.token)
    }

    pub fn validate(&self, presented: &str) -> Result<()> {
        let presented = parse_hex32(presented)?;
        if presented != self.token {
            return Err(anyhow!("capability token invalid"));
        }
        Ok(())
    }
}

pub struct AdminServer {
    cfg: AdminConfig,
    policy: Arc<dyn PolicyStore>,
    stats: Arc<dyn StatsSource>,
}

impl AdminServer {
    pub fn new(cfg: AdminConfig, policy: Arc<dyn PolicyStore>, stats: Arc<dyn StatsSource>) -> Self {
        Self { cfg, policy, stats }
    }

    pub fn spawn(self) -> Result<AdminHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid admin addr '{}': {}", self.cfg.addr, e))?;
        if !configured_addr.ip().is_loopback() {
            return Err(anyhow!(
                "admin api must bind a loopback address (got '{}')",
                configured_addr
            ));
        }
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if !addr.ip().is_loopback() {
            return Err(anyhow!(
                "admin api configured for loopback address '{}', but bound to '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let token = CapabilityToken::generate();
        let token_hex = token.to_hex();
        if let Some(path) = &self.cfg.token_path {
            write_token_file(path, &token_hex)?;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let token_path = self.cfg.token_path.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_admin(listener, &self, &token, shutdown_thread) {
                log::error!("admin api stopped: {}", err);
            }
        });
        log::info!("admin api listening on {}", addr);

        Ok(AdminHandle {
            addr,
            token: token_hex,
            token_path,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_admin(
    listener: TcpListener,
    server: &AdminServer,
    token: &CapabilityToken,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, server, token) {
                    log::warn!("admin api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BlacklistAction {
    Add,
    Remove,
}

#[derive(Debug, Deserialize)]
struct BlacklistRequest {
    action: BlacklistAction,
    numberplate: String,
}

#[derive(Debug, Deserialize)]
struct ThresholdRequest {
    threshold: f64,
}

fn handle_connection(mut stream: TcpStream, server: &AdminServer, token: &CapabilityToken) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    if !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    let route = (request.method.as_str(), request.path.as_str());
    match route {
        ("GET", "/health") => {
            write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)?;
            return Ok(());
        }
        ("GET", "/stats") | ("POST", "/blacklist") | ("POST", "/threshold") => {}
        (_, "/health") | (_, "/stats") | (_, "/blacklist") | (_, "/threshold") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
            return Ok(());
        }
        _ => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
    }

    let presented = match request.bearer_token() {
        Some(presented) => presented,
        None => {
            write_json_response(&mut stream, 401, r#"{"error":"missing_token"}"#)?;
            return Ok(());
        }
    };
    if let Err(err) = token.validate(&presented) {
        write_json_response(&mut stream, 401, r#"{"error":"invalid_token"}"#)?;
        return Err(err);
    }

    let (status, body) = match route {
        ("GET", "/stats") => match server.stats.stats() {
            Ok(stats) => (200, serde_json::to_value(stats)?),
            Err(e) => internal_error("stats", e),
        },
        ("POST", "/blacklist") => match serde_json::from_slice::<BlacklistRequest>(&request.body) {
            Ok(req) => update_blacklist(server.policy.as_ref(), req),
            Err(e) => bad_request(e),
        },
        _ => match serde_json::from_slice::<ThresholdRequest>(&request.body) {
            Ok(req) => match server.policy.set_threshold(req.threshold) {
                Ok(()) => {
                    log::info!("threshold set to {} km/h via admin api", req.threshold);
                    (200, json!({"status": "success", "threshold": req.threshold}))
                }
                Err(e) => (400, json!({"status": "error", "message": e.to_string()})),
            },
            Err(e) => bad_request(e),
        },
    };
    let payload = serde_json::to_vec(&body)?;
    write_response(&mut stream, status, "application/json", &payload)?;
    Ok(())
}

fn update_blacklist(policy: &dyn PolicyStore, req: BlacklistRequest) -> (u16, serde_json::Value) {
    let result = match req.action {
        BlacklistAction::Add => policy.add(&req.numberplate),
        BlacklistAction::Remove => policy.remove(&req.numberplate),
    };
    match result {
        Ok(changed) => {
            log::info!(
                "blacklist {:?} {} via admin api (changed: {})",
                req.action,
                req.numberplate,
                changed
            );
            (200, json!({"status": "success", "changed": changed}))
        }
        Err(e) => (400, json!({"status": "error", "message": e.to_string()})),
    }
}

fn bad_request(err: serde_json::Error) -> (u16, serde_json::Value) {
    (400, json!({"status": "error", "message": err.to_string()}))
}

fn internal_error(what: &str, err: anyhow::Error) -> (u16, serde_json::Value) {
    log::error!("admin api {} failed: {}", what, err);
    (500, json!({"status": "error", "message": "internal error"}))
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break None;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break Some(pos + 4);
        }
    };
    let header_end = header_end.unwrap_or(data.len());

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = match headers.get("content-length") {
        Some(value) => value
            .parse()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if header_end + content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request too large"));
    }
    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &[u8]) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        401 => "HTTP/1.1 401 Unauthorized",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn bearer_token(&self) -> Option<String> {
        let value = self.headers.get("authorization")?;
        let parts: Vec<&str> = value.split_whitespace().collect();
        if parts.len() == 2 && parts[0].eq_ignore_ascii_case("bearer") {
            return Some(parts[1].to_string());
        }
        None
    }
}

fn write_token_file(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, format!("{token}\n"))
        .map_err(|e| anyhow!("failed to write token file {}: {}", path.display(), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

fn parse_hex32(value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)?;
    if bytes.len() != 32 {
        return Err(anyhow!("token must be 32 bytes"));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_through_hex_and_rejects_others() {
        let token = CapabilityToken::generate();
        token.validate(&token.to_hex()).unwrap();
        assert!(token.validate(&CapabilityToken::generate().to_hex()).is_err());
        assert!(token.validate("abcd").is_err());
        assert!(token.validate("not-hex").is_err());
    }
}
