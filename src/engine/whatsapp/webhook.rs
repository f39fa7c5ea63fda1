// WhatsApp Cloud API — Webhook HTTP Server
//
// Raw `tokio::net::TcpListener`, no framework dependency. Routes:
//   GET  /webhook   subscription handshake (hub.mode / hub.verify_token / hub.challenge)
//   POST /webhook   message delivery; answered 200 at once, processed after
//   GET  /health    liveness check
//
// Auth: X-Hub-Signature-256 over the raw body when an app secret is set.
// Rate limiting: fixed 60s window per source IP.

use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::config::ServerConfig;
use crate::engine::state::Engine;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use super::config::WhatsAppConfig;
use super::signature::verify_signature;

/// Upper bound on the request line plus headers.
const MAX_HEAD_BYTES: usize = 16 * 1024;
/// Time a client gets to send its whole request.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

// ── Rate Limiter ───────────────────────────────────────────────────────

pub(crate) struct RateLimiter {
    /// IP → (count, window_start)
    buckets: Mutex<HashMap<String, (u32, Instant)>>,
    limit: u32,
}

impl RateLimiter {
    pub(crate) fn new(limit: u32) -> Self {
        RateLimiter { buckets: Mutex::new(HashMap::new()), limit }
    }

    /// Returns true if the request is allowed, false if rate-limited.
    pub(crate) fn check(&self, ip: &str) -> bool {
        if self.limit == 0 {
            return true;
        }
        let mut map = self.buckets.lock();
        let now = Instant::now();
        // Drop idle windows so the map does not grow with every address seen.
        if map.len() > 10_000 {
            map.retain(|_, (_, start)| now.duration_since(*start).as_secs() < 60);
        }
        let entry = map.entry(ip.to_string()).or_insert((0, now));
        if now.duration_since(entry.1).as_secs() >= 60 {
            *entry = (0, now);
        }
        if entry.0 >= self.limit {
            false
        } else {
            entry.0 += 1;
            true
        }
    }
}

// ── Request / Response ─────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Lowercased names
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum ReadOutcome {
    Request(Request),
    /// Peer closed before sending anything.
    Closed,
    Malformed,
    TooLarge,
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method && self.path == other.path && self.body == other.body
    }
}

#[derive(Debug, PartialEq)]
pub(crate) struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    fn json(status: u16, body: Value) -> Self {
        Response { status, content_type: "application/json", body: body.to_string() }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "ok": false, "error": message }))
    }

    fn text(status: u16, body: impl Into<String>) -> Self {
        Response { status, content_type: "text/plain", body: body.into() }
    }
}

/// What to do with a routed request.
#[derive(Debug, PartialEq)]
pub(crate) enum Route {
    Reply(Response),
    /// Acknowledge, then hand the payload to the engine.
    Accept(Value),
}

/// Deliveries must be verifiable unless unsigned ones were explicitly allowed.
fn check_signing(whatsapp: &WhatsAppConfig) -> EngineResult<()> {
    if whatsapp.app_secret.is_empty() && !whatsapp.allow_unsigned {
        return Err(EngineError::Config(
            "whatsapp.app_secret is required to verify deliveries (set allow_unsigned = true for local testing)".into(),
        ));
    }
    Ok(())
}

// ── HTTP Server ────────────────────────────────────────────────────────

/// Serve the webhook until `stop` is set.
pub async fn run_server(
    engine: Arc<Engine>,
    server: ServerConfig,
    whatsapp: WhatsAppConfig,
    stop: Arc<AtomicBool>,
) -> EngineResult<()> {
    check_signing(&whatsapp)?;

    let addr = format!("{}:{}", server.bind_address, server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::Config(format!("Bind {} failed: {}", addr, e)))?;

    if whatsapp.app_secret.is_empty() {
        warn!("[webhook] allow_unsigned is set — deliveries are NOT signature-checked");
    }
    if whatsapp.verify_token.is_empty() {
        warn!("[webhook] No verify token configured — subscription handshakes will be refused");
    }
    info!("[webhook] Listening on http://{}", addr);

    let server = Arc::new(server);
    let whatsapp = Arc::new(whatsapp);
    let rate_limiter = Arc::new(RateLimiter::new(server.rate_limit_per_minute));

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let accept = tokio::time::timeout(Duration::from_secs(1), listener.accept()).await;

        match accept {
            Ok(Ok((stream, peer))) => {
                let engine = engine.clone();
                let server = server.clone();
                let whatsapp = whatsapp.clone();
                let rl = rate_limiter.clone();
                tokio::spawn(async move {
                    let peer_ip = peer.ip().to_string();
                    if let Err(e) = handle_connection(stream, &peer_ip, engine, &server, &whatsapp, &rl).await {
                        warn!("[webhook] Request error from {}: {}", peer_ip, e);
                    }
                });
            }
            Ok(Err(e)) => {
                warn!("[webhook] Accept error: {}", e);
            }
            Err(_) => { /* timeout — loop to check stop signal */ }
        }
    }

    info!("[webhook] Server stopped");
    Ok(())
}

async fn handle_connection(
    mut stream: TcpStream,
    peer_ip: &str,
    engine: Arc<Engine>,
    server: &ServerConfig,
    whatsapp: &WhatsAppConfig,
    rate_limiter: &RateLimiter,
) -> EngineResult<()> {
    let outcome = match tokio::time::timeout(READ_TIMEOUT, read_request(&mut stream, server.max_body_bytes)).await {
        Ok(outcome) => outcome?,
        Err(_) => return send_response(&mut stream, &Response::error(408, "request timed out")).await,
    };
    let request = match outcome {
        ReadOutcome::Request(r) => r,
        ReadOutcome::Closed => return Ok(()),
        ReadOutcome::Malformed => return send_response(&mut stream, &Response::error(400, "malformed request")).await,
        ReadOutcome::TooLarge => return send_response(&mut stream, &Response::error(413, "body too large")).await,
    };

    if request.path != "/health" && !rate_limiter.check(peer_ip) {
        return send_response(&mut stream, &Response::error(429, "rate limit exceeded")).await;
    }

    match route(&request, whatsapp) {
        Route::Reply(resp) => {
            if resp.status >= 400 {
                debug!("[webhook] {} {} from {} → {}", request.method, request.path, peer_ip, resp.status);
            }
            send_response(&mut stream, &resp).await
        }
        Route::Accept(payload) => {
            send_response(&mut stream, &Response::json(200, json!({ "ok": true }))).await?;
            drop(stream);
            let processed = engine.handle_payload(&payload).await;
            debug!("[webhook] Delivery from {} carried {} item(s)", peer_ip, processed);
            Ok(())
        }
    }
}

/// Decide the response for a fully read request.
pub(crate) fn route(request: &Request, whatsapp: &WhatsAppConfig) -> Route {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => Route::Reply(Response::json(200, json!({ "ok": true, "running": true }))),
        ("GET", "/webhook") => Route::Reply(verify_subscription(&request.query, whatsapp)),
        ("POST", "/webhook") => {
            if whatsapp.app_secret.is_empty() {
                if !whatsapp.allow_unsigned {
                    warn!("[webhook] Rejected delivery: no app secret configured");
                    return Route::Reply(Response::error(401, "signature cannot be verified"));
                }
            } else {
                let header = request.header("x-hub-signature-256");
                if let Err(e) = verify_signature(&request.body, header, &whatsapp.app_secret) {
                    warn!("[webhook] Rejected delivery: {}", e);
                    return Route::Reply(Response::error(401, "invalid signature"));
                }
            }
            match serde_json::from_slice::<Value>(&request.body) {
                Ok(payload) => Route::Accept(payload),
                Err(e) => Route::Reply(Response::error(400, &format!("invalid JSON body: {}", e))),
            }
        }
        (_, "/webhook") | (_, "/health") => Route::Reply(Response::error(405, "method not allowed")),
        (method, path) => Route::Reply(Response::error(404, &format!("not found: {} {}", method, path))),
    }
}

fn verify_subscription(query: &HashMap<String, String>, whatsapp: &WhatsAppConfig) -> Response {
    let mode = query.get("hub.mode").map(String::as_str);
    let token = query.get("hub.verify_token").map(String::as_str).unwrap_or("");
    let challenge = query.get("hub.challenge").map(String::as_str).unwrap_or("");
    if mode == Some("subscribe") && !whatsapp.verify_token.is_empty() && token == whatsapp.verify_token {
        info!("[webhook] Subscription verified");
        Response::text(200, challenge)
    } else {
        warn!("[webhook] Subscription handshake refused (mode={:?})", mode);
        Response::error(403, "verification failed")
    }
}

// ── Request parsing ────────────────────────────────────────────────────

/// Read one HTTP/1.x request: head up to the blank line, then exactly
/// Content-Length bytes of body.
pub(crate) async fn read_request<R: AsyncRead + Unpin>(reader: &mut R, max_body: usize) -> EngineResult<ReadOutcome> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Ok(ReadOutcome::Malformed);
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(if buf.is_empty() { ReadOutcome::Closed } else { ReadOutcome::Malformed });
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let Some(mut request) = parse_head(&head) else {
        return Ok(ReadOutcome::Malformed);
    };

    let length = match request.header("content-length") {
        Some(v) => match v.trim().parse::<usize>() {
            Ok(n) => n,
            Err(_) => return Ok(ReadOutcome::Malformed),
        },
        None => 0,
    };
    if length > max_body {
        return Ok(ReadOutcome::TooLarge);
    }

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < length {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(ReadOutcome::Malformed);
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(length);
    request.body = body;
    Ok(ReadOutcome::Request(request))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_head(head: &str) -> Option<Request> {
    let mut lines = head.split("\r\n");
    // "METHOD /path?query HTTP/1.x"
    let mut parts = lines.next()?.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?;
    parts.next().filter(|v| v.starts_with("HTTP/"))?;

    let url = Url::parse(&format!("http://localhost{}", target)).ok()?;
    let query = url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    Some(Request { method, path: url.path().to_string(), query, headers, body: Vec::new() })
}

// ── Helpers ────────────────────────────────────────────────────────────

async fn send_response(stream: &mut TcpStream, resp: &Response) -> EngineResult<()> {
    let status_text = match resp.status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Unknown",
    };
    let raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        resp.status,
        status_text,
        resp.content_type,
        resp.body.len(),
        resp.body
    );
    stream.write_all(raw.as_bytes()).await?;
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::whatsapp::signature::sign;

    fn config() -> WhatsAppConfig {
        WhatsAppConfig {
            app_secret: "app-secret".into(),
            verify_token: "verify-me".into(),
            ..WhatsAppConfig::default()
        }
    }

    async fn read(raw: &str, max_body: usize) -> ReadOutcome {
        let mut bytes = raw.as_bytes();
        read_request(&mut bytes, max_body).await.unwrap()
    }

    fn request(raw: &str) -> Request {
        let head_end = raw.find("\r\n\r\n").unwrap();
        let mut r = parse_head(&raw[..head_end]).unwrap();
        r.body = raw[head_end + 4..].as_bytes().to_vec();
        r
    }

    #[test]
    fn test_rate_limiter_allows_within_limit() {
        let rl = RateLimiter::new(3);
        assert!(rl.check("1.2.3.4"));
        assert!(rl.check("1.2.3.4"));
        assert!(rl.check("1.2.3.4"));
        assert!(!rl.check("1.2.3.4")); // 4th request blocked
    }

    #[test]
    fn test_rate_limiter_unlimited_and_per_ip() {
        let rl = RateLimiter::new(0);
        for _ in 0..1000 {
            assert!(rl.check("1.2.3.4"));
        }
        let rl = RateLimiter::new(1);
        assert!(rl.check("1.1.1.1"));
        assert!(!rl.check("1.1.1.1"));
        assert!(rl.check("2.2.2.2"));
    }

    #[tokio::test]
    async fn reads_body_by_content_length() {
        let raw = "POST /webhook HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello-extra";
        match read(raw, 1024).await {
            ReadOutcome::Request(r) => {
                assert_eq!(r.method, "POST");
                assert_eq!(r.path, "/webhook");
                assert_eq!(r.body, b"hello");
                assert_eq!(r.header("host"), Some("x"));
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejects_oversized_truncated_and_garbage() {
        let big = "POST /webhook HTTP/1.1\r\nContent-Length: 4096\r\n\r\n";
        assert_eq!(read(big, 1024).await, ReadOutcome::TooLarge);
        let short = "POST /webhook HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        assert_eq!(read(short, 1024).await, ReadOutcome::Malformed);
        assert_eq!(read("nonsense\r\n\r\n", 1024).await, ReadOutcome::Malformed);
        assert_eq!(read("", 1024).await, ReadOutcome::Closed);
    }

    #[test]
    fn subscription_handshake() {
        let ok = request("GET /webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=1158201444 HTTP/1.1\r\n\r\n");
        assert_eq!(route(&ok, &config()), Route::Reply(Response::text(200, "1158201444")));

        let bad = request("GET /webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=1 HTTP/1.1\r\n\r\n");
        match route(&bad, &config()) {
            Route::Reply(r) => assert_eq!(r.status, 403),
            other => panic!("unexpected {:?}", other),
        }

        // An unset verify token never matches, even an empty one.
        let empty = request("GET /webhook?hub.mode=subscribe&hub.verify_token=&hub.challenge=1 HTTP/1.1\r\n\r\n");
        match route(&empty, &WhatsAppConfig::default()) {
            Route::Reply(r) => assert_eq!(r.status, 403),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn signed_delivery_is_accepted() {
        let body = r#"{"object":"whatsapp_business_account","entry":[]}"#;
        let sig = sign(body.as_bytes(), "app-secret").unwrap();
        let raw = format!("POST /webhook HTTP/1.1\r\nX-Hub-Signature-256: sha256={}\r\n\r\n{}", sig, body);
        match route(&request(&raw), &config()) {
            Route::Accept(v) => assert_eq!(v["object"], "whatsapp_business_account"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unsigned_or_bad_deliveries_are_rejected() {
        let unsigned = request("POST /webhook HTTP/1.1\r\n\r\n{}");
        assert!(matches!(route(&unsigned, &config()), Route::Reply(Response { status: 401, .. })));

        let garbage = request("POST /webhook HTTP/1.1\r\n\r\nnot json");
        let unsigned_ok = WhatsAppConfig { allow_unsigned: true, ..WhatsAppConfig::default() };
        assert!(matches!(route(&garbage, &unsigned_ok), Route::Reply(Response { status: 400, .. })));
    }

    #[test]
    fn default_config_refuses_unsigned_deliveries() {
        let unsigned = request("POST /webhook HTTP/1.1\r\n\r\n{\"entry\":[]}");
        assert!(matches!(
            route(&unsigned, &WhatsAppConfig::default()),
            Route::Reply(Response { status: 401, .. })
        ));

        let opted_in = WhatsAppConfig { allow_unsigned: true, ..WhatsAppConfig::default() };
        match route(&unsigned, &opted_in) {
            Route::Accept(v) => assert_eq!(v["entry"], serde_json::json!([])),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn server_needs_app_secret_or_explicit_opt_in() {
        assert!(matches!(check_signing(&WhatsAppConfig::default()), Err(EngineError::Config(_))));
        assert!(check_signing(&config()).is_ok());
        assert!(check_signing(&WhatsAppConfig { allow_unsigned: true, ..WhatsAppConfig::default() }).is_ok());
    }

    #[test]
    fn other_routes() {
        let health = request("GET /health HTTP/1.1\r\n\r\n");
        assert!(matches!(route(&health, &config()), Route::Reply(Response { status: 200, .. })));
        let missing = request("GET /nope HTTP/1.1\r\n\r\n");
        assert!(matches!(route(&missing, &config()), Route::Reply(Response { status: 404, .. })));
        let wrong = request("DELETE /webhook HTTP/1.1\r\n\r\n");
        assert!(matches!(route(&wrong, &config()), Route::Reply(Response { status: 405, .. })));
    }
}
