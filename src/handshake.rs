//! HTTP request handling and WebSocket upgrade.
//!
//! A new TCP connection starts as a plain HTTP/1.x request. The request head
//! is accumulated line by line (either `\r\n` or `\n` endings) up to an empty
//! line, then routed:
//!
//! - `/` and `/client.html`: embedded HTML client
//! - `/broadway.js`: embedded JavaScript client
//! - `/socket` and `/socket-bin`: WebSocket upgrade (text or binary output)
//!
//! Two handshake generations are accepted. Clients sending
//! `Sec-WebSocket-Key` get the RFC 6455 SHA-1 accept and length-prefixed
//! framing. Clients sending `Sec-WebSocket-Key1`/`Key2` get the older
//! MD5-challenge response and `0x00 ... 0xFF` framing.

use base64::Engine;
use md5::Md5;
use sha1::{Digest, Sha1};

use crate::assets;
use crate::framing::Variant;

/// Default cap on the accumulated request head, in bytes.
pub const MAX_REQUEST_SIZE: usize = 5 * 1024;

/// Bytes of challenge payload that follow a legacy upgrade request head.
pub const LEGACY_KEY3_LEN: usize = 8;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const WS_PROTOCOL: &str = "broadway";

/// Errors answered with an HTTP status before closing the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("request too long")]
    RequestTooLong,

    #[error("malformed request line")]
    MalformedRequest,

    #[error("only GET implemented")]
    MethodNotImplemented,

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("bad websocket request: {0}")]
    BadWebSocket(&'static str),
}

impl HandshakeError {
    /// HTTP status code and reason phrase for this error.
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            HandshakeError::RequestTooLong => (400, "Request too long"),
            HandshakeError::MalformedRequest => (400, "Bad request"),
            HandshakeError::MethodNotImplemented => (501, "Only GET implemented"),
            HandshakeError::NotFound(_) => (404, "File not found"),
            HandshakeError::BadWebSocket(_) => (400, "Bad websocket request"),
        }
    }

    /// Full HTTP response for this error.
    pub fn to_response(&self) -> Vec<u8> {
        let (code, reason) = self.status();
        let body = format!(
            "<html><head><title>{code} {reason}</title></head><body>{}</body></html>",
            escape_html(&self.to_string())
        );
        format!(
            "HTTP/1.0 {code} {reason}\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
        .into_bytes()
    }
}

/// Error text may echo the request path back into an HTML body.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Accumulates a request head line by line.
#[derive(Debug)]
pub struct RequestReader {
    head: String,
    limit: usize,
}

impl RequestReader {
    pub fn new(limit: usize) -> Self {
        Self {
            head: String::new(),
            limit,
        }
    }

    /// Feed one line (with or without its terminator).
    ///
    /// Returns `Ok(true)` once the blank line ending the head was seen.
    pub fn push_line(&mut self, line: &str) -> Result<bool, HandshakeError> {
        let trimmed = line.trim_end_matches(&['\r', '\n'][..]);
        if trimmed.is_empty() && !self.head.is_empty() {
            return Ok(true);
        }
        if self.head.len() + trimmed.len() + 1 > self.limit {
            return Err(HandshakeError::RequestTooLong);
        }
        if !trimmed.is_empty() {
            self.head.push_str(trimmed);
            self.head.push('\n');
        }
        Ok(false)
    }

    pub fn finish(self) -> Result<HttpRequest, HandshakeError> {
        HttpRequest::parse(&self.head)
    }
}

/// A parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Request path with any query string removed.
    pub path: String,
    pub version: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Parse a request head whose lines are separated by `\n` or `\r\n`.
    pub fn parse(head: &str) -> Result<Self, HandshakeError> {
        let mut lines = head.lines().map(|l| l.trim_end_matches('\r'));
        let request_line = lines.next().ok_or(HandshakeError::MalformedRequest)?;

        let mut parts = request_line.split_ascii_whitespace();
        let method = parts.next().ok_or(HandshakeError::MalformedRequest)?;
        if method != "GET" {
            return Err(HandshakeError::MethodNotImplemented);
        }
        let target = parts.next().ok_or(HandshakeError::MalformedRequest)?;
        let version = parts.next().map(str::to_string);
        let path = target.split('?').next().unwrap_or(target).to_string();

        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect();

        Ok(Self {
            method: method.to_string(),
            path,
            version,
            headers,
        })
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn header_count(&self, name: &str) -> usize {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .count()
    }

    /// Whether this is a well-formed legacy upgrade whose 8-byte key must
    /// be read from the bytes following the head. Anything else is answered
    /// without waiting for more input.
    pub fn wants_legacy_key(&self) -> bool {
        let valid_key = |name: &str| {
            self.header_count(name) == 1
                && self.header(name).is_some_and(|v| legacy_key_number(v).is_ok())
        };
        matches!(route(&self.path), Ok(Route::Socket { .. }))
            && self.header("Host").is_some()
            && self.header("Sec-WebSocket-Key").is_none()
            && valid_key("Sec-WebSocket-Key1")
            && valid_key("Sec-WebSocket-Key2")
    }
}

/// Where a request path leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    ClientHtml,
    ClientJs,
    Socket { binary: bool },
}

pub fn route(path: &str) -> Result<Route, HandshakeError> {
    match path {
        "/" | "/client.html" => Ok(Route::ClientHtml),
        "/broadway.js" => Ok(Route::ClientJs),
        "/socket" => Ok(Route::Socket { binary: false }),
        "/socket-bin" => Ok(Route::Socket { binary: true }),
        other => Err(HandshakeError::NotFound(other.to_string())),
    }
}

/// A completed upgrade: the bytes to send back and how to talk afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgrade {
    pub response: Vec<u8>,
    pub variant: Variant,
    /// Output is sent as binary WebSocket frames rather than base64 text.
    pub binary: bool,
    /// Bytes of the post-head buffer consumed by the handshake itself.
    pub consumed: usize,
}

/// What to do with a complete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Serve a static response and close.
    Asset(Vec<u8>),
    Upgrade(Upgrade),
}

/// Decide the response to `request`. `body` holds whatever bytes were read
/// past the request head.
pub fn respond(request: &HttpRequest, body: &[u8]) -> Result<HandshakeOutcome, HandshakeError> {
    match route(&request.path)? {
        Route::ClientHtml => Ok(HandshakeOutcome::Asset(asset_response(assets::CLIENT_HTML)?)),
        Route::ClientJs => Ok(HandshakeOutcome::Asset(asset_response(assets::CLIENT_JS)?)),
        Route::Socket { binary } => upgrade(request, body, binary).map(HandshakeOutcome::Upgrade),
    }
}

fn asset_response(name: &str) -> Result<Vec<u8>, HandshakeError> {
    let asset = assets::get(name).ok_or_else(|| HandshakeError::NotFound(name.to_string()))?;
    let mut response = format!(
        "HTTP/1.0 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        asset.mime,
        asset.data.len()
    )
    .into_bytes();
    response.extend_from_slice(&asset.data);
    Ok(response)
}

fn upgrade(request: &HttpRequest, body: &[u8], binary: bool) -> Result<Upgrade, HandshakeError> {
    let host = request
        .header("Host")
        .ok_or(HandshakeError::BadWebSocket("missing Host"))?;
    let origin = request
        .header("Origin")
        .or_else(|| request.header("Sec-WebSocket-Origin"));
    let location = format!("ws://{host}{}", request.path);
    let protocol = request
        .header("Sec-WebSocket-Protocol")
        .filter(|p| p.split(',').any(|p| p.trim() == WS_PROTOCOL))
        .map(|_| format!("Sec-WebSocket-Protocol: {WS_PROTOCOL}\r\n"))
        .unwrap_or_default();

    if let Some(key) = request.header("Sec-WebSocket-Key") {
        let origin = origin
            .map(|o| format!("Sec-WebSocket-Origin: {o}\r\n"))
            .unwrap_or_default();
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             {origin}\
             Sec-WebSocket-Location: {location}\r\n\
             {protocol}\
             \r\n",
            accept_key(key)
        );
        return Ok(Upgrade {
            response: response.into_bytes(),
            variant: Variant::WebSocket,
            binary,
            consumed: 0,
        });
    }

    if request.header_count("Sec-WebSocket-Key1") != 1
        || request.header_count("Sec-WebSocket-Key2") != 1
    {
        return Err(HandshakeError::BadWebSocket("expected one Key1 and one Key2"));
    }
    let key1 = legacy_key_number(request.header("Sec-WebSocket-Key1").unwrap_or_default())?;
    let key2 = legacy_key_number(request.header("Sec-WebSocket-Key2").unwrap_or_default())?;
    let key3 = body
        .get(..LEGACY_KEY3_LEN)
        .ok_or(HandshakeError::BadWebSocket("missing 8-byte key"))?;

    let origin = origin
        .map(|o| format!("Sec-WebSocket-Origin: {o}\r\n"))
        .unwrap_or_default();
    let mut response = format!(
        "HTTP/1.1 101 WebSocket Protocol Handshake\r\n\
         Upgrade: WebSocket\r\n\
         Connection: Upgrade\r\n\
         {origin}\
         Sec-WebSocket-Location: {location}\r\n\
         {protocol}\
         \r\n"
    )
    .into_bytes();
    response.extend_from_slice(&legacy_challenge(key1, key2, key3));

    Ok(Upgrade {
        response,
        variant: Variant::Legacy,
        binary,
        consumed: LEGACY_KEY3_LEN,
    })
}

/// `base64(sha1(key ++ GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Decode a `Sec-WebSocket-Key1/2` value: its digits read as one number,
/// divided by the count of spaces.
pub fn legacy_key_number(value: &str) -> Result<u32, HandshakeError> {
    let mut number: u64 = 0;
    let mut spaces: u64 = 0;
    for c in value.chars() {
        if let Some(digit) = c.to_digit(10) {
            number = number
                .checked_mul(10)
                .and_then(|n| n.checked_add(digit as u64))
                .ok_or(HandshakeError::BadWebSocket("key overflow"))?;
        } else if c == ' ' {
            spaces += 1;
        }
    }
    if spaces == 0 {
        return Err(HandshakeError::BadWebSocket("key without spaces"));
    }
    u32::try_from(number / spaces).map_err(|_| HandshakeError::BadWebSocket("key out of range"))
}

/// MD5 over `key1 (BE) ++ key2 (BE) ++ key3`.
pub fn legacy_challenge(key1: u32, key2: u32, key3: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(key1.to_be_bytes());
    hasher.update(key2.to_be_bytes());
    hasher.update(key3);
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&hasher.finalize());
    digest
}
