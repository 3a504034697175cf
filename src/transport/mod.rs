//! Request/response transport abstraction.
//!
//! Concrete implementations:
//! - [`HttpTransport`](http::HttpTransport): REST over an [`HttpClient`](crate::app::ports::HttpClient)
//! - [`RetryTransport`](retry::RetryTransport): decorator that retries any other transport
//!
//! The cloud layer is written against `dyn Transport`, so retry, auth
//! injection and the wire client can be stacked in any order without
//! touching the callers.

use core::fmt;
use core::time::Duration;
use std::sync::Arc;

pub mod http;
pub mod retry;
pub mod worker;

// ───────────────────────────────────────────────────────────────
// Closed enums
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Protobuf,
    OctetStream,
}

impl ContentType {
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Protobuf => "application/x-protobuf",
            Self::OctetStream => "application/octet-stream",
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Errors
// ───────────────────────────────────────────────────────────────

/// Transport-level failures.  HTTP status codes are *not* errors here:
/// a 5xx arrives as an `Ok(Response)` and is judged by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the request budget.
    Timeout,
    /// Unspecified failure in the underlying stack.
    Failed,
    /// Operation issued in the wrong state (e.g. send before connect).
    InvalidState,
    /// Allocation, queue or timer exhaustion.
    NoMemory,
    /// TCP connect refused or unreachable.
    ConnectFailed,
    /// Established connection dropped mid-exchange.
    ConnectionReset,
    /// Host name resolution failed.
    DnsFailed,
    /// TLS handshake or session failure.
    TlsFailed,
    /// Malformed request arguments.
    InvalidArgument,
    /// Response could not be parsed.
    InvalidResponse,
}

impl TransportError {
    /// Errors raised by the connection layer itself (socket, DNS, TLS).
    pub const fn is_connection_class(self) -> bool {
        matches!(
            self,
            Self::ConnectFailed | Self::ConnectionReset | Self::DnsFailed | Self::TlsFailed
        )
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Failed => write!(f, "transport failure"),
            Self::InvalidState => write!(f, "transport in invalid state"),
            Self::NoMemory => write!(f, "out of memory"),
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::ConnectionReset => write!(f, "connection reset"),
            Self::DnsFailed => write!(f, "DNS lookup failed"),
            Self::TlsFailed => write!(f, "TLS failure"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::InvalidResponse => write!(f, "invalid response"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Request / Response
// ───────────────────────────────────────────────────────────────

/// Fully owned request.  Nothing borrows from the caller, so a request can
/// outlive the stack frame that built it (async retries rely on this).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub content_type: ContentType,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: Vec::new(),
            content_type: ContentType::Json,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>, content_type: ContentType) -> Self {
        self.body = body.into();
        self.content_type = content_type;
        self
    }

    /// `path` with percent-encoded query parameters appended.
    pub fn url_path(&self) -> String {
        build_url(&self.path, &self.query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

// ───────────────────────────────────────────────────────────────
// Transport trait
// ───────────────────────────────────────────────────────────────

/// Completion callback for [`Transport::send_async`].
pub type OnComplete = Box<dyn FnOnce(Result<Response, TransportError>) + Send + 'static>;

/// Request/response channel to the backend.
///
/// Methods take `&self`: transports are shared between the main control
/// loop, the async I/O worker and timer continuations, and serialise
/// internally.
pub trait Transport: Send + Sync {
    fn connect(&self) -> Result<(), TransportError>;

    fn disconnect(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Blocking exchange.
    fn send(&self, request: &Request) -> Result<Response, TransportError>;

    /// Queue an exchange; `on_complete` runs exactly once on another context.
    ///
    /// An `Err` return means the request was not queued and `on_complete`
    /// will not run.
    fn send_async(&self, request: Request, on_complete: OnComplete) -> Result<(), TransportError>;

    /// Poll for inbound data.  `Timeout` means nothing arrived.
    fn receive(&self, timeout: Duration) -> Result<Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn connect(&self) -> Result<(), TransportError> {
        (**self).connect()
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn send(&self, request: &Request) -> Result<Response, TransportError> {
        (**self).send(request)
    }

    fn send_async(&self, request: Request, on_complete: OnComplete) -> Result<(), TransportError> {
        (**self).send_async(request, on_complete)
    }

    fn receive(&self, timeout: Duration) -> Result<Response, TransportError> {
        (**self).receive(timeout)
    }
}

// ───────────────────────────────────────────────────────────────
// URL helpers
// ───────────────────────────────────────────────────────────────

/// Percent-encode everything outside the RFC 3986 unreserved set.
pub fn url_encode(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

pub fn build_url(path: &str, query: &[(String, String)]) -> String {
    let mut url = String::from(path);
    for (i, (k, v)) in query.iter().enumerate() {
        url.push(if i == 0 { '?' } else { '&' });
        url.push_str(&url_encode(k));
        url.push('=');
        url.push_str(&url_encode(v));
    }
    url
}

// ── Tests ────────────────────────────────────────────────────
