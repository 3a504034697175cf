//! Device session authentication.
//!
//! Exchanges the device identity (`device_id` + `secret`) for a bearer
//! token and keeps it alive:
//!
//! ```text
//!                authenticate() ok
//!   Unauthenticated ───────────────────▶ Authenticated
//!         ▲                                │      ▲
//!         │ logout()                   401 │      │ refresh() / authenticate()
//!         │                                ▼      │
//!         └──────────────────────────── TokenExpired
//!
//!   any ── 403 ──▶ Revoked   (terminal until the identity is reset)
//! ```
//!
//! The token lives in a [`TokenSlot`], normally the RTC region that
//! survives deep sleep.  A still-valid token on wake short-circuits
//! `authenticate()` with no network traffic.
//!
//! All state sits behind one mutex.  The HTTP exchanges for authenticate
//! and refresh run under it and go straight to the [`HttpClient`], never
//! through the authenticated transport, so nothing re-enters the session.

use core::fmt;
use core::time::Duration;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use burster::Limiter;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::credentials::DeviceIdentity;
use super::endpoints::{self, status};
use crate::app::ports::{ClockPort, HttpClient, HttpResponse};
use crate::config::{AuthConfig, CloudConfig};
use crate::survivable::{TOKEN_CAPACITY, TokenSlot};
use crate::transport::{ContentType, Method};

// ── Constants ────────────────────────────────────────────────

/// `"Bearer "` + token.
pub const AUTH_HEADER_CAPACITY: usize = TOKEN_CAPACITY + 7;

/// Value of the `Authorization` header.
pub type AuthHeader = heapless::String<AUTH_HEADER_CAPACITY>;

// ── Errors / state ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No device identity loaded.
    NoCredentials,
    /// The exchange never produced a response.
    NetworkError,
    /// 401 on a full credential exchange.
    InvalidCredentials,
    /// 403: the backend has revoked this device.
    DeviceRevoked,
    /// Local limiter exhausted, or 429 from the server.
    RateLimited,
    /// Response body unusable.
    ParseError,
    /// Any other non-2xx status.
    ServerError,
    /// Revoked, or no valid token to build a header from.
    InvalidState,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no device credentials"),
            Self::NetworkError => write!(f, "network error"),
            Self::InvalidCredentials => write!(f, "invalid credentials"),
            Self::DeviceRevoked => write!(f, "device revoked"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::ParseError => write!(f, "malformed auth response"),
            Self::ServerError => write!(f, "server error"),
            Self::InvalidState => write!(f, "no usable session"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    TokenExpired,
    Revoked,
}

// ── AuthProvider ─────────────────────────────────────────────

/// Supplies credentials to a transport and learns from its responses.
pub trait AuthProvider: Send + Sync {
    fn get_auth_header(&self) -> Result<AuthHeader, AuthError>;

    fn needs_refresh(&self) -> bool;

    fn refresh(&self) -> Result<(), AuthError>;

    fn has_credentials(&self) -> bool;

    /// Called with the status of every backend response.
    fn handle_response_status(&self, status: u16);

    fn is_revoked(&self) -> bool;
}

// ── Wire format ──────────────────────────────────────────────

#[derive(Serialize)]
struct AuthRequest<'a> {
    device_id: &'a str,
    secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

// ── AuthSession ──────────────────────────────────────────────

struct Inner {
    state: AuthState,
    last_error: Option<AuthError>,
    identity: Option<DeviceIdentity>,
    token: TokenSlot,
    limiter: burster::TokenBucket<fn() -> Duration>,
}

pub struct AuthSession {
    inner: Mutex<Inner>,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn ClockPort>,
    base_url: String,
    timeout: Duration,
    config: AuthConfig,
}

impl AuthSession {
    pub fn new(
        token: TokenSlot,
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn ClockPort>,
        cloud: &CloudConfig,
        config: AuthConfig,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: AuthState::Unauthenticated,
                last_error: None,
                identity: None,
                token,
                limiter: burster::TokenBucket::new_with_time_provider(
                    1,
                    u64::from(config.rate_limit_burst),
                    platform_now as fn() -> Duration,
                ),
            }),
            http,
            clock,
            base_url: cloud.base_url.trim_end_matches('/').to_string(),
            timeout: cloud.request_timeout(),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install (or remove) the identity used for full exchanges.
    pub fn set_identity(&self, identity: Option<DeviceIdentity>) {
        self.lock().identity = identity;
    }

    pub fn state(&self) -> AuthState {
        self.lock().state
    }

    pub fn last_error(&self) -> Option<AuthError> {
        self.lock().last_error
    }

    /// Reuse a valid token if there is one, otherwise run a full exchange.
    pub fn authenticate(&self) -> Result<(), AuthError> {
        let mut inner = self.lock();
        if inner.state == AuthState::Revoked {
            return Err(AuthError::DeviceRevoked);
        }
        if inner.token.is_valid(self.clock.now_ms()) {
            if inner.state != AuthState::Authenticated {
                info!("Auth: {:?} -> Authenticated (cached token)", inner.state);
            }
            inner.state = AuthState::Authenticated;
            inner.last_error = None;
            return Ok(());
        }
        self.full_exchange(&mut inner)
    }

    /// Drop the token.  Revocation is kept.
    pub fn logout(&self) {
        let mut inner = self.lock();
        inner.token.clear();
        if inner.state != AuthState::Revoked {
            inner.state = AuthState::Unauthenticated;
        }
    }

    /// Forget identity, token and revocation.  Factory reset only.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.token.clear();
        inner.identity = None;
        inner.state = AuthState::Unauthenticated;
        inner.last_error = None;
        info!("Auth: session reset");
    }

    // ── internals ────────────────────────────────────────────

    fn fail(inner: &mut Inner, error: AuthError) -> Result<(), AuthError> {
        inner.last_error = Some(error);
        Err(error)
    }

    fn full_exchange(&self, inner: &mut Inner) -> Result<(), AuthError> {
        let Some(identity) = inner.identity.clone() else {
            error!("Auth: no device credentials");
            return Self::fail(inner, AuthError::NoCredentials);
        };
        if inner.limiter.try_consume(1).is_err() {
            warn!("Auth: local rate limit reached, skipping exchange");
            return Self::fail(inner, AuthError::RateLimited);
        }

        info!("Auth: authenticating device {}", identity.device_id);
        let body = serde_json::to_vec(&AuthRequest {
            device_id: &identity.device_id,
            secret: &identity.secret,
        })
        .map_err(|_| AuthError::ParseError)?;

        match self.post(endpoints::AUTH_DEVICE, &[], &body) {
            Ok(resp) => self.handle_auth_response(inner, &resp),
            Err(e) => Self::fail(inner, e),
        }
    }

    /// Refresh with the current token.  `Ok(None)` means the server
    /// answered 401 and a full exchange is required.
    fn token_refresh(&self, inner: &mut Inner) -> Result<Option<()>, AuthError> {
        let mut header = AuthHeader::new();
        let token = inner.token.as_str().ok_or(AuthError::InvalidState)?;
        header.push_str("Bearer ").map_err(|_| AuthError::InvalidState)?;
        header.push_str(token).map_err(|_| AuthError::InvalidState)?;

        info!("Auth: refreshing token");
        let resp = match self.post(endpoints::AUTH_REFRESH, &[("Authorization", header.as_str())], &[]) {
            Ok(r) => r,
            Err(e) => return Self::fail(inner, e).map(Some),
        };
        if resp.status == status::UNAUTHORIZED {
            warn!("Auth: refresh returned 401, token expired");
            return Ok(None);
        }
        self.handle_auth_response(inner, &resp).map(Some)
    }

    fn post(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpResponse, AuthError> {
        let url = format!("{}{}", self.base_url, path);
        self.http
            .perform(Method::Post, &url, headers, body, ContentType::Json, self.timeout)
            .map_err(|e| {
                error!("Auth: POST {} failed: {}", path, e);
                AuthError::NetworkError
            })
    }

    fn handle_auth_response(&self, inner: &mut Inner, resp: &HttpResponse) -> Result<(), AuthError> {
        match resp.status {
            status::FORBIDDEN => {
                error!("Auth: {:?} -> Revoked", inner.state);
                inner.token.clear();
                inner.state = AuthState::Revoked;
                return Self::fail(inner, AuthError::DeviceRevoked);
            }
            status::UNAUTHORIZED => {
                error!("Auth: invalid credentials");
                return Self::fail(inner, AuthError::InvalidCredentials);
            }
            status::TOO_MANY_REQUESTS => {
                warn!("Auth: rate limited by server");
                return Self::fail(inner, AuthError::RateLimited);
            }
            s if !(200..300).contains(&s) => {
                error!("Auth: failed with status {}", s);
                return Self::fail(inner, AuthError::ServerError);
            }
            _ => {}
        }

        let parsed: TokenResponse = match serde_json::from_slice(&resp.body) {
            Ok(p) => p,
            Err(e) => {
                error!("Auth: unparseable response: {}", e);
                return Self::fail(inner, AuthError::ParseError);
            }
        };
        let token = match parsed.token.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => {
                error!("Auth: no token in response");
                return Self::fail(inner, AuthError::ParseError);
            }
        };
        let expires_in = parsed
            .expires_in
            .unwrap_or(u64::from(self.config.default_expires_in_secs));
        let expires_at = self
            .clock
            .now_ms()
            .saturating_add(i64::try_from(expires_in.saturating_mul(1000)).unwrap_or(i64::MAX));

        if inner.token.set(token, Some(expires_at)).is_err() {
            error!("Auth: token of {} bytes does not fit", token.len());
            return Self::fail(inner, AuthError::ParseError);
        }
        if inner.state != AuthState::Authenticated {
            info!("Auth: {:?} -> Authenticated", inner.state);
        }
        debug!("Auth: token len={} expires_in={}s", token.len(), expires_in);
        inner.state = AuthState::Authenticated;
        inner.last_error = None;
        Ok(())
    }
}

impl AuthProvider for AuthSession {
    fn get_auth_header(&self) -> Result<AuthHeader, AuthError> {
        let inner = self.lock();
        if inner.state == AuthState::Revoked {
            warn!("Auth: header requested while revoked");
            return Err(AuthError::InvalidState);
        }
        if !inner.token.is_valid(self.clock.now_ms()) {
            warn!("Auth: header requested without a valid token");
            return Err(AuthError::InvalidState);
        }
        let token = inner.token.as_str().ok_or(AuthError::InvalidState)?;
        let mut header = AuthHeader::new();
        header.push_str("Bearer ").map_err(|_| AuthError::InvalidState)?;
        header.push_str(token).map_err(|_| AuthError::InvalidState)?;
        Ok(header)
    }

    fn needs_refresh(&self) -> bool {
        let inner = self.lock();
        if inner.state == AuthState::Revoked {
            return false;
        }
        inner
            .token
            .needs_refresh(self.config.refresh_buffer(), self.clock.now_ms())
    }

    fn refresh(&self) -> Result<(), AuthError> {
        let mut inner = self.lock();
        if inner.state == AuthState::Revoked {
            return Err(AuthError::DeviceRevoked);
        }
        if inner.token.is_valid(self.clock.now_ms()) {
            match self.token_refresh(&mut inner)? {
                Some(()) => return Ok(()),
                None => warn!("Auth: falling back to full authentication"),
            }
        }
        self.full_exchange(&mut inner)
    }

    fn has_credentials(&self) -> bool {
        self.lock().identity.is_some()
    }

    fn handle_response_status(&self, code: u16) {
        let mut inner = self.lock();
        match code {
            status::UNAUTHORIZED => {
                inner.token.clear();
                if inner.state != AuthState::Revoked {
                    warn!("Auth: {:?} -> TokenExpired (401)", inner.state);
                    inner.state = AuthState::TokenExpired;
                }
            }
            status::FORBIDDEN => {
                inner.token.clear();
                if inner.state != AuthState::Revoked {
                    error!("Auth: {:?} -> Revoked (403)", inner.state);
                }
                inner.state = AuthState::Revoked;
            }
            _ => {}
        }
    }

    fn is_revoked(&self) -> bool {
        self.lock().state == AuthState::Revoked
    }
}

#[cfg(target_os = "espidf")]
fn platform_now() -> Duration {
    let us = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
    Duration::from_micros(us as u64)
}

#[cfg(not(target_os = "espidf"))]
fn platform_now() -> Duration {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use crate::sim::ManualClock;
    use crate::survivable::SurvivableToken;
    use crate::transport::TransportError;
    use std::collections::VecDeque;

    const NOW: i64 = 1_700_000_000_000;

    #[derive(Default)]
    struct Script {
        replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        calls: Mutex<Vec<(String, Option<String>, Vec<u8>)>>,
    }

    impl Script {
        fn reply(&self, status: u16, body: &str) {
            self.replies.lock().unwrap().push_back(Ok(HttpResponse {
                status,
                body: body.as_bytes().to_vec(),
            }));
        }

        fn calls(&self) -> Vec<(String, Option<String>, Vec<u8>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl HttpClient for Script {
        fn perform(
            &self,
            _method: Method,
            url: &str,
            headers: &[(&str, &str)],
            body: &[u8],
            _content_type: ContentType,
            _timeout: Duration,
        ) -> Result<HttpResponse, TransportError> {
            let auth = headers
                .iter()
                .find(|(k, _)| *k == "Authorization")
                .map(|(_, v)| v.to_string());
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), auth, body.to_vec()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Timeout))
        }
    }

    struct Rig {
        auth: AuthSession,
        http: Arc<Script>,
        clock: Arc<ManualClock>,
    }

    fn rig_with(token: SurvivableToken, config: AuthConfig) -> Rig {
        let http = Arc::new(Script::default());
        let clock = Arc::new(ManualClock::new(NOW));
        let cloud = CloudConfig::with_base_url("https://api.test").unwrap();
        let auth = AuthSession::new(
            TokenSlot::detached(token),
            http.clone(),
            clock.clone(),
            &cloud,
            config,
        );
        auth.set_identity(DeviceIdentity::new("dev-1", "s3cret"));
        Rig { auth, http, clock }
    }

    fn rig() -> Rig {
        rig_with(SurvivableToken::zeroed(), AuthConfig::default())
    }

    #[test]
    fn full_exchange_stores_token() {
        let r = rig();
        r.http.reply(200, r#"{"token":"abc","expires_in":600}"#);
        assert_eq!(r.auth.authenticate(), Ok(()));
        assert_eq!(r.auth.state(), AuthState::Authenticated);
        assert_eq!(r.auth.get_auth_header().unwrap().as_str(), "Bearer abc");

        let calls = r.http.calls();
        assert_eq!(calls[0].0, "https://api.test/auth/device");
        let body: serde_json::Value = serde_json::from_slice(&calls[0].2).unwrap();
        assert_eq!(body["device_id"], "dev-1");
        assert_eq!(body["secret"], "s3cret");
    }

    #[test]
    fn valid_survivable_token_skips_network() {
        let mut t = SurvivableToken::zeroed();
        t.set("cached", Some(NOW + 3_600_000)).unwrap();
        let r = rig_with(t, AuthConfig::default());
        assert_eq!(r.auth.authenticate(), Ok(()));
        assert!(r.http.calls().is_empty());
        assert!(!r.auth.needs_refresh());
    }

    #[test]
    fn missing_expires_in_uses_default() {
        let r = rig();
        r.http.reply(200, r#"{"token":"abc"}"#);
        r.auth.authenticate().unwrap();
        r.clock.advance(Duration::from_secs(3599));
        assert!(r.auth.get_auth_header().is_ok());
        r.clock.advance(Duration::from_secs(2));
        assert_eq!(r.auth.get_auth_header(), Err(AuthError::InvalidState));
    }

    #[test]
    fn response_classification() {
        for (status, body, expected) in [
            (401, "", AuthError::InvalidCredentials),
            (429, "", AuthError::RateLimited),
            (500, "", AuthError::ServerError),
            (302, "", AuthError::ServerError),
            (200, "not json", AuthError::ParseError),
            (200, r#"{"token":""}"#, AuthError::ParseError),
            (200, r#"{"expires_in":5}"#, AuthError::ParseError),
        ] {
            let r = rig();
            r.http.reply(status, body);
            assert_eq!(r.auth.authenticate(), Err(expected), "status {status} body {body}");
            assert_eq!(r.auth.last_error(), Some(expected));
            assert_ne!(r.auth.state(), AuthState::Authenticated);
        }
    }

    #[test]
    fn transport_failure_is_network_error() {
        let r = rig();
        assert_eq!(r.auth.authenticate(), Err(AuthError::NetworkError));
    }

    #[test]
    fn forbidden_is_terminal() {
        let r = rig();
        r.http.reply(403, "");
        assert_eq!(r.auth.authenticate(), Err(AuthError::DeviceRevoked));
        assert!(r.auth.is_revoked());

        r.http.reply(200, r#"{"token":"abc"}"#);
        assert_eq!(r.auth.authenticate(), Err(AuthError::DeviceRevoked));
        assert_eq!(r.auth.refresh(), Err(AuthError::DeviceRevoked));
        assert!(!r.auth.needs_refresh());
        assert_eq!(r.auth.get_auth_header(), Err(AuthError::InvalidState));
        assert_eq!(r.http.calls().len(), 1);
    }

    #[test]
    fn no_identity_is_no_credentials() {
        let r = rig();
        r.auth.set_identity(None);
        assert!(!r.auth.has_credentials());
        assert_eq!(r.auth.authenticate(), Err(AuthError::NoCredentials));
        assert!(r.http.calls().is_empty());
    }

    #[test]
    fn refresh_uses_bearer_token() {
        let r = rig();
        r.http.reply(200, r#"{"token":"one","expires_in":600}"#);
        r.auth.authenticate().unwrap();
        // Inside the 300 s buffer.
        r.clock.advance(Duration::from_secs(400));
        assert!(r.auth.needs_refresh());

        r.http.reply(200, r#"{"token":"two","expires_in":600}"#);
        assert_eq!(r.auth.refresh(), Ok(()));
        let calls = r.http.calls();
        assert_eq!(calls[1].0, "https://api.test/auth/refresh");
        assert_eq!(calls[1].1.as_deref(), Some("Bearer one"));
        assert_eq!(r.auth.get_auth_header().unwrap().as_str(), "Bearer two");
        assert!(!r.auth.needs_refresh());
    }

    #[test]
    fn refresh_401_falls_back_to_full_exchange() {
        let r = rig();
        r.http.reply(200, r#"{"token":"one","expires_in":600}"#);
        r.auth.authenticate().unwrap();
        r.http.reply(401, "");
        r.http.reply(200, r#"{"token":"fresh","expires_in":600}"#);
        assert_eq!(r.auth.refresh(), Ok(()));
        let calls = r.http.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[2].0.ends_with("/auth/device"));
        assert_eq!(r.auth.get_auth_header().unwrap().as_str(), "Bearer fresh");
    }

    #[test]
    fn refresh_server_error_does_not_fall_back() {
        let r = rig();
        r.http.reply(200, r#"{"token":"one","expires_in":600}"#);
        r.auth.authenticate().unwrap();
        r.http.reply(503, "");
        assert_eq!(r.auth.refresh(), Err(AuthError::ServerError));
        assert_eq!(r.http.calls().len(), 2);
    }

    #[test]
    fn refresh_without_token_authenticates() {
        let r = rig();
        r.http.reply(200, r#"{"token":"abc"}"#);
        assert_eq!(r.auth.refresh(), Ok(()));
        assert!(r.http.calls()[0].0.ends_with("/auth/device"));
    }

    #[test]
    fn needs_refresh_without_token() {
        let r = rig();
        assert!(r.auth.needs_refresh());
    }

    #[test]
    fn response_status_401_and_403() {
        let r = rig();
        r.http.reply(200, r#"{"token":"abc"}"#);
        r.auth.authenticate().unwrap();

        r.auth.handle_response_status(200);
        assert_eq!(r.auth.state(), AuthState::Authenticated);
        r.auth.handle_response_status(401);
        assert_eq!(r.auth.state(), AuthState::TokenExpired);
        assert!(r.auth.get_auth_header().is_err());

        r.auth.handle_response_status(403);
        assert!(r.auth.is_revoked());
        r.auth.handle_response_status(401);
        assert!(r.auth.is_revoked());
    }

    #[test]
    fn local_rate_limit_blocks_network() {
        let r = rig_with(
            SurvivableToken::zeroed(),
            AuthConfig {
                rate_limit_burst: 2,
                ..AuthConfig::default()
            },
        );
        assert_eq!(r.auth.authenticate(), Err(AuthError::NetworkError));
        assert_eq!(r.auth.authenticate(), Err(AuthError::NetworkError));
        assert_eq!(r.auth.authenticate(), Err(AuthError::RateLimited));
        assert_eq!(r.http.calls().len(), 2);
    }

    #[test]
    fn logout_and_reset() {
        let r = rig();
        r.http.reply(200, r#"{"token":"abc"}"#);
        r.auth.authenticate().unwrap();
        r.auth.logout();
        assert_eq!(r.auth.state(), AuthState::Unauthenticated);
        assert!(r.auth.needs_refresh());

        r.auth.handle_response_status(403);
        r.auth.logout();
        assert!(r.auth.is_revoked());
        r.auth.reset();
        assert_eq!(r.auth.state(), AuthState::Unauthenticated);
        assert!(!r.auth.has_credentials());
    }
}
