//! Low-level backend client.
//!
//! Wraps the (retrying, auth-injecting) transport stack with the session
//! rules every endpoint shares: make sure the token is fresh before a
//! request, report each response status back to the auth provider, and map
//! failures onto [`CloudError`].  It knows nothing about telemetry encoding
//! or command parsing.

use core::fmt;
use std::sync::Arc;

use log::{debug, info, warn};

use super::auth::AuthProvider;
use super::endpoints::status;
use crate::transport::{ContentType, Request, Response, Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudError {
    /// No device identity provisioned.
    NoCredentials,
    /// Operation issued before `init`/`start`.
    NotInitialized,
    /// No usable token (or a 401 from the backend).
    NotAuthenticated,
    /// 403: the device has been revoked.
    DeviceRevoked,
    NetworkError,
    ServerError,
    ParseError,
    RateLimited,
}

impl fmt::Display for CloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no device credentials"),
            Self::NotInitialized => write!(f, "cloud not initialized"),
            Self::NotAuthenticated => write!(f, "not authenticated"),
            Self::DeviceRevoked => write!(f, "device revoked"),
            Self::NetworkError => write!(f, "network error"),
            Self::ServerError => write!(f, "server error"),
            Self::ParseError => write!(f, "parse error"),
            Self::RateLimited => write!(f, "rate limited"),
        }
    }
}

impl From<TransportError> for CloudError {
    fn from(_: TransportError) -> Self {
        Self::NetworkError
    }
}

/// Status-code classification for a non-2xx response.
pub fn classify_status(code: u16) -> CloudError {
    match code {
        status::FORBIDDEN => CloudError::DeviceRevoked,
        status::UNAUTHORIZED => CloudError::NotAuthenticated,
        status::TOO_MANY_REQUESTS => CloudError::RateLimited,
        c if c >= 500 => CloudError::ServerError,
        _ => CloudError::NetworkError,
    }
}

pub struct CloudClient {
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthProvider>,
}

impl CloudClient {
    pub fn new(transport: Arc<dyn Transport>, auth: Arc<dyn AuthProvider>) -> Self {
        Self { transport, auth }
    }

    pub fn connect(&self) -> Result<(), CloudError> {
        self.transport.connect().map_err(|e| {
            warn!("Cloud: transport connect failed: {}", e);
            CloudError::NetworkError
        })
    }

    pub fn disconnect(&self) {
        if let Err(e) = self.transport.disconnect() {
            debug!("Cloud: transport disconnect: {}", e);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn is_revoked(&self) -> bool {
        self.auth.is_revoked()
    }

    pub fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Response, CloudError> {
        let mut req = Request::get(path);
        for (k, v) in query {
            req = req.query(*k, *v);
        }
        self.execute(&req)
    }

    pub fn post(&self, path: &str, body: &[u8], content_type: ContentType) -> Result<Response, CloudError> {
        self.execute(&Request::post(path).body(body, content_type))
    }

    pub fn put(&self, path: &str, body: &[u8], content_type: ContentType) -> Result<Response, CloudError> {
        self.execute(&Request::put(path).body(body, content_type))
    }

    fn ensure_auth(&self) -> Result<(), CloudError> {
        if self.auth.is_revoked() {
            return Err(CloudError::DeviceRevoked);
        }
        if self.auth.needs_refresh() {
            if let Err(e) = self.auth.refresh() {
                warn!("Cloud: token refresh failed: {}", e);
                return Err(if self.auth.is_revoked() {
                    CloudError::DeviceRevoked
                } else {
                    CloudError::NotAuthenticated
                });
            }
        }
        Ok(())
    }

    /// One authenticated exchange.  Non-2xx statuses become errors.
    ///
    /// A 401 re-authenticates once and repeats the request.  This is
    /// separate from the transport's retry ladder, which never sees 4xx.
    pub fn execute(&self, request: &Request) -> Result<Response, CloudError> {
        self.ensure_auth()?;
        let resp = self.exchange(request)?;
        if resp.status != status::UNAUTHORIZED {
            return self.check(request, resp);
        }

        info!("Cloud: {} {} -> 401, re-authenticating", request.method.as_str(), request.path);
        if let Err(e) = self.auth.refresh() {
            warn!("Cloud: re-authentication failed: {}", e);
            return Err(if self.auth.is_revoked() {
                CloudError::DeviceRevoked
            } else {
                CloudError::NotAuthenticated
            });
        }
        let resp = self.exchange(request)?;
        self.check(request, resp)
    }

    fn exchange(&self, request: &Request) -> Result<Response, CloudError> {
        let resp = self.transport.send(request).map_err(|e| {
            warn!("Cloud: {} {} failed: {}", request.method.as_str(), request.path, e);
            CloudError::from(e)
        })?;
        self.auth.handle_response_status(resp.status);
        Ok(resp)
    }

    fn check(&self, request: &Request, resp: Response) -> Result<Response, CloudError> {
        if resp.is_success() {
            return Ok(resp);
        }
        let err = classify_status(resp.status);
        warn!(
            "Cloud: {} {} -> {} ({})",
            request.method.as_str(),
            request.path,
            resp.status,
            err
        );
        Err(err)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::client;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn status_mapping() {
        assert_eq!(classify_status(403), CloudError::DeviceRevoked);
        assert_eq!(classify_status(401), CloudError::NotAuthenticated);
        assert_eq!(classify_status(429), CloudError::RateLimited);
        assert_eq!(classify_status(502), CloudError::ServerError);
        assert_eq!(classify_status(404), CloudError::NetworkError);
    }

    #[test]
    fn every_status_reaches_auth() {
        let (c, t, a) = client();
        t.reply(200, "{}");
        t.reply(500, "");
        assert!(c.get("/commands", &[("status", "pending")]).is_ok());
        assert_eq!(c.post("/x", b"", ContentType::Json), Err(CloudError::ServerError));
        assert_eq!(*a.statuses.lock().unwrap(), vec![200, 500]);
        assert_eq!(t.sent()[0].url_path(), "/commands?status=pending");
    }

    #[test]
    fn unauthorized_reauthenticates_and_repeats_once() {
        let (c, t, a) = client();
        t.reply(401, "");
        t.reply(200, "{}");
        assert_eq!(c.post("/commands/a1/ack", b"", ContentType::Json).map(|r| r.status), Ok(200));
        assert_eq!(a.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(t.sent().len(), 2);
        assert_eq!(t.sent()[1].path, "/commands/a1/ack");
        assert_eq!(*a.statuses.lock().unwrap(), vec![401, 200]);
    }

    #[test]
    fn second_unauthorized_is_not_repeated() {
        let (c, t, a) = client();
        t.reply(401, "");
        t.reply(401, "");
        t.reply(200, "{}");
        assert_eq!(c.get("/commands", &[]), Err(CloudError::NotAuthenticated));
        assert_eq!(a.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(t.sent().len(), 2);
    }

    #[test]
    fn failed_reauthentication_skips_repeat() {
        let (c, t, a) = client();
        a.refresh_fails.store(true, Ordering::SeqCst);
        t.reply(401, "");
        assert_eq!(c.get("/commands", &[]), Err(CloudError::NotAuthenticated));
        assert_eq!(t.sent().len(), 1);
    }

    #[test]
    fn revoked_short_circuits() {
        let (c, t, a) = client();
        a.revoked.store(true, Ordering::SeqCst);
        assert_eq!(c.get("/commands", &[]), Err(CloudError::DeviceRevoked));
        assert!(t.sent().is_empty());
    }

    #[test]
    fn stale_token_refreshed_first() {
        let (c, t, a) = client();
        a.stale.store(true, Ordering::SeqCst);
        assert!(c.put("/devices/info", b"{}", ContentType::Json).is_ok());
        assert_eq!(a.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(t.sent().len(), 1);
    }

    #[test]
    fn failed_refresh_blocks_request() {
        let (c, t, a) = client();
        a.stale.store(true, Ordering::SeqCst);
        a.refresh_fails.store(true, Ordering::SeqCst);
        assert_eq!(c.get("/commands", &[]), Err(CloudError::NotAuthenticated));
        assert!(t.sent().is_empty());
    }

    #[test]
    fn transport_failure_is_network_error() {
        let (c, t, _) = client();
        t.fail(TransportError::ConnectionReset);
        assert_eq!(c.get("/commands", &[]), Err(CloudError::NetworkError));
    }
}
