//! Property tests for the backoff ladder, sleep-survivable token and retry
//! decorator.
//!
//! Runs on host (x86_64) only; proptest is not available for ESP32 targets.

#![cfg(not(target_os = "espidf"))]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use probelink::app::ports::{HttpClient, HttpResponse};
use probelink::backoff::backoff;
use probelink::cloud::auth::{AuthProvider, AuthSession, AuthState};
use probelink::cloud::credentials::DeviceIdentity;
use probelink::config::{AuthConfig, CloudConfig};
use probelink::sim::{ManualClock, ManualTimers};
use probelink::survivable::{SurvivableToken, TOKEN_CAPACITY, TokenSlot};
use probelink::transport::retry::{RetryPolicy, RetryTransport};
use probelink::transport::{
    ContentType, Method, OnComplete, Request, Response, Transport, TransportError,
};
use proptest::prelude::*;

// ── Backoff ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn backoff_matches_closed_form(
        retry in 0u32..40,
        initial_ms in 1u64..5_000,
        max_ms in 1u64..600_000,
    ) {
        let initial = Duration::from_millis(initial_ms);
        let max = Duration::from_millis(max_ms);
        let expected = 2u128
            .checked_pow(retry)
            .map(|f| u128::from(initial_ms) * f)
            .map_or(max, |ms| Duration::from_millis(ms.min(u128::from(max_ms)) as u64));
        prop_assert_eq!(backoff(retry, initial, max), expected);
    }

    #[test]
    fn backoff_is_monotonic(
        retry in 0u32..200,
        initial_ms in 0u64..10_000,
        max_ms in 0u64..1_000_000,
    ) {
        let initial = Duration::from_millis(initial_ms);
        let max = Duration::from_millis(max_ms);
        prop_assert!(backoff(retry, initial, max) <= backoff(retry + 1, initial, max));
        prop_assert!(backoff(retry, initial, max) <= max);
    }
}

// ── Survivable token ──────────────────────────────────────────

proptest! {
    #[test]
    fn any_tampered_byte_invalidates(
        token in "[A-Za-z0-9._-]{1,512}",
        pick in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let mut t = SurvivableToken::zeroed();
        t.set(&token, None).unwrap();
        prop_assert!(t.is_valid(0));

        let i = pick.index(token.len());
        t.token.data[i] ^= flip;
        prop_assert!(!t.is_valid(0));
    }

    #[test]
    fn length_zero_is_never_valid(crc in any::<u32>(), now in any::<i64>()) {
        let mut t = SurvivableToken::zeroed();
        t.token.crc = crc;
        t.token.length = 0;
        prop_assert!(!t.is_valid(now));
    }

    #[test]
    fn garbage_length_is_never_valid(len in (TOKEN_CAPACITY as u32 + 1)..u32::MAX) {
        let mut t = SurvivableToken::zeroed();
        t.set("abc", None).unwrap();
        t.token.length = len;
        prop_assert!(!t.is_valid(0));
    }

    #[test]
    fn refresh_window_tracks_expiry(
        now in 0i64..4_000_000_000_000,
        ttl_s in 301i64..86_400,
    ) {
        let buffer = Duration::from_secs(300);
        let mut t = SurvivableToken::zeroed();
        prop_assert!(t.needs_refresh(buffer, now));
        t.set("tok", Some(now + ttl_s * 1000)).unwrap();
        prop_assert!(!t.needs_refresh(buffer, now));
        prop_assert!(t.needs_refresh(buffer, now + (ttl_s - 300) * 1000));
    }
}

// ── Revocation ────────────────────────────────────────────────

/// Always hands out a fresh token.
struct Generous;

impl HttpClient for Generous {
    fn perform(
        &self,
        _method: Method,
        _url: &str,
        _headers: &[(&str, &str)],
        _body: &[u8],
        _content_type: ContentType,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: 200,
            body: br#"{"token":"again","expires_in":3600}"#.to_vec(),
        })
    }
}

#[derive(Debug, Clone)]
enum AuthOp {
    Authenticate,
    Refresh,
    Status(u16),
    Advance(u32),
}

fn arb_auth_op() -> impl Strategy<Value = AuthOp> {
    prop_oneof![
        Just(AuthOp::Authenticate),
        Just(AuthOp::Refresh),
        prop_oneof![Just(200u16), Just(401), Just(403), Just(429), Just(500)].prop_map(AuthOp::Status),
        (0u32..7200).prop_map(AuthOp::Advance),
    ]
}

proptest! {
    #[test]
    fn revoked_session_never_recovers(ops in prop::collection::vec(arb_auth_op(), 1..40)) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let mut token = SurvivableToken::zeroed();
        token.set("valid", Some(1_700_000_000_000 + 3_600_000)).unwrap();
        let auth = AuthSession::new(
            TokenSlot::detached(token),
            Arc::new(Generous),
            clock.clone(),
            &CloudConfig::with_base_url("https://api.test").unwrap(),
            AuthConfig::default(),
        );
        auth.set_identity(DeviceIdentity::new("dev-1", "secret"));
        auth.handle_response_status(403);
        prop_assert_eq!(auth.state(), AuthState::Revoked);

        for op in ops {
            match op {
                AuthOp::Authenticate => { let _ = auth.authenticate(); }
                AuthOp::Refresh => { let _ = auth.refresh(); }
                AuthOp::Status(code) => auth.handle_response_status(code),
                AuthOp::Advance(s) => clock.advance(Duration::from_secs(u64::from(s))),
            }
            prop_assert_eq!(auth.state(), AuthState::Revoked);
            prop_assert!(auth.get_auth_header().is_err());
        }
    }
}

// ── Retry decorator ───────────────────────────────────────────

/// Fails the first `failures` sends with `error`, then answers 200.
struct Flaky {
    failures: u32,
    error: TransportError,
    calls: AtomicU32,
}

impl Transport for Flaky {
    fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn send(&self, _request: &Request) -> Result<Response, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(self.error)
        } else {
            Ok(Response::new(200, Vec::new()))
        }
    }

    fn send_async(&self, request: Request, on_complete: OnComplete) -> Result<(), TransportError> {
        on_complete(self.send(&request));
        Ok(())
    }

    fn receive(&self, _timeout: Duration) -> Result<Response, TransportError> {
        Err(TransportError::Timeout)
    }
}

fn retrying(flaky: Arc<Flaky>, max_retries: u32) -> (RetryTransport, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let policy = RetryPolicy {
        max_retries,
        ..RetryPolicy::default()
    };
    let t = RetryTransport::new(flaky, policy, clock.clone(), Arc::new(ManualTimers::new()));
    (t, clock)
}

fn arb_retryable() -> impl Strategy<Value = TransportError> {
    prop_oneof![
        Just(TransportError::Timeout),
        Just(TransportError::ConnectFailed),
        Just(TransportError::ConnectionReset),
        Just(TransportError::DnsFailed),
        Just(TransportError::Failed),
    ]
}

proptest! {
    #[test]
    fn retryable_failures_within_budget_succeed(
        max_retries in 0u32..6,
        failures in 0u32..6,
        error in arb_retryable(),
    ) {
        let flaky = Arc::new(Flaky { failures, error, calls: AtomicU32::new(0) });
        let (t, clock) = retrying(flaky.clone(), max_retries);
        let result = t.send(&Request::get("/commands"));

        if failures <= max_retries {
            prop_assert!(result.is_ok());
            prop_assert_eq!(flaky.calls.load(Ordering::SeqCst), failures + 1);
        } else {
            prop_assert_eq!(result, Err(error));
            prop_assert_eq!(flaky.calls.load(Ordering::SeqCst), max_retries + 1);
        }
        prop_assert_eq!(
            clock.sleeps().len() as u32,
            flaky.calls.load(Ordering::SeqCst) - 1
        );
    }

    #[test]
    fn non_retryable_failure_is_attempted_once(max_retries in 0u32..6) {
        let flaky = Arc::new(Flaky {
            failures: u32::MAX,
            error: TransportError::InvalidArgument,
            calls: AtomicU32::new(0),
        });
        let (t, _) = retrying(flaky.clone(), max_retries);
        prop_assert_eq!(t.send(&Request::get("/x")), Err(TransportError::InvalidArgument));
        prop_assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn two_failures_then_success_uses_three_calls() {
    let flaky = Arc::new(Flaky {
        failures: 2,
        error: TransportError::Timeout,
        calls: AtomicU32::new(0),
    });
    let (t, clock) = retrying(flaky.clone(), 2);
    assert_eq!(t.send(&Request::get("/x")).map(|r| r.status), Ok(200));
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(1000), Duration::from_millis(2000)]
    );
}
