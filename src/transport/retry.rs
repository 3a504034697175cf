//! Retrying transport decorator.
//!
//! Wraps any [`Transport`] and re-issues failed exchanges according to a
//! [`RetryPolicy`].  Transport failures and server-error statuses share one
//! retry ladder:
//!
//! | Condition                                   | Retried iff              |
//! |---------------------------------------------|--------------------------|
//! | timeout                                     | `retry_on_timeout`       |
//! | generic failure / invalid state / no memory | `retry_on_connection_error` |
//! | connection-class (connect, reset, DNS, TLS) | `retry_on_connection_error` |
//! | 5xx on a successful exchange                | `retry_on_server_error`  |
//! | anything else (4xx, parse errors)           | never                    |
//!
//! `send` sleeps the calling context between attempts.  `send_async`
//! never blocks: each retry is scheduled as a one-shot timer whose callback
//! re-queues the request on the wrapped transport.

use core::time::Duration;
use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{OnComplete, Request, Response, Transport, TransportError};
use crate::app::ports::{ClockPort, ConfigError, TimerPort};
use crate::backoff::next_delay;

// ───────────────────────────────────────────────────────────────
// Policy
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1).
    pub max_retries: u32,
    pub initial_delay_ms: u32,
    pub max_delay_ms: u32,
    pub backoff_multiplier: f32,
    pub retry_on_timeout: bool,
    pub retry_on_server_error: bool,
    pub retry_on_connection_error: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            retry_on_timeout: true,
            retry_on_server_error: true,
            retry_on_connection_error: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            retry_on_timeout: false,
            retry_on_server_error: false,
            retry_on_connection_error: false,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.initial_delay_ms))
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.max_delay_ms))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries > 16 {
            return Err(ConfigError::ValidationFailed("retry.max_retries must be 0–16"));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ConfigError::ValidationFailed(
                "retry.initial_delay_ms must be <= retry.max_delay_ms",
            ));
        }
        if !(1.0..=10.0).contains(&self.backoff_multiplier) {
            return Err(ConfigError::ValidationFailed(
                "retry.backoff_multiplier must be 1.0–10.0",
            ));
        }
        Ok(())
    }

    pub fn is_retryable_error(&self, error: TransportError) -> bool {
        match error {
            TransportError::Timeout => self.retry_on_timeout,
            TransportError::Failed | TransportError::InvalidState | TransportError::NoMemory => {
                self.retry_on_connection_error
            }
            e if e.is_connection_class() => self.retry_on_connection_error,
            _ => false,
        }
    }

    pub fn is_retryable_response(&self, response: &Response) -> bool {
        response.is_server_error() && self.retry_on_server_error
    }

    fn is_retryable(&self, result: &Result<Response, TransportError>) -> bool {
        match result {
            Ok(resp) => self.is_retryable_response(resp),
            Err(e) => self.is_retryable_error(*e),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// RetryTransport
// ───────────────────────────────────────────────────────────────

pub struct RetryTransport {
    inner: Arc<dyn Transport>,
    policy: RetryPolicy,
    clock: Arc<dyn ClockPort>,
    timers: Arc<dyn TimerPort>,
}

impl RetryTransport {
    pub fn new(
        inner: Arc<dyn Transport>,
        policy: RetryPolicy,
        clock: Arc<dyn ClockPort>,
        timers: Arc<dyn TimerPort>,
    ) -> Self {
        Self {
            inner,
            policy,
            clock,
            timers,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &Arc<dyn Transport> {
        &self.inner
    }
}

impl Transport for RetryTransport {
    fn connect(&self) -> Result<(), TransportError> {
        let mut delay = self.policy.initial_delay();
        let mut retries = 0;
        loop {
            match self.inner.connect() {
                Ok(()) => return Ok(()),
                Err(e) if self.policy.is_retryable_error(e) && retries < self.policy.max_retries => {
                    retries += 1;
                    warn!(
                        "Retry: connect failed ({}), attempt {}/{} in {} ms",
                        e,
                        retries,
                        self.policy.max_retries,
                        delay.as_millis()
                    );
                    self.clock.sleep(delay);
                    delay = next_delay(delay, self.policy.backoff_multiplier, self.policy.max_delay());
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnect()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn send(&self, request: &Request) -> Result<Response, TransportError> {
        let mut delay = self.policy.initial_delay();
        let mut retries = 0;
        loop {
            let result = self.inner.send(request);
            if !self.policy.is_retryable(&result) || retries >= self.policy.max_retries {
                if retries > 0 && result.as_ref().is_ok_and(Response::is_success) {
                    info!("Retry: {} {} succeeded after {} retries", request.method.as_str(), request.path, retries);
                }
                return result;
            }
            retries += 1;
            warn!(
                "Retry: {} {} failed ({}), attempt {}/{} in {} ms",
                request.method.as_str(),
                request.path,
                describe(&result),
                retries,
                self.policy.max_retries,
                delay.as_millis()
            );
            self.clock.sleep(delay);
            delay = next_delay(delay, self.policy.backoff_multiplier, self.policy.max_delay());
        }
    }

    fn send_async(&self, request: Request, on_complete: OnComplete) -> Result<(), TransportError> {
        let slot: RetrySlot = Arc::new(Mutex::new(Some(AsyncRetry {
            inner: self.inner.clone(),
            timers: self.timers.clone(),
            policy: self.policy,
            request,
            on_complete,
            retries: 0,
            delay: self.policy.initial_delay(),
        })));
        issue_attempt(&slot);
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Response, TransportError> {
        self.inner.receive(timeout)
    }
}

fn describe(result: &Result<Response, TransportError>) -> String {
    match result {
        Ok(resp) => format!("HTTP {}", resp.status),
        Err(e) => format!("{e}"),
    }
}

// ───────────────────────────────────────────────────────────────
// Async retry state
// ───────────────────────────────────────────────────────────────

/// In-flight async exchange.  Owns the request and the caller's callback;
/// whoever takes it out of the slot is the only one allowed to continue it.
struct AsyncRetry {
    inner: Arc<dyn Transport>,
    timers: Arc<dyn TimerPort>,
    policy: RetryPolicy,
    request: Request,
    on_complete: OnComplete,
    retries: u32,
    delay: Duration,
}

type RetrySlot = Arc<Mutex<Option<AsyncRetry>>>;

fn take(slot: &RetrySlot) -> Option<AsyncRetry> {
    match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

fn put(slot: &RetrySlot, state: AsyncRetry) {
    match slot.lock() {
        Ok(mut guard) => *guard = Some(state),
        Err(poisoned) => *poisoned.into_inner() = Some(state),
    }
}

fn issue_attempt(slot: &RetrySlot) {
    let Some(state) = take(slot) else {
        return;
    };
    let inner = state.inner.clone();
    let request = state.request.clone();
    put(slot, state);

    let continuation = slot.clone();
    let queued = inner.send_async(
        request,
        Box::new(move |result| on_attempt_done(&continuation, result)),
    );
    if let Err(e) = queued {
        on_attempt_done(slot, Err(e));
    }
}

fn on_attempt_done(slot: &RetrySlot, result: Result<Response, TransportError>) {
    let Some(mut state) = take(slot) else {
        return;
    };

    if !state.policy.is_retryable(&result) || state.retries >= state.policy.max_retries {
        (state.on_complete)(result);
        return;
    }

    state.retries += 1;
    let delay = state.delay;
    state.delay = next_delay(delay, state.policy.backoff_multiplier, state.policy.max_delay());
    warn!(
        "Retry(async): {} failed ({}), attempt {}/{} in {} ms",
        state.request.path,
        describe(&result),
        state.retries,
        state.policy.max_retries,
        delay.as_millis()
    );

    let timers = state.timers.clone();
    put(slot, state);

    let next = slot.clone();
    match timers.once(delay, Box::new(move || issue_attempt(&next))) {
        Ok(handle) => handle.detach(),
        Err(e) => {
            warn!("Retry(async): could not schedule retry: {}", e);
            if let Some(state) = take(slot) {
                (state.on_complete)(Err(TransportError::NoMemory));
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
