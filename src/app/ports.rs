//! Port traits: the hexagonal boundary between the connectivity core and
//! the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ConnectionManager / AuthSession / CloudManager
//! ```
//!
//! Driven adapters (radio, key-value storage, timers, clocks, HTTP client)
//! implement these traits.  The core receives them as `Arc<dyn …>` handles
//! at construction time, so nothing in the core reaches for a global
//! singleton and every port has a host-side fake.
//!
//! ## Security notes
//!
//! - **ConfigPort** implementations MUST validate before persisting.
//! - **StoragePort** implementations SHOULD encrypt sensitive keys.
//! - All port errors are typed and callers must handle every variant explicitly.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Arc;

use crate::config::ProbeConfig;
use crate::net::types::{Credentials, LinkEvent, MacAddress, PairingParams};
use crate::transport::{ContentType, Method, TransportError};

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: core ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for link credentials, cloud identity and
/// configuration.
///
/// # Security
///
/// - Implementations SHOULD encrypt sensitive keys (WiFi passwords, device
///   secrets).  On ESP32, prefer the encrypted NVS partition for these.
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic: no partial writes on power loss.
pub trait StoragePort: Send {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;

    /// Flush pending writes.  Backends that commit on every write can
    /// keep the default.
    fn commit(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: core ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists [`ProbeConfig`].
///
/// Implementations MUST reject invalid values with
/// [`ConfigError::ValidationFailed`] rather than clamping them.
pub trait ConfigPort {
    /// Load configuration.  Returns [`ProbeConfig::default()`] if nothing is
    /// stored yet.
    fn load(&self) -> Result<ProbeConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&mut self, config: &ProbeConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Wall clock and blocking delay.
///
/// `now_ms` is epoch milliseconds and only meaningful once SNTP (or the RTC
/// across deep sleep) has set the clock; token expiry is judged against it.
pub trait ClockPort: Send + Sync {
    fn now_ms(&self) -> i64;

    /// Block the calling context.  Only the synchronous retry ladder uses
    /// this; timer callbacks never do.
    fn sleep(&self, duration: Duration);
}

// ───────────────────────────────────────────────────────────────
// Timer port
// ───────────────────────────────────────────────────────────────

pub type OnceCallback = Box<dyn FnOnce() + Send + 'static>;
pub type PeriodicCallback = Box<dyn FnMut() + Send + 'static>;

/// One-shot and periodic timers.
///
/// Callbacks run on the timer-service context: they must be short and must
/// not block on network I/O.
pub trait TimerPort: Send + Sync {
    fn once(&self, delay: Duration, callback: OnceCallback) -> Result<TimerHandle, TimerError>;

    fn periodic(
        &self,
        period: Duration,
        callback: PeriodicCallback,
    ) -> Result<TimerHandle, TimerError>;
}

/// Owned timer.  Dropping it cancels the timer.
///
/// Implementations share the `cancelled` flag with the scheduled callback
/// and check it immediately before firing.  A backend that can stop the
/// underlying timer passes a stop hook, which runs once on cancel.
#[must_use = "dropping a TimerHandle cancels the timer"]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    stop: Option<Box<dyn FnOnce() + Send>>,
    detached: bool,
}

impl TimerHandle {
    pub fn new(cancelled: Arc<AtomicBool>) -> Self {
        Self {
            cancelled,
            stop: None,
            detached: false,
        }
    }

    pub fn with_stop(cancelled: Arc<AtomicBool>, stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancelled,
            stop: Some(Box::new(stop)),
            detached: false,
        }
    }

    pub fn cancel(self) {
        drop(self);
    }

    /// Let the timer run to completion without holding the handle.
    pub fn detach(mut self) {
        self.detached = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        self.cancelled.store(true, Ordering::Release);
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.is_cancelled())
            .field("detached", &self.detached)
            .finish()
    }
}

// ───────────────────────────────────────────────────────────────
// Event bus port
// ───────────────────────────────────────────────────────────────

pub type EventHandler<E> = Box<dyn Fn(&E) + Send + Sync + 'static>;

/// Publish/subscribe for connectivity and session events.
///
/// Handlers run on the publishing (event-dispatch) context.  They must only
/// record intent (set a flag or `try_send` on a bounded channel) and
/// never call back into the publisher.
pub trait EventBus<E>: Send + Sync {
    fn publish(&self, event: E);

    fn subscribe(&self, handler: EventHandler<E>) -> Subscription;
}

/// Keeps a subscription alive.  Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_drop: Some(Box::new(unsubscribe)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f();
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Link port (driven adapter: core ↔ WiFi radio)
// ───────────────────────────────────────────────────────────────

pub type LinkEventHandler = Box<dyn Fn(LinkEvent) + Send + Sync + 'static>;

/// Station-mode radio plus out-of-band credential provisioning.
///
/// Asynchronous outcomes (association lost, address acquired, credentials
/// received over the pairing channel) are reported through the handler
/// registered with [`set_event_handler`](Self::set_event_handler).
pub trait LinkPort: Send + Sync {
    /// Bring up the radio in station mode.
    fn start(&self) -> Result<(), LinkError>;

    fn connect(&self, credentials: &Credentials) -> Result<(), LinkError>;

    fn disconnect(&self) -> Result<(), LinkError>;

    fn start_provisioning(&self, params: &PairingParams) -> Result<(), LinkError>;

    fn stop_provisioning(&self);

    fn mac_address(&self) -> MacAddress;

    /// Install (or with `None`, remove) the driver event handler.
    fn set_event_handler(&self, handler: Option<LinkEventHandler>);
}

// ───────────────────────────────────────────────────────────────
// HTTP client port (driven adapter: transport ↔ esp_http_client)
// ───────────────────────────────────────────────────────────────

/// Raw response from the HTTP client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Executes a single HTTP exchange.  No retries, no auth: those live above.
pub trait HttpClient: Send + Sync {
    fn perform(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
        content_type: ContentType,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

// ───────────────────────────────────────────────────────────────
// Measurement source / system ports (runtime)
// ───────────────────────────────────────────────────────────────

/// Supplies the telemetry batch the main loop uploads.
pub trait MeasurementSource {
    fn collect(&mut self) -> Vec<crate::cloud::telemetry::Measurement>;
}

/// Disruptive system actions requested by remote commands.
pub trait SystemPort {
    fn restart(&mut self);

    /// Erase all persisted state (key-value store and survivable memory).
    fn factory_erase(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Stored bytes are not what the caller expected (e.g. not UTF-8).
    Corrupted,
}

/// Errors from [`TimerPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// The timer service could not allocate a timer.
    NoMemory,
    /// The underlying service rejected the request.
    Platform(i32),
}

/// Errors from [`LinkPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Driver has not been started.
    NotStarted,
    /// Parameters rejected by the driver.
    InvalidArgument,
    /// Operation not available on this platform/driver.
    Unsupported,
    /// ESP-IDF error code.
    Driver(i32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "stored value corrupted"),
        }
    }
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMemory => write!(f, "timer allocation failed"),
            Self::Platform(rc) => write!(f, "timer service error (rc={})", rc),
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "link driver not started"),
            Self::InvalidArgument => write!(f, "invalid link parameters"),
            Self::Unsupported => write!(f, "operation unsupported by link driver"),
            Self::Driver(rc) => write!(f, "link driver error (rc={})", rc),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
