//! Wireless link lifecycle.
//!
//! ```text
//!                 init()
//!   Idle ─────────────────▶ Disconnected ◀──────────────┐
//!                              │   ▲                      │ backoff timer
//!                    connect() │   │ link lost            │ (retry_count < max)
//!                              ▼   │                      │
//!                          Connecting ──────────▶ Connected
//!                              │        GotIp
//!                              ▼ retries exhausted
//!                            Failed
//!
//!   any ── start_provisioning() ──▶ Provisioning ── timeout / bad creds ──▶ Failed
//! ```
//!
//! The state lives in an atomic so `state()` never blocks.  Everything else
//! (pending credentials, retry counter, timers) sits behind one mutex that
//! is never held across a link-driver call, an event publish or the
//! state-change callback.  Driver events and timer expiries reach the
//! manager through `Weak` references, so a dropped manager is never
//! resurrected by a late callback.

use core::time::Duration;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use log::{debug, error, info, warn};

use crate::adapters::device_id::pairing_name;
use crate::app::events::NetworkEvent;
use crate::app::ports::{EventBus, LinkPort, StorageError, StoragePort, TimerHandle, TimerPort};
use crate::backoff::backoff;
use crate::config::WifiConfig;
use crate::net::types::{
    ConnectionError, ConnectionInfo, ConnectionState, Credentials, LinkEvent, PASSWORD_MAX_LEN,
    PairingParams, ProvisioningConfig, SSID_MAX_LEN,
};

/// Storage namespace for link credentials.
pub const NAMESPACE: &str = "wifi";
const KEY_SSID: &str = "ssid";
const KEY_PASS: &str = "pass";

/// Invoked with `(old, new)` after every actual state change.
pub type StateCallback = Box<dyn Fn(ConnectionState, ConnectionState) + Send + Sync + 'static>;

#[derive(Default)]
struct Control {
    initialized: bool,
    config: WifiConfig,
    store: Option<Box<dyn StoragePort>>,
    /// Credentials used by reconnect attempts.
    pending: Option<Credentials>,
    retry_count: u32,
    info: Option<ConnectionInfo>,
    reconnect_timer: Option<TimerHandle>,
    prov_timer: Option<TimerHandle>,
    /// Set by `disconnect()`; suppresses auto-reconnect until the next connect.
    user_disconnected: bool,
}

struct Shared {
    state: AtomicU8,
    control: Mutex<Control>,
    link: Arc<dyn LinkPort>,
    timers: Arc<dyn TimerPort>,
    events: Arc<dyn EventBus<NetworkEvent>>,
    on_state_change: RwLock<Option<Arc<StateCallback>>>,
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        link: Arc<dyn LinkPort>,
        timers: Arc<dyn TimerPort>,
        events: Arc<dyn EventBus<NetworkEvent>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(ConnectionState::Idle as u8),
                control: Mutex::new(Control::default()),
                link,
                timers,
                events,
                on_state_change: RwLock::new(None),
            }),
        }
    }

    /// Bring up the link driver and move to `Disconnected`.
    pub fn init(
        &self,
        store: Box<dyn StoragePort>,
        config: WifiConfig,
    ) -> Result<(), ConnectionError> {
        config.validate()?;
        {
            let mut c = self.shared.lock();
            if c.initialized {
                return Err(ConnectionError::AlreadyInitialized);
            }
            c.initialized = true;
            c.config = config;
            c.store = Some(store);
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        self.shared.link.set_event_handler(Some(Box::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_link_event(event);
            }
        })));

        if let Err(e) = self.shared.link.start() {
            error!("WiFi: link start failed: {}", e);
            self.shared.link.set_event_handler(None);
            let mut c = self.shared.lock();
            c.initialized = false;
            c.store = None;
            return Err(e.into());
        }

        self.shared.set_state(ConnectionState::Disconnected);
        info!(
            "WiFi: manager initialized (max_retries={}, backoff {}..{} ms)",
            config.max_retries, config.initial_delay_ms, config.max_delay_ms
        );
        Ok(())
    }

    /// Connect with the stored credentials.
    pub fn connect(&self) -> Result<(), ConnectionError> {
        let creds = {
            let c = self.shared.lock();
            if !c.initialized {
                return Err(ConnectionError::NotInitialized);
            }
            let store = c.store.as_deref().ok_or(ConnectionError::NotInitialized)?;
            match load_credentials(store) {
                Ok(creds) => creds,
                Err(e) => {
                    warn!("WiFi: no usable stored credentials ({})", e);
                    return Err(e);
                }
            }
        };
        self.shared.start_connect(creds)
    }

    /// Persist `credentials` (best-effort) and connect with them.
    pub fn connect_with(&self, credentials: &Credentials) -> Result<(), ConnectionError> {
        {
            let mut c = self.shared.lock();
            if !c.initialized {
                return Err(ConnectionError::NotInitialized);
            }
            if let Some(store) = c.store.as_deref_mut() {
                if let Err(e) = save_credentials(store, credentials) {
                    // Keep going: a working link matters more than persistence.
                    warn!("WiFi: failed to save credentials: {}", e);
                }
            }
        }
        self.shared.start_connect(credentials.clone())
    }

    /// Drop the link and stop any reconnect or provisioning in progress.
    pub fn disconnect(&self) -> Result<(), ConnectionError> {
        self.shared.ensure_initialized()?;
        if self.state() == ConnectionState::Provisioning {
            self.shared.stop_provisioning_session();
        }
        {
            let mut c = self.shared.lock();
            c.reconnect_timer = None;
            c.retry_count = 0;
            c.user_disconnected = true;
            c.info = None;
        }
        // The state follows the request even if the driver refuses it, so
        // a suppressed reconnect never leaves us reporting a live link.
        let result = self.shared.link.disconnect();
        if let Err(e) = &result {
            warn!("WiFi: link disconnect failed: {}", e);
        }

        let old = self.shared.set_state(ConnectionState::Disconnected);
        if matches!(old, ConnectionState::Connected | ConnectionState::Connecting) {
            self.shared.events.publish(NetworkEvent::Disconnected);
        }
        result.map_err(Into::into)
    }

    /// Open an out-of-band pairing session for new credentials.
    ///
    /// Refuses an empty proof-of-possession secret with `InvalidArgument`.
    pub fn start_provisioning(&self, config: &ProvisioningConfig) -> Result<(), ConnectionError> {
        self.shared.ensure_initialized()?;
        if config.pop.is_empty() {
            error!("WiFi: provisioning requires a proof-of-possession secret");
            return Err(ConnectionError::InvalidArgument);
        }

        let state = self.state();
        if matches!(state, ConnectionState::Connected | ConnectionState::Connecting) {
            warn!("WiFi: {} link dropped for provisioning", state);
            if let Err(e) = self.disconnect() {
                warn!("WiFi: continuing with provisioning: {}", e);
            }
        }
        {
            // Until credentials arrive, a late GotIp from the old
            // association is not a connection.
            let mut c = self.shared.lock();
            c.reconnect_timer = None;
            c.retry_count = 0;
            c.user_disconnected = true;
        }

        let mac = self.shared.link.mac_address();
        let params = PairingParams {
            device_name: pairing_name(&config.device_name_prefix, &mac),
            pop: config.pop.clone(),
            service_uuid: config.service_uuid,
        };
        self.shared.link.start_provisioning(&params)?;

        if config.timeout_secs > 0 {
            let weak = Arc::downgrade(&self.shared);
            let timeout = Duration::from_secs(u64::from(config.timeout_secs));
            match self.shared.timers.once(
                timeout,
                Box::new(move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_provisioning_timeout();
                    }
                }),
            ) {
                Ok(handle) => self.shared.lock().prov_timer = Some(handle),
                Err(e) => {
                    error!("WiFi: provisioning timer failed: {}", e);
                    self.shared.link.stop_provisioning();
                    return Err(e.into());
                }
            }
        }

        info!(
            "WiFi: provisioning as '{}' (timeout {} s)",
            params.device_name, config.timeout_secs
        );
        self.shared.set_state(ConnectionState::Provisioning);
        self.shared.events.publish(NetworkEvent::ProvisioningStarted);
        Ok(())
    }

    pub fn stop_provisioning(&self) -> Result<(), ConnectionError> {
        self.shared.ensure_initialized()?;
        self.shared.stop_provisioning_session();
        self.shared.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Link parameters; `Some` only while `Connected`.
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        if !self.is_connected() {
            return None;
        }
        self.shared.lock().info
    }

    pub fn retry_count(&self) -> u32 {
        self.shared.lock().retry_count
    }

    pub fn has_credentials(&self) -> bool {
        self.shared
            .lock()
            .store
            .as_deref()
            .is_some_and(|s| s.exists(NAMESPACE, KEY_SSID))
    }

    pub fn clear_credentials(&self) -> Result<(), ConnectionError> {
        let mut c = self.shared.lock();
        c.pending = None;
        let store = c.store.as_deref_mut().ok_or(ConnectionError::NotInitialized)?;
        store.delete(NAMESPACE, KEY_SSID)?;
        store.delete(NAMESPACE, KEY_PASS)?;
        store.commit()?;
        info!("WiFi: stored credentials cleared");
        Ok(())
    }

    /// Install the state-change callback.  It runs on whichever context
    /// caused the transition and must not call back into the manager.
    pub fn on_state_change(&self, callback: StateCallback) {
        let cb = Some(Arc::new(callback));
        match self.shared.on_state_change.write() {
            Ok(mut slot) => *slot = cb,
            Err(poisoned) => *poisoned.into_inner() = cb,
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let initialized = {
            let mut c = self.shared.lock();
            c.reconnect_timer = None;
            c.prov_timer = None;
            c.initialized
        };
        if initialized {
            self.shared.link.set_event_handler(None);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Internals (shared with driver and timer callbacks)
// ───────────────────────────────────────────────────────────────

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn ensure_initialized(&self) -> Result<(), ConnectionError> {
        if self.lock().initialized {
            Ok(())
        } else {
            Err(ConnectionError::NotInitialized)
        }
    }

    /// Swap in `new`; the callback fires only on an actual change, after
    /// the swap.  Returns the previous state.
    fn set_state(&self, new: ConnectionState) -> ConnectionState {
        let old = ConnectionState::from_u8(self.state.swap(new as u8, Ordering::AcqRel));
        if old != new {
            info!("WiFi: {} -> {}", old, new);
            let cb = self
                .on_state_change
                .read()
                .ok()
                .and_then(|slot| slot.as_ref().cloned());
            if let Some(cb) = cb {
                cb(old, new);
            }
        }
        old
    }

    fn start_connect(self: &Arc<Self>, creds: Credentials) -> Result<(), ConnectionError> {
        {
            let mut c = self.lock();
            c.pending = Some(creds.clone());
            c.user_disconnected = false;
            c.reconnect_timer = None;
            c.retry_count = 0;
        }
        info!("WiFi: connecting to '{}'", creds.ssid);
        self.set_state(ConnectionState::Connecting);
        if let Err(e) = self.link.connect(&creds) {
            warn!("WiFi: connect request failed: {}", e);
            self.set_state(ConnectionState::Disconnected);
            self.schedule_reconnect();
            return Err(e.into());
        }
        Ok(())
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let mut c = self.lock();
        if c.pending.is_none() {
            return;
        }
        if c.config.max_retries != 0 && c.retry_count >= c.config.max_retries {
            c.reconnect_timer = None;
            let attempts = c.retry_count;
            drop(c);
            error!("WiFi: giving up after {} reconnect attempts", attempts);
            self.set_state(ConnectionState::Failed);
            self.events.publish(NetworkEvent::ConnectionFailed);
            return;
        }

        let delay = backoff(c.retry_count, c.config.initial_delay(), c.config.max_delay());
        c.retry_count += 1;
        warn!(
            "WiFi: reconnecting in {} ms (attempt {})",
            delay.as_millis(),
            c.retry_count
        );

        let weak = Arc::downgrade(self);
        let scheduled = self.timers.once(
            delay,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.on_reconnect_timer();
                }
            }),
        );
        match scheduled {
            Ok(handle) => c.reconnect_timer = Some(handle),
            Err(e) => {
                drop(c);
                error!("WiFi: reconnect timer failed: {}", e);
                self.set_state(ConnectionState::Failed);
                self.events.publish(NetworkEvent::ConnectionFailed);
            }
        }
    }

    fn on_reconnect_timer(self: &Arc<Self>) {
        let creds = {
            let mut c = self.lock();
            c.reconnect_timer = None;
            match (&c.pending, self.state()) {
                (Some(creds), ConnectionState::Disconnected) => creds.clone(),
                _ => return,
            }
        };
        self.set_state(ConnectionState::Connecting);
        if let Err(e) = self.link.connect(&creds) {
            warn!("WiFi: reconnect request failed: {}", e);
            self.set_state(ConnectionState::Disconnected);
            self.schedule_reconnect();
        }
    }

    fn on_provisioning_timeout(&self) {
        warn!("WiFi: provisioning timed out");
        self.events.publish(NetworkEvent::ProvisioningTimeout);
        self.stop_provisioning_session();
        self.set_state(ConnectionState::Failed);
        self.events.publish(NetworkEvent::ProvisioningFailed);
    }

    fn stop_provisioning_session(&self) {
        self.lock().prov_timer = None;
        self.link.stop_provisioning();
    }

    fn handle_link_event(self: &Arc<Self>, event: LinkEvent) {
        match event {
            LinkEvent::Started => debug!("WiFi: driver started"),

            LinkEvent::Disconnected { reason } => {
                let state = self.state();
                if !matches!(state, ConnectionState::Connecting | ConnectionState::Connected) {
                    debug!("WiFi: disconnect while {} ignored (reason {})", state, reason);
                    return;
                }
                let user_initiated = {
                    let mut c = self.lock();
                    c.info = None;
                    c.user_disconnected
                };
                if user_initiated {
                    debug!("WiFi: disconnected on request (reason {})", reason);
                    return;
                }
                warn!("WiFi: link lost (reason {})", reason);
                self.set_state(ConnectionState::Disconnected);
                self.events.publish(NetworkEvent::Disconnected);
                self.schedule_reconnect();
            }

            LinkEvent::GotIp(info) => {
                {
                    let mut c = self.lock();
                    if c.user_disconnected && self.state() == ConnectionState::Provisioning {
                        debug!("WiFi: address {} ignored while pairing", info.ip);
                        return;
                    }
                    c.info = Some(info);
                    c.retry_count = 0;
                    c.reconnect_timer = None;
                }
                info!(
                    "WiFi: connected, ip={} gw={} rssi={} ch={}",
                    info.ip, info.gateway, info.rssi, info.channel
                );
                self.set_state(ConnectionState::Connected);
                self.events.publish(NetworkEvent::Connected(info));
            }

            LinkEvent::CredentialsReceived(creds) => {
                info!("WiFi: received credentials for '{}'", creds.ssid);
                {
                    let mut c = self.lock();
                    if let Some(store) = c.store.as_deref_mut() {
                        if let Err(e) = save_credentials(store, &creds) {
                            warn!("WiFi: failed to save provisioned credentials: {}", e);
                        }
                    }
                    c.pending = Some(creds);
                    c.user_disconnected = false;
                }
                self.events.publish(NetworkEvent::CredentialsReceived);
            }

            LinkEvent::CredentialsFailed => {
                warn!("WiFi: provisioned credentials rejected by AP");
                self.set_state(ConnectionState::Failed);
                self.events.publish(NetworkEvent::ProvisioningFailed);
            }

            LinkEvent::ProvisioningEnded => {
                self.lock().prov_timer = None;
                info!("WiFi: provisioning complete");
                self.events.publish(NetworkEvent::ProvisioningComplete);
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Credential persistence
// ───────────────────────────────────────────────────────────────

fn load_credentials(store: &dyn StoragePort) -> Result<Credentials, ConnectionError> {
    let mut ssid = [0u8; SSID_MAX_LEN];
    let n = store.read(NAMESPACE, KEY_SSID, &mut ssid).map_err(|e| match e {
        StorageError::NotFound => ConnectionError::NotFound,
        e => e.into(),
    })?;
    let ssid = core::str::from_utf8(&ssid[..n]).map_err(|_| StorageError::Corrupted)?;

    let mut pass = [0u8; PASSWORD_MAX_LEN];
    let pn = match store.read(NAMESPACE, KEY_PASS, &mut pass) {
        Ok(n) => n,
        Err(StorageError::NotFound) => 0,
        Err(e) => return Err(e.into()),
    };
    let pass = core::str::from_utf8(&pass[..pn]).map_err(|_| StorageError::Corrupted)?;

    Credentials::new(ssid, pass)
}

fn save_credentials(store: &mut dyn StoragePort, creds: &Credentials) -> Result<(), StorageError> {
    store.write(NAMESPACE, KEY_SSID, creds.ssid.as_bytes())?;
    if creds.password.is_empty() {
        store.delete(NAMESPACE, KEY_PASS)?;
    } else {
        store.write(NAMESPACE, KEY_PASS, creds.password.as_bytes())?;
    }
    store.commit()
}

// ── Tests ────────────────────────────────────────────────────
