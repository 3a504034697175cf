//! Cloud session orchestration.
//!
//! ```text
//!   Uninitialized ── init(), no identity ──▶ NoCredentials
//!        │ start()                                ▲
//!        ▼                                        │ factory_reset()
//!    Connecting ── auth ok ──▶ Authenticated ─────┤
//!        │                         │ 403          │
//!        │ other failure           ▼              │
//!        └────────▶ Error       Revoked ──────────┘
//! ```
//!
//! Composes [`AuthSession`], the retrying HTTP transport, the command
//! channel and telemetry.  Driven from the main control context only; its
//! periodic timers post [`ControlMsg`]s instead of calling back in.

use core::fmt;
use std::sync::Arc;

use log::{error, info, warn};
use serde::Serialize;

use super::auth::{AuthError, AuthProvider, AuthSession};
use super::client::{CloudClient, CloudError};
use super::commands::{CommandBuffer, CommandChannel, CommandType};
use super::credentials::DeviceIdentity;
use super::dispatch::{CommandDispatcher, CommandHandler};
use super::endpoints;
use super::telemetry::{Measurement, MeasurementSerializer, PostcardSerializer, TelemetryService};
use crate::app::commands::{ControlMsg, ControlQueue, post};
use crate::app::events::CloudEvent;
use crate::app::ports::{ClockPort, EventBus, HttpClient, StorageError, StoragePort, TimerHandle, TimerPort};
use crate::config::{ProbeConfig, SessionConfig};
use crate::survivable::TokenSlot;
use crate::transport::ContentType;
use crate::transport::http::{HttpTransport, HttpTransportConfig};
use crate::transport::retry::RetryTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    NoCredentials,
    Connecting,
    Authenticated,
    Revoked,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Process-scoped collaborators.
pub struct CloudDeps {
    pub http: Arc<dyn HttpClient>,
    pub clock: Arc<dyn ClockPort>,
    pub timers: Arc<dyn TimerPort>,
    pub events: Arc<dyn EventBus<CloudEvent>>,
    pub control: ControlQueue,
    /// Key-value store holding the device identity.
    pub store: Box<dyn StoragePort>,
    pub token: TokenSlot,
}

#[derive(Serialize)]
struct DeviceInfo<'a> {
    app_name: &'a str,
    app_version: &'a str,
}

pub struct CloudManager {
    state: SessionState,
    auth: Arc<AuthSession>,
    client: Arc<CloudClient>,
    commands: CommandChannel,
    dispatcher: CommandDispatcher,
    telemetry: TelemetryService,
    store: Box<dyn StoragePort>,
    clock: Arc<dyn ClockPort>,
    timers: Arc<dyn TimerPort>,
    events: Arc<dyn EventBus<CloudEvent>>,
    control: ControlQueue,
    session: SessionConfig,
    active_timers: Vec<TimerHandle>,
}

impl CloudManager {
    pub fn new(deps: CloudDeps, config: &ProbeConfig) -> Self {
        Self::with_serializer(deps, config, Box::new(PostcardSerializer))
    }

    pub fn with_serializer(
        deps: CloudDeps,
        config: &ProbeConfig,
        serializer: Box<dyn MeasurementSerializer>,
    ) -> Self {
        let auth = Arc::new(AuthSession::new(
            deps.token,
            deps.http.clone(),
            deps.clock.clone(),
            &config.cloud,
            config.auth,
        ));

        let mut http_cfg = HttpTransportConfig::new(config.cloud.base_url.as_str());
        http_cfg.timeout = config.cloud.request_timeout();
        let http = Arc::new(HttpTransport::new(deps.http, http_cfg));
        http.set_auth_provider(Some(auth.clone()));
        let transport = Arc::new(RetryTransport::new(
            http,
            config.retry,
            deps.clock.clone(),
            deps.timers.clone(),
        ));

        let client = Arc::new(CloudClient::new(transport, auth.clone()));
        Self {
            state: SessionState::Uninitialized,
            commands: CommandChannel::new(client.clone()),
            dispatcher: CommandDispatcher::new(deps.events.clone()),
            telemetry: TelemetryService::new(client.clone(), serializer),
            auth,
            client,
            store: deps.store,
            clock: deps.clock,
            timers: deps.timers,
            events: deps.events,
            control: deps.control,
            session: config.session,
            active_timers: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    pub fn is_revoked(&self) -> bool {
        self.state == SessionState::Revoked
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    fn set_state(&mut self, new: SessionState) {
        if self.state != new {
            info!("Cloud: {} -> {}", self.state, new);
            self.state = new;
        }
    }

    /// Load the device identity.  Without one the session parks in
    /// `NoCredentials` and `start()` refuses.
    pub fn init(&mut self) -> Result<(), CloudError> {
        match DeviceIdentity::load(self.store.as_ref()) {
            Ok(identity) => {
                info!("Cloud: device {}", identity.device_id);
                self.auth.set_identity(Some(identity));
                self.set_state(SessionState::Uninitialized);
                Ok(())
            }
            Err(StorageError::NotFound) => {
                warn!("Cloud: no device credentials found");
                self.auth.set_identity(None);
                self.set_state(SessionState::NoCredentials);
                Err(CloudError::NoCredentials)
            }
            Err(e) => {
                error!("Cloud: identity unreadable: {}", e);
                self.auth.set_identity(None);
                self.set_state(SessionState::NoCredentials);
                Err(CloudError::NoCredentials)
            }
        }
    }

    pub fn start(&mut self) -> Result<(), CloudError> {
        match self.state {
            SessionState::NoCredentials => return Err(CloudError::NoCredentials),
            SessionState::Revoked => {
                error!("Cloud: device revoked, not starting");
                return Err(CloudError::DeviceRevoked);
            }
            _ => {}
        }
        if !self.auth.has_credentials() {
            return Err(CloudError::NotInitialized);
        }

        self.stop_timers();
        self.set_state(SessionState::Connecting);
        if let Err(e) = self.client.connect() {
            self.set_state(SessionState::Error);
            return Err(e);
        }

        match self.auth.authenticate() {
            Ok(()) => {
                self.set_state(SessionState::Authenticated);
                self.events.publish(CloudEvent::Authenticated);
                self.start_timers();
                Ok(())
            }
            Err(AuthError::DeviceRevoked) => {
                self.on_revoked();
                Err(CloudError::DeviceRevoked)
            }
            Err(e) => {
                error!("Cloud: authentication failed: {}", e);
                self.set_state(SessionState::Error);
                self.events.publish(CloudEvent::AuthFailed);
                Err(match e {
                    AuthError::NetworkError => CloudError::NetworkError,
                    AuthError::RateLimited => CloudError::RateLimited,
                    AuthError::ServerError => CloudError::ServerError,
                    AuthError::ParseError => CloudError::ParseError,
                    AuthError::NoCredentials => CloudError::NoCredentials,
                    _ => CloudError::NotAuthenticated,
                })
            }
        }
    }

    /// Stop timers and the transport.  Revocation survives.
    pub fn stop(&mut self) {
        self.stop_timers();
        self.client.disconnect();
        if !matches!(self.state, SessionState::Revoked | SessionState::NoCredentials) {
            self.set_state(SessionState::Uninitialized);
        }
        info!("Cloud: services stopped");
    }

    pub fn send_telemetry(&mut self, measurements: &[Measurement]) -> Result<(), CloudError> {
        if self.state != SessionState::Authenticated {
            return Err(CloudError::NotAuthenticated);
        }
        if measurements.is_empty() {
            return Ok(());
        }
        match self.telemetry.send(measurements) {
            Ok(()) => {
                self.events.publish(CloudEvent::TelemetrySent);
                Ok(())
            }
            Err(e) => {
                warn!("Cloud: telemetry failed: {}", e);
                self.events.publish(CloudEvent::TelemetryFailed);
                self.handle_error(e);
                Err(e)
            }
        }
    }

    /// Poll and dispatch.  Returns the number of successful handlers.
    pub fn poll_commands(&mut self) -> Result<usize, CloudError> {
        if self.state != SessionState::Authenticated {
            return Err(CloudError::NotAuthenticated);
        }
        let mut buf = CommandBuffer::new();
        if let Err(e) = self.commands.poll(&mut buf) {
            warn!("Cloud: command poll failed: {}", e);
            let e = CloudError::from(e);
            self.handle_error(e);
            return Err(e);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        Ok(self
            .dispatcher
            .process_all(&self.commands, &buf, self.clock.now_ms()))
    }

    /// Register a handler for an existing command type.
    pub fn on_command(&mut self, kind: CommandType, handler: CommandHandler) -> bool {
        self.dispatcher.register(kind, handler)
    }

    /// Register a custom command name and its handler.
    pub fn on_named_command(&mut self, name: &str, handler: CommandHandler) -> Option<CommandType> {
        let kind = self.commands.registry_mut().register(name)?;
        self.dispatcher.register(kind, handler).then_some(kind)
    }

    /// Best-effort `PUT /devices/info`.
    pub fn send_device_info(&mut self, app_name: &str, app_version: &str) -> bool {
        if self.state != SessionState::Authenticated {
            return false;
        }
        let Ok(body) = serde_json::to_vec(&DeviceInfo {
            app_name,
            app_version,
        }) else {
            return false;
        };
        match self.client.put(endpoints::DEVICE_INFO, &body, ContentType::Json) {
            Ok(_) => {
                info!("Cloud: device info sent: {} v{}", app_name, app_version);
                true
            }
            Err(e) => {
                warn!("Cloud: device info update failed: {}", e);
                self.handle_error(e);
                false
            }
        }
    }

    /// Refresh the token if it is near expiry.  No network otherwise.
    pub fn check_token_refresh(&mut self) -> Result<(), CloudError> {
        if self.state != SessionState::Authenticated || !self.auth.needs_refresh() {
            return Ok(());
        }
        info!("Cloud: token needs refresh");
        match self.auth.refresh() {
            Ok(()) => {
                self.events.publish(CloudEvent::TokenRefreshed);
                Ok(())
            }
            Err(e) => {
                warn!("Cloud: token refresh failed: {}", e);
                if self.auth.is_revoked() {
                    self.on_revoked();
                    Err(CloudError::DeviceRevoked)
                } else {
                    Err(CloudError::NotAuthenticated)
                }
            }
        }
    }

    /// Wipe the cloud identity and the survivable token.  The only way
    /// out of `Revoked`.
    pub fn factory_reset(&mut self) -> Result<(), CloudError> {
        self.stop_timers();
        self.client.disconnect();
        self.auth.reset();
        let result = DeviceIdentity::clear(self.store.as_mut()).map_err(|e| {
            error!("Cloud: clearing identity failed: {}", e);
            CloudError::NotInitialized
        });
        self.set_state(SessionState::NoCredentials);
        result
    }

    // ── internals ────────────────────────────────────────────

    fn handle_error(&mut self, error: CloudError) {
        if error == CloudError::DeviceRevoked || self.auth.is_revoked() {
            self.on_revoked();
        }
    }

    fn on_revoked(&mut self) {
        if self.state == SessionState::Revoked {
            return;
        }
        error!("Cloud: device has been revoked");
        self.stop_timers();
        self.set_state(SessionState::Revoked);
        self.events.publish(CloudEvent::Revoked);
    }

    fn start_timers(&mut self) {
        let schedule = [
            (self.session.telemetry_interval(), ControlMsg::SendTelemetry),
            (self.session.command_poll_interval(), ControlMsg::PollCommands),
            (self.session.token_check_interval(), ControlMsg::CheckTokenRefresh),
        ];
        for (period, msg) in schedule {
            if period.is_zero() {
                continue;
            }
            let queue = self.control.clone();
            match self.timers.periodic(period, Box::new(move || {
                post(&queue, msg);
            })) {
                Ok(h) => self.active_timers.push(h),
                Err(e) => error!("Cloud: {:?} timer failed: {}", msg, e),
            }
        }
        info!(
            "Cloud: timers started (telemetry={}s commands={}s token={}s)",
            self.session.telemetry_interval_secs,
            self.session.command_poll_interval_secs,
            self.session.token_check_interval_secs
        );
    }

    fn stop_timers(&mut self) {
        // Dropping a handle cancels it.
        self.active_timers.clear();
    }
}

impl Drop for CloudManager {
    fn drop(&mut self) {
        self.stop_timers();
        self.client.disconnect();
    }
}

// ── Tests ────────────────────────────────────────────────────
