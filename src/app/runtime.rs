//! Main-loop runtime.
//!
//! [`Runtime`] owns the [`CloudManager`] and drains the control channel on
//! the main context.  Event subscribers installed by [`wire`] only translate
//! events into [`ControlMsg`]s.
//!
//! ```text
//!  NetworkEvent ──┐                      ┌──▶ CloudManager
//!                 ├─▶ ControlQueue ─▶ run_once()
//!  CloudEvent ────┘        ▲             └──▶ SystemPort
//!                          │
//!                  session timers
//! ```

use log::{info, warn};

use super::commands::{ControlMsg, ControlQueue, post};
use super::events::{CloudEvent, NetworkEvent};
use super::ports::{EventBus, MeasurementSource, Subscription, SystemPort};
use crate::cloud::client::CloudError;
use crate::cloud::manager::{CloudManager, SessionState};

/// Subscribe the control channel to both buses.  Keep the returned
/// subscriptions alive for as long as the wiring should hold.
pub fn wire(
    network: &dyn EventBus<NetworkEvent>,
    cloud: &dyn EventBus<CloudEvent>,
    queue: &ControlQueue,
) -> (Subscription, Subscription) {
    let q = queue.clone();
    let net_sub = network.subscribe(Box::new(move |event: &NetworkEvent| match event {
        NetworkEvent::Connected(_) => {
            post(&q, ControlMsg::StartCloud);
        }
        NetworkEvent::Disconnected | NetworkEvent::ConnectionFailed => {
            post(&q, ControlMsg::StopCloud);
        }
        _ => {}
    }));

    let q = queue.clone();
    let cloud_sub = cloud.subscribe(Box::new(move |event: &CloudEvent| match event {
        CloudEvent::RebootRequested => {
            post(&q, ControlMsg::Reboot);
        }
        CloudEvent::FactoryResetRequested => {
            post(&q, ControlMsg::FactoryReset);
        }
        _ => {}
    }));

    (net_sub, cloud_sub)
}

pub struct Runtime {
    queue: ControlQueue,
    cloud: CloudManager,
    measurements: Box<dyn MeasurementSource>,
    system: Box<dyn SystemPort>,
    app_name: &'static str,
    app_version: &'static str,
}

impl Runtime {
    pub fn new(
        queue: ControlQueue,
        cloud: CloudManager,
        measurements: Box<dyn MeasurementSource>,
        system: Box<dyn SystemPort>,
    ) -> Self {
        Self {
            queue,
            cloud,
            measurements,
            system,
            app_name: env!("CARGO_PKG_NAME"),
            app_version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Override the name/version reported to `/devices/info`.
    pub fn with_app_info(mut self, name: &'static str, version: &'static str) -> Self {
        self.app_name = name;
        self.app_version = version;
        self
    }

    pub fn cloud(&self) -> &CloudManager {
        &self.cloud
    }

    pub fn cloud_mut(&mut self) -> &mut CloudManager {
        &mut self.cloud
    }

    /// Execute everything queued so far.  Returns how many messages ran.
    pub fn run_once(&mut self) -> usize {
        let mut n = 0;
        while let Ok(msg) = self.queue.try_receive() {
            self.handle(msg);
            n += 1;
        }
        n
    }

    pub fn handle(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::StartCloud => self.start_cloud(),
            ControlMsg::StopCloud => self.cloud.stop(),
            ControlMsg::PollCommands => {
                if let Err(e) = self.cloud.poll_commands() {
                    warn!("Runtime: command poll failed: {}", e);
                }
            }
            ControlMsg::CheckTokenRefresh => {
                if let Err(e) = self.cloud.check_token_refresh() {
                    warn!("Runtime: token check failed: {}", e);
                }
            }
            ControlMsg::SendTelemetry => {
                let readings = self.measurements.collect();
                if let Err(e) = self.cloud.send_telemetry(&readings) {
                    warn!("Runtime: telemetry failed: {}", e);
                }
            }
            ControlMsg::Reboot => {
                info!("Runtime: rebooting");
                self.cloud.stop();
                self.system.restart();
            }
            ControlMsg::FactoryReset => {
                warn!("Runtime: factory reset");
                if let Err(e) = self.cloud.factory_reset() {
                    warn!("Runtime: cloud reset incomplete: {}", e);
                }
                self.system.factory_erase();
                self.system.restart();
            }
        }
    }

    fn start_cloud(&mut self) {
        match self.cloud.state() {
            SessionState::NoCredentials => {
                info!("Runtime: link up, device not provisioned for cloud");
                return;
            }
            SessionState::Authenticated => return,
            _ => {}
        }
        match self.cloud.start() {
            Ok(()) => {
                if !self.cloud.send_device_info(self.app_name, self.app_version) {
                    warn!("Runtime: device info not sent");
                }
            }
            Err(CloudError::DeviceRevoked) => warn!("Runtime: cloud disabled, device revoked"),
            Err(e) => warn!("Runtime: cloud start failed: {}", e),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
