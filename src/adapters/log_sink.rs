//! Log-based event sink adapter.
//!
//! Subscribes to the network and cloud buses and writes every event to the
//! ESP-IDF logger (UART / USB-CDC in production).  Keep the returned
//! [`Subscription`]s alive for as long as logging is wanted.

use log::{info, warn};

use crate::app::events::{CloudEvent, NetworkEvent};
use crate::app::ports::{EventBus, Subscription};

pub fn log_network_event(event: &NetworkEvent) {
    match event {
        NetworkEvent::Connected(i) => {
            info!(
                "NET   | up ip={} gw={} rssi={}dBm ch={}",
                i.ip, i.gateway, i.rssi, i.channel
            );
        }
        NetworkEvent::Disconnected => info!("NET   | down"),
        NetworkEvent::ConnectionFailed => warn!("NET   | reconnect budget exhausted"),
        NetworkEvent::ProvisioningStarted => info!("PROV  | started"),
        NetworkEvent::ProvisioningComplete => info!("PROV  | complete"),
        NetworkEvent::ProvisioningFailed => warn!("PROV  | failed"),
        NetworkEvent::ProvisioningTimeout => warn!("PROV  | timed out"),
        NetworkEvent::CredentialsReceived => info!("PROV  | credentials stored"),
    }
}

pub fn log_cloud_event(event: &CloudEvent) {
    match event {
        CloudEvent::Authenticated => info!("CLOUD | authenticated"),
        CloudEvent::AuthFailed => warn!("CLOUD | authentication failed"),
        CloudEvent::TokenRefreshed => info!("CLOUD | token refreshed"),
        CloudEvent::Revoked => warn!("CLOUD | device revoked"),
        CloudEvent::RebootRequested => info!("CLOUD | reboot requested"),
        CloudEvent::FactoryResetRequested => warn!("CLOUD | factory reset requested"),
        CloudEvent::TelemetrySent => info!("CLOUD | telemetry sent"),
        CloudEvent::TelemetryFailed => warn!("CLOUD | telemetry failed"),
        CloudEvent::CommandReceived(t) => info!("CMD   | received {:?}", t),
        CloudEvent::CommandProcessed(t) => info!("CMD   | processed {:?}", t),
    }
}

/// Attach the console logger to both buses.
pub fn attach(
    network: &dyn EventBus<NetworkEvent>,
    cloud: &dyn EventBus<CloudEvent>,
) -> (Subscription, Subscription) {
    (
        network.subscribe(Box::new(log_network_event)),
        cloud.subscribe(Box::new(log_cloud_event)),
    )
}
