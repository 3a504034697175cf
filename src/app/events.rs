//! Outbound connectivity and session events.
//!
//! The [`ConnectionManager`](crate::net::connection::ConnectionManager)
//! publishes [`NetworkEvent`]s and the
//! [`CloudManager`](crate::cloud::manager::CloudManager) publishes
//! [`CloudEvent`]s through the [`EventBus`](super::ports::EventBus) port.
//! Subscribers decide what to do with them: log, light an LED, or hand
//! work to the main loop.

use crate::cloud::commands::CommandType;
use crate::net::types::ConnectionInfo;

/// Wireless link lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// Address acquired; carries the fresh link parameters.
    Connected(ConnectionInfo),
    Disconnected,
    /// Reconnect budget exhausted.
    ConnectionFailed,
    ProvisioningStarted,
    ProvisioningComplete,
    ProvisioningFailed,
    ProvisioningTimeout,
    /// New credentials arrived over the pairing channel and were stored.
    CredentialsReceived,
}

/// Backend session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudEvent {
    Authenticated,
    AuthFailed,
    TokenRefreshed,
    /// Terminal until a factory reset clears the identity.
    Revoked,
    RebootRequested,
    FactoryResetRequested,
    TelemetrySent,
    TelemetryFailed,
    CommandReceived(CommandType),
    CommandProcessed(CommandType),
}
