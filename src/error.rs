//! Crate-wide error type.
//!
//! Each layer keeps its own narrow enum; [`Error`] wraps them all so a
//! caller that spans layers can use `?` throughout.  Every variant is
//! `Copy`.

use core::fmt;

use crate::app::ports::{ConfigError, LinkError, StorageError, TimerError};
use crate::cloud::auth::AuthError;
use crate::cloud::client::CloudError;
use crate::cloud::commands::CommandError;
use crate::net::types::ConnectionError;
use crate::survivable::SurvivableError;
use crate::transport::TransportError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Wireless link management.
    Connection(ConnectionError),
    /// Radio driver.
    Link(LinkError),
    /// Request/response transport.
    Transport(TransportError),
    /// Backend session token.
    Auth(AuthError),
    /// Authenticated backend request.
    Cloud(CloudError),
    /// Command polling or acknowledgement.
    Command(CommandError),
    /// Persistent key-value store.
    Storage(StorageError),
    /// Configuration load or validation.
    Config(ConfigError),
    /// Timer service.
    Timer(TimerError),
    /// Sleep-survivable memory.
    Survivable(SurvivableError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "connection: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Auth(e) => write!(f, "auth: {e}"),
            Self::Cloud(e) => write!(f, "cloud: {e}"),
            Self::Command(e) => write!(f, "command: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Timer(e) => write!(f, "timer: {e}"),
            Self::Survivable(e) => write!(f, "survivable: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

macro_rules! from_layer {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(e: $ty) -> Self {
                    Self::$variant(e)
                }
            }
        )*
    };
}

from_layer!(
    Connection(ConnectionError),
    Link(LinkError),
    Transport(TransportError),
    Auth(AuthError),
    Cloud(CloudError),
    Command(CommandError),
    Storage(StorageError),
    Config(ConfigError),
    Timer(TimerError),
    Survivable(SurvivableError),
);

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, Error>;
