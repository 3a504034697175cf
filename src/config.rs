//! Connectivity configuration parameters
//!
//! All tunable parameters for the link, the retry ladder, the backend
//! session and the periodic cloud work.
//! Values can be overridden via NVS (see [`ConfigPort`](crate::app::ports::ConfigPort)).

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
pub use crate::transport::retry::RetryPolicy;

/// Maximum length of the backend base URL.
pub const BASE_URL_MAX_LEN: usize = 128;

/// Wireless link reconnect behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiConfig {
    /// Reconnect attempts before giving up (0 = unlimited).
    pub max_retries: u32,
    /// First reconnect delay (milliseconds)
    pub initial_delay_ms: u32,
    /// Reconnect delay ceiling (milliseconds)
    pub max_delay_ms: u32,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
        }
    }
}

impl WifiConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.initial_delay_ms))
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.max_delay_ms))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay_ms == 0 {
            return Err(ConfigError::ValidationFailed("wifi.initial_delay_ms must be > 0"));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ConfigError::ValidationFailed(
                "wifi.initial_delay_ms must be <= wifi.max_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Backend session (token) behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Refresh this many seconds before the token expires.
    pub refresh_buffer_secs: u32,
    /// Full credential exchanges allowed in a burst.
    pub rate_limit_burst: u32,
    /// Token lifetime assumed when the server omits `expires_in`.
    pub default_expires_in_secs: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_buffer_secs: 300,
            rate_limit_burst: 10,
            default_expires_in_secs: 3600,
        }
    }
}

impl AuthConfig {
    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(u64::from(self.refresh_buffer_secs))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_burst == 0 {
            return Err(ConfigError::ValidationFailed("auth.rate_limit_burst must be > 0"));
        }
        if self.default_expires_in_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "auth.default_expires_in_secs must be > 0",
            ));
        }
        Ok(())
    }
}

/// Backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Scheme + host, e.g. `https://api.example.com`.
    pub base_url: heapless::String<BASE_URL_MAX_LEN>,
    /// Per-request budget (seconds)
    pub request_timeout_secs: u32,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: heapless::String::new(),
            request_timeout_secs: 30,
        }
    }
}

impl CloudConfig {
    pub fn with_base_url(url: &str) -> Result<Self, ConfigError> {
        let mut base_url = heapless::String::new();
        base_url
            .push_str(url)
            .map_err(|_| ConfigError::ValidationFailed("cloud.base_url too long"))?;
        Ok(Self {
            base_url,
            ..Self::default()
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.request_timeout_secs))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.is_empty()
            && !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://"))
        {
            return Err(ConfigError::ValidationFailed(
                "cloud.base_url must start with http:// or https://",
            ));
        }
        if !(1..=120).contains(&self.request_timeout_secs) {
            return Err(ConfigError::ValidationFailed(
                "cloud.request_timeout_secs must be 1–120",
            ));
        }
        Ok(())
    }
}

/// Cadence of the periodic cloud work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Telemetry upload interval (seconds, 0 = disabled)
    pub telemetry_interval_secs: u32,
    /// Command poll interval (seconds, 0 = disabled)
    pub command_poll_interval_secs: u32,
    /// Token refresh check interval (seconds, 0 = disabled)
    pub token_check_interval_secs: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            telemetry_interval_secs: 300,
            command_poll_interval_secs: 60,
            token_check_interval_secs: 60,
        }
    }
}

impl SessionConfig {
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.telemetry_interval_secs))
    }

    pub fn command_poll_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.command_poll_interval_secs))
    }

    pub fn token_check_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.token_check_interval_secs))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // A one-second cadence is already far beyond what the backend expects.
        for (secs, msg) in [
            (self.telemetry_interval_secs, "session.telemetry_interval_secs must be 0 or >= 10"),
            (self.command_poll_interval_secs, "session.command_poll_interval_secs must be 0 or >= 10"),
            (self.token_check_interval_secs, "session.token_check_interval_secs must be 0 or >= 10"),
        ] {
            if secs != 0 && secs < 10 {
                return Err(ConfigError::ValidationFailed(msg));
            }
        }
        Ok(())
    }
}

/// Everything persisted as one blob.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub wifi: WifiConfig,
    pub retry: RetryPolicy,
    pub auth: AuthConfig,
    pub cloud: CloudConfig,
    pub session: SessionConfig,
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.wifi.validate()?;
        self.retry.validate()?;
        self.auth.validate()?;
        self.cloud.validate()?;
        self.session.validate()
    }
}
