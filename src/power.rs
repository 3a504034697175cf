//! Wake-reason query and deep sleep.
//!
//! Deep sleep wipes RAM except the RTC region that holds the
//! [`survivable`](crate::survivable) token.  A timer wake may reuse that
//! token; a power-on boot finds it zeroed and re-authenticates.

use core::fmt;
use core::time::Duration;

use log::info;

/// Longest sleep accepted by [`deep_sleep`].
pub const MAX_SLEEP: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Cold boot or reset.
    PowerOn,
    Timer,
    Gpio,
    Other,
}

impl fmt::Display for WakeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PowerOn => "power-on/reset",
            Self::Timer => "timer",
            Self::Gpio => "GPIO",
            Self::Other => "other",
        })
    }
}

/// `true` when this boot came out of deep sleep rather than power-on.
pub fn woke_from_deep_sleep() -> bool {
    wake_reason() != WakeReason::PowerOn
}

/// Clamp a requested interval to `1 s ..= MAX_SLEEP`.
pub fn sleep_interval(requested: Duration) -> Duration {
    requested.clamp(Duration::from_secs(1), MAX_SLEEP)
}

#[cfg(target_os = "espidf")]
pub fn wake_reason() -> WakeReason {
    use esp_idf_sys as sys;

    #[allow(non_upper_case_globals)]
    match unsafe { sys::esp_sleep_get_wakeup_cause() } {
        sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => WakeReason::Timer,
        sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_GPIO => WakeReason::Gpio,
        sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_UNDEFINED => WakeReason::PowerOn,
        _ => WakeReason::Other,
    }
}

/// Arm the RTC timer and enter deep sleep.  Does not return: the chip
/// resets on wake.
#[cfg(target_os = "espidf")]
pub fn deep_sleep(duration: Duration) -> ! {
    use esp_idf_sys as sys;

    let interval = sleep_interval(duration);
    info!("Power: deep sleep for {}s", interval.as_secs());
    unsafe {
        sys::esp_sleep_enable_timer_wakeup(interval.as_micros() as u64);
        sys::esp_deep_sleep_start()
    }
}

/// The host never sleeps, so every start is a cold boot.
#[cfg(not(target_os = "espidf"))]
pub fn wake_reason() -> WakeReason {
    WakeReason::PowerOn
}

/// Host stand-in: waits out the interval and exits, which is the closest
/// analogue of a reset.
#[cfg(not(target_os = "espidf"))]
pub fn deep_sleep(duration: Duration) -> ! {
    let interval = sleep_interval(duration);
    info!("Power: deep sleep for {}s (host: exiting)", interval.as_secs());
    std::thread::sleep(interval);
    std::process::exit(0)
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn host_boot_is_cold() {
        assert_eq!(wake_reason(), WakeReason::PowerOn);
        assert!(!woke_from_deep_sleep());
    }

    #[test]
    fn interval_is_clamped() {
        assert_eq!(sleep_interval(Duration::ZERO), Duration::from_secs(1));
        assert_eq!(sleep_interval(Duration::from_secs(90)), Duration::from_secs(90));
        assert_eq!(sleep_interval(Duration::from_secs(100_000)), MAX_SLEEP);
    }
}
