//! Wall clock and blocking delay for the session and retry logic.
//!
//! On ESP32 the time comes from `gettimeofday()`, which SNTP sets and the
//! RTC carries across deep sleep, so token expiry survives a wake. On host
//! it is `SystemTime`.

use core::time::Duration;

use crate::app::ports::ClockPort;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl ClockPort for SystemClock {
    #[cfg(target_os = "espidf")]
    fn now_ms(&self) -> i64 {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        // SAFETY: `tv` outlives the call and the timezone pointer may be null.
        match unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } {
            0 => tv.tv_sec as i64 * 1_000 + i64::from(tv.tv_usec) / 1_000,
            _ => 0,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn now_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as i64)
    }

    /// Blocks the calling task.
    fn sleep(&self, duration: Duration) {
        #[cfg(target_os = "espidf")]
        esp_idf_svc::hal::delay::FreeRtos::delay_ms(duration.as_millis().min(u128::from(u32::MAX)) as u32);
        #[cfg(not(target_os = "espidf"))]
        std::thread::sleep(duration);
    }
}
