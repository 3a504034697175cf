//! Timer service adapter.
//!
//! Implements [`TimerPort`].
//!
//! - **`target_os = "espidf"`**: [`EspTimers`] on the ESP-IDF task timer
//!   service (`esp_timer` dispatch task).  The service keeps each
//!   `EspTimer` alive until its handle is cancelled or the one-shot fires;
//!   cancelling drops the `EspTimer`, which stops it at once.
//! - **all other targets**: [`ThreadTimers`], one sleeping thread per
//!   timer.  Good enough for the host simulation; tests use
//!   [`ManualTimers`](crate::sim::ManualTimers) instead.
//!
//! Both share the handle's `cancelled` flag with the callback and check it
//! right before firing.

#[cfg(target_os = "espidf")]
pub use esp::EspTimers;

#[cfg(not(target_os = "espidf"))]
pub use host::ThreadTimers;

#[cfg(not(target_os = "espidf"))]
mod host {
    use core::time::Duration;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use crate::app::ports::{OnceCallback, PeriodicCallback, TimerError, TimerHandle, TimerPort};

    #[derive(Debug, Default, Clone, Copy)]
    pub struct ThreadTimers;

    impl ThreadTimers {
        pub fn new() -> Self {
            Self
        }
    }

    fn spawn(f: impl FnOnce() + Send + 'static) -> Result<(), TimerError> {
        thread::Builder::new()
            .name("timer".into())
            .spawn(f)
            .map(|_| ())
            .map_err(|_| TimerError::NoMemory)
    }

    impl TimerPort for ThreadTimers {
        fn once(&self, delay: Duration, callback: OnceCallback) -> Result<TimerHandle, TimerError> {
            let cancelled = Arc::new(AtomicBool::new(false));
            let flag = cancelled.clone();
            spawn(move || {
                thread::sleep(delay);
                if !flag.load(Ordering::Acquire) {
                    callback();
                }
            })?;
            Ok(TimerHandle::new(cancelled))
        }

        fn periodic(
            &self,
            period: Duration,
            mut callback: PeriodicCallback,
        ) -> Result<TimerHandle, TimerError> {
            let cancelled = Arc::new(AtomicBool::new(false));
            let flag = cancelled.clone();
            spawn(move || {
                loop {
                    thread::sleep(period);
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    callback();
                }
            })?;
            Ok(TimerHandle::new(cancelled))
        }
    }
}

#[cfg(target_os = "espidf")]
mod esp {
    use core::time::Duration;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    use esp_idf_svc::timer::{EspTaskTimerService, EspTimer};
    use log::warn;

    use crate::app::ports::{OnceCallback, PeriodicCallback, TimerError, TimerHandle, TimerPort};

    struct Live {
        id: u32,
        fired: Arc<AtomicBool>,
        _timer: EspTimer<'static>,
    }

    type LiveSet = Arc<Mutex<Vec<Live>>>;

    fn lock(live: &LiveSet) -> MutexGuard<'_, Vec<Live>> {
        live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub struct EspTimers {
        service: EspTaskTimerService,
        live: LiveSet,
        next_id: AtomicU32,
    }

    impl EspTimers {
        pub fn new(service: EspTaskTimerService) -> Self {
            Self {
                service,
                live: Arc::new(Mutex::new(Vec::new())),
                next_id: AtomicU32::new(0),
            }
        }

        /// Keep `timer` alive until its handle is cancelled or, for a
        /// one-shot, until it has fired.  Dropping an `EspTimer` stops it,
        /// so the stop hook removes the entry on cancel.
        fn keep(&self, timer: EspTimer<'static>, fired: Arc<AtomicBool>, cancelled: Arc<AtomicBool>) -> TimerHandle {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            {
                let mut all = lock(&self.live);
                all.retain(|l| !l.fired.load(Ordering::Acquire));
                all.push(Live { id, fired, _timer: timer });
            }
            let live = self.live.clone();
            TimerHandle::with_stop(cancelled, move || {
                // Drop outside the lock; the dispatch task may be waiting on it.
                let gone = {
                    let mut all = lock(&live);
                    all.iter().position(|l| l.id == id).map(|i| all.swap_remove(i))
                };
                drop(gone);
            })
        }
    }

    fn platform(e: esp_idf_svc::sys::EspError) -> TimerError {
        warn!("Timer: esp_timer error {}", e);
        if e.code() == esp_idf_svc::sys::ESP_ERR_NO_MEM as i32 {
            TimerError::NoMemory
        } else {
            TimerError::Platform(e.code())
        }
    }

    impl TimerPort for EspTimers {
        fn once(&self, delay: Duration, callback: OnceCallback) -> Result<TimerHandle, TimerError> {
            let cancelled = Arc::new(AtomicBool::new(false));
            let fired = Arc::new(AtomicBool::new(false));
            let (c, f) = (cancelled.clone(), fired.clone());
            let mut slot = Some(callback);
            let timer = self
                .service
                .timer(move || {
                    f.store(true, Ordering::Release);
                    if c.load(Ordering::Acquire) {
                        return;
                    }
                    if let Some(cb) = slot.take() {
                        cb();
                    }
                })
                .map_err(platform)?;
            timer.after(delay).map_err(platform)?;
            Ok(self.keep(timer, fired, cancelled))
        }

        fn periodic(
            &self,
            period: Duration,
            mut callback: PeriodicCallback,
        ) -> Result<TimerHandle, TimerError> {
            let cancelled = Arc::new(AtomicBool::new(false));
            let c = cancelled.clone();
            let timer = self
                .service
                .timer(move || {
                    if !c.load(Ordering::Acquire) {
                        callback();
                    }
                })
                .map_err(platform)?;
            timer.every(period).map_err(platform)?;
            Ok(self.keep(timer, Arc::new(AtomicBool::new(false)), cancelled))
        }
    }
}
