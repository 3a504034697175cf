//! Chip-level actions and the telemetry inbox.
//!
//! - [`EspSystem`] / [`SimSystem`] implement [`SystemPort`]: restart and
//!   factory erase.
//! - [`ReadingInbox`] implements [`MeasurementSource`]; sensor code pushes
//!   readings and the runtime drains them at each upload.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::warn;

use crate::app::ports::MeasurementSource;
use crate::cloud::telemetry::{MAX_BATCH_SIZE, Measurement};

#[cfg(target_os = "espidf")]
pub use esp::EspSystem;
#[cfg(not(target_os = "espidf"))]
pub use sim::SimSystem;

// ───────────────────────────────────────────────────────────────
// Reading inbox
// ───────────────────────────────────────────────────────────────

/// Shared, bounded buffer of pending readings.  Clones share storage.
#[derive(Clone, Default)]
pub struct ReadingInbox {
    pending: Arc<Mutex<Vec<Measurement>>>,
}

impl ReadingInbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Measurement>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a reading.  Past one batch the oldest reading is dropped.
    pub fn push(&self, reading: Measurement) {
        let mut pending = self.lock();
        if pending.len() >= MAX_BATCH_SIZE {
            warn!("Inbox: full, dropping oldest reading");
            pending.remove(0);
        }
        pending.push(reading);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl MeasurementSource for ReadingInbox {
    fn collect(&mut self) -> Vec<Measurement> {
        core::mem::take(&mut *self.lock())
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod esp {
    use esp_idf_svc::sys::{ESP_OK, esp_restart, nvs_flash_erase, nvs_flash_init};
    use log::{error, warn};

    use crate::app::ports::SystemPort;

    #[derive(Debug, Default)]
    pub struct EspSystem;

    impl EspSystem {
        pub fn new() -> Self {
            Self
        }
    }

    impl SystemPort for EspSystem {
        fn restart(&mut self) {
            warn!("System: restarting");
            // SAFETY: never returns; no Rust state needs unwinding.
            unsafe { esp_restart() };
        }

        fn factory_erase(&mut self) {
            warn!("System: erasing NVS partition");
            // SAFETY: called from the main task; no NVS handles are open
            // across this call.
            let ret = unsafe { nvs_flash_erase() };
            if ret != ESP_OK {
                error!("System: nvs_flash_erase failed ({})", ret);
                return;
            }
            if unsafe { nvs_flash_init() } != ESP_OK {
                error!("System: nvs_flash_init after erase failed");
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
mod sim {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use log::warn;

    use crate::adapters::nvs::NvsAdapter;
    use crate::app::ports::SystemPort;

    /// Counts restarts; a factory erase wipes the shared store.
    #[derive(Clone)]
    pub struct SimSystem {
        store: NvsAdapter,
        restarts: Arc<AtomicU32>,
        erases: Arc<AtomicU32>,
    }

    impl SimSystem {
        pub fn new(store: NvsAdapter) -> Self {
            Self {
                store,
                restarts: Arc::new(AtomicU32::new(0)),
                erases: Arc::new(AtomicU32::new(0)),
            }
        }

        pub fn restarts(&self) -> u32 {
            self.restarts.load(Ordering::SeqCst)
        }

        pub fn erases(&self) -> u32 {
            self.erases.load(Ordering::SeqCst)
        }
    }

    impl SystemPort for SimSystem {
        fn restart(&mut self) {
            warn!("System(sim): restart requested");
            self.restarts.fetch_add(1, Ordering::SeqCst);
        }

        fn factory_erase(&mut self) {
            warn!("System(sim): erasing store");
            self.store.erase_all();
            self.erases.fetch_add(1, Ordering::SeqCst);
        }
    }
}
