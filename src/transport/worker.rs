//! Asynchronous I/O worker.
//!
//! A dedicated thread that drains a bounded job queue one job at a time.
//! Producers (`submit`) never block: a full queue is reported back as
//! [`TransportError::NoMemory`].  The queue is an `embassy-sync` channel, so
//! the worker sleeps inside `receive().await` until a producer wakes it.
//!
//! ```text
//!   send_async ──try_send──▶ ┌───────────────┐
//!   (any context)            │ Channel<Job>  │──receive().await──▶ worker thread
//!                            └───────────────┘                     (one job at a time)
//! ```

use std::sync::Arc;
use std::thread::JoinHandle;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};

use super::TransportError;

/// Jobs that can be queued before `submit` starts failing.
pub const QUEUE_DEPTH: usize = 8;

/// Worker thread stack.  HTTP + TLS on ESP-IDF needs the headroom.
pub const STACK_KB: usize = 8;

enum Message<J> {
    Job(J),
    Stop,
}

type Queue<J> = Channel<CriticalSectionRawMutex, Message<J>, QUEUE_DEPTH>;

pub struct AsyncWorker<J: Send + 'static> {
    queue: Arc<Queue<J>>,
    thread: Option<JoinHandle<()>>,
    name: &'static str,
}

impl<J: Send + 'static> AsyncWorker<J> {
    /// Spawn the worker.  `handler` runs on the worker thread for every
    /// submitted job, in submission order.
    pub fn spawn(
        name: &'static str,
        mut handler: impl FnMut(J) + Send + 'static,
    ) -> Result<Self, TransportError> {
        let queue: Arc<Queue<J>> = Arc::new(Channel::new());
        let rx = queue.clone();
        let thread = spawn_pinned(name, STACK_KB, move || {
            futures_lite::future::block_on(async move {
                loop {
                    match rx.receive().await {
                        Message::Job(job) => handler(job),
                        Message::Stop => break,
                    }
                }
            });
        })
        .map_err(|_| TransportError::NoMemory)?;

        info!("Worker '{}' started (queue depth {})", name, QUEUE_DEPTH);
        Ok(Self {
            queue,
            thread: Some(thread),
            name,
        })
    }

    pub fn submit(&self, job: J) -> Result<(), TransportError> {
        self.queue.try_send(Message::Job(job)).map_err(|_| {
            warn!("Worker '{}': queue full, rejecting job", self.name);
            TransportError::NoMemory
        })
    }
}

impl<J: Send + 'static> Drop for AsyncWorker<J> {
    fn drop(&mut self) {
        // Waits for queued jobs ahead of the stop marker.
        futures_lite::future::block_on(self.queue.send(Message::Stop));
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Worker '{}' panicked", self.name);
            }
        }
        info!("Worker '{}' stopped", self.name);
    }
}

// ── Thread spawn ─────────────────────────────────────────────

/// Spawn a thread pinned to Core 0 (PRO_CPU), next to the WiFi and lwIP
/// tasks it talks to.
#[cfg(target_os = "espidf")]
fn spawn_pinned(
    name: &'static str,
    stack_kb: usize,
    f: impl FnOnce() + Send + 'static,
) -> std::io::Result<JoinHandle<()>> {
    // SAFETY: esp_pthread_set_cfg only affects the next pthread_create on
    // this thread, which is the spawn immediately below.
    unsafe {
        let mut cfg = esp_idf_svc::sys::esp_create_default_pthread_config();
        cfg.pin_to_core = 0;
        cfg.stack_size = (stack_kb * 1024) as _;
        let ret = esp_idf_svc::sys::esp_pthread_set_cfg(&cfg);
        if ret != esp_idf_svc::sys::ESP_OK as i32 {
            warn!("Worker '{}': esp_pthread_set_cfg failed (rc={})", name, ret);
        }
    }
    std::thread::Builder::new().name(name.into()).spawn(f)
}

/// Simulation fallback, no core pinning.
#[cfg(not(target_os = "espidf"))]
fn spawn_pinned(
    name: &'static str,
    stack_kb: usize,
    f: impl FnOnce() + Send + 'static,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.into())
        .stack_size(stack_kb.max(64) * 1024)
        .spawn(f)
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn jobs_run_in_order() {
        let (tx, rx) = mpsc::channel();
        let worker = AsyncWorker::spawn("test-worker", move |n: u32| {
            tx.send(n).unwrap();
        })
        .unwrap();
        for n in 0..5 {
            worker.submit(n).unwrap();
        }
        let got: Vec<u32> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn full_queue_rejects() {
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock().unwrap();
        let g = gate.clone();
        let (started_tx, started_rx) = mpsc::channel();
        let worker = AsyncWorker::spawn("test-full", move |_: u32| {
            let _ = started_tx.send(());
            let _guard = g.lock().unwrap();
        })
        .unwrap();

        // First job occupies the worker; the queue then fills up.
        worker.submit(0).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        for n in 0..QUEUE_DEPTH as u32 {
            worker.submit(n).unwrap();
        }
        assert_eq!(worker.submit(99), Err(TransportError::NoMemory));
        drop(held);
    }

    #[test]
    fn drop_drains_and_joins() {
        let (tx, rx) = mpsc::channel();
        {
            let worker = AsyncWorker::spawn("test-drop", move |n: u32| {
                tx.send(n).unwrap();
            })
            .unwrap();
            worker.submit(7).unwrap();
        }
        assert_eq!(rx.try_recv(), Ok(7));
    }
}
