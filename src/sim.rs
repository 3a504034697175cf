//! Deterministic host-side stand-ins for the clock and timer service.
//!
//! Both run on virtual time: nothing sleeps and nothing fires until a test
//! (or the host simulation loop) moves time forward explicitly.

use core::time::Duration;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::app::ports::{
    ClockPort, OnceCallback, PeriodicCallback, TimerError, TimerHandle, TimerPort,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ───────────────────────────────────────────────────────────────
// ManualClock
// ───────────────────────────────────────────────────────────────

/// Wall clock that only moves when told to.  `sleep` advances it and
/// records the requested duration.
pub struct ManualClock {
    now_ms: AtomicI64,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

impl ClockPort for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
        self.advance(duration);
    }
}

// ───────────────────────────────────────────────────────────────
// ManualTimers
// ───────────────────────────────────────────────────────────────

enum Callback {
    Once(OnceCallback),
    Periodic(PeriodicCallback),
}

struct Entry {
    id: u64,
    due: Duration,
    period: Option<Duration>,
    cancelled: Arc<AtomicBool>,
    callback: Callback,
}

#[derive(Default)]
struct Queue {
    now: Duration,
    next_id: u64,
    created: usize,
    entries: Vec<Entry>,
    fail_next: bool,
}

/// Virtual-time timer service.
///
/// Callbacks fire from inside [`advance`](Self::advance) on the caller's
/// thread, in due-time order (ties in creation order).  The queue lock is
/// released while a callback runs, so callbacks may schedule new timers.
#[derive(Default)]
pub struct ManualTimers {
    queue: Mutex<Queue>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move virtual time forward, firing everything that comes due.
    /// Returns the number of callbacks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = lock(&self.queue).now + by;
        let mut fired = 0;
        while let Some(entry) = self.pop_due(target) {
            self.run(entry);
            fired += 1;
        }
        lock(&self.queue).now = target;
        fired
    }

    /// Jump to the earliest pending timer and fire it alone.
    pub fn fire_next(&self) -> bool {
        let Some(due) = self.next_due() else {
            return false;
        };
        match self.pop_due(due) {
            Some(entry) => {
                self.run(entry);
                true
            }
            None => false,
        }
    }

    /// Live (not cancelled) timers.
    pub fn pending(&self) -> usize {
        lock(&self.queue)
            .entries
            .iter()
            .filter(|e| !e.cancelled.load(Ordering::Acquire))
            .count()
    }

    /// Timers ever scheduled on this service.
    pub fn created(&self) -> usize {
        lock(&self.queue).created
    }

    /// Delay until the earliest live timer, relative to virtual now.
    pub fn next_delay(&self) -> Option<Duration> {
        let q = lock(&self.queue);
        q.entries
            .iter()
            .filter(|e| !e.cancelled.load(Ordering::Acquire))
            .map(|e| e.due.saturating_sub(q.now))
            .min()
    }

    /// Make the next `once`/`periodic` call fail with `NoMemory`.
    pub fn fail_next(&self) {
        lock(&self.queue).fail_next = true;
    }

    fn next_due(&self) -> Option<Duration> {
        lock(&self.queue)
            .entries
            .iter()
            .filter(|e| !e.cancelled.load(Ordering::Acquire))
            .map(|e| e.due)
            .min()
    }

    fn pop_due(&self, target: Duration) -> Option<Entry> {
        let mut q = lock(&self.queue);
        q.entries.retain(|e| !e.cancelled.load(Ordering::Acquire));
        let idx = q
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.due <= target)
            .min_by_key(|(_, e)| (e.due, e.id))
            .map(|(i, _)| i)?;
        let entry = q.entries.remove(idx);
        q.now = q.now.max(entry.due);
        Some(entry)
    }

    fn run(&self, entry: Entry) {
        if entry.cancelled.load(Ordering::Acquire) {
            return;
        }
        match entry.callback {
            Callback::Once(f) => f(),
            Callback::Periodic(mut f) => {
                f();
                if let Some(period) = entry.period {
                    if !entry.cancelled.load(Ordering::Acquire) {
                        lock(&self.queue).entries.push(Entry {
                            id: entry.id,
                            due: entry.due + period,
                            period: entry.period,
                            cancelled: entry.cancelled,
                            callback: Callback::Periodic(f),
                        });
                    }
                }
            }
        }
    }

    fn schedule(
        &self,
        delay: Duration,
        period: Option<Duration>,
        callback: Callback,
    ) -> Result<TimerHandle, TimerError> {
        let mut q = lock(&self.queue);
        if q.fail_next {
            q.fail_next = false;
            return Err(TimerError::NoMemory);
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        let id = q.next_id;
        q.next_id += 1;
        q.created += 1;
        let due = q.now + delay;
        q.entries.push(Entry {
            id,
            due,
            period,
            cancelled: cancelled.clone(),
            callback,
        });
        Ok(TimerHandle::new(cancelled))
    }
}

impl TimerPort for ManualTimers {
    fn once(&self, delay: Duration, callback: OnceCallback) -> Result<TimerHandle, TimerError> {
        self.schedule(delay, None, Callback::Once(callback))
    }

    fn periodic(
        &self,
        period: Duration,
        callback: PeriodicCallback,
    ) -> Result<TimerHandle, TimerError> {
        if period.is_zero() {
            return Err(TimerError::Platform(-1));
        }
        self.schedule(period, Some(period), Callback::Periodic(callback))
    }
}

// ── Tests ────────────────────────────────────────────────────
