//! In-process publish/subscribe.
//!
//! Events are produced by:
//! - the ConnectionManager (link up/down, provisioning progress)
//! - the CloudManager (auth outcome, commands, telemetry)
//!
//! and consumed by subscribers that only record intent, typically by
//! `try_send`ing a [`ControlMsg`](crate::app::commands::ControlMsg) to the
//! main loop.
//!
//! ```text
//! ┌──────────────────┐     ┌───────────────┐     ┌──────────────┐
//! │ ConnectionManager│────▶│               │────▶│ subscriber   │──try_send──▶ main loop
//! │ CloudManager     │────▶│ LocalEventBus │────▶│ subscriber   │
//! └──────────────────┘     └───────────────┘     └──────────────┘
//! ```
//!
//! Delivery is synchronous on the publishing context.  Handlers run with
//! the subscriber list unlocked, so a handler may subscribe or drop a
//! [`Subscription`] without deadlocking; it must not publish on the same
//! bus.

use std::sync::{Arc, Mutex, PoisonError};

use log::warn;

use crate::app::ports::{EventBus, EventHandler, Subscription};

/// Upper bound on live subscribers per bus.
pub const MAX_SUBSCRIBERS: usize = 16;

struct Slot<E> {
    id: u64,
    handler: Arc<EventHandler<E>>,
}

struct Inner<E> {
    next_id: u64,
    slots: Vec<Slot<E>>,
}

pub struct LocalEventBus<E> {
    inner: Arc<Mutex<Inner<E>>>,
}

impl<E> Default for LocalEventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> LocalEventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                slots: Vec::new(),
            })),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }
}

impl<E: Send + 'static> EventBus<E> for LocalEventBus<E> {
    fn publish(&self, event: E) {
        // Snapshot so handlers run without the lock held.
        let handlers: Vec<Arc<EventHandler<E>>> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .iter()
            .map(|s| s.handler.clone())
            .collect();
        for handler in handlers {
            handler(&event);
        }
    }

    fn subscribe(&self, handler: EventHandler<E>) -> Subscription {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.slots.len() >= MAX_SUBSCRIBERS {
            warn!("Event bus full ({} subscribers), handler not registered", MAX_SUBSCRIBERS);
            return Subscription::new(|| {});
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.slots.push(Slot {
            id,
            handler: Arc::new(handler),
        });

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .slots
                    .retain(|s| s.id != id);
            }
        })
    }
}

// ── Tests ────────────────────────────────────────────────────
