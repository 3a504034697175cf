//! Deferred control messages.
//!
//! Event subscribers and timer callbacks never do network work
//! themselves.  They `try_send` a [`ControlMsg`] onto the bounded control
//! channel and the [`Runtime`](super::runtime::Runtime) executes it on the
//! main control context.

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

/// Control channel depth.
pub const CONTROL_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMsg {
    /// Link is up: bring up the cloud session.
    StartCloud,
    /// Link is down: stop timers and the transport.
    StopCloud,
    PollCommands,
    CheckTokenRefresh,
    SendTelemetry,
    Reboot,
    FactoryReset,
}

pub type ControlChannel = Channel<CriticalSectionRawMutex, ControlMsg, CONTROL_DEPTH>;

/// Shared sender/receiver handle.
pub type ControlQueue = Arc<ControlChannel>;

pub fn control_queue() -> ControlQueue {
    Arc::new(Channel::new())
}

/// Non-blocking post.  A full queue drops the message.
pub fn post(queue: &ControlChannel, msg: ControlMsg) -> bool {
    if queue.try_send(msg).is_err() {
        warn!("Control: queue full, dropped {:?}", msg);
        return false;
    }
    true
}
