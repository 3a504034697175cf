//! Command dispatch.
//!
//! Registered handlers are tried first; `reboot` and `factory_reset` fall
//! back to built-ins that only publish a [`CloudEvent`].  The disruptive
//! action itself runs later on the main loop, never inside the poll.
//!
//! Every polled command is acknowledged exactly once, whatever its handler
//! returned: an ack means "received", not "succeeded".

use std::sync::Arc;

use log::{info, warn};

use super::commands::{Acknowledge, Command, CommandType, MAX_CUSTOM_TYPES};
use crate::app::events::CloudEvent;
use crate::app::ports::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Success,
    Failed,
    Unknown,
    InvalidPayload,
}

/// Receives the raw JSON payload of a command.
pub type CommandHandler = Box<dyn Fn(&str) -> CommandResult + Send + Sync + 'static>;

pub struct CommandDispatcher {
    handlers: heapless::Vec<(CommandType, CommandHandler), MAX_CUSTOM_TYPES>,
    events: Arc<dyn EventBus<CloudEvent>>,
}

impl CommandDispatcher {
    pub fn new(events: Arc<dyn EventBus<CloudEvent>>) -> Self {
        Self {
            handlers: heapless::Vec::new(),
            events,
        }
    }

    /// `false` when the table is full.
    pub fn register(&mut self, kind: CommandType, handler: CommandHandler) -> bool {
        if self.handlers.push((kind, handler)).is_err() {
            warn!("Dispatch: handler table full, {:?} not registered", kind);
            return false;
        }
        true
    }

    pub fn process(&self, cmd: &Command) -> CommandResult {
        info!("Dispatch: {:?} id={}", cmd.kind, cmd.id);
        if let Some((_, h)) = self.handlers.iter().find(|(k, _)| *k == cmd.kind) {
            return h(cmd.payload.as_str());
        }
        match cmd.kind {
            CommandType::Reboot => {
                self.events.publish(CloudEvent::RebootRequested);
                CommandResult::Success
            }
            CommandType::FactoryReset => {
                warn!("Dispatch: factory reset requested");
                self.events.publish(CloudEvent::FactoryResetRequested);
                CommandResult::Success
            }
            _ => {
                warn!("Dispatch: no handler for {:?}", cmd.kind);
                CommandResult::Unknown
            }
        }
    }

    /// Run and ack every command.  Returns how many handlers succeeded.
    pub fn process_all(&self, acker: &dyn Acknowledge, commands: &[Command], now_ms: i64) -> usize {
        let mut ok = 0;
        for cmd in commands {
            self.events.publish(CloudEvent::CommandReceived(cmd.kind));
            let result = if cmd.is_expired(now_ms) {
                warn!("Dispatch: {} expired, not executed", cmd.id);
                CommandResult::Failed
            } else {
                self.process(cmd)
            };

            if let Err(e) = acker.ack(&cmd.id) {
                warn!("Dispatch: ack for {} failed: {}", cmd.id, e);
            }

            if result == CommandResult::Success {
                ok += 1;
                self.events.publish(CloudEvent::CommandProcessed(cmd.kind));
            } else {
                warn!("Dispatch: {} finished with {:?}", cmd.id, result);
            }
        }
        ok
    }
}
