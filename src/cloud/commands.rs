//! Remote command polling.
//!
//! `GET /commands?status=pending` returns
//!
//! ```json
//! {"data":[{"id":"…","type":"reboot","payload":{…},"expires_at":0}, …]}
//! ```
//!
//! Only the fields below are read.  Records the device cannot hold (no
//! id, oversized id or payload, beyond [`MAX_COMMANDS`]) are skipped: the
//! server paginates, so the rest arrive on a later poll.

use core::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;

use super::client::{CloudClient, CloudError};
use super::endpoints::{self, status};

/// UUID text form.
pub const COMMAND_ID_MAX_LEN: usize = 36;
pub const COMMAND_PAYLOAD_MAX_LEN: usize = 255;
/// Commands taken from one poll.
pub const MAX_COMMANDS: usize = 8;
/// Custom command names that can be registered.
pub const MAX_CUSTOM_TYPES: usize = 8;
const TYPE_NAME_MAX_LEN: usize = 32;

// ── CommandType ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    Unknown,
    Reboot,
    FactoryReset,
    /// Index into the [`CommandRegistry`].
    Custom(u8),
}

/// Name ↔ [`CommandType`] table.  Built-ins are fixed; custom names are
/// appended by the application.
#[derive(Debug, Default, Clone)]
pub struct CommandRegistry {
    custom: heapless::Vec<heapless::String<TYPE_NAME_MAX_LEN>, MAX_CUSTOM_TYPES>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom name.  Re-registering returns the existing type;
    /// `None` when the table is full, the name is too long or shadows a
    /// built-in.
    pub fn register(&mut self, name: &str) -> Option<CommandType> {
        match self.parse(name) {
            CommandType::Unknown => {}
            t @ CommandType::Custom(_) => return Some(t),
            _ => return None,
        }
        let mut s = heapless::String::new();
        s.push_str(name).ok()?;
        let idx = self.custom.len() as u8;
        self.custom.push(s).ok()?;
        Some(CommandType::Custom(idx))
    }

    pub fn parse(&self, name: &str) -> CommandType {
        match name {
            "reboot" => CommandType::Reboot,
            "factory_reset" => CommandType::FactoryReset,
            _ => self
                .custom
                .iter()
                .position(|n| n.as_str() == name)
                .map_or(CommandType::Unknown, |i| CommandType::Custom(i as u8)),
        }
    }

    pub fn name(&self, kind: CommandType) -> &str {
        match kind {
            CommandType::Reboot => "reboot",
            CommandType::FactoryReset => "factory_reset",
            CommandType::Custom(i) => self
                .custom
                .get(usize::from(i))
                .map_or("unknown", |n| n.as_str()),
            CommandType::Unknown => "unknown",
        }
    }
}

// ── Command ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: heapless::String<COMMAND_ID_MAX_LEN>,
    pub kind: CommandType,
    /// Raw JSON text of the `payload` object (empty when absent).
    pub payload: heapless::String<COMMAND_PAYLOAD_MAX_LEN>,
    /// Epoch ms; 0 = never expires.
    pub expires_at: i64,
}

impl Command {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at != 0 && now_ms >= self.expires_at
    }
}

pub type CommandBuffer = heapless::Vec<Command, MAX_COMMANDS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    Network,
    Server,
    Parse,
    /// Session rejected (401, revoked, rate limited).
    Auth(CloudError),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network error"),
            Self::Server => write!(f, "server error"),
            Self::Parse => write!(f, "malformed command response"),
            Self::Auth(e) => write!(f, "session error: {}", e),
        }
    }
}

impl From<CloudError> for CommandError {
    fn from(e: CloudError) -> Self {
        match e {
            CloudError::NetworkError => Self::Network,
            CloudError::ServerError => Self::Server,
            CloudError::ParseError => Self::Parse,
            other => Self::Auth(other),
        }
    }
}

impl From<CommandError> for CloudError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::Network => Self::NetworkError,
            CommandError::Server => Self::ServerError,
            CommandError::Parse => Self::ParseError,
            CommandError::Auth(inner) => inner,
        }
    }
}

// ── Parser ───────────────────────────────────────────────────

fn parse_command(obj: &Value, registry: &CommandRegistry) -> Option<Command> {
    let id_str = obj.get("id")?.as_str()?;
    if id_str.is_empty() {
        return None;
    }
    let mut id = heapless::String::new();
    if id.push_str(id_str).is_err() {
        warn!("Commands: {}-byte id skipped", id_str.len());
        return None;
    }

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .map_or(CommandType::Unknown, |t| registry.parse(t));

    let mut payload = heapless::String::new();
    if let Some(p) = obj.get("payload").filter(|p| !p.is_null()) {
        let text = p.to_string();
        if payload.push_str(&text).is_err() {
            warn!("Commands: payload of {} bytes for {} skipped", text.len(), id_str);
            return None;
        }
    }

    let expires_at = obj.get("expires_at").and_then(Value::as_i64).unwrap_or(0);

    Some(Command {
        id,
        kind,
        payload,
        expires_at,
    })
}

/// Parse a `/commands` body into `out` (cleared first).
pub fn parse_commands(
    body: &[u8],
    registry: &CommandRegistry,
    out: &mut CommandBuffer,
) -> Result<(), CommandError> {
    out.clear();
    let root: Value = serde_json::from_slice(body).map_err(|_| CommandError::Parse)?;
    let data = root
        .get("data")
        .and_then(Value::as_array)
        .ok_or(CommandError::Parse)?;

    for item in data {
        if out.is_full() {
            debug!("Commands: buffer full, rest left for the next poll");
            break;
        }
        if let Some(cmd) = parse_command(item, registry) {
            let _ = out.push(cmd);
        }
    }
    Ok(())
}

// ── CommandChannel ───────────────────────────────────────────

/// Acknowledges a command to the backend.
pub trait Acknowledge {
    fn ack(&self, command_id: &str) -> Result<(), CommandError>;
}

pub struct CommandChannel {
    client: Arc<CloudClient>,
    registry: CommandRegistry,
}

impl CommandChannel {
    pub fn new(client: Arc<CloudClient>) -> Self {
        Self {
            client,
            registry: CommandRegistry::new(),
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut CommandRegistry {
        &mut self.registry
    }

    /// Fetch pending commands.  No content is success with zero commands.
    pub fn poll(&self, out: &mut CommandBuffer) -> Result<(), CommandError> {
        out.clear();
        let resp = self
            .client
            .get(endpoints::COMMANDS, &[("status", "pending")])?;
        if resp.status == status::NO_CONTENT || resp.body.is_empty() {
            return Ok(());
        }
        parse_commands(&resp.body, &self.registry, out)?;
        if !out.is_empty() {
            info!("Commands: {} pending", out.len());
        }
        Ok(())
    }
}

impl Acknowledge for CommandChannel {
    fn ack(&self, command_id: &str) -> Result<(), CommandError> {
        self.client
            .post(&endpoints::ack_path(command_id), &[], crate::transport::ContentType::Json)?;
        info!("Commands: {} acked", command_id);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────
