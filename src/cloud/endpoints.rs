//! Backend REST paths.

use crate::transport::url_encode;

pub const AUTH_DEVICE: &str = "/auth/device";
pub const AUTH_REFRESH: &str = "/auth/refresh";
pub const TELEMETRY: &str = "/telemetry/proto";
pub const COMMANDS: &str = "/commands";
pub const DEVICE_INFO: &str = "/devices/info";

/// `/commands/{id}/ack`
pub fn ack_path(command_id: &str) -> String {
    format!("{}/{}/ack", COMMANDS, url_encode(command_id))
}

pub mod status {
    pub const NO_CONTENT: u16 = 204;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const TOO_MANY_REQUESTS: u16 = 429;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_path_encodes_id() {
        assert_eq!(
            ack_path("550e8400-e29b-41d4-a716-446655440000"),
            "/commands/550e8400-e29b-41d4-a716-446655440000/ack"
        );
        assert_eq!(ack_path("a/b"), "/commands/a%2Fb/ack");
    }
}
