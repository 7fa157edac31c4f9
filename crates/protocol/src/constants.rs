use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default relay socket path on the host.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/iotconnect-relay.sock";

/// Prefix selecting a routed TCP connection instead of a local socket.
pub const TCP_SCHEME: &str = "tcp://";

/// Delay between reconnection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Time allowed to establish the transport connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a single read may block before the receive loop re-checks
/// whether it should keep running.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Time allowed to write one framed message.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum length of a single line on the wire (1 MiB).
///
/// Longer lines are discarded up to the next newline.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Relay message type identifier (the `type` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Register,
    Telemetry,
    Command,
    Response,
}

impl MessageType {
    /// Returns the wire name of this message type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Telemetry => "telemetry",
            Self::Command => "command",
            Self::Response => "response",
        }
    }

    /// Parses a wire name. Returns `None` for unknown types.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "register" => Some(Self::Register),
            "telemetry" => Some(Self::Telemetry),
            "command" => Some(Self::Command),
            "response" => Some(Self::Response),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
