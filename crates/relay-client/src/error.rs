//! Error types for the relay client.

/// Errors produced by the relay client.
///
/// None of these escape the background tasks: they are logged and turned
/// into connection state changes. They are returned from construction and
/// from the lower-level channel API.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid relay target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("failed to connect to {target}: {source}")]
    ConnectFailure {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation timed out")]
    Timeout,

    #[error("channel I/O error: {0}")]
    ChannelIo(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("JSON error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("client stopped")]
    Stopped,

    #[error("unsupported transport: {0}")]
    Unsupported(String),
}

impl RelayError {
    pub(crate) fn invalid_target(target: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            target: target.to_string(),
            reason: reason.into(),
        }
    }
}
