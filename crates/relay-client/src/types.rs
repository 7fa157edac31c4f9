//! Public types for the relay client.

use std::sync::Arc;
use std::time::Duration;

use iotc_relay_protocol::CommandParams;
use iotc_relay_protocol::constants::{
    CONNECT_TIMEOUT, DEFAULT_RETRY_INTERVAL, READ_TIMEOUT, WRITE_TIMEOUT,
};

/// Connection state of the relay link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live channel. Sends fail until the next successful reconnect.
    Disconnected,
    /// Transport connect and registration in progress.
    Connecting,
    /// Registered with the broker.
    Connected,
}

/// Error type returned by command handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked for each broker command, in arrival order.
///
/// Runs on the receive task, so it should return quickly; long work
/// belongs on a separate task.
pub type CommandHandler =
    Arc<dyn Fn(&str, CommandParams) -> Result<(), HandlerError> + Send + Sync>;

/// Wraps a closure as a [`CommandHandler`].
pub fn command_handler<F>(f: F) -> CommandHandler
where
    F: Fn(&str, CommandParams) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Timing configuration for the relay client.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Fixed delay between reconnection attempts.
    pub retry_interval: Duration,
    /// Maximum time to establish the transport.
    pub connect_timeout: Duration,
    /// Maximum time a single read blocks before the receive loop re-checks
    /// whether it should keep running.
    pub read_timeout: Duration,
    /// Maximum time to write one message.
    pub write_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

impl RelayConfig {
    /// Returns a copy with a different reconnection interval.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }
}

/// Floor applied to `retry_interval`.
pub(crate) const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Extra time `stop()` grants a background task beyond its own cadence
/// before aborting it.
pub(crate) const STOP_GRACE: Duration = Duration::from_secs(1);
