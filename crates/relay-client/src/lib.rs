//! Resilient client for the IoTConnect relay broker.
//!
//! Connects over a local Unix socket or TCP, registers a client ID, sends
//! telemetry best-effort and delivers broker commands to a handler.
//! Outages are absorbed by a fixed-interval background reconnect.

pub mod channel;
pub mod client;
mod dispatcher;
pub mod error;
mod receiver;
pub(crate) mod reconnection;
pub mod target;
pub mod types;

pub use channel::{Frame, FrameReader, FrameWriter, FramedChannel};
pub use client::RelayClient;
pub use error::RelayError;
pub use iotc_relay_protocol::CommandParams;
pub use target::ConnectionTarget;
pub use types::{CommandHandler, ConnectionState, HandlerError, RelayConfig, command_handler};
