//! Wire protocol for the IoTConnect relay.
//!
//! Every message is a single JSON object terminated by `\n`. The client
//! registers, then pushes telemetry; the broker pushes commands and
//! acknowledgments.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{Inbound, ProtocolError};
pub use messages::{Outbound, encode_line};
pub use types::CommandParams;
