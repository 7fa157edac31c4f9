use serde_json::{Map, Value};

use crate::constants::MessageType;
use crate::types::CommandParams;

/// Errors classifying an inbound message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("command message has no command_name")]
    MissingCommandName,
}

/// A decoded message from the relay broker.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A command to hand to the application.
    Command { name: String, params: CommandParams },
    /// A response or any message carrying a `status` field.
    Ack,
    /// Any other or missing `type`.
    Unrecognized { msg_type: Option<String> },
}

impl Inbound {
    /// Classifies a decoded JSON object by its `type` tag.
    ///
    /// `command` wins over a `status` field; a `response` type or any
    /// `status` field marks an acknowledgment.
    pub fn classify(mut message: Map<String, Value>) -> Result<Self, ProtocolError> {
        let msg_type = message
            .get("type")
            .and_then(Value::as_str)
            .and_then(MessageType::from_wire);

        match msg_type {
            Some(MessageType::Command) => {
                let name = match message.remove("command_name") {
                    Some(Value::String(name)) => name,
                    _ => return Err(ProtocolError::MissingCommandName),
                };
                let params = CommandParams::from_value(message.remove("parameters"));
                Ok(Self::Command { name, params })
            }
            Some(MessageType::Response) => Ok(Self::Ack),
            _ if message.contains_key("status") => Ok(Self::Ack),
            _ => Ok(Self::Unrecognized {
                msg_type: message.get("type").map(|t| match t {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
            }),
        }
    }
}
