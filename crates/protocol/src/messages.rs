use serde::Serialize;
use serde_json::{Map, Value};

/// Messages sent from the client to the relay broker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound<'a> {
    /// Sent once per successful connection.
    Register { client_id: &'a str },
    /// Application telemetry. `data` is always a JSON object.
    Telemetry {
        client_id: &'a str,
        data: &'a Map<String, Value>,
    },
}

impl<'a> Outbound<'a> {
    pub fn register(client_id: &'a str) -> Self {
        Self::Register { client_id }
    }

    pub fn telemetry(client_id: &'a str, data: &'a Map<String, Value>) -> Self {
        Self::Telemetry { client_id, data }
    }
}

/// Serializes any value as a single newline-terminated JSON line.
pub fn encode_line<T: Serialize + ?Sized>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = serde_json::to_vec(msg)?;
    buf.push(b'\n');
    Ok(buf)
}
