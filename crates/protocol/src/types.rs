use serde_json::{Map, Value};

/// Parameters attached to a broker command.
///
/// The broker sends either a JSON object, a bare string, or nothing at all.
/// Other JSON scalars (numbers, booleans, arrays) are kept as their JSON text.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CommandParams {
    #[default]
    Absent,
    Text(String),
    Structured(Map<String, Value>),
}

impl CommandParams {
    /// Builds parameters from the raw `parameters` field of a command.
    pub fn from_value(value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Absent,
            Some(Value::String(s)) => Self::Text(s),
            Some(Value::Object(map)) => Self::Structured(map),
            Some(other) => Self::Text(other.to_string()),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Returns the bare string form, if the parameters were sent as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Looks up a field of structured parameters.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Structured(map) => map.get(key),
            _ => None,
        }
    }

    /// Resolves a single scalar argument.
    ///
    /// Structured parameters yield the named field (strings unquoted,
    /// numbers and booleans as text). Text parameters are the argument
    /// themselves, whatever the key.
    pub fn scalar(&self, key: &str) -> Option<String> {
        match self {
            Self::Absent => None,
            Self::Text(s) => Some(s.trim().to_string()),
            Self::Structured(map) => match map.get(key)? {
                Value::String(s) => Some(s.trim().to_string()),
                v @ (Value::Number(_) | Value::Bool(_)) => Some(v.to_string()),
                _ => None,
            },
        }
    }

    /// Converts back to a JSON value (`null` when absent).
    pub fn to_value(&self) -> Value {
        match self {
            Self::Absent => Value::Null,
            Self::Text(s) => Value::String(s.clone()),
            Self::Structured(map) => Value::Object(map.clone()),
        }
    }
}

impl std::fmt::Display for CommandParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => f.write_str("<none>"),
            Self::Text(s) => f.write_str(s),
            Self::Structured(_) => write!(f, "{}", self.to_value()),
        }
    }
}
