//! Wire types carried over the command channel

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request from a view. `nonce` correlates the answer and means nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub nonce: String,
    #[serde(default)]
    pub payload: Value,
}

impl Command {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            nonce: uuid::Uuid::new_v4().to_string(),
            payload,
        }
    }
}

/// The answer to exactly one [`Command`].
///
/// On success `data` is the handler's value; on failure it is the error
/// message as a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub nonce: String,
    pub ok: bool,
    #[serde(default)]
    pub data: Value,
}

impl CommandResult {
    pub fn ok(nonce: impl Into<String>, data: Value) -> Self {
        Self {
            nonce: nonce.into(),
            ok: true,
            data,
        }
    }

    pub fn err(nonce: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            nonce: nonce.into(),
            ok: false,
            data: Value::String(message.into()),
        }
    }

    /// Splits the result into the handler value or its failure message.
    pub fn into_result(self) -> Result<Value, String> {
        if self.ok {
            return Ok(self.data);
        }
        match self.data {
            Value::String(message) => Err(message),
            other => Err(other.to_string()),
        }
    }
}
