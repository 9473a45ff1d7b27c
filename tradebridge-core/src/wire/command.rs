//! Outbound command envelopes.
//!
//! Commands are fire-and-forget: there is no correlation id, and whatever the
//! terminal sends back arrives as an ordinary inbound message.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Well-known terminal commands plus free-form names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetOpenTrades,
    GetHistory,
    GetAccountInfo,
    Custom(String),
}

impl Command {
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "get_open_trades" => Self::GetOpenTrades,
            "get_history" => Self::GetHistory,
            "get_account_info" => Self::GetAccountInfo,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::GetOpenTrades => "get_open_trades",
            Self::GetHistory => "get_history",
            Self::GetAccountInfo => "get_account_info",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{"command": ..., "parameters": {...}, "timestamp": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command: String,
    pub parameters: Value,
    pub timestamp: String,
}

impl CommandEnvelope {
    /// Non-object parameters are wrapped as `{"value": ...}`; `null` becomes `{}`.
    pub fn new(command: &Command, parameters: Value, at: DateTime<Utc>) -> Self {
        let parameters = match parameters {
            Value::Object(_) => parameters,
            Value::Null => Value::Object(Map::new()),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Value::Object(map)
            }
        };
        Self {
            command: command.as_str().to_string(),
            parameters,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Single-line JSON, as written to stream transports.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
