//! Top-level envelope: parse the JSON object and read its `type` discriminator.

use super::WireError;
use serde_json::{Map, Value};
use std::fmt;

/// Message discriminator. Unknown strings are kept so they can be logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    TradeOpen,
    TradeClose,
    TradeModify,
    AccountInfo,
    History,
    Heartbeat,
    Error,
    Other(String),
}

impl MessageType {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "trade_open" => Self::TradeOpen,
            "trade_close" => Self::TradeClose,
            "trade_modify" => Self::TradeModify,
            "account_info" => Self::AccountInfo,
            "history" => Self::History,
            "heartbeat" => Self::Heartbeat,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::TradeOpen => "trade_open",
            Self::TradeClose => "trade_close",
            Self::TradeModify => "trade_modify",
            Self::AccountInfo => "account_info",
            Self::History => "history",
            Self::Heartbeat => "heartbeat",
            Self::Error => "error",
            Self::Other(tag) => tag,
        }
    }

    /// Open, close and modify share one handler.
    pub fn is_trade(&self) -> bool {
        matches!(self, Self::TradeOpen | Self::TradeClose | Self::TradeModify)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed inbound message: its discriminator plus the remaining fields.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message_type: MessageType,
    pub fields: Map<String, Value>,
}

impl Envelope {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The nested `trade` object carried by trade messages.
    pub fn trade_object(&self) -> Result<&Value, WireError> {
        match self.fields.get("trade") {
            Some(value @ Value::Object(_)) => Ok(value),
            _ => Err(WireError::MissingField("trade")),
        }
    }

    /// The `trades` array carried by history messages.
    pub fn history_trades(&self) -> Result<&[Value], WireError> {
        match self.fields.get("trades") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(WireError::MissingField("trades")),
        }
    }

    /// Human-readable text of an `error` message, falling back to the raw fields.
    pub fn error_text(&self) -> String {
        ["message", "error", "description"]
            .iter()
            .find_map(|key| self.fields.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(self.fields.clone()).to_string())
    }
}

/// Parse raw text into an envelope. Fails on invalid JSON, non-object
/// payloads, and a missing or non-string `type`.
pub fn parse_envelope(raw: &str) -> Result<Envelope, WireError> {
    let value: Value = serde_json::from_str(raw.trim()).map_err(WireError::InvalidJson)?;
    let Value::Object(mut fields) = value else {
        return Err(WireError::NotAnObject);
    };
    let tag = match fields.remove("type") {
        Some(Value::String(tag)) => tag,
        _ => return Err(WireError::MissingType),
    };
    Ok(Envelope {
        message_type: MessageType::parse(&tag),
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_discriminator() {
        let env = parse_envelope(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(env.message_type, MessageType::Heartbeat);
        assert!(env.fields.is_empty());
    }

    #[test]
    fn trade_kinds_share_handler() {
        for tag in ["trade_open", "trade_close", "trade_modify"] {
            assert!(MessageType::parse(tag).is_trade());
        }
        assert!(!MessageType::parse("history").is_trade());
    }

    #[test]
    fn unknown_type_is_kept() {
        let env = parse_envelope(r#"{"type":"quote","bid":1.1}"#).unwrap();
        assert_eq!(env.message_type, MessageType::Other("quote".into()));
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(parse_envelope("{not json"), Err(WireError::InvalidJson(_))));
    }

    #[test]
    fn rejects_missing_or_non_string_type() {
        assert!(matches!(parse_envelope(r#"{"trade":{}}"#), Err(WireError::MissingType)));
        assert!(matches!(parse_envelope(r#"{"type":3}"#), Err(WireError::MissingType)));
        assert!(matches!(parse_envelope("[1,2]"), Err(WireError::NotAnObject)));
    }

    #[test]
    fn error_text_prefers_message_field() {
        let env = parse_envelope(r#"{"type":"error","message":"trade context busy"}"#).unwrap();
        assert_eq!(env.error_text(), "trade context busy");
    }

    #[test]
    fn history_requires_array() {
        let env = parse_envelope(r#"{"type":"history","trades":{}}"#).unwrap();
        assert!(env.history_trades().is_err());
        let env = parse_envelope(r#"{"type":"history","trades":[]}"#).unwrap();
        assert!(env.history_trades().unwrap().is_empty());
    }
}
