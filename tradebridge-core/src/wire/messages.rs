//! Statically-typed DTOs for trade and account sub-objects.

use super::lenient;
use super::time::WireTime;
use super::{to_decimal, WireError};
use crate::domain::{AccountInfo, MONEY_SCALE};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A trade as the terminal describes it. Only `ticket` is mandatory: close
/// and modify messages routinely carry just the fields that changed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTradeMessage {
    #[serde(deserialize_with = "lenient::i64_value")]
    pub ticket: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Direction code: 0 = buy, 1 = sell.
    #[serde(
        rename = "type",
        default,
        deserialize_with = "lenient::opt_i64",
        skip_serializing_if = "Option::is_none"
    )]
    pub direction: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_f64", skip_serializing_if = "Option::is_none")]
    pub lots: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64", skip_serializing_if = "Option::is_none")]
    pub open_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64", skip_serializing_if = "Option::is_none")]
    pub close_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64", skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64", skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_time: Option<WireTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_time: Option<WireTime>,
    #[serde(default, deserialize_with = "lenient::opt_f64", skip_serializing_if = "Option::is_none")]
    pub commission: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64", skip_serializing_if = "Option::is_none")]
    pub swap: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64", skip_serializing_if = "Option::is_none")]
    pub profit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_i64", skip_serializing_if = "Option::is_none")]
    pub magic_number: Option<i64>,
}

impl ExternalTradeMessage {
    pub fn from_value(value: &Value) -> Result<Self, WireError> {
        Self::deserialize(value).map_err(|source| WireError::Malformed {
            what: "trade object",
            source,
        })
    }

    /// Close time resolved against the unset sentinel.
    pub fn resolved_close_time(&self) -> Option<DateTime<Utc>> {
        self.close_time.as_ref().and_then(WireTime::resolve)
    }

    pub fn resolved_open_time(&self) -> Option<DateTime<Utc>> {
        self.open_time.as_ref().and_then(WireTime::resolve)
    }
}

/// Account snapshot as sent by the terminal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfoMessage {
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub account_number: Option<i64>,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub balance: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub equity: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub margin: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub free_margin: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub leverage: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl AccountInfoMessage {
    /// Account fields sit at the envelope's top level, next to `type`.
    pub fn from_fields(fields: &serde_json::Map<String, Value>) -> Result<Self, WireError> {
        Self::deserialize(Value::Object(fields.clone())).map_err(|source| WireError::Malformed {
            what: "account info",
            source,
        })
    }

    pub fn to_account_info(&self, received_at: DateTime<Utc>) -> Result<AccountInfo, WireError> {
        let money = |field: &'static str, value: Option<f64>| -> Result<Decimal, WireError> {
            value
                .map(|v| to_decimal(field, v, MONEY_SCALE))
                .transpose()
                .map(Option::unwrap_or_default)
        };
        Ok(AccountInfo {
            account_number: self.account_number.unwrap_or_default(),
            account_name: self.account_name.clone().unwrap_or_default(),
            balance: money("balance", self.balance)?,
            equity: money("equity", self.equity)?,
            margin: money("margin", self.margin)?,
            free_margin: money("freeMargin", self.free_margin)?,
            leverage: self.leverage.unwrap_or_default(),
            currency: self.currency.clone().unwrap_or_default(),
            received_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn full_trade_object() {
        let value = json!({
            "ticket": 1001, "symbol": "EURUSD", "type": 0, "lots": 1.0,
            "openPrice": 1.2, "closePrice": 0, "stopLoss": 1.19, "takeProfit": 1.21,
            "openTime": "2024-01-01T10:00:00", "closeTime": "0",
            "commission": -7, "swap": 0, "profit": 0,
            "comment": "ea entry", "magicNumber": 20240101
        });
        let msg = ExternalTradeMessage::from_value(&value).unwrap();
        assert_eq!(msg.ticket, 1001);
        assert_eq!(msg.symbol.as_deref(), Some("EURUSD"));
        assert_eq!(msg.direction, Some(0));
        assert_eq!(msg.stop_loss, Some(1.19));
        assert_eq!(msg.magic_number, Some(20240101));
        assert!(msg.resolved_open_time().is_some());
        assert!(msg.resolved_close_time().is_none());
    }

    #[test]
    fn partial_close_object() {
        let value = json!({"ticket": "1001", "closeTime": "2024-01-01T12:00:00", "closePrice": 1.205, "profit": 50});
        let msg = ExternalTradeMessage::from_value(&value).unwrap();
        assert_eq!(msg.ticket, 1001);
        assert_eq!(msg.symbol, None);
        assert_eq!(msg.profit, Some(50.0));
        assert!(msg.resolved_close_time().is_some());
    }

    #[test]
    fn missing_ticket_is_malformed() {
        let err = ExternalTradeMessage::from_value(&json!({"symbol": "EURUSD"})).unwrap_err();
        assert!(matches!(err, WireError::Malformed { what: "trade object", .. }));
    }

    #[test]
    fn garbled_number_is_malformed() {
        let value = json!({"ticket": 5, "lots": "one"});
        assert!(ExternalTradeMessage::from_value(&value).is_err());
    }

    #[test]
    fn serializes_only_present_fields() {
        let msg = ExternalTradeMessage {
            ticket: 9,
            profit: Some(1.5),
            ..Default::default()
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"ticket": 9, "profit": 1.5}));
    }

    #[test]
    fn account_info_mapping() {
        let fields = json!({
            "accountNumber": 778899, "accountName": "Main", "balance": "10000.5",
            "equity": 10100.25, "margin": 250, "freeMargin": 9850.25,
            "leverage": 500, "currency": "EUR"
        });
        let serde_json::Value::Object(map) = fields else { unreachable!() };
        let msg = AccountInfoMessage::from_fields(&map).unwrap();
        let info = msg.to_account_info(Utc::now()).unwrap();
        assert_eq!(info.account_number, 778899);
        assert_eq!(info.balance, dec!(10000.5));
        assert_eq!(info.free_margin, dec!(9850.25));
        assert_eq!(info.leverage, 500);
        assert_eq!(info.currency, "EUR");
    }
}
