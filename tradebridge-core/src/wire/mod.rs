//! Wire format: the terminal's JSON envelopes and their statically-typed DTOs.
//!
//! Every inbound message is a UTF-8 JSON object `{"type": <string>, ...}`.
//! The terminal is loose about types (numbers arrive as strings, times as ISO
//! text or epoch seconds), so the DTOs decode leniently and keep the raw values;
//! conversion into canonical types happens in `reconcile` and `AccountInfoMessage::to_account_info`.

pub mod command;
pub mod envelope;
pub mod lenient;
pub mod messages;
pub mod time;

pub use command::{Command, CommandEnvelope};
pub use envelope::{parse_envelope, Envelope, MessageType};
pub use messages::{AccountInfoMessage, ExternalTradeMessage};
pub use time::WireTime;

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Decoding failures for a single message or sub-object.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("missing or non-string 'type' discriminator")]
    MissingType,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("malformed {what}: {source}")]
    Malformed {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("field '{field}' is not a finite number: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("field '{field}' is outside the decimal range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Convert a wire float into a decimal rounded to `scale` places.
///
/// The float is read through its shortest round-trip text, so `-12.345`
/// converts as the decimal the terminal printed rather than its binary
/// expansion. Midpoints round away from zero.
pub fn to_decimal(field: &'static str, value: f64, scale: u32) -> Result<Decimal, WireError> {
    if !value.is_finite() {
        return Err(WireError::NonFinite { field, value });
    }
    let exact = Decimal::from_str(&value.to_string())
        .or_else(|_| Decimal::from_scientific(&format!("{value:e}")))
        .map_err(|_| WireError::OutOfRange { field, value })?;
    Ok(exact
        .round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
        .normalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decimal_conversion_strips_binary_noise() {
        assert_eq!(to_decimal("price", 1.2, 8).unwrap(), dec!(1.2));
        assert_eq!(to_decimal("price", 1.2050, 8).unwrap(), dec!(1.205));
        assert_eq!(to_decimal("price", 0.1 + 0.2, 8).unwrap(), dec!(0.3));
    }

    #[test]
    fn midpoints_round_away_from_zero() {
        assert_eq!(to_decimal("profit", -12.345, 2).unwrap(), dec!(-12.35));
        assert_eq!(to_decimal("profit", 12.345, 2).unwrap(), dec!(12.35));
        assert_eq!(to_decimal("profit", 0.125, 2).unwrap(), dec!(0.13));
        assert_eq!(to_decimal("lots", 2.675, 2).unwrap(), dec!(2.68));
    }

    #[test]
    fn values_beyond_decimal_range_are_rejected() {
        assert!(matches!(
            to_decimal("balance", 1e30, 2),
            Err(WireError::OutOfRange { field: "balance", .. })
        ));
    }

    #[test]
    fn decimal_conversion_rejects_nan() {
        assert!(matches!(
            to_decimal("lots", f64::NAN, 2),
            Err(WireError::NonFinite { field: "lots", .. })
        ));
        assert!(to_decimal("lots", f64::INFINITY, 2).is_err());
    }
}
