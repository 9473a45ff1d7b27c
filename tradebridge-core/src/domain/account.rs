use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account snapshot reported by the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_number: i64,
    pub account_name: String,
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    pub leverage: i64,
    pub currency: String,
    pub received_at: DateTime<Utc>,
}

impl AccountInfo {
    /// Equity over used margin, in percent. `None` while no margin is in use.
    pub fn margin_level_pct(&self) -> Option<Decimal> {
        if self.margin.is_zero() {
            return None;
        }
        Some((self.equity / self.margin * Decimal::ONE_HUNDRED).round_dp(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> AccountInfo {
        AccountInfo {
            account_number: 123456,
            account_name: "Demo".into(),
            balance: dec!(10000),
            equity: dec!(10250.50),
            margin: dec!(500),
            free_margin: dec!(9750.50),
            leverage: 100,
            currency: "USD".into(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn margin_level() {
        assert_eq!(sample().margin_level_pct(), Some(dec!(2050.10)));
    }

    #[test]
    fn margin_level_without_margin() {
        let mut account = sample();
        account.margin = Decimal::ZERO;
        assert_eq!(account.margin_level_pct(), None);
    }
}
