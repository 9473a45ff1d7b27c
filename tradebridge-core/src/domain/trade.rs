//! CanonicalTrade: the persisted ledger record for one broker position.

use super::ids::Ticket;
use super::PERCENT_SCALE;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Trade direction, decoded from the terminal's numeric order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeDirection {
    Buy,
    Sell,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown direction code {0} (expected 0 = buy, 1 = sell)")]
pub struct UnknownDirection(pub i64);

impl TradeDirection {
    /// 0 → Buy, 1 → Sell. Pending-order codes are not positions and are rejected.
    pub fn from_code(code: i64) -> Result<Self, UnknownDirection> {
        match code {
            0 => Ok(Self::Buy),
            1 => Ok(Self::Sell),
            other => Err(UnknownDirection(other)),
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TradeStatus {
    #[default]
    Open,
    Closed,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Closed => "closed",
        })
    }
}

/// The internal trade aggregate, keyed by ticket.
///
/// Created on the first message bearing an unseen ticket and mutated in place
/// by every later message with the same ticket. `Open → Closed` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTrade {
    // ── Identification ──
    pub ticket: Ticket,
    pub symbol: String,
    pub direction: TradeDirection,
    pub status: TradeStatus,

    // ── Size ──
    pub volume: Decimal,

    // ── Entry ──
    pub entry_price: Decimal,
    pub entry_time: Option<DateTime<Utc>>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,

    // ── Exit ──
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,

    // ── PnL ──
    pub commission: Decimal,
    pub swap: Decimal,
    pub profit_loss: Decimal,
    pub profit_loss_pct: Option<Decimal>,

    // ── Tags ──
    pub comment: String,
    pub magic_number: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalTrade {
    /// A fresh open trade bound to `ticket`; every other field is filled by reconciliation.
    pub fn new(ticket: Ticket, now: DateTime<Utc>) -> Self {
        Self {
            ticket,
            symbol: String::new(),
            direction: TradeDirection::Buy,
            status: TradeStatus::Open,
            volume: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            entry_time: None,
            stop_loss: None,
            take_profit: None,
            exit_price: None,
            exit_time: None,
            commission: Decimal::ZERO,
            swap: Decimal::ZERO,
            profit_loss: Decimal::ZERO,
            profit_loss_pct: None,
            comment: String::new(),
            magic_number: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == TradeStatus::Closed
    }

    /// Net result after costs.
    pub fn net_profit(&self) -> Decimal {
        self.profit_loss + self.commission + self.swap
    }
}

/// `abs(exit - entry) / entry * 100`.
///
/// Direction and instrument pip size are not taken into account, so a losing
/// trade reports the same positive percentage as a winning one. Kept as-is for
/// ledger compatibility. Returns `None` when the entry price is zero.
pub fn price_move_pct(entry: Decimal, exit: Decimal) -> Option<Decimal> {
    if entry.is_zero() {
        return None;
    }
    let pct = (exit - entry).abs() / entry * Decimal::ONE_HUNDRED;
    Some(pct.round_dp(PERCENT_SCALE))
}
