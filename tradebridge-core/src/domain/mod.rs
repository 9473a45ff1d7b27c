//! Domain types for the trade ledger

pub mod account;
pub mod ids;
pub mod session;
pub mod trade;

pub use account::AccountInfo;
pub use ids::Ticket;
pub use session::{ConnectionStatus, TransportKind, UnknownTransportKind};
pub use trade::{CanonicalTrade, TradeDirection, TradeStatus, UnknownDirection};

/// Decimal places kept for prices (entry, exit, stop-loss, take-profit).
pub const PRICE_SCALE: u32 = 8;
/// Decimal places kept for money (commission, swap, profit, balances).
pub const MONEY_SCALE: u32 = 2;
/// Decimal places kept for lot volume.
pub const VOLUME_SCALE: u32 = 2;
/// Decimal places kept for the profit/loss percentage.
pub const PERCENT_SCALE: u32 = 4;
