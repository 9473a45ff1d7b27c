//! TradeReconciler: merge external trade messages into canonical trades.
//!
//! The broker ticket is the natural key: look up by ticket, create if unseen,
//! overwrite mapped fields, persist, emit `TradeReceived`. Field mapping runs
//! before the store is touched, so a garbled message has no effect at all.
//!
//! Upserts for the same ticket are serialized through a striped lock table;
//! two listener tasks reporting the same ticket cannot both create it.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::trade::price_move_pct;
use crate::domain::{
    CanonicalTrade, Ticket, TradeDirection, TradeStatus, UnknownDirection, MONEY_SCALE,
    PRICE_SCALE, VOLUME_SCALE,
};
use crate::events::{EventSink, GatewayEvent};
use crate::store::{StoreError, TradeStore};
use crate::wire::{to_decimal, ExternalTradeMessage, WireError};

const LOCK_STRIPES: usize = 64;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("ticket {ticket}: {source}")]
    Field {
        ticket: i64,
        #[source]
        source: WireError,
    },

    #[error("ticket {ticket}: {source}")]
    Direction {
        ticket: i64,
        #[source]
        source: UnknownDirection,
    },

    #[error("ticket {ticket}: invalid ticket value")]
    InvalidTicket { ticket: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("ticket lock poisoned")]
    Poisoned,
}

/// Message fields converted to canonical types. `None` means "not sent":
/// the stored value is kept.
#[derive(Debug, Clone)]
struct MappedTrade {
    ticket: Ticket,
    symbol: Option<String>,
    direction: Option<TradeDirection>,
    volume: Option<Decimal>,
    entry_price: Option<Decimal>,
    entry_time: Option<DateTime<Utc>>,
    exit_price: Option<Decimal>,
    exit_time: Option<DateTime<Utc>>,
    // Outer None: not sent. Inner None: sent as 0, meaning "no level".
    stop_loss: Option<Option<Decimal>>,
    take_profit: Option<Option<Decimal>>,
    commission: Option<Decimal>,
    swap: Option<Decimal>,
    profit: Option<Decimal>,
    comment: Option<String>,
    magic_number: Option<i64>,
}

impl MappedTrade {
    fn from_message(msg: &ExternalTradeMessage) -> Result<Self, ReconcileError> {
        let ticket = msg.ticket;
        if ticket <= 0 {
            return Err(ReconcileError::InvalidTicket { ticket });
        }
        let decimal = |field: &'static str, value: Option<f64>, scale: u32| {
            value
                .map(|v| to_decimal(field, v, scale))
                .transpose()
                .map_err(|source| ReconcileError::Field { ticket, source })
        };
        let level = |field: &'static str, value: Option<f64>| {
            decimal(field, value, PRICE_SCALE).map(|v| v.map(|d| (!d.is_zero()).then_some(d)))
        };
        let direction = msg
            .direction
            .map(TradeDirection::from_code)
            .transpose()
            .map_err(|source| ReconcileError::Direction { ticket, source })?;

        Ok(Self {
            ticket: Ticket::from(ticket),
            symbol: msg.symbol.clone().filter(|s| !s.trim().is_empty()),
            direction,
            volume: decimal("lots", msg.lots, VOLUME_SCALE)?,
            entry_price: decimal("openPrice", msg.open_price, PRICE_SCALE)?,
            entry_time: msg.resolved_open_time(),
            exit_price: decimal("closePrice", msg.close_price, PRICE_SCALE)?,
            exit_time: msg.resolved_close_time(),
            stop_loss: level("stopLoss", msg.stop_loss)?,
            take_profit: level("takeProfit", msg.take_profit)?,
            commission: decimal("commission", msg.commission, MONEY_SCALE)?,
            swap: decimal("swap", msg.swap, MONEY_SCALE)?,
            profit: decimal("profit", msg.profit, MONEY_SCALE)?,
            comment: msg.comment.clone(),
            magic_number: msg.magic_number,
        })
    }

    fn apply(&self, trade: &mut CanonicalTrade, now: DateTime<Utc>) {
        if let Some(symbol) = &self.symbol {
            trade.symbol = symbol.clone();
        }
        if let Some(direction) = self.direction {
            trade.direction = direction;
        }
        if let Some(volume) = self.volume {
            trade.volume = volume;
        }
        if let Some(price) = self.entry_price {
            trade.entry_price = price;
        }
        if let Some(time) = self.entry_time {
            trade.entry_time = Some(time);
        }
        if let Some(sl) = self.stop_loss {
            trade.stop_loss = sl;
        }
        if let Some(tp) = self.take_profit {
            trade.take_profit = tp;
        }
        if let Some(comment) = &self.comment {
            trade.comment = comment.clone();
        }
        if let Some(magic) = self.magic_number {
            trade.magic_number = magic;
        }

        match self.exit_time {
            Some(exit_time) => {
                trade.status = TradeStatus::Closed;
                trade.exit_time = Some(exit_time);
                if let Some(price) = self.exit_price {
                    trade.exit_price = Some(price);
                }
                if let Some(commission) = self.commission {
                    trade.commission = commission;
                }
                if let Some(swap) = self.swap {
                    trade.swap = swap;
                }
                if let Some(profit) = self.profit {
                    trade.profit_loss = profit;
                }
            }
            None if trade.is_closed() => {
                warn!(ticket = %trade.ticket, "message without close time for a closed trade; status kept");
            }
            None => trade.status = TradeStatus::Open,
        }

        if trade.is_closed() {
            trade.profit_loss_pct = trade
                .exit_price
                .and_then(|exit| price_move_pct(trade.entry_price, exit));
        }

        trade.updated_at = now;
    }
}

/// Fixed table of mutexes; a ticket always hashes to the same stripe.
#[derive(Debug)]
struct TicketLocks {
    stripes: Vec<Mutex<()>>,
}

impl TicketLocks {
    fn new(count: usize) -> Self {
        Self {
            stripes: (0..count.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn lock(&self, ticket: &Ticket) -> Result<MutexGuard<'_, ()>, ReconcileError> {
        let mut hasher = DefaultHasher::new();
        ticket.hash(&mut hasher);
        let stripe = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[stripe]
            .lock()
            .map_err(|_| ReconcileError::Poisoned)
    }
}

/// Ticket-keyed lookup-or-create and field merge into the trade store.
pub struct TradeReconciler {
    store: Arc<dyn TradeStore>,
    events: Arc<dyn EventSink>,
    locks: TicketLocks,
}

impl TradeReconciler {
    pub fn new(store: Arc<dyn TradeStore>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            events,
            locks: TicketLocks::new(LOCK_STRIPES),
        }
    }

    pub fn store(&self) -> &Arc<dyn TradeStore> {
        &self.store
    }

    /// Reconcile one message into the ledger and return the stored trade.
    ///
    /// Re-delivering an identical message leaves exactly one trade with the
    /// same field values.
    pub fn upsert_from_external(
        &self,
        msg: &ExternalTradeMessage,
    ) -> Result<CanonicalTrade, ReconcileError> {
        let mapped = MappedTrade::from_message(msg)?;

        let (trade, created) = {
            let _guard = self.locks.lock(&mapped.ticket)?;
            let now = Utc::now();
            let existing = self.store.find_by_ticket(&mapped.ticket)?;
            let created = existing.is_none();
            let mut trade =
                existing.unwrap_or_else(|| CanonicalTrade::new(mapped.ticket.clone(), now));
            mapped.apply(&mut trade, now);
            if created {
                self.store.create(&trade)?;
            } else {
                self.store.update(&trade)?;
            }
            (trade, created)
        };

        debug!(
            ticket = %trade.ticket,
            symbol = %trade.symbol,
            status = %trade.status,
            created,
            "trade reconciled"
        );
        self.events.publish(GatewayEvent::TradeReceived {
            message: msg.clone(),
            trade: trade.clone(),
        });
        Ok(trade)
    }
}

impl std::fmt::Debug for TradeReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeReconciler")
            .field("stripes", &self.locks.stripes.len())
            .finish_non_exhaustive()
    }
}
