use super::{StoreError, TradeStore};
use crate::domain::{CanonicalTrade, Ticket};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-process store: a mutex-guarded map ordered by ticket.
#[derive(Debug, Default)]
pub struct MemoryTradeStore {
    trades: Mutex<BTreeMap<Ticket, CanonicalTrade>>,
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TradeStore for MemoryTradeStore {
    fn find_by_ticket(&self, ticket: &Ticket) -> Result<Option<CanonicalTrade>, StoreError> {
        let trades = self.trades.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(trades.get(ticket).cloned())
    }

    fn create(&self, trade: &CanonicalTrade) -> Result<(), StoreError> {
        let mut trades = self.trades.lock().map_err(|_| StoreError::Poisoned)?;
        if trades.contains_key(&trade.ticket) {
            return Err(StoreError::Duplicate(trade.ticket.clone()));
        }
        trades.insert(trade.ticket.clone(), trade.clone());
        Ok(())
    }

    fn update(&self, trade: &CanonicalTrade) -> Result<(), StoreError> {
        let mut trades = self.trades.lock().map_err(|_| StoreError::Poisoned)?;
        match trades.get_mut(&trade.ticket) {
            Some(slot) => {
                *slot = trade.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(trade.ticket.clone())),
        }
    }

    fn all(&self) -> Result<Vec<CanonicalTrade>, StoreError> {
        let trades = self.trades.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(trades.values().cloned().collect())
    }

    fn count(&self) -> Result<usize, StoreError> {
        let trades = self.trades.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(trades.len())
    }
}
