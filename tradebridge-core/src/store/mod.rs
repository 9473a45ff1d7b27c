//! Trade store collaborator.
//!
//! The ledger's storage belongs to the caller; the gateway only finds,
//! creates and updates through this trait.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlTradeStore;
pub use memory::MemoryTradeStore;

use crate::domain::{CanonicalTrade, Ticket};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("trade {0} already exists")]
    Duplicate(Ticket),

    #[error("trade {0} not found")]
    NotFound(Ticket),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Ticket-keyed persistence for canonical trades.
pub trait TradeStore: Send + Sync {
    fn find_by_ticket(&self, ticket: &Ticket) -> Result<Option<CanonicalTrade>, StoreError>;

    /// Insert a trade whose ticket is not yet stored.
    fn create(&self, trade: &CanonicalTrade) -> Result<(), StoreError>;

    /// Replace the stored trade with the same ticket.
    fn update(&self, trade: &CanonicalTrade) -> Result<(), StoreError>;

    /// Every stored trade, ordered by ticket.
    fn all(&self) -> Result<Vec<CanonicalTrade>, StoreError>;

    fn count(&self) -> Result<usize, StoreError> {
        self.all().map(|trades| trades.len())
    }
}
