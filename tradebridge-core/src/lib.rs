//! TradeBridge Core: domain types, wire DTOs, trade reconciliation, store and event interfaces.
//!
//! This crate contains everything the ingestion gateway needs that does not
//! touch a socket:
//! - Domain types (canonical trades, account snapshots, connection status)
//! - Wire DTOs for the terminal's loosely-typed JSON format
//! - Ticket-keyed reconciliation of external trade messages into canonical trades
//! - The trade store collaborator interface (in-memory and JSONL journal stores)
//! - The event/notification surface consumed by UI and logging collaborators

pub mod domain;
pub mod events;
pub mod reconcile;
pub mod store;
pub mod wire;

pub use domain::{
    AccountInfo, CanonicalTrade, ConnectionStatus, Ticket, TradeDirection, TradeStatus,
    TransportKind,
};
pub use events::{EventSink, GatewayEvent, MemorySink, NotificationLevel, NullSink};
pub use reconcile::{ReconcileError, TradeReconciler};
pub use store::{JsonlTradeStore, MemoryTradeStore, StoreError, TradeStore};
pub use wire::{AccountInfoMessage, Command, CommandEnvelope, ExternalTradeMessage, WireError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared across listener tasks is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<CanonicalTrade>();
        require_sync::<CanonicalTrade>();
        require_send::<ExternalTradeMessage>();
        require_sync::<ExternalTradeMessage>();
        require_send::<GatewayEvent>();
        require_sync::<GatewayEvent>();
        require_send::<TradeReconciler>();
        require_sync::<TradeReconciler>();
        require_send::<MemoryTradeStore>();
        require_sync::<MemoryTradeStore>();
        require_send::<JsonlTradeStore>();
        require_sync::<JsonlTradeStore>();
        require_send::<MemorySink>();
        require_sync::<MemorySink>();
    }

    /// The store and sink are reached through trait objects from every listener task.
    #[test]
    fn collaborators_are_object_safe() {
        fn _store(_: &dyn TradeStore) {}
        fn _sink(_: &dyn EventSink) {}
    }
}
