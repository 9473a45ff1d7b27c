//! Event/notification surface.
//!
//! Consumers implement [`EventSink`] (observer) and receive every event the
//! gateway raises. `MemorySink` records events for polling consumers and tests.

use crate::domain::{AccountInfo, CanonicalTrade, ConnectionStatus};
use crate::wire::ExternalTradeMessage;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A trade message was reconciled and persisted.
    TradeReceived {
        message: ExternalTradeMessage,
        trade: CanonicalTrade,
    },
    AccountInfoReceived(AccountInfo),
    ConnectionStatusChanged {
        previous: ConnectionStatus,
        current: ConnectionStatus,
        reason: Option<String>,
    },
    /// User-facing notification (transport failures, terminal errors, liveness loss).
    Notification {
        level: NotificationLevel,
        message: String,
    },
}

impl GatewayEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Notification {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Notification {
            level: NotificationLevel::Warning,
            message: message.into(),
        }
    }
}

/// Observer for gateway events. Called from listener tasks; must not block for long.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: GatewayEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: GatewayEvent) {}
}

/// Records events in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<GatewayEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<GatewayEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<GatewayEvent> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status transitions recorded so far, as `(previous, current)` pairs.
    pub fn status_changes(&self) -> Vec<(ConnectionStatus, ConnectionStatus)> {
        self.snapshot()
            .into_iter()
            .filter_map(|event| match event {
                GatewayEvent::ConnectionStatusChanged {
                    previous, current, ..
                } => Some((previous, current)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: GatewayEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
