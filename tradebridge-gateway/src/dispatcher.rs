//! Inbound message routing.
//!
//! Each raw frame is parsed as a JSON envelope and routed on its `type`:
//! - `trade_open` / `trade_close` / `trade_modify`: one trade handler; the
//!   close time inside the trade object decides the status, not the tag
//! - `history`: each element of `trades` goes through the trade handler, in order
//! - `account_info`: mapped and published as `AccountInfoReceived`
//! - `heartbeat`: no effect beyond the traffic refresh every frame gets
//! - `error`: logged and published as an error notification
//! - anything else: logged and dropped
//!
//! Failures are contained to the message that caused them.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use tradebridge_core::wire::{parse_envelope, Envelope, MessageType};
use tradebridge_core::{
    AccountInfoMessage, EventSink, ExternalTradeMessage, GatewayEvent, ReconcileError, Ticket,
    TradeReconciler, TradeStatus, WireError,
};

use crate::health::TrafficClock;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// What a single frame amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Trade { ticket: Ticket, status: TradeStatus },
    History { applied: usize, failed: usize },
    AccountInfo,
    Heartbeat,
    TerminalError,
    /// Unknown discriminator, dropped.
    Ignored(String),
    /// Parse or mapping failure; nothing was changed.
    Rejected,
}

pub struct MessageDispatcher {
    reconciler: Arc<TradeReconciler>,
    events: Arc<dyn EventSink>,
    traffic: Arc<TrafficClock>,
}

impl MessageDispatcher {
    pub fn new(
        reconciler: Arc<TradeReconciler>,
        events: Arc<dyn EventSink>,
        traffic: Arc<TrafficClock>,
    ) -> Self {
        Self {
            reconciler,
            events,
            traffic,
        }
    }

    pub fn reconciler(&self) -> &Arc<TradeReconciler> {
        &self.reconciler
    }

    pub fn traffic(&self) -> &Arc<TrafficClock> {
        &self.traffic
    }

    /// Process one raw frame. Never fails: errors are logged and the frame
    /// is dropped.
    pub fn process_message(&self, raw: &str) -> DispatchOutcome {
        self.traffic.touch();
        match self.route(raw) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, preview = %preview(raw), "message rejected");
                DispatchOutcome::Rejected
            }
        }
    }

    fn route(&self, raw: &str) -> Result<DispatchOutcome, DispatchError> {
        let envelope = parse_envelope(raw)?;
        let outcome = match &envelope.message_type {
            MessageType::TradeOpen | MessageType::TradeClose | MessageType::TradeModify => {
                let (ticket, status) = self.handle_trade(envelope.trade_object()?)?;
                DispatchOutcome::Trade { ticket, status }
            }
            MessageType::History => self.handle_history(&envelope)?,
            MessageType::AccountInfo => {
                self.handle_account_info(&envelope)?;
                DispatchOutcome::AccountInfo
            }
            MessageType::Heartbeat => {
                debug!("heartbeat");
                DispatchOutcome::Heartbeat
            }
            MessageType::Error => {
                let text = envelope.error_text();
                warn!(message = %text, "terminal reported an error");
                self.events
                    .publish(GatewayEvent::error(format!("terminal error: {text}")));
                DispatchOutcome::TerminalError
            }
            MessageType::Other(tag) => {
                info!(message_type = %tag, "unrecognized message type; dropped");
                DispatchOutcome::Ignored(tag.clone())
            }
        };
        Ok(outcome)
    }

    fn handle_trade(&self, value: &Value) -> Result<(Ticket, TradeStatus), DispatchError> {
        let msg = ExternalTradeMessage::from_value(value)?;
        let trade = self.reconciler.upsert_from_external(&msg)?;
        Ok((trade.ticket, trade.status))
    }

    fn handle_history(&self, envelope: &Envelope) -> Result<DispatchOutcome, DispatchError> {
        let items = envelope.history_trades()?;
        let mut applied = 0;
        let mut failed = 0;
        for (index, item) in items.iter().enumerate() {
            match self.handle_trade(item) {
                Ok(_) => applied += 1,
                Err(err) => {
                    failed += 1;
                    warn!(index, error = %err, "history entry rejected");
                }
            }
        }
        info!(entries = items.len(), applied, failed, "history batch processed");
        Ok(DispatchOutcome::History { applied, failed })
    }

    fn handle_account_info(&self, envelope: &Envelope) -> Result<(), DispatchError> {
        // Flat fields next to `type`, or nested under `account`.
        let msg = match envelope.field("account") {
            Some(Value::Object(nested)) => AccountInfoMessage::from_fields(nested)?,
            _ => AccountInfoMessage::from_fields(&envelope.fields)?,
        };
        let info = msg.to_account_info(Utc::now())?;
        debug!(
            account = info.account_number,
            balance = %info.balance,
            equity = %info.equity,
            "account info received"
        );
        self.events.publish(GatewayEvent::AccountInfoReceived(info));
        Ok(())
    }
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

fn preview(raw: &str) -> String {
    const MAX: usize = 120;
    match raw.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}…", &raw[..cut]),
        None => raw.to_string(),
    }
}
