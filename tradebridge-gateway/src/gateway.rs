//! The gateway: owns the single active session.
//!
//! `connect` tears down any current session, starts the selected transport
//! and the health monitor, and moves the status through
//! `Connecting → Connected` (or `Error` when the transport cannot start).
//! `disconnect` cancels the session token and joins every background task
//! within the configured join timeout, aborting stragglers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tradebridge_core::wire::Command;
use tradebridge_core::{
    ConnectionStatus, EventSink, GatewayEvent, TradeReconciler, TradeStore, TransportKind,
};

use crate::command::{CommandChannel, CommandDelivery, CommandError};
use crate::config::{GatewayOptions, TransportConfig};
use crate::dispatcher::{DispatchOutcome, MessageDispatcher};
use crate::health::{ConnectionHealthMonitor, StatusCell, TrafficClock};
use crate::transport::{SessionContext, Transport, TransportError};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("not connected")]
    NotConnected,
}

/// Read-mostly facts about the active session.
#[derive(Debug, Clone)]
struct SessionInfo {
    kind: TransportKind,
    endpoint: String,
    local_addr: Option<SocketAddr>,
}

struct Session {
    info: SessionInfo,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    commands: CommandChannel,
    cleanup: Option<PathBuf>,
}

pub struct Gateway {
    options: GatewayOptions,
    events: Arc<dyn EventSink>,
    status: Arc<StatusCell>,
    traffic: Arc<TrafficClock>,
    dispatcher: Arc<MessageDispatcher>,
    session: tokio::sync::Mutex<Option<Session>>,
    info: Mutex<Option<SessionInfo>>,
}

impl Gateway {
    pub fn new(
        options: GatewayOptions,
        store: Arc<dyn TradeStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let traffic = Arc::new(TrafficClock::new());
        let reconciler = Arc::new(TradeReconciler::new(store, events.clone()));
        let dispatcher = Arc::new(MessageDispatcher::new(
            reconciler,
            events.clone(),
            traffic.clone(),
        ));
        Self {
            options,
            status: Arc::new(StatusCell::new(events.clone())),
            events,
            traffic,
            dispatcher,
            session: tokio::sync::Mutex::new(None),
            info: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.read_info(|info| info.kind)
    }

    /// Bound address of the TCP listener; useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.read_info(|info| info.local_addr).flatten()
    }

    pub fn endpoint(&self) -> Option<String> {
        self.read_info(|info| info.endpoint.clone())
    }

    pub fn store(&self) -> &Arc<dyn TradeStore> {
        self.dispatcher.reconciler().store()
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    fn read_info<T>(&self, f: impl FnOnce(&SessionInfo) -> T) -> Option<T> {
        self.info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(f)
    }

    fn set_info(&self, info: Option<SessionInfo>) {
        *self.info.lock().unwrap_or_else(PoisonError::into_inner) = info;
    }

    /// Inject a raw message through the same path the transports use.
    pub fn process_message(&self, raw: &str) -> DispatchOutcome {
        self.dispatcher.process_message(raw)
    }

    /// Start a session on `config`, replacing any active one.
    pub async fn connect(&self, config: TransportConfig) -> Result<(), GatewayError> {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            info!(endpoint = %previous.info.endpoint, "replacing active session");
            self.teardown(previous).await;
        }

        let endpoint = config.endpoint();
        self.status.set(
            ConnectionStatus::Connecting,
            Some(format!("{} {endpoint}", config.kind())),
        );

        let transport = match Transport::from_config(&config, &self.options) {
            Ok(transport) => transport,
            Err(err) => return Err(self.connect_failed(err)),
        };
        let kind = transport.kind();
        let cancel = CancellationToken::new();
        let ctx = SessionContext {
            dispatcher: self.dispatcher.clone(),
            status: self.status.clone(),
            events: self.events.clone(),
            cancel: cancel.clone(),
            options: self.options.clone(),
        };

        let running = match transport.start(ctx).await {
            Ok(running) => running,
            Err(err) => {
                cancel.cancel();
                return Err(self.connect_failed(err));
            }
        };

        self.traffic.touch();
        let mut tasks = running.tasks;
        tasks.push(
            ConnectionHealthMonitor::new(
                self.traffic.clone(),
                self.status.clone(),
                self.events.clone(),
                self.options.health.clone(),
            )
            .spawn(cancel.clone()),
        );

        let info = SessionInfo {
            kind,
            endpoint: running.endpoint,
            local_addr: running.local_addr,
        };
        self.set_info(Some(info.clone()));
        self.status.set(
            ConnectionStatus::Connected,
            Some(format!("{kind} listening on {}", info.endpoint)),
        );
        *session = Some(Session {
            info,
            cancel,
            tasks,
            commands: CommandChannel::new(running.outbound),
            cleanup: running.cleanup,
        });
        Ok(())
    }

    fn connect_failed(&self, err: TransportError) -> GatewayError {
        error!(error = %err, "connect failed");
        self.status
            .set(ConnectionStatus::Error, Some(err.to_string()));
        self.events
            .publish(GatewayEvent::error(format!("connect failed: {err}")));
        err.into()
    }

    /// Stop the active session, if any. Status ends `Disconnected`.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(active) = session.take() {
            self.teardown(active).await;
        }
        self.status.set(
            ConnectionStatus::Disconnected,
            Some("disconnected by request".into()),
        );
    }

    async fn teardown(&self, session: Session) {
        self.set_info(None);
        session.cancel.cancel();
        let deadline = Instant::now() + self.options.join_timeout;
        for mut task in session.tasks {
            match timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_panic() => {
                    error!(error = %err, "session task panicked")
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("session task did not stop within the join timeout; aborting");
                    task.abort();
                }
            }
        }
        if let Some(path) = session.cleanup {
            match std::fs::remove_file(&path) {
                Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), error = %err, "failed to remove socket file")
                }
                _ => {}
            }
        }
        debug!(endpoint = %session.info.endpoint, "session torn down");
    }

    /// Send a command over the active transport. Replies are not correlated;
    /// they arrive as ordinary inbound messages.
    pub async fn send_command(
        &self,
        command: &Command,
        parameters: Value,
    ) -> Result<CommandDelivery, GatewayError> {
        let channel = {
            let session = self.session.lock().await;
            match session.as_ref() {
                Some(active) => active.commands.clone(),
                None => return Err(GatewayError::NotConnected),
            }
        };
        Ok(channel.send(command, parameters).await?)
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(active) = self.session.get_mut().take() {
            active.cancel.cancel();
            for task in &active.tasks {
                task.abort();
            }
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("status", &self.status())
            .field("transport", &self.transport_kind())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradebridge_core::{MemorySink, MemoryTradeStore};

    fn gateway() -> (Gateway, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let gateway = Gateway::new(
            GatewayOptions::default(),
            Arc::new(MemoryTradeStore::new()),
            sink.clone(),
        );
        (gateway, sink)
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let (gateway, _) = gateway();
        assert_eq!(gateway.status(), ConnectionStatus::Disconnected);
        assert_eq!(gateway.transport_kind(), None);
        assert!(matches!(
            gateway.send_command(&Command::GetOpenTrades, Value::Null).await,
            Err(GatewayError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn connect_and_disconnect_tcp() {
        let (gateway, sink) = gateway();
        gateway
            .connect(TransportConfig::Tcp {
                address: "127.0.0.1:0".into(),
            })
            .await
            .unwrap();
        assert_eq!(gateway.status(), ConnectionStatus::Connected);
        assert_eq!(gateway.transport_kind(), Some(TransportKind::Tcp));
        assert!(gateway.local_addr().unwrap().port() > 0);

        gateway.disconnect().await;
        assert_eq!(gateway.status(), ConnectionStatus::Disconnected);
        assert_eq!(gateway.local_addr(), None);
        assert_eq!(
            sink.status_changes(),
            vec![
                (ConnectionStatus::Disconnected, ConnectionStatus::Connecting),
                (ConnectionStatus::Connecting, ConnectionStatus::Connected),
                (ConnectionStatus::Connected, ConnectionStatus::Disconnected),
            ]
        );
    }

    #[tokio::test]
    async fn missing_directory_fails_connect() {
        let (gateway, sink) = gateway();
        let dir = tempfile::tempdir().unwrap();
        let err = gateway
            .connect(TransportConfig::FileWatch {
                directory: dir.path().join("absent"),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Transport(TransportError::Watch { .. })
        ));
        assert_eq!(gateway.status(), ConnectionStatus::Error);
        assert!(sink
            .snapshot()
            .iter()
            .any(|e| matches!(e, GatewayEvent::Notification { .. })));
    }

    #[tokio::test]
    async fn process_message_uses_dispatch_path() {
        let (gateway, _) = gateway();
        let outcome = gateway.process_message(
            r#"{"type":"trade_open","trade":{"ticket":3,"symbol":"XAUUSD","type":1}}"#,
        );
        assert!(matches!(outcome, DispatchOutcome::Trade { .. }));
        assert_eq!(gateway.store().count().unwrap(), 1);
    }
}
