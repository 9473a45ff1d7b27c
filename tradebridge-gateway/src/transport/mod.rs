//! Transport listeners.
//!
//! The three transports are a closed set selected once from configuration.
//! Each binds inside `start`, so bind failures come back to the caller, then
//! runs its receive loop on background tasks until the session's
//! cancellation token fires.

pub mod file_drop;
pub mod pipe;
pub mod tcp;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use tradebridge_core::{ConnectionStatus, EventSink, GatewayEvent, TransportKind};

use crate::command::Outbound;
use crate::config::{parse_tcp_address, ConfigError, GatewayOptions, TransportConfig};
use crate::dispatcher::{DispatchOutcome, MessageDispatcher};
use crate::health::StatusCell;

pub use file_drop::FileDropTransport;
pub use pipe::PipeTransport;
pub use tcp::TcpTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create pipe '{name}': {source}")]
    Pipe {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} transport is not supported on this platform")]
    Unsupported(&'static str),
}

/// Everything a running transport needs from the session that owns it.
#[derive(Clone)]
pub struct SessionContext {
    pub dispatcher: Arc<MessageDispatcher>,
    pub status: Arc<StatusCell>,
    pub events: Arc<dyn EventSink>,
    pub cancel: CancellationToken,
    pub options: GatewayOptions,
}

impl SessionContext {
    /// Run one frame through the dispatcher on the blocking pool. Awaiting
    /// it keeps frames from one connection in order; a panic is contained
    /// to this frame.
    pub async fn dispatch(&self, frame: String) -> Option<DispatchOutcome> {
        let dispatcher = self.dispatcher.clone();
        match tokio::task::spawn_blocking(move || dispatcher.process_message(&frame)).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                error!(error = %err, "dispatch task failed");
                None
            }
        }
    }

    /// Mark the session failed and tell the user.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(%reason, "transport failed");
        self.status.set(ConnectionStatus::Error, Some(reason.clone()));
        self.events.publish(GatewayEvent::error(reason));
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// A started transport: its background tasks and outbound side.
#[derive(Debug)]
pub struct RunningTransport {
    pub tasks: Vec<JoinHandle<()>>,
    pub outbound: Outbound,
    /// Bound socket address (TCP only).
    pub local_addr: Option<SocketAddr>,
    pub endpoint: String,
    /// Filesystem entry to remove at teardown (Unix socket path).
    pub cleanup: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum Transport {
    Tcp(TcpTransport),
    Pipe(PipeTransport),
    FileDrop(FileDropTransport),
}

impl Transport {
    pub fn from_config(
        config: &TransportConfig,
        options: &GatewayOptions,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        Ok(match config {
            TransportConfig::Tcp { address } => Self::Tcp(TcpTransport::new(parse_tcp_address(address)?)),
            TransportConfig::Pipe { name } => Self::Pipe(PipeTransport::new(name.trim())),
            TransportConfig::FileWatch { directory } => Self::FileDrop(FileDropTransport::new(
                directory.clone(),
                options.file_drop.clone(),
            )),
        })
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Tcp(_) => TransportKind::Tcp,
            Self::Pipe(_) => TransportKind::Pipe,
            Self::FileDrop(_) => TransportKind::FileWatch,
        }
    }

    pub async fn start(self, ctx: SessionContext) -> Result<RunningTransport, TransportError> {
        match self {
            Self::Tcp(t) => t.start(ctx).await,
            Self::Pipe(t) => t.start(ctx).await,
            Self::FileDrop(t) => t.start(ctx).await,
        }
    }
}
