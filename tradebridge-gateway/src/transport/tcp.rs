//! TCP listener: any number of concurrent clients, each on its own task.

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, info, warn};

use super::{RunningTransport, SessionContext, TransportError};
use crate::codec::JsonFrameCodec;
use crate::command::{Outbound, PeerRegistry};

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(50);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: SocketAddrV4,
}

impl TcpTransport {
    pub fn new(addr: SocketAddrV4) -> Self {
        Self { addr }
    }

    pub async fn start(self, ctx: SessionContext) -> Result<RunningTransport, TransportError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| TransportError::Bind {
                endpoint: self.addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().ok();
        let endpoint = local_addr.map_or_else(|| self.addr.to_string(), |a| a.to_string());
        info!(%endpoint, "tcp listener bound");

        let peers = PeerRegistry::new();
        let task = tokio::spawn(accept_loop(listener, peers.clone(), ctx));
        Ok(RunningTransport {
            tasks: vec![task],
            outbound: Outbound::Peers {
                registry: peers,
                transport: "tcp",
            },
            local_addr,
            endpoint,
            cleanup: None,
        })
    }
}

async fn accept_loop(listener: TcpListener, peers: PeerRegistry, ctx: SessionContext) {
    let mut clients = JoinSet::new();
    let mut backoff = ACCEPT_BACKOFF_MIN;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    backoff = ACCEPT_BACKOFF_MIN;
                    info!(%peer, "client connected");
                    clients.spawn(serve_client(stream, peer, peers.clone(), ctx.clone()));
                }
                Err(err) => {
                    warn!(error = %err, retry_ms = backoff.as_millis() as u64, "accept failed");
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                }
            },
            Some(joined) = clients.join_next(), if !clients.is_empty() => {
                if let Err(err) = joined {
                    if err.is_panic() {
                        error!(error = %err, "client task panicked");
                    }
                }
            }
        }
    }

    // Clients observe the same token.
    while clients.join_next().await.is_some() {}
    debug!("tcp accept loop stopped");
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    peers: PeerRegistry,
    ctx: SessionContext,
) {
    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, JsonFrameCodec::new(ctx.options.max_frame_bytes));
    let mut writer = FramedWrite::new(write_half, LinesCodec::new());
    let (_registration, mut outbound) = peers.register(peer.to_string());

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(text)) => {
                    debug!(%peer, bytes = text.len(), "frame received");
                    ctx.dispatch(text).await;
                }
                Some(Err(err)) => {
                    warn!(%peer, error = %err, "read failed");
                    break;
                }
                None => break,
            },
            Some(line) = outbound.recv() => {
                if let Err(err) = writer.send(line).await {
                    warn!(%peer, error = %err, "write failed");
                    break;
                }
            }
        }
    }
    info!(%peer, "client disconnected");
}
