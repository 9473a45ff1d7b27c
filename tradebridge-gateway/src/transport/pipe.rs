//! Pipe listener: one client at a time, newline-delimited messages.
//!
//! On Unix the pipe is a Unix-domain socket; the next client is accepted
//! only after the current one disconnects. On Windows it is a named pipe
//! server instance, recreated after every disconnect.

use std::path::PathBuf;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use super::{RunningTransport, SessionContext, TransportError};
use crate::command::PeerRegistry;

#[derive(Debug, Clone)]
pub struct PipeTransport {
    name: String,
}

impl PipeTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Socket path for a pipe name: the name itself when it looks like a
    /// path, otherwise `<temp>/<name>.sock`.
    pub fn socket_path(&self) -> PathBuf {
        if self.name.contains('/') || self.name.contains(std::path::MAIN_SEPARATOR) {
            PathBuf::from(&self.name)
        } else {
            std::env::temp_dir().join(format!("{}.sock", self.name))
        }
    }

    #[cfg(unix)]
    pub async fn start(self, ctx: SessionContext) -> Result<RunningTransport, TransportError> {
        unix::start(self, ctx).await
    }

    #[cfg(windows)]
    pub async fn start(self, ctx: SessionContext) -> Result<RunningTransport, TransportError> {
        windows::start(self, ctx).await
    }

    #[cfg(not(any(unix, windows)))]
    pub async fn start(self, _ctx: SessionContext) -> Result<RunningTransport, TransportError> {
        Err(TransportError::Unsupported("pipe"))
    }
}

/// Serve one connected client until it disconnects or the session ends.
async fn serve_connection<S>(stream: S, peers: &PeerRegistry, ctx: &SessionContext)
where
    S: AsyncRead + AsyncWrite,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut lines = FramedRead::new(
        read_half,
        LinesCodec::new_with_max_length(ctx.options.max_frame_bytes),
    );
    let mut writer = FramedWrite::new(write_half, LinesCodec::new());
    let (_registration, mut outbound) = peers.register("pipe client");

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            line = lines.next() => match line {
                Some(Ok(text)) => {
                    if text.trim().is_empty() {
                        continue;
                    }
                    ctx.dispatch(text).await;
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(limit = ctx.options.max_frame_bytes, "pipe line exceeds size limit; closing connection");
                    break;
                }
                Some(Err(LinesCodecError::Io(err))) => {
                    warn!(error = %err, "pipe read failed");
                    break;
                }
                None => break,
            },
            Some(line) = outbound.recv() => {
                if let Err(err) = writer.send(line).await {
                    warn!(error = %err, "pipe write failed");
                    break;
                }
            }
        }
    }
    debug!("pipe client session ended");
}

#[cfg(unix)]
mod unix {
    use std::io;
    use std::path::Path;
    use std::time::Duration;

    use tokio::net::UnixListener;
    use tracing::{debug, info, warn};

    use super::{serve_connection, PipeTransport};
    use crate::command::{Outbound, PeerRegistry};
    use crate::transport::{RunningTransport, SessionContext, TransportError};

    const ACCEPT_RETRY: Duration = Duration::from_millis(250);

    fn remove_stale(path: &Path) -> io::Result<()> {
        match std::fs::remove_file(path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    pub(super) async fn start(
        transport: PipeTransport,
        ctx: SessionContext,
    ) -> Result<RunningTransport, TransportError> {
        let path = transport.socket_path();
        let pipe_err = |source| TransportError::Pipe {
            name: transport.name.clone(),
            source,
        };
        remove_stale(&path).map_err(pipe_err)?;
        let listener = UnixListener::bind(&path).map_err(pipe_err)?;
        let endpoint = path.display().to_string();
        info!(%endpoint, "pipe listener bound");

        let peers = PeerRegistry::new();
        let task = tokio::spawn(accept_loop(listener, path.clone(), peers.clone(), ctx));
        Ok(RunningTransport {
            tasks: vec![task],
            outbound: Outbound::Peers {
                registry: peers,
                transport: "pipe",
            },
            local_addr: None,
            endpoint,
            cleanup: Some(path),
        })
    }

    async fn accept_loop(
        listener: UnixListener,
        path: std::path::PathBuf,
        peers: PeerRegistry,
        ctx: SessionContext,
    ) {
        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        info!("pipe client connected");
                        serve_connection(stream, &peers, &ctx).await;
                        info!("pipe client disconnected");
                    }
                    Err(err) => {
                        warn!(error = %err, "pipe accept failed");
                        tokio::select! {
                            _ = ctx.cancel.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_RETRY) => {}
                        }
                    }
                },
            }
        }
        drop(listener);
        if let Err(err) = remove_stale(&path) {
            warn!(path = %path.display(), error = %err, "failed to remove socket file");
        }
        debug!("pipe accept loop stopped");
    }
}

#[cfg(windows)]
mod windows {
    use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
    use tracing::{debug, info, warn};

    use super::{serve_connection, PipeTransport};
    use crate::command::{Outbound, PeerRegistry};
    use crate::transport::{RunningTransport, SessionContext, TransportError};

    fn pipe_address(name: &str) -> String {
        if name.starts_with(r"\\") {
            name.to_string()
        } else {
            format!(r"\\.\pipe\{name}")
        }
    }

    pub(super) async fn start(
        transport: PipeTransport,
        ctx: SessionContext,
    ) -> Result<RunningTransport, TransportError> {
        let address = pipe_address(&transport.name);
        let server = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&address)
            .map_err(|source| TransportError::Pipe {
                name: transport.name.clone(),
                source,
            })?;
        info!(endpoint = %address, "named pipe created");

        let peers = PeerRegistry::new();
        let task = tokio::spawn(serve_loop(server, address.clone(), peers.clone(), ctx));
        Ok(RunningTransport {
            tasks: vec![task],
            outbound: Outbound::Peers {
                registry: peers,
                transport: "pipe",
            },
            local_addr: None,
            endpoint: address,
            cleanup: None,
        })
    }

    async fn serve_loop(
        mut server: NamedPipeServer,
        address: String,
        peers: PeerRegistry,
        ctx: SessionContext,
    ) {
        loop {
            let connected = tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                res = server.connect() => res,
            };
            match connected {
                Ok(()) => {
                    info!("pipe client connected");
                    serve_connection(server, &peers, &ctx).await;
                    info!("pipe client disconnected");
                }
                Err(err) => warn!(error = %err, "pipe connect failed"),
            }
            if ctx.cancel.is_cancelled() {
                break;
            }
            // Instances are single-use.
            server = match ServerOptions::new().create(&address) {
                Ok(next) => next,
                Err(err) => {
                    ctx.fail(format!("failed to recreate pipe {address}: {err}"));
                    break;
                }
            };
        }
        debug!("pipe serve loop stopped");
    }
}
