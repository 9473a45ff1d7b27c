//! Outbound commands to the terminal.
//!
//! Commands are written to whichever transport is active and are not
//! correlated with replies; anything the terminal sends back comes through
//! the normal inbound dispatch path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tradebridge_core::wire::{Command, CommandEnvelope};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no terminal is connected to the {0} listener")]
    NoPeer(&'static str),

    #[error("failed to encode command: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write command file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a command ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandDelivery {
    /// Queued to this many connected stream peers.
    Peers(usize),
    /// Written to the drop-folder outbox.
    File(PathBuf),
}

// ── Stream peers ─────────────────────────────────────────────────────

struct Peer {
    label: String,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct PeerMap {
    next_id: u64,
    peers: HashMap<u64, Peer>,
}

/// Connected stream clients that accept outbound lines.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    inner: Arc<Mutex<PeerMap>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. It stays registered until the handle is dropped.
    pub fn register(&self, label: impl Into<String>) -> (PeerHandle, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = map.next_id;
        map.next_id += 1;
        map.peers.insert(
            id,
            Peer {
                label: label.into(),
                tx,
            },
        );
        let handle = PeerHandle {
            id,
            registry: self.clone(),
        };
        (handle, rx)
    }

    /// Queue `line` to every peer; returns how many accepted it.
    pub fn broadcast(&self, line: &str) -> usize {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        map.peers.retain(|_, peer| {
            if peer.tx.send(line.to_string()).is_ok() {
                debug!(peer = %peer.label, "command queued");
                delivered += 1;
                true
            } else {
                false
            }
        });
        delivered
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peers
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.peers.remove(&id);
    }
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("peers", &self.len())
            .finish()
    }
}

/// Unregisters its peer on drop.
#[derive(Debug)]
pub struct PeerHandle {
    id: u64,
    registry: PeerRegistry,
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

// ── Drop-folder outbox ───────────────────────────────────────────────

/// Writes each command as its own file, atomically (temp file + rename).
#[derive(Debug)]
pub struct DropOutbox {
    dir: PathBuf,
    seq: AtomicU64,
}

impl DropOutbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(&self, at: DateTime<Utc>) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("cmd-{}-{seq:06}.json", at.format("%Y%m%dT%H%M%S%3fZ"))
    }

    pub async fn write(&self, body: &str, at: DateTime<Utc>) -> Result<PathBuf, CommandError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CommandError::Io { path, source }
        };
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_err(&self.dir))?;

        let final_path = self.dir.join(self.file_name(at));
        let tmp_path = final_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, body)
            .await
            .map_err(io_err(&tmp_path))?;
        if let Err(source) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(CommandError::Io {
                path: final_path,
                source,
            });
        }
        Ok(final_path)
    }
}

// ── Channel ──────────────────────────────────────────────────────────

/// The active transport's outbound side.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Stream transports: TCP writes to every client, the pipe to its one client.
    Peers {
        registry: PeerRegistry,
        transport: &'static str,
    },
    Directory(Arc<DropOutbox>),
}

#[derive(Debug, Clone)]
pub struct CommandChannel {
    outbound: Outbound,
}

impl CommandChannel {
    pub fn new(outbound: Outbound) -> Self {
        Self { outbound }
    }

    /// Build the envelope for `command` and hand it to the transport.
    pub async fn send(
        &self,
        command: &Command,
        parameters: Value,
    ) -> Result<CommandDelivery, CommandError> {
        let now = Utc::now();
        let envelope = CommandEnvelope::new(command, parameters, now);
        let line = envelope.to_line()?;

        let delivery = match &self.outbound {
            Outbound::Peers {
                registry,
                transport,
            } => match registry.broadcast(&line) {
                0 => {
                    warn!(%command, transport = *transport, "command not sent: no connected terminal");
                    return Err(CommandError::NoPeer(*transport));
                }
                n => CommandDelivery::Peers(n),
            },
            Outbound::Directory(outbox) => CommandDelivery::File(outbox.write(&line, now).await?),
        };
        info!(%command, ?delivery, "command sent");
        Ok(delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn peers_receive_one_line_each() {
        let registry = PeerRegistry::new();
        let (_a, mut rx_a) = registry.register("a");
        let (_b, mut rx_b) = registry.register("b");
        let channel = CommandChannel::new(Outbound::Peers {
            registry: registry.clone(),
            transport: "tcp",
        });

        let delivery = channel
            .send(&Command::GetHistory, json!({"days": 7}))
            .await
            .unwrap();
        assert_eq!(delivery, CommandDelivery::Peers(2));

        for rx in [&mut rx_a, &mut rx_b] {
            let line = rx.recv().await.unwrap();
            let envelope: CommandEnvelope = serde_json::from_str(&line).unwrap();
            assert_eq!(envelope.command, "get_history");
            assert_eq!(envelope.parameters, json!({"days": 7}));
        }
    }

    #[tokio::test]
    async fn dropped_handle_unregisters() {
        let registry = PeerRegistry::new();
        let (handle, _rx) = registry.register("solo");
        assert_eq!(registry.len(), 1);
        drop(handle);
        assert!(registry.is_empty());

        let channel = CommandChannel::new(Outbound::Peers {
            registry,
            transport: "pipe",
        });
        assert!(matches!(
            channel.send(&Command::GetOpenTrades, Value::Null).await,
            Err(CommandError::NoPeer("pipe"))
        ));
    }

    #[test]
    fn closed_receivers_are_pruned() {
        let registry = PeerRegistry::new();
        let (_handle, rx) = registry.register("gone");
        drop(rx);
        assert_eq!(registry.broadcast("{}"), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn outbox_writes_complete_files() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Arc::new(DropOutbox::new(dir.path().join("commands")));
        let channel = CommandChannel::new(Outbound::Directory(outbox.clone()));

        let first = channel
            .send(&Command::GetAccountInfo, Value::Null)
            .await
            .unwrap();
        let second = channel
            .send(&Command::Custom("close_all".into()), json!("now"))
            .await
            .unwrap();

        let (CommandDelivery::File(first), CommandDelivery::File(second)) = (first, second) else {
            panic!("expected file deliveries");
        };
        assert_ne!(first, second);
        assert!(first.file_name().unwrap().to_string_lossy().starts_with("cmd-"));

        let body = std::fs::read_to_string(&second).unwrap();
        let envelope: CommandEnvelope = serde_json::from_str(&body).unwrap();
        assert_eq!(envelope.command, "close_all");
        assert_eq!(envelope.parameters, json!({"value": "now"}));

        let leftovers: Vec<_> = std::fs::read_dir(outbox.dir())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
