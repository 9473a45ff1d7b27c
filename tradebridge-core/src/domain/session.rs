//! Connection session vocabulary: transport kinds and the status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which transport a session listens on. Selected once per `Connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Tcp,
    Pipe,
    FileWatch,
}

#[derive(Debug, Error)]
#[error("unknown transport kind '{0}' (expected tcp, pipe or file_watch)")]
pub struct UnknownTransportKind(pub String);

impl FromStr for TransportKind {
    type Err = UnknownTransportKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "pipe" | "named_pipe" | "namedpipe" => Ok(Self::Pipe),
            "file" | "filewatch" | "file_watch" | "file_drop" => Ok(Self::FileWatch),
            _ => Err(UnknownTransportKind(s.to_string())),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tcp => "tcp",
            Self::Pipe => "pipe",
            Self::FileWatch => "file_watch",
        };
        f.write_str(name)
    }
}

/// Status of the single active session.
///
/// `Disconnected → Connecting → Connected → {Disconnected | Error}`. Nothing
/// moves back to `Connected` except a new explicit connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}
