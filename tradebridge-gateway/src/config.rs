//! Gateway configuration (TOML).
//!
//! Every section has defaults, so an empty file is a valid in-memory
//! configuration that still needs a transport at connect time.

use serde::{Deserialize, Serialize};
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tradebridge_core::domain::{TransportKind, UnknownTransportKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    UnknownTransport(#[from] UnknownTransportKind),

    #[error("invalid tcp address '{value}': expected \"<ipv4>:<port>\"")]
    InvalidAddress { value: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Which transport to listen on, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    Tcp { address: String },
    Pipe { name: String },
    FileWatch { directory: PathBuf },
}

impl TransportConfig {
    /// Build from a transport kind and its connection string:
    /// `"<ip>:<port>"` for TCP, a pipe name, or a directory path.
    pub fn from_parts(kind: TransportKind, connection_string: &str) -> Result<Self, ConfigError> {
        let value = connection_string.trim();
        if value.is_empty() {
            return Err(ConfigError::Invalid {
                field: "connection string",
                reason: "must not be empty".into(),
            });
        }
        let config = match kind {
            TransportKind::Tcp => Self::Tcp {
                address: value.to_string(),
            },
            TransportKind::Pipe => Self::Pipe {
                name: value.to_string(),
            },
            TransportKind::FileWatch => Self::FileWatch {
                directory: PathBuf::from(value),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Tcp { .. } => TransportKind::Tcp,
            Self::Pipe { .. } => TransportKind::Pipe,
            Self::FileWatch { .. } => TransportKind::FileWatch,
        }
    }

    /// Human-readable endpoint for logs and status reasons.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Tcp { address } => address.clone(),
            Self::Pipe { name } => name.clone(),
            Self::FileWatch { directory } => directory.display().to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Tcp { address } => parse_tcp_address(address).map(|_| ()),
            Self::Pipe { name } if name.trim().is_empty() => Err(ConfigError::Invalid {
                field: "transport.name",
                reason: "pipe name must not be empty".into(),
            }),
            Self::FileWatch { directory } if directory.as_os_str().is_empty() => {
                Err(ConfigError::Invalid {
                    field: "transport.directory",
                    reason: "directory must not be empty".into(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Parse `"<ipv4-address>:<port>"`.
pub fn parse_tcp_address(value: &str) -> Result<SocketAddrV4, ConfigError> {
    value
        .trim()
        .parse::<SocketAddrV4>()
        .map_err(|_| ConfigError::InvalidAddress {
            value: value.to_string(),
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub check_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDropSection {
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
    /// Sub-directory of the watched directory that receives outbound commands.
    pub outbox: String,
}

impl Default for FileDropSection {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            poll_interval_ms: 250,
            outbox: "commands".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// JSONL journal path; in-memory store when absent.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub filter: String,
    /// Optional JSON log file, in addition to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            file: None,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub transport: Option<TransportConfig>,
    pub health: HealthSection,
    pub file_drop: FileDropSection,
    pub store: StoreSection,
    pub logging: LoggingSection,
    pub join_timeout_ms: u64,
    pub max_frame_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            transport: None,
            health: HealthSection::default(),
            file_drop: FileDropSection::default(),
            store: StoreSection::default(),
            logging: LoggingSection::default(),
            join_timeout_ms: 5_000,
            max_frame_bytes: 4 * 1024 * 1024,
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(transport) = &self.transport {
            transport.validate()?;
        }
        if self.health.check_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "health.check_interval_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.health.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "health.timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.file_drop.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "file_drop.poll_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        let outbox = self.file_drop.outbox.trim();
        if outbox.is_empty() || outbox == "." || Path::new(outbox).is_absolute() {
            return Err(ConfigError::Invalid {
                field: "file_drop.outbox",
                reason: "must be a relative sub-directory name".into(),
            });
        }
        if self.max_frame_bytes < 1024 {
            return Err(ConfigError::Invalid {
                field: "max_frame_bytes",
                reason: "must be at least 1024".into(),
            });
        }
        Ok(())
    }

    /// Runtime settings derived from the file.
    pub fn options(&self) -> GatewayOptions {
        GatewayOptions {
            health: HealthSettings {
                check_interval: Duration::from_secs(self.health.check_interval_secs),
                timeout: Duration::from_secs(self.health.timeout_secs),
            },
            file_drop: FileDropSettings {
                debounce: Duration::from_millis(self.file_drop.debounce_ms),
                poll_interval: Duration::from_millis(self.file_drop.poll_interval_ms),
                outbox: PathBuf::from(self.file_drop.outbox.trim()),
            },
            join_timeout: Duration::from_millis(self.join_timeout_ms),
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSettings {
    pub check_interval: Duration,
    pub timeout: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDropSettings {
    pub debounce: Duration,
    pub poll_interval: Duration,
    pub outbox: PathBuf,
}

impl Default for FileDropSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            poll_interval: Duration::from_millis(250),
            outbox: PathBuf::from("commands"),
        }
    }
}

/// Runtime settings for a gateway instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOptions {
    pub health: HealthSettings,
    pub file_drop: FileDropSettings,
    /// Upper bound on joining background tasks at disconnect.
    pub join_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        GatewayConfig::default().options()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = GatewayConfig::from_toml("").unwrap();
        assert_eq!(config, GatewayConfig::default());
        let options = config.options();
        assert_eq!(options.health.check_interval, Duration::from_secs(30));
        assert_eq!(options.health.timeout, Duration::from_secs(120));
        assert_eq!(options.join_timeout, Duration::from_secs(5));
    }

    #[test]
    fn full_file() {
        let toml = r#"
join_timeout_ms = 2000

[transport]
kind = "tcp"
address = "127.0.0.1:5555"

[health]
check_interval_secs = 10
timeout_secs = 45

[file_drop]
debounce_ms = 300

[store]
path = "data/ledger.jsonl"

[logging]
filter = "debug,tradebridge_gateway=trace"
"#;
        let config = GatewayConfig::from_toml(toml).unwrap();
        assert_eq!(
            config.transport,
            Some(TransportConfig::Tcp {
                address: "127.0.0.1:5555".into()
            })
        );
        assert_eq!(config.health.timeout_secs, 45);
        assert_eq!(config.file_drop.debounce_ms, 300);
        assert_eq!(config.file_drop.poll_interval_ms, 250);
        assert_eq!(config.store.path, Some(PathBuf::from("data/ledger.jsonl")));
        assert_eq!(config.options().join_timeout, Duration::from_secs(2));
    }

    #[test]
    fn file_watch_transport_section() {
        let toml = r#"
[transport]
kind = "file_watch"
directory = "/var/spool/terminal"
"#;
        let config = GatewayConfig::from_toml(toml).unwrap();
        assert_eq!(
            config.transport.unwrap().kind(),
            TransportKind::FileWatch
        );
    }

    #[test]
    fn bad_tcp_address_is_rejected() {
        let toml = r#"
[transport]
kind = "tcp"
address = "localhost"
"#;
        assert!(matches!(
            GatewayConfig::from_toml(toml),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn from_parts_parses_connection_strings() {
        let tcp = TransportConfig::from_parts(TransportKind::Tcp, "0.0.0.0:7000").unwrap();
        assert_eq!(tcp.kind(), TransportKind::Tcp);
        assert!(TransportConfig::from_parts(TransportKind::Tcp, "::1:7000").is_err());
        assert!(TransportConfig::from_parts(TransportKind::Pipe, "  ").is_err());
        let pipe = TransportConfig::from_parts(TransportKind::Pipe, "mt4bridge").unwrap();
        assert_eq!(pipe.endpoint(), "mt4bridge");
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let toml = "[health]\ncheck_interval_secs = 0\n";
        assert!(matches!(
            GatewayConfig::from_toml(toml),
            Err(ConfigError::Invalid {
                field: "health.check_interval_secs",
                ..
            })
        ));
    }

    #[test]
    fn outbox_must_be_a_subdirectory() {
        let toml = "[file_drop]\noutbox = \".\"\n";
        assert!(GatewayConfig::from_toml(toml).is_err());
    }
}
