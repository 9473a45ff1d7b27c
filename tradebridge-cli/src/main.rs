//! TradeBridge CLI: run the gateway and inspect its ledger.
//!
//! Commands:
//! - `listen`: start the gateway on a transport, log every event, and send
//!   commands typed on stdin (`get_open_trades`, `get_history`,
//!   `get_account_info`, or `<name> <json-params>`)
//! - `ledger`: print the reconciled trades from a JSONL store
//! - `check-config`: parse and validate a configuration file

mod telemetry;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use tradebridge_core::wire::Command;
use tradebridge_core::{
    CanonicalTrade, GatewayEvent, JsonlTradeStore, MemoryTradeStore, NotificationLevel,
    TradeStore, TransportKind,
};
use tradebridge_gateway::{BroadcastSink, Gateway, GatewayConfig, TransportConfig};

#[derive(Parser)]
#[command(
    name = "tradebridge",
    about = "TradeBridge: trading-terminal ingestion gateway"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway and listen for terminal messages.
    Listen {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Transport kind: tcp, pipe, file_watch. Overrides the config file.
        #[arg(long, requires = "address")]
        transport: Option<String>,

        /// Connection string: "<ip>:<port>", a pipe name, or a directory.
        #[arg(long, requires = "transport")]
        address: Option<String>,

        /// JSONL ledger file. Overrides the config file; in-memory when absent.
        #[arg(long)]
        store: Option<PathBuf>,

        /// Ignore stdin; stop only on Ctrl-C.
        #[arg(long, default_value_t = false)]
        no_stdin: bool,
    },
    /// Print the reconciled ledger.
    Ledger {
        /// JSONL ledger file written by `listen --store`.
        #[arg(long)]
        store: PathBuf,

        /// Only show open trades.
        #[arg(long, default_value_t = false)]
        open_only: bool,
    },
    /// Parse and validate a config file.
    CheckConfig {
        /// Path to the TOML config file.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Listen {
            config,
            transport,
            address,
            store,
            no_stdin,
        } => run_listen(config, transport, address, store, no_stdin).await,
        Commands::Ledger { store, open_only } => {
            telemetry::init_tracing("warn", None)?;
            run_ledger(&store, open_only)
        }
        Commands::CheckConfig { file } => run_check_config(&file),
    }
}

async fn run_listen(
    config_path: Option<PathBuf>,
    transport: Option<String>,
    address: Option<String>,
    store_path: Option<PathBuf>,
    no_stdin: bool,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    if let (Some(kind), Some(address)) = (transport, address) {
        let kind: TransportKind = kind.parse()?;
        config.transport = Some(TransportConfig::from_parts(kind, &address)?);
    }
    if store_path.is_some() {
        config.store.path = store_path;
    }

    telemetry::init_tracing(&config.logging.filter, config.logging.file.as_deref())?;

    let Some(transport) = config.transport.clone() else {
        bail!("no transport configured: pass --config with a [transport] section, or --transport and --address");
    };

    let store: Arc<dyn TradeStore> = match &config.store.path {
        Some(path) => {
            let store = JsonlTradeStore::open(path)
                .with_context(|| format!("failed to open ledger {}", path.display()))?;
            info!(path = %path.display(), trades = store.count()?, "ledger opened");
            Arc::new(store)
        }
        None => {
            warn!("no store configured; trades are kept in memory only");
            Arc::new(MemoryTradeStore::new())
        }
    };

    let sink = BroadcastSink::new(1024);
    let log_task = tokio::spawn(log_events(sink.subscribe()));
    let gateway = Gateway::new(config.options(), store, Arc::new(sink));
    gateway.connect(transport).await?;
    if let Some(addr) = gateway.local_addr() {
        info!(%addr, "accepting terminal connections");
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = !no_stdin;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => send_line(&gateway, &line).await,
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "stdin read failed; ignoring further input");
                    stdin_open = false;
                }
            },
        }
    }

    gateway.disconnect().await;
    drop(gateway);
    // The sink's sender lives in the gateway; the log task ends once it is dropped.
    let _ = tokio::time::timeout(Duration::from_secs(1), log_task).await;
    Ok(())
}

/// `<name> [json-params]`
fn parse_command_line(line: &str) -> Result<Option<(Command, Value)>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (name, rest) = line
        .split_once(char::is_whitespace)
        .unwrap_or((line, ""));
    let params = match rest.trim() {
        "" => Value::Null,
        text => serde_json::from_str(text)
            .with_context(|| format!("parameters for '{name}' are not valid JSON"))?,
    };
    Ok(Some((Command::parse(name), params)))
}

async fn send_line(gateway: &Gateway, line: &str) {
    let (command, params) = match parse_command_line(line) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => return,
        Err(err) => {
            warn!(error = %err, "ignoring command");
            return;
        }
    };
    match gateway.send_command(&command, params).await {
        Ok(delivery) => info!(%command, ?delivery, "command delivered"),
        Err(err) => warn!(%command, error = %err, "command failed"),
    }
}

async fn log_events(mut rx: broadcast::Receiver<GatewayEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => log_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &GatewayEvent) {
    match event {
        GatewayEvent::TradeReceived { trade, .. } => info!(
            ticket = %trade.ticket,
            symbol = %trade.symbol,
            direction = %trade.direction,
            status = %trade.status,
            profit = %trade.profit_loss,
            "trade"
        ),
        GatewayEvent::AccountInfoReceived(account) => info!(
            account = account.account_number,
            balance = %account.balance,
            equity = %account.equity,
            currency = %account.currency,
            "account"
        ),
        GatewayEvent::ConnectionStatusChanged {
            previous,
            current,
            reason,
        } => info!(
            %previous,
            %current,
            reason = reason.as_deref().unwrap_or(""),
            "connection"
        ),
        GatewayEvent::Notification { level, message } => match level {
            NotificationLevel::Info => info!(%message, "notification"),
            NotificationLevel::Warning => warn!(%message, "notification"),
            NotificationLevel::Error => error!(%message, "notification"),
        },
    }
}

fn run_ledger(path: &Path, open_only: bool) -> Result<()> {
    if !path.exists() {
        bail!("ledger file not found: {}", path.display());
    }
    let store = JsonlTradeStore::open(path)
        .with_context(|| format!("failed to open ledger {}", path.display()))?;
    let trades: Vec<CanonicalTrade> = store
        .all()?
        .into_iter()
        .filter(|t| !open_only || !t.is_closed())
        .collect();

    println!(
        "{:<12} {:<10} {:<5} {:<7} {:>8} {:>12} {:>12} {:>12} {:>9}",
        "TICKET", "SYMBOL", "SIDE", "STATUS", "VOLUME", "ENTRY", "EXIT", "P/L", "MOVE %"
    );
    for t in &trades {
        println!(
            "{:<12} {:<10} {:<5} {:<7} {:>8} {:>12} {:>12} {:>12} {:>9}",
            t.ticket.as_str(),
            t.symbol,
            t.direction.to_string(),
            t.status.to_string(),
            t.volume.to_string(),
            t.entry_price.to_string(),
            t.exit_price.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            t.net_profit().to_string(),
            t.profit_loss_pct
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".into()),
        );
    }

    let open = trades.iter().filter(|t| !t.is_closed()).count();
    let realized: rust_decimal::Decimal = trades
        .iter()
        .filter(|t| t.is_closed())
        .map(CanonicalTrade::net_profit)
        .sum();
    println!();
    println!(
        "{} trades ({} open, {} closed), realized net P/L {}",
        trades.len(),
        open,
        trades.len() - open,
        realized
    );
    Ok(())
}

fn run_check_config(path: &Path) -> Result<()> {
    let config = GatewayConfig::from_file(path)?;
    let options = config.options();
    println!("{}: ok", path.display());
    match &config.transport {
        Some(transport) => println!("  transport: {} {}", transport.kind(), transport.endpoint()),
        None => println!("  transport: (none; pass --transport/--address to listen)"),
    }
    println!(
        "  health: check every {}s, timeout {}s",
        options.health.check_interval.as_secs(),
        options.health.timeout.as_secs()
    );
    match &config.store.path {
        Some(store) => println!("  store: {}", store.display()),
        None => println!("  store: in-memory"),
    }
    println!("  logging: {}", config.logging.filter);
    Ok(())
}
