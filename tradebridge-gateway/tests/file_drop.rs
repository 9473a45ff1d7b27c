//! Drop-folder end-to-end with a short debounce window.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tradebridge_core::wire::{Command, CommandEnvelope};
use tradebridge_core::{
    ConnectionStatus, GatewayEvent, MemorySink, MemoryTradeStore, Ticket, TradeStatus, TradeStore,
};
use tradebridge_gateway::{CommandDelivery, Gateway, GatewayConfig, TransportConfig};

fn fast_gateway() -> (Gateway, Arc<MemoryTradeStore>, Arc<MemorySink>) {
    let config = GatewayConfig::from_toml(
        r#"
[file_drop]
debounce_ms = 60
poll_interval_ms = 20
outbox = "outgoing"
"#,
    )
    .unwrap();
    let store = Arc::new(MemoryTradeStore::new());
    let sink = Arc::new(MemorySink::new());
    let gateway = Gateway::new(config.options(), store.clone(), sink.clone());
    (gateway, store, sink)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within 5s");
}

/// Write through a temp name and rename, as a well-behaved producer would.
fn drop_file(dir: &Path, name: &str, body: &str) {
    let tmp = dir.join(format!("{name}.partial"));
    std::fs::write(&tmp, body).unwrap();
    std::fs::rename(&tmp, dir.join(name)).unwrap();
}

fn json_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
        .count()
}

#[tokio::test]
async fn files_are_dispatched_and_deleted() {
    let dir = tempfile::tempdir().unwrap();
    // Present before the watcher starts.
    drop_file(
        dir.path(),
        "open.json",
        r#"{"type":"trade_open","trade":{"ticket":300,"symbol":"EURUSD","type":0,"openPrice":1.1}}"#,
    );

    let (gateway, store, _sink) = fast_gateway();
    gateway
        .connect(TransportConfig::FileWatch {
            directory: dir.path().to_path_buf(),
        })
        .await
        .unwrap();
    assert_eq!(gateway.status(), ConnectionStatus::Connected);

    let ticket = Ticket::new("300");
    wait_until(|| store.find_by_ticket(&ticket).unwrap().is_some()).await;

    drop_file(
        dir.path(),
        "close.json",
        r#"{"type":"trade_close","trade":{"ticket":300,"closeTime":1704110400,"closePrice":1.2,"profit":12.5}}"#,
    );
    wait_until(|| {
        store
            .find_by_ticket(&ticket)
            .unwrap()
            .is_some_and(|t| t.status == TradeStatus::Closed)
    })
    .await;
    wait_until(|| json_files(dir.path()) == 0).await;
    assert_eq!(store.count().unwrap(), 1);

    gateway.disconnect().await;
}

#[tokio::test]
async fn malformed_file_is_consumed_without_effect() {
    let dir = tempfile::tempdir().unwrap();
    let (gateway, store, sink) = fast_gateway();
    gateway
        .connect(TransportConfig::FileWatch {
            directory: dir.path().to_path_buf(),
        })
        .await
        .unwrap();

    drop_file(dir.path(), "broken.json", "{not json");
    drop_file(dir.path(), "ignored.txt", "not watched");
    wait_until(|| json_files(dir.path()) == 0).await;

    assert_eq!(store.count().unwrap(), 0);
    assert!(dir.path().join("ignored.txt").exists());
    assert!(!sink
        .snapshot()
        .iter()
        .any(|e| matches!(e, GatewayEvent::TradeReceived { .. })));

    gateway.disconnect().await;
}

#[tokio::test]
async fn commands_land_in_the_outbox() {
    let dir = tempfile::tempdir().unwrap();
    let (gateway, _store, _sink) = fast_gateway();
    gateway
        .connect(TransportConfig::FileWatch {
            directory: dir.path().to_path_buf(),
        })
        .await
        .unwrap();

    let delivery = gateway
        .send_command(&Command::GetOpenTrades, json!({}))
        .await
        .unwrap();
    let CommandDelivery::File(path) = delivery else {
        panic!("expected a file delivery, got {delivery:?}");
    };
    assert_eq!(path.parent().unwrap(), dir.path().join("outgoing"));

    // The outbox is outside the watched level, so the watcher leaves it alone.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let body = std::fs::read_to_string(&path).unwrap();
    let envelope: CommandEnvelope = serde_json::from_str(&body).unwrap();
    assert_eq!(envelope.command, "get_open_trades");

    gateway.disconnect().await;
    assert_eq!(gateway.status(), ConnectionStatus::Disconnected);
}
