//! Connection liveness.
//!
//! Every inbound frame (of any type, parseable or not) refreshes the traffic
//! clock. A periodic check compares the idle time against the timeout and
//! moves a `Connected` session to `Disconnected`. Nothing reconnects
//! automatically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tradebridge_core::{ConnectionStatus, EventSink, GatewayEvent};

use crate::config::HealthSettings;

/// Last-traffic timestamp, shared between dispatch and the monitor.
///
/// Stored as milliseconds since `origin` in an atomic; uses tokio's clock so
/// paused-time tests control it.
#[derive(Debug)]
pub struct TrafficClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl TrafficClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        Instant::now().duration_since(self.origin).as_millis() as u64
    }

    pub fn touch(&self) {
        self.last_ms.fetch_max(self.now_ms(), Ordering::AcqRel);
    }

    /// Time since the last touch.
    pub fn idle(&self) -> Duration {
        let last = self.last_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }
}

impl Default for TrafficClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Session status with change notification.
pub struct StatusCell {
    status: Mutex<ConnectionStatus>,
    events: Arc<dyn EventSink>,
}

impl StatusCell {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            status: Mutex::new(ConnectionStatus::Disconnected),
            events,
        }
    }

    pub fn get(&self) -> ConnectionStatus {
        self.status
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnectionStatus::Error)
    }

    /// Set the status; publishes `ConnectionStatusChanged` when it differs.
    pub fn set(&self, next: ConnectionStatus, reason: Option<String>) {
        self.transition(None, next, reason);
    }

    /// Set the status only if it currently equals `expected`.
    pub fn transition_from(
        &self,
        expected: ConnectionStatus,
        next: ConnectionStatus,
        reason: Option<String>,
    ) -> bool {
        self.transition(Some(expected), next, reason)
    }

    fn transition(
        &self,
        expected: Option<ConnectionStatus>,
        next: ConnectionStatus,
        reason: Option<String>,
    ) -> bool {
        let previous = {
            let Ok(mut status) = self.status.lock() else {
                return false;
            };
            if expected.is_some_and(|e| e != *status) || *status == next {
                return false;
            }
            std::mem::replace(&mut *status, next)
        };
        info!(%previous, current = %next, reason = reason.as_deref().unwrap_or(""), "connection status changed");
        self.events.publish(GatewayEvent::ConnectionStatusChanged {
            previous,
            current: next,
            reason,
        });
        true
    }
}

impl std::fmt::Debug for StatusCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusCell")
            .field("status", &self.get())
            .finish_non_exhaustive()
    }
}

/// Periodic any-traffic liveness check.
pub struct ConnectionHealthMonitor {
    clock: Arc<TrafficClock>,
    status: Arc<StatusCell>,
    events: Arc<dyn EventSink>,
    settings: HealthSettings,
}

impl ConnectionHealthMonitor {
    pub fn new(
        clock: Arc<TrafficClock>,
        status: Arc<StatusCell>,
        events: Arc<dyn EventSink>,
        settings: HealthSettings,
    ) -> Self {
        Self {
            clock,
            status,
            events,
            settings,
        }
    }

    /// One evaluation. Returns true when this check timed the session out.
    pub fn check(&self) -> bool {
        if self.status.get() != ConnectionStatus::Connected {
            return false;
        }
        let idle = self.clock.idle();
        debug!(idle_ms = idle.as_millis() as u64, "liveness check");
        if idle <= self.settings.timeout {
            return false;
        }
        let reason = format!("no traffic for {}s", idle.as_secs());
        if !self.status.transition_from(
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
            Some(reason.clone()),
        ) {
            return false;
        }
        warn!(idle_secs = idle.as_secs(), "heartbeat timeout");
        self.events
            .publish(GatewayEvent::warning(format!("connection lost: {reason}")));
        true
    }

    /// Run `check` every `check_interval` until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.settings.check_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.check();
                    }
                }
            }
            debug!("health monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradebridge_core::MemorySink;

    fn setup(
        settings: HealthSettings,
    ) -> (
        ConnectionHealthMonitor,
        Arc<StatusCell>,
        Arc<TrafficClock>,
        Arc<MemorySink>,
    ) {
        let sink = Arc::new(MemorySink::new());
        let status = Arc::new(StatusCell::new(sink.clone()));
        let clock = Arc::new(TrafficClock::new());
        let monitor =
            ConnectionHealthMonitor::new(clock.clone(), status.clone(), sink.clone(), settings);
        (monitor, status, clock, sink)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn status_cell_publishes_only_changes() {
        let sink = Arc::new(MemorySink::new());
        let cell = StatusCell::new(sink.clone());
        cell.set(ConnectionStatus::Connecting, None);
        cell.set(ConnectionStatus::Connecting, None);
        cell.set(ConnectionStatus::Connected, None);
        assert_eq!(sink.status_changes().len(), 2);
        assert!(!cell.transition_from(
            ConnectionStatus::Error,
            ConnectionStatus::Disconnected,
            None
        ));
        assert_eq!(cell.get(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn check_requires_idle_beyond_timeout() {
        let (monitor, status, clock, sink) = setup(HealthSettings::default());
        status.set(ConnectionStatus::Connected, None);
        clock.touch();

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(!monitor.check());
        assert_eq!(status.get(), ConnectionStatus::Connected);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(monitor.check());
        assert_eq!(status.get(), ConnectionStatus::Disconnected);
        assert!(sink
            .snapshot()
            .iter()
            .any(|e| matches!(e, GatewayEvent::Notification { .. })));

        // Already disconnected: no second transition.
        assert!(!monitor.check());
    }

    #[tokio::test(start_paused = true)]
    async fn traffic_refreshes_liveness() {
        let (monitor, status, clock, _) = setup(HealthSettings::default());
        status.set(ConnectionStatus::Connected, None);
        clock.touch();
        tokio::time::advance(Duration::from_secs(100)).await;
        clock.touch();
        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(!monitor.check());
        assert_eq!(clock.idle(), Duration::from_secs(100));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_lands_between_150_and_180_seconds() {
        let (monitor, status, clock, _) = setup(HealthSettings {
            check_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(120),
        });
        status.set(ConnectionStatus::Connected, None);
        clock.touch();
        let cancel = CancellationToken::new();
        let handle = monitor.spawn(cancel.clone());
        settle().await;

        let mut disconnected_at = None;
        for second in 1..=200u64 {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
            if status.get() == ConnectionStatus::Disconnected {
                disconnected_at = Some(second);
                break;
            }
        }
        let at = disconnected_at.expect("session never timed out");
        assert!((150..=180).contains(&at), "timed out at {at}s");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn only_connected_sessions_time_out() {
        let (monitor, status, _, _) = setup(HealthSettings::default());
        status.set(ConnectionStatus::Error, None);
        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(!monitor.check());
        assert_eq!(status.get(), ConnectionStatus::Error);
    }
}
