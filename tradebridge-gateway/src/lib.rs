//! TradeBridge Gateway: transports, framing, dispatch, liveness monitoring, outbound commands.
//!
//! This crate builds on `tradebridge-core` to provide:
//! - Three transport listeners (TCP server, pipe server, drop-folder watcher)
//! - A JSON object framing codec for stream transports
//! - The message dispatcher routing envelopes to reconciliation and events
//! - The connection health monitor (any-traffic liveness with a timeout)
//! - The command channel writing outbound envelopes to the active transport
//! - The `Gateway` owning the single active session
//! - TOML configuration

pub mod codec;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod gateway;
pub mod health;
pub mod transport;

pub use codec::JsonFrameCodec;
pub use command::{CommandChannel, CommandDelivery, CommandError, DropOutbox, Outbound, PeerRegistry};
pub use config::{
    ConfigError, FileDropSettings, GatewayConfig, GatewayOptions, HealthSettings, TransportConfig,
};
pub use dispatcher::{DispatchError, DispatchOutcome, MessageDispatcher};
pub use events::BroadcastSink;
pub use gateway::{Gateway, GatewayError};
pub use health::{ConnectionHealthMonitor, StatusCell, TrafficClock};
pub use transport::{RunningTransport, SessionContext, Transport, TransportError};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn gateway_is_send_sync() {
        assert_send::<Gateway>();
        assert_sync::<Gateway>();
    }

    #[test]
    fn dispatcher_is_send_sync() {
        assert_send::<MessageDispatcher>();
        assert_sync::<MessageDispatcher>();
    }

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<GatewayConfig>();
        assert_sync::<GatewayConfig>();
        assert_send::<GatewayOptions>();
        assert_sync::<GatewayOptions>();
    }

    #[test]
    fn outbound_is_send_sync() {
        assert_send::<Outbound>();
        assert_sync::<Outbound>();
    }
}
