/// Engine configuration and the notification sink.
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::peer::Peer;
use crate::types::{
    PeerId, PING_CHECKIN_BUFFER_MS, PING_INTERVAL_MS, REGISTRATION_BUFFER_MS,
};

/// Shared secret used when the embedder does not configure one.
const DEFAULT_ENCRYPTION_KEY: &str = "peerlink-shared-key";

/// Engine configuration. Construct once and hand to
/// [`PeerCoordinator::spawn`](crate::engine::PeerCoordinator::spawn).
#[derive(Debug, Clone)]
pub struct Config {
    /// Expected sender origin. Inbound messages from any other origin are
    /// dropped without dispatch; `"*"` accepts any origin.
    pub origin: String,
    /// Shared secret handed to the default payload cipher.
    pub encryption_key: String,
    /// Heartbeat period for both the send and liveness timers.
    pub ping_interval: Duration,
    /// Grace period added to `ping_interval` for timeout detection.
    pub ping_checkin_buffer: Duration,
    /// Grace period for a child that has never checked in.
    pub registration_buffer: Duration,
    /// Prune children from the tree once they close.
    pub remove_on_closed: bool,
    /// Treat a first ping from an unknown child as registration, firing the
    /// child-registered notification. With `false`, only an explicit
    /// REGISTER fires the notification; a raw ping still creates the child,
    /// silently.
    pub auto_register_on_ping: bool,
    /// Override the channel name instead of inheriting it from the
    /// transport context.
    pub channel_name: Option<String>,
    /// Id supplied by a parent that is spawning an already-tracked child.
    pub explicit_id: Option<PeerId>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: "*".to_string(),
            encryption_key: DEFAULT_ENCRYPTION_KEY.to_string(),
            ping_interval: Duration::from_millis(PING_INTERVAL_MS),
            ping_checkin_buffer: Duration::from_millis(PING_CHECKIN_BUFFER_MS),
            registration_buffer: Duration::from_millis(REGISTRATION_BUFFER_MS),
            remove_on_closed: false,
            auto_register_on_ping: true,
            channel_name: None,
            explicit_id: None,
        }
    }
}

/// Notifications emitted by the engine, one variant per sink method.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// This engine finished its registration step (with or without a
    /// parent; a root context is self-registered).
    Registered { id: PeerId },
    /// A child completed its first checkin.
    ChildRegistered { child: Peer },
    /// A child was observed closed, via status message or timeout.
    ChildClosed { child: Peer },
    /// Application payload from a tracked child.
    ChildMessage {
        child_id: PeerId,
        data: Value,
        received_at: u64,
    },
    /// Application payload from the parent, addressed to this peer.
    ParentMessage { data: Value, received_at: u64 },
    /// This engine's own context is closing.
    Closing { id: PeerId },
    /// The parent's context closed.
    ParentClosed,
}

/// Notification sink: one method per engine event, all defaulting to
/// no-ops so embedders implement only what they observe.
pub trait EventSink: Send + Sync {
    fn on_register(&self, _id: &PeerId) {}
    fn on_child_register(&self, _child: &Peer) {}
    fn on_child_close(&self, _child: &Peer) {}
    fn on_child_communication(&self, _child_id: &PeerId, _data: &Value, _received_at: u64) {}
    fn on_parent_communication(&self, _data: &Value, _received_at: u64) {}
    fn on_close(&self, _id: &PeerId) {}
    fn on_parent_close(&self) {}
}

/// Sink that drops every notification.
pub struct NoopSink;

impl EventSink for NoopSink {}

/// Forwards every notification as a [`PeerEvent`] over an mpsc channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_register(&self, id: &PeerId) {
        let _ = self.tx.send(PeerEvent::Registered { id: id.clone() });
    }

    fn on_child_register(&self, child: &Peer) {
        let _ = self.tx.send(PeerEvent::ChildRegistered {
            child: child.clone(),
        });
    }

    fn on_child_close(&self, child: &Peer) {
        let _ = self.tx.send(PeerEvent::ChildClosed {
            child: child.clone(),
        });
    }

    fn on_child_communication(&self, child_id: &PeerId, data: &Value, received_at: u64) {
        let _ = self.tx.send(PeerEvent::ChildMessage {
            child_id: child_id.clone(),
            data: data.clone(),
            received_at,
        });
    }

    fn on_parent_communication(&self, data: &Value, received_at: u64) {
        let _ = self.tx.send(PeerEvent::ParentMessage {
            data: data.clone(),
            received_at,
        });
    }

    fn on_close(&self, id: &PeerId) {
        let _ = self.tx.send(PeerEvent::Closing { id: id.clone() });
    }

    fn on_parent_close(&self) {
        let _ = self.tx.send(PeerEvent::ParentClosed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.ping_interval, Duration::from_millis(5000));
        assert_eq!(config.ping_checkin_buffer, Duration::from_millis(5000));
        assert_eq!(config.registration_buffer, Duration::from_millis(10_000));
        assert!(!config.remove_on_closed);
        assert!(config.auto_register_on_ping);
        assert!(config.channel_name.is_none());
        assert!(config.explicit_id.is_none());
    }

    #[test]
    fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.on_register(&PeerId::from("self"));
        sink.on_parent_close();

        assert!(matches!(
            rx.try_recv().unwrap(),
            PeerEvent::Registered { id } if id == PeerId::from("self")
        ));
        assert!(matches!(rx.try_recv().unwrap(), PeerEvent::ParentClosed));
    }

    #[test]
    fn noop_sink_has_full_default_coverage() {
        let sink = NoopSink;
        sink.on_register(&PeerId::from("self"));
        sink.on_parent_communication(&Value::Null, 0);
        sink.on_close(&PeerId::from("self"));
    }
}
