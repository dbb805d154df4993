/// Engine state, owned by the event loop and mutated only there.
///
/// Inbound dispatch, send primitives, heartbeat bookkeeping, and the
/// close/cleanup protocol all live here as plain methods; the loop only
/// multiplexes.
use std::sync::Arc;

use serde_json::Value;

use crate::codec::Cipher;
use crate::config::{Config, EventSink};
use crate::envelope::{ChildAddressed, Envelope};
use crate::error::PeerLinkError;
use crate::identity::{self, IdentityStore, StoredIdentity};
use crate::peer::{timed_out, Peer, PeerTree};
use crate::transport::{Inbound, Transport, TransportHandle};
use crate::types::{now_ms, EventKind, PeerId, PeerStatus};

pub(super) struct State {
    pub(super) id: PeerId,
    pub(super) created: u64,
    pub(super) status: PeerStatus,
    pub(super) last_checkin: Option<u64>,
    pub(super) last_parent_checkin: Option<u64>,
    pub(super) channel_name: String,
    pub(super) parent: Option<TransportHandle>,
    pub(super) own: TransportHandle,
    pub(super) children: PeerTree,
    pub(super) config: Config,
    transport: Arc<dyn Transport>,
    cipher: Arc<dyn Cipher>,
    store: Arc<dyn IdentityStore>,
    sink: Arc<dyn EventSink>,
}

impl State {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        id: PeerId,
        channel_name: String,
        parent: Option<TransportHandle>,
        own: TransportHandle,
        transport: Arc<dyn Transport>,
        cipher: Arc<dyn Cipher>,
        store: Arc<dyn IdentityStore>,
        sink: Arc<dyn EventSink>,
        config: Config,
    ) -> Self {
        Self {
            id,
            created: now_ms(),
            status: PeerStatus::Open,
            last_checkin: None,
            last_parent_checkin: None,
            channel_name,
            parent,
            own,
            children: PeerTree::new(),
            config,
            transport,
            cipher,
            store,
            sink,
        }
    }

    // ── Registration handshake ──────────────────────────────────────

    /// Announce this peer to its parent. Fire-and-forget: the parent's
    /// acknowledgement is implicitly the heartbeat cycle. A root context is
    /// self-registered, so the local notification fires either way.
    pub(super) async fn register(&mut self) {
        if self.parent.is_some() {
            if let Err(e) = self
                .send_event_to_parent(EventKind::Register, Value::from(now_ms()))
                .await
            {
                tracing::debug!("registration send failed: {e}");
            }
            if let Err(e) = self
                .send_event_to_parent(EventKind::SetStatus, status_value(PeerStatus::Open))
                .await
            {
                tracing::debug!("status announce failed: {e}");
            }
        }
        self.sink.on_register(&self.id);
    }

    // ── Send primitives ─────────────────────────────────────────────

    async fn send_envelope(
        &self,
        target: &TransportHandle,
        event: EventKind,
        value: Value,
    ) -> Result<(), PeerLinkError> {
        let envelope = Envelope::seal(event, self.id.clone(), &value, self.cipher.as_ref()).await?;
        let raw = envelope.to_json()?;
        self.transport
            .send(&self.own, target, raw, &self.config.origin)
            .await
    }

    async fn send_event_to_parent(
        &self,
        event: EventKind,
        value: Value,
    ) -> Result<(), PeerLinkError> {
        let parent = self.parent.as_ref().ok_or(PeerLinkError::ParentNotFound)?;
        self.send_envelope(parent, event, value).await
    }

    async fn send_event_to_child(
        &self,
        id: PeerId,
        event: EventKind,
        data: Value,
    ) -> Result<(), PeerLinkError> {
        let child = self.children.find(&id).ok_or(PeerLinkError::ChildNotFound)?;
        if !child.is_open() {
            return Err(PeerLinkError::PeerClosed);
        }
        let handle = child.handle;
        let payload = serde_json::to_value(ChildAddressed { child_id: id, data })
            .map_err(|e| PeerLinkError::Serialization(e.to_string()))?;
        self.send_envelope(&handle, event, payload).await
    }

    /// Send to every open child, settling all sends; one failure never
    /// blocks the others. The target list is snapshotted before sending so
    /// dispatch never observes mid-iteration mutation.
    async fn broadcast_to_children(&self, event: EventKind, data: Value) -> Result<(), PeerLinkError> {
        let targets: Vec<PeerId> = self
            .children
            .open()
            .into_iter()
            .map(|child| child.id)
            .collect();
        let sends = targets
            .into_iter()
            .map(|id| self.send_event_to_child(id, event, data.clone()));
        for result in futures::future::join_all(sends).await {
            if let Err(e) = result {
                tracing::debug!("broadcast send failed: {e}");
            }
        }
        Ok(())
    }

    /// Application send to one child.
    pub(super) async fn send_to_child(
        &self,
        id: PeerId,
        data: Value,
    ) -> Result<(), PeerLinkError> {
        self.send_event_to_child(id, EventKind::ParentCommunication, data)
            .await
    }

    /// Application send to all open children.
    pub(super) async fn send_to_children(&self, data: Value) -> Result<(), PeerLinkError> {
        self.broadcast_to_children(EventKind::ParentCommunication, data)
            .await
    }

    /// Application send to the parent.
    pub(super) async fn send_to_parent(&self, data: Value) -> Result<(), PeerLinkError> {
        self.send_event_to_parent(EventKind::ChildCommunication, data)
            .await
    }

    // ── Heartbeats ──────────────────────────────────────────────────

    /// Send-timer tick: record our own checkin, ping the parent, ping the
    /// open children.
    pub(super) async fn heartbeat_tick(&mut self) {
        let checkin = now_ms();
        self.last_checkin = Some(checkin);

        if self.parent.is_some() {
            if let Err(e) = self
                .send_event_to_parent(EventKind::PingParent, Value::from(checkin))
                .await
            {
                tracing::debug!("parent ping failed: {e}");
            }
        }
        if !self.children.is_empty() {
            let _ = self
                .broadcast_to_children(EventKind::PingChild, Value::from(checkin))
                .await;
        }
    }

    /// Liveness-timer tick. Only children are evaluated; the root never
    /// times out itself.
    pub(super) fn liveness_tick(&mut self) {
        self.evaluate_liveness(now_ms());
    }

    pub(super) fn evaluate_liveness(&mut self, now: u64) {
        let ping_interval = self.config.ping_interval.as_millis() as u64;
        let checkin_buffer = self.config.ping_checkin_buffer.as_millis() as u64;
        let registration_buffer = self.config.registration_buffer.as_millis() as u64;

        let expired: Vec<PeerId> = self
            .children
            .open()
            .into_iter()
            .filter(|child| {
                timed_out(child, ping_interval, checkin_buffer, registration_buffer, now)
            })
            .map(|child| child.id)
            .collect();

        for id in expired {
            tracing::info!(child = %id, "child heartbeat timed out");
            self.apply_child_closed(&id);
        }
    }

    // ── Inbound routing ─────────────────────────────────────────────

    /// Single entry point for everything arriving from the transport.
    ///
    /// Origin mismatches, unparseable envelopes, and unknown tags are
    /// expected noise from foreign senders and dropped without logging an
    /// error; a decryption failure aborts dispatch for that message only.
    pub(super) async fn handle_inbound(&mut self, msg: Inbound) {
        if self.config.origin != "*" && msg.origin != self.config.origin {
            return;
        }
        let Ok(envelope) = Envelope::from_json(&msg.data) else {
            return;
        };

        let decrypted = match envelope.open(self.cipher.as_ref()).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(sender = %envelope.id, "decrypt failed: {e}");
                return;
            }
        };

        match envelope.event {
            EventKind::PingChild => self.handle_ping_child(decrypted),
            EventKind::PingParent | EventKind::Register => {
                self.handle_checkin(envelope.event, envelope.id, msg.source, decrypted)
            }
            EventKind::SetStatus => self.handle_set_status(&envelope.id, decrypted),
            EventKind::ChildCommunication => {
                self.handle_child_communication(&envelope.id, decrypted)
            }
            EventKind::ParentCommunication => self.handle_parent_communication(decrypted),
        }
    }

    /// A ping from the parent, addressed to one specific child. Ignored
    /// unless that child is us.
    fn handle_ping_child(&mut self, value: Value) {
        let Ok(payload) = serde_json::from_value::<ChildAddressed>(value) else {
            return;
        };
        if payload.child_id != self.id {
            return;
        }
        if let Some(checkin) = payload.data.as_u64() {
            self.last_parent_checkin = Some(checkin);
        }
    }

    /// A ping or registration from a child. The two are equivalent in the
    /// auto-registration variant: a first-time checkin from an unknown id
    /// registers it. Replays of an already-tracked id never duplicate the
    /// entry.
    fn handle_checkin(
        &mut self,
        event: EventKind,
        sender_id: PeerId,
        source: TransportHandle,
        value: Value,
    ) {
        let Some(checkin) = value.as_u64() else {
            return;
        };

        if self.children.find(&sender_id).is_none() {
            let channel = identity::child_channel_name(&sender_id, &self.id);
            self.children
                .add(Peer::new(sender_id.clone(), source, channel, now_ms()));
        }
        let Some(child) = self.children.find_mut(&sender_id) else {
            return;
        };

        let first = child.last_checkin.is_none();
        child.last_checkin = Some(checkin);

        if first && (event == EventKind::Register || self.config.auto_register_on_ping) {
            let snapshot = child.clone();
            self.sink.on_child_register(&snapshot);
        }
    }

    /// A status report from a tracked child. `Closed` is terminal: a late
    /// `OPEN` for an already-closed child is ignored.
    fn handle_set_status(&mut self, sender_id: &PeerId, value: Value) {
        let Ok(status) = serde_json::from_value::<PeerStatus>(value) else {
            return;
        };
        let Some(current) = self.children.find(sender_id).map(|child| child.status) else {
            return;
        };
        if current == PeerStatus::Closed {
            return;
        }
        if status == PeerStatus::Closed {
            self.apply_child_closed(sender_id);
        }
    }

    fn handle_child_communication(&mut self, sender_id: &PeerId, value: Value) {
        if self.children.find(sender_id).is_none() {
            return;
        }
        self.sink.on_child_communication(sender_id, &value, now_ms());
    }

    fn handle_parent_communication(&mut self, value: Value) {
        let Ok(payload) = serde_json::from_value::<ChildAddressed>(value) else {
            return;
        };
        if payload.child_id != self.id {
            return;
        }
        self.sink.on_parent_communication(&payload.data, now_ms());
    }

    /// Shared close path for an inbound `SET_STATUS(CLOSED)` and a liveness
    /// timeout: mark closed, notify, optionally prune.
    fn apply_child_closed(&mut self, id: &PeerId) {
        let Some(child) = self.children.find_mut(id) else {
            return;
        };
        child.status = PeerStatus::Closed;
        let snapshot = child.clone();
        self.sink.on_child_close(&snapshot);
        if self.config.remove_on_closed {
            self.children.remove(id);
        }
    }

    // ── Peer tree mutation ──────────────────────────────────────────

    /// Spawn a new child context and track it. The child's id is generated
    /// here; the derived channel name carries it across the context
    /// boundary, and the registration buffer covers it until its first
    /// checkin.
    pub(super) async fn open_child(&mut self, url: &str) -> Result<Peer, PeerLinkError> {
        let child_id = PeerId::generate();
        let channel = identity::child_channel_name(&child_id, &self.id);
        let handle = self.transport.open(&self.own, url, &channel).await?;
        let peer = Peer::new(child_id, handle, channel, now_ms());
        self.children.add(peer.clone());
        Ok(peer)
    }

    /// Locally-initiated close of a child. No-op if unknown or already
    /// closed; fires no local notification, the remote side detects the
    /// closure through its own signal or heartbeat timeout.
    pub(super) async fn close_child(&mut self, id: &PeerId) -> Result<(), PeerLinkError> {
        let Some(child) = self.children.find(id) else {
            return Ok(());
        };
        if !child.is_open() {
            return Ok(());
        }
        let handle = child.handle;
        self.transport.close(&handle).await?;
        if let Some(child) = self.children.find_mut(id) {
            child.status = PeerStatus::Closed;
        }
        if self.config.remove_on_closed {
            self.children.remove(id);
        }
        Ok(())
    }

    /// Close this peer's own context. The closure protocol runs when the
    /// transport's closure signal comes back around.
    pub(super) async fn close_self(&mut self) -> Result<(), PeerLinkError> {
        self.transport.close(&self.own).await
    }

    // ── Close & cleanup ─────────────────────────────────────────────

    /// Own-context closure: persist identity for a reload, tell the parent,
    /// fire the local closing notification. The caller has already stopped
    /// the heartbeat timers.
    pub(super) async fn handle_closing(&mut self) {
        self.store.persist(
            &self.channel_name,
            StoredIdentity {
                id: self.id.clone(),
            },
        );
        self.status = PeerStatus::Closed;

        if self.parent.is_some() {
            if let Err(e) = self
                .send_event_to_parent(EventKind::SetStatus, status_value(PeerStatus::Closed))
                .await
            {
                tracing::debug!("close notification failed: {e}");
            }
        }
        self.sink.on_close(&self.id);
    }

    pub(super) fn notify_parent_closed(&self) {
        self.sink.on_parent_close();
    }
}

fn status_value(status: PeerStatus) -> Value {
    serde_json::to_value(status).expect("peer status serializes to a string")
}
