/// Peer records and the owned child tree.
///
/// The tree is owned exclusively by the engine that mutates it; children
/// never reach back into a parent's structure. Membership is id-unique and
/// insertion-ordered.
use crate::transport::TransportHandle;
use crate::types::{PeerId, PeerStatus};

/// One tracked participant in the coordination tree: self or a remote
/// context.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub id: PeerId,
    /// Instantiation time (Unix ms).
    pub created: u64,
    pub status: PeerStatus,
    /// Last time this peer confirmed itself alive; `None` until its first
    /// heartbeat or registration.
    pub last_checkin: Option<u64>,
    /// Address of this peer on the transport.
    pub handle: TransportHandle,
    /// Logical name scoping this peer's identity persistence.
    pub channel_name: String,
}

impl Peer {
    pub fn new(id: PeerId, handle: TransportHandle, channel_name: String, created: u64) -> Self {
        Self {
            id,
            created,
            status: PeerStatus::Open,
            last_checkin: None,
            handle,
            channel_name,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PeerStatus::Open
    }
}

/// Whether an open child has missed its liveness window at `now`.
///
/// A child that has checked in before gets `ping_interval + checkin_buffer`
/// past its last checkin; one that never has gets the longer
/// `registration_buffer` past its creation, giving a freshly spawned
/// context time to complete its first handshake. Thresholds are strict:
/// elapsed time exactly at the limit does not time out.
pub fn timed_out(
    peer: &Peer,
    ping_interval_ms: u64,
    checkin_buffer_ms: u64,
    registration_buffer_ms: u64,
    now: u64,
) -> bool {
    match peer.last_checkin {
        Some(last) => now.saturating_sub(last) > ping_interval_ms + checkin_buffer_ms,
        None => now.saturating_sub(peer.created) > registration_buffer_ms,
    }
}

/// Insertion-ordered collection of child peers.
#[derive(Debug, Default)]
pub struct PeerTree {
    children: Vec<Peer>,
}

impl PeerTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, id: &PeerId) -> Option<&Peer> {
        self.children.iter().find(|child| &child.id == id)
    }

    pub fn find_mut(&mut self, id: &PeerId) -> Option<&mut Peer> {
        self.children.iter_mut().find(|child| &child.id == id)
    }

    /// Add a child. Returns `false` (leaving the tree unchanged) if a child
    /// with the same id is already tracked.
    pub fn add(&mut self, peer: Peer) -> bool {
        if self.find(&peer.id).is_some() {
            return false;
        }
        self.children.push(peer);
        true
    }

    pub fn remove(&mut self, id: &PeerId) -> Option<Peer> {
        let index = self.children.iter().position(|child| &child.id == id)?;
        Some(self.children.remove(index))
    }

    /// Snapshot of all children, in insertion order.
    pub fn all(&self) -> Vec<Peer> {
        self.children.clone()
    }

    /// Snapshot of the currently open children.
    pub fn open(&self) -> Vec<Peer> {
        self.children
            .iter()
            .filter(|child| child.is_open())
            .cloned()
            .collect()
    }

    /// Snapshot of the closed children.
    pub fn closed(&self) -> Vec<Peer> {
        self.children
            .iter()
            .filter(|child| !child.is_open())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}
