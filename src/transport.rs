/// The cross-context transport collaborator.
///
/// One-way, asynchronous, unreliable: a string send annotated with an
/// origin, delivered FIFO per sender, with no acknowledgement and no shared
/// memory. The engine consumes this seam; `MemoryTransport` is the in-tree
/// implementation for tests and single-process embedding.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::PeerLinkError;

/// Opaque address of an execution context on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHandle(u64);

impl TransportHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A message received from the transport, annotated with the sender's
/// claimed origin and a handle back to the sender.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub data: String,
    pub origin: String,
    pub source: TransportHandle,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `message` from `from` to `to`. The message is only delivered if
    /// the target's origin matches `target_origin` (`"*"` matches any).
    async fn send(
        &self,
        from: &TransportHandle,
        to: &TransportHandle,
        message: String,
        target_origin: &str,
    ) -> Result<(), PeerLinkError>;

    /// Open a new context at `url` with the given channel name.
    async fn open(
        &self,
        opener: &TransportHandle,
        url: &str,
        name: &str,
    ) -> Result<TransportHandle, PeerLinkError>;

    /// Instruct the context behind `target` to close.
    async fn close(&self, target: &TransportHandle) -> Result<(), PeerLinkError>;

    /// Claim the inbound message stream for a handle. Can be claimed once.
    fn subscribe(
        &self,
        target: &TransportHandle,
    ) -> Result<mpsc::UnboundedReceiver<Inbound>, PeerLinkError>;

    /// Watch for closure of the context behind `target`.
    fn closed_signal(
        &self,
        target: &TransportHandle,
    ) -> Result<watch::Receiver<bool>, PeerLinkError>;

    /// Channel name the context was opened with (empty for a root context).
    fn name_of(&self, target: &TransportHandle) -> Result<String, PeerLinkError>;

    /// The context that opened `target`, if any.
    fn opener_of(&self, target: &TransportHandle)
        -> Result<Option<TransportHandle>, PeerLinkError>;
}

struct Endpoint {
    name: String,
    origin: String,
    opener: Option<TransportHandle>,
    closed: bool,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: Option<mpsc::UnboundedReceiver<Inbound>>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl Endpoint {
    fn new(name: String, origin: String, opener: Option<TransportHandle>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        Self {
            name,
            origin,
            opener,
            closed: false,
            inbox_tx,
            inbox_rx: Some(inbox_rx),
            closed_tx,
            closed_rx,
        }
    }
}

/// In-process transport: every endpoint gets a FIFO inbox; sends between
/// endpoints are immediate and origin-gated.
pub struct MemoryTransport {
    origin: String,
    next_handle: AtomicU64,
    endpoints: Mutex<HashMap<u64, Endpoint>>,
}

impl MemoryTransport {
    /// Create a transport whose endpoints default to `origin`.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            next_handle: AtomicU64::new(1),
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Create a root endpoint: a context started directly, with no opener.
    pub fn bind(&self, name: &str) -> TransportHandle {
        self.insert(name.to_string(), self.origin.clone(), None)
    }

    /// Create a root endpoint claiming a specific origin. Used to model
    /// foreign senders.
    pub fn bind_with_origin(&self, name: &str, origin: &str) -> TransportHandle {
        self.insert(name.to_string(), origin.to_string(), None)
    }

    fn insert(
        &self,
        name: String,
        origin: String,
        opener: Option<TransportHandle>,
    ) -> TransportHandle {
        let handle = TransportHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.endpoints
            .lock()
            .expect("transport lock poisoned")
            .insert(handle.0, Endpoint::new(name, origin, opener));
        handle
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(
        &self,
        from: &TransportHandle,
        to: &TransportHandle,
        message: String,
        target_origin: &str,
    ) -> Result<(), PeerLinkError> {
        let endpoints = self.endpoints.lock().expect("transport lock poisoned");
        let sender_origin = endpoints
            .get(&from.0)
            .map(|endpoint| endpoint.origin.clone())
            .unwrap_or_else(|| self.origin.clone());
        let Some(target) = endpoints.get(&to.0) else {
            return Err(PeerLinkError::Transport("unknown target context".into()));
        };

        // A closed context or an origin mismatch drops the message silently,
        // matching the fire-and-forget transport contract.
        if target.closed {
            tracing::debug!(target = to.0, "send to closed context dropped");
            return Ok(());
        }
        if target_origin != "*" && target.origin != target_origin {
            tracing::debug!(target = to.0, "send dropped: target origin mismatch");
            return Ok(());
        }

        let _ = target.inbox_tx.send(Inbound {
            data: message,
            origin: sender_origin,
            source: *from,
        });
        Ok(())
    }

    async fn open(
        &self,
        opener: &TransportHandle,
        _url: &str,
        name: &str,
    ) -> Result<TransportHandle, PeerLinkError> {
        Ok(self.insert(name.to_string(), self.origin.clone(), Some(*opener)))
    }

    async fn close(&self, target: &TransportHandle) -> Result<(), PeerLinkError> {
        let mut endpoints = self.endpoints.lock().expect("transport lock poisoned");
        let Some(endpoint) = endpoints.get_mut(&target.0) else {
            return Err(PeerLinkError::Transport("unknown target context".into()));
        };
        endpoint.closed = true;
        let _ = endpoint.closed_tx.send(true);
        Ok(())
    }

    fn subscribe(
        &self,
        target: &TransportHandle,
    ) -> Result<mpsc::UnboundedReceiver<Inbound>, PeerLinkError> {
        let mut endpoints = self.endpoints.lock().expect("transport lock poisoned");
        let Some(endpoint) = endpoints.get_mut(&target.0) else {
            return Err(PeerLinkError::Transport("unknown target context".into()));
        };
        endpoint
            .inbox_rx
            .take()
            .ok_or_else(|| PeerLinkError::Transport("inbox already claimed".into()))
    }

    fn closed_signal(
        &self,
        target: &TransportHandle,
    ) -> Result<watch::Receiver<bool>, PeerLinkError> {
        let endpoints = self.endpoints.lock().expect("transport lock poisoned");
        endpoints
            .get(&target.0)
            .map(|endpoint| endpoint.closed_rx.clone())
            .ok_or_else(|| PeerLinkError::Transport("unknown target context".into()))
    }

    fn name_of(&self, target: &TransportHandle) -> Result<String, PeerLinkError> {
        let endpoints = self.endpoints.lock().expect("transport lock poisoned");
        endpoints
            .get(&target.0)
            .map(|endpoint| endpoint.name.clone())
            .ok_or_else(|| PeerLinkError::Transport("unknown target context".into()))
    }

    fn opener_of(
        &self,
        target: &TransportHandle,
    ) -> Result<Option<TransportHandle>, PeerLinkError> {
        let endpoints = self.endpoints.lock().expect("transport lock poisoned");
        endpoints
            .get(&target.0)
            .map(|endpoint| endpoint.opener)
            .ok_or_else(|| PeerLinkError::Transport("unknown target context".into()))
    }
}
