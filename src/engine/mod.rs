//! The coordination engine: a single event-loop task owning all peer
//! state, driven through a clonable [`CoordinatorHandle`].
//!
//! [`PeerCoordinator::spawn`] resolves the context's identity, wires the
//! transport streams, and starts the loop; the handle then exposes the
//! engine's operations as async methods backed by a command channel.

mod r#loop;
mod state;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::codec::{Cipher, SharedKeyCipher};
use crate::config::{Config, EventSink};
use crate::error::PeerLinkError;
use crate::identity::{self, IdentityStore, ROOT_CHANNEL};
use crate::peer::Peer;
use crate::transport::{Transport, TransportHandle};
use crate::types::{PeerId, PeerStatus};

use state::State;

const COMMAND_BUFFER: usize = 64;

/// Requests from handles to the event loop.
pub(crate) enum Command {
    SendToChild {
        id: PeerId,
        data: Value,
        reply: oneshot::Sender<Result<(), PeerLinkError>>,
    },
    SendToChildren {
        data: Value,
        reply: oneshot::Sender<Result<(), PeerLinkError>>,
    },
    SendToParent {
        data: Value,
        reply: oneshot::Sender<Result<(), PeerLinkError>>,
    },
    OpenChild {
        url: String,
        reply: oneshot::Sender<Result<Peer, PeerLinkError>>,
    },
    CloseChild {
        id: PeerId,
        reply: oneshot::Sender<Result<(), PeerLinkError>>,
    },
    CloseSelf {
        reply: oneshot::Sender<Result<(), PeerLinkError>>,
    },
    Children {
        reply: oneshot::Sender<Vec<Peer>>,
    },
    OpenChildren {
        reply: oneshot::Sender<Vec<Peer>>,
    },
    ClosedChildren {
        reply: oneshot::Sender<Vec<Peer>>,
    },
    Snapshot {
        reply: oneshot::Sender<PeerSnapshot>,
    },
    Shutdown,
}

/// Point-in-time view of the engine's own record.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub created: u64,
    pub status: PeerStatus,
    pub last_checkin: Option<u64>,
    pub last_parent_checkin: Option<u64>,
    pub channel_name: String,
    pub has_parent: bool,
}

/// Entry point for starting an engine.
pub struct PeerCoordinator;

impl PeerCoordinator {
    /// Start an engine for the context behind `handle`, encrypting payloads
    /// with the shared-key cipher derived from `config.encryption_key`.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        handle: TransportHandle,
        store: Arc<dyn IdentityStore>,
        config: Config,
        sink: Arc<dyn EventSink>,
    ) -> Result<CoordinatorHandle, PeerLinkError> {
        let cipher = Arc::new(SharedKeyCipher::new(&config.encryption_key));
        Self::spawn_with_cipher(transport, handle, store, config, sink, cipher)
    }

    /// Start an engine with a caller-provided payload cipher.
    pub fn spawn_with_cipher(
        transport: Arc<dyn Transport>,
        handle: TransportHandle,
        store: Arc<dyn IdentityStore>,
        config: Config,
        sink: Arc<dyn EventSink>,
        cipher: Arc<dyn Cipher>,
    ) -> Result<CoordinatorHandle, PeerLinkError> {
        let channel_name = config
            .channel_name
            .clone()
            .or_else(|| {
                transport
                    .name_of(&handle)
                    .ok()
                    .filter(|name| !name.is_empty())
            })
            .unwrap_or_else(|| ROOT_CHANNEL.to_string());

        let local_id = identity::resolve(config.explicit_id.clone(), store.as_ref(), &channel_name);

        let parent = transport.opener_of(&handle)?;
        let inbox = transport.subscribe(&handle)?;
        let own_closed = transport.closed_signal(&handle)?;
        let parent_closed = match parent {
            Some(parent_handle) => Some(transport.closed_signal(&parent_handle)?),
            None => None,
        };

        tracing::info!(id = %local_id, channel = %channel_name, parent = parent.is_some(), "starting peer engine");

        let state = State::new(
            local_id.clone(),
            channel_name,
            parent,
            handle,
            transport,
            cipher,
            store,
            sink,
            config,
        );

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(r#loop::run(state, cmd_rx, inbox, own_closed, parent_closed));

        Ok(CoordinatorHandle { cmd_tx, local_id })
    }
}

/// Clonable handle to a running engine. All methods return
/// [`PeerLinkError::Shutdown`] once the engine task has stopped.
#[derive(Clone)]
pub struct CoordinatorHandle {
    cmd_tx: mpsc::Sender<Command>,
    local_id: PeerId,
}

impl CoordinatorHandle {
    /// This engine's resolved identity.
    pub fn id(&self) -> &PeerId {
        &self.local_id
    }

    /// Send an application payload to one open child.
    pub async fn send_to_child(&self, id: PeerId, data: Value) -> Result<(), PeerLinkError> {
        self.request(|reply| Command::SendToChild { id, data, reply })
            .await?
    }

    /// Send an application payload to every open child.
    pub async fn send_to_children(&self, data: Value) -> Result<(), PeerLinkError> {
        self.request(|reply| Command::SendToChildren { data, reply })
            .await?
    }

    /// Send an application payload to the parent.
    pub async fn send_to_parent(&self, data: Value) -> Result<(), PeerLinkError> {
        self.request(|reply| Command::SendToParent { data, reply })
            .await?
    }

    /// Spawn and track a new child context. The returned record carries the
    /// id the child will resolve for itself.
    pub async fn open(&self, url: impl Into<String>) -> Result<Peer, PeerLinkError> {
        let url = url.into();
        self.request(|reply| Command::OpenChild { url, reply })
            .await?
    }

    /// Close a tracked child's context. No-op for an unknown or
    /// already-closed child.
    pub async fn close_child(&self, id: PeerId) -> Result<(), PeerLinkError> {
        self.request(|reply| Command::CloseChild { id, reply })
            .await?
    }

    /// Close this engine's own context, running the closure protocol.
    pub async fn close(&self) -> Result<(), PeerLinkError> {
        self.request(|reply| Command::CloseSelf { reply }).await?
    }

    /// All tracked children, in registration order.
    pub async fn children(&self) -> Vec<Peer> {
        self.request(|reply| Command::Children { reply })
            .await
            .unwrap_or_default()
    }

    /// The currently open children.
    pub async fn open_children(&self) -> Vec<Peer> {
        self.request(|reply| Command::OpenChildren { reply })
            .await
            .unwrap_or_default()
    }

    /// Children observed closed but not pruned.
    pub async fn closed_children(&self) -> Vec<Peer> {
        self.request(|reply| Command::ClosedChildren { reply })
            .await
            .unwrap_or_default()
    }

    /// This engine's own record.
    pub async fn snapshot(&self) -> Result<PeerSnapshot, PeerLinkError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Last checkin timestamp observed from the parent, if any.
    pub async fn last_parent_checkin(&self) -> Result<Option<u64>, PeerLinkError> {
        Ok(self.snapshot().await?.last_parent_checkin)
    }

    /// Stop the engine task without running the closure protocol.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, PeerLinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| PeerLinkError::Shutdown)?;
        reply_rx.await.map_err(|_| PeerLinkError::Shutdown)
    }
}
