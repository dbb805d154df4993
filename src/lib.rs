//! Peer coordination across isolated execution contexts.
//!
//! `peerlink` keeps a tree of cooperating peers alive over a one-way,
//! unreliable transport: each context resolves a stable identity that
//! survives reloads, announces itself to the context that opened it, and
//! then exchanges encrypted heartbeats so both sides can detect silent
//! disappearance. Application payloads ride the same envelope and are
//! routed parent-to-child and child-to-parent with origin validation.
//!
//! Wire format: JSON envelopes (`data`/`event`/`id`) carrying base64
//! XChaCha20-Poly1305 ciphertext; the key is derived from a shared secret
//! with HKDF-SHA256.
//!
//! The engine runs as a single tokio task per context, started with
//! [`PeerCoordinator::spawn`] and driven through the returned
//! [`CoordinatorHandle`]; notifications surface through an [`EventSink`].

pub mod codec;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod peer;
pub mod transport;
pub mod types;

pub use codec::{Cipher, SharedKeyCipher};
pub use config::{ChannelSink, Config, EventSink, NoopSink, PeerEvent};
pub use engine::{CoordinatorHandle, PeerCoordinator, PeerSnapshot};
pub use envelope::{ChildAddressed, Envelope};
pub use error::PeerLinkError;
pub use identity::{
    child_channel_name, parse_child_channel, IdentityStore, MemoryIdentityStore, StoredIdentity,
    ROOT_CHANNEL,
};
pub use peer::{Peer, PeerTree};
pub use transport::{Inbound, MemoryTransport, Transport, TransportHandle};
pub use types::{EventKind, PeerId, PeerStatus};
