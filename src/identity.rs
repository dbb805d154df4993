/// Identity resolution and persistence scoping.
///
/// A context recovers its id across reloads through a keyed store scoped by
/// channel name. The store is an injected collaborator: the engine never
/// reaches into ambient global state; a store implementation may internally
/// consult a process-wide registry.
use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::types::PeerId;

/// Channel name of a context started without an inherited name, i.e. the root
/// of its own subtree.
pub const ROOT_CHANNEL: &str = "peerlink:root";

const CHILD_PREFIX: &str = "peerlink:child_";
const CHILD_SEPARATOR: &str = "_of_";

/// Record persisted across a reload of the same logical channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredIdentity {
    pub id: PeerId,
}

/// Keyed identity persistence, scoped per logical channel. Survives a
/// context reload but not a channel-name change.
pub trait IdentityStore: Send + Sync {
    /// The record persisted under `channel`, if any.
    fn recover(&self, channel: &str) -> Option<StoredIdentity>;

    fn persist(&self, channel: &str, identity: StoredIdentity);

    fn clear(&self, channel: &str);

    /// Id left by a prior engine construction in this execution context,
    /// guarding against double construction.
    fn context_id(&self) -> Option<PeerId>;

    fn mark_context(&self, id: PeerId);
}

/// In-memory store: one per execution context.
#[derive(Default)]
pub struct MemoryIdentityStore {
    records: Mutex<HashMap<String, StoredIdentity>>,
    context: Mutex<Option<PeerId>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn recover(&self, channel: &str) -> Option<StoredIdentity> {
        self.records
            .lock()
            .expect("identity store lock poisoned")
            .get(channel)
            .cloned()
    }

    fn persist(&self, channel: &str, identity: StoredIdentity) {
        self.records
            .lock()
            .expect("identity store lock poisoned")
            .insert(channel.to_string(), identity);
    }

    fn clear(&self, channel: &str) {
        self.records
            .lock()
            .expect("identity store lock poisoned")
            .remove(channel);
    }

    fn context_id(&self) -> Option<PeerId> {
        self.context
            .lock()
            .expect("identity store lock poisoned")
            .clone()
    }

    fn mark_context(&self, id: PeerId) {
        *self.context.lock().expect("identity store lock poisoned") = Some(id);
    }
}

/// Channel name for a spawned child, deterministic from both ids so
/// siblings never collide.
pub fn child_channel_name(child: &PeerId, parent: &PeerId) -> String {
    format!("{CHILD_PREFIX}{child}{CHILD_SEPARATOR}{parent}")
}

/// Parse a derived child channel name back into `(child, parent)` ids.
pub fn parse_child_channel(name: &str) -> Option<(PeerId, PeerId)> {
    let rest = name.strip_prefix(CHILD_PREFIX)?;
    let (child, parent) = rest.split_once(CHILD_SEPARATOR)?;
    if child.is_empty() || parent.is_empty() {
        return None;
    }
    Some((PeerId::from(child), PeerId::from(parent)))
}

/// Resolve this context's id, in priority order: explicit id → marker from
/// a prior construction → persisted record under `channel` → id embedded in
/// a derived child channel name → fresh identifier.
///
/// The persisted record is single-use: it is cleared the moment it is
/// consulted. The resolved id is marked on the context before returning.
pub fn resolve(explicit: Option<PeerId>, store: &dyn IdentityStore, channel: &str) -> PeerId {
    let persisted = store.recover(channel).map(|stored| stored.id);
    store.clear(channel);

    let id = explicit
        .or_else(|| store.context_id())
        .or(persisted)
        .or_else(|| parse_child_channel(channel).map(|(child, _)| child))
        .unwrap_or_else(PeerId::generate);

    store.mark_context(id.clone());
    id
}
