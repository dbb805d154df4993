/// The wire envelope, the unit of communication between contexts.
///
/// Serialized as JSON; `data` carries the ciphertext string produced by the
/// payload cipher. Field names are part of the wire contract.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::Cipher;
use crate::error::PeerLinkError;
use crate::types::{EventKind, PeerId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Ciphertext of the payload.
    pub data: String,
    /// Event tag driving dispatch.
    pub event: EventKind,
    /// The sender's own id.
    pub id: PeerId,
}

impl Envelope {
    /// Encrypt `value` and wrap it in an envelope from `sender`.
    pub async fn seal(
        event: EventKind,
        sender: PeerId,
        value: &Value,
        cipher: &dyn Cipher,
    ) -> Result<Self, PeerLinkError> {
        Ok(Self {
            data: cipher.encrypt(value).await?,
            event,
            id: sender,
        })
    }

    /// Decrypt the payload.
    pub async fn open(&self, cipher: &dyn Cipher) -> Result<Value, PeerLinkError> {
        cipher.decrypt(&self.data).await
    }

    pub fn to_json(&self) -> Result<String, PeerLinkError> {
        serde_json::to_string(self).map_err(|e| PeerLinkError::Serialization(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, PeerLinkError> {
        serde_json::from_str(raw).map_err(|e| PeerLinkError::Deserialization(e.to_string()))
    }
}

/// Parent→child payload wrapper. The embedded id addresses one specific
/// child; a receiver ignores the message unless the id is its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildAddressed {
    pub child_id: PeerId,
    pub data: Value,
}
