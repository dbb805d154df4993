use serde::{Deserialize, Serialize};

/// Stable identifier for a peer, unique within the whole coordination tree.
///
/// Generated once (UUID v4) and persisted across a reload of the same
/// logical channel. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a peer. `Closed` is terminal: a peer instance
/// never transitions back to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "CLOSED")]
    Closed,
}

/// Wire event tag, determines how the router dispatches an envelope.
///
/// An envelope carrying anything else fails deserialization and is
/// discarded before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "REGISTER")]
    Register,
    #[serde(rename = "SET_STATUS", alias = "SET_TAB_STATUS")]
    SetStatus,
    #[serde(rename = "PING_CHILD")]
    PingChild,
    #[serde(rename = "PING_PARENT")]
    PingParent,
    #[serde(rename = "CHILD_COMMUNICATION")]
    ChildCommunication,
    #[serde(rename = "PARENT_COMMUNICATION")]
    ParentCommunication,
}

/// Default heartbeat period.
pub const PING_INTERVAL_MS: u64 = 5000;

/// Default grace period added to the ping interval for timeout detection.
pub const PING_CHECKIN_BUFFER_MS: u64 = 5000;

/// Default grace period for a child that has never checked in.
pub const REGISTRATION_BUFFER_MS: u64 = 10_000;

/// Current time as Unix milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_uuids() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_ne!(a, b);
        uuid::Uuid::parse_str(a.as_str()).expect("generated id is a uuid");
    }

    #[test]
    fn peer_id_serializes_as_plain_string() {
        let id = PeerId::from("abc-123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc-123\"");
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(serde_json::to_string(&PeerStatus::Open).unwrap(), "\"OPEN\"");
        assert_eq!(
            serde_json::to_string(&PeerStatus::Closed).unwrap(),
            "\"CLOSED\""
        );
        let status: PeerStatus = serde_json::from_str("\"CLOSED\"").unwrap();
        assert_eq!(status, PeerStatus::Closed);
    }

    #[test]
    fn event_tags_roundtrip() {
        let tags = [
            (EventKind::Register, "\"REGISTER\""),
            (EventKind::SetStatus, "\"SET_STATUS\""),
            (EventKind::PingChild, "\"PING_CHILD\""),
            (EventKind::PingParent, "\"PING_PARENT\""),
            (EventKind::ChildCommunication, "\"CHILD_COMMUNICATION\""),
            (EventKind::ParentCommunication, "\"PARENT_COMMUNICATION\""),
        ];
        for (kind, wire) in tags {
            assert_eq!(serde_json::to_string(&kind).unwrap(), wire);
            let decoded: EventKind = serde_json::from_str(wire).unwrap();
            assert_eq!(decoded, kind);
        }
    }

    #[test]
    fn set_status_accepts_historical_alias() {
        let decoded: EventKind = serde_json::from_str("\"SET_TAB_STATUS\"").unwrap();
        assert_eq!(decoded, EventKind::SetStatus);
    }

    #[test]
    fn unknown_tag_rejected() {
        assert!(serde_json::from_str::<EventKind>("\"GOSSIP\"").is_err());
    }
}
