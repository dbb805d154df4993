/// Error taxonomy for the coordination engine.
///
/// Addressing failures (`ChildNotFound`, `PeerClosed`, `ParentNotFound`)
/// are surfaced to the caller and never fatal. Malformed or unauthorized
/// inbound messages are dropped silently and never reach this type;
/// decryption failures are logged and abort dispatch for that message only.
#[derive(Debug, thiserror::Error)]
pub enum PeerLinkError {
    #[error("child could not be found")]
    ChildNotFound,

    #[error("peer is closed")]
    PeerClosed,

    #[error("parent could not be found")]
    ParentNotFound,

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("coordinator shut down")]
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_child_not_found() {
        assert_eq!(
            PeerLinkError::ChildNotFound.to_string(),
            "child could not be found"
        );
    }

    #[test]
    fn display_peer_closed() {
        assert_eq!(PeerLinkError::PeerClosed.to_string(), "peer is closed");
    }

    #[test]
    fn display_parent_not_found() {
        assert_eq!(
            PeerLinkError::ParentNotFound.to_string(),
            "parent could not be found"
        );
    }

    #[test]
    fn display_crypto() {
        let err = PeerLinkError::Crypto("authentication error".into());
        assert_eq!(err.to_string(), "crypto error: authentication error");
    }

    #[test]
    fn display_transport() {
        let err = PeerLinkError::Transport("unknown target".into());
        assert_eq!(err.to_string(), "transport error: unknown target");
    }
}
