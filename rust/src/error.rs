use peercall_media::{MediaError, PeerError};
use peercall_relay::RelayError;

use crate::sdp_codec::CodecError;

/// A relay payload that does not match its topic's schema.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("malformed {topic} payload: {reason}")]
    Malformed { topic: &'static str, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("No active call")]
    NoActiveCall,
    #[error("No incoming call to answer")]
    NoIncomingCall,
    #[error("Already in a call")]
    CallAlreadyActive,
    #[error("Unknown contact: {0}")]
    UnknownContact(String),
    #[error("Local media is not available")]
    MediaUnavailable,
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    #[error("signal: {0}")]
    Signal(#[from] SignalError),
    #[error("session object: {0}")]
    Peer(#[from] PeerError),
    #[error("relay: {0}")]
    Relay(#[from] RelayError),
    #[error("media: {0}")]
    Media(#[from] MediaError),
}

impl CallError {
    /// Fatal errors end the current call; the rest are rejected actions that
    /// leave the call untouched.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Codec(_) | Self::Signal(_) | Self::Peer(_) | Self::Relay(_) | Self::Media(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_not_fatal() {
        assert!(!CallError::NoActiveCall.is_fatal());
        assert!(!CallError::NoIncomingCall.is_fatal());
        assert!(!CallError::CallAlreadyActive.is_fatal());
        assert!(!CallError::UnknownContact("eve".into()).is_fatal());
        assert!(!CallError::MediaUnavailable.is_fatal());
    }

    #[test]
    fn protocol_failures_are_fatal() {
        assert!(CallError::from(PeerError::Closed).is_fatal());
        assert!(CallError::from(RelayError::Closed).is_fatal());
        assert!(CallError::from(SignalError::UnknownTopic("x".into())).is_fatal());
        let codec = crate::sdp_codec::decompress("***").unwrap_err();
        assert!(CallError::from(codec).is_fatal());
    }
}
