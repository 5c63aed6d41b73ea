use std::fmt;

use peercall_media::IceConnectionState;

#[derive(Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub local_identity: String,
    pub display_name: String,
    /// Local capture has been acquired; calls cannot start without it.
    pub media_ready: bool,
    pub contacts: Vec<Contact>,
    pub active_call: Option<CallState>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            local_identity: String::new(),
            display_name: String::new(),
            media_ready: false,
            contacts: vec![],
            active_call: None,
            toast: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    pub identity: String,
    pub display_name: String,
}

impl Contact {
    pub fn new(identity: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallState {
    pub call_id: String,
    pub remote: Contact,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub is_live: bool,
}

impl CallState {
    pub fn new(call_id: String, remote: Contact, direction: CallDirection, status: CallStatus) -> Self {
        Self {
            call_id,
            remote,
            direction,
            is_live: status.is_live(),
            status,
        }
    }

    pub fn set_status(&mut self, status: CallStatus) {
        self.is_live = status.is_live();
        self.status = status;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallStatus {
    /// Waiting for the callee; no session object yet.
    Ringing,
    Establishing,
    /// First remote track received.
    Active,
    Terminated { reason: EndReason },
}

impl CallStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Ringing | Self::Establishing | Self::Active)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndReason {
    LocalHangUp,
    Declined,
    /// The remote published `sessionEnd`.
    RemoteHangUp,
    ConnectionLost(IceConnectionState),
    SignalingClosed,
    Error(String),
    Shutdown,
}

impl EndReason {
    /// Whether the far side has to be told with a `sessionEnd`.
    pub fn notifies_remote(&self) -> bool {
        !matches!(self, Self::RemoteHangUp)
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalHangUp => f.write_str("local_hangup"),
            Self::Declined => f.write_str("declined"),
            Self::RemoteHangUp => f.write_str("remote_hangup"),
            Self::ConnectionLost(state) => write!(f, "connection_lost:{state}"),
            Self::SignalingClosed => f.write_str("signaling_closed"),
            Self::Error(msg) => write!(f, "error:{msg}"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_status_keeps_liveness_in_sync() {
        let mut call = CallState::new(
            "c1".to_string(),
            Contact::new("bob", "Bob"),
            CallDirection::Outgoing,
            CallStatus::Ringing,
        );
        assert!(call.is_live);
        call.set_status(CallStatus::Active);
        assert!(call.is_live);
        call.set_status(CallStatus::Terminated {
            reason: EndReason::LocalHangUp,
        });
        assert!(!call.is_live);
    }

    #[test]
    fn only_remote_hangup_stays_silent() {
        assert!(!EndReason::RemoteHangUp.notifies_remote());
        for reason in [
            EndReason::LocalHangUp,
            EndReason::Declined,
            EndReason::ConnectionLost(IceConnectionState::Failed),
            EndReason::SignalingClosed,
            EndReason::Error("bad payload".to_string()),
            EndReason::Shutdown,
        ] {
            assert!(reason.notifies_remote(), "{reason}");
        }
    }

    #[test]
    fn end_reason_display() {
        assert_eq!(
            EndReason::ConnectionLost(IceConnectionState::Disconnected).to_string(),
            "connection_lost:disconnected"
        );
    }
}
