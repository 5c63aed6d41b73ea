use peercall_media::{MediaStream, PeerEvent};
use peercall_relay::{PresenceEvent, RelayMessage};

use crate::state::{AppState, CallState, Contact, EndReason};
use crate::CallAction;

#[derive(Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
    IncomingCall {
        rev: u64,
        call: CallState,
    },
    CallEstablished {
        rev: u64,
        call_id: String,
        local_stream: MediaStream,
        remote_stream: MediaStream,
    },
    CallEnded {
        rev: u64,
        contact: Contact,
        reason: EndReason,
    },
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
            AppUpdate::IncomingCall { rev, .. } => *rev,
            AppUpdate::CallEstablished { rev, .. } => *rev,
            AppUpdate::CallEnded { rev, .. } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(CallAction),
    Internal(Box<InternalEvent>),
    Shutdown,
}

#[derive(Debug)]
pub enum InternalEvent {
    RelayMessage(RelayMessage),
    Presence(PresenceEvent),
    /// Session object callback, tagged with the generation of the call that
    /// owned the session object when it fired.
    Peer { generation: u64, event: PeerEvent },
}
