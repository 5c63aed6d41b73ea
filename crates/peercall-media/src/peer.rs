use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tracks::{MediaStream, MediaTrack};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        }
    }
}

/// `{type, sdp}` as produced by create-offer/create-answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalDescription {
    Description(SessionDescription),
    /// Revert an in-flight local offer to the last stable state.
    Rollback,
}

/// Network path descriptor, relayed verbatim between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// An empty candidate line marks end-of-candidates.
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stable => "stable",
            Self::HaveLocalOffer => "have-local-offer",
            Self::HaveRemoteOffer => "have-remote-offer",
            Self::Closed => "closed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    /// States after which the call cannot carry media any more.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// `None` is the end-of-candidates marker.
    IceCandidate(Option<IceCandidate>),
    IceConnectionStateChange(IceConnectionState),
    SignalingStateChange(SignalingState),
    NegotiationNeeded,
    Track {
        track: MediaTrack,
        stream: MediaStream,
    },
}

impl PeerEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::IceCandidate(_) => "ice_candidate",
            Self::IceConnectionStateChange(_) => "ice_connection_state",
            Self::SignalingStateChange(_) => "signaling_state",
            Self::NegotiationNeeded => "negotiation_needed",
            Self::Track { .. } => "track",
        }
    }
}

/// Receives session object callbacks. Must not block; the engine forwards
/// them onto its own queue.
pub type PeerEventSink = Arc<dyn Fn(PeerEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    #[error("session object is closed")]
    Closed,
    #[error("{op} is not valid in signaling state {state}")]
    InvalidState {
        op: &'static str,
        state: SignalingState,
    },
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("invalid ice candidate: {0}")]
    InvalidCandidate(String),
    #[error("track already added: {0}")]
    DuplicateTrack(String),
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, desc: LocalDescription) -> Result<(), PeerError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    /// Candidates that arrive before the remote description are queued by the
    /// implementation.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    fn add_track(&self, track: MediaTrack, stream: &MediaStream) -> Result<(), PeerError>;

    fn signaling_state(&self) -> SignalingState;

    fn ice_connection_state(&self) -> IceConnectionState;

    /// Drops the event sink. Returns whether a sink was attached; no event is
    /// delivered after this returns.
    fn detach(&self) -> bool;

    /// Stops every sender. Returns how many were still running.
    fn stop_transceivers(&self) -> usize;

    /// Returns whether this call closed the connection.
    fn close(&self) -> bool;
}

pub trait PeerConnectionFactory: Send + Sync {
    fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>, PeerError>;
}
