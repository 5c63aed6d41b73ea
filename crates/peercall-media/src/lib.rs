//! Session object adapter and local media for peer calls.
//!
//! [`PeerConnection`] is the seam the call engine drives; [`sim`] provides a
//! deterministic in-process implementation that follows the offer/answer
//! contract closely enough to exercise glare, rollback and candidate
//! buffering.

mod peer;
pub mod sim;
mod source;
mod tracks;

pub use peer::{
    IceCandidate, IceConnectionState, LocalDescription, PeerConnection, PeerConnectionFactory,
    PeerError, PeerEvent, PeerEventSink, SdpType, SessionDescription, SignalingState,
};
pub use sim::{SimulatedPeerConnection, SimulatedPeerFactory};
pub use source::{MediaError, MediaSource, SyntheticMediaSource};
pub use tracks::{
    default_audio_track, default_tracks, default_video_track, MediaStream, MediaTrack, TrackKind,
    TrackSpec,
};
