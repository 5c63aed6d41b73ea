//! In-process session object.
//!
//! Models the parts of the offer/answer contract the call engine relies on:
//! signaling states, negotiation-needed, one-shot candidate gathering,
//! queuing of early remote candidates, and connectivity once both sides are
//! stable. Collisions are resolved jointly: after a rollback, the remote
//! offer is compared with the rolled back local one and the lower origin
//! session id wins on both peers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;

use crate::peer::{
    IceCandidate, IceConnectionState, LocalDescription, PeerConnection, PeerConnectionFactory,
    PeerError, PeerEvent, PeerEventSink, SdpType, SessionDescription, SignalingState,
};
use crate::tracks::{MediaStream, MediaTrack, TrackKind, TrackSpec};

pub struct SimulatedPeerFactory {
    label: String,
    next_session_id: AtomicU64,
    peers: Mutex<Vec<Arc<SimulatedPeerConnection>>>,
}

impl SimulatedPeerFactory {
    pub fn new(label: impl Into<String>) -> Self {
        let seed = rand::thread_rng().gen_range(1..u64::from(u32::MAX));
        Self::with_seed(label, seed)
    }

    /// Session ids are handed out as `seed, seed + 1, ...`, which fixes the
    /// winner of any collision between two seeded factories.
    pub fn with_seed(label: impl Into<String>, seed: u64) -> Self {
        Self {
            label: label.into(),
            next_session_id: AtomicU64::new(seed),
            peers: Mutex::new(Vec::new()),
        }
    }

    pub fn peers(&self) -> Vec<Arc<SimulatedPeerConnection>> {
        self.peers.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<SimulatedPeerConnection>> {
        self.peers.lock().last().cloned()
    }

    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }
}

impl PeerConnectionFactory for SimulatedPeerFactory {
    fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let peer = Arc::new(SimulatedPeerConnection::new(&self.label, session_id, events));
        tracing::debug!(label = %self.label, session_id, "simulated peer created");
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

struct Sender {
    track: MediaTrack,
    stream_id: String,
    negotiated: bool,
    stopped: bool,
}

struct Inner {
    signaling: SignalingState,
    ice: IceConnectionState,
    senders: Vec<Sender>,
    local: Option<SessionDescription>,
    stable_local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    rolled_back_offer: Option<SessionDescription>,
    offered: Vec<String>,
    sdp_version: u64,
    gathered: bool,
    pending_candidates: Vec<IceCandidate>,
    applied_candidates: Vec<IceCandidate>,
    nn_armed: bool,
    nn_fired: usize,
}

impl Inner {
    fn new() -> Self {
        Self {
            signaling: SignalingState::Stable,
            ice: IceConnectionState::New,
            senders: Vec::new(),
            local: None,
            stable_local: None,
            remote: None,
            rolled_back_offer: None,
            offered: Vec::new(),
            sdp_version: 0,
            gathered: false,
            pending_candidates: Vec::new(),
            applied_candidates: Vec::new(),
            nn_armed: false,
            nn_fired: 0,
        }
    }

    fn ensure_open(&self) -> Result<(), PeerError> {
        if self.signaling == SignalingState::Closed {
            return Err(PeerError::Closed);
        }
        Ok(())
    }

    fn set_signaling(&mut self, next: SignalingState, events: &mut Vec<PeerEvent>) {
        if self.signaling == next {
            return;
        }
        if next == SignalingState::Stable {
            self.nn_armed = false;
        }
        self.signaling = next;
        events.push(PeerEvent::SignalingStateChange(next));
    }

    fn fire_negotiation_needed(&mut self, events: &mut Vec<PeerEvent>) {
        self.nn_armed = true;
        self.nn_fired += 1;
        events.push(PeerEvent::NegotiationNeeded);
    }

    fn maybe_negotiation_needed(&mut self, events: &mut Vec<PeerEvent>) {
        let unnegotiated = self.senders.iter().any(|s| !s.negotiated && !s.stopped);
        if self.signaling == SignalingState::Stable && unnegotiated && !self.nn_armed {
            self.fire_negotiation_needed(events);
        }
    }

    fn mark_negotiated(&mut self, track_ids: &[String]) {
        for sender in &mut self.senders {
            if track_ids.contains(&sender.track.id) {
                sender.negotiated = true;
            }
        }
    }

    fn apply_pending_candidates(&mut self) {
        let pending = std::mem::take(&mut self.pending_candidates);
        self.applied_candidates.extend(pending);
    }

    fn maybe_connect(&mut self, events: &mut Vec<PeerEvent>) {
        let ready = self.signaling == SignalingState::Stable
            && self.local.is_some()
            && !self.applied_candidates.is_empty()
            && self.ice == IceConnectionState::New;
        let Some(remote) = self.remote.as_ref().filter(|_| ready) else {
            return;
        };
        let tracks = match parse_sdp(&remote.sdp) {
            Ok(parsed) => parsed.tracks,
            Err(err) => {
                tracing::warn!(%err, "remote description unreadable at connect");
                Vec::new()
            }
        };
        self.ice = IceConnectionState::Checking;
        events.push(PeerEvent::IceConnectionStateChange(self.ice));
        self.ice = IceConnectionState::Connected;
        events.push(PeerEvent::IceConnectionStateChange(self.ice));
        events.extend(remote_track_events(tracks));
    }

    fn active_senders(&self) -> Vec<&Sender> {
        self.senders.iter().filter(|s| !s.stopped).collect()
    }
}

pub struct SimulatedPeerConnection {
    label: String,
    session_id: u64,
    ice_ufrag: String,
    sink: Mutex<Option<PeerEventSink>>,
    inner: Mutex<Inner>,
}

impl SimulatedPeerConnection {
    fn new(label: &str, session_id: u64, events: PeerEventSink) -> Self {
        Self {
            label: label.to_string(),
            session_id,
            ice_ufrag: format!("{:08x}", session_id.wrapping_mul(2_654_435_761) as u32),
            sink: Mutex::new(Some(events)),
            inner: Mutex::new(Inner::new()),
        }
    }

    fn emit(&self, events: Vec<PeerEvent>) {
        if events.is_empty() {
            return;
        }
        let sink = self.sink.lock().clone();
        let Some(sink) = sink else {
            return;
        };
        for event in events {
            sink(event);
        }
    }

    fn render(&self, inner: &mut Inner, sdp_type: SdpType) -> String {
        inner.sdp_version += 1;
        render_sdp(
            self.session_id,
            inner.sdp_version,
            &self.ice_ufrag,
            sdp_type,
            &inner.active_senders(),
        )
    }

    fn gathered_candidates(&self) -> Vec<IceCandidate> {
        let octet = self.session_id % 200 + 10;
        let port = 50_000 + self.session_id % 10_000;
        let ufrag = &self.ice_ufrag;
        let host = format!(
            "candidate:{} 1 udp 2122260223 192.0.2.{octet} {port} typ host generation 0 ufrag {ufrag}",
            self.session_id % 1_000_000_007
        );
        let srflx = format!(
            "candidate:{} 1 udp 1686052607 198.51.100.{octet} {} typ srflx raddr 192.0.2.{octet} rport {port} generation 0 ufrag {ufrag}",
            (self.session_id + 1) % 1_000_000_007,
            port + 1
        );
        [host, srflx]
            .into_iter()
            .map(|candidate| IceCandidate {
                candidate,
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
                username_fragment: Some(ufrag.clone()),
            })
            .collect()
    }

    fn gather_once(&self, inner: &mut Inner, events: &mut Vec<PeerEvent>) {
        if inner.gathered {
            return;
        }
        inner.gathered = true;
        for candidate in self.gathered_candidates() {
            events.push(PeerEvent::IceCandidate(Some(candidate)));
        }
        events.push(PeerEvent::IceCandidate(None));
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Moves the ICE agent to `state` and reports it, as a network change would.
    pub fn force_ice_state(&self, state: IceConnectionState) {
        self.inner.lock().ice = state;
        self.emit(vec![PeerEvent::IceConnectionStateChange(state)]);
    }

    pub fn negotiation_needed_fired(&self) -> usize {
        self.inner.lock().nn_fired
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().signaling == SignalingState::Closed
    }

    pub fn is_detached(&self) -> bool {
        self.sink.lock().is_none()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.inner.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.inner.lock().remote.clone()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.inner.lock().applied_candidates.clone()
    }

    pub fn pending_candidates(&self) -> Vec<IceCandidate> {
        self.inner.lock().pending_candidates.clone()
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .senders
            .iter()
            .map(|s| s.track.id.clone())
            .collect()
    }

    pub fn transceivers_stopped(&self) -> bool {
        self.inner.lock().senders.iter().all(|s| s.stopped)
    }
}

#[async_trait]
impl PeerConnection for SimulatedPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        if inner.signaling == SignalingState::HaveRemoteOffer {
            return Err(PeerError::InvalidState {
                op: "create_offer",
                state: inner.signaling,
            });
        }
        Ok(SessionDescription::offer(
            self.render(&mut inner, SdpType::Offer),
        ))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        if inner.signaling != SignalingState::HaveRemoteOffer {
            return Err(PeerError::InvalidState {
                op: "create_answer",
                state: inner.signaling,
            });
        }
        Ok(SessionDescription::answer(
            self.render(&mut inner, SdpType::Answer),
        ))
    }

    async fn set_local_description(&self, desc: LocalDescription) -> Result<(), PeerError> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.ensure_open()?;
            match desc {
                LocalDescription::Rollback => match inner.signaling {
                    SignalingState::HaveLocalOffer => {
                        inner.rolled_back_offer = inner.local.take();
                        inner.local = inner.stable_local.clone();
                        inner.offered.clear();
                        inner.set_signaling(SignalingState::Stable, &mut events);
                    }
                    SignalingState::HaveRemoteOffer => {
                        inner.remote = None;
                        inner.set_signaling(SignalingState::Stable, &mut events);
                    }
                    _ => {}
                },
                LocalDescription::Description(desc) => {
                    let parsed = parse_sdp(&desc.sdp)?;
                    if parsed.session_id != self.session_id {
                        return Err(PeerError::InvalidDescription(
                            "description was not created by this session object".to_string(),
                        ));
                    }
                    let track_ids: Vec<String> =
                        parsed.tracks.into_iter().map(|t| t.track_id).collect();
                    match (desc.sdp_type, inner.signaling) {
                        (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                            if inner.signaling == SignalingState::Stable {
                                inner.stable_local = inner.local.clone();
                            }
                            inner.rolled_back_offer = None;
                            inner.offered = track_ids;
                            inner.local = Some(desc);
                            inner.nn_armed = false;
                            inner.set_signaling(SignalingState::HaveLocalOffer, &mut events);
                            self.gather_once(&mut inner, &mut events);
                        }
                        (SdpType::Answer, SignalingState::HaveRemoteOffer) => {
                            inner.mark_negotiated(&track_ids);
                            inner.local = Some(desc);
                            inner.set_signaling(SignalingState::Stable, &mut events);
                            inner.maybe_negotiation_needed(&mut events);
                            self.gather_once(&mut inner, &mut events);
                            inner.maybe_connect(&mut events);
                        }
                        (_, state) => {
                            return Err(PeerError::InvalidState {
                                op: "set_local_description",
                                state,
                            });
                        }
                    }
                }
            }
        }
        self.emit(events);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let parsed = parse_sdp(&desc.sdp)?;
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.ensure_open()?;
            match (desc.sdp_type, inner.signaling) {
                (SdpType::Offer, SignalingState::Stable) => {
                    match inner.rolled_back_offer.take() {
                        Some(ours)
                            if (self.session_id, ours.sdp.as_str())
                                < (parsed.session_id, desc.sdp.as_str()) =>
                        {
                            tracing::debug!(
                                label = %self.label,
                                local = self.session_id,
                                remote = parsed.session_id,
                                "offer collision, local offer kept"
                            );
                            inner.stable_local = inner.local.clone();
                            inner.offered = parse_sdp(&ours.sdp)
                                .map(|p| p.tracks.into_iter().map(|t| t.track_id).collect())
                                .unwrap_or_default();
                            inner.local = Some(ours);
                            inner.set_signaling(SignalingState::HaveLocalOffer, &mut events);
                        }
                        Some(_) => {
                            tracing::debug!(
                                label = %self.label,
                                local = self.session_id,
                                remote = parsed.session_id,
                                "offer collision, remote offer accepted"
                            );
                            inner.remote = Some(desc);
                            inner.apply_pending_candidates();
                            inner.set_signaling(SignalingState::HaveRemoteOffer, &mut events);
                            inner.fire_negotiation_needed(&mut events);
                        }
                        None => {
                            inner.remote = Some(desc);
                            inner.apply_pending_candidates();
                            inner.set_signaling(SignalingState::HaveRemoteOffer, &mut events);
                        }
                    }
                }
                (SdpType::Answer, SignalingState::HaveLocalOffer) => {
                    let offered = std::mem::take(&mut inner.offered);
                    inner.mark_negotiated(&offered);
                    inner.remote = Some(desc);
                    inner.apply_pending_candidates();
                    inner.set_signaling(SignalingState::Stable, &mut events);
                    inner.maybe_negotiation_needed(&mut events);
                    inner.maybe_connect(&mut events);
                }
                (_, state) => {
                    return Err(PeerError::InvalidState {
                        op: "set_remote_description",
                        state,
                    });
                }
            }
        }
        self.emit(events);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.ensure_open()?;
            if candidate.is_end_of_candidates() {
                return Ok(());
            }
            if !candidate.candidate.starts_with("candidate:") {
                return Err(PeerError::InvalidCandidate(candidate.candidate));
            }
            if inner.remote.is_none() {
                inner.pending_candidates.push(candidate);
                return Ok(());
            }
            inner.applied_candidates.push(candidate);
            inner.maybe_connect(&mut events);
        }
        self.emit(events);
        Ok(())
    }

    fn add_track(&self, track: MediaTrack, stream: &MediaStream) -> Result<(), PeerError> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.ensure_open()?;
            if inner.senders.iter().any(|s| s.track.id == track.id) {
                return Err(PeerError::DuplicateTrack(track.id));
            }
            inner.senders.push(Sender {
                track,
                stream_id: stream.id.clone(),
                negotiated: false,
                stopped: false,
            });
            inner.maybe_negotiation_needed(&mut events);
        }
        self.emit(events);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.inner.lock().signaling
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        self.inner.lock().ice
    }

    fn detach(&self) -> bool {
        self.sink.lock().take().is_some()
    }

    fn stop_transceivers(&self) -> usize {
        let mut inner = self.inner.lock();
        let mut stopped = 0;
        for sender in inner.senders.iter_mut().filter(|s| !s.stopped) {
            sender.stopped = true;
            stopped += 1;
        }
        stopped
    }

    fn close(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.signaling == SignalingState::Closed {
            return false;
        }
        inner.signaling = SignalingState::Closed;
        inner.ice = IceConnectionState::Closed;
        true
    }
}

struct RemoteTrack {
    kind: TrackKind,
    stream_id: String,
    track_id: String,
    codec: String,
    clock_rate: u32,
    channels: u8,
}

struct ParsedSdp {
    session_id: u64,
    tracks: Vec<RemoteTrack>,
}

struct MediaSection {
    kind: TrackKind,
    msid: Option<(String, String)>,
    rtpmap: Option<(String, u32, u8)>,
}

fn render_sdp(
    session_id: u64,
    version: u64,
    ufrag: &str,
    sdp_type: SdpType,
    senders: &[&Sender],
) -> String {
    let mut out = String::new();
    let mut line = |text: String| {
        out.push_str(&text);
        out.push_str("\r\n");
    };
    line("v=0".to_string());
    line(format!("o=- {session_id} {version} IN IP4 127.0.0.1"));
    line("s=-".to_string());
    line("t=0 0".to_string());
    let mids: Vec<String> = (0..senders.len()).map(|i| i.to_string()).collect();
    if !mids.is_empty() {
        line(format!("a=group:BUNDLE {}", mids.join(" ")));
    }
    let mut streams: Vec<&str> = Vec::new();
    for sender in senders {
        if !streams.contains(&sender.stream_id.as_str()) {
            streams.push(&sender.stream_id);
        }
    }
    line(format!("a=msid-semantic: WMS {}", streams.join(" ")));
    let setup = match sdp_type {
        SdpType::Offer => "actpass",
        SdpType::Answer => "active",
    };
    let fingerprint = (0..32u64)
        .map(|i| format!("{:02X}", (session_id.rotate_left((i * 8) as u32) as u8) ^ i as u8))
        .collect::<Vec<_>>()
        .join(":");
    for (mid, sender) in senders.iter().enumerate() {
        let spec = &sender.track.spec;
        let payload_type = match spec.kind {
            TrackKind::Audio => 111,
            TrackKind::Video => 96,
        };
        line(format!(
            "m={} 9 UDP/TLS/RTP/SAVPF {payload_type}",
            spec.kind.as_str()
        ));
        line("c=IN IP4 0.0.0.0".to_string());
        line(format!("a=ice-ufrag:{ufrag}"));
        line(format!("a=ice-pwd:{:016x}{:016x}", session_id, session_id.rotate_left(17)));
        line(format!("a=fingerprint:sha-256 {fingerprint}"));
        line(format!("a=setup:{setup}"));
        line(format!("a=mid:{mid}"));
        line("a=sendrecv".to_string());
        line(format!("a=msid:{} {}", sender.stream_id, sender.track.id));
        line("a=rtcp-mux".to_string());
        match spec.kind {
            TrackKind::Audio => line(format!(
                "a=rtpmap:{payload_type} {}/{}/{}",
                spec.codec, spec.clock_rate, spec.channels
            )),
            TrackKind::Video => line(format!(
                "a=rtpmap:{payload_type} {}/{}",
                spec.codec, spec.clock_rate
            )),
        }
    }
    out
}

fn parse_sdp(sdp: &str) -> Result<ParsedSdp, PeerError> {
    let invalid = |msg: &str| PeerError::InvalidDescription(msg.to_string());
    let mut lines = sdp.lines().map(str::trim_end).filter(|l| !l.is_empty());
    if lines.next() != Some("v=0") {
        return Err(invalid("missing version line"));
    }

    let mut session_id = None;
    let mut sections: Vec<MediaSection> = Vec::new();
    for line in lines {
        if let Some(origin) = line.strip_prefix("o=") {
            let id = origin
                .split_whitespace()
                .nth(1)
                .and_then(|v| v.parse::<u64>().ok())
                .ok_or_else(|| invalid("malformed origin line"))?;
            session_id = Some(id);
        } else if let Some(media) = line.strip_prefix("m=") {
            let kind = media
                .split_whitespace()
                .next()
                .and_then(TrackKind::parse)
                .ok_or_else(|| invalid("unsupported media section"))?;
            sections.push(MediaSection {
                kind,
                msid: None,
                rtpmap: None,
            });
        } else if let Some(msid) = line.strip_prefix("a=msid:") {
            let mut parts = msid.split_whitespace();
            if let (Some(stream), Some(track), Some(section)) =
                (parts.next(), parts.next(), sections.last_mut())
            {
                section.msid = Some((stream.to_string(), track.to_string()));
            }
        } else if let Some(rtpmap) = line.strip_prefix("a=rtpmap:") {
            let Some(section) = sections.last_mut() else {
                continue;
            };
            let encoding = rtpmap.split_whitespace().nth(1).unwrap_or_default();
            let mut parts = encoding.split('/');
            let codec = parts.next().unwrap_or_default().to_string();
            let clock_rate = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            let channels = parts.next().and_then(|v| v.parse().ok()).unwrap_or(1);
            section.rtpmap = Some((codec, clock_rate, channels));
        }
    }

    let session_id = session_id.ok_or_else(|| invalid("missing origin line"))?;
    let tracks = sections
        .into_iter()
        .filter_map(|section| {
            let (stream_id, track_id) = section.msid?;
            let (codec, clock_rate, channels) = section.rtpmap.unwrap_or_default();
            Some(RemoteTrack {
                kind: section.kind,
                stream_id,
                track_id,
                codec,
                clock_rate,
                channels,
            })
        })
        .collect();
    Ok(ParsedSdp { session_id, tracks })
}

fn remote_track_events(tracks: Vec<RemoteTrack>) -> Vec<PeerEvent> {
    let media: Vec<(String, MediaTrack)> = tracks
        .into_iter()
        .map(|t| {
            let track = MediaTrack {
                id: t.track_id.clone(),
                spec: TrackSpec {
                    name: t.track_id,
                    kind: t.kind,
                    codec: t.codec,
                    clock_rate: t.clock_rate,
                    channels: t.channels,
                },
            };
            (t.stream_id, track)
        })
        .collect();

    let mut seen = HashSet::new();
    let mut streams: Vec<MediaStream> = Vec::new();
    for (stream_id, _) in &media {
        if seen.insert(stream_id.clone()) {
            streams.push(MediaStream {
                id: stream_id.clone(),
                tracks: media
                    .iter()
                    .filter(|(sid, _)| sid == stream_id)
                    .map(|(_, track)| track.clone())
                    .collect(),
            });
        }
    }

    media
        .into_iter()
        .filter_map(|(stream_id, track)| {
            let stream = streams.iter().find(|s| s.id == stream_id)?.clone();
            Some(PeerEvent::Track { track, stream })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracks::default_tracks;

    type Events = Arc<Mutex<Vec<PeerEvent>>>;

    fn peer(factory: &SimulatedPeerFactory) -> (Arc<SimulatedPeerConnection>, Events) {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        factory
            .create(Arc::new(move |ev| sink.lock().push(ev)))
            .expect("create peer");
        (factory.last().expect("peer recorded"), events)
    }

    fn stream(label: &str) -> MediaStream {
        MediaStream {
            id: format!("{label}-local"),
            tracks: default_tracks()
                .into_iter()
                .map(|spec| MediaTrack {
                    id: format!("{label}-{}", spec.name),
                    spec,
                })
                .collect(),
        }
    }

    fn attach(peer: &SimulatedPeerConnection, stream: &MediaStream) {
        for track in &stream.tracks {
            peer.add_track(track.clone(), stream).expect("add track");
        }
    }

    fn candidates(events: &Events) -> Vec<IceCandidate> {
        events
            .lock()
            .iter()
            .filter_map(|ev| match ev {
                PeerEvent::IceCandidate(Some(c)) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(events: &Events, tag: &str) -> usize {
        events.lock().iter().filter(|ev| ev.tag() == tag).count()
    }

    #[tokio::test]
    async fn negotiation_needed_fires_once_for_a_batch_of_tracks() {
        let factory = SimulatedPeerFactory::with_seed("a", 1);
        let (a, events) = peer(&factory);
        attach(&a, &stream("a"));
        assert_eq!(a.negotiation_needed_fired(), 1);
        assert_eq!(count(&events, "negotiation_needed"), 1);
    }

    #[tokio::test]
    async fn offer_answer_and_candidates_connect_both_sides() {
        let fa = SimulatedPeerFactory::with_seed("a", 1);
        let fb = SimulatedPeerFactory::with_seed("b", 100);
        let (a, a_events) = peer(&fa);
        let (b, b_events) = peer(&fb);
        attach(&a, &stream("a"));

        let offer = a.create_offer().await.unwrap();
        a.set_local_description(LocalDescription::Description(offer.clone()))
            .await
            .unwrap();
        assert_eq!(a.signaling_state(), SignalingState::HaveLocalOffer);
        assert_eq!(candidates(&a_events).len(), 2);
        assert!(a_events.lock().contains(&PeerEvent::IceCandidate(None)));

        // Early candidates from the caller queue until the offer lands.
        for c in candidates(&a_events) {
            b.add_ice_candidate(c).await.unwrap();
        }
        assert_eq!(b.pending_candidates().len(), 2);

        b.set_remote_description(offer).await.unwrap();
        assert_eq!(b.pending_candidates().len(), 0);
        assert_eq!(b.applied_candidates().len(), 2);
        attach(&b, &stream("b"));
        assert_eq!(b.negotiation_needed_fired(), 0);

        let answer = b.create_answer().await.unwrap();
        b.set_local_description(LocalDescription::Description(answer.clone()))
            .await
            .unwrap();
        assert_eq!(b.signaling_state(), SignalingState::Stable);
        assert_eq!(b.ice_connection_state(), IceConnectionState::Connected);
        assert_eq!(count(&b_events, "track"), 2);

        a.set_remote_description(answer).await.unwrap();
        assert_eq!(a.ice_connection_state(), IceConnectionState::New);
        for c in candidates(&b_events) {
            a.add_ice_candidate(c).await.unwrap();
        }
        assert_eq!(a.ice_connection_state(), IceConnectionState::Connected);

        let remote_ids: Vec<String> = a_events
            .lock()
            .iter()
            .filter_map(|ev| match ev {
                PeerEvent::Track { track, stream } => {
                    assert_eq!(stream.id, "b-local");
                    Some(track.id.clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(remote_ids, vec!["b-audio0", "b-video0"]);
        assert_eq!(a.negotiation_needed_fired(), 1);
    }

    #[tokio::test]
    async fn collision_is_won_by_the_lower_session_id() {
        let fa = SimulatedPeerFactory::with_seed("a", 1);
        let fb = SimulatedPeerFactory::with_seed("b", 100);
        let (a, _) = peer(&fa);
        let (b, b_events) = peer(&fb);
        attach(&a, &stream("a"));
        attach(&b, &stream("b"));

        let offer_a = a.create_offer().await.unwrap();
        let offer_b = b.create_offer().await.unwrap();
        a.set_local_description(LocalDescription::Description(offer_a.clone()))
            .await
            .unwrap();
        b.set_local_description(LocalDescription::Description(offer_b.clone()))
            .await
            .unwrap();

        let (rb_a, sr_a) = tokio::join!(
            a.set_local_description(LocalDescription::Rollback),
            a.set_remote_description(offer_b)
        );
        rb_a.unwrap();
        sr_a.unwrap();
        assert_eq!(a.signaling_state(), SignalingState::HaveLocalOffer);
        assert_eq!(a.local_description(), Some(offer_a.clone()));
        assert_eq!(a.remote_description(), None);

        let (rb_b, sr_b) = tokio::join!(
            b.set_local_description(LocalDescription::Rollback),
            b.set_remote_description(offer_a)
        );
        rb_b.unwrap();
        sr_b.unwrap();
        assert_eq!(b.signaling_state(), SignalingState::HaveRemoteOffer);
        assert_eq!(b.negotiation_needed_fired(), 2);
        assert_eq!(
            b_events.lock().last(),
            Some(&PeerEvent::NegotiationNeeded)
        );
    }

    #[tokio::test]
    async fn invalid_transitions_and_payloads_are_rejected() {
        let factory = SimulatedPeerFactory::with_seed("a", 1);
        let (a, _) = peer(&factory);
        assert!(matches!(
            a.create_answer().await,
            Err(PeerError::InvalidState { op: "create_answer", .. })
        ));
        assert!(matches!(
            a.set_remote_description(SessionDescription::answer("v=0\r\no=- 9 1 IN IP4 127.0.0.1\r\n"))
                .await,
            Err(PeerError::InvalidState { .. })
        ));
        assert!(matches!(
            a.set_remote_description(SessionDescription::offer("garbage")).await,
            Err(PeerError::InvalidDescription(_))
        ));
        assert!(matches!(
            a.add_ice_candidate(IceCandidate {
                candidate: "not a candidate".to_string(),
                sdp_mid: None,
                sdp_m_line_index: None,
                username_fragment: None,
            })
            .await,
            Err(PeerError::InvalidCandidate(_))
        ));

        let foreign = SimulatedPeerFactory::with_seed("b", 50);
        let (b, _) = peer(&foreign);
        let offer = b.create_offer().await.unwrap();
        assert!(matches!(
            a.set_local_description(LocalDescription::Description(offer)).await,
            Err(PeerError::InvalidDescription(_))
        ));
    }

    #[tokio::test]
    async fn detach_and_close_are_idempotent() {
        let factory = SimulatedPeerFactory::with_seed("a", 1);
        let (a, events) = peer(&factory);
        attach(&a, &stream("a"));
        let before = events.lock().len();

        assert!(a.detach());
        assert!(!a.detach());
        a.force_ice_state(IceConnectionState::Failed);
        assert_eq!(events.lock().len(), before);

        assert_eq!(a.stop_transceivers(), 2);
        assert_eq!(a.stop_transceivers(), 0);
        assert!(a.transceivers_stopped());

        assert!(a.close());
        assert!(!a.close());
        assert!(a.is_closed());
        assert_eq!(a.create_offer().await, Err(PeerError::Closed));
    }
}
