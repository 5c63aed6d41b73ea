use std::sync::Arc;

use peercall_media::{
    IceCandidate, LocalDescription, MediaError, MediaStream, MediaTrack, PeerConnection,
    PeerEvent, SignalingState,
};

use super::signal::{CompactDescription, Signal, Topic};
use super::CallCore;
use crate::error::CallError;
use crate::state::{CallDirection, CallState, CallStatus, Contact, EndReason};
use crate::updates::AppUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CallPhase {
    Ringing,
    Establishing,
    Active,
}

impl CallPhase {
    fn status(self) -> CallStatus {
        match self {
            CallPhase::Ringing => CallStatus::Ringing,
            CallPhase::Establishing => CallStatus::Establishing,
            CallPhase::Active => CallStatus::Active,
        }
    }
}

/// One negotiation with one remote identity. Owns its session object, which
/// exists exactly while the phase is `Establishing` or `Active`.
pub(super) struct Call {
    pub(super) id: String,
    pub(super) remote: Contact,
    pub(super) direction: CallDirection,
    pub(super) phase: CallPhase,
    pub(super) generation: u64,
    /// Incoming only: the local user sent `callAccept`.
    pub(super) accepted: bool,
    peer: Option<Arc<dyn PeerConnection>>,
    tracks_attached: bool,
}

impl CallCore {
    /// Creates the call in `Ringing` and subscribes the per-call topics.
    pub(super) fn open_call(
        &mut self,
        remote: Contact,
        direction: CallDirection,
    ) -> Result<(), CallError> {
        if self.active_call.is_some() {
            return Err(CallError::CallAlreadyActive);
        }
        let local = self.state.local_identity.clone();
        for (subscribed, topic) in Topic::CALL.iter().enumerate() {
            if let Err(err) = self
                .relay
                .subscribe(&local, topic.as_str(), self.relay_forwarder())
            {
                for done in &Topic::CALL[..subscribed] {
                    self.relay.unsubscribe(&local, done.as_str());
                }
                return Err(err.into());
            }
        }

        self.call_generation += 1;
        let call_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            call_id = %call_id,
            remote = %remote.identity,
            ?direction,
            "call opened"
        );
        self.state.active_call = Some(CallState::new(
            call_id.clone(),
            remote.clone(),
            direction,
            CallStatus::Ringing,
        ));
        self.active_call = Some(Call {
            id: call_id,
            remote,
            direction,
            phase: CallPhase::Ringing,
            generation: self.call_generation,
            accepted: false,
            peer: None,
            tracks_attached: false,
        });
        Ok(())
    }

    fn set_phase(&mut self, phase: CallPhase) {
        let Some(call) = self.active_call.as_mut() else {
            return;
        };
        if call.phase == phase {
            return;
        }
        tracing::debug!(call_id = %call.id, from = ?call.phase, to = ?phase, "call phase");
        call.phase = phase;
        if let Some(snapshot) = self.state.active_call.as_mut() {
            snapshot.set_status(phase.status());
        }
        self.emit_state();
    }

    fn session_object(&self) -> Option<Arc<dyn PeerConnection>> {
        self.active_call.as_ref().and_then(|c| c.peer.clone())
    }

    /// Returns the call's session object, creating it (and moving to
    /// `Establishing`) on first use.
    pub(super) fn ensure_session_object(&mut self) -> Result<Arc<dyn PeerConnection>, CallError> {
        let Some(generation) = self.active_call.as_ref().map(|c| c.generation) else {
            return Err(CallError::NoActiveCall);
        };
        if let Some(peer) = self.session_object() {
            return Ok(peer);
        }
        let sink = self.peer_event_sink(generation);
        let peer = self.peer_factory.create(sink)?;
        if let Some(call) = self.active_call.as_mut() {
            tracing::debug!(call_id = %call.id, "session object created");
            call.peer = Some(peer.clone());
        }
        self.set_phase(CallPhase::Establishing);
        Ok(peer)
    }

    /// Adds every local track once per call.
    pub(super) fn attach_local_tracks(
        &mut self,
        peer: &Arc<dyn PeerConnection>,
    ) -> Result<(), CallError> {
        let Some(call) = self.active_call.as_mut() else {
            return Err(CallError::NoActiveCall);
        };
        if call.tracks_attached {
            return Ok(());
        }
        let Some(stream) = self.local_stream.as_ref() else {
            return Err(MediaError::DeviceUnavailable("local stream not acquired".to_string()).into());
        };
        for track in &stream.tracks {
            peer.add_track(track.clone(), stream)?;
        }
        call.tracks_attached = true;
        Ok(())
    }

    pub(super) async fn publish_signal(&self, to: &str, signal: Signal) -> Result<(), CallError> {
        let topic = signal.topic().as_str();
        let payload = signal.payload()?;
        tracing::debug!(to, topic, "-> relay");
        self.relay.publish(to, topic, payload).await?;
        Ok(())
    }

    async fn publish_to_remote(&self, signal: Signal) -> Result<(), CallError> {
        let Some(call) = self.active_call.as_ref() else {
            return Err(CallError::NoActiveCall);
        };
        self.publish_signal(&call.remote.identity, signal).await
    }

    /// The remote agreed to negotiate: create the session object and attach
    /// tracks. The offer follows from the negotiation-needed callback.
    pub(super) fn begin_negotiation(&mut self) -> Result<(), CallError> {
        let peer = self.ensure_session_object()?;
        self.attach_local_tracks(&peer)
    }

    async fn handle_negotiation_needed(&mut self) -> Result<(), CallError> {
        let Some(peer) = self.session_object() else {
            return Ok(());
        };
        if peer.signaling_state() == SignalingState::HaveRemoteOffer {
            // A collision left the remote offer applied; finish accepting it.
            tracing::debug!("completing deferred acceptance");
            return self.answer_remote_offer(&peer).await;
        }

        let offer = peer.create_offer().await?;
        if peer.signaling_state() != SignalingState::Stable {
            tracing::debug!(state = %peer.signaling_state(), "signaling not stable, offer postponed");
            return Ok(());
        }
        peer.set_local_description(LocalDescription::Description(offer.clone()))
            .await?;
        let compact = CompactDescription::compress(&offer, self.max_signal_payload_bytes())?;
        self.publish_to_remote(Signal::SessionStartRequest(compact))
            .await
    }

    async fn answer_remote_offer(&mut self, peer: &Arc<dyn PeerConnection>) -> Result<(), CallError> {
        self.attach_local_tracks(peer)?;
        let answer = peer.create_answer().await?;
        peer.set_local_description(LocalDescription::Description(answer.clone()))
            .await?;
        let compact = CompactDescription::compress(&answer, self.max_signal_payload_bytes())?;
        self.publish_to_remote(Signal::SessionStartAccept(compact))
            .await
    }

    pub(super) async fn handle_session_start_request(
        &mut self,
        compact: CompactDescription,
    ) -> Result<(), CallError> {
        let offer = compact.decompress()?;
        let peer = self.ensure_session_object()?;

        if peer.signaling_state() != SignalingState::Stable {
            // Both sides offered. Roll back and apply the remote offer as one
            // step; the answer, if any, comes from the next negotiation-needed.
            tracing::info!(state = %peer.signaling_state(), "offer collision, rolling back");
            let (rollback, remote) = tokio::join!(
                peer.set_local_description(LocalDescription::Rollback),
                peer.set_remote_description(offer),
            );
            rollback?;
            remote?;
            return Ok(());
        }

        peer.set_remote_description(offer).await?;
        self.answer_remote_offer(&peer).await
    }

    pub(super) async fn handle_session_start_accept(
        &mut self,
        compact: CompactDescription,
    ) -> Result<(), CallError> {
        let Some(peer) = self.session_object() else {
            tracing::warn!("sessionStartAccept before any session object, dropping");
            return Ok(());
        };
        let answer = compact.decompress()?;
        peer.set_remote_description(answer).await?;
        Ok(())
    }

    pub(super) async fn handle_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), CallError> {
        let Some(peer) = self.session_object() else {
            tracing::warn!("newIceCandidate before any session object, dropping");
            return Ok(());
        };
        peer.add_ice_candidate(candidate).await?;
        Ok(())
    }

    pub(super) async fn handle_peer_event(&mut self, generation: u64, event: PeerEvent) {
        match self.active_call.as_ref() {
            Some(call) if call.generation == generation => {}
            _ => {
                tracing::trace!(generation, event = event.tag(), "dropping stale session object event");
                return;
            }
        }

        let result = match event {
            PeerEvent::IceCandidate(Some(candidate)) if !candidate.is_end_of_candidates() => {
                self.publish_to_remote(Signal::NewIceCandidate(candidate))
                    .await
            }
            PeerEvent::IceCandidate(_) => Ok(()),
            PeerEvent::IceConnectionStateChange(state) => {
                tracing::debug!(%state, "ice connection state");
                if state.is_terminal() {
                    self.end_call(EndReason::ConnectionLost(state)).await;
                }
                Ok(())
            }
            PeerEvent::SignalingStateChange(state) => {
                tracing::debug!(%state, "signaling state");
                if state == SignalingState::Closed {
                    self.end_call(EndReason::SignalingClosed).await;
                }
                Ok(())
            }
            PeerEvent::NegotiationNeeded => self.handle_negotiation_needed().await,
            PeerEvent::Track { track, stream } => {
                self.handle_remote_track(track, stream);
                Ok(())
            }
        };
        if let Err(err) = result {
            self.fail_call(err).await;
        }
    }

    fn handle_remote_track(&mut self, track: MediaTrack, stream: MediaStream) {
        let Some(call) = self.active_call.as_ref() else {
            return;
        };
        if call.phase == CallPhase::Active {
            tracing::debug!(track = %track.id, "additional remote track");
            return;
        }
        let call_id = call.id.clone();
        tracing::info!(call_id = %call_id, track = %track.id, stream = %stream.id, "call established");
        self.set_phase(CallPhase::Active);

        let local_stream = self.local_stream.clone().unwrap_or_else(|| MediaStream {
            id: String::new(),
            tracks: vec![],
        });
        self.emit_update(|rev| AppUpdate::CallEstablished {
            rev,
            call_id,
            local_stream,
            remote_stream: stream,
        });
    }

    /// Fatal errors end the call; rejected actions only toast.
    pub(super) async fn fail_call(&mut self, err: CallError) {
        if !err.is_fatal() {
            tracing::info!(%err, "rejected");
            self.toast(err.to_string());
            return;
        }
        tracing::warn!(%err, "call failed");
        self.toast(format!("Call failed: {err}"));
        self.end_call(EndReason::Error(err.to_string())).await;
    }

    /// Tears the call down. Safe to call any number of times; only the first
    /// call after a call was opened does anything.
    pub(super) async fn end_call(&mut self, reason: EndReason) {
        let Some(call) = self.active_call.take() else {
            return;
        };

        if let Some(peer) = call.peer.as_ref() {
            peer.detach();
            let stopped = peer.stop_transceivers();
            peer.close();
            tracing::debug!(call_id = %call.id, stopped, "session object released");
        }
        let local = self.state.local_identity.clone();
        for topic in Topic::CALL {
            self.relay.unsubscribe(&local, topic.as_str());
        }

        if reason.notifies_remote() {
            if let Err(err) = self
                .publish_signal(&call.remote.identity, Signal::SessionEnd)
                .await
            {
                tracing::warn!(%err, remote = %call.remote.identity, "sessionEnd publish failed");
            }
        }

        tracing::info!(call_id = %call.id, remote = %call.remote.identity, %reason, "call ended");
        if let Some(snapshot) = self.state.active_call.as_mut() {
            snapshot.set_status(CallStatus::Terminated {
                reason: reason.clone(),
            });
        }
        self.emit_state();
        let contact = call.remote;
        self.emit_update(|rev| AppUpdate::CallEnded {
            rev,
            contact,
            reason,
        });
    }
}
