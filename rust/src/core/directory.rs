use peercall_relay::{PresenceEvent, RelayMessage};

use super::call::CallPhase;
use super::signal::{Signal, Topic};
use super::CallCore;
use crate::error::CallError;
use crate::state::{CallDirection, EndReason};
use crate::updates::AppUpdate;

impl CallCore {
    pub(super) async fn handle_start_call(&mut self, identity: &str) -> Result<(), CallError> {
        if self.active_call.is_some() {
            return Err(CallError::CallAlreadyActive);
        }
        let Some(remote) = self.contacts.lookup(identity).cloned() else {
            return Err(CallError::UnknownContact(identity.to_string()));
        };
        if self.local_stream.is_none() {
            return Err(CallError::MediaUnavailable);
        }

        self.open_call(remote.clone(), CallDirection::Outgoing)?;
        self.emit_state();
        self.publish_signal(&remote.identity, Signal::CallRequest)
            .await
    }

    pub(super) async fn handle_accept_call(&mut self) -> Result<(), CallError> {
        let remote = match self.active_call.as_ref() {
            Some(call)
                if call.direction == CallDirection::Incoming
                    && call.phase == CallPhase::Ringing
                    && !call.accepted =>
            {
                call.remote.identity.clone()
            }
            _ => return Err(CallError::NoIncomingCall),
        };
        if self.local_stream.is_none() {
            return Err(CallError::MediaUnavailable);
        }
        if let Some(call) = self.active_call.as_mut() {
            call.accepted = true;
        }
        tracing::info!(%remote, "accepting call");
        self.publish_signal(&remote, Signal::CallAccept).await
    }

    pub(super) async fn handle_decline_call(&mut self) -> Result<(), CallError> {
        match self.active_call.as_ref() {
            Some(call)
                if call.direction == CallDirection::Incoming && call.phase == CallPhase::Ringing =>
            {
                self.end_call(EndReason::Declined).await;
                Ok(())
            }
            _ => Err(CallError::NoIncomingCall),
        }
    }

    pub(super) async fn handle_hang_up(&mut self) -> Result<(), CallError> {
        if self.active_call.is_none() {
            return Err(CallError::NoActiveCall);
        }
        self.end_call(EndReason::LocalHangUp).await;
        Ok(())
    }

    pub(super) async fn handle_relay_message(&mut self, msg: RelayMessage) {
        if msg.channel != self.state.local_identity {
            tracing::debug!(channel = %msg.channel, "message for another channel, ignoring");
            return;
        }
        tracing::debug!(from = %msg.sender, topic = %msg.topic, "<- relay");
        let result = match Topic::parse(&msg.topic) {
            Some(Topic::CallRequest) => self.handle_call_request(&msg.sender).await,
            Some(Topic::CallAccept) => self.handle_call_accept(&msg.sender),
            Some(topic) => self.handle_call_signal(topic, &msg).await,
            None => {
                tracing::warn!(topic = %msg.topic, from = %msg.sender, "unknown topic");
                Ok(())
            }
        };
        if let Err(err) = result {
            self.fail_call(err).await;
        }
    }

    async fn handle_call_request(&mut self, sender: &str) -> Result<(), CallError> {
        if sender == self.state.local_identity {
            return Ok(());
        }
        let Some(remote) = self.contacts.lookup(sender).cloned() else {
            tracing::warn!(%sender, "callRequest from unknown identity, dropping");
            return Ok(());
        };

        if let Some(call) = self.active_call.as_ref() {
            if call.remote.identity == sender {
                // Crossing requests: the lower identity stays the caller.
                let yields = call.direction == CallDirection::Outgoing
                    && call.phase == CallPhase::Ringing
                    && self.state.local_identity.as_str() > sender;
                if yields {
                    self.take_incoming_side(sender);
                } else {
                    tracing::debug!(%sender, "repeated callRequest for the current call");
                }
                return Ok(());
            }
            if self.busy_reply_enabled() {
                tracing::info!(%sender, busy_with = %call.remote.identity, "busy, rejecting callRequest");
                if let Err(err) = self.publish_signal(sender, Signal::SessionEnd).await {
                    tracing::warn!(%sender, %err, "busy reply failed");
                }
            } else {
                tracing::info!(%sender, "busy, ignoring callRequest");
            }
            return Ok(());
        }

        self.open_call(remote, CallDirection::Incoming)?;
        self.emit_state();
        if let Some(call) = self.state.active_call.clone() {
            self.emit_update(|rev| AppUpdate::IncomingCall { rev, call });
        }
        Ok(())
    }

    fn take_incoming_side(&mut self, sender: &str) {
        tracing::info!(%sender, "crossing call requests, taking the incoming side");
        if let Some(call) = self.active_call.as_mut() {
            call.direction = CallDirection::Incoming;
        }
        if let Some(snapshot) = self.state.active_call.as_mut() {
            snapshot.direction = CallDirection::Incoming;
        }
        self.emit_state();
        if let Some(call) = self.state.active_call.clone() {
            self.emit_update(|rev| AppUpdate::IncomingCall { rev, call });
        }
    }

    fn handle_call_accept(&mut self, sender: &str) -> Result<(), CallError> {
        match self.active_call.as_ref() {
            Some(call) if call.remote.identity == sender && call.phase == CallPhase::Ringing => {}
            Some(call) => {
                tracing::debug!(%sender, phase = ?call.phase, "unexpected callAccept, ignoring");
                return Ok(());
            }
            None => {
                tracing::debug!(%sender, "callAccept with no call, ignoring");
                return Ok(());
            }
        }
        self.begin_negotiation()
    }

    async fn handle_call_signal(&mut self, topic: Topic, msg: &RelayMessage) -> Result<(), CallError> {
        let Some(call) = self.active_call.as_ref() else {
            tracing::debug!(topic = topic.as_str(), "no active call, ignoring");
            return Ok(());
        };
        if call.remote.identity != msg.sender {
            tracing::debug!(
                topic = topic.as_str(),
                from = %msg.sender,
                expected = %call.remote.identity,
                "sender is not the remote party, dropping"
            );
            return Ok(());
        }

        match Signal::decode(&msg.topic, &msg.payload)? {
            Signal::SessionStartRequest(offer) => self.handle_session_start_request(offer).await,
            Signal::SessionStartAccept(answer) => self.handle_session_start_accept(answer).await,
            Signal::NewIceCandidate(candidate) => self.handle_remote_candidate(candidate).await,
            Signal::SessionEnd => {
                self.end_call(EndReason::RemoteHangUp).await;
                Ok(())
            }
            Signal::CallRequest | Signal::CallAccept => Ok(()),
        }
    }

    pub(super) fn handle_presence(&mut self, event: PresenceEvent) {
        if event.channel != self.lobby_channel() {
            return;
        }
        if !self.contacts.apply_presence(&event) {
            return;
        }
        tracing::debug!(member = %event.member.identity, action = ?event.action, "roster changed");
        self.state.contacts = self.contacts.list();
        self.emit_state();
    }
}
