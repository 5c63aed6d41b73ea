mod call;
mod config;
mod contacts;
mod directory;
mod signal;

#[cfg(test)]
mod test_support;

use std::sync::{Arc, RwLock};

use flume::Sender;
use peercall_media::{MediaSource, MediaStream, PeerConnectionFactory, PeerEvent, PeerEventSink};
use peercall_relay::{MessageHandler, PresenceEvent, PresenceHandler, Relay, RelayMessage};
use serde_json::json;

use crate::state::{AppState, EndReason};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};
use crate::{CallAction, CallAppDeps};

use call::Call;
pub(crate) use config::default_config_json;
use config::CallConfig;
use contacts::{contact_from_member, ContactDirectory};
use signal::Topic;

/// Single-threaded call actor. Every relay delivery, session object callback
/// and user action reaches it as a [`CoreMsg`] and is handled to completion
/// before the next one starts.
pub(crate) struct CallCore {
    pub(crate) state: AppState,
    rev: u64,
    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,
    config: CallConfig,
    relay: Arc<dyn Relay>,
    peer_factory: Arc<dyn PeerConnectionFactory>,
    media: Arc<dyn MediaSource>,
    contacts: ContactDirectory,
    local_stream: Option<MediaStream>,
    // At most one live call for the local identity.
    active_call: Option<Call>,
    call_generation: u64,
    presence_entered: bool,
    stopped: bool,
}

impl CallCore {
    pub(crate) fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: &str,
        shared_state: Arc<RwLock<AppState>>,
        deps: CallAppDeps,
    ) -> Self {
        let config = config::load_call_config(data_dir);
        let local_identity = deps.relay.identity().to_string();
        let mut contacts = ContactDirectory::new(local_identity.clone());
        for contact in deps.contacts {
            contacts.add(contact);
        }

        let mut state = AppState::empty();
        state.local_identity = local_identity;
        state.contacts = contacts.list();

        let mut core = Self {
            state,
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            relay: deps.relay,
            peer_factory: deps.peers,
            media: deps.media,
            contacts,
            local_stream: None,
            active_call: None,
            call_generation: 0,
            presence_entered: false,
            stopped: false,
        };
        core.state.display_name = core.display_name();
        core
    }

    /// Acquires local media, subscribes the directory topics and joins the
    /// lobby. Runs once, before the first message is handled.
    pub(crate) async fn start(&mut self) {
        let specs = self.local_track_specs();
        match self.media.acquire(&specs).await {
            Ok(stream) => {
                tracing::info!(stream = %stream.id, tracks = stream.tracks.len(), "local media ready");
                self.local_stream = Some(stream);
                self.state.media_ready = true;
            }
            Err(err) => {
                tracing::error!(%err, "local media acquisition failed");
                self.state.toast = Some(format!("Local media unavailable: {err}"));
            }
        }

        let local = self.state.local_identity.clone();
        for topic in Topic::DIRECTORY {
            if let Err(err) = self
                .relay
                .subscribe(&local, topic.as_str(), self.relay_forwarder())
            {
                tracing::error!(topic = topic.as_str(), %err, "directory subscribe failed");
            }
        }

        self.join_lobby().await;
        tracing::info!(identity = %local, contacts = self.state.contacts.len(), "call core started");
        self.emit_state();
    }

    async fn join_lobby(&mut self) {
        let lobby = self.lobby_channel().to_string();
        let tx = self.core_sender.clone();
        let handler: PresenceHandler = Arc::new(move |event: PresenceEvent| {
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::Presence(event))));
        });
        if let Err(err) = self.relay.subscribe_presence(&lobby, handler) {
            tracing::warn!(%lobby, %err, "presence subscribe failed");
        }
        for member in self.relay.presence_members(&lobby) {
            self.contacts.add(contact_from_member(&member));
        }
        self.state.contacts = self.contacts.list();

        if !self.presence_enabled() {
            return;
        }
        let data = json!({ "username": self.display_name() });
        match self.relay.enter_presence(&lobby, data).await {
            Ok(()) => self.presence_entered = true,
            Err(err) => tracing::warn!(%lobby, %err, "entering lobby failed"),
        }
    }

    pub(crate) async fn handle_message(&mut self, msg: CoreMsg) {
        if self.stopped {
            return;
        }
        match msg {
            CoreMsg::Action(action) => {
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action).await;
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal).await,
            CoreMsg::Shutdown => self.shutdown().await,
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped
    }

    async fn handle_action(&mut self, action: CallAction) {
        let result = match action {
            CallAction::StartCall { identity } => self.handle_start_call(&identity).await,
            CallAction::AcceptCall => self.handle_accept_call().await,
            CallAction::DeclineCall => self.handle_decline_call().await,
            CallAction::HangUp => self.handle_hang_up().await,
            CallAction::ClearToast => {
                if self.state.toast.take().is_some() {
                    self.emit_state();
                }
                Ok(())
            }
        };
        if let Err(err) = result {
            self.fail_call(err).await;
        }
    }

    async fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::RelayMessage(msg) => self.handle_relay_message(msg).await,
            InternalEvent::Presence(event) => self.handle_presence(event),
            InternalEvent::Peer { generation, event } => {
                self.handle_peer_event(generation, event).await
            }
        }
    }

    async fn shutdown(&mut self) {
        self.end_call(EndReason::Shutdown).await;

        let local = self.state.local_identity.clone();
        for topic in Topic::DIRECTORY {
            self.relay.unsubscribe(&local, topic.as_str());
        }
        let lobby = self.lobby_channel().to_string();
        self.relay.unsubscribe_presence(&lobby);
        if self.presence_entered {
            if let Err(err) = self.relay.leave_presence(&lobby).await {
                tracing::warn!(%lobby, %err, "leaving lobby failed");
            }
            self.presence_entered = false;
        }
        self.stopped = true;
        tracing::info!(identity = %local, "call core stopped");
    }

    fn relay_forwarder(&self) -> MessageHandler {
        let tx = self.core_sender.clone();
        Arc::new(move |msg: RelayMessage| {
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::RelayMessage(msg))));
        })
    }

    fn peer_event_sink(&self, generation: u64) -> PeerEventSink {
        let tx = self.core_sender.clone();
        Arc::new(move |event: PeerEvent| {
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::Peer {
                generation,
                event,
            })));
        })
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    /// Side-effect update; keeps the snapshot rev in step with the stream.
    fn emit_update(&mut self, build: impl FnOnce(u64) -> AppUpdate) {
        let rev = self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(build(rev));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Stays in state until the UI clears it.
        self.state.toast = Some(msg.into());
        self.emit_state();
    }
}
