//! Drives a [`CallCore`] by hand so tests control the interleaving of two
//! parties exactly.

use std::sync::{Arc, RwLock};

use flume::{Receiver, Sender};
use peercall_media::{SimulatedPeerConnection, SimulatedPeerFactory, SyntheticMediaSource};
use peercall_relay::{InMemoryRelay, RelayMessage};
use tempfile::TempDir;

use super::CallCore;
use crate::state::{AppState, CallStatus};
use crate::updates::{AppUpdate, CoreMsg};
use crate::{CallAction, CallAppDeps};

pub(super) struct Harness {
    pub(super) core: CallCore,
    pub(super) core_tx: Sender<CoreMsg>,
    pub(super) peers: Arc<SimulatedPeerFactory>,
    core_rx: Receiver<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    updates: Vec<AppUpdate>,
    _dir: TempDir,
}

impl Harness {
    /// Starts a core for `identity` on `relay`. It joins the lobby, so
    /// contacts come from presence.
    pub(super) async fn start(relay: &InMemoryRelay, identity: &str, seed: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded();
        let peers = Arc::new(SimulatedPeerFactory::with_seed(identity, seed));
        let deps = CallAppDeps {
            relay: Arc::new(relay.client(identity)),
            peers: peers.clone(),
            media: Arc::new(SyntheticMediaSource::new(identity)),
            contacts: Vec::new(),
        };
        let mut core = CallCore::new(
            update_tx,
            core_tx.clone(),
            &dir.path().to_string_lossy(),
            Arc::new(RwLock::new(AppState::empty())),
            deps,
        );
        core.start().await;
        Self {
            core,
            core_tx,
            peers,
            core_rx,
            update_rx,
            updates: Vec::new(),
            _dir: dir,
        }
    }

    /// Handles one queued message. Returns false when the queue was empty.
    pub(super) async fn step(&mut self) -> bool {
        match self.core_rx.try_recv() {
            Ok(msg) => {
                self.core.handle_message(msg).await;
                true
            }
            Err(_) => false,
        }
    }

    pub(super) async fn pump(&mut self) {
        while self.step().await {}
    }

    pub(super) async fn act(&mut self, action: CallAction) {
        self.core.handle_message(CoreMsg::Action(action)).await;
    }

    pub(super) async fn shutdown(&mut self) {
        self.core.handle_message(CoreMsg::Shutdown).await;
    }

    pub(super) fn status(&self) -> Option<CallStatus> {
        self.core.state.active_call.as_ref().map(|c| c.status.clone())
    }

    /// Every update emitted so far.
    pub(super) fn updates(&mut self) -> Vec<AppUpdate> {
        self.updates.extend(self.update_rx.drain());
        self.updates.clone()
    }

    pub(super) fn peer(&self) -> Option<Arc<SimulatedPeerConnection>> {
        self.peers.last()
    }
}

/// Alternates between the two cores until neither has anything queued.
pub(super) async fn pump_pair(a: &mut Harness, b: &mut Harness) {
    loop {
        let mut progressed = false;
        while a.step().await {
            progressed = true;
        }
        while b.step().await {
            progressed = true;
        }
        if !progressed {
            break;
        }
    }
}

pub(super) fn count_topic(history: &[RelayMessage], sender: &str, topic: &str) -> usize {
    history
        .iter()
        .filter(|m| m.sender == sender && m.topic == topic)
        .count()
}
