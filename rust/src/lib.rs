mod actions;
mod core;
mod error;
mod logging;
pub mod sdp_codec;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use peercall_media::{MediaSource, PeerConnectionFactory};
use peercall_relay::Relay;

pub use actions::CallAction;
pub use error::{CallError, SignalError};
pub use logging::init_logging;
pub use sdp_codec::CodecError;
pub use state::*;
pub use updates::AppUpdate;

use crate::core::CallCore;
use crate::updates::CoreMsg;

/// Return the default `peercall_config.json` payload used when no config file exists.
pub fn default_config_json() -> String {
    core::default_config_json()
}

pub trait CallReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

/// Everything the call actor talks to. Swapping these is how the same core
/// runs against a hosted relay or the in-process one.
pub struct CallAppDeps {
    pub relay: Arc<dyn Relay>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub media: Arc<dyn MediaSource>,
    /// Seed roster; lobby presence adds to it.
    pub contacts: Vec<Contact>,
}

pub struct CallApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl CallApp {
    pub fn new(data_dir: String, deps: CallAppDeps) -> Arc<Self> {
        logging::init_logging(&data_dir);
        let identity = deps.relay.identity().to_string();
        tracing::info!(data_dir = %data_dir, identity = %identity, "CallApp::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));

        // Actor loop thread (single threaded "call actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        let spawned = thread::Builder::new()
            .name(format!("peercall-{identity}"))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        tracing::error!(%err, "call actor runtime failed to start");
                        return;
                    }
                };
                runtime.block_on(async move {
                    let mut core = CallCore::new(
                        update_tx,
                        core_tx_for_core,
                        &data_dir,
                        shared_for_core,
                        deps,
                    );
                    core.start().await;
                    while let Ok(msg) = core_rx.recv_async().await {
                        core.handle_message(msg).await;
                        if core.is_stopped() {
                            break;
                        }
                    }
                });
            });
        let actor = match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::error!(%err, "call actor thread failed to spawn");
                None
            }
        };

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            actor: Mutex::new(actor),
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: CallAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn CallReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }

    /// Ends any call, leaves the lobby and stops the actor. Idempotent.
    pub fn shutdown(&self) {
        let handle = match self.actor.lock() {
            Ok(mut g) => g.take(),
            Err(poison) => poison.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };
        let _ = self.core_tx.send(CoreMsg::Shutdown);
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!("call actor panicked");
        }
    }
}

impl Drop for CallApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}
