#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use peercall_core::{AppUpdate, CallApp, CallAppDeps, CallReconciler, CallStatus};
use peercall_media::{SimulatedPeerFactory, SyntheticMediaSource};
use peercall_relay::{InMemoryRelay, RelayMessage};
use tempfile::TempDir;

pub fn wait_until(what: &str, timeout: Duration, f: impl FnMut() -> bool) {
    wait_until_with_poll(what, timeout, Duration::from_millis(10), f);
}

pub fn wait_until_with_poll(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut f: impl FnMut() -> bool,
) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(poll);
    }
    panic!("{what}: condition not met within {timeout:?}");
}

pub fn write_config(data_dir: &str, display_name: Option<&str>) {
    let path = std::path::Path::new(data_dir).join("peercall_config.json");
    let mut v = serde_json::json!({
        "lobby_channel": "_lobby",
        "busy_reply": true,
    });
    if let Some(name) = display_name {
        v["display_name"] = serde_json::Value::String(name.to_string());
    }
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

#[derive(Clone)]
pub struct Collector(pub Arc<Mutex<Vec<AppUpdate>>>);

impl Collector {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn all(&self) -> Vec<AppUpdate> {
        self.0.lock().unwrap().clone()
    }

    pub fn last_toast(&self) -> Option<String> {
        self.0.lock().unwrap().iter().rev().find_map(|u| match u {
            AppUpdate::FullState(s) => s.toast.clone(),
            _ => None,
        })
    }
}

impl CallReconciler for Collector {
    fn reconcile(&self, update: AppUpdate) {
        self.0.lock().unwrap().push(update);
    }
}

pub struct Party {
    pub identity: String,
    pub app: Arc<CallApp>,
    pub peers: Arc<SimulatedPeerFactory>,
    pub updates: Collector,
    _dir: TempDir,
}

impl Party {
    pub fn join(relay: &InMemoryRelay, identity: &str, seed: u64) -> Self {
        Self::join_named(relay, identity, seed, None)
    }

    pub fn join_named(
        relay: &InMemoryRelay,
        identity: &str,
        seed: u64,
        display_name: Option<&str>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_string_lossy().to_string();
        write_config(&data_dir, display_name);

        let peers = Arc::new(SimulatedPeerFactory::with_seed(identity, seed));
        let app = CallApp::new(
            data_dir,
            CallAppDeps {
                relay: Arc::new(relay.client(identity)),
                peers: peers.clone(),
                media: Arc::new(SyntheticMediaSource::new(identity)),
                contacts: Vec::new(),
            },
        );
        let updates = Collector::new();
        app.listen_for_updates(Box::new(updates.clone()));
        Self {
            identity: identity.to_string(),
            app,
            peers,
            updates,
            _dir: dir,
        }
    }

    pub fn status(&self) -> Option<CallStatus> {
        self.app.state().active_call.map(|c| c.status)
    }

    pub fn knows(&self, identity: &str) -> bool {
        self.app
            .state()
            .contacts
            .iter()
            .any(|c| c.identity == identity)
    }
}

/// Waits until each party lists the other as a contact.
pub fn introduce(a: &Party, b: &Party) {
    wait_until("lobby presence", Duration::from_secs(5), || {
        a.knows(&b.identity) && b.knows(&a.identity)
    });
}

pub fn count_topic(history: &[RelayMessage], sender: &str, topic: &str) -> usize {
    history
        .iter()
        .filter(|m| m.sender == sender && m.topic == topic)
        .count()
}
