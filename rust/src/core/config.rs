use std::path::Path;

use peercall_media::{default_tracks, TrackSpec};
use serde::{Deserialize, Serialize};

use super::CallCore;

pub(crate) const CONFIG_FILE: &str = "peercall_config.json";
const DEFAULT_LOBBY_CHANNEL: &str = "_lobby";
const DEFAULT_MAX_SIGNAL_PAYLOAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct CallConfig {
    pub(crate) display_name: Option<String>,
    pub(crate) lobby_channel: Option<String>,
    pub(crate) announce_presence: Option<bool>,
    pub(crate) max_signal_payload_bytes: Option<usize>,
    pub(crate) local_tracks: Option<Vec<TrackSpec>>,
    pub(crate) busy_reply: Option<bool>,
}

pub(crate) fn load_call_config(data_dir: &str) -> CallConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE);
    let Ok(bytes) = std::fs::read(&path) else {
        return CallConfig::default();
    };
    match serde_json::from_slice::<CallConfig>(&bytes) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "ignoring malformed config");
            CallConfig::default()
        }
    }
}

/// Every key spelled out with its default value.
pub(crate) fn default_config_json() -> String {
    let defaults = CallConfig {
        display_name: None,
        lobby_channel: Some(DEFAULT_LOBBY_CHANNEL.to_string()),
        announce_presence: Some(true),
        max_signal_payload_bytes: Some(DEFAULT_MAX_SIGNAL_PAYLOAD_BYTES),
        local_tracks: Some(default_tracks()),
        busy_reply: Some(true),
    };
    serde_json::to_string_pretty(&defaults).unwrap_or_else(|_| "{}".to_string())
}

impl CallCore {
    pub(super) fn display_name(&self) -> String {
        self.config
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.state.local_identity.as_str())
            .to_string()
    }

    pub(super) fn lobby_channel(&self) -> &str {
        self.config
            .lobby_channel
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_LOBBY_CHANNEL)
    }

    pub(super) fn presence_enabled(&self) -> bool {
        // Lets tests and headless runs stay off the lobby.
        if std::env::var("PEERCALL_DISABLE_PRESENCE").ok().as_deref() == Some("1") {
            return false;
        }
        self.config.announce_presence.unwrap_or(true)
    }

    pub(super) fn max_signal_payload_bytes(&self) -> usize {
        self.config
            .max_signal_payload_bytes
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_SIGNAL_PAYLOAD_BYTES)
    }

    pub(super) fn local_track_specs(&self) -> Vec<TrackSpec> {
        match &self.config.local_tracks {
            Some(tracks) if !tracks.is_empty() => tracks.clone(),
            _ => default_tracks(),
        }
    }

    pub(super) fn busy_reply_enabled(&self) -> bool {
        self.config.busy_reply.unwrap_or(true)
    }
}
