use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSpec {
    pub name: String,
    pub kind: TrackKind,
    pub codec: String,
    pub clock_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u8,
}

fn default_channels() -> u8 {
    1
}

pub fn default_audio_track() -> TrackSpec {
    TrackSpec {
        name: "audio0".to_string(),
        kind: TrackKind::Audio,
        codec: "opus".to_string(),
        clock_rate: 48_000,
        channels: 1,
    }
}

pub fn default_video_track() -> TrackSpec {
    TrackSpec {
        name: "video0".to_string(),
        kind: TrackKind::Video,
        codec: "VP8".to_string(),
        clock_rate: 90_000,
        channels: 1,
    }
}

pub fn default_tracks() -> Vec<TrackSpec> {
    vec![default_audio_track(), default_video_track()]
}

/// A live track handed to, or received from, a session object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub spec: TrackSpec,
}

impl MediaTrack {
    pub fn kind(&self) -> TrackKind {
        self.spec.kind
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn track(&self, id: &str) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn kinds(&self) -> Vec<TrackKind> {
        self.tracks.iter().map(MediaTrack::kind).collect()
    }
}
