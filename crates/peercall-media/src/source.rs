use std::collections::HashSet;

use async_trait::async_trait;

use crate::tracks::{MediaStream, MediaTrack, TrackSpec};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("no tracks requested")]
    NoTracks,
    #[error("duplicate track name: {0}")]
    DuplicateTrack(String),
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Local capture. Acquisition happens once, before the first call.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, tracks: &[TrackSpec]) -> Result<MediaStream, MediaError>;
}

/// Capture stand-in that hands out labelled tracks without touching devices.
#[derive(Debug, Clone)]
pub struct SyntheticMediaSource {
    label: String,
    unavailable: Option<String>,
}

impl SyntheticMediaSource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            unavailable: None,
        }
    }

    /// A source whose every acquisition fails.
    pub fn unavailable(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            unavailable: Some(reason.into()),
        }
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire(&self, tracks: &[TrackSpec]) -> Result<MediaStream, MediaError> {
        if let Some(reason) = &self.unavailable {
            return Err(MediaError::DeviceUnavailable(reason.clone()));
        }
        if tracks.is_empty() {
            return Err(MediaError::NoTracks);
        }
        let mut seen = HashSet::new();
        for spec in tracks {
            if !seen.insert(spec.name.as_str()) {
                return Err(MediaError::DuplicateTrack(spec.name.clone()));
            }
        }
        let stream = MediaStream {
            id: format!("{}-local", self.label),
            tracks: tracks
                .iter()
                .map(|spec| MediaTrack {
                    id: format!("{}-{}", self.label, spec.name),
                    spec: spec.clone(),
                })
                .collect(),
        };
        tracing::debug!(stream = %stream.id, tracks = stream.tracks.len(), "synthetic media acquired");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracks::{default_audio_track, default_tracks};

    #[tokio::test]
    async fn acquire_labels_tracks_and_stream() {
        let stream = SyntheticMediaSource::new("alice")
            .acquire(&default_tracks())
            .await
            .expect("acquire");
        assert_eq!(stream.id, "alice-local");
        let ids: Vec<&str> = stream.tracks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["alice-audio0", "alice-video0"]);
    }

    #[tokio::test]
    async fn acquire_rejects_empty_and_duplicate_requests() {
        let source = SyntheticMediaSource::new("alice");
        assert_eq!(source.acquire(&[]).await, Err(MediaError::NoTracks));
        assert_eq!(
            source
                .acquire(&[default_audio_track(), default_audio_track()])
                .await,
            Err(MediaError::DuplicateTrack("audio0".to_string()))
        );
    }

    #[tokio::test]
    async fn unavailable_source_fails() {
        let err = SyntheticMediaSource::unavailable("alice", "no camera")
            .acquire(&default_tracks())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::DeviceUnavailable(_)));
    }
}
