//! Local audio source
//!
//! Capturing audio is platform specific and lives behind [`MediaProvider`].
//! The session layer only needs the track handles: their ids for the
//! transport, the enabled flag for mute, and a way to stop them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MediaError;

/// Capture constraints passed to the media provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Handle to one captured audio track
#[derive(Debug)]
pub struct LocalAudioTrack {
    id: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl LocalAudioTrack {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Stopped audio track {}", self.id);
        }
    }
}

/// The acquired local media: audio tracks only
#[derive(Debug, Default)]
pub struct LocalMediaStream {
    tracks: Vec<Arc<LocalAudioTrack>>,
}

impl LocalMediaStream {
    pub fn new(tracks: Vec<Arc<LocalAudioTrack>>) -> Self {
        Self { tracks }
    }

    pub fn audio_tracks(&self) -> &[Arc<LocalAudioTrack>] {
        &self.tracks
    }

    /// Muted means no track is enabled. A stream without tracks is never muted.
    pub fn is_muted(&self) -> bool {
        !self.tracks.is_empty() && self.tracks.iter().all(|t| !t.is_enabled())
    }

    /// Set every track's enabled flag to `!muted`
    pub fn set_muted(&self, muted: bool) {
        for track in &self.tracks {
            track.set_enabled(!muted);
        }
    }

    /// Stop every track. Idempotent.
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Acquires the local audio source
#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn acquire(&self, constraints: &AudioConstraints) -> Result<Arc<LocalMediaStream>, MediaError>;
}

/// Provider yielding one track with no capture device behind it
///
/// Used by headless endpoints where audio samples are produced elsewhere.
#[derive(Debug, Default, Clone)]
pub struct SyntheticMediaProvider;

#[async_trait]
impl MediaProvider for SyntheticMediaProvider {
    async fn acquire(&self, _constraints: &AudioConstraints) -> Result<Arc<LocalMediaStream>, MediaError> {
        let track = LocalAudioTrack::new(format!("audio-{}", uuid::Uuid::new_v4().simple()));
        Ok(Arc::new(LocalMediaStream::new(vec![Arc::new(track)])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mute_flips_enabled_flags() {
        let stream = SyntheticMediaProvider
            .acquire(&AudioConstraints::default())
            .await
            .unwrap();
        assert!(!stream.is_muted());

        stream.set_muted(true);
        assert!(stream.is_muted());
        assert!(stream.audio_tracks().iter().all(|t| !t.is_enabled()));

        stream.set_muted(false);
        assert!(!stream.is_muted());
    }

    #[test]
    fn stop_is_idempotent() {
        let stream = LocalMediaStream::new(vec![Arc::new(LocalAudioTrack::new("a"))]);
        stream.stop();
        stream.stop();
        assert!(stream.audio_tracks()[0].is_stopped());
    }

    #[test]
    fn empty_stream_is_never_muted() {
        let stream = LocalMediaStream::default();
        stream.set_muted(true);
        assert!(!stream.is_muted());
    }
}
