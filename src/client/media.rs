use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::watch;

use crate::error::{Result, SignalError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Camera,
    Microphone,
    Screen,
}

/// Handle to a single capture track. Cloning via [`MediaTrack::clone_track`]
/// produces an independent track over the same source: it has its own
/// enabled/stopped flags, so stopping a clone never affects the original.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    source: TrackSource,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    ended_tx: Arc<watch::Sender<bool>>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, source: TrackSource) -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        let (ended_tx, _) = watch::channel(false);

        Self {
            id,
            kind,
            source,
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
            ended_tx: Arc::new(ended_tx),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn source(&self) -> TrackSource {
        self.source
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Mute/unmute without renegotiating anything.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Stops the track and fires the ended notification. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.ended_tx.send(true);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Fires when the track ends, including a screen-share track being
    /// stopped from the browser's native UI.
    pub fn ended(&self) -> watch::Receiver<bool> {
        self.ended_tx.subscribe()
    }

    /// Independent track over the same source, used by the recording
    /// capturer so it can be released without touching the live call.
    pub fn clone_track(&self) -> MediaTrack {
        let (ended_tx, _) = watch::channel(false);
        Self {
            id: format!("{}-clone", self.id),
            kind: self.kind,
            source: self.source,
            enabled: Arc::new(AtomicBool::new(self.is_enabled())),
            stopped: Arc::new(AtomicBool::new(false)),
            ended_tx: Arc::new(ended_tx),
        }
    }
}

/// A bundle of tracks, local or remote.
#[derive(Debug, Clone, Default)]
pub struct MediaStream {
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn tracks_of_kind(&self, kind: TrackKind) -> Vec<&MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == kind).collect()
    }

    pub fn first_of_kind(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn set_kind_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Platform capture seam. The real implementation lives in the embedding
/// application (browser/native layer); tests inject fakes.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Opens camera and/or microphone capture. Must be all-or-nothing:
    /// either every requested track is returned or the call fails.
    async fn open_capture(&self, video: bool, audio: bool) -> Result<Vec<MediaTrack>>;

    /// Opens display capture. Fails if the user denies or cancels the
    /// picker.
    async fn open_screen_capture(&self) -> Result<MediaTrack>;
}

/// Owns the local capture state for one call.
pub struct LocalMediaController {
    devices: Arc<dyn MediaDevices>,
    stream: Option<MediaStream>,
    screen_track: Option<MediaTrack>,
}

impl LocalMediaController {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            stream: None,
            screen_track: None,
        }
    }

    /// Requests camera/microphone access. On failure the previously
    /// acquired stream is left untouched; there is no partial swap.
    pub async fn acquire(&mut self, video: bool, audio: bool) -> Result<MediaStream> {
        let tracks = self.devices.open_capture(video, audio).await?;

        if let Some(old) = self.stream.take() {
            old.stop_all();
        }
        let stream = MediaStream::new(tracks);
        self.stream = Some(stream.clone());

        tracing::info!(video = video, audio = audio, "Acquired local media");
        Ok(stream)
    }

    pub fn stream(&self) -> Option<&MediaStream> {
        self.stream.as_ref()
    }

    pub fn local_audio_track(&self) -> Option<&MediaTrack> {
        self.stream.as_ref().and_then(|s| s.first_of_kind(TrackKind::Audio))
    }

    pub fn camera_track(&self) -> Option<&MediaTrack> {
        self.stream
            .as_ref()
            .and_then(|s| s.first_of_kind(TrackKind::Video))
    }

    /// Toggles mute/camera-off in place; never renegotiates and never
    /// fails, even with no stream acquired.
    pub fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        if let Some(stream) = &self.stream {
            stream.set_kind_enabled(kind, enabled);
        }
    }

    pub fn is_track_enabled(&self, kind: TrackKind) -> bool {
        self.stream
            .as_ref()
            .and_then(|s| s.first_of_kind(kind))
            .map(|t| t.is_enabled())
            .unwrap_or(false)
    }

    /// Requests display capture. The returned track ends on its own if the
    /// user stops sharing from the browser UI; callers watch
    /// [`MediaTrack::ended`] and revert to the camera track.
    pub async fn acquire_screen_share(&mut self) -> Result<MediaTrack> {
        let track = self.devices.open_screen_capture().await?;
        if track.kind() != TrackKind::Video {
            return Err(SignalError::internal("screen capture produced a non-video track"));
        }

        if let Some(old) = self.screen_track.take() {
            old.stop();
        }
        self.screen_track = Some(track.clone());

        tracing::info!(track_id = %track.id(), "Acquired screen capture");
        Ok(track)
    }

    pub fn screen_track(&self) -> Option<&MediaTrack> {
        self.screen_track.as_ref()
    }

    pub fn stop_screen_share(&mut self) {
        if let Some(track) = self.screen_track.take() {
            track.stop();
            tracing::info!(track_id = %track.id(), "Stopped screen capture");
        }
    }

    /// Stops and releases every track. Idempotent.
    pub fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop_all();
        }
        self.stop_screen_share();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDevices {
        deny: bool,
    }

    #[async_trait]
    impl MediaDevices for FakeDevices {
        async fn open_capture(&self, video: bool, audio: bool) -> Result<Vec<MediaTrack>> {
            if self.deny {
                return Err(SignalError::MediaAccessDenied("camera".into()));
            }
            let mut tracks = Vec::new();
            if video {
                tracks.push(MediaTrack::new(TrackKind::Video, TrackSource::Camera));
            }
            if audio {
                tracks.push(MediaTrack::new(TrackKind::Audio, TrackSource::Microphone));
            }
            Ok(tracks)
        }

        async fn open_screen_capture(&self) -> Result<MediaTrack> {
            if self.deny {
                return Err(SignalError::MediaAccessDenied("screen".into()));
            }
            Ok(MediaTrack::new(TrackKind::Video, TrackSource::Screen))
        }
    }

    fn controller(deny: bool) -> LocalMediaController {
        LocalMediaController::new(Arc::new(FakeDevices { deny }))
    }

    #[tokio::test]
    async fn test_acquire_returns_requested_tracks() {
        let mut media = controller(false);
        let stream = media.acquire(true, true).await.unwrap();

        assert_eq!(stream.tracks_of_kind(TrackKind::Video).len(), 1);
        assert_eq!(stream.tracks_of_kind(TrackKind::Audio).len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_failure_keeps_prior_stream() {
        let mut media = controller(false);
        media.acquire(true, true).await.unwrap();

        media.devices = Arc::new(FakeDevices { deny: true });
        let err = media.acquire(true, true).await.unwrap_err();
        assert!(err.is_media_access());

        // Prior stream untouched by the failed swap.
        let stream = media.stream().unwrap();
        assert!(!stream.is_empty());
        assert!(!stream.tracks()[0].is_stopped());
    }

    #[tokio::test]
    async fn test_toggle_video_leaves_audio_unaffected() {
        let mut media = controller(false);
        media.acquire(true, true).await.unwrap();

        media.set_track_enabled(TrackKind::Video, false);
        media.set_track_enabled(TrackKind::Video, true);

        assert!(media.is_track_enabled(TrackKind::Video));
        assert!(media.is_track_enabled(TrackKind::Audio));
    }

    #[tokio::test]
    async fn test_toggle_without_stream_does_not_panic() {
        let media = controller(false);
        media.set_track_enabled(TrackKind::Video, false);
        assert!(!media.is_track_enabled(TrackKind::Video));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let mut media = controller(false);
        let stream = media.acquire(true, true).await.unwrap();

        media.release();
        media.release();

        assert!(stream.tracks().iter().all(|t| t.is_stopped()));
        assert!(media.stream().is_none());
    }

    #[tokio::test]
    async fn test_screen_share_denied_surfaces_media_error() {
        let mut media = controller(true);
        let err = media.acquire_screen_share().await.unwrap_err();
        assert!(err.is_media_access());
    }

    #[tokio::test]
    async fn test_screen_track_fires_ended_on_stop() {
        let mut media = controller(false);
        let track = media.acquire_screen_share().await.unwrap();
        let mut ended = track.ended();

        media.stop_screen_share();

        assert!(ended.has_changed().unwrap());
        assert!(*ended.borrow_and_update());
    }

    #[tokio::test]
    async fn test_clone_track_is_independent() {
        let track = MediaTrack::new(TrackKind::Audio, TrackSource::Microphone);
        let clone = track.clone_track();

        clone.stop();
        assert!(clone.is_stopped());
        assert!(!track.is_stopped());
    }
}
