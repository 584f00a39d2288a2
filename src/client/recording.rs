use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::interval;

use super::media::{MediaStream, MediaTrack};
use crate::error::{Result, SignalError};

pub const DEFAULT_RECORDING_MIME: &str = "video/webm;codecs=vp8,opus";
const DEFAULT_TIMESLICE: Duration = Duration::from_secs(1);

/// The finished recording. Ownership is handed to the completion callback;
/// persisting it is the embedding application's concern.
#[derive(Debug, Clone)]
pub struct RecordingArtifact {
    pub data: Vec<u8>,
    pub filename: String,
    pub duration: Duration,
    pub created_at: SystemTime,
    pub mime_type: String,
}

/// Container encoder seam. Encodes the combined recording stream in fixed
/// time slices so memory stays bounded by the slice size, not call length.
pub trait MediaEncoder: Send {
    /// One time slice worth of encoded container data.
    fn encode_slice(&mut self, stream: &MediaStream, elapsed: Duration) -> Vec<u8>;

    /// Container trailer, emitted once at stop.
    fn finalize(&mut self) -> Vec<u8>;
}

/// Creates encoders for a requested MIME type; `None` means the runtime
/// does not support that encoding.
pub trait EncoderFactory: Send + Sync {
    fn create(&self, mime_type: &str) -> Option<Box<dyn MediaEncoder>>;
}

pub type CompletionCallback = Box<dyn FnMut(RecordingArtifact) + Send>;

struct ActiveRecording {
    stream: MediaStream,
    started_at: Instant,
    created_at: SystemTime,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Vec<u8>>,
}

/// Records the live call: remote audio+video merged with a clone of the
/// local audio track, so both sides end up in the artifact.
pub struct RecordingCapturer {
    factory: Arc<dyn EncoderFactory>,
    mime_type: String,
    timeslice: Duration,
    on_complete: Option<CompletionCallback>,
    active: Option<ActiveRecording>,
}

impl RecordingCapturer {
    pub fn new(factory: Arc<dyn EncoderFactory>, mime_type: &str) -> Self {
        Self {
            factory,
            mime_type: mime_type.to_string(),
            timeslice: DEFAULT_TIMESLICE,
            on_complete: None,
            active: None,
        }
    }

    pub fn with_timeslice(mut self, timeslice: Duration) -> Self {
        self.timeslice = timeslice;
        self
    }

    /// Registers the callback that receives each finished artifact.
    pub fn on_complete(&mut self, callback: CompletionCallback) {
        self.on_complete = Some(callback);
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Starts recording. Requires an established remote stream; calling
    /// while already recording is a no-op.
    pub fn start(
        &mut self,
        remote_stream: Option<&MediaStream>,
        local_audio: Option<&MediaTrack>,
    ) -> Result<()> {
        if self.active.is_some() {
            tracing::debug!("Recording already in progress, ignoring start");
            return Ok(());
        }

        let remote = remote_stream.ok_or(SignalError::RecordingUnavailable)?;
        if remote.is_empty() {
            return Err(SignalError::RecordingUnavailable);
        }

        let encoder = self
            .factory
            .create(&self.mime_type)
            .ok_or_else(|| SignalError::RecordingUnsupported(self.mime_type.clone()))?;

        // Clone every track into the recording stream so releasing it at
        // stop cannot touch the live call's tracks.
        let mut tracks: Vec<MediaTrack> =
            remote.tracks().iter().map(|t| t.clone_track()).collect();
        if let Some(audio) = local_audio {
            tracks.push(audio.clone_track());
        }
        let stream = MediaStream::new(tracks);

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(encode_loop(
            encoder,
            stream.clone(),
            self.timeslice,
            stop_rx,
        ));

        self.active = Some(ActiveRecording {
            stream,
            started_at: Instant::now(),
            created_at: SystemTime::now(),
            stop_tx,
            task,
        });

        tracing::info!(mime_type = %self.mime_type, "Recording started");
        Ok(())
    }

    /// Stops recording, assembles the artifact and hands it to the
    /// completion callback. Stopping when not recording is a no-op.
    pub async fn stop(&mut self) -> Result<bool> {
        let Some(active) = self.active.take() else {
            return Ok(false);
        };

        // Asking the encoder loop to finalize; a dropped receiver just means
        // it already exited.
        let _ = active.stop_tx.send(());
        let data = active
            .task
            .await
            .map_err(|e| SignalError::internal(format!("encoder task failed: {}", e)))?;

        active.stream.stop_all();

        let duration = active.started_at.elapsed();
        let artifact = RecordingArtifact {
            data,
            filename: artifact_filename(active.created_at),
            duration,
            created_at: active.created_at,
            mime_type: self.mime_type.clone(),
        };

        tracing::info!(
            filename = %artifact.filename,
            duration_secs = duration.as_secs(),
            bytes = artifact.data.len(),
            "Recording stopped"
        );

        if let Some(callback) = self.on_complete.as_mut() {
            callback(artifact);
        }
        Ok(true)
    }
}

async fn encode_loop(
    mut encoder: Box<dyn MediaEncoder>,
    stream: MediaStream,
    timeslice: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) -> Vec<u8> {
    let started = Instant::now();
    let mut ticker = interval(timeslice);
    ticker.tick().await; // first tick fires immediately
    let mut data = Vec::new();

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                let chunk = encoder.encode_slice(&stream, started.elapsed());
                data.extend_from_slice(&chunk);
            }
        }
    }

    data.extend_from_slice(&encoder.finalize());
    data
}

fn artifact_filename(created_at: SystemTime) -> String {
    let secs = created_at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("session-recording-{}.webm", secs)
}
