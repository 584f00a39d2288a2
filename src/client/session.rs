use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;

use super::media::{LocalMediaController, MediaDevices, MediaStream, MediaTrack, TrackKind};
use super::negotiation::{CallPhase, Effect, NegotiationMachine, SessionEvent};
use super::recording::{CompletionCallback, EncoderFactory, RecordingCapturer};
use crate::error::Result;
use crate::signaling::{ClientEvent, ServerEvent};

/// Outbound half of the signaling connection, injected so the whole engine
/// runs against a fake in tests.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn send(&self, event: ClientEvent) -> Result<()>;
    async fn close(&self);
}

/// Outcome of swapping the outgoing video track on a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSwap {
    /// Substituted in place, no offer/answer round needed.
    InPlace,
    /// The remote side requires a fresh negotiation round.
    NeedsNegotiation,
}

/// Abstraction over the platform's peer connection. The engine never looks
/// inside SDP or candidate payloads.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn create_offer(&self) -> Result<String>;
    async fn create_answer(&self) -> Result<String>;
    async fn set_remote_description(&self, sdp: &str) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: &Value) -> Result<()>;
    async fn replace_video_track(&self, track: &MediaTrack) -> Result<TrackSwap>;
    async fn close(&self);
}

/// Creates a fresh peer link per negotiation round; teardown always
/// discards the old one.
pub trait PeerLinkFactory: Send + Sync {
    fn create(&self) -> Arc<dyn PeerLink>;
}

/// A chat line as seen by this client.
#[derive(Debug, Clone)]
pub struct ChatLine {
    pub sender: String,
    pub message: String,
    pub timestamp: u64,
}

struct SessionState {
    machine: NegotiationMachine,
    media: LocalMediaController,
    recorder: RecordingCapturer,
    peer: Option<Arc<dyn PeerLink>>,
    remote_stream: Option<MediaStream>,
    call_ticker: Option<JoinHandle<()>>,
    recording_ticker: Option<JoinHandle<()>>,
    screen_watcher: Option<JoinHandle<()>>,
    on_ended: Option<Box<dyn FnOnce() + Send>>,
}

/// Drives one call: owns the negotiation machine, the local media
/// controller and the recording capturer, and executes machine effects
/// against the injected transport and peer link.
///
/// All state lives behind a single mutex, so effect execution is
/// serialized the same way the machine assumes.
pub struct CallSession {
    transport: Arc<dyn SignalingTransport>,
    peer_factory: Arc<dyn PeerLinkFactory>,
    state: Mutex<SessionState>,
    call_seconds: Arc<AtomicU64>,
    recording_seconds: Arc<AtomicU64>,
    status_tx: watch::Sender<String>,
    chat_tx: broadcast::Sender<ChatLine>,
}

impl CallSession {
    pub fn new(
        transport: Arc<dyn SignalingTransport>,
        peer_factory: Arc<dyn PeerLinkFactory>,
        devices: Arc<dyn MediaDevices>,
        encoder_factory: Arc<dyn EncoderFactory>,
        recording_mime: &str,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(String::new());
        let (chat_tx, _) = broadcast::channel(64);

        Arc::new(Self {
            transport,
            peer_factory,
            state: Mutex::new(SessionState {
                machine: NegotiationMachine::new(),
                media: LocalMediaController::new(devices),
                recorder: RecordingCapturer::new(encoder_factory, recording_mime),
                peer: None,
                remote_stream: None,
                call_ticker: None,
                recording_ticker: None,
                screen_watcher: None,
                on_ended: None,
            }),
            call_seconds: Arc::new(AtomicU64::new(0)),
            recording_seconds: Arc::new(AtomicU64::new(0)),
            status_tx,
            chat_tx,
        })
    }

    /// Receives each finished recording artifact.
    pub async fn on_recording_complete(&self, callback: CompletionCallback) {
        let mut state = self.state.lock().await;
        state.recorder.on_complete(callback);
    }

    /// Invoked once when the call ends.
    pub async fn on_call_ended(&self, callback: Box<dyn FnOnce() + Send>) {
        let mut state = self.state.lock().await;
        state.on_ended = Some(callback);
    }

    /// User-visible status line updates.
    pub fn status(&self) -> watch::Receiver<String> {
        self.status_tx.subscribe()
    }

    pub fn chat(&self) -> broadcast::Receiver<ChatLine> {
        self.chat_tx.subscribe()
    }

    pub async fn phase(&self) -> CallPhase {
        self.state.lock().await.machine.phase()
    }

    /// Seconds since the room was joined.
    pub fn call_duration_secs(&self) -> u64 {
        self.call_seconds.load(Ordering::SeqCst)
    }

    /// Seconds the active recording has been running; resets when a new
    /// recording starts.
    pub fn recording_duration_secs(&self) -> u64 {
        self.recording_seconds.load(Ordering::SeqCst)
    }

    /// Acquires local media and joins the room. A media-access failure is
    /// surfaced but does not abort the join: the call proceeds in degraded
    /// mode with no local stream.
    pub async fn join_room(self: &Arc<Self>, room_id: &str, user_name: &str) {
        let mut state = self.state.lock().await;

        if let Err(e) = state.media.acquire(true, true).await {
            tracing::warn!(error = %e, "Joining without local media");
            let text = match e.remediation() {
                Some(fix) => format!("{}. {}", e, fix),
                None => e.to_string(),
            };
            let _ = self.status_tx.send(text);
        }

        let effects = state.machine.handle(SessionEvent::JoinRequested {
            room_id: room_id.to_string(),
            user_name: user_name.to_string(),
        });
        self.run_effects(&mut state, effects).await;

        self.start_call_ticker(&mut state);
    }

    /// Entry point for every event arriving on the signaling connection.
    pub async fn handle_server_event(self: &Arc<Self>, event: ServerEvent) {
        let session_event = match event {
            ServerEvent::ExistingParticipants { participants } => {
                SessionEvent::ExistingParticipants { participants }
            }
            ServerEvent::UserJoined {
                socket_id,
                user_name,
            } => SessionEvent::UserJoined {
                socket_id,
                user_name,
            },
            ServerEvent::UserLeft { socket_id } => SessionEvent::UserLeft { socket_id },
            ServerEvent::Offer { from, sdp } => SessionEvent::OfferReceived { from, sdp },
            ServerEvent::Answer { from, sdp } => SessionEvent::AnswerReceived { from, sdp },
            ServerEvent::IceCandidate { from, candidate } => {
                SessionEvent::CandidateReceived { from, candidate }
            }
            ServerEvent::ChatMessage {
                sender,
                message,
                timestamp,
            } => {
                let _ = self.chat_tx.send(ChatLine {
                    sender,
                    message,
                    timestamp,
                });
                return;
            }
        };

        self.dispatch(session_event).await;
    }

    /// Platform callback: the peer connection reached a connected state.
    pub async fn peer_connected(self: &Arc<Self>) {
        self.dispatch(SessionEvent::PeerConnected).await;
    }

    /// Platform callback: the remote peer's combined stream arrived.
    pub async fn set_remote_stream(&self, stream: MediaStream) {
        let mut state = self.state.lock().await;
        state.remote_stream = Some(stream);
    }

    pub async fn transport_lost(self: &Arc<Self>) {
        self.dispatch(SessionEvent::TransportLost).await;
    }

    pub async fn transport_restored(self: &Arc<Self>) {
        self.dispatch(SessionEvent::TransportRestored).await;
    }

    pub async fn send_chat(&self, message: &str) {
        let (room_id, user_name) = {
            let state = self.state.lock().await;
            (
                state.machine.room_id().map(String::from),
                state.machine.user_name().map(String::from),
            )
        };
        let (Some(room_id), Some(sender)) = (room_id, user_name) else {
            tracing::debug!("Chat before joining a room, dropping");
            return;
        };

        if let Err(e) = self
            .transport
            .send(ClientEvent::ChatMessage {
                room_id,
                sender,
                message: message.to_string(),
            })
            .await
        {
            tracing::warn!(error = %e, "Failed to send chat message");
        }
    }

    pub async fn set_audio_enabled(&self, enabled: bool) {
        let state = self.state.lock().await;
        state.media.set_track_enabled(TrackKind::Audio, enabled);
    }

    pub async fn set_video_enabled(&self, enabled: bool) {
        let state = self.state.lock().await;
        state.media.set_track_enabled(TrackKind::Video, enabled);
    }

    /// Starts recording the live call. Fails if no remote stream has been
    /// established yet; a second start while recording is a no-op.
    pub async fn start_recording(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let was_recording = state.recorder.is_recording();

        let remote = state.remote_stream.clone();
        let local_audio = state.media.local_audio_track().cloned();
        state.recorder.start(remote.as_ref(), local_audio.as_ref())?;

        if !was_recording {
            self.start_recording_ticker(&mut state);
        }
        Ok(())
    }

    pub async fn stop_recording(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        Self::stop_recording_inner(&mut state).await
    }

    /// Swaps the outgoing camera track for a screen capture. Reverts
    /// automatically when the user stops sharing from the native UI.
    pub async fn start_screen_share(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;

        let track = state.media.acquire_screen_share().await?;
        let swap = match state.peer.clone() {
            Some(peer) => peer.replace_video_track(&track).await?,
            None => TrackSwap::InPlace,
        };

        let mut effects = state.machine.handle(SessionEvent::ScreenShareStarted);
        if swap == TrackSwap::NeedsNegotiation {
            effects.extend(state.machine.handle(SessionEvent::RenegotiationNeeded));
        }
        self.run_effects(&mut state, effects).await;

        self.watch_screen_track(&mut state, &track);
        Ok(())
    }

    pub async fn stop_screen_share(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if let Some(watcher) = state.screen_watcher.take() {
            watcher.abort();
        }
        let effects = state.machine.handle(SessionEvent::ScreenShareEnded);
        self.run_effects(&mut state, effects).await;
    }

    /// Manual, synchronous teardown: stop recording, stop screen share,
    /// disconnect signaling, release media, fire the end-of-call callback.
    pub async fn end_call(self: &Arc<Self>) {
        let mut state = self.state.lock().await;

        let effects = state.machine.handle(SessionEvent::HangUp);
        self.run_effects(&mut state, effects).await;

        self.transport.close().await;
        state.media.release();
        state.remote_stream = None;

        for ticker in [
            state.call_ticker.take(),
            state.recording_ticker.take(),
            state.screen_watcher.take(),
        ]
        .into_iter()
        .flatten()
        {
            ticker.abort();
        }

        if let Some(callback) = state.on_ended.take() {
            callback();
        }
    }

    async fn dispatch(self: &Arc<Self>, event: SessionEvent) {
        let mut state = self.state.lock().await;
        let effects = state.machine.handle(event);
        self.run_effects(&mut state, effects).await;
    }

    /// Executes machine effects in order. Effects can fan out into further
    /// machine transitions (remote description applied, negotiation
    /// failure), which are appended to the same queue.
    async fn run_effects(self: &Arc<Self>, state: &mut SessionState, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::SendJoin { room_id, user_name } => {
                    self.send_or_report(state, &mut queue, ClientEvent::JoinRoom { room_id, user_name })
                        .await;
                }
                Effect::CreateAndSendOffer { target } => {
                    let peer = Self::ensure_peer(&self.peer_factory, state);
                    match peer.create_offer().await {
                        Ok(sdp) => {
                            self.send_or_report(
                                state,
                                &mut queue,
                                ClientEvent::Offer {
                                    target_id: target,
                                    sdp,
                                },
                            )
                            .await;
                        }
                        Err(e) => {
                            Self::fail_negotiation(state, &mut queue, &e.to_string());
                        }
                    }
                }
                Effect::ApplyRemoteDescription { sdp } => {
                    let peer = Self::ensure_peer(&self.peer_factory, state);
                    match peer.set_remote_description(&sdp).await {
                        Ok(()) => {
                            let follow_on =
                                state.machine.handle(SessionEvent::RemoteDescriptionApplied);
                            queue.extend(follow_on);
                        }
                        Err(e) => {
                            Self::fail_negotiation(state, &mut queue, &e.to_string());
                        }
                    }
                }
                Effect::CreateAndSendAnswer { target } => {
                    let peer = Self::ensure_peer(&self.peer_factory, state);
                    match peer.create_answer().await {
                        Ok(sdp) => {
                            self.send_or_report(
                                state,
                                &mut queue,
                                ClientEvent::Answer {
                                    target_id: target,
                                    sdp,
                                },
                            )
                            .await;
                        }
                        Err(e) => {
                            Self::fail_negotiation(state, &mut queue, &e.to_string());
                        }
                    }
                }
                Effect::ApplyCandidate { candidate } => {
                    if let Some(peer) = state.peer.clone() {
                        if let Err(e) = peer.add_ice_candidate(&candidate).await {
                            tracing::warn!(error = %e, "Failed to add ICE candidate");
                        }
                    }
                }
                Effect::ClosePeer => {
                    if let Some(peer) = state.peer.take() {
                        peer.close().await;
                    }
                    state.remote_stream = None;
                    if let Some(watcher) = state.screen_watcher.take() {
                        watcher.abort();
                    }
                }
                Effect::StopRecording => {
                    if let Err(e) = Self::stop_recording_inner(state).await {
                        tracing::error!(error = %e, "Failed to stop recording during teardown");
                    }
                }
                Effect::StopScreenShare => {
                    state.media.stop_screen_share();
                }
                Effect::RevertToCamera => {
                    state.media.stop_screen_share();
                    let camera = state.media.camera_track().cloned();
                    if let (Some(peer), Some(camera)) = (state.peer.clone(), camera) {
                        match peer.replace_video_track(&camera).await {
                            Ok(TrackSwap::NeedsNegotiation) => {
                                let follow_on =
                                    state.machine.handle(SessionEvent::RenegotiationNeeded);
                                queue.extend(follow_on);
                            }
                            Ok(TrackSwap::InPlace) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to restore camera track");
                            }
                        }
                    }
                }
                Effect::NotifyStatus { text } => {
                    let _ = self.status_tx.send(text);
                }
            }
        }
    }

    async fn send_or_report(
        self: &Arc<Self>,
        state: &mut SessionState,
        queue: &mut VecDeque<Effect>,
        event: ClientEvent,
    ) {
        if let Err(e) = self.transport.send(event).await {
            tracing::error!(error = %e, "Signaling send failed");
            // Transient by contract: negotiation restarts after reconnect.
            queue.clear();
            let follow_on = state.machine.handle(SessionEvent::TransportLost);
            queue.extend(follow_on);
        }
    }

    fn fail_negotiation(state: &mut SessionState, queue: &mut VecDeque<Effect>, reason: &str) {
        // Abandon the rest of the round; the machine decides what a safe
        // state looks like.
        queue.clear();
        let follow_on = state.machine.handle(SessionEvent::NegotiationFailed {
            reason: reason.to_string(),
        });
        queue.extend(follow_on);
    }

    fn ensure_peer(
        factory: &Arc<dyn PeerLinkFactory>,
        state: &mut SessionState,
    ) -> Arc<dyn PeerLink> {
        state
            .peer
            .get_or_insert_with(|| factory.create())
            .clone()
    }

    async fn stop_recording_inner(state: &mut SessionState) -> Result<bool> {
        if let Some(ticker) = state.recording_ticker.take() {
            ticker.abort();
        }
        state.recorder.stop().await
    }

    fn start_call_ticker(self: &Arc<Self>, state: &mut SessionState) {
        if state.call_ticker.is_some() {
            return;
        }
        self.call_seconds.store(0, Ordering::SeqCst);
        let counter = self.call_seconds.clone();
        state.call_ticker = Some(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    fn start_recording_ticker(&self, state: &mut SessionState) {
        if let Some(old) = state.recording_ticker.take() {
            old.abort();
        }
        self.recording_seconds.store(0, Ordering::SeqCst);
        let counter = self.recording_seconds.clone();
        state.recording_ticker = Some(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    fn watch_screen_track(self: &Arc<Self>, state: &mut SessionState, track: &MediaTrack) {
        if let Some(old) = state.screen_watcher.take() {
            old.abort();
        }

        let mut ended = track.ended();
        let session = Arc::downgrade(self);
        state.screen_watcher = Some(tokio::spawn(async move {
            while ended.changed().await.is_ok() {
                if *ended.borrow() {
                    if let Some(session) = session.upgrade() {
                        session.dispatch(SessionEvent::ScreenShareEnded).await;
                    }
                    break;
                }
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::media::TrackSource;
    use crate::client::recording::{MediaEncoder, DEFAULT_RECORDING_MIME};
    use crate::error::SignalError;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;

    struct FakeTransport {
        sent: StdMutex<Vec<ClientEvent>>,
        closed: AtomicBool,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            })
        }

        fn sent(&self) -> Vec<ClientEvent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SignalingTransport for FakeTransport {
        async fn send(&self, event: ClientEvent) -> Result<()> {
            self.sent.lock().unwrap().push(event);
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct FakePeer {
        remote_descriptions: StdMutex<Vec<String>>,
        candidates: StdMutex<Vec<Value>>,
        replaced_tracks: StdMutex<Vec<TrackSource>>,
        swap: TrackSwap,
        closed: AtomicBool,
    }

    impl FakePeer {
        fn new(swap: TrackSwap) -> Arc<Self> {
            Arc::new(Self {
                remote_descriptions: StdMutex::new(Vec::new()),
                candidates: StdMutex::new(Vec::new()),
                replaced_tracks: StdMutex::new(Vec::new()),
                swap,
                closed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl PeerLink for FakePeer {
        async fn create_offer(&self) -> Result<String> {
            Ok("v=0 fake-offer".to_string())
        }

        async fn create_answer(&self) -> Result<String> {
            Ok("v=0 fake-answer".to_string())
        }

        async fn set_remote_description(&self, sdp: &str) -> Result<()> {
            self.remote_descriptions.lock().unwrap().push(sdp.to_string());
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: &Value) -> Result<()> {
            self.candidates.lock().unwrap().push(candidate.clone());
            Ok(())
        }

        async fn replace_video_track(&self, track: &MediaTrack) -> Result<TrackSwap> {
            self.replaced_tracks.lock().unwrap().push(track.source());
            Ok(self.swap)
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct FakePeerFactory {
        peer: Arc<FakePeer>,
    }

    impl PeerLinkFactory for FakePeerFactory {
        fn create(&self) -> Arc<dyn PeerLink> {
            self.peer.clone()
        }
    }

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

    struct FakeEncoder;

    impl MediaEncoder for FakeEncoder {
        fn encode_slice(&mut self, _stream: &MediaStream, _elapsed: Duration) -> Vec<u8> {
            vec![1, 2, 3]
        }

        fn finalize(&mut self) -> Vec<u8> {
            vec![9]
        }
    }

    struct FakeEncoderFactory;

    impl EncoderFactory for FakeEncoderFactory {
        fn create(&self, _mime_type: &str) -> Option<Box<dyn MediaEncoder>> {
            Some(Box::new(FakeEncoder))
        }
    }

    struct Harness {
        session: Arc<CallSession>,
        transport: Arc<FakeTransport>,
        peer: Arc<FakePeer>,
    }

    fn harness(deny_media: bool, swap: TrackSwap) -> Harness {
        let transport = FakeTransport::new();
        let peer = FakePeer::new(swap);
        let session = CallSession::new(
            transport.clone(),
            Arc::new(FakePeerFactory { peer: peer.clone() }),
            Arc::new(FakeDevices { deny: deny_media }),
            Arc::new(FakeEncoderFactory),
            DEFAULT_RECORDING_MIME,
        );
        Harness {
            session,
            transport,
            peer,
        }
    }

    fn remote_stream() -> MediaStream {
        MediaStream::new(vec![
            MediaTrack::new(TrackKind::Video, TrackSource::Camera),
            MediaTrack::new(TrackKind::Audio, TrackSource::Microphone),
        ])
    }

    #[tokio::test]
    async fn test_join_sends_join_room() {
        let h = harness(false, TrackSwap::InPlace);
        h.session.join_room("r1", "Alice").await;

        let sent = h.transport.sent();
        assert!(matches!(
            &sent[0],
            ClientEvent::JoinRoom { room_id, user_name }
                if room_id == "r1" && user_name == "Alice"
        ));
        assert_eq!(h.session.phase().await, CallPhase::JoiningRoom);
    }

    #[tokio::test]
    async fn test_existing_participant_triggers_offer() {
        let h = harness(false, TrackSwap::InPlace);
        h.session.join_room("r1", "Bob").await;
        h.session
            .handle_server_event(ServerEvent::ExistingParticipants {
                participants: vec!["peer-a".to_string()],
            })
            .await;

        let sent = h.transport.sent();
        assert!(matches!(
            &sent[1],
            ClientEvent::Offer { target_id, sdp }
                if target_id == "peer-a" && sdp == "v=0 fake-offer"
        ));
    }

    #[tokio::test]
    async fn test_incoming_offer_is_answered() {
        let h = harness(false, TrackSwap::InPlace);
        h.session.join_room("r1", "Alice").await;
        h.session
            .handle_server_event(ServerEvent::ExistingParticipants {
                participants: vec![],
            })
            .await;
        h.session
            .handle_server_event(ServerEvent::Offer {
                from: "peer-b".to_string(),
                sdp: "v=0 their-offer".to_string(),
            })
            .await;

        assert_eq!(
            h.peer.remote_descriptions.lock().unwrap().as_slice(),
            &["v=0 their-offer".to_string()]
        );
        let sent = h.transport.sent();
        assert!(matches!(
            sent.last().unwrap(),
            ClientEvent::Answer { target_id, .. } if target_id == "peer-b"
        ));
    }

    #[tokio::test]
    async fn test_candidates_flush_after_remote_description() {
        let h = harness(false, TrackSwap::InPlace);
        h.session.join_room("r1", "Alice").await;
        h.session
            .handle_server_event(ServerEvent::ExistingParticipants {
                participants: vec![],
            })
            .await;

        // Candidate precedes the offer it belongs to.
        h.session
            .handle_server_event(ServerEvent::IceCandidate {
                from: "peer-b".to_string(),
                candidate: serde_json::json!({"candidate": "candidate:1"}),
            })
            .await;
        assert!(h.peer.candidates.lock().unwrap().is_empty());

        h.session
            .handle_server_event(ServerEvent::Offer {
                from: "peer-b".to_string(),
                sdp: "v=0".to_string(),
            })
            .await;

        let candidates = h.peer.candidates.lock().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0]["candidate"], "candidate:1");
    }

    #[tokio::test]
    async fn test_media_denied_joins_in_degraded_mode() {
        let h = harness(true, TrackSwap::InPlace);
        h.session.join_room("r1", "Alice").await;

        // Join still goes out; the status line carries the remediation.
        assert!(matches!(
            &h.transport.sent()[0],
            ClientEvent::JoinRoom { .. }
        ));
        let status = h.session.status();
        assert!(status.borrow().contains("camera"));
    }

    #[tokio::test]
    async fn test_recording_requires_remote_stream() {
        let h = harness(false, TrackSwap::InPlace);
        h.session.join_room("r1", "Alice").await;

        let err = h.session.start_recording().await.unwrap_err();
        assert!(matches!(err, SignalError::RecordingUnavailable));

        h.session.set_remote_stream(remote_stream()).await;
        h.session.start_recording().await.unwrap();
        let produced = h.session.stop_recording().await.unwrap();
        assert!(produced);
    }

    #[tokio::test]
    async fn test_remote_leaving_stops_recording_and_closes_peer() {
        let h = harness(false, TrackSwap::InPlace);
        h.session.join_room("r1", "Alice").await;
        h.session
            .handle_server_event(ServerEvent::ExistingParticipants {
                participants: vec!["peer-a".to_string()],
            })
            .await;
        h.session.set_remote_stream(remote_stream()).await;
        h.session.start_recording().await.unwrap();

        h.session
            .handle_server_event(ServerEvent::UserLeft {
                socket_id: "peer-a".to_string(),
            })
            .await;

        assert_eq!(h.session.phase().await, CallPhase::WaitingForPeer);
        assert!(h.peer.closed.load(Ordering::SeqCst));
        let state = h.session.state.lock().await;
        assert!(!state.recorder.is_recording());
    }

    #[tokio::test]
    async fn test_screen_share_in_place_swap() {
        let h = harness(false, TrackSwap::InPlace);
        h.session.join_room("r1", "Alice").await;
        h.session
            .handle_server_event(ServerEvent::ExistingParticipants {
                participants: vec!["peer-a".to_string()],
            })
            .await;

        h.session.start_screen_share().await.unwrap();

        let replaced = h.peer.replaced_tracks.lock().unwrap().clone();
        assert_eq!(replaced, vec![TrackSource::Screen]);
        // In-place swap never produces an extra offer.
        let offers = h
            .transport
            .sent()
            .iter()
            .filter(|e| matches!(e, ClientEvent::Offer { .. }))
            .count();
        assert_eq!(offers, 1);
    }

    #[tokio::test]
    async fn test_screen_share_needing_negotiation_reoffers() {
        let h = harness(false, TrackSwap::NeedsNegotiation);
        h.session.join_room("r1", "Alice").await;
        h.session
            .handle_server_event(ServerEvent::ExistingParticipants {
                participants: vec!["peer-a".to_string()],
            })
            .await;
        h.session
            .handle_server_event(ServerEvent::Answer {
                from: "peer-a".to_string(),
                sdp: "v=0 answer".to_string(),
            })
            .await;
        h.session.peer_connected().await;

        h.session.start_screen_share().await.unwrap();

        let offers = h
            .transport
            .sent()
            .iter()
            .filter(|e| matches!(e, ClientEvent::Offer { .. }))
            .count();
        assert_eq!(offers, 2);
        assert_eq!(h.session.phase().await, CallPhase::Connected);
    }

    #[tokio::test]
    async fn test_native_screen_stop_reverts_to_camera() {
        let h = harness(false, TrackSwap::InPlace);
        h.session.join_room("r1", "Alice").await;
        h.session
            .handle_server_event(ServerEvent::ExistingParticipants {
                participants: vec!["peer-a".to_string()],
            })
            .await;
        h.session.start_screen_share().await.unwrap();

        let screen = {
            let state = h.session.state.lock().await;
            state.media.screen_track().unwrap().clone()
        };
        screen.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let replaced = h.peer.replaced_tracks.lock().unwrap().clone();
        assert_eq!(replaced, vec![TrackSource::Screen, TrackSource::Camera]);
    }

    #[tokio::test]
    async fn test_end_call_tears_everything_down() {
        let h = harness(false, TrackSwap::InPlace);
        let (ended_tx, ended_rx) = std::sync::mpsc::channel();
        h.session
            .on_call_ended(Box::new(move || {
                let _ = ended_tx.send(());
            }))
            .await;

        h.session.join_room("r1", "Alice").await;
        h.session
            .handle_server_event(ServerEvent::ExistingParticipants {
                participants: vec!["peer-a".to_string()],
            })
            .await;
        h.session.set_remote_stream(remote_stream()).await;
        h.session.start_recording().await.unwrap();

        h.session.end_call().await;

        assert_eq!(h.session.phase().await, CallPhase::Ended);
        assert!(h.transport.closed.load(Ordering::SeqCst));
        assert!(h.peer.closed.load(Ordering::SeqCst));
        ended_rx.try_recv().unwrap();
        let state = h.session.state.lock().await;
        assert!(!state.recorder.is_recording());
        assert!(state.media.stream().is_none());
    }

    #[tokio::test]
    async fn test_chat_events_are_surfaced() {
        let h = harness(false, TrackSwap::InPlace);
        let mut chat = h.session.chat();

        h.session
            .handle_server_event(ServerEvent::ChatMessage {
                sender: "Bob".to_string(),
                message: "hi".to_string(),
                timestamp: 42,
            })
            .await;

        let line = chat.recv().await.unwrap();
        assert_eq!(line.sender, "Bob");
        assert_eq!(line.message, "hi");
        assert_eq!(line.timestamp, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_counters() {
        let h = harness(false, TrackSwap::InPlace);
        h.session.join_room("r1", "Alice").await;

        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.session.call_duration_secs(), 3);

        h.session.set_remote_stream(remote_stream()).await;
        h.session.start_recording().await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.session.recording_duration_secs(), 2);
        h.session.stop_recording().await.unwrap();

        // A fresh recording restarts its counter from zero.
        h.session.start_recording().await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(h.session.recording_duration_secs(), 0);
        h.session.stop_recording().await.unwrap();
    }
}
