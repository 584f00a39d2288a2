use serde_json::Value;

/// Lifecycle of one client-side call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    JoiningRoom,
    WaitingForPeer,
    /// Sent an offer, waiting for the answer.
    WaitingForAnswer,
    /// Applied a remote offer, answer sent, waiting for connectivity.
    Answering,
    Connected,
    Reconnecting,
    Ended,
}

/// Which side of the current negotiation round this machine plays.
/// The side that observes an existing participant initiates; the other
/// side only ever responds. Join order decides, so the roles can never
/// glare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

/// Inputs to the machine: signaling events, peer-connection callbacks and
/// user actions, all funnelled through the single transition function.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    JoinRequested { room_id: String, user_name: String },
    ExistingParticipants { participants: Vec<String> },
    UserJoined { socket_id: String, user_name: String },
    UserLeft { socket_id: String },
    OfferReceived { from: String, sdp: String },
    AnswerReceived { from: String, sdp: String },
    CandidateReceived { from: String, candidate: Value },
    /// The driver finished applying a remote description.
    RemoteDescriptionApplied,
    /// The underlying peer connection reports connected.
    PeerConnected,
    /// Offer/answer creation or application failed.
    NegotiationFailed { reason: String },
    TransportLost,
    TransportRestored,
    /// Track substitution needs a fresh offer/answer round.
    RenegotiationNeeded,
    ScreenShareStarted,
    ScreenShareEnded,
    HangUp,
}

/// Side effects the driver must execute, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    SendJoin { room_id: String, user_name: String },
    /// Create a local offer, set it as local description, send to target.
    CreateAndSendOffer { target: String },
    /// Apply the given SDP as remote description, then feed
    /// [`SessionEvent::RemoteDescriptionApplied`] back in.
    ApplyRemoteDescription { sdp: String },
    /// Create an answer, set it as local description, send to target.
    CreateAndSendAnswer { target: String },
    ApplyCandidate { candidate: Value },
    ClosePeer,
    StopRecording,
    StopScreenShare,
    /// Screen share ended from the native UI; swap the camera track back.
    RevertToCamera,
    NotifyStatus { text: String },
}

/// Pure negotiation state machine for a two-party call.
///
/// Holds no transport, no media and no peer connection; every transition is
/// `(state, event) -> effects`, which keeps the concurrent event flow
/// testable without a network or devices. At most one remote peer is
/// tracked at a time; signaling from other handles is ignored while a
/// round is in progress.
#[derive(Debug)]
pub struct NegotiationMachine {
    phase: CallPhase,
    role: Option<NegotiationRole>,
    room_id: Option<String>,
    user_name: Option<String>,
    remote_peer: Option<String>,
    remote_description_set: bool,
    /// Buffered early candidates, tagged with the sending handle; flushed
    /// once a remote description is in place, at which point candidates
    /// from anyone but the tracked peer are discarded as stale.
    pending_candidates: Vec<(String, Value)>,
    screen_sharing: bool,
    renegotiating: bool,
}

impl Default for NegotiationMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl NegotiationMachine {
    pub fn new() -> Self {
        Self {
            phase: CallPhase::Idle,
            role: None,
            room_id: None,
            user_name: None,
            remote_peer: None,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            screen_sharing: false,
            renegotiating: false,
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn role(&self) -> Option<NegotiationRole> {
        self.role
    }

    pub fn remote_peer(&self) -> Option<&str> {
        self.remote_peer.as_deref()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen_sharing
    }

    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    /// The single transition function.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        match event {
            SessionEvent::JoinRequested { room_id, user_name } => {
                self.on_join_requested(room_id, user_name)
            }
            SessionEvent::ExistingParticipants { participants } => {
                self.on_existing_participants(participants)
            }
            SessionEvent::UserJoined { socket_id, user_name } => {
                self.on_user_joined(socket_id, user_name)
            }
            SessionEvent::UserLeft { socket_id } => self.on_user_left(socket_id),
            SessionEvent::OfferReceived { from, sdp } => self.on_offer(from, sdp),
            SessionEvent::AnswerReceived { from, sdp } => self.on_answer(from, sdp),
            SessionEvent::CandidateReceived { from, candidate } => {
                self.on_candidate(from, candidate)
            }
            SessionEvent::RemoteDescriptionApplied => self.on_remote_description_applied(),
            SessionEvent::PeerConnected => self.on_peer_connected(),
            SessionEvent::NegotiationFailed { reason } => self.on_negotiation_failed(reason),
            SessionEvent::TransportLost => self.on_transport_lost(),
            SessionEvent::TransportRestored => self.on_transport_restored(),
            SessionEvent::RenegotiationNeeded => self.on_renegotiation_needed(),
            SessionEvent::ScreenShareStarted => {
                self.screen_sharing = true;
                vec![]
            }
            SessionEvent::ScreenShareEnded => self.on_screen_share_ended(),
            SessionEvent::HangUp => self.on_hang_up(),
        }
    }

    fn on_join_requested(&mut self, room_id: String, user_name: String) -> Vec<Effect> {
        if self.phase != CallPhase::Idle {
            tracing::warn!(phase = ?self.phase, "Join requested outside Idle, ignoring");
            return vec![];
        }

        self.phase = CallPhase::JoiningRoom;
        self.room_id = Some(room_id.clone());
        self.user_name = Some(user_name.clone());
        vec![Effect::SendJoin { room_id, user_name }]
    }

    fn on_existing_participants(&mut self, participants: Vec<String>) -> Vec<Effect> {
        if self.phase != CallPhase::JoiningRoom {
            return vec![];
        }

        match participants.into_iter().next() {
            // The side that observes an existing participant initiates.
            Some(target) => {
                self.phase = CallPhase::WaitingForAnswer;
                self.role = Some(NegotiationRole::Offerer);
                self.remote_peer = Some(target.clone());
                self.remote_description_set = false;
                vec![Effect::CreateAndSendOffer { target }]
            }
            None => {
                self.phase = CallPhase::WaitingForPeer;
                vec![Effect::NotifyStatus {
                    text: "Waiting for the other participant to join".to_string(),
                }]
            }
        }
    }

    fn on_user_joined(&mut self, socket_id: String, user_name: String) -> Vec<Effect> {
        // The newcomer initiates the offer; the existing side just takes
        // note and answers when it arrives.
        tracing::debug!(socket_id = %socket_id, user_name = %user_name, "Peer joined room");
        vec![]
    }

    fn on_offer(&mut self, from: String, sdp: String) -> Vec<Effect> {
        match self.phase {
            CallPhase::Idle | CallPhase::JoiningRoom | CallPhase::WaitingForPeer => {
                self.phase = CallPhase::Answering;
                self.role = Some(NegotiationRole::Answerer);
                self.remote_peer = Some(from.clone());
                self.remote_description_set = false;
                vec![
                    Effect::ApplyRemoteDescription { sdp },
                    Effect::CreateAndSendAnswer { target: from },
                ]
            }
            CallPhase::Connected if self.is_remote(&from) => {
                // Renegotiation offer from the current peer, e.g. a screen
                // share track swap. No visible state regression.
                self.remote_description_set = false;
                vec![
                    Effect::ApplyRemoteDescription { sdp },
                    Effect::CreateAndSendAnswer { target: from },
                ]
            }
            _ => {
                tracing::debug!(from = %from, phase = ?self.phase, "Ignoring offer");
                vec![]
            }
        }
    }

    fn on_answer(&mut self, from: String, sdp: String) -> Vec<Effect> {
        if !self.is_remote(&from) {
            tracing::debug!(from = %from, "Ignoring answer from unknown peer");
            return vec![];
        }

        match self.phase {
            CallPhase::WaitingForAnswer => {
                self.remote_description_set = false;
                vec![Effect::ApplyRemoteDescription { sdp }]
            }
            CallPhase::Connected if self.renegotiating => {
                self.renegotiating = false;
                self.remote_description_set = false;
                vec![Effect::ApplyRemoteDescription { sdp }]
            }
            _ => {
                tracing::debug!(phase = ?self.phase, "Ignoring unexpected answer");
                vec![]
            }
        }
    }

    fn on_candidate(&mut self, from: String, candidate: Value) -> Vec<Effect> {
        match self.remote_peer.as_deref() {
            Some(remote) if remote == from => {
                if self.remote_description_set {
                    vec![Effect::ApplyCandidate { candidate }]
                } else {
                    self.pending_candidates.push((from, candidate));
                    vec![]
                }
            }
            Some(_) => {
                tracing::debug!(from = %from, "Ignoring candidate from untracked peer");
                vec![]
            }
            // Candidates carry no ordering guarantee relative to the offer
            // they belong to, so a candidate can arrive before the round
            // even starts. Buffer it until we know who the peer is.
            None => {
                self.pending_candidates.push((from, candidate));
                vec![]
            }
        }
    }

    fn on_remote_description_applied(&mut self) -> Vec<Effect> {
        self.remote_description_set = true;
        let remote = self.remote_peer.clone();
        self.pending_candidates
            .drain(..)
            .filter(|(from, _)| Some(from.as_str()) == remote.as_deref())
            .map(|(_, candidate)| Effect::ApplyCandidate { candidate })
            .collect()
    }

    fn on_peer_connected(&mut self) -> Vec<Effect> {
        match self.phase {
            CallPhase::WaitingForAnswer | CallPhase::Answering => {
                self.phase = CallPhase::Connected;
                vec![Effect::NotifyStatus {
                    text: "Connected".to_string(),
                }]
            }
            _ => vec![],
        }
    }

    fn on_negotiation_failed(&mut self, reason: String) -> Vec<Effect> {
        tracing::error!(reason = %reason, "Negotiation failed, resetting to a safe state");
        let mut effects = self.reset_peer_state();
        effects.push(Effect::NotifyStatus {
            text: "Connection setup failed, waiting for the other participant".to_string(),
        });
        effects
    }

    fn on_user_left(&mut self, socket_id: String) -> Vec<Effect> {
        if !self.is_remote(&socket_id) {
            return vec![];
        }

        let mut effects = self.reset_peer_state();
        effects.push(Effect::NotifyStatus {
            text: "The other participant left".to_string(),
        });
        effects
    }

    fn on_transport_lost(&mut self) -> Vec<Effect> {
        if matches!(self.phase, CallPhase::Idle | CallPhase::Ended) {
            return vec![];
        }

        let mut effects = self.reset_peer_state();
        self.phase = CallPhase::Reconnecting;
        effects.push(Effect::NotifyStatus {
            text: "Signaling connection lost, reconnecting".to_string(),
        });
        effects
    }

    fn on_transport_restored(&mut self) -> Vec<Effect> {
        if self.phase != CallPhase::Reconnecting {
            return vec![];
        }

        // No session resumption: negotiation restarts from a fresh join.
        match (self.room_id.clone(), self.user_name.clone()) {
            (Some(room_id), Some(user_name)) => {
                self.phase = CallPhase::JoiningRoom;
                vec![Effect::SendJoin { room_id, user_name }]
            }
            _ => {
                self.phase = CallPhase::Idle;
                vec![]
            }
        }
    }

    fn on_renegotiation_needed(&mut self) -> Vec<Effect> {
        let (CallPhase::Connected, Some(target)) = (self.phase, self.remote_peer.clone()) else {
            return vec![];
        };

        self.renegotiating = true;
        vec![Effect::CreateAndSendOffer { target }]
    }

    fn on_screen_share_ended(&mut self) -> Vec<Effect> {
        if !self.screen_sharing {
            return vec![];
        }
        self.screen_sharing = false;
        vec![Effect::RevertToCamera]
    }

    fn on_hang_up(&mut self) -> Vec<Effect> {
        self.phase = CallPhase::Ended;
        self.remote_peer = None;
        self.remote_description_set = false;
        self.pending_candidates.clear();

        let mut effects = vec![Effect::StopRecording];
        if self.screen_sharing {
            self.screen_sharing = false;
            effects.push(Effect::StopScreenShare);
        }
        effects.push(Effect::ClosePeer);
        effects.push(Effect::NotifyStatus {
            text: "Call ended".to_string(),
        });
        effects
    }

    /// Tear down the peer connection and go back to waiting. Never leaves
    /// the connection half-configured.
    fn reset_peer_state(&mut self) -> Vec<Effect> {
        self.phase = CallPhase::WaitingForPeer;
        self.role = None;
        self.remote_peer = None;
        self.remote_description_set = false;
        self.pending_candidates.clear();
        self.renegotiating = false;
        vec![Effect::ClosePeer, Effect::StopRecording]
    }

    fn is_remote(&self, handle: &str) -> bool {
        self.remote_peer.as_deref() == Some(handle)
    }
}
