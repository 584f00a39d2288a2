//! Client-side call engine: local media capture, the pure negotiation
//! state machine, call recording and the async session driver that wires
//! them to a signaling transport and a peer connection.

pub mod media;
pub mod negotiation;
pub mod recording;
pub mod session;

pub use media::{LocalMediaController, MediaDevices, MediaStream, MediaTrack, TrackKind, TrackSource};
pub use negotiation::{CallPhase, Effect, NegotiationMachine, NegotiationRole, SessionEvent};
pub use recording::{
    EncoderFactory, MediaEncoder, RecordingArtifact, RecordingCapturer, DEFAULT_RECORDING_MIME,
};
pub use session::{CallSession, ChatLine, PeerLink, PeerLinkFactory, SignalingTransport, TrackSwap};
