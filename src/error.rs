use thiserror::Error;

/// Custom error types for the signaling server and client engine
#[derive(Debug, Error)]
pub enum SignalError {
    /// Signaling transport errors
    #[error("Signaling transport error: {0}")]
    Transport(String),

    #[error("Signaling connection closed")]
    TransportClosed,

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Invalid signaling message: {0}")]
    InvalidSignalingMessage(String),

    /// Room and participant errors
    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Participant {0} not found")]
    ParticipantNotFound(String),

    /// Negotiation errors
    #[error("Failed to create offer: {0}")]
    CreateOfferFailed(String),

    #[error("Failed to create answer: {0}")]
    CreateAnswerFailed(String),

    #[error("Failed to apply remote description: {0}")]
    SetRemoteDescriptionFailed(String),

    #[error("Failed to add ICE candidate: {0}")]
    AddIceCandidateFailed(String),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Media device errors
    #[error("Media access denied: {0}")]
    MediaAccessDenied(String),

    #[error("Media device not found: {0}")]
    MediaDeviceNotFound(String),

    #[error("Media device in use: {0}")]
    MediaDeviceInUse(String),

    /// Recording errors
    #[error("Recording unavailable: no remote stream has been established")]
    RecordingUnavailable,

    #[error("Recording unsupported: encoder rejected MIME type {0}")]
    RecordingUnsupported(String),

    /// Booking service boundary errors
    #[error("Booking service error: {0}")]
    BookingService(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Convenience type alias for Results using SignalError
pub type Result<T> = std::result::Result<T, SignalError>;

impl SignalError {
    /// Helper to create transport errors with context
    pub fn transport(msg: impl Into<String>) -> Self {
        SignalError::Transport(msg.into())
    }

    /// Helper to create negotiation errors with context
    pub fn negotiation(msg: impl Into<String>) -> Self {
        SignalError::Negotiation(msg.into())
    }

    /// Helper to create internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        SignalError::Internal(msg.into())
    }

    /// Media-access errors are surfaced to the user and must be actionable;
    /// everything else is logged and handled by resetting to a safe state.
    pub fn is_media_access(&self) -> bool {
        matches!(
            self,
            SignalError::MediaAccessDenied(_)
                | SignalError::MediaDeviceNotFound(_)
                | SignalError::MediaDeviceInUse(_)
        )
    }

    /// A user-facing remediation message for media-access failures.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            SignalError::MediaAccessDenied(_) => {
                Some("Allow camera and microphone access in your browser settings and retry")
            }
            SignalError::MediaDeviceNotFound(_) => {
                Some("Connect a camera or microphone and retry")
            }
            SignalError::MediaDeviceInUse(_) => {
                Some("Close other applications using the camera and retry")
            }
            _ => None,
        }
    }
}
