use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events accepted from a client over the signaling connection.
///
/// SDP and candidate payloads are relayed verbatim and never schema-validated
/// beyond the presence of the fields named here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom {
        room_id: String,
        user_name: String,
    },

    Offer {
        target_id: String,
        sdp: String,
    },

    Answer {
        target_id: String,
        sdp: String,
    },

    IceCandidate {
        target_id: String,
        candidate: Value,
    },

    ChatMessage {
        room_id: String,
        sender: String,
        message: String,
    },
}

/// Events emitted to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Sent once to the joiner, before any broadcast about it.
    ExistingParticipants {
        participants: Vec<String>,
    },

    UserJoined {
        socket_id: String,
        user_name: String,
    },

    UserLeft {
        socket_id: String,
    },

    Offer {
        from: String,
        sdp: String,
    },

    Answer {
        from: String,
        sdp: String,
    },

    IceCandidate {
        from: String,
        candidate: Value,
    },

    /// Timestamp is stamped by the server, epoch milliseconds.
    ChatMessage {
        sender: String,
        message: String,
        timestamp: u64,
    },
}
