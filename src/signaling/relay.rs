use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use warp::ws::Message;

use super::message::{ClientEvent, ServerEvent};
use super::registry::RoomRegistry;

const HANDLE_LEN: usize = 16;

/// A connected signaling participant. Lives exactly as long as its
/// transport connection.
struct Participant {
    name: Option<String>,
    room_id: Option<String>,
    sender: mpsc::UnboundedSender<Message>,
}

/// Server-side presence and relay protocol.
///
/// Owns the room registry and the per-connection participant table. All
/// mutations happen inside a single write-lock critical section per event,
/// which serializes them the way the protocol requires; delivery is
/// fire-and-forget, so a vanished target means a silent drop rather than
/// an error to either party.
pub struct RelayServer {
    registry: RwLock<RoomRegistry>,
    participants: RwLock<HashMap<String, Participant>>,
    max_chat_len: usize,
}

impl RelayServer {
    pub fn new(max_chat_len: usize) -> Self {
        Self {
            registry: RwLock::new(RoomRegistry::new()),
            participants: RwLock::new(HashMap::new()),
            max_chat_len,
        }
    }

    /// Registers a new transport connection and allocates its opaque handle.
    pub async fn register(&self, sender: mpsc::UnboundedSender<Message>) -> String {
        let handle: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(HANDLE_LEN)
            .map(char::from)
            .collect();

        let mut participants = self.participants.write().await;
        participants.insert(
            handle.clone(),
            Participant {
                name: None,
                room_id: None,
                sender,
            },
        );

        tracing::info!(handle = %handle, "Participant connected");
        handle
    }

    /// Dispatches one event from a connection.
    pub async fn handle_event(&self, handle: &str, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom { room_id, user_name } => {
                self.handle_join(handle, &room_id, &user_name).await;
            }
            ClientEvent::Offer { target_id, sdp } => {
                self.relay(
                    &target_id,
                    ServerEvent::Offer {
                        from: handle.to_string(),
                        sdp,
                    },
                )
                .await;
            }
            ClientEvent::Answer { target_id, sdp } => {
                self.relay(
                    &target_id,
                    ServerEvent::Answer {
                        from: handle.to_string(),
                        sdp,
                    },
                )
                .await;
            }
            ClientEvent::IceCandidate {
                target_id,
                candidate,
            } => {
                self.relay_candidate(handle, &target_id, candidate).await;
            }
            ClientEvent::ChatMessage {
                room_id,
                sender,
                message,
            } => {
                self.handle_chat(handle, &room_id, &sender, &message).await;
            }
        }
    }

    async fn handle_join(&self, handle: &str, room_id: &str, user_name: &str) {
        if room_id.is_empty() {
            tracing::debug!(handle = %handle, "Ignoring join with empty room id");
            return;
        }

        let mut participants = self.participants.write().await;
        let mut registry = self.registry.write().await;

        let Some(participant) = participants.get_mut(handle) else {
            return;
        };

        if participant.room_id.is_some() {
            tracing::warn!(handle = %handle, "Participant already in a room, ignoring duplicate join");
            return;
        }

        participant.name = Some(user_name.to_string());
        participant.room_id = Some(room_id.to_string());

        registry.join(room_id, handle);
        let others: Vec<String> = registry
            .members_of(room_id)
            .into_iter()
            .filter(|m| m != handle)
            .collect();

        tracing::info!(
            handle = %handle,
            room_id = %room_id,
            user_name = %user_name,
            peer_count = others.len(),
            "Participant joined room"
        );

        // The join ack goes to the caller before anyone learns about it, so
        // the joiner cannot be addressed by a relayed offer it has no
        // context for.
        Self::send_to(
            &participants,
            handle,
            &ServerEvent::ExistingParticipants {
                participants: others.clone(),
            },
        );

        let joined = ServerEvent::UserJoined {
            socket_id: handle.to_string(),
            user_name: user_name.to_string(),
        };
        for member in &others {
            Self::send_to(&participants, member, &joined);
        }
    }

    /// Targetted relay. An unknown or vanished target is a silent drop.
    async fn relay(&self, target_id: &str, event: ServerEvent) {
        let participants = self.participants.read().await;
        if participants.contains_key(target_id) {
            Self::send_to(&participants, target_id, &event);
        } else {
            tracing::debug!(target_id = %target_id, "Relay target gone, dropping message");
        }
    }

    async fn relay_candidate(&self, from: &str, target_id: &str, candidate: Value) {
        self.relay(
            target_id,
            ServerEvent::IceCandidate {
                from: from.to_string(),
                candidate,
            },
        )
        .await;
    }

    async fn handle_chat(&self, handle: &str, room_id: &str, sender: &str, message: &str) {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            tracing::debug!(handle = %handle, "Dropping empty chat message");
            return;
        }

        let mut text = trimmed.to_string();
        if text.len() > self.max_chat_len {
            // Back off to a char boundary, truncate panics mid-codepoint.
            let mut cut = self.max_chat_len;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }

        let event = ServerEvent::ChatMessage {
            sender: sender.to_string(),
            message: text,
            timestamp: epoch_millis(),
        };

        let participants = self.participants.read().await;
        let registry = self.registry.read().await;
        for member in registry.members_of(room_id) {
            if member != handle {
                Self::send_to(&participants, &member, &event);
            }
        }
    }

    /// Transport-level disconnect: broadcast `user-left` to the remaining
    /// room members, then forget the handle.
    pub async fn disconnect(&self, handle: &str) {
        let mut participants = self.participants.write().await;
        let mut registry = self.registry.write().await;

        let Some(participant) = participants.remove(handle) else {
            return;
        };

        if let Some(room_id) = participant.room_id {
            registry.leave(&room_id, handle);

            let left = ServerEvent::UserLeft {
                socket_id: handle.to_string(),
            };
            for member in registry.members_of(&room_id) {
                Self::send_to(&participants, &member, &left);
            }

            tracing::info!(
                handle = %handle,
                room_id = %room_id,
                name = ?participant.name,
                "Participant left room"
            );
        } else {
            tracing::info!(handle = %handle, "Participant disconnected");
        }
    }

    /// Number of participants currently joined to `room_id`.
    pub async fn room_size(&self, room_id: &str) -> usize {
        let registry = self.registry.read().await;
        registry.members_of(room_id).len()
    }

    fn send_to(participants: &HashMap<String, Participant>, handle: &str, event: &ServerEvent) {
        let Some(participant) = participants.get(handle) else {
            return;
        };

        match serde_json::to_string(event) {
            Ok(json) => {
                if participant.sender.send(Message::text(json)).is_err() {
                    tracing::debug!(handle = %handle, "Outbound channel closed, dropping event");
                }
            }
            Err(e) => {
                tracing::error!(handle = %handle, error = %e, "Failed to serialize server event");
            }
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
