use std::collections::HashMap;

/// In-memory mapping of room id to the handles currently joined.
///
/// Rooms come into existence on first join and disappear when the last
/// member leaves; emptiness is the only lifecycle signal. Membership order
/// is join order, which the relay uses as the deterministic ordering for
/// offer initiation.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Vec<String>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }

    /// Adds a handle to a room, creating the room if absent.
    /// Re-joining the same room is a no-op.
    pub fn join(&mut self, room_id: &str, handle: &str) {
        let members = self.rooms.entry(room_id.to_string()).or_default();
        if !members.iter().any(|m| m == handle) {
            members.push(handle.to_string());
        }
    }

    /// Removes a handle from a room. The room entry is discarded once its
    /// membership becomes empty.
    pub fn leave(&mut self, room_id: &str, handle: &str) {
        if let Some(members) = self.rooms.get_mut(room_id) {
            members.retain(|m| m != handle);
            if members.is_empty() {
                self.rooms.remove(room_id);
            }
        }
    }

    /// Snapshot of the current membership, in join order.
    pub fn members_of(&self, room_id: &str) -> Vec<String> {
        self.rooms.get(room_id).cloned().unwrap_or_default()
    }

    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
