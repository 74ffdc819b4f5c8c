//! Redis key layout for signaling state.
//!
//! All keys live under the `signaling:` prefix:
//!
//! - `signaling:session:{session_id}` - session snapshot (JSON)
//! - `signaling:room:{room_id}` - room -> session_id mapping
//! - `signaling:user:{user_id}` - SET of session IDs the user is in
//! - `signaling:message:{session_id}:{message_id}` - one message (JSON)
//! - `signaling:message:{session_id}:list` - LIST of message IDs, oldest first

/// Key holding the serialized session snapshot.
pub fn session_key(session_id: &str) -> String {
    format!("signaling:session:{session_id}")
}

/// Key mapping a room to its active session ID.
pub fn room_key(room_id: &str) -> String {
    format!("signaling:room:{room_id}")
}

/// Set of session IDs a user participates in.
pub fn user_key(user_id: &str) -> String {
    format!("signaling:user:{user_id}")
}

/// Key holding one serialized message.
pub fn message_key(session_id: &str, message_id: &str) -> String {
    format!("signaling:message:{session_id}:{message_id}")
}

/// Ordered list of message IDs for a session.
pub fn message_list_key(session_id: &str) -> String {
    format!("signaling:message:{session_id}:list")
}

/// Pattern matching every user index set, for the orphan sweep.
pub const USER_KEY_PATTERN: &str = "signaling:user:*";
