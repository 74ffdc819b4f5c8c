//! Per-participant connection and media state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection state of one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Media toggles for one participant.
///
/// Audio and video default to enabled, screen share to disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaState {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_share_enabled: bool,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: true,
            screen_share_enabled: false,
        }
    }
}

/// State attached to one participant of one session.
///
/// Created when the user is added to the session, destroyed when the user is
/// removed or the session ends. Mutation is serialized by the owning
/// session's critical section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantState {
    /// User ID.
    pub user_id: String,
    /// When the participant joined the session.
    pub join_time: DateTime<Utc>,
    /// Last activity (any message or state change from this user).
    pub last_active_time: DateTime<Utc>,
    /// Current connection state.
    pub connection_state: ConnectionState,
    /// Current media toggles.
    pub media: MediaState,
}

impl ParticipantState {
    /// Fresh state for a newly added participant.
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            join_time: now,
            last_active_time: now,
            connection_state: ConnectionState::Connecting,
            media: MediaState::default(),
        }
    }

    /// Record activity from this participant.
    pub fn touch(&mut self) {
        self.last_active_time = Utc::now();
    }

    /// Whether the participant counts as active (CONNECTED or CONNECTING).
    pub fn is_active(&self) -> bool {
        matches!(
            self.connection_state,
            ConnectionState::Connected | ConnectionState::Connecting
        )
    }

    /// Update the connection state and record activity.
    pub fn set_connection_state(&mut self, state: ConnectionState) {
        self.connection_state = state;
        self.touch();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_participant_defaults() {
        let p = ParticipantState::new("u1");
        assert_eq!(p.user_id, "u1");
        assert_eq!(p.connection_state, ConnectionState::Connecting);
        assert!(p.media.audio_enabled);
        assert!(p.media.video_enabled);
        assert!(!p.media.screen_share_enabled);
        assert_eq!(p.join_time, p.last_active_time);
    }

    #[test]
    fn test_is_active() {
        let mut p = ParticipantState::new("u1");
        assert!(p.is_active());

        p.set_connection_state(ConnectionState::Connected);
        assert!(p.is_active());

        p.set_connection_state(ConnectionState::Disconnected);
        assert!(!p.is_active());

        p.set_connection_state(ConnectionState::Failed);
        assert!(!p.is_active());

        p.set_connection_state(ConnectionState::Closed);
        assert!(!p.is_active());
    }

    #[test]
    fn test_touch_advances_last_active() {
        let mut p = ParticipantState::new("u1");
        let before = p.last_active_time;
        p.touch();
        assert!(p.last_active_time >= before);
    }

    #[test]
    fn test_connection_state_serializes_screaming_snake() {
        let json = serde_json::to_string(&ConnectionState::Connecting).unwrap();
        assert_eq!(json, "\"CONNECTING\"");
    }
}
