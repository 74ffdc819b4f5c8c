//! The signaling session aggregate.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SignalingError;
use crate::protocol::SignalingMessage;
use crate::session::history::MessageHistory;
use crate::session::participant::{ConnectionState, ParticipantState};

/// Session lifecycle status.
///
/// CREATED -> ACTIVE <-> PAUSED -> ENDED; ERROR is reachable from any
/// non-terminal state. ENDED and ERROR accept no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    Active,
    Paused,
    Ended,
    Error,
}

/// Session type, fixed at creation. Affects fan-out policy only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionType {
    PeerToPeer,
    MultiParty,
    Broadcast,
    Conference,
}

/// A signaling coordination context for one room.
///
/// The session exclusively owns its participant states and message history.
/// The participant map is the single source of truth: the participant set is
/// its key set, so the two can never fall out of lock-step.
///
/// The message history is excluded from the persisted snapshot; the store
/// keeps messages under their own keys with a shorter expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingSession {
    /// Immutable identity.
    pub session_id: String,
    /// Owning room.
    pub room_id: String,
    /// Creator; auto-added as the first participant.
    pub creator_id: String,
    participants: HashMap<String, ParticipantState>,
    status: SessionStatus,
    session_type: SessionType,
    max_participants: usize,
    created_time: DateTime<Utc>,
    last_active_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    /// Bumped on every mutation; persisted with the snapshot so a stale-write
    /// check can be added to the store without changing this contract.
    revision: u64,
    #[serde(skip, default)]
    history: MessageHistory,
}

impl SignalingSession {
    /// Create a session in CREATED state with the creator as its first
    /// participant.
    pub fn new(
        session_id: impl Into<String>,
        room_id: impl Into<String>,
        creator_id: impl Into<String>,
        session_type: SessionType,
        max_participants: usize,
    ) -> Self {
        let creator_id = creator_id.into();
        let now = Utc::now();
        let mut participants = HashMap::new();
        participants.insert(creator_id.clone(), ParticipantState::new(creator_id.as_str()));

        Self {
            session_id: session_id.into(),
            room_id: room_id.into(),
            creator_id,
            participants,
            status: SessionStatus::Created,
            session_type,
            max_participants: max_participants.max(1),
            created_time: now,
            last_active_time: now,
            end_time: None,
            revision: 0,
            history: MessageHistory::default(),
        }
    }

    fn touch(&mut self) {
        self.last_active_time = Utc::now();
        self.revision += 1;
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// CREATED | PAUSED -> ACTIVE. No-op when already ACTIVE; rejected from
    /// terminal states.
    pub fn activate(&mut self) -> Result<(), SignalingError> {
        match self.status {
            SessionStatus::Created | SessionStatus::Paused => {
                self.status = SessionStatus::Active;
                self.touch();
                Ok(())
            }
            SessionStatus::Active => Ok(()),
            SessionStatus::Ended | SessionStatus::Error => Err(SignalingError::StateConflict(
                format!("cannot activate session in {:?} state", self.status),
            )),
        }
    }

    /// ACTIVE -> PAUSED only.
    pub fn pause(&mut self) -> Result<(), SignalingError> {
        match self.status {
            SessionStatus::Active => {
                self.status = SessionStatus::Paused;
                self.touch();
                Ok(())
            }
            other => Err(SignalingError::StateConflict(format!(
                "cannot pause session in {other:?} state"
            ))),
        }
    }

    /// Any -> ENDED. Sets the end time and clears the message history,
    /// freeing its memory eagerly. Idempotent: ending an ended session is a
    /// no-op, which simplifies concurrent teardown.
    pub fn end(&mut self) {
        if self.status == SessionStatus::Ended {
            return;
        }
        self.status = SessionStatus::Ended;
        self.end_time = Some(Utc::now());
        self.history.clear();
        self.touch();
    }

    /// Any non-terminal -> ERROR.
    pub fn mark_error(&mut self) {
        if matches!(self.status, SessionStatus::Ended | SessionStatus::Error) {
            return;
        }
        self.status = SessionStatus::Error;
        self.touch();
    }

    // ------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------

    /// Add a participant with fresh CONNECTING state.
    ///
    /// Returns `false` (leaving state unchanged) when the ID is empty, the
    /// user is already present, the session is full, or the session is in a
    /// terminal state. A CREATED session becomes ACTIVE on its first
    /// successful add.
    pub fn add_participant(&mut self, user_id: &str) -> bool {
        if user_id.is_empty()
            || matches!(self.status, SessionStatus::Ended | SessionStatus::Error)
            || self.participants.contains_key(user_id)
            || self.participants.len() >= self.max_participants
        {
            return false;
        }

        self.participants
            .insert(user_id.to_string(), ParticipantState::new(user_id));
        if self.status == SessionStatus::Created {
            self.status = SessionStatus::Active;
        }
        self.touch();
        true
    }

    /// Remove a participant and its state. Removing the last participant
    /// ends the session.
    pub fn remove_participant(&mut self, user_id: &str) -> bool {
        if self.participants.remove(user_id).is_none() {
            return false;
        }
        self.touch();
        if self.participants.is_empty() {
            self.end();
        }
        true
    }

    /// Whether the user is a current participant.
    pub fn contains_participant(&self, user_id: &str) -> bool {
        self.participants.contains_key(user_id)
    }

    /// Shared access to one participant's state.
    pub fn participant(&self, user_id: &str) -> Option<&ParticipantState> {
        self.participants.get(user_id)
    }

    /// Exclusive access to one participant's state.
    pub fn participant_mut(&mut self, user_id: &str) -> Option<&mut ParticipantState> {
        self.participants.get_mut(user_id)
    }

    /// Current participant IDs (unordered).
    pub fn participant_ids(&self) -> impl Iterator<Item = &str> {
        self.participants.keys().map(String::as_str)
    }

    /// Number of current participants.
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Append a relayed message to the bounded history and record activity.
    pub fn record_message(&mut self, message: SignalingMessage) {
        self.history.push(message);
        self.touch();
    }

    /// The bounded message history.
    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    // ------------------------------------------------------------------
    // Derived queries
    // ------------------------------------------------------------------

    /// ACTIVE with at least one participant.
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active && !self.participants.is_empty()
    }

    /// Whether the session has been inactive for longer than `idle_minutes`.
    pub fn is_idle_timeout(&self, idle_minutes: i64) -> bool {
        self.is_idle_for(Duration::minutes(idle_minutes))
    }

    /// Whether the session has been inactive for longer than `idle`.
    pub fn is_idle_for(&self, idle: Duration) -> bool {
        self.idle_exceeds(idle, Utc::now())
    }

    fn idle_exceeds(&self, idle: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_active_time > idle
    }

    /// Participant count per connection state.
    pub fn connection_state_stats(&self) -> HashMap<ConnectionState, usize> {
        let mut stats = HashMap::new();
        for participant in self.participants.values() {
            *stats.entry(participant.connection_state).or_insert(0) += 1;
        }
        stats
    }

    /// Participants in CONNECTED or CONNECTING state.
    pub fn active_participants(&self) -> Vec<&ParticipantState> {
        self.participants
            .values()
            .filter(|p| p.is_active())
            .collect()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    pub fn max_participants(&self) -> usize {
        self.max_participants
    }

    pub fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }

    pub fn last_active_time(&self) -> DateTime<Utc> {
        self.last_active_time
    }

    /// Set only when the session has ENDED.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Mutation counter, bumped on every state change.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}
