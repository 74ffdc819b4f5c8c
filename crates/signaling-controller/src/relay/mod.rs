//! Message validation, session mutation, and fan-out.
//!
//! The relay is the only mutator of live session state and the single place
//! routing decisions are made. It never touches sockets: the gateway hands it
//! decoded messages and performs the actual delivery of whatever the relay
//! returns.
//!
//! # Concurrency
//!
//! Sessions are registered in a map guarded by a read/write lock; each entry
//! is its own mutex. Handling a message locks only that one session, so
//! unrelated sessions proceed fully in parallel while racing messages for the
//! same session (two participants leaving simultaneously) are serialized.
//! The per-session lock is held only across the in-memory mutation;
//! persistence is issued afterward from a snapshot, so store latency never
//! extends the critical section.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::errors::SignalingError;
use crate::protocol::{MessageBody, RoutingPolicy, SignalingMessage};
use crate::session::{SessionStatus, SessionType, SignalingSession};
use crate::store::SignalingStore;

/// One delivery instruction for the gateway.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Recipient user IDs. The gateway writes the message to each one's
    /// connection.
    pub recipients: Vec<String>,
    /// The message to deliver.
    pub message: SignalingMessage,
}

/// Everything the gateway must deliver as a result of one relay call.
#[derive(Debug, Clone, Default)]
pub struct RelayResult {
    pub outbound: Vec<Outbound>,
}

impl RelayResult {
    fn single(recipients: Vec<String>, message: SignalingMessage) -> Self {
        Self {
            outbound: vec![Outbound {
                recipients,
                message,
            }],
        }
    }
}

/// The signaling relay.
///
/// Holds the live session registry. Runs with or without a store: without
/// one, all state is in-memory only, which is also how the tests exercise
/// the relay.
pub struct SignalingRelay {
    sessions: RwLock<HashMap<String, Arc<Mutex<SignalingSession>>>>,
    store: Option<SignalingStore>,
}

impl SignalingRelay {
    /// In-memory relay with no persistence.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Relay backed by a Redis store.
    pub fn with_store(store: SignalingStore) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store: Some(store),
        }
    }

    /// Create and register a session on behalf of the room layer.
    ///
    /// Returns a snapshot of the newly created session. Fails with
    /// `Conflict` when the session ID is already registered.
    #[instrument(skip_all, fields(session_id = %session_id, room_id = %room_id))]
    pub async fn create_session(
        &self,
        session_id: &str,
        room_id: &str,
        creator_id: &str,
        session_type: SessionType,
        max_participants: usize,
    ) -> Result<SignalingSession, SignalingError> {
        let session = SignalingSession::new(
            session_id,
            room_id,
            creator_id,
            session_type,
            max_participants,
        );
        let snapshot = session.clone();

        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(session_id) {
                return Err(SignalingError::Conflict(format!(
                    "Session already exists: {session_id}"
                )));
            }
            sessions.insert(session_id.to_string(), Arc::new(Mutex::new(session)));
        }

        info!(
            target: "sc.relay",
            session_id = %session_id,
            room_id = %room_id,
            creator_id = %creator_id,
            session_type = ?session_type,
            max_participants = max_participants,
            "Created session"
        );

        self.persist_update(&snapshot).await;
        Ok(snapshot)
    }

    /// Explicit teardown request (e.g., room destroyed).
    ///
    /// Ends the session, removes it from the registry and the store, and
    /// returns a SESSION_ENDED broadcast for everyone who was still in it.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn end_session(&self, session_id: &str) -> Result<RelayResult, SignalingError> {
        let entry = {
            self.sessions
                .write()
                .await
                .remove(session_id)
                .ok_or_else(|| SignalingError::SessionNotFound(session_id.to_string()))?
        };

        let recipients: Vec<String> = {
            let mut session = entry.lock().await;
            let recipients = session.participant_ids().map(str::to_string).collect();
            session.end();
            recipients
        };

        info!(
            target: "sc.relay",
            session_id = %session_id,
            recipient_count = recipients.len(),
            "Ended session"
        );

        self.persist_remove(session_id).await;

        let ended = SignalingMessage::session_ended(session_id, "session ended");
        Ok(RelayResult::single(recipients, ended))
    }

    /// Handle one inbound message from the gateway.
    ///
    /// Invalid messages are rejected before any mutation, so handling is
    /// all-or-nothing per message. Expected client-facing failures (capacity,
    /// duplicate join, non-member sender) come back as a targeted ERROR
    /// message in the result, not as an `Err`.
    #[instrument(skip_all, fields(session_id = %message.session_id, from = %message.from_user_id))]
    pub async fn handle(&self, message: SignalingMessage) -> Result<RelayResult, SignalingError> {
        message.validate()?;

        let entry = {
            self.sessions
                .read()
                .await
                .get(&message.session_id)
                .cloned()
                .ok_or_else(|| SignalingError::SessionNotFound(message.session_id.clone()))?
        };
        let session = entry.lock().await;

        if session.status() == SessionStatus::Ended {
            return Err(SignalingError::SessionNotFound(message.session_id.clone()));
        }

        match &message.body {
            MessageBody::JoinSession => self.handle_join(session, message).await,
            MessageBody::LeaveSession => self.handle_leave(session, message).await,
            _ => self.handle_relay(session, message).await,
        }
    }

    async fn handle_join(
        &self,
        mut session: MutexGuard<'_, SignalingSession>,
        message: SignalingMessage,
    ) -> Result<RelayResult, SignalingError> {
        let sender = message.from_user_id.clone();

        if session.contains_participant(&sender) {
            return Ok(self.error_result(
                &message,
                &SignalingError::Conflict("Already a participant".to_string()),
            ));
        }
        if session.participant_count() >= session.max_participants() {
            return Ok(self.error_result(
                &message,
                &SignalingError::CapacityExceeded {
                    session_id: message.session_id.clone(),
                    max_participants: session.max_participants(),
                },
            ));
        }
        if !session.add_participant(&sender) {
            return Ok(self.error_result(
                &message,
                &SignalingError::Validation("Invalid user id".to_string()),
            ));
        }

        debug!(
            target: "sc.relay",
            session_id = %message.session_id,
            user_id = %sender,
            participant_count = session.participant_count(),
            "Participant joined"
        );

        session.record_message(message.clone());
        let recipients = broadcast_recipients(&session, &sender);
        let snapshot = session.clone();
        drop(session);

        self.persist_update(&snapshot).await;
        self.persist_message(&message).await;

        Ok(RelayResult::single(recipients, message))
    }

    async fn handle_leave(
        &self,
        mut session: MutexGuard<'_, SignalingSession>,
        message: SignalingMessage,
    ) -> Result<RelayResult, SignalingError> {
        let sender = message.from_user_id.clone();
        let session_id = message.session_id.clone();

        if !session.remove_participant(&sender) {
            return Ok(self.error_result(
                &message,
                &SignalingError::NotAParticipant(sender),
            ));
        }

        if session.status() == SessionStatus::Ended {
            // Last participant left; the departing user is the only
            // connection the gateway still has for this session.
            drop(session);
            {
                self.sessions.write().await.remove(&session_id);
            }

            info!(
                target: "sc.relay",
                session_id = %session_id,
                "Last participant left, session ended"
            );

            self.persist_remove(&session_id).await;
            let ended = SignalingMessage::session_ended(session_id.as_str(), "last participant left");
            return Ok(RelayResult::single(vec![sender], ended));
        }

        debug!(
            target: "sc.relay",
            session_id = %session_id,
            user_id = %sender,
            participant_count = session.participant_count(),
            "Participant left"
        );

        session.record_message(message.clone());
        let recipients = broadcast_recipients(&session, &sender);
        let snapshot = session.clone();
        drop(session);

        self.persist_update(&snapshot).await;
        self.persist_leave_index(&sender, &session_id).await;
        self.persist_message(&message).await;

        Ok(RelayResult::single(recipients, message))
    }

    async fn handle_relay(
        &self,
        mut session: MutexGuard<'_, SignalingSession>,
        message: SignalingMessage,
    ) -> Result<RelayResult, SignalingError> {
        let sender = message.from_user_id.clone();

        if !session.contains_participant(&sender) {
            return Ok(self.error_result(
                &message,
                &SignalingError::NotAParticipant(sender),
            ));
        }

        // Negotiation payloads carry SDP/ICE data; delivering them to a
        // non-member would leak connection details.
        if message.routing() == RoutingPolicy::UnicastRequired {
            let target = message.to_user_id.as_deref().unwrap_or_default();
            if !session.contains_participant(target) {
                return Ok(self.error_result(
                    &message,
                    &SignalingError::NotAParticipant(target.to_string()),
                ));
            }
        }

        apply_side_effect(&mut session, &message);
        session.record_message(message.clone());

        let recipients = match message.routing() {
            RoutingPolicy::UnicastRequired => {
                vec![message.to_user_id.clone().unwrap_or_default()]
            }
            RoutingPolicy::Broadcast => broadcast_recipients(&session, &sender),
            RoutingPolicy::TargetOrBroadcast => match message.to_user_id.as_deref() {
                Some(target) if !target.is_empty() => vec![target.to_string()],
                _ => broadcast_recipients(&session, &sender),
            },
        };

        let snapshot = session.clone();
        drop(session);
        self.persist_update(&snapshot).await;
        self.persist_message(&message).await;

        Ok(RelayResult::single(recipients, message))
    }

    /// End every session idle for longer than `idle` and return the
    /// SESSION_ENDED broadcasts for the gateway.
    ///
    /// Driven by the periodic sweep task; TTL expiry in the store covers the
    /// crash case independently.
    #[instrument(skip_all)]
    pub async fn sweep_idle(&self, idle: Duration) -> RelayResult {
        let entries: Vec<(String, Arc<Mutex<SignalingSession>>)> = {
            self.sessions
                .read()
                .await
                .iter()
                .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
                .collect()
        };

        let mut result = RelayResult::default();
        for (session_id, entry) in entries {
            let recipients = {
                let mut session = entry.lock().await;
                if session.status() == SessionStatus::Ended || !session.is_idle_for(idle) {
                    continue;
                }
                let recipients: Vec<String> =
                    session.participant_ids().map(str::to_string).collect();
                session.end();
                recipients
            };

            info!(
                target: "sc.relay",
                session_id = %session_id,
                recipient_count = recipients.len(),
                "Reclaimed idle session"
            );

            {
                self.sessions.write().await.remove(&session_id);
            }
            self.persist_remove(&session_id).await;

            let ended = SignalingMessage::session_ended(session_id.as_str(), "idle timeout");
            result.outbound.push(Outbound {
                recipients,
                message: ended,
            });
        }

        result
    }

    /// Snapshot of one live session, if registered.
    pub async fn get_session(&self, session_id: &str) -> Option<SignalingSession> {
        let entry = {
            self.sessions.read().await.get(session_id).cloned()
        }?;
        let session = entry.lock().await;
        Some(session.clone())
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    fn error_result(&self, inbound: &SignalingMessage, err: &SignalingError) -> RelayResult {
        debug!(
            target: "sc.relay",
            session_id = %inbound.session_id,
            from = %inbound.from_user_id,
            error = %err,
            code = err.error_code(),
            "Rejected message"
        );
        let reply = SignalingMessage::error_reply(
            inbound.session_id.as_str(),
            inbound.from_user_id.as_str(),
            err.error_code(),
            err.client_message(),
        );
        RelayResult::single(vec![inbound.from_user_id.clone()], reply)
    }

    async fn persist_update(&self, session: &SignalingSession) {
        if let Some(store) = &self.store {
            if let Err(e) = store.update(session).await {
                warn!(
                    target: "sc.relay",
                    error = %e,
                    session_id = %session.session_id,
                    "Failed to persist session, continuing in-memory"
                );
            }
        }
    }

    async fn persist_message(&self, message: &SignalingMessage) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_message(message).await {
                warn!(
                    target: "sc.relay",
                    error = %e,
                    session_id = %message.session_id,
                    message_id = %message.id,
                    "Failed to persist message, continuing in-memory"
                );
            }
        }
    }

    async fn persist_leave_index(&self, user_id: &str, session_id: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.remove_user_session(user_id, session_id).await {
                warn!(
                    target: "sc.relay",
                    error = %e,
                    session_id = %session_id,
                    user_id = %user_id,
                    "Failed to unindex user, cleanup sweep will reclaim"
                );
            }
        }
    }

    async fn persist_remove(&self, session_id: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(session_id).await {
                warn!(
                    target: "sc.relay",
                    error = %e,
                    session_id = %session_id,
                    "Failed to remove session from store, TTL will reclaim"
                );
            }
        }
    }
}

impl Default for SignalingRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// Every current participant except the sender.
fn broadcast_recipients(session: &SignalingSession, sender: &str) -> Vec<String> {
    session
        .participant_ids()
        .filter(|id| *id != sender)
        .map(str::to_string)
        .collect()
}

/// Apply the message's state-changing side effect to the sender's
/// participant state.
fn apply_side_effect(session: &mut SignalingSession, message: &SignalingMessage) {
    let Some(participant) = session.participant_mut(&message.from_user_id) else {
        return;
    };

    match &message.body {
        MessageBody::MediaStateChange {
            audio_enabled,
            video_enabled,
            screen_share_enabled,
        } => {
            participant.media.audio_enabled = *audio_enabled;
            participant.media.video_enabled = *video_enabled;
            participant.media.screen_share_enabled = *screen_share_enabled;
            participant.touch();
        }
        MessageBody::AudioToggle { enabled } => {
            participant.media.audio_enabled = *enabled;
            participant.touch();
        }
        MessageBody::VideoToggle { enabled } => {
            participant.media.video_enabled = *enabled;
            participant.touch();
        }
        MessageBody::ScreenShareStart => {
            participant.media.screen_share_enabled = true;
            participant.touch();
        }
        MessageBody::ScreenShareStop => {
            participant.media.screen_share_enabled = false;
            participant.touch();
        }
        MessageBody::ConnectionStateChange { state } => {
            participant.set_connection_state(*state);
        }
        _ => participant.touch(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::{MessagePriority, SYSTEM_USER_ID};
    use crate::session::ConnectionState;

    async fn relay_with_session(max: usize) -> SignalingRelay {
        let relay = SignalingRelay::new();
        relay
            .create_session("s1", "room-1", "u1", SessionType::MultiParty, max)
            .await
            .unwrap();
        relay
    }

    async fn join(relay: &SignalingRelay, user: &str) {
        let result = relay
            .handle(SignalingMessage::new("s1", user, MessageBody::JoinSession))
            .await
            .unwrap();
        assert!(matches!(
            result.outbound.first().unwrap().message.body,
            MessageBody::JoinSession
        ));
    }

    #[tokio::test]
    async fn test_create_session_registers_and_snapshots() {
        let relay = relay_with_session(10).await;
        assert_eq!(relay.session_count().await, 1);

        let snapshot = relay.get_session("s1").await.unwrap();
        assert_eq!(snapshot.creator_id, "u1");
        assert!(snapshot.contains_participant("u1"));
    }

    #[tokio::test]
    async fn test_create_session_conflict() {
        let relay = relay_with_session(10).await;
        let result = relay
            .create_session("s1", "room-2", "u9", SessionType::PeerToPeer, 2)
            .await;
        assert!(matches!(result, Err(SignalingError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_join_broadcasts_to_others() {
        let relay = relay_with_session(10).await;
        let result = relay
            .handle(SignalingMessage::new("s1", "u2", MessageBody::JoinSession))
            .await
            .unwrap();

        let outbound = result.outbound.first().unwrap();
        assert_eq!(outbound.recipients, vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_join_yields_targeted_error() {
        let relay = relay_with_session(10).await;
        let result = relay
            .handle(SignalingMessage::new("s1", "u1", MessageBody::JoinSession))
            .await
            .unwrap();

        let outbound = result.outbound.first().unwrap();
        assert_eq!(outbound.recipients, vec!["u1".to_string()]);
        assert_eq!(outbound.message.from_user_id, SYSTEM_USER_ID);
        assert!(matches!(
            outbound.message.body,
            MessageBody::Error { code: 5, .. }
        ));
    }

    #[tokio::test]
    async fn test_offer_is_unicast_to_target_only() {
        let relay = relay_with_session(10).await;
        join(&relay, "u2").await;
        join(&relay, "u3").await;

        let history_before = relay.get_session("s1").await.unwrap().history().len();
        let result = relay
            .handle(
                SignalingMessage::new(
                    "s1",
                    "u1",
                    MessageBody::Offer {
                        sdp: "v=0...".to_string(),
                    },
                )
                .to("u2"),
            )
            .await
            .unwrap();

        let outbound = result.outbound.first().unwrap();
        assert_eq!(outbound.recipients, vec!["u2".to_string()]);
        assert_eq!(outbound.message.priority, MessagePriority::High);

        let history_after = relay.get_session("s1").await.unwrap().history().len();
        assert_eq!(history_after, history_before + 1);
    }

    #[tokio::test]
    async fn test_offer_to_non_member_is_rejected() {
        let relay = relay_with_session(10).await;
        let result = relay
            .handle(
                SignalingMessage::new(
                    "s1",
                    "u1",
                    MessageBody::Offer {
                        sdp: "v=0".to_string(),
                    },
                )
                .to("u9"),
            )
            .await
            .unwrap();

        let outbound = result.outbound.first().unwrap();
        assert_eq!(outbound.recipients, vec!["u1".to_string()]);
        assert!(matches!(
            outbound.message.body,
            MessageBody::Error { code: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_message_from_non_member_is_rejected() {
        let relay = relay_with_session(10).await;
        let result = relay
            .handle(SignalingMessage::new("s1", "u9", MessageBody::Heartbeat))
            .await
            .unwrap();

        let outbound = result.outbound.first().unwrap();
        assert_eq!(outbound.recipients, vec!["u9".to_string()]);
        assert!(matches!(
            outbound.message.body,
            MessageBody::Error { code: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_media_toggle_mutates_sender_state() {
        let relay = relay_with_session(10).await;
        join(&relay, "u2").await;

        relay
            .handle(SignalingMessage::new(
                "s1",
                "u2",
                MessageBody::AudioToggle { enabled: false },
            ))
            .await
            .unwrap();
        relay
            .handle(SignalingMessage::new(
                "s1",
                "u2",
                MessageBody::ScreenShareStart,
            ))
            .await
            .unwrap();

        let session = relay.get_session("s1").await.unwrap();
        let media = session.participant("u2").unwrap().media;
        assert!(!media.audio_enabled);
        assert!(media.screen_share_enabled);
        // The other participant is untouched
        assert!(session.participant("u1").unwrap().media.audio_enabled);
    }

    #[tokio::test]
    async fn test_connection_state_change() {
        let relay = relay_with_session(10).await;
        relay
            .handle(SignalingMessage::new(
                "s1",
                "u1",
                MessageBody::ConnectionStateChange {
                    state: ConnectionState::Connected,
                },
            ))
            .await
            .unwrap();

        let session = relay.get_session("s1").await.unwrap();
        assert_eq!(
            session.participant("u1").unwrap().connection_state,
            ConnectionState::Connected
        );
    }

    #[tokio::test]
    async fn test_last_leave_tears_down_session() {
        let relay = relay_with_session(10).await;
        let result = relay
            .handle(SignalingMessage::new("s1", "u1", MessageBody::LeaveSession))
            .await
            .unwrap();

        let outbound = result.outbound.first().unwrap();
        assert!(matches!(
            outbound.message.body,
            MessageBody::SessionEnded { .. }
        ));
        assert_eq!(outbound.recipients, vec!["u1".to_string()]);
        assert_eq!(relay.session_count().await, 0);

        // Further messages fail fast
        let err = relay
            .handle(SignalingMessage::new("s1", "u1", MessageBody::Heartbeat))
            .await;
        assert!(matches!(err, Err(SignalingError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_end_session_broadcasts_to_all() {
        let relay = relay_with_session(10).await;
        join(&relay, "u2").await;

        let result = relay.end_session("s1").await.unwrap();
        let outbound = result.outbound.first().unwrap();
        let recipients: std::collections::HashSet<&str> =
            outbound.recipients.iter().map(String::as_str).collect();
        assert_eq!(recipients, ["u1", "u2"].into_iter().collect());
        assert_eq!(relay.session_count().await, 0);

        assert!(matches!(
            relay.end_session("s1").await,
            Err(SignalingError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_message_rejected_before_lookup() {
        let relay = relay_with_session(10).await;
        let err = relay
            .handle(SignalingMessage::new(
                "s1",
                "u1",
                MessageBody::Offer {
                    sdp: "v=0".to_string(),
                },
            ))
            .await;
        assert!(matches!(err, Err(SignalingError::Validation(_))));

        // Nothing was mutated
        assert!(relay.get_session("s1").await.unwrap().history().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_idle_ends_stale_sessions() {
        let relay = relay_with_session(10).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let result = relay.sweep_idle(Duration::zero()).await;
        assert_eq!(result.outbound.len(), 1);
        assert!(matches!(
            result.outbound.first().unwrap().message.body,
            MessageBody::SessionEnded { .. }
        ));
        assert_eq!(relay.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_idle_keeps_fresh_sessions() {
        let relay = relay_with_session(10).await;
        let result = relay.sweep_idle(Duration::minutes(30)).await;
        assert!(result.outbound.is_empty());
        assert_eq!(relay.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_custom_message_target_or_broadcast() {
        let relay = relay_with_session(10).await;
        join(&relay, "u2").await;
        join(&relay, "u3").await;

        let targeted = relay
            .handle(
                SignalingMessage::new(
                    "s1",
                    "u1",
                    MessageBody::Custom {
                        kind: "emote".to_string(),
                        data: serde_json::json!({"id": 3}),
                    },
                )
                .to("u3"),
            )
            .await
            .unwrap();
        assert_eq!(
            targeted.outbound.first().unwrap().recipients,
            vec!["u3".to_string()]
        );

        let broadcast = relay
            .handle(SignalingMessage::new(
                "s1",
                "u1",
                MessageBody::Custom {
                    kind: "emote".to_string(),
                    data: serde_json::Value::Null,
                },
            ))
            .await
            .unwrap();
        let recipients: std::collections::HashSet<&str> = broadcast
            .outbound
            .first()
            .unwrap()
            .recipients
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(recipients, ["u2", "u3"].into_iter().collect());
    }
}
