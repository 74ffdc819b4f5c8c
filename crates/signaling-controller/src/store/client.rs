//! Redis-backed persistence for signaling state.
//!
//! # Connection Pattern
//!
//! The redis-rs `MultiplexedConnection` is designed to be cloned cheaply and
//! used concurrently. No locking is needed - just clone the connection for
//! each operation.
//!
//! # Consistency
//!
//! Redis holds snapshots for observability and recovery; the in-memory
//! session registry is authoritative. Writes happen after the in-memory
//! mutation commits, so a crashed write loses at most the latest snapshot,
//! never live state. All keys carry TTLs so abandoned state expires on its
//! own.

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, error, instrument, warn};

use crate::config::{DEFAULT_MESSAGE_TTL_SECONDS, DEFAULT_SESSION_TTL_SECONDS};
use crate::errors::SignalingError;
use crate::protocol::SignalingMessage;
use crate::session::{SignalingSession, DEFAULT_HISTORY_CAPACITY};
use crate::store::{keys, scripts};

/// Redis store for sessions, messages, and lookup indexes.
///
/// This struct is cheaply cloneable - the underlying `MultiplexedConnection`
/// is designed to be shared across tasks.
#[derive(Clone)]
pub struct SignalingStore {
    /// Redis client (kept for potential reconnection scenarios).
    #[allow(dead_code)]
    client: Client,
    /// Multiplexed connection (cheaply cloneable, designed for concurrent use).
    connection: MultiplexedConnection,
    session_ttl_seconds: u64,
    message_ttl_seconds: u64,
    /// Precompiled Lua script for multi-key TTL refresh.
    extend_ttl_script: Script,
}

impl SignalingStore {
    /// Connect to Redis with the default TTLs.
    ///
    /// # Errors
    ///
    /// Returns `SignalingError::Storage` if the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, SignalingError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Note: Do NOT log redis_url as it may contain credentials
            // (e.g., redis://:password@host:port)
            error!(
                target: "sc.store.client",
                error = %e,
                "Failed to open Redis client"
            );
            SignalingError::Storage(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(
                    target: "sc.store.client",
                    error = %e,
                    "Failed to connect to Redis"
                );
                SignalingError::Storage(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            client,
            connection,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            message_ttl_seconds: DEFAULT_MESSAGE_TTL_SECONDS,
            extend_ttl_script: Script::new(scripts::EXTEND_TTL),
        })
    }

    /// Override the default TTLs (from configuration).
    pub fn with_ttls(mut self, session_ttl_seconds: u64, message_ttl_seconds: u64) -> Self {
        self.session_ttl_seconds = session_ttl_seconds;
        self.message_ttl_seconds = message_ttl_seconds;
        self
    }

    /// Persist a session snapshot and its lookup indexes.
    ///
    /// Writes the session blob, the room -> session mapping, and one index
    /// set entry per participant. Every key gets the session TTL, so a
    /// re-save also refreshes expiry.
    #[instrument(skip_all, fields(session_id = %session.session_id))]
    pub async fn save(&self, session: &SignalingSession) -> Result<(), SignalingError> {
        let json = serde_json::to_string(session).map_err(|e| {
            error!(
                target: "sc.store.client",
                error = %e,
                session_id = %session.session_id,
                "Failed to serialize session"
            );
            SignalingError::Internal(format!("serialization failed: {e}"))
        })?;

        let mut conn = self.connection.clone();
        let ttl = self.session_ttl_seconds;

        let _: () = conn
            .set_ex(keys::session_key(&session.session_id), &json, ttl)
            .await
            .map_err(|e| self.storage_err("Failed to save session", &session.session_id, &e))?;

        let _: () = conn
            .set_ex(keys::room_key(&session.room_id), &session.session_id, ttl)
            .await
            .map_err(|e| self.storage_err("Failed to save room mapping", &session.session_id, &e))?;

        for user_id in session.participant_ids() {
            let user_key = keys::user_key(user_id);
            let _: () = conn
                .sadd(&user_key, &session.session_id)
                .await
                .map_err(|e| self.storage_err("Failed to index user", &session.session_id, &e))?;
            let _: () = conn
                .expire(&user_key, ttl as i64)
                .await
                .map_err(|e| self.storage_err("Failed to expire user index", &session.session_id, &e))?;
        }

        debug!(
            target: "sc.store.client",
            session_id = %session.session_id,
            room_id = %session.room_id,
            participant_count = session.participant_count(),
            "Saved session"
        );

        Ok(())
    }

    /// Persist the latest snapshot of an already-saved session.
    ///
    /// Identical to [`save`](Self::save): the write is a full upsert, and
    /// repeating the index writes is idempotent.
    pub async fn update(&self, session: &SignalingSession) -> Result<(), SignalingError> {
        self.save(session).await
    }

    /// Fetch a session snapshot by ID.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn get(&self, session_id: &str) -> Result<Option<SignalingSession>, SignalingError> {
        let mut conn = self.connection.clone();

        let result: Option<String> = conn
            .get(keys::session_key(session_id))
            .await
            .map_err(|e| self.storage_err("Failed to get session", session_id, &e))?;

        match result {
            Some(json) => {
                let session: SignalingSession = serde_json::from_str(&json).map_err(|e| {
                    error!(
                        target: "sc.store.client",
                        error = %e,
                        session_id = %session_id,
                        "Failed to deserialize session"
                    );
                    SignalingError::Storage(format!("Failed to deserialize session: {e}"))
                })?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Fetch the session currently bound to a room, if any.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn get_by_room(
        &self,
        room_id: &str,
    ) -> Result<Option<SignalingSession>, SignalingError> {
        let mut conn = self.connection.clone();

        let session_id: Option<String> = conn
            .get(keys::room_key(room_id))
            .await
            .map_err(|e| self.storage_err("Failed to get room mapping", room_id, &e))?;

        match session_id {
            Some(id) => self.get(&id).await,
            None => Ok(None),
        }
    }

    /// Session IDs a user participates in, per the index set.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn get_user_sessions(&self, user_id: &str) -> Result<Vec<String>, SignalingError> {
        let mut conn = self.connection.clone();

        conn.smembers(keys::user_key(user_id))
            .await
            .map_err(|e| self.storage_err("Failed to get user sessions", user_id, &e))
    }

    /// Drop one session from a user's index set.
    ///
    /// Called when a participant leaves a session that keeps running.
    #[instrument(skip_all, fields(user_id = %user_id, session_id = %session_id))]
    pub async fn remove_user_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), SignalingError> {
        let mut conn = self.connection.clone();

        let _: () = conn
            .srem(keys::user_key(user_id), session_id)
            .await
            .map_err(|e| self.storage_err("Failed to unindex user", session_id, &e))?;

        Ok(())
    }

    /// Persist one relayed message and append its ID to the session's list.
    ///
    /// The list is trimmed to the same bound as the in-memory history, so the
    /// persisted backlog can never outgrow what the session retains.
    #[instrument(skip_all, fields(session_id = %message.session_id, message_id = %message.id))]
    pub async fn save_message(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        let json = serde_json::to_string(message).map_err(|e| {
            error!(
                target: "sc.store.client",
                error = %e,
                message_id = %message.id,
                "Failed to serialize message"
            );
            SignalingError::Internal(format!("serialization failed: {e}"))
        })?;

        let mut conn = self.connection.clone();
        let list_key = keys::message_list_key(&message.session_id);

        let _: () = conn
            .set_ex(
                keys::message_key(&message.session_id, &message.id),
                &json,
                self.message_ttl_seconds,
            )
            .await
            .map_err(|e| self.storage_err("Failed to save message", &message.session_id, &e))?;

        let _: () = conn
            .rpush(&list_key, &message.id)
            .await
            .map_err(|e| self.storage_err("Failed to append message id", &message.session_id, &e))?;

        let _: () = conn
            .ltrim(&list_key, -(DEFAULT_HISTORY_CAPACITY as isize), -1)
            .await
            .map_err(|e| self.storage_err("Failed to trim message list", &message.session_id, &e))?;

        let _: () = conn
            .expire(&list_key, self.session_ttl_seconds as i64)
            .await
            .map_err(|e| self.storage_err("Failed to expire message list", &message.session_id, &e))?;

        Ok(())
    }

    /// Fetch the most recent `limit` persisted messages, oldest first.
    ///
    /// Message blobs expire faster than the ID list, so IDs with no
    /// surviving blob are skipped rather than treated as errors.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn get_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<SignalingMessage>, SignalingError> {
        let mut conn = self.connection.clone();

        let ids: Vec<String> = conn
            .lrange(
                keys::message_list_key(session_id),
                -(limit.max(1) as isize),
                -1,
            )
            .await
            .map_err(|e| self.storage_err("Failed to get message ids", session_id, &e))?;

        let mut messages = Vec::with_capacity(ids.len());
        for id in &ids {
            let json: Option<String> = conn
                .get(keys::message_key(session_id, id))
                .await
                .map_err(|e| self.storage_err("Failed to get message", session_id, &e))?;

            match json {
                Some(json) => match serde_json::from_str(&json) {
                    Ok(message) => messages.push(message),
                    Err(e) => {
                        warn!(
                            target: "sc.store.client",
                            error = %e,
                            session_id = %session_id,
                            message_id = %id,
                            "Skipping unparseable message"
                        );
                    }
                },
                None => {
                    debug!(
                        target: "sc.store.client",
                        session_id = %session_id,
                        message_id = %id,
                        "Message blob expired before its list entry"
                    );
                }
            }
        }

        Ok(messages)
    }

    /// Remove every key belonging to a session.
    ///
    /// Idempotent: removing an absent session is not an error. The room
    /// mapping is only deleted when it still points at this session, so a
    /// newer session in the same room is left alone.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn remove(&self, session_id: &str) -> Result<(), SignalingError> {
        let mut conn = self.connection.clone();
        let session = self.get(session_id).await?;
        let list_key = keys::message_list_key(session_id);

        let message_ids: Vec<String> = conn
            .lrange(&list_key, 0, -1)
            .await
            .map_err(|e| self.storage_err("Failed to get message ids", session_id, &e))?;

        for id in &message_ids {
            let _: () = conn
                .del(keys::message_key(session_id, id))
                .await
                .map_err(|e| self.storage_err("Failed to delete message", session_id, &e))?;
        }

        let _: () = conn
            .del(&list_key)
            .await
            .map_err(|e| self.storage_err("Failed to delete message list", session_id, &e))?;

        let _: () = conn
            .del(keys::session_key(session_id))
            .await
            .map_err(|e| self.storage_err("Failed to delete session", session_id, &e))?;

        if let Some(session) = session {
            let room_key = keys::room_key(&session.room_id);
            let mapped: Option<String> = conn
                .get(&room_key)
                .await
                .map_err(|e| self.storage_err("Failed to get room mapping", session_id, &e))?;
            if mapped.as_deref() == Some(session_id) {
                let _: () = conn
                    .del(&room_key)
                    .await
                    .map_err(|e| self.storage_err("Failed to delete room mapping", session_id, &e))?;
            }

            for user_id in session.participant_ids() {
                let _: () = conn
                    .srem(keys::user_key(user_id), session_id)
                    .await
                    .map_err(|e| self.storage_err("Failed to unindex user", session_id, &e))?;
            }
        }

        debug!(
            target: "sc.store.client",
            session_id = %session_id,
            message_count = message_ids.len(),
            "Removed session"
        );

        Ok(())
    }

    /// Refresh the TTL on a live session's keys in one round trip.
    ///
    /// Returns `true` when at least one key was refreshed, `false` when all
    /// keys had already expired.
    #[instrument(skip_all, fields(session_id = %session.session_id, ttl_seconds = ttl_seconds))]
    pub async fn extend_ttl(
        &self,
        session: &SignalingSession,
        ttl_seconds: u64,
    ) -> Result<bool, SignalingError> {
        let mut conn = self.connection.clone();

        let refreshed: i64 = self
            .extend_ttl_script
            .key(keys::session_key(&session.session_id))
            .key(keys::room_key(&session.room_id))
            .key(keys::message_list_key(&session.session_id))
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| self.storage_err("Failed to extend TTL", &session.session_id, &e))?;

        if refreshed < 0 {
            error!(
                target: "sc.store.client",
                session_id = %session.session_id,
                result = refreshed,
                "Invalid TTL passed to extend script"
            );
            return Err(SignalingError::Internal("Invalid TTL".to_string()));
        }

        for user_id in session.participant_ids() {
            let _: () = conn
                .expire(keys::user_key(user_id), ttl_seconds as i64)
                .await
                .map_err(|e| self.storage_err("Failed to expire user index", &session.session_id, &e))?;
        }

        Ok(refreshed > 0)
    }

    /// Sweep the user index sets, dropping references to expired sessions.
    ///
    /// Session blobs expire on their own; the index sets referencing them do
    /// not notice. Returns the number of stale references removed.
    #[instrument(skip_all)]
    pub async fn cleanup_user_index(&self) -> Result<u64, SignalingError> {
        let mut conn = self.connection.clone();

        // Collect keys first so the scan cursor is not interleaved with the
        // per-key commands below.
        let mut user_keys = Vec::new();
        {
            let mut iter = conn
                .scan_match::<_, String>(keys::USER_KEY_PATTERN)
                .await
                .map_err(|e| self.storage_err("Failed to scan user index", "-", &e))?;
            while let Some(key) = iter.next_item().await {
                user_keys.push(key);
            }
        }

        let mut removed = 0u64;
        for user_key in &user_keys {
            let session_ids: Vec<String> = conn
                .smembers(user_key)
                .await
                .map_err(|e| self.storage_err("Failed to read user index", user_key, &e))?;

            for session_id in &session_ids {
                let exists: bool = conn
                    .exists(keys::session_key(session_id))
                    .await
                    .map_err(|e| self.storage_err("Failed to check session", session_id, &e))?;
                if !exists {
                    let _: () = conn
                        .srem(user_key, session_id)
                        .await
                        .map_err(|e| self.storage_err("Failed to unindex user", session_id, &e))?;
                    removed += 1;
                }
            }

            let remaining: u64 = conn
                .scard(user_key)
                .await
                .map_err(|e| self.storage_err("Failed to size user index", user_key, &e))?;
            if remaining == 0 {
                let _: () = conn
                    .del(user_key)
                    .await
                    .map_err(|e| self.storage_err("Failed to delete empty user index", user_key, &e))?;
            }
        }

        if removed > 0 {
            debug!(
                target: "sc.store.client",
                removed = removed,
                "Cleaned stale user index entries"
            );
        }

        Ok(removed)
    }

    fn storage_err(&self, context: &str, subject: &str, e: &redis::RedisError) -> SignalingError {
        warn!(
            target: "sc.store.client",
            error = %e,
            subject = %subject,
            "{context}"
        );
        SignalingError::Storage(format!("{context}: {e}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use crate::protocol::{MessageBody, SignalingMessage};
    use crate::session::{SessionType, SignalingSession};

    #[test]
    fn test_session_snapshot_round_trip() {
        let mut session =
            SignalingSession::new("s1", "room-1", "u1", SessionType::MultiParty, 10);
        session.add_participant("u2");

        let json = serde_json::to_string(&session).unwrap();
        let parsed: SignalingSession = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.session_id, "s1");
        assert_eq!(parsed.room_id, "room-1");
        assert_eq!(parsed.participant_count(), 2);
    }

    #[test]
    fn test_message_blob_round_trip() {
        let message = SignalingMessage::new(
            "s1",
            "u1",
            MessageBody::Offer {
                sdp: "v=0".to_string(),
            },
        )
        .to("u2");

        let json = serde_json::to_string(&message).unwrap();
        let parsed: SignalingMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, message.id);
        assert_eq!(parsed.to_user_id.as_deref(), Some("u2"));
    }

    #[tokio::test]
    async fn test_new_rejects_malformed_url() {
        let result = super::SignalingStore::new("not-a-redis-url").await;
        assert!(result.is_err());
    }
}
