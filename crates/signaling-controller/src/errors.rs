//! Signaling controller error types.
//!
//! Error types map to wire-visible error codes carried by ERROR signaling
//! messages. Internal details are logged server-side but not exposed to
//! clients.

use thiserror::Error;

/// Signaling controller error type.
///
/// Maps to wire error codes:
/// - `Validation`: `BAD_REQUEST` (1)
/// - `NotAParticipant`: `FORBIDDEN` (3)
/// - `SessionNotFound`: `NOT_FOUND` (4)
/// - `Conflict`, `StateConflict`: `CONFLICT` (5)
/// - `Storage`, `Config`, `Internal`: `INTERNAL_ERROR` (6)
/// - `CapacityExceeded`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Malformed message, rejected before any mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Session does not exist or has already ended.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Message from a user who is not a participant of the session.
    #[error("Not a participant: {0}")]
    NotAParticipant(String),

    /// Join beyond the session's participant capacity.
    #[error("Session at capacity: {session_id} (max {max_participants})")]
    CapacityExceeded {
        session_id: String,
        max_participants: usize,
    },

    /// Conflict (e.g., session or participant already exists).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid lifecycle transition (e.g., activate on an ended session).
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Backing store I/O failure. Recoverable: the relay proceeds with the
    /// in-memory result.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignalingError {
    /// Returns the wire error code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            SignalingError::Validation(_) => 1, // BAD_REQUEST
            SignalingError::NotAParticipant(_) => 3, // FORBIDDEN
            SignalingError::SessionNotFound(_) => 4, // NOT_FOUND
            SignalingError::Conflict(_) | SignalingError::StateConflict(_) => 5, // CONFLICT
            SignalingError::Storage(_)
            | SignalingError::Config(_)
            | SignalingError::Internal(_) => 6, // INTERNAL_ERROR
            SignalingError::CapacityExceeded { .. } => 7, // CAPACITY_EXCEEDED
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            SignalingError::Validation(msg) => msg.clone(),
            SignalingError::SessionNotFound(_) => "Session not found".to_string(),
            SignalingError::NotAParticipant(_) => {
                "Not a participant in this session".to_string()
            }
            SignalingError::CapacityExceeded { .. } => "Session is at capacity".to_string(),
            SignalingError::Conflict(msg) | SignalingError::StateConflict(msg) => msg.clone(),
            SignalingError::Storage(_)
            | SignalingError::Config(_)
            | SignalingError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}
