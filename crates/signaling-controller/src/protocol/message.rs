//! Signaling message types.
//!
//! The message body uses adjacent tagging (`type` + `payload`) so the wire
//! shape matches the JSON the gateway decodes from its length-prefixed
//! framing. Negotiation payloads (SDP, ICE candidate fields) are carried
//! verbatim and never inspected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SignalingError;
use crate::session::ConnectionState;

/// Sender ID used on controller-originated messages (errors, session end).
pub const SYSTEM_USER_ID: &str = "system";

/// Delivery-queue priority. Used only for delivery ordering, never for
/// correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Message category. Determines default priority and fan-out policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    /// OFFER / ANSWER / CANDIDATE - always unicast, target required.
    Negotiation,
    /// Join/leave and session lifecycle notifications.
    SessionControl,
    /// Media-state changes and toggles.
    MediaControl,
    /// Connection-state notifications.
    Connection,
    /// Heartbeats, errors and acks.
    System,
    /// Application-defined messages.
    Custom,
}

/// Fan-out policy for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// Must carry `to_user_id`; delivered to that participant only.
    UnicastRequired,
    /// Delivered to every participant except the sender.
    Broadcast,
    /// Unicast when `to_user_id` is set, broadcast otherwise.
    TargetOrBroadcast,
}

/// Typed message body.
///
/// Each variant carries only its relevant fields, so the relay's dispatch is
/// exhaustive at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageBody {
    // Negotiation
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u32>,
    },

    // Session control
    JoinSession,
    LeaveSession,
    SessionCreated,
    SessionEnded {
        reason: String,
    },

    // Media control
    MediaStateChange {
        audio_enabled: bool,
        video_enabled: bool,
        screen_share_enabled: bool,
    },
    AudioToggle {
        enabled: bool,
    },
    VideoToggle {
        enabled: bool,
    },
    ScreenShareStart,
    ScreenShareStop,

    // Connection
    ConnectionStateChange {
        state: ConnectionState,
    },
    PeerConnected {
        user_id: String,
    },
    PeerDisconnected {
        user_id: String,
    },

    // System
    Heartbeat,
    Error {
        code: i32,
        message: String,
    },
    Ack {
        message_id: String,
    },

    // Application-defined
    Custom {
        kind: String,
        data: serde_json::Value,
    },
}

impl MessageBody {
    /// Category of this body.
    pub fn category(&self) -> MessageCategory {
        match self {
            MessageBody::Offer { .. }
            | MessageBody::Answer { .. }
            | MessageBody::Candidate { .. } => MessageCategory::Negotiation,

            MessageBody::JoinSession
            | MessageBody::LeaveSession
            | MessageBody::SessionCreated
            | MessageBody::SessionEnded { .. } => MessageCategory::SessionControl,

            MessageBody::MediaStateChange { .. }
            | MessageBody::AudioToggle { .. }
            | MessageBody::VideoToggle { .. }
            | MessageBody::ScreenShareStart
            | MessageBody::ScreenShareStop => MessageCategory::MediaControl,

            MessageBody::ConnectionStateChange { .. }
            | MessageBody::PeerConnected { .. }
            | MessageBody::PeerDisconnected { .. } => MessageCategory::Connection,

            MessageBody::Heartbeat | MessageBody::Error { .. } | MessageBody::Ack { .. } => {
                MessageCategory::System
            }

            MessageBody::Custom { .. } => MessageCategory::Custom,
        }
    }

    /// Default delivery priority for this body.
    pub fn default_priority(&self) -> MessagePriority {
        match self {
            MessageBody::Heartbeat | MessageBody::Ack { .. } => MessagePriority::Low,
            MessageBody::Error { .. } => MessagePriority::Urgent,
            other => match other.category() {
                MessageCategory::Negotiation | MessageCategory::SessionControl => {
                    MessagePriority::High
                }
                _ => MessagePriority::Normal,
            },
        }
    }

    /// Fan-out policy for this body.
    pub fn routing(&self) -> RoutingPolicy {
        match self.category() {
            MessageCategory::Negotiation => RoutingPolicy::UnicastRequired,
            MessageCategory::SessionControl
            | MessageCategory::MediaControl
            | MessageCategory::Connection => RoutingPolicy::Broadcast,
            MessageCategory::System | MessageCategory::Custom => RoutingPolicy::TargetOrBroadcast,
        }
    }
}

/// A signaling message. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingMessage {
    /// Unique message ID, generated at construction.
    pub id: String,
    /// Owning session reference (lookup key only).
    pub session_id: String,
    /// Sender.
    pub from_user_id: String,
    /// Recipient; absent means broadcast to all other participants.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub to_user_id: Option<String>,
    /// Typed body (`type` + `payload` on the wire).
    #[serde(flatten)]
    pub body: MessageBody,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Delivery priority.
    pub priority: MessagePriority,
}

impl SignalingMessage {
    /// Construct a broadcast message with a fresh ID and the body's default
    /// priority.
    pub fn new(session_id: impl Into<String>, from_user_id: impl Into<String>, body: MessageBody) -> Self {
        let priority = body.default_priority();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            from_user_id: from_user_id.into(),
            to_user_id: None,
            body,
            timestamp: Utc::now(),
            priority,
        }
    }

    /// Set the recipient (unicast).
    #[must_use]
    pub fn to(mut self, user_id: impl Into<String>) -> Self {
        self.to_user_id = Some(user_id.into());
        self
    }

    /// Override the delivery priority.
    #[must_use]
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Controller-originated ERROR message addressed to one participant.
    pub fn error_reply(
        session_id: impl Into<String>,
        to_user_id: impl Into<String>,
        code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            session_id,
            SYSTEM_USER_ID,
            MessageBody::Error {
                code,
                message: message.into(),
            },
        )
        .to(to_user_id)
    }

    /// Controller-originated SESSION_ENDED broadcast.
    pub fn session_ended(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            session_id,
            SYSTEM_USER_ID,
            MessageBody::SessionEnded {
                reason: reason.into(),
            },
        )
    }

    /// Category of this message.
    pub fn category(&self) -> MessageCategory {
        self.body.category()
    }

    /// Fan-out policy of this message.
    pub fn routing(&self) -> RoutingPolicy {
        self.body.routing()
    }

    /// Validate structural invariants.
    ///
    /// A valid message has non-empty `id`, `session_id` and `from_user_id`,
    /// and negotiation messages must name a recipient: relaying SDP/ICE data
    /// to unintended participants would leak connection details, so a
    /// target-less OFFER/ANSWER/CANDIDATE is rejected here, before any
    /// session mutation.
    pub fn validate(&self) -> Result<(), SignalingError> {
        if self.id.is_empty() {
            return Err(SignalingError::Validation("empty message id".to_string()));
        }
        if self.session_id.is_empty() {
            return Err(SignalingError::Validation("empty session id".to_string()));
        }
        if self.from_user_id.is_empty() {
            return Err(SignalingError::Validation("empty sender".to_string()));
        }
        if self.routing() == RoutingPolicy::UnicastRequired
            && self.to_user_id.as_deref().unwrap_or("").is_empty()
        {
            return Err(SignalingError::Validation(
                "negotiation message requires a target user".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            MessageBody::Offer {
                sdp: "v=0".to_string()
            }
            .category(),
            MessageCategory::Negotiation
        );
        assert_eq!(
            MessageBody::JoinSession.category(),
            MessageCategory::SessionControl
        );
        assert_eq!(
            MessageBody::AudioToggle { enabled: false }.category(),
            MessageCategory::MediaControl
        );
        assert_eq!(
            MessageBody::PeerConnected {
                user_id: "u1".to_string()
            }
            .category(),
            MessageCategory::Connection
        );
        assert_eq!(MessageBody::Heartbeat.category(), MessageCategory::System);
        assert_eq!(
            MessageBody::Custom {
                kind: "emote".to_string(),
                data: serde_json::json!({"id": 7})
            }
            .category(),
            MessageCategory::Custom
        );
    }

    #[test]
    fn test_default_priorities() {
        assert_eq!(
            MessageBody::Offer {
                sdp: "v=0".to_string()
            }
            .default_priority(),
            MessagePriority::High
        );
        assert_eq!(
            MessageBody::LeaveSession.default_priority(),
            MessagePriority::High
        );
        assert_eq!(
            MessageBody::VideoToggle { enabled: true }.default_priority(),
            MessagePriority::Normal
        );
        assert_eq!(
            MessageBody::Heartbeat.default_priority(),
            MessagePriority::Low
        );
        assert_eq!(
            MessageBody::Ack {
                message_id: "m1".to_string()
            }
            .default_priority(),
            MessagePriority::Low
        );
        assert_eq!(
            MessageBody::Error {
                code: 7,
                message: "full".to_string()
            }
            .default_priority(),
            MessagePriority::Urgent
        );
    }

    #[test]
    fn test_routing_policy() {
        assert_eq!(
            MessageBody::Candidate {
                candidate: "candidate:0".to_string(),
                sdp_mid: None,
                sdp_m_line_index: None,
            }
            .routing(),
            RoutingPolicy::UnicastRequired
        );
        assert_eq!(MessageBody::JoinSession.routing(), RoutingPolicy::Broadcast);
        assert_eq!(
            MessageBody::ScreenShareStart.routing(),
            RoutingPolicy::Broadcast
        );
        assert_eq!(
            MessageBody::Heartbeat.routing(),
            RoutingPolicy::TargetOrBroadcast
        );
        assert_eq!(
            MessageBody::Custom {
                kind: "ping".to_string(),
                data: serde_json::Value::Null
            }
            .routing(),
            RoutingPolicy::TargetOrBroadcast
        );
    }

    #[test]
    fn test_construction_fills_id_and_priority() {
        let msg = SignalingMessage::new(
            "s1",
            "u1",
            MessageBody::Offer {
                sdp: "v=0".to_string(),
            },
        );
        assert!(!msg.id.is_empty());
        assert_eq!(msg.priority, MessagePriority::High);
        assert!(msg.to_user_id.is_none());

        let msg = msg.to("u2").with_priority(MessagePriority::Urgent);
        assert_eq!(msg.to_user_id.as_deref(), Some("u2"));
        assert_eq!(msg.priority, MessagePriority::Urgent);
    }

    #[test]
    fn test_negotiation_without_target_is_rejected() {
        let msg = SignalingMessage::new(
            "s1",
            "u1",
            MessageBody::Offer {
                sdp: "v=0".to_string(),
            },
        );
        assert!(matches!(
            msg.validate(),
            Err(SignalingError::Validation(_))
        ));

        // An empty target is as invalid as a missing one
        let msg = msg.to("");
        assert!(matches!(
            msg.validate(),
            Err(SignalingError::Validation(_))
        ));
    }

    #[test]
    fn test_broadcast_body_without_target_is_valid() {
        let msg = SignalingMessage::new("s1", "u1", MessageBody::JoinSession);
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_empty_sender_is_rejected() {
        let msg = SignalingMessage::new("s1", "", MessageBody::Heartbeat);
        assert!(matches!(
            msg.validate(),
            Err(SignalingError::Validation(_))
        ));
    }

    #[test]
    fn test_error_reply_targets_sender() {
        let reply = SignalingMessage::error_reply("s1", "u1", 7, "Session is at capacity");
        assert_eq!(reply.from_user_id, SYSTEM_USER_ID);
        assert_eq!(reply.to_user_id.as_deref(), Some("u1"));
        assert_eq!(reply.priority, MessagePriority::Urgent);
        assert!(matches!(reply.body, MessageBody::Error { code: 7, .. }));
    }

    #[test]
    fn test_wire_shape_uses_screaming_snake_tags() {
        let msg = SignalingMessage::new(
            "s1",
            "u1",
            MessageBody::Candidate {
                candidate: "candidate:0 1 UDP 2122252543 192.0.2.1 49170 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
            },
        )
        .to("u2");

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "CANDIDATE");
        assert_eq!(json["payload"]["sdp_mid"], "0");
        assert_eq!(json["to_user_id"], "u2");

        let unit = SignalingMessage::new("s1", "u1", MessageBody::ScreenShareStart);
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["type"], "SCREEN_SHARE_START");
        // Broadcast messages omit the recipient field entirely
        assert!(json.get("to_user_id").is_none());
    }

    #[test]
    fn test_serde_round_trip() {
        let original = SignalingMessage::new(
            "s1",
            "u1",
            MessageBody::Custom {
                kind: "team_chat".to_string(),
                data: serde_json::json!({"text": "push mid", "squad": 2}),
            },
        );

        let json = serde_json::to_string(&original).unwrap();
        let restored: SignalingMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(original, restored);
    }
}
