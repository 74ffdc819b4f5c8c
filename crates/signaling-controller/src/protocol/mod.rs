//! Signaling wire protocol.
//!
//! A [`SignalingMessage`] is the immutable-after-construction unit exchanged
//! between participants. The body is a tagged sum type grouped into
//! categories; the category determines the default delivery priority and the
//! fan-out policy, never the wire format. SDP and ICE payloads are opaque to
//! this crate - the relay routes them, it never interprets them.

mod message;

pub use message::{
    MessageBody, MessageCategory, MessagePriority, RoutingPolicy, SignalingMessage,
    SYSTEM_USER_ID,
};
