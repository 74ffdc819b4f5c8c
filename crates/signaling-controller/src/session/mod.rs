//! Session aggregate and participant state.
//!
//! A [`SignalingSession`] exclusively owns its participant states and its
//! bounded message history. The store persists snapshots of it; the relay is
//! the only mutator of the live object.

mod history;
mod participant;
#[allow(clippy::module_inception)]
mod session;

pub use history::{MessageHistory, DEFAULT_HISTORY_CAPACITY};
pub use participant::{ConnectionState, MediaState, ParticipantState};
pub use session::{SessionStatus, SessionType, SignalingSession};
