//! Signaling Controller (SC) Service Library
//!
//! This library provides the signaling coordination layer of the Signal Grid
//! game server - the control plane that negotiates and relays out-of-band
//! messages (offer/answer/ICE candidates, join/leave, media-state changes,
//! heartbeats) between peers before and during a peer-to-peer data channel:
//!
//! - Live session state with per-participant connection and media state
//! - Bounded per-session message history (hard memory cap)
//! - Redis-backed persistence with TTL expiry and cross-instance visibility
//! - Validation and fan-out routing for every inbound signaling message
//!
//! # Architecture
//!
//! ```text
//! gateway -> SignalingRelay::handle(message)
//!              ├── session lookup (per-session mutex, no global lock)
//!              ├── validate -> mutate -> append to history
//!              ├── SignalingStore::update (best-effort, after mutation)
//!              └── RelayResult (recipients) -> gateway delivers
//! ```
//!
//! The relay never touches sockets; the TCP gateway and its framing live
//! outside this crate and consume [`relay::RelayResult`] fan-out decisions.
//!
//! # Key Design Decisions
//!
//! - **One mutex per session**: unrelated sessions proceed fully in parallel;
//!   all mutation of one session (participants, history, status) is serialized
//!   by its own critical section
//! - **Redis for state**: session blobs and message keys expire by TTL; the
//!   store holds derived, rebuildable indices, never the mutation authority
//! - **Typed protocol**: the message body is a tagged sum type, so the relay's
//!   dispatch is checked for exhaustiveness at compile time
//!
//! # Modules
//!
//! - [`protocol`] - Signaling message types, priorities and routing policy
//! - [`session`] - Session aggregate, participant state, message history
//! - [`store`] - Redis persistence and indexing
//! - [`relay`] - Validation, mutation and fan-out
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-facing error codes

pub mod config;
pub mod errors;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod store;
