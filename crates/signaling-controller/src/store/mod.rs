//! Redis persistence layer.
//!
//! Key layout lives in [`keys`], atomic multi-key operations in [`scripts`],
//! and the client itself in [`client`].

mod client;
pub(crate) mod keys;
pub(crate) mod scripts;

pub use client::SignalingStore;
