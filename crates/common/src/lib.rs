//! Common utilities shared across Signal Grid components.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;
