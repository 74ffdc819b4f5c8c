//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these types
//! for all sensitive values like store credentials, connection URLs with
//! embedded passwords, and cryptographic material.
//!
//! # Compile-Time Safety
//!
//! `SecretBox<T>` and `SecretString` implement `Debug` with redaction, so
//! any code that derives `Debug` on a struct containing secrets automatically
//! gets safe logging behavior. This makes it impossible to accidentally log
//! secrets via `{:?}` or tracing.
//!
//! # Memory Safety
//!
//! Secrets are automatically zeroized when dropped, preventing sensitive
//! data from lingering in memory after use.
//!
//! # Example
//!
//! ```rust
//! use common::secret::SecretString;
//! use secrecy::ExposeSecret;
//!
//! #[derive(Debug)]
//! struct StoreConfig {
//!     instance_id: String,
//!     redis_url: SecretString,  // Safe: Debug shows "[REDACTED]"
//! }
//!
//! let cfg = StoreConfig {
//!     instance_id: "sc-1".to_string(),
//!     redis_url: SecretString::from("redis://:hunter2@localhost:6379"),
//! };
//!
//! // This is safe - the URL (and its password) is redacted
//! println!("{:?}", cfg);
//!
//! // To access the actual value, you must explicitly call expose_secret()
//! let url: &str = cfg.redis_url.expose_secret();
//! ```
//!
//! # Usage Guidelines
//!
//! Use `SecretString` for:
//! - Connection URLs that may embed credentials
//! - API keys and bearer tokens
//! - Encryption keys (as base64 strings)
//!
//! Use `SecretBox<T>` for custom secret types (e.g., `SecretBox<[u8]>` for
//! binary keys).

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
