//! Canonical session identifiers.
//!
//! Every safety evaluation session is addressed by a UUID. To keep identifiers consistent across
//! the REST API, the CLI and the audit log, the workspace uses a *canonical* representation:
//! **32 lowercase hexadecimal characters** (no hyphens).
//!
//! This crate provides [`SessionId`], a small wrapper that *guarantees* the canonical format once
//! constructed.
//!
//! ## Canonical UUID form
//! - Length: 32
//! - Characters: `0-9` and `a-f` only
//! - Example: `550e8400e29b41d4a716446655440000`
//!
//! Notes:
//! - This is the same value you would get from `Uuid::new_v4().simple().to_string()`.
//! - Canonical form is *required* for externally supplied identifiers (for example, a session
//!   id in a REST path). Use [`SessionId::parse`] to validate an input string.
//! - Non-canonical values (uppercase, hyphenated, wrong length, non-hex) are rejected.

mod service;

pub use service::{SessionId, Uuid};

/// Error type for UUID operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for UUID operations.
pub type UuidResult<T> = Result<T, UuidError>;
