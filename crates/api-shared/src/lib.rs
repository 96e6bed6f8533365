//! # API Shared
//!
//! Shared definitions for the Guardian APIs.
//!
//! Contains:
//! - Request/response types for the Session API (`dto` module), with OpenAPI schemas
//! - Shared services like `HealthService`
//! - API key checking (usable by any transport)
//!
//! Used by `api-rest` and the CLI so both render sessions the same way.

pub mod auth;
pub mod dto;
pub mod health;

pub use auth::{validate_api_key, AuthError};
pub use dto::*;
pub use health::HealthService;
