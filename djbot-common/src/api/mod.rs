//! Shared HTTP control-surface functionality
//!
//! # Design Principle
//!
//! This module contains ONLY:
//! - Pure functions (no HTTP framework dependencies)
//! - Shared request/response types
//!
//! The service crate wraps these with framework-specific middleware (Axum/Tower).

pub mod auth;
pub mod types;

pub use auth::{
    encode_basic_authorization, parse_basic_authorization, verify_credentials, ApiAuthError,
    Credentials,
};
pub use types::{AuthErrorResponse, ErrorResponse};
