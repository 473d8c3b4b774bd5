//! Shared API response types
//!
//! Error bodies returned by the HTTP control surface.

use serde::{Deserialize, Serialize};

// ========================================
// Error Response Types
// ========================================

/// Authentication failure body
///
/// Returned with 401 Unauthorized when credential verification fails
///
/// # Examples
///
/// ```
/// use djbot_common::api::types::AuthErrorResponse;
///
/// let error = AuthErrorResponse::new("invalid_credentials", "Username or password mismatch");
/// assert_eq!(error.error, "invalid_credentials");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthErrorResponse {
    /// Error type identifier
    pub error: String,

    /// Human-readable error message
    pub message: String,
}

impl AuthErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

/// Generic failure body for control requests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    /// Machine-readable kind (`queue_full`, `bad_request`, ...)
    pub error: String,

    /// Short human-readable message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

// ========================================
// Tests
// ========================================
