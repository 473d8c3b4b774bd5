//! Control-surface authentication via HTTP Basic credentials
//!
//! # Architecture
//!
//! - Every control request except the static landing page carries an
//!   `Authorization: Basic <base64(user:pass)>` header
//! - The decoded pair is checked against the configured username/password
//! - Comparison is done on SHA-256 digests of both pairs, so the check takes
//!   the same time regardless of where the strings first differ
//!
//! # Pure Functions
//!
//! No HTTP framework dependencies; the Tower layer lives in the service crate.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

// ========================================
// Error Types
// ========================================

/// Authentication error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiAuthError {
    /// No `Authorization` header was supplied
    MissingCredentials,

    /// Header present but not using the `Basic` scheme
    UnsupportedScheme(String),

    /// Header could not be decoded into `user:pass`
    Malformed(String),

    /// Username or password does not match the configured pair
    InvalidCredentials { username: String },
}

impl std::fmt::Display for ApiAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiAuthError::MissingCredentials => write!(f, "Missing credentials"),
            ApiAuthError::UnsupportedScheme(scheme) => {
                write!(f, "Unsupported authorization scheme: {}", scheme)
            }
            ApiAuthError::Malformed(reason) => write!(f, "Malformed credentials: {}", reason),
            ApiAuthError::InvalidCredentials { username } => {
                write!(f, "Invalid credentials for user '{}'", username)
            }
        }
    }
}

impl std::error::Error for ApiAuthError {}

// ========================================
// Credentials
// ========================================

/// Username/password pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// SHA-256 over `username \0 password`
    fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.username.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.password.as_bytes());
        hasher.finalize().into()
    }
}

// Never print the password
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ========================================
// Header Parsing
// ========================================

/// Parse an `Authorization` header value of the form `Basic <base64>`
///
/// # Examples
///
/// ```
/// use djbot_common::api::auth::parse_basic_authorization;
///
/// // "admin:secret"
/// let creds = parse_basic_authorization("Basic YWRtaW46c2VjcmV0").unwrap();
/// assert_eq!(creds.username, "admin");
/// assert_eq!(creds.password, "secret");
/// ```
pub fn parse_basic_authorization(header: &str) -> Result<Credentials, ApiAuthError> {
    let header = header.trim();
    if header.is_empty() {
        return Err(ApiAuthError::MissingCredentials);
    }

    let (scheme, encoded) = header
        .split_once(' ')
        .ok_or_else(|| ApiAuthError::Malformed("expected '<scheme> <value>'".to_string()))?;

    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(ApiAuthError::UnsupportedScheme(scheme.to_string()));
    }

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ApiAuthError::Malformed(format!("invalid base64: {}", e)))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| ApiAuthError::Malformed("credentials are not UTF-8".to_string()))?;

    // Passwords may contain ':'; only the first one separates the pair
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| ApiAuthError::Malformed("missing ':' separator".to_string()))?;

    Ok(Credentials::new(username, password))
}

/// Build an `Authorization` header value for the given pair
pub fn encode_basic_authorization(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
}

// ========================================
// Verification
// ========================================

/// Check provided credentials against the configured pair
pub fn verify_credentials(
    provided: &Credentials,
    expected: &Credentials,
) -> Result<(), ApiAuthError> {
    let a = provided.digest();
    let b = expected.digest();
    let diff = a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y));

    if diff == 0 {
        Ok(())
    } else {
        Err(ApiAuthError::InvalidCredentials {
            username: provided.username.clone(),
        })
    }
}
