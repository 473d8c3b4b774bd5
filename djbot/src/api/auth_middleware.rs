//! Authentication middleware for the control surface
//!
//! Checks HTTP Basic credentials against the configured pair using the
//! pure functions in `djbot_common::api`. The landing page and health
//! endpoint are served without credentials.

use axum::{
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use djbot_common::api::{
    parse_basic_authorization, verify_credentials, ApiAuthError, AuthErrorResponse, Credentials,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, warn};

/// Realm announced in `WWW-Authenticate`
pub const REALM: &str = "MusicBot";

/// Paths reachable without credentials
const PUBLIC_PATHS: &[&str] = &["/", "/health"];

/// Tower layer for Basic authentication
#[derive(Clone)]
pub struct AuthLayer {
    expected: Arc<Credentials>,
}

impl AuthLayer {
    pub fn new(expected: Credentials) -> Self {
        Self {
            expected: Arc::new(expected),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            expected: self.expected.clone(),
        }
    }
}

/// Tower service that performs the credential check
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    expected: Arc<Credentials>,
}

impl<S> Service<Request> for AuthMiddleware<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let expected = self.expected.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if PUBLIC_PATHS.contains(&request.uri().path()) {
                return inner.call(request).await;
            }

            if let Err(e) = check_request(&request, &expected) {
                return Ok(unauthorized(e));
            }

            inner.call(request).await
        })
    }
}

/// Verify the `Authorization` header of `request`
pub fn check_request(request: &Request, expected: &Credentials) -> Result<(), ApiAuthError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(ApiAuthError::MissingCredentials)?
        .to_str()
        .map_err(|_| ApiAuthError::Malformed("header is not ASCII".to_string()))?;

    let provided = parse_basic_authorization(header)?;
    verify_credentials(&provided, expected)
}

/// 401 with a Basic challenge and a JSON body
fn unauthorized(error: ApiAuthError) -> Response {
    let kind = match &error {
        ApiAuthError::MissingCredentials => {
            debug!("Request without credentials rejected");
            "missing_credentials"
        }
        ApiAuthError::UnsupportedScheme(_) | ApiAuthError::Malformed(_) => {
            debug!("Malformed credentials rejected: {}", error);
            "malformed_credentials"
        }
        ApiAuthError::InvalidCredentials { username } => {
            warn!(username = %username, "Invalid credentials rejected");
            "invalid_credentials"
        }
    };

    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(AuthErrorResponse::new(kind, &error.to_string())),
    )
        .into_response();
    if let Ok(challenge) = HeaderValue::from_str(&format!("Basic realm=\"{}\"", REALM)) {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, challenge);
    }
    response
}
