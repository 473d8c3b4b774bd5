//! HTTP request handlers
//!
//! `/command` translates query parameters into a [`ControlRequest`] and
//! answers with the session snapshot; errors become a JSON body with a
//! status code per error kind.

use crate::api::server::AppContext;
use crate::control::ControlRequest;
use crate::error::Error;
use crate::session::SessionSnapshot;
use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use djbot_common::api::ErrorResponse;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info};

/// Header carrying the short human-readable outcome of a command
pub const MESSAGE_HEADER: &str = "x-djbot-message";

const LANDING_PAGE: &str = include_str!("landing.html");

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    git_hash: String,
    build_timestamp: String,
    build_profile: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Error::QueueFull(_) | Error::NotInVoiceChannel(_) => StatusCode::CONFLICT,
            Error::DownloadFailed(_) | Error::PlaybackSource(_) => StatusCode::BAD_GATEWAY,
            Error::DownloadTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::SessionClosed => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidIndex(_) => StatusCode::NOT_FOUND,
            Error::Config(_) | Error::Io(_) | Error::Internal(_) => {
                error!("Control request failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorResponse::new(self.kind(), self.to_string()))).into_response()
    }
}

/// GET / - landing page, no credentials required
pub async fn landing() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "djbot".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
    })
}

/// GET /status - read-only snapshot
pub async fn status(State(ctx): State<AppContext>) -> Result<Json<SessionSnapshot>, Error> {
    Ok(Json(ctx.control.snapshot().await?))
}

/// GET|POST /command?cmd=<name>&query=&url=&index=&channel=&position=&level=
pub async fn command(
    State(ctx): State<AppContext>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, Error> {
    let cmd = params.get("cmd").map(String::as_str).unwrap_or_default();
    let request = ControlRequest::parse(cmd, &params)?;
    info!(?request, "HTTP control request");

    let reply = ctx.control.submit(request).await?;
    let mut response = Json(reply.snapshot).into_response();
    // Titles may not be valid header text; the snapshot is what matters
    if let Ok(value) = HeaderValue::from_str(&reply.message) {
        response.headers_mut().insert(MESSAGE_HEADER, value);
    }
    Ok(response)
}
