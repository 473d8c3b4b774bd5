//! HTTP server setup and routing
//!
//! The control surface runs on its own OS thread with its own runtime; it
//! reaches the session only through the [`ControlHandle`].

use crate::api::auth_middleware::AuthLayer;
use crate::api::{handlers, sse};
use crate::control::ControlHandle;
use crate::error::{Error, Result};
use axum::{routing::get, Router};
use djbot_common::api::Credentials;
use std::net::{SocketAddr, TcpListener};
use std::thread::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub control: ControlHandle,
}

/// Build the router with authentication applied
pub fn router(ctx: AppContext, credentials: Credentials) -> Router {
    Router::new()
        .route("/", get(handlers::landing))
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/command", get(handlers::command).post(handlers::command))
        .route("/events", get(sse::event_stream))
        .with_state(ctx)
        .layer(AuthLayer::new(credentials))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind on the calling thread, then serve from a dedicated thread
///
/// Binding first makes a taken port a startup error instead of a log line.
pub fn spawn(ctx: AppContext, credentials: Credentials, port: u16) -> Result<JoinHandle<()>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .map_err(|e| Error::Config(format!("Failed to bind to {}: {}", addr, e)))?;
    listener.set_nonblocking(true)?;
    info!("HTTP control on {}", addr);

    let app = router(ctx, credentials);
    let handle = std::thread::Builder::new()
        .name("http-control".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .thread_name("http-worker")
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("HTTP runtime failed to start: {}", e);
                    return;
                }
            };

            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(e) => {
                        error!("HTTP listener unusable: {}", e);
                        return;
                    }
                };
                if let Err(e) = axum::serve(listener, app).await {
                    error!("HTTP server error: {}", e);
                }
            });
        })?;
    Ok(handle)
}
