//! HTTP control surface
//!
//! Basic-authenticated `/command` and `/status`, an SSE event stream at
//! `/events`, plus an unauthenticated landing page and health check.

pub mod auth_middleware;
pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{router, spawn, AppContext};
