#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flynn-agent: the host agent's HTTP API, bootstrap sequence, and webhook
//! dispatcher (section 4.6).

pub mod auth;
pub mod backoff;
pub mod bootstrap;
pub mod config;
pub mod routes;
pub mod state;
pub mod webhook_dispatch;

pub use config::Config;
pub use state::AppState;

use axum::Router;

/// Build the full HTTP router (section 6). Split out from [`bootstrap::run`]
/// so tests can exercise routes against an in-memory backend without
/// binding a socket.
pub fn build_router(state: AppState) -> Router {
    routes::router(state)
}
