//! HTTP surface assembly (section 6). Every route except `/host/status`
//! requires `Auth-Key` and is subject to the per-IP limiter; `/host/status`
//! is exempt from both, so liveness checks never get a 401 or a 429.

pub mod error;
pub mod events;
pub mod host;
pub mod jobs;
pub mod webhooks;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

async fn rate_limit(
    State(state): State<AppState>,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Result<axum::response::Response, StatusCode> {
    if state.per_ip_limiter.check(addr.ip(), std::time::Instant::now()) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::TOO_MANY_REQUESTS)
    }
}

pub fn router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/host/jobs", get(jobs::list_or_stream))
        .route("/host/jobs/{id}", put(jobs::add_job).get(jobs::get_or_stream).delete(jobs::stop_job))
        .route("/host/jobs/{id}/signal/{n}", put(jobs::signal_job))
        .route("/host/jobs/{id}/discoverd-deregister", put(jobs::discoverd_deregister))
        .route("/host/jobs/{id}/stats", get(jobs::job_stats))
        .route("/host/jobs-stats", get(jobs::all_job_stats))
        .route("/host/stats", get(jobs::host_stats))
        .route("/host/resource-check", post(jobs::resource_check))
        .route("/host/pull/images", post(host::pull_images))
        .route("/host/pull/binaries", post(host::pull_binaries))
        .route("/host/discoverd", post(host::set_discoverd))
        .route("/host/network", post(host::set_network))
        .route("/host/update", post(host::update))
        .route("/host/tags", post(host::set_tags))
        .route("/attach", get(host::attach))
        .route("/webhooks", post(webhooks::add_webhook).get(webhooks::list_webhooks))
        .route("/webhooks/{id}", delete(webhooks::remove_webhook))
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::auth::require_auth_key))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/host/status", get(host::status))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use flynn_backend::fake::FakeBackend;
    use flynn_discoverd::fake::FakeDiscoverdClient;
    use flynn_store::StateStore;
    use flynn_volume::{LayerStore, VolumeManager};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> (AppState, tempfile::TempDir) {
        test_state_with_limiter(flynn_core::PerIpRateLimiter::default_policy())
    }

    fn test_state_with_limiter(limiter: flynn_core::PerIpRateLimiter) -> (AppState, tempfile::TempDir) {
        let (store, dir) = StateStore::open_temp().unwrap();
        let state = AppState::new(
            "host-1",
            Arc::new(store),
            Arc::new(FakeBackend::new()),
            Arc::new(FakeDiscoverdClient::default()),
            Arc::new(LayerStore::new(dir.path().join("layers"))),
            Arc::new(VolumeManager::new(dir.path().join("volumes"))),
            "",
            10,
            limiter,
        );
        (state, dir)
    }

    #[tokio::test]
    async fn status_route_responds_ok_via_oneshot() {
        let (state, _dir) = test_state();
        let app = Router::new().route("/host/status", get(host::status)).with_state(state);
        let response = app.oneshot(Request::builder().uri("/host/status").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_route_is_exempt_from_the_rate_limiter() {
        let (state, _dir) = test_state_with_limiter(flynn_core::PerIpRateLimiter::new(1, std::time::Duration::from_secs(60)));
        let app = router(state);
        let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();

        for _ in 0..3 {
            let mut req = Request::builder().uri("/host/status").body(Body::empty()).unwrap();
            req.extensions_mut().insert(axum::extract::ConnectInfo(addr));
            let response = app.clone().oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn authenticated_routes_are_rate_limited_per_ip() {
        let (state, _dir) = test_state_with_limiter(flynn_core::PerIpRateLimiter::new(1, std::time::Duration::from_secs(60)));
        let app = router(state);
        let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();

        let mut first = Request::builder().uri("/host/jobs").body(Body::empty()).unwrap();
        first.extensions_mut().insert(axum::extract::ConnectInfo(addr));
        let response = app.clone().oneshot(first).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut second = Request::builder().uri("/host/jobs").body(Body::empty()).unwrap();
        second.extensions_mut().insert(axum::extract::ConnectInfo(addr));
        let response = app.clone().oneshot(second).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn protected_route_rejects_missing_auth_key() {
        let (mut state, _dir) = test_state();
        state.auth_key = std::sync::Arc::from("secret");
        let app = Router::new()
            .route("/host/jobs", get(jobs::list_or_stream))
            .route_layer(middleware::from_fn_with_state(state.clone(), crate::auth::require_auth_key))
            .with_state(state);
        let response = app.oneshot(Request::builder().uri("/host/jobs").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
