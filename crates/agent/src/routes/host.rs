//! Host-wide status, singleton config, tagging, update, and artifact-pull
//! endpoints (section 4.6.1, section 4.7, section 6).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use flynn_core::host_status::{DiscoverdConfig, HostStatus, NetworkConfig};
use flynn_core::mountspec::MountSpec;
use flynn_core::HostError;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::collections::HashMap;
use std::str::FromStr;

use super::error::ApiError;
use crate::state::AppState;

pub async fn status(State(state): State<AppState>) -> Json<HostStatus> {
    Json(HostStatus {
        id: state.host_id.to_string(),
        tags: state.runtime.tags(),
        pid: state.runtime.pid,
        url: String::new(),
        version: state.runtime.version.to_string(),
        flags: Vec::new(),
        discoverd: state.runtime.discoverd_config(),
        network: state.runtime.network(),
    })
}

/// `POST /host/network`: configure the bridge/subnet once per process
/// lifetime; later calls just repoint the recorded config (section 4.6.1).
pub async fn set_network(
    State(state): State<AppState>,
    Json(config): Json<NetworkConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let first_time = state.runtime.apply_network_config(config.clone());
    if first_time {
        state.backend.configure_networking(&config).await?;
    } else {
        state.backend.set_network_config(&config).await?;
    }
    Ok(StatusCode::OK)
}

/// `POST /host/discoverd`: same one-shot convergence as `set_network`, but
/// for the service-registry connection (section 4.6.1).
pub async fn set_discoverd(
    State(state): State<AppState>,
    Json(config): Json<DiscoverdConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let first_time = state.runtime.apply_discoverd_config(config.clone());
    state.backend.set_discoverd_config(&config).await?;
    let _ = first_time;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct SetTagsRequest {
    pub tags: HashMap<String, String>,
}

pub async fn set_tags(State(state): State<AppState>, Json(req): Json<SetTagsRequest>) -> impl IntoResponse {
    state.runtime.set_tags(req.tags);
    StatusCode::OK
}

/// `POST /host/update`: begin a zero-downtime self-replacement (section 4.7).
/// Refuses new job admission immediately; the actual binary handoff runs in
/// the background so the response can return before the listener moves.
pub async fn update(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    if state.runtime.is_shutting_down() {
        return Err(HostError::Conflict("update already in progress".into()).into());
    }
    state.runtime.begin_shutdown();
    tokio::spawn(async move {
        if let Err(e) = crate::bootstrap::restart_in_place(&state).await {
            tracing::error!(error = %e, "in-place restart failed");
        }
    });
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct PullImagesRequest {
    pub mountspecs: Vec<MountSpec>,
}

#[derive(Debug, Serialize)]
struct PullProgress {
    id: String,
    status: &'static str,
    error: Option<String>,
}

/// `POST /host/pull/images`: import every requested layer into the local
/// cache, reporting one SSE event per layer as it resolves (section 4.4).
pub async fn pull_images(
    State(state): State<AppState>,
    Json(req): Json<PullImagesRequest>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let stream = futures::stream::unfold((state, req.mountspecs.into_iter()), |(state, mut specs)| async move {
        let spec = specs.next()?;
        let progress = match state.layers.import(&spec).await {
            Ok(_) => PullProgress { id: spec.id, status: "done", error: None },
            Err(e) => PullProgress { id: spec.id, status: "failed", error: Some(e.to_string()) },
        };
        let data = serde_json::to_string(&progress).unwrap_or_else(|_| "null".to_string());
        Some((Ok(Event::default().event("pull").data(data)), (state, specs)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
pub struct PullBinariesRequest {
    pub binaries: Vec<BinaryArtifact>,
}

#[derive(Debug, Deserialize)]
pub struct BinaryArtifact {
    pub name: String,
    pub url: String,
    pub sha512: String,
}

/// `POST /host/pull/binaries`: fetch and verify the replacement binaries an
/// update will exec into, ahead of the actual handoff. Uses the downloader's
/// standard backoff (section 4.7 point 2: initial 2s, factor 2, capped at
/// 30s, 5 attempts) on a transient fetch or checksum failure, and the same
/// SHA-512 checksum manifest format as the release-binary download itself
/// (section 6).
pub async fn pull_binaries(
    State(state): State<AppState>,
    Json(req): Json<PullBinariesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let dest_dir = state.layers.path_for("").parent().map(|p| p.join("binaries")).unwrap_or_else(|| "/tmp/flynn-host-binaries".into());
    tokio::fs::create_dir_all(&dest_dir).await.map_err(|e| HostError::Transient(e.to_string()))?;
    for artifact in req.binaries {
        fetch_and_verify(&dest_dir, &artifact).await?;
    }
    Ok(StatusCode::OK)
}

fn downloader_backoff() -> crate::backoff::BackoffConfig {
    crate::backoff::BackoffConfig { base_delay: std::time::Duration::from_secs(2), max_delay: std::time::Duration::from_secs(30), max_attempts: 5 }
}

async fn fetch_and_verify(dest_dir: &std::path::Path, artifact: &BinaryArtifact) -> Result<(), ApiError> {
    let dest = dest_dir.join(&artifact.name);
    let config = downloader_backoff();
    let mut last_err = None;
    for attempt in 1..=config.max_attempts {
        match try_fetch(&dest, artifact).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(binary = %artifact.name, attempt, error = %e, "binary pull attempt failed");
                last_err = Some(e);
                if attempt < config.max_attempts {
                    tokio::time::sleep(crate::backoff::delay_for_attempt(&config, attempt)).await;
                }
            }
        }
    }
    Err(HostError::Transient(last_err.unwrap_or_else(|| "exhausted retries".to_string())).into())
}

async fn try_fetch(dest: &std::path::Path, artifact: &BinaryArtifact) -> Result<(), String> {
    let bytes = reqwest::get(&artifact.url)
        .await
        .map_err(|e| e.to_string())?
        .error_for_status()
        .map_err(|e| e.to_string())?
        .bytes()
        .await
        .map_err(|e| e.to_string())?;

    let mut hasher = Sha512::new();
    hasher.update(&bytes);
    let digest: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();
    if !digest.eq_ignore_ascii_case(&artifact.sha512) {
        return Err(format!("binary {} failed checksum verification", artifact.name));
    }
    tokio::fs::write(dest, &bytes).await.map_err(|e| e.to_string())?;
    Ok(())
}

/// `POST /attach`: a read-only view of a job's combined stdout/stderr. Full
/// bidirectional framed attach (stdin injection, tty resize) is not
/// implemented; see DESIGN.md.
pub async fn attach(
    State(state): State<AppState>,
    axum::extract::Query(params): axum::extract::Query<AttachParams>,
) -> Result<Response, ApiError> {
    let id = flynn_core::job::JobId::from_str(&params.job)
        .map_err(|_| ApiError::from(HostError::Validation(format!("invalid job id {:?}", params.job))))?;
    let handle = state.backend.open_logs(id).await?;
    let stream = futures::stream::unfold(handle, |mut handle| async move {
        let line = handle.rx.recv().await?;
        Some((Ok::<_, std::io::Error>(line), handle))
    });
    let body = axum::body::Body::from_stream(stream);
    Ok(Response::builder().status(StatusCode::OK).header("Content-Type", "application/octet-stream").body(body).unwrap())
}

#[derive(Debug, Deserialize)]
pub struct AttachParams {
    pub job: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_progress_serializes_with_error_field() {
        let progress = PullProgress { id: "layer-a".into(), status: "failed", error: Some("boom".into()) };
        let json = serde_json::to_string(&progress).unwrap();
        assert!(json.contains("\"failed\""));
        assert!(json.contains("boom"));
    }
}
