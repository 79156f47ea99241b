//! Job admission, control, and observation endpoints (section 4.6, section 6).

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use flynn_core::job::{Job, JobId, JobStatus};
use flynn_core::HostError;
use flynn_store::{ListenTarget, SlotName};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use super::error::ApiError;
use super::events::{sse_response, wants_stream};
use crate::state::AppState;

const STOP_GRACE: Duration = Duration::from_secs(10);

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::from_str(raw).map_err(|_| ApiError::from(HostError::Validation(format!("invalid job id {raw:?}"))))
}

fn slot_name(raw: &str) -> Option<SlotName> {
    match raw {
        "flannel" => Some(SlotName::Flannel),
        "discoverd" => Some(SlotName::Discoverd),
        _ => None,
    }
}

/// Record `job` as the current holder of its claimed persistent slot, if
/// any, evicting whatever job previously held it (section 4.2
/// `SetPersistentSlot`, section 4.6.1).
pub(crate) fn assign_slot_if_claimed(state: &AppState, job: &Job) {
    let Some(slot) = job.persistent_slot().and_then(slot_name) else { return };
    match state.store.assign_slot(slot, job.id.to_string()) {
        Ok(Some(previous)) => tracing::info!(%slot, %previous, holder = %job.id, "persistent slot reassigned"),
        Ok(None) => tracing::info!(%slot, holder = %job.id, "persistent slot assigned"),
        Err(e) => tracing::warn!(%slot, job_id = %job.id, error = %e, "failed to assign persistent slot"),
    }
}

/// Release `job`'s claimed persistent slot if it is still the current
/// holder. A job that was displaced by a later assignment is already gone
/// from the slot, so this is a no-op for it.
pub(crate) fn release_slot_if_held(state: &AppState, job: &Job) {
    let Some(slot) = job.persistent_slot().and_then(slot_name) else { return };
    if let Err(e) = state.store.release_slot(slot, &job.id.to_string()) {
        tracing::warn!(%slot, job_id = %job.id, error = %e, "failed to release persistent slot");
    }
}

pub async fn list_or_stream(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    if wants_stream(&headers) {
        let listener = state.store.listen(ListenTarget::All);
        return Ok(sse_response(listener).into_response());
    }
    Ok(Json(state.store.list()?).into_response())
}

pub async fn get_or_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let id = parse_job_id(&id)?;
    if wants_stream(&headers) {
        let listener = state.store.listen(ListenTarget::Job(id));
        return Ok(sse_response(listener).into_response());
    }
    Ok(Json(state.store.get(id)?).into_response())
}

pub async fn add_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(job): Json<Job>,
) -> Result<impl IntoResponse, ApiError> {
    let path_id = parse_job_id(&id)?;
    if job.id != path_id {
        return Err(HostError::Validation("job id in body does not match the URL".into()).into());
    }
    job.validate().map_err(HostError::Validation)?;
    if state.runtime.is_shutting_down() {
        return Err(HostError::Conflict("host is shutting down, refusing new jobs".into()).into());
    }
    if !state.admission.take() {
        return Err(HostError::RateLimited("max concurrent job admissions reached".into()).into());
    }

    match state.store.add_job(job, &*state.host_id, state.now_ms()) {
        Ok(active) => {
            assign_slot_if_claimed(&state, &active.job);
            spawn_run(state, active.clone());
            Ok((StatusCode::OK, Json(active)))
        }
        Err(e) => {
            state.admission.put();
            Err(e.into())
        }
    }
}

/// Drive the backend in the background; `PUT` has already returned to the
/// caller by the time this resolves. A synchronous `run` failure is the
/// only path that needs to free the admission token directly — a
/// successful `run` frees it later, when the reconciler observes the
/// job's terminal `BackendEvent` (bootstrap's event loop).
fn spawn_run(state: AppState, active: flynn_core::job::ActiveJob) {
    tokio::spawn(async move {
        if let Err(e) = state.backend.run(&active).await {
            tracing::warn!(job_id = %active.id(), error = %e, "backend run failed, marking job failed");
            let _ = state.store.set_status_failed(active.id(), e.to_string(), state.now_ms());
            release_slot_if_held(&state, &active.job);
            state.admission.put();
        }
    });
}

pub async fn stop_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&id)?;
    let active = state.store.get(id)?;
    match active.status {
        JobStatus::Starting => {
            state.store.set_force_stop(id)?;
            if !state.backend.job_exists(id).await {
                state.store.set_status_done(id, 0, state.now_ms())?;
                release_slot_if_held(&state, &active.job);
            }
        }
        JobStatus::Running => {
            state.store.set_force_stop(id)?;
            state.backend.stop(id, STOP_GRACE).await?;
        }
        JobStatus::Done | JobStatus::Crashed | JobStatus::Failed => {
            return Err(HostError::Conflict(format!("job {id} already stopped")).into());
        }
    }
    Ok(StatusCode::OK)
}

pub async fn signal_job(
    State(state): State<AppState>,
    Path((id, n)): Path<(String, i32)>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&id)?;
    state.backend.signal(id, n).await?;
    Ok(StatusCode::OK)
}

pub async fn discoverd_deregister(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&id)?;
    state.backend.discoverd_deregister(id).await?;
    Ok(StatusCode::OK)
}

pub async fn job_stats(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.backend.get_job_stats(id).await?))
}

pub async fn all_job_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.backend.get_all_job_stats().await?))
}

pub async fn host_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.backend.get_host_stats().await?))
}

fn default_check_proto() -> String {
    "tcp".to_string()
}

/// A port to probe, with the protocol a job's [`Port`](flynn_core::Port)
/// would actually bind (section 3's `Port.proto` mirrors the same
/// tcp/udp split, since a job can request either).
#[derive(Debug, Clone, Deserialize)]
pub struct PortCheck {
    pub port: u16,
    #[serde(default = "default_check_proto")]
    pub proto: String,
}

#[derive(Debug, Deserialize)]
pub struct ResourceCheckRequest {
    pub ports: Vec<PortCheck>,
}

#[derive(Debug, Serialize)]
struct ResourceCheckResponse {
    conflicts: Vec<u16>,
}

fn port_is_bindable(check: &PortCheck) -> bool {
    match check.proto.as_str() {
        "udp" => std::net::UdpSocket::bind(("0.0.0.0", check.port)).is_ok(),
        _ => std::net::TcpListener::bind(("0.0.0.0", check.port)).is_ok(),
    }
}

/// `POST /host/resource-check`: attempt to bind each requested port on
/// all interfaces, on the protocol it asks for (tcp by default, udp if
/// named); a 409 lists every port that was already taken.
pub async fn resource_check(Json(req): Json<ResourceCheckRequest>) -> Result<impl IntoResponse, ApiError> {
    let conflicts: Vec<u16> =
        req.ports.into_iter().filter(|check| !port_is_bindable(check)).map(|check| check.port).collect();
    if conflicts.is_empty() {
        Ok((StatusCode::OK, Json(ResourceCheckResponse { conflicts })))
    } else {
        Ok((StatusCode::CONFLICT, Json(ResourceCheckResponse { conflicts })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flynn_backend::fake::FakeBackend;
    use flynn_core::job::JobConfig;
    use flynn_core::mountspec::MountSpec;
    use flynn_discoverd::fake::FakeDiscoverdClient;
    use flynn_store::StateStore;
    use flynn_volume::{LayerStore, VolumeManager};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn test_state() -> (AppState, tempfile::TempDir) {
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
            flynn_core::PerIpRateLimiter::default_policy(),
        );
        (state, dir)
    }

    fn slot_claiming_job(slot: &str) -> Job {
        let mut metadata = HashMap::new();
        metadata.insert("flynn-controller.persistent-slot".to_string(), slot.to_string());
        Job {
            id: JobId::new(),
            mountspecs: vec![MountSpec {
                kind: "squashfs".into(),
                id: "layer-a".into(),
                url: "https://example.invalid/layer-a".into(),
                size: 1,
                hashes: HashMap::new(),
                meta: HashMap::new(),
            }],
            metadata,
            resources: Default::default(),
            partition: None,
            config: JobConfig::default(),
            resurrect: false,
            profiles: Vec::new(),
        }
    }

    #[test]
    fn assign_slot_if_claimed_evicts_the_previous_holder() {
        let (state, _dir) = test_state();
        let first = slot_claiming_job("discoverd");
        let second = slot_claiming_job("discoverd");

        assign_slot_if_claimed(&state, &first);
        assert_eq!(state.store.slot_holder(SlotName::Discoverd).unwrap().as_deref(), Some(first.id.to_string().as_str()));

        assign_slot_if_claimed(&state, &second);
        assert_eq!(state.store.slot_holder(SlotName::Discoverd).unwrap().as_deref(), Some(second.id.to_string().as_str()));
    }

    #[test]
    fn release_slot_if_held_is_a_no_op_for_a_displaced_holder() {
        let (state, _dir) = test_state();
        let first = slot_claiming_job("flannel");
        let second = slot_claiming_job("flannel");

        assign_slot_if_claimed(&state, &first);
        assign_slot_if_claimed(&state, &second);
        release_slot_if_held(&state, &first);

        assert_eq!(state.store.slot_holder(SlotName::Flannel).unwrap().as_deref(), Some(second.id.to_string().as_str()));
    }

    #[test]
    fn release_slot_if_held_clears_the_current_holder() {
        let (state, _dir) = test_state();
        let job = slot_claiming_job("flannel");

        assign_slot_if_claimed(&state, &job);
        release_slot_if_held(&state, &job);

        assert_eq!(state.store.slot_holder(SlotName::Flannel).unwrap(), None);
    }

    #[test]
    fn parse_job_id_rejects_non_uuid_strings() {
        assert!(parse_job_id("not-a-uuid").is_err());
    }

    #[test]
    fn parse_job_id_accepts_a_valid_uuid() {
        let id = JobId::new();
        assert_eq!(parse_job_id(&id.to_string()).unwrap(), id);
    }

    #[tokio::test]
    async fn resource_check_reports_conflicting_bound_tcp_port() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let response =
            resource_check(Json(ResourceCheckRequest { ports: vec![PortCheck { port, proto: "tcp".into() }] }))
                .await
                .unwrap();
        let response = response.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn resource_check_reports_conflicting_bound_udp_port() {
        let socket = std::net::UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let port = socket.local_addr().unwrap().port();
        let response =
            resource_check(Json(ResourceCheckRequest { ports: vec![PortCheck { port, proto: "udp".into() }] }))
                .await
                .unwrap();
        let response = response.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn resource_check_does_not_confuse_udp_conflict_for_tcp() {
        // A port bound only on UDP must not be reported as free when the
        // caller asks about its TCP availability, and vice versa.
        let socket = std::net::UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let port = socket.local_addr().unwrap().port();
        let response =
            resource_check(Json(ResourceCheckRequest { ports: vec![PortCheck { port, proto: "tcp".into() }] }))
                .await
                .unwrap();
        let response = response.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn resource_check_passes_when_all_ports_are_free() {
        // Port 0 always binds (OS-assigned), exercising the success path
        // without depending on a specific free port.
        let response =
            resource_check(Json(ResourceCheckRequest { ports: vec![PortCheck { port: 0, proto: "tcp".into() }] }))
                .await
                .unwrap();
        let response = response.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn port_check_proto_defaults_to_tcp_when_omitted() {
        let check: PortCheck = serde_json::from_str(r#"{"port":80}"#).unwrap();
        assert_eq!(check.proto, "tcp");
    }
}
