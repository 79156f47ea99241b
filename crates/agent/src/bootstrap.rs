//! Daemon startup, the backend-event reconciler, and the in-place restart
//! that backs `POST /host/update` (section 4.6, section 4.7).

use flynn_backend::local::LocalBackend;
use flynn_backend::{Backend, BackendEvent};
use flynn_core::{HostError, HostResult, PerIpRateLimiter};
use flynn_discoverd::http::HttpDiscoverdClient;
use flynn_discoverd::DiscoverdClient;
use flynn_store::StateStore;
use flynn_volume::{LayerStore, VolumeManager};
use fs2::FileExt;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::state::AppState;

/// Time the parent gives the replacement binary to come up and start
/// accepting before it exits (section 4.7 point 3).
const SHUTDOWN_DELAY: Duration = Duration::from_secs(1);

/// A replacement binary races its exiting parent for the startup lockfile
/// and the state database; retry for a little longer than `SHUTDOWN_DELAY`
/// rather than failing fast on the first attempt.
const LOCK_RETRY_BUDGET: Duration = Duration::from_secs(3);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Concurrent in-flight job admissions this host will accept at once.
const DEFAULT_ADMISSION_CAPACITY: usize = 64;

/// Open every backing store, bind the HTTP listener, and serve until a
/// shutdown signal arrives.
pub async fn run(config: Config) -> HostResult<()> {
    tokio::fs::create_dir_all(&config.state_dir)
        .await
        .map_err(|e| HostError::Fatal(format!("creating state dir {}: {e}", config.state_dir.display())))?;
    let _lock = acquire_lock(&config).await?;

    let store = Arc::new(StateStore::open(config.state_db_path())?);
    let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new());
    let discoverd: Arc<dyn DiscoverdClient> = Arc::new(HttpDiscoverdClient::new(config.discoverd_url.clone()));
    let layers = Arc::new(LayerStore::new(config.layer_cache_dir.clone()));
    let volumes = Arc::new(VolumeManager::new(config.volumes_dir.clone()));
    let per_ip_limiter = PerIpRateLimiter::new(config.rate_limit_per_ip, config.rate_limit_window);

    let state = AppState::new(
        config.host_id.clone(),
        store,
        backend,
        discoverd,
        layers,
        volumes,
        config.auth_key.clone(),
        DEFAULT_ADMISSION_CAPACITY,
        per_ip_limiter,
    );

    spawn_reconciler(state.clone());
    tokio::spawn(crate::webhook_dispatch::run(state.clone()));

    let listener = bind_listener(config.listen_addr)?;

    let app = crate::build_router(state.clone());
    tracing::info!(addr = %config.listen_addr, host_id = %config.host_id, "flynn-host listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(wait_for_shutdown(state))
        .await
        .map_err(|e| HostError::Fatal(format!("http server error: {e}")))
}

/// Acquire the startup lockfile, retrying for [`LOCK_RETRY_BUDGET`] so a
/// replacement binary spawned by `restart_in_place` can win it from its
/// still-exiting parent (section 4.7 point 5.2: the parent closes its state
/// before the child opens the same database).
async fn acquire_lock(config: &Config) -> HostResult<std::fs::File> {
    let path = config.lock_path();
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| HostError::Fatal(format!("opening lockfile {}: {e}", path.display())))?;

    let deadline = tokio::time::Instant::now() + LOCK_RETRY_BUDGET;
    loop {
        match lock_file.try_lock_exclusive() {
            Ok(()) => return Ok(lock_file),
            Err(e) if tokio::time::Instant::now() >= deadline => {
                return Err(HostError::Fatal(format!("another flynn-host already holds {}: {e}", path.display()))
                    .with_remedy("stop the other flynn-host process, or remove the stale lockfile if it crashed"));
            }
            Err(_) => tokio::time::sleep(LOCK_RETRY_INTERVAL).await,
        }
    }
}

/// Bind the HTTP listener with `SO_REUSEPORT` so a replacement binary can
/// bind the same address while this process is still serving, letting the
/// kernel load-balance the handoff instead of requiring an inherited fd
/// (section 4.7 point 1).
fn bind_listener(addr: SocketAddr) -> HostResult<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| HostError::Fatal(format!("creating listener socket: {e}")))?;
    socket.set_reuse_address(true).map_err(|e| HostError::Fatal(format!("setting SO_REUSEADDR: {e}")))?;
    socket.set_reuse_port(true).map_err(|e| HostError::Fatal(format!("setting SO_REUSEPORT: {e}")))?;
    socket.set_nonblocking(true).map_err(|e| HostError::Fatal(format!("setting listener non-blocking: {e}")))?;
    socket.bind(&addr.into()).map_err(|e| HostError::Fatal(format!("binding {addr}: {e}")))?;
    socket.listen(1024).map_err(|e| HostError::Fatal(format!("listening on {addr}: {e}")))?;
    TcpListener::from_std(socket.into()).map_err(|e| HostError::Fatal(format!("adopting listener for {addr}: {e}")))
}

async fn wait_for_shutdown(state: AppState) {
    let ctrl_c = async { tokio::signal::ctrl_c().await.ok() };
    let shutting_down = async {
        while !state.runtime.is_shutting_down() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    tokio::select! {
        _ = ctrl_c => state.runtime.begin_shutdown(),
        _ = shutting_down => {}
    }
}

/// Consume backend lifecycle events and drive the matching state-store
/// transition, so job status always follows from what the backend actually
/// observed rather than from the HTTP layer guessing at outcomes.
fn spawn_reconciler(state: AppState) {
    tokio::spawn(async move {
        let mut events = state.backend.subscribe();
        loop {
            match events.recv().await {
                Ok(BackendEvent::Started { job_id, pid }) => {
                    let now = state.now_ms();
                    if let Err(e) = state.store.set_status_running(job_id, Some(pid), None, now) {
                        tracing::warn!(%job_id, error = %e, "failed to record job as running");
                    }
                }
                Ok(BackendEvent::Exited { job_id, exit_status, error }) => {
                    let now = state.now_ms();
                    let result = match error {
                        Some(msg) => state.store.set_status_crashed(job_id, exit_status, msg, now),
                        None => state.store.set_status_done(job_id, exit_status, now),
                    };
                    if let Err(e) = result {
                        tracing::warn!(%job_id, error = %e, "failed to record job exit");
                    } else if let Ok(active) = state.store.get(job_id) {
                        crate::routes::jobs::release_slot_if_held(&state, &active.job);
                    }
                    state.admission.put();
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "reconciler lagged behind backend events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// `POST /host/update`'s actual handoff: spawn the replacement binary,
/// which binds the same address via `SO_REUSEPORT` and starts accepting
/// alongside this process, then exit after `SHUTDOWN_DELAY` once it has had
/// time to come up (section 4.7 points 1-3).
pub async fn restart_in_place(_state: &AppState) -> HostResult<()> {
    let exe = std::env::current_exe().map_err(|e| HostError::Fatal(format!("resolving current binary: {e}")))?;

    std::process::Command::new(exe).spawn().map_err(|e| HostError::Fatal(format!("forking replacement binary: {e}")))?;

    tracing::info!("spawned replacement binary, exiting after shutdown delay");
    tokio::time::sleep(SHUTDOWN_DELAY).await;
    std::process::exit(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The whole point of `SO_REUSEPORT` is that the replacement binary can
    /// bind the same address while this process is still listening on it.
    #[tokio::test]
    async fn bind_listener_allows_a_second_bind_on_the_same_address() {
        let first = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        let second = bind_listener(addr).unwrap();
        assert_eq!(second.local_addr().unwrap(), addr);
    }
}
