#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flynn-backend: the pluggable execution layer the host agent drives to
//! actually run jobs (section 4.3).
//!
//! [`Backend`] is the seam: the agent only ever talks to a `dyn Backend`, so
//! swapping the local-process implementation for a container runtime never
//! touches job admission, event publication, or the HTTP API.

pub mod local;
pub mod stats;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use async_trait::async_trait;
use flynn_core::host_status::{DiscoverdConfig, NetworkConfig};
use flynn_core::job::{ActiveJob, JobId};
use flynn_core::HostResult;

pub use stats::{HostStats, JobStats};

/// A handle to a job's live output stream, returned by [`Backend::open_logs`].
pub struct LogHandle {
    pub job_id: JobId,
    pub rx: tokio::sync::mpsc::Receiver<Vec<u8>>,
}

/// Emitted as a backend observes a job's process lifecycle. The agent
/// subscribes once at startup and drives the corresponding state store
/// transition (`SetStatusRunning`/`SetStatusDone`/`SetStatusCrashed`) off
/// of it, rather than polling.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    Started { job_id: JobId, pid: u32 },
    Exited { job_id: JobId, exit_status: i32, error: Option<String> },
}

/// The execution backend interface the agent drives. Implementations own
/// the actual process/container lifecycle; the agent owns admission and
/// state tracking.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Start `job`'s entrypoint. On success the backend must eventually
    /// report the observed pid/internal_ip back through its own channel so
    /// the caller can call `StateStore::set_status_running`.
    async fn run(&self, job: &ActiveJob) -> HostResult<()>;

    /// Stop a running job, giving it `grace` before escalating to a kill.
    async fn stop(&self, id: JobId, grace: std::time::Duration) -> HostResult<()>;

    /// Send an arbitrary signal to the job's process group.
    async fn signal(&self, id: JobId, signal: i32) -> HostResult<()>;

    /// Whether the backend still believes this job is alive.
    async fn job_exists(&self, id: JobId) -> bool;

    async fn get_job_stats(&self, id: JobId) -> HostResult<JobStats>;

    async fn get_all_job_stats(&self) -> HostResult<Vec<JobStats>>;

    async fn get_host_stats(&self) -> HostResult<HostStats>;

    /// Attach to a job's combined stdout/stderr stream.
    async fn open_logs(&self, id: JobId) -> HostResult<LogHandle>;

    async fn close_logs(&self, id: JobId) -> HostResult<()>;

    /// Apply the host's network configuration to new and existing jobs.
    async fn configure_networking(&self, config: &NetworkConfig) -> HostResult<()>;

    async fn set_discoverd_config(&self, config: &DiscoverdConfig) -> HostResult<()>;

    async fn set_network_config(&self, config: &NetworkConfig) -> HostResult<()>;

    /// Deregister a job from the service registry ahead of stopping it,
    /// so in-flight requests drain before the process exits.
    async fn discoverd_deregister(&self, id: JobId) -> HostResult<()>;

    /// Subscribe to this backend's process lifecycle events. Every call
    /// returns an independent receiver fed from the same broadcast, so a
    /// late subscriber only sees events published after it subscribes.
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BackendEvent>;
}
