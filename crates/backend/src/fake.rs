//! An in-memory [`Backend`] for exercising the agent's HTTP layer and
//! state-store wiring without spawning real processes.

use async_trait::async_trait;
use flynn_core::host_status::{DiscoverdConfig, NetworkConfig};
use flynn_core::job::{ActiveJob, JobId};
use flynn_core::{HostError, HostResult};
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::broadcast;

use crate::{Backend, BackendEvent, HostStats, JobStats, LogHandle};

const EVENTS_CHANNEL_CAPACITY: usize = 256;

pub struct FakeBackend {
    running: Mutex<HashSet<JobId>>,
    fail_run: Mutex<HashSet<JobId>>,
    events_tx: broadcast::Sender<BackendEvent>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        let (events_tx, _rx) = broadcast::channel(EVENTS_CHANNEL_CAPACITY);
        Self { running: Mutex::new(HashSet::new()), fail_run: Mutex::new(HashSet::new()), events_tx }
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `run` call for `id` fail, to exercise the agent's
    /// `SetStatusFailed` path.
    pub fn fail_next_run(&self, id: JobId) {
        self.fail_run.lock().insert(id);
    }

    /// Manually emit a lifecycle event, for tests that exercise reconciler
    /// logic without a real process behind it.
    pub fn emit(&self, event: BackendEvent) {
        let _ = self.events_tx.send(event);
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn run(&self, job: &ActiveJob) -> HostResult<()> {
        if self.fail_run.lock().remove(&job.id()) {
            return Err(HostError::Transient("fake backend: forced failure".into()));
        }
        self.running.lock().insert(job.id());
        self.events_tx.send(BackendEvent::Started { job_id: job.id(), pid: 0 }).ok();
        Ok(())
    }

    async fn stop(&self, id: JobId, _grace: std::time::Duration) -> HostResult<()> {
        self.running.lock().remove(&id);
        Ok(())
    }

    async fn signal(&self, id: JobId, _sig: i32) -> HostResult<()> {
        if self.running.lock().contains(&id) {
            Ok(())
        } else {
            Err(HostError::NotFound(format!("job {id} not running")))
        }
    }

    async fn job_exists(&self, id: JobId) -> bool {
        self.running.lock().contains(&id)
    }

    async fn get_job_stats(&self, id: JobId) -> HostResult<JobStats> {
        Ok(JobStats { job_id: id, memory_usage_bytes: 0, cpu_usage_percent: 0.0, pid: None })
    }

    async fn get_all_job_stats(&self) -> HostResult<Vec<JobStats>> {
        let ids: Vec<_> = self.running.lock().iter().copied().collect();
        Ok(ids.into_iter().map(|id| JobStats { job_id: id, memory_usage_bytes: 0, cpu_usage_percent: 0.0, pid: None }).collect())
    }

    async fn get_host_stats(&self) -> HostResult<HostStats> {
        Ok(HostStats { running_jobs: self.running.lock().len(), ..Default::default() })
    }

    async fn open_logs(&self, id: JobId) -> HostResult<LogHandle> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(LogHandle { job_id: id, rx })
    }

    async fn close_logs(&self, _id: JobId) -> HostResult<()> {
        Ok(())
    }

    async fn configure_networking(&self, _config: &NetworkConfig) -> HostResult<()> {
        Ok(())
    }

    async fn set_discoverd_config(&self, _config: &DiscoverdConfig) -> HostResult<()> {
        Ok(())
    }

    async fn set_network_config(&self, _config: &NetworkConfig) -> HostResult<()> {
        Ok(())
    }

    async fn discoverd_deregister(&self, _id: JobId) -> HostResult<()> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flynn_core::job::Job;

    #[tokio::test]
    async fn run_then_job_exists() {
        let backend = FakeBackend::new();
        let job = ActiveJob::new(Job::test_default(), "host-1", 0);
        backend.run(&job).await.unwrap();
        assert!(backend.job_exists(job.id()).await);
    }

    #[tokio::test]
    async fn fail_next_run_forces_an_error_once() {
        let backend = FakeBackend::new();
        let job = ActiveJob::new(Job::test_default(), "host-1", 0);
        backend.fail_next_run(job.id());
        assert!(backend.run(&job).await.is_err());
        assert!(backend.run(&job).await.is_ok());
    }

    #[tokio::test]
    async fn run_publishes_a_started_event_to_subscribers() {
        let backend = FakeBackend::new();
        let mut events = backend.subscribe();
        let job = ActiveJob::new(Job::test_default(), "host-1", 0);
        backend.run(&job).await.unwrap();
        match events.recv().await.unwrap() {
            BackendEvent::Started { job_id, .. } => assert_eq!(job_id, job.id()),
            other => panic!("expected Started, got {other:?}"),
        }
    }
}
