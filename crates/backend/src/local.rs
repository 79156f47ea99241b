//! The local-process backend: runs a job's entrypoint as a direct child of
//! the agent. The default, and the only backend a single-host install
//! needs (section 4.3).

use async_trait::async_trait;
use flynn_core::host_status::{DiscoverdConfig, NetworkConfig};
use flynn_core::job::{ActiveJob, JobId};
use flynn_core::{HostError, HostResult};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use crate::{Backend, BackendEvent, HostStats, JobStats, LogHandle};

struct RunningJob {
    pid: u32,
    log_tx: broadcast::Sender<Vec<u8>>,
}

/// Spawns jobs as direct child processes. Log output is tee'd into a
/// per-job broadcast channel so multiple callers can attach to the same
/// job's stream concurrently.
pub struct LocalBackend {
    children: Mutex<HashMap<JobId, RunningJob>>,
    events_tx: broadcast::Sender<BackendEvent>,
    discoverd_config: Mutex<Option<DiscoverdConfig>>,
    network_config: Mutex<Option<NetworkConfig>>,
}

const LOG_CHANNEL_CAPACITY: usize = 1024;
const EVENTS_CHANNEL_CAPACITY: usize = 1024;

impl LocalBackend {
    pub fn new() -> Self {
        let (events_tx, _rx) = broadcast::channel(EVENTS_CHANNEL_CAPACITY);
        Self {
            children: Mutex::new(HashMap::new()),
            events_tx,
            discoverd_config: Mutex::new(None),
            network_config: Mutex::new(None),
        }
    }

    fn pid_of(&self, id: JobId) -> Option<u32> {
        self.children.lock().get(&id).map(|r| r.pid)
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn run(&self, job: &ActiveJob) -> HostResult<()> {
        let config = &job.job.config;
        let Some(entrypoint) = config.args.first() else {
            return Err(HostError::Validation("job config has no args[0] entrypoint".into()));
        };

        let mut command = tokio::process::Command::new(entrypoint);
        command.args(&config.args[1..]);
        command.envs(&config.env);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| HostError::Transient(format!("failed to spawn job {}: {e}", job.id())))?;
        let pid = child.id().ok_or_else(|| HostError::Fatal("spawned child has no pid".into()))?;

        let (log_tx, _rx) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        self.children.lock().insert(job.id(), RunningJob { pid, log_tx: log_tx.clone() });
        let _ = self.events_tx.send(BackendEvent::Started { job_id: job.id(), pid });

        if let Some(stdout) = child.stdout.take() {
            spawn_log_pump(stdout, log_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_log_pump(stderr, log_tx.clone());
        }

        let job_id = job.id();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = child.wait().await;
            let event = match result {
                Ok(status) => BackendEvent::Exited {
                    job_id,
                    exit_status: status.code().unwrap_or(-1),
                    error: (!status.success()).then(|| status.to_string()),
                },
                Err(e) => {
                    BackendEvent::Exited { job_id, exit_status: -1, error: Some(e.to_string()) }
                }
            };
            tracing::info!(%job_id, ?event, "job process exited");
            let _ = events_tx.send(event);
        });

        Ok(())
    }

    async fn stop(&self, id: JobId, grace: Duration) -> HostResult<()> {
        let Some(pid) = self.pid_of(id) else {
            return Err(HostError::NotFound(format!("no running process for job {id}")));
        };
        let pid = Pid::from_raw(pid as i32);
        signal::kill(pid, Signal::SIGTERM).map_err(|e| HostError::Transient(e.to_string()))?;
        tokio::time::sleep(grace).await;
        if self.children.lock().contains_key(&id) {
            let _ = signal::kill(pid, Signal::SIGKILL);
        }
        Ok(())
    }

    async fn signal(&self, id: JobId, sig: i32) -> HostResult<()> {
        let Some(pid) = self.pid_of(id) else {
            return Err(HostError::NotFound(format!("no running process for job {id}")));
        };
        let signal = Signal::try_from(sig).map_err(|e| HostError::Validation(e.to_string()))?;
        signal::kill(Pid::from_raw(pid as i32), signal).map_err(|e| HostError::Transient(e.to_string()))
    }

    async fn job_exists(&self, id: JobId) -> bool {
        self.children.lock().contains_key(&id)
    }

    async fn get_job_stats(&self, id: JobId) -> HostResult<JobStats> {
        let pid = self.pid_of(id).ok_or_else(|| HostError::NotFound(format!("job {id} not running")))?;
        Ok(JobStats { job_id: id, memory_usage_bytes: 0, cpu_usage_percent: 0.0, pid: Some(pid) })
    }

    async fn get_all_job_stats(&self) -> HostResult<Vec<JobStats>> {
        let ids: Vec<JobId> = self.children.lock().keys().copied().collect();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.get_job_stats(id).await?);
        }
        Ok(out)
    }

    async fn get_host_stats(&self) -> HostResult<HostStats> {
        Ok(HostStats {
            running_jobs: self.children.lock().len(),
            memory_total_bytes: 0,
            memory_used_bytes: 0,
            cpu_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        })
    }

    async fn open_logs(&self, id: JobId) -> HostResult<LogHandle> {
        let log_tx = {
            let children = self.children.lock();
            children.get(&id).map(|r| r.log_tx.clone())
        };
        let log_tx = log_tx.ok_or_else(|| HostError::NotFound(format!("job {id} not running")))?;
        let mut sub = log_tx.subscribe();
        let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Ok(line) = sub.recv().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
        Ok(LogHandle { job_id: id, rx })
    }

    async fn close_logs(&self, _id: JobId) -> HostResult<()> {
        // Dropping the receiver returned by `open_logs` is enough to detach;
        // nothing further to release here.
        Ok(())
    }

    async fn configure_networking(&self, config: &NetworkConfig) -> HostResult<()> {
        *self.network_config.lock() = Some(config.clone());
        Ok(())
    }

    async fn set_discoverd_config(&self, config: &DiscoverdConfig) -> HostResult<()> {
        *self.discoverd_config.lock() = Some(config.clone());
        Ok(())
    }

    async fn set_network_config(&self, config: &NetworkConfig) -> HostResult<()> {
        self.configure_networking(config).await
    }

    async fn discoverd_deregister(&self, _id: JobId) -> HostResult<()> {
        // The local backend has no service registry of its own; the agent's
        // discoverd client handles deregistration directly.
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events_tx.subscribe()
    }
}

fn spawn_log_pump(
    reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    tx: broadcast::Sender<Vec<u8>>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = tx.send(line.into_bytes());
        }
    });
}

impl Drop for LocalBackend {
    fn drop(&mut self) {
        let children = self.children.lock();
        for job in children.values() {
            let _ = signal::kill(Pid::from_raw(job.pid as i32), Signal::SIGTERM);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flynn_core::job::Job;

    fn echo_job(arg: &str) -> ActiveJob {
        let mut job = Job::test_default();
        job.config.args = vec!["/bin/echo".into(), arg.into()];
        ActiveJob::new(job, "host-1", 0)
    }

    #[tokio::test]
    async fn run_reports_started_then_exited() {
        let backend = LocalBackend::new();
        let mut events = backend.subscribe();
        let job = echo_job("hello");
        let id = job.id();
        backend.run(&job).await.unwrap();

        match events.recv().await.unwrap() {
            BackendEvent::Started { job_id, .. } => assert_eq!(job_id, id),
            other => panic!("expected Started, got {other:?}"),
        }
        match events.recv().await.unwrap() {
            BackendEvent::Exited { job_id, exit_status, .. } => {
                assert_eq!(job_id, id);
                assert_eq!(exit_status, 0);
            }
            other => panic!("expected Exited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_without_args_is_a_validation_error() {
        let backend = LocalBackend::new();
        let job = ActiveJob::new(Job::test_default(), "host-1", 0);
        let err = backend.run(&job).await.unwrap_err();
        assert!(matches!(err, HostError::Validation(_)));
    }

    #[tokio::test]
    async fn open_logs_streams_stdout_lines() {
        let backend = LocalBackend::new();
        let job = echo_job("line-one");
        backend.run(&job).await.unwrap();
        let mut handle = backend.open_logs(job.id()).await.unwrap();
        let line = handle.rx.recv().await.unwrap();
        assert_eq!(line, b"line-one");
    }
}
