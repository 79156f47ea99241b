//! Job record CRUD and status transitions (section 3, section 4.2).

use flynn_core::event::{JobEvent, JobEventKind};
use flynn_core::job::{ActiveJob, Job, JobId, JobStatus};
use std::net::IpAddr;
use thiserror::Error;

use crate::store::StateStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobsError {
    #[error("job {0} already exists")]
    AlreadyExists(JobId),
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {id} cannot transition from {from} to {to}")]
    IllegalTransition { id: JobId, from: JobStatus, to: JobStatus },
    #[error("backing store error: {0}")]
    Backend(String),
}

impl From<sled::Error> for JobsError {
    fn from(e: sled::Error) -> Self {
        JobsError::Backend(e.to_string())
    }
}

fn key(id: JobId) -> [u8; 16] {
    *id.0.as_bytes()
}

impl StateStore {
    fn load(&self, id: JobId) -> Result<ActiveJob, JobsError> {
        let bytes = self.jobs.get(key(id))?.ok_or(JobsError::NotFound(id))?;
        serde_json::from_slice(&bytes).map_err(|e| JobsError::Backend(e.to_string()))
    }

    fn save(&self, active: &ActiveJob) -> Result<(), JobsError> {
        let bytes = serde_json::to_vec(active).map_err(|e| JobsError::Backend(e.to_string()))?;
        self.jobs.insert(key(active.id()), bytes)?;
        Ok(())
    }

    fn emit(&self, active: &ActiveJob) {
        let seq = self.next_seq(active.id());
        let kind = JobEventKind::for_status(active.status);
        self.publish(JobEvent::new(kind, seq, active.clone()));
    }

    /// `AddJob`: admit a new job, starting in [`JobStatus::Starting`].
    /// Duplicate ids are a conflict, not an upsert (section 3 invariant).
    pub fn add_job(&self, job: Job, host_id: impl Into<String>, now_ms: u64) -> Result<ActiveJob, JobsError> {
        let _guard = self.acquire();
        if self.jobs.contains_key(key(job.id))? {
            return Err(JobsError::AlreadyExists(job.id));
        }
        let active = ActiveJob::new(job, host_id, now_ms);
        self.save(&active)?;
        self.emit(&active);
        Ok(active)
    }

    /// `GetJob`: look up a single job by id.
    pub fn get(&self, id: JobId) -> Result<ActiveJob, JobsError> {
        let _guard = self.acquire();
        self.load(id)
    }

    /// `GetActive`: every job not yet in a terminal status.
    pub fn get_active(&self) -> Result<Vec<ActiveJob>, JobsError> {
        let _guard = self.acquire();
        Ok(self.all_locked()?.into_iter().filter(|a| !a.status.is_terminal()).collect())
    }

    /// `ListJobs`: every job record known to this host, active or not.
    pub fn list(&self) -> Result<Vec<ActiveJob>, JobsError> {
        let _guard = self.acquire();
        self.all_locked()
    }

    fn all_locked(&self) -> Result<Vec<ActiveJob>, JobsError> {
        self.jobs
            .iter()
            .values()
            .map(|r| {
                let bytes = r?;
                serde_json::from_slice(&bytes).map_err(|e| JobsError::Backend(e.to_string()))
            })
            .collect()
    }

    fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        mutate: impl FnOnce(&mut ActiveJob),
    ) -> Result<ActiveJob, JobsError> {
        let _guard = self.acquire();
        let mut active = self.load(id)?;
        let from = active.status;
        if !from.can_transition_to(to) {
            return Err(JobsError::IllegalTransition { id, from, to });
        }
        active.status = to;
        mutate(&mut active);
        self.save(&active)?;
        self.emit(&active);
        Ok(active)
    }

    /// `SetStatusRunning`: the backend reports the job's process is up.
    pub fn set_status_running(
        &self,
        id: JobId,
        pid: Option<u32>,
        internal_ip: Option<IpAddr>,
        now_ms: u64,
    ) -> Result<ActiveJob, JobsError> {
        self.transition(id, JobStatus::Running, |a| {
            a.pid = pid;
            a.internal_ip = internal_ip;
            a.started_at_ms = Some(now_ms);
        })
    }

    /// `SetStatusDone`: the job exited cleanly.
    pub fn set_status_done(&self, id: JobId, exit_status: i32, now_ms: u64) -> Result<ActiveJob, JobsError> {
        self.transition(id, JobStatus::Done, |a| {
            a.exit_status = Some(exit_status);
            a.ended_at_ms = Some(now_ms);
        })
    }

    /// `SetStatusFailed`: the job failed to start.
    pub fn set_status_failed(&self, id: JobId, error: impl Into<String>, now_ms: u64) -> Result<ActiveJob, JobsError> {
        self.transition(id, JobStatus::Failed, |a| {
            a.error = Some(error.into());
            a.ended_at_ms = Some(now_ms);
        })
    }

    /// `SetStatusCrashed`: the job's process exited unexpectedly after
    /// having been observed running.
    pub fn set_status_crashed(
        &self,
        id: JobId,
        exit_status: i32,
        error: impl Into<String>,
        now_ms: u64,
    ) -> Result<ActiveJob, JobsError> {
        self.transition(id, JobStatus::Crashed, |a| {
            a.exit_status = Some(exit_status);
            a.error = Some(error.into());
            a.ended_at_ms = Some(now_ms);
        })
    }

    /// `SetForceStop`: mark the job for a deliberate operator/controller
    /// stop. Does not itself change `status`; the backend observes the
    /// flag and reports the resulting terminal transition separately, so
    /// it is legal to set at any point before the job reaches a terminal
    /// status.
    pub fn set_force_stop(&self, id: JobId) -> Result<ActiveJob, JobsError> {
        let _guard = self.acquire();
        let mut active = self.load(id)?;
        if active.status.is_terminal() {
            return Err(JobsError::IllegalTransition { id, from: active.status, to: active.status });
        }
        active.force_stop = true;
        self.save(&active)?;
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_job_then_get_roundtrips() {
        let (store, _dir) = StateStore::open_temp().unwrap();
        let job = Job::test_default();
        let id = job.id;
        let added = store.add_job(job, "host-1", 100).unwrap();
        assert_eq!(added.status, JobStatus::Starting);
        let fetched = store.get(id).unwrap();
        assert_eq!(fetched, added);
    }

    #[test]
    fn add_job_twice_is_a_conflict() {
        let (store, _dir) = StateStore::open_temp().unwrap();
        let job = Job::test_default();
        store.add_job(job.clone(), "host-1", 0).unwrap();
        let err = store.add_job(job.clone(), "host-1", 0).unwrap_err();
        assert_eq!(err, JobsError::AlreadyExists(job.id));
    }

    #[test]
    fn legal_transition_sequence_succeeds() {
        let (store, _dir) = StateStore::open_temp().unwrap();
        let job = Job::test_default();
        let id = job.id;
        store.add_job(job, "host-1", 0).unwrap();
        let running = store.set_status_running(id, Some(42), None, 10).unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.pid, Some(42));
        let done = store.set_status_done(id, 0, 20).unwrap();
        assert_eq!(done.status, JobStatus::Done);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let (store, _dir) = StateStore::open_temp().unwrap();
        let job = Job::test_default();
        let id = job.id;
        store.add_job(job, "host-1", 0).unwrap();
        store.set_status_done(id, 0, 10).unwrap();
        let err = store.set_status_running(id, None, None, 20).unwrap_err();
        assert_eq!(err, JobsError::IllegalTransition { id, from: JobStatus::Done, to: JobStatus::Running });
    }

    #[test]
    fn get_active_excludes_terminal_jobs() {
        let (store, _dir) = StateStore::open_temp().unwrap();
        let running_job = Job::test_default();
        let running_id = running_job.id;
        let done_job = Job::test_default();
        let done_id = done_job.id;
        store.add_job(running_job, "host-1", 0).unwrap();
        store.add_job(done_job, "host-1", 0).unwrap();
        store.set_status_done(done_id, 0, 5).unwrap();

        let active_ids: Vec<_> = store.get_active().unwrap().into_iter().map(|a| a.id()).collect();
        assert!(active_ids.contains(&running_id));
        assert!(!active_ids.contains(&done_id));
    }

    #[test]
    fn force_stop_on_terminal_job_is_rejected() {
        let (store, _dir) = StateStore::open_temp().unwrap();
        let job = Job::test_default();
        let id = job.id;
        store.add_job(job, "host-1", 0).unwrap();
        store.set_status_done(id, 0, 10).unwrap();
        assert!(store.set_force_stop(id).is_err());
    }

    #[test]
    fn events_carry_monotonic_per_job_sequence() {
        let (store, _dir) = StateStore::open_temp().unwrap();
        let job = Job::test_default();
        let id = job.id;
        let mut stream = store.listen(crate::listeners::ListenTarget::Job(id));
        store.add_job(job, "host-1", 0).unwrap();
        store.set_status_running(id, None, None, 1).unwrap();

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let first = rt.block_on(stream.next()).unwrap();
        let second = rt.block_on(stream.next()).unwrap();
        match (first, second) {
            (crate::listeners::ListenerItem::Event(a), crate::listeners::ListenerItem::Event(b)) => {
                assert!(b.seq > a.seq);
            }
            other => panic!("expected two events, got {other:?}"),
        }
    }
}
