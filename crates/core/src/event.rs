//! The event envelope fanned out by the state store to HTTP listeners and
//! the webhook dispatcher.
//!
//! Modeled as a tagged variant with an exhaustive match, per REDESIGN
//! FLAGS section 9: `eventType` is a closed set, not a raw string pulled out of
//! controller/router JSON.

use crate::job::{ActiveJob, JobId, JobStatus};
use serde::{Deserialize, Serialize};

/// The closed set of job lifecycle events a listener can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Create,
    Start,
    Stop,
    Error,
    Cleanup,
}

impl JobEventKind {
    pub fn for_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Starting => JobEventKind::Create,
            JobStatus::Running => JobEventKind::Start,
            JobStatus::Done | JobStatus::Crashed => JobEventKind::Stop,
            JobStatus::Failed => JobEventKind::Error,
        }
    }
}

crate::simple_display! {
    JobEventKind {
        Create => "create",
        Start => "start",
        Stop => "stop",
        Error => "error",
        Cleanup => "cleanup",
    }
}

/// One event produced by a state store transition, as delivered to a
/// listener. `seq` is a per-job monotonically increasing sequence number
/// used to prove the §8 prefix-ordering invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job_id: JobId,
    pub seq: u64,
    pub job: ActiveJob,
}

impl JobEvent {
    pub fn new(kind: JobEventKind, seq: u64, job: ActiveJob) -> Self {
        Self { kind, job_id: job.id(), seq, job }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;

    #[test]
    fn kind_derives_from_status() {
        assert_eq!(JobEventKind::for_status(JobStatus::Starting), JobEventKind::Create);
        assert_eq!(JobEventKind::for_status(JobStatus::Running), JobEventKind::Start);
        assert_eq!(JobEventKind::for_status(JobStatus::Done), JobEventKind::Stop);
        assert_eq!(JobEventKind::for_status(JobStatus::Crashed), JobEventKind::Stop);
        assert_eq!(JobEventKind::for_status(JobStatus::Failed), JobEventKind::Error);
    }

    #[test]
    fn event_carries_job_id_from_active_job() {
        let job = Job::test_default();
        let id = job.id;
        let active = crate::job::ActiveJob::new(job, "host-1", 0);
        let event = JobEvent::new(JobEventKind::Create, 1, active);
        assert_eq!(event.job_id, id);
    }
}
