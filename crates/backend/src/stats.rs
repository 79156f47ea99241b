//! Resource usage snapshots reported by a [`crate::Backend`] (section 4.3,
//! `GetJobStats`/`GetHostStats`).

use flynn_core::job::JobId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub job_id: JobId,
    pub memory_usage_bytes: u64,
    pub cpu_usage_percent: f32,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HostStats {
    pub running_jobs: usize,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub cpu_count: usize,
}
