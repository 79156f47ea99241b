//! Job identifier, config, and the agent's mutable shadow of it section 3.

use crate::mountspec::MountSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Externally supplied job identifier. Clients choose the UUID (so that a
/// retried `PUT` is naturally idempotent at the transport layer even
/// though the state store treats a duplicate id as a conflict).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Capability set a job's profile opts it into, beyond the default
/// container isolation. Closed enum: the backend does not interpret
/// arbitrary strings here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Zfs,
    Kvm,
    Loop,
}

/// A port the job's entrypoint listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub port: u16,
    #[serde(default = "default_proto")]
    pub proto: String,
    /// Register this port with the service registry under this name.
    #[serde(default)]
    pub service: Option<String>,
    /// Optional health check to gate service registration on.
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
}

fn default_proto() -> String {
    "tcp".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_threshold() -> u32 {
    3
}

/// A writable volume bound into the job's root filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBinding {
    pub target: String,
    #[serde(default)]
    pub writeable: bool,
    /// Reclaim the volume's backing storage once the job reaches a
    /// terminal status.
    #[serde(default)]
    pub delete_on_stop: bool,
}

/// Per-job container configuration section 3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub mounts: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<VolumeBinding>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub host_network: bool,
    #[serde(default)]
    pub host_pid_namespace: bool,
    #[serde(default)]
    pub writable_cgroups: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub stdin: bool,
    #[serde(default)]
    pub data: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            env: HashMap::new(),
            ports: Vec::new(),
            mounts: Vec::new(),
            volumes: Vec::new(),
            working_dir: None,
            uid: None,
            gid: None,
            host_network: false,
            host_pid_namespace: false,
            writable_cgroups: false,
            capabilities: Vec::new(),
            devices: Vec::new(),
            tty: false,
            stdin: false,
            data: false,
        }
    }
}

crate::builder! {
    pub struct JobConfigBuilder => JobConfig {
        set { args: Vec<String> = Vec::new() }
        set { env: HashMap<String, String> = HashMap::new() }
        set { ports: Vec<Port> = Vec::new() }
        set { mounts: Vec<String> = Vec::new() }
        set { volumes: Vec<VolumeBinding> = Vec::new() }
        option { working_dir: String = None }
        set { uid: Option<u32> = None }
        set { gid: Option<u32> = None }
        set { host_network: bool = false }
        set { host_pid_namespace: bool = false }
        set { writable_cgroups: bool = false }
        set { capabilities: Vec<String> = Vec::new() }
        set { devices: Vec<String> = Vec::new() }
        set { tty: bool = false }
        set { stdin: bool = false }
        set { data: bool = false }
    }
}

/// Resource limits requested for the job's cgroup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub memory_bytes: Option<u64>,
    #[serde(default)]
    pub cpu_shares: Option<u32>,
    #[serde(default)]
    pub max_pids: Option<u32>,
}

/// A unit of work identified by an externally supplied UUID section 3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub mountspecs: Vec<MountSpec>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub partition: Option<String>,
    pub config: JobConfig,
    #[serde(default)]
    pub resurrect: bool,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

const SYSTEM_TYPE_KEY: &str = "flynn-controller.type";

/// Metadata key a job's admitter sets to claim one of the fixed persistent
/// singleton slots ("flannel", "discoverd") defined by the State Store
/// section 4.2, section 4.6.1). Absent for ordinary jobs.
const PERSISTENT_SLOT_KEY: &str = "flynn-controller.persistent-slot";

impl Job {
    /// Metadata marks this job as a controller-managed system app, which
    /// grants it host namespace privileges section 3 invariant).
    pub fn is_system(&self) -> bool {
        self.metadata.get(SYSTEM_TYPE_KEY).map(String::as_str) == Some("system")
    }

    /// The name of the persistent singleton slot ("flannel" or
    /// "discoverd") this job claims to provide, if any.
    pub fn persistent_slot(&self) -> Option<&str> {
        self.metadata.get(PERSISTENT_SLOT_KEY).map(String::as_str)
    }

    /// Validation run by the agent before admitting a job section 4.6, section 7.
    pub fn validate(&self) -> Result<(), String> {
        if self.mountspecs.is_empty() {
            return Err("mountspecs must not be empty".to_string());
        }
        if (self.config.host_network || self.config.host_pid_namespace) && !self.is_system() {
            return Err(format!(
                "host_network and host_pid_namespace require metadata[\"{SYSTEM_TYPE_KEY}\"] = \"system\""
            ));
        }
        Ok(())
    }
}

/// Status of an [`ActiveJob`]. Allowed transitions:
/// `Starting -> (Running | Done | Failed)`, `Running -> (Done | Crashed)`.
/// `Done`, `Crashed`, and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Running,
    Done,
    Crashed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Crashed | JobStatus::Failed)
    }

    /// Whether `self -> next` is a legal transition per section 3.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Starting, Running) | (Starting, Done) | (Starting, Failed) | (Running, Done) | (Running, Crashed)
        )
    }
}

crate::simple_display! {
    JobStatus {
        Starting => "starting",
        Running => "running",
        Done => "done",
        Crashed => "crashed",
        Failed => "failed",
    }
}

/// The agent's mutable shadow of a [`Job`] section 3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveJob {
    pub job: Job,
    pub host_id: String,
    #[serde(default)]
    pub internal_ip: Option<std::net::IpAddr>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub force_stop: bool,
    pub status: JobStatus,
    pub created_at_ms: u64,
    #[serde(default)]
    pub started_at_ms: Option<u64>,
    #[serde(default)]
    pub ended_at_ms: Option<u64>,
    #[serde(default)]
    pub exit_status: Option<i32>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ActiveJob {
    pub fn new(job: Job, host_id: impl Into<String>, created_at_ms: u64) -> Self {
        Self {
            job,
            host_id: host_id.into(),
            internal_ip: None,
            pid: None,
            force_stop: false,
            status: JobStatus::Starting,
            created_at_ms,
            started_at_ms: None,
            ended_at_ms: None,
            exit_status: None,
            error: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.job.id
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Job {
    /// Minimal valid job for tests: one mountspec, no ports, empty args.
    pub fn test_default() -> Self {
        Self {
            id: JobId::new(),
            mountspecs: vec![crate::mountspec::MountSpec {
                kind: "squashfs".into(),
                id: "layer-test".into(),
                url: "https://example.invalid/layer-test.squashfs".into(),
                size: 1,
                hashes: HashMap::new(),
                meta: HashMap::new(),
            }],
            metadata: HashMap::new(),
            resources: Resources::default(),
            partition: None,
            config: JobConfig::default(),
            resurrect: false,
            profiles: Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
