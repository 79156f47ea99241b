// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flynn-core: shared data model and primitives for the host agent and
//! update coordinator.
//!
//! This crate has no I/O of its own. It defines the `Job`/`ActiveJob` model
//! section 3 of the host agent design), the host-wide error taxonomy, the event
//! envelope emitted by the state store, and the rate-limit bucket used for
//! admission control.

pub mod macros;

pub mod error;
pub mod event;
pub mod host_status;
pub mod id;
pub mod install_source;
pub mod job;
pub mod mountspec;
pub mod ratelimit;
pub mod webhook;

pub use error::{HostError, HostResult};
pub use event::{JobEvent, JobEventKind};
pub use host_status::{DiscoverdConfig, HostStatus, NetworkConfig};
pub use id::{short, IdBuf};
pub use install_source::InstallSource;
#[cfg(any(test, feature = "test-support"))]
pub use job::JobConfigBuilder;
pub use job::{ActiveJob, Job, JobConfig, JobStatus, Port, Profile, Resources, VolumeBinding};
pub use mountspec::MountSpec;
pub use ratelimit::{PerIpRateLimiter, RateLimitBucket};
pub use webhook::{WebhookConfig, WebhookCode, WebhookId, Severity};
