#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flynn-discoverd: client for the cluster service registry (section 4.5).
//!
//! A running job whose config declares a named port registers itself here
//! once its health check (if any) passes; the host agent also consults it
//! to resolve the persistent singleton slots' current holders across a
//! restart.
//!
//! `StreamManagedCertificates` is not implemented: TLS certificate
//! provisioning is out of scope for this host agent (see DESIGN.md).

pub mod fake;
pub mod http;

use async_trait::async_trait;
use flynn_core::HostResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub addr: SocketAddr,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

/// A client for the service registry.
#[async_trait]
pub trait DiscoverdClient: Send + Sync {
    /// `GetInstances`: every instance currently registered under `service`.
    async fn get_instances(&self, service: &str) -> HostResult<Vec<Instance>>;

    /// `AddServiceAndRegister`: idempotently create `service` if it does
    /// not exist, then register this instance under it.
    async fn add_service_and_register(
        &self,
        service: &str,
        addr: SocketAddr,
        meta: HashMap<String, String>,
    ) -> HostResult<()>;

    /// Deregister a previously registered instance.
    async fn unregister(&self, service: &str, addr: SocketAddr) -> HostResult<()>;
}

/// A bound view of one service, as returned by `NewService(name)` in the
/// original client API: `.addrs()` and `.instances()` both resolve against
/// the client at call time rather than caching a stale snapshot.
#[derive(Clone)]
pub struct ServiceHandle {
    client: Arc<dyn DiscoverdClient>,
    name: String,
}

impl ServiceHandle {
    pub fn new(client: Arc<dyn DiscoverdClient>, name: impl Into<String>) -> Self {
        Self { client, name: name.into() }
    }

    pub async fn instances(&self) -> HostResult<Vec<Instance>> {
        self.client.get_instances(&self.name).await
    }

    pub async fn addrs(&self) -> HostResult<Vec<SocketAddr>> {
        Ok(self.instances().await?.into_iter().map(|i| i.addr).collect())
    }
}

/// `NewService`: bind a handle to `name` against `client`.
pub fn new_service(client: Arc<dyn DiscoverdClient>, name: impl Into<String>) -> ServiceHandle {
    ServiceHandle::new(client, name)
}
