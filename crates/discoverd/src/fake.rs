//! In-memory discoverd client for agent tests.

use async_trait::async_trait;
use flynn_core::HostResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::{DiscoverdClient, Instance};

#[derive(Default)]
pub struct FakeDiscoverdClient {
    services: Mutex<HashMap<String, Vec<Instance>>>,
}

impl FakeDiscoverdClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DiscoverdClient for FakeDiscoverdClient {
    async fn get_instances(&self, service: &str) -> HostResult<Vec<Instance>> {
        Ok(self.services.lock().get(service).cloned().unwrap_or_default())
    }

    async fn add_service_and_register(
        &self,
        service: &str,
        addr: SocketAddr,
        meta: HashMap<String, String>,
    ) -> HostResult<()> {
        let mut services = self.services.lock();
        let instances = services.entry(service.to_string()).or_default();
        instances.retain(|i| i.addr != addr);
        instances.push(Instance { addr, meta });
        Ok(())
    }

    async fn unregister(&self, service: &str, addr: SocketAddr) -> HostResult<()> {
        if let Some(instances) = self.services.lock().get_mut(service) {
            instances.retain(|i| i.addr != addr);
        }
        Ok(())
    }
}
