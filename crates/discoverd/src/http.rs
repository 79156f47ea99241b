//! HTTP-backed discoverd client, talking to the registry's own API.

use async_trait::async_trait;
use flynn_core::{HostError, HostResult};
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::{DiscoverdClient, Instance};

pub struct HttpDiscoverdClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpDiscoverdClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), http: reqwest::Client::new() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl DiscoverdClient for HttpDiscoverdClient {
    async fn get_instances(&self, service: &str) -> HostResult<Vec<Instance>> {
        let resp = self
            .http
            .get(self.url(&format!("/services/{service}/instances")))
            .send()
            .await
            .map_err(|e| HostError::Transient(format!("discoverd GetInstances({service}): {e}")))?;
        if !resp.status().is_success() {
            return Err(HostError::Transient(format!(
                "discoverd GetInstances({service}) returned {}",
                resp.status()
            )));
        }
        resp.json().await.map_err(|e| HostError::Transient(format!("decoding discoverd response: {e}")))
    }

    async fn add_service_and_register(
        &self,
        service: &str,
        addr: SocketAddr,
        meta: HashMap<String, String>,
    ) -> HostResult<()> {
        let instance = Instance { addr, meta };
        let resp = self
            .http
            .put(self.url(&format!("/services/{service}/instances/{addr}")))
            .json(&instance)
            .send()
            .await
            .map_err(|e| HostError::Transient(format!("discoverd AddServiceAndRegister({service}): {e}")))?;
        if !resp.status().is_success() {
            return Err(HostError::Transient(format!(
                "discoverd AddServiceAndRegister({service}) returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn unregister(&self, service: &str, addr: SocketAddr) -> HostResult<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/services/{service}/instances/{addr}")))
            .send()
            .await
            .map_err(|e| HostError::Transient(format!("discoverd unregister({service}): {e}")))?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(HostError::Transient(format!("discoverd unregister({service}) returned {}", resp.status())));
        }
        Ok(())
    }
}
