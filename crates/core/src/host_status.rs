//! Host-wide status exposed over `GET /host/status` section 3.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Subnet/MTU/resolver configuration pushed once per agent lifetime via
/// `POST /host/network` section 4.3, section 4.6.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub subnet: String,
    pub mtu: u32,
    #[serde(default)]
    pub resolvers: Vec<String>,
}

/// Service-registry connection parameters pushed via `POST /host/discoverd`
/// section 4.6.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverdConfig {
    pub url: String,
    #[serde(default)]
    pub instance_id: Option<String>,
}

/// Agent id, tags, pid, and pointers to the currently active singleton
/// configs. Created at agent start; mutated on config RPCs; read by
/// cluster peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    pub id: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub pid: u32,
    pub url: String,
    pub version: String,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub discoverd: Option<DiscoverdConfig>,
    #[serde(default)]
    pub network: Option<NetworkConfig>,
}
