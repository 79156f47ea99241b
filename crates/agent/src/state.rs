//! Shared application state injected into every HTTP handler.

use flynn_backend::Backend;
use flynn_core::host_status::{DiscoverdConfig, NetworkConfig};
use flynn_core::{PerIpRateLimiter, RateLimitBucket};
use flynn_discoverd::DiscoverdClient;
use flynn_store::StateStore;
use flynn_volume::{LayerStore, VolumeManager};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock source, erased behind a closure so tests can substitute a
/// fixed value without requiring `Clock` (whose `Clone` supertrait makes it
/// non-object-safe) to be boxed directly.
pub type ClockFn = Arc<dyn Fn() -> u64 + Send + Sync>;

pub fn system_clock_fn() -> ClockFn {
    Arc::new(|| SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64)
}

/// Mutable host-wide bookkeeping that does not belong to any single job:
/// tags, the singleton network/discoverd config pointers, and the one-shot
/// guards that gate real bootstrap work to once per process lifetime
/// (section 4.6.1).
pub struct HostRuntime {
    pub version: &'static str,
    pub pid: u32,
    tags: Mutex<HashMap<String, String>>,
    network: Mutex<Option<NetworkConfig>>,
    discoverd_config: Mutex<Option<DiscoverdConfig>>,
    network_configured_once: AtomicBool,
    discoverd_configured_once: AtomicBool,
    shutting_down: AtomicBool,
}

impl HostRuntime {
    fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            pid: std::process::id(),
            tags: Mutex::new(HashMap::new()),
            network: Mutex::new(None),
            discoverd_config: Mutex::new(None),
            network_configured_once: AtomicBool::new(false),
            discoverd_configured_once: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn tags(&self) -> HashMap<String, String> {
        self.tags.lock().clone()
    }

    pub fn set_tags(&self, tags: HashMap<String, String>) {
        *self.tags.lock() = tags;
    }

    pub fn network(&self) -> Option<NetworkConfig> {
        self.network.lock().clone()
    }

    pub fn discoverd_config(&self) -> Option<DiscoverdConfig> {
        self.discoverd_config.lock().clone()
    }

    /// Record `config` as current and report whether this is the first
    /// call this process lifetime, per section 4.6.1: the backend only
    /// does real bridge/registry setup once; later calls just repoint.
    pub fn apply_network_config(&self, config: NetworkConfig) -> bool {
        *self.network.lock() = Some(config);
        self.network_configured_once.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    pub fn apply_discoverd_config(&self, config: DiscoverdConfig) -> bool {
        *self.discoverd_config.lock() = Some(config);
        self.discoverd_configured_once.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub host_id: Arc<str>,
    pub store: Arc<StateStore>,
    pub backend: Arc<dyn Backend>,
    pub discoverd: Arc<dyn DiscoverdClient>,
    pub layers: Arc<LayerStore>,
    pub volumes: Arc<VolumeManager>,
    pub clock: ClockFn,
    pub auth_key: Arc<str>,
    pub admission: RateLimitBucket,
    pub per_ip_limiter: Arc<PerIpRateLimiter>,
    pub runtime: Arc<HostRuntime>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host_id: impl Into<Arc<str>>,
        store: Arc<StateStore>,
        backend: Arc<dyn Backend>,
        discoverd: Arc<dyn DiscoverdClient>,
        layers: Arc<LayerStore>,
        volumes: Arc<VolumeManager>,
        auth_key: impl Into<Arc<str>>,
        admission_capacity: usize,
        per_ip_limiter: PerIpRateLimiter,
    ) -> Self {
        Self {
            host_id: host_id.into(),
            store,
            backend,
            discoverd,
            layers,
            volumes,
            clock: system_clock_fn(),
            auth_key: auth_key.into(),
            admission: RateLimitBucket::new(admission_capacity),
            per_ip_limiter: Arc::new(per_ip_limiter),
            runtime: Arc::new(HostRuntime::new()),
        }
    }

    pub fn now_ms(&self) -> u64 {
        (self.clock)()
    }
}
