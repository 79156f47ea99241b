//! Host agent configuration, resolved from environment variables with
//! `FLYNN_`-prefixed overrides (section 6 on-disk layout).

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host_id: String,
    pub state_dir: PathBuf,
    pub listen_addr: std::net::SocketAddr,
    pub auth_key: String,
    pub discoverd_url: String,
    pub layer_cache_dir: PathBuf,
    pub volumes_dir: PathBuf,
    pub rate_limit_per_ip: usize,
    pub rate_limit_window: Duration,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

impl Config {
    /// Resolve from `FLYNN_*` environment variables, matching conventions
    /// used for the equivalent `OJ_*` daemon settings.
    pub fn from_env() -> Self {
        let state_dir =
            env_var("FLYNN_STATE_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/var/lib/flynn-host"));
        Self {
            host_id: env_var("FLYNN_HOST_ID").unwrap_or_else(default_host_id),
            listen_addr: env_var("FLYNN_LISTEN_ADDR")
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| "127.0.0.1:1113".parse().unwrap()),
            auth_key: env_var("FLYNN_AUTH_KEY").unwrap_or_default(),
            discoverd_url: env_var("FLYNN_DISCOVERD_URL").unwrap_or_else(|| "http://127.0.0.1:1111".to_string()),
            layer_cache_dir: state_dir.join("layers"),
            volumes_dir: state_dir.join("volumes"),
            rate_limit_per_ip: env_var("FLYNN_RATE_LIMIT_PER_MIN").and_then(|s| s.parse().ok()).unwrap_or(100),
            rate_limit_window: Duration::from_secs(60),
            state_dir,
        }
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.state_dir.join("state.db")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("flynn-host.lock")
    }
}

fn default_host_id() -> String {
    format!("host-{}", nanoid::nanoid!(8))
}
