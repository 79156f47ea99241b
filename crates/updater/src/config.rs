//! Update coordinator configuration, resolved from `FLYNN_*` environment
//! variables plus command-line overrides (`--tag`, `--force`).

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Release channel base URL (or a specific tag, if `force_tag` is set).
    pub channel_url: String,
    pub repository: String,
    /// Agent state dir, shared with `flynn-host`, for `install-source.json`
    /// and the binary destination directory.
    pub state_dir: PathBuf,
    /// Local agent's own HTTP API, to call `POST /host/update`.
    pub agent_url: String,
    pub auth_key: String,
    pub discoverd_url: String,
    pub controller_url: String,
    /// A specific release tag to install instead of the channel's latest.
    pub force_tag: Option<String>,
    /// Skip the `latest > current` version check entirely.
    pub force: bool,
    /// Explicit local host id, bypassing hostname-based identification.
    pub host_id_override: Option<String>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

impl UpdaterConfig {
    pub fn from_env() -> Self {
        let state_dir =
            env_var("FLYNN_STATE_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/var/lib/flynn-host"));
        Self {
            channel_url: env_var("FLYNN_RELEASE_CHANNEL_URL")
                .unwrap_or_else(|| "https://releases.flynn.invalid/channels/stable".to_string()),
            repository: env_var("FLYNN_RELEASE_REPOSITORY").unwrap_or_else(|| "flynn/flynn".to_string()),
            agent_url: env_var("FLYNN_AGENT_URL").unwrap_or_else(|| "http://127.0.0.1:1113".to_string()),
            auth_key: env_var("FLYNN_AUTH_KEY").unwrap_or_default(),
            discoverd_url: env_var("FLYNN_DISCOVERD_URL").unwrap_or_else(|| "http://127.0.0.1:1111".to_string()),
            controller_url: env_var("FLYNN_CONTROLLER_URL").unwrap_or_else(|| "http://127.0.0.1:1115".to_string()),
            force_tag: env_var("FLYNN_UPDATE_TAG"),
            force: env_var("FLYNN_UPDATE_FORCE").is_some(),
            host_id_override: env_var("FLYNN_HOST_ID"),
            state_dir,
        }
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.state_dir.join("bin")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.state_dir.join("downloads")
    }
}
