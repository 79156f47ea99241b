//! The update coordinator's state machine (section 4.7):
//!
//! ```text
//! IDLE -> QUERY_RELEASE -> DOWNLOAD_BINARIES -> VERIFY -> RESTART_LOCAL ->
//!        WAIT_CLUSTER_HEALTHY -> PULL_LAYERS_FLEETWIDE ->
//!        DEPLOY_SYSTEM_APPS -> DEPLOY_USER_APPS -> DONE
//! ```
//!
//! Steps through "install" are fully recoverable by retry; `RestartLocal` is
//! the only non-idempotent step, but a failed listener adoption is itself
//! caught by systemd-level supervision restarting the old binary. Every
//! step after that is idempotent — a rerun converges.

use flynn_core::{HostError, HostResult};
use flynn_discoverd::DiscoverdClient;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use crate::config::UpdaterConfig;
use crate::controller::{App, ControllerClient, Release as ControllerRelease, DEPLOY_TIMEOUT};
use crate::downloader::Downloader;
use crate::{cluster, fleet, images, install, node_id, version};

/// The shared runtime image for slugrunner-based user apps; refreshed
/// whenever its layer changes, regardless of the app's own release cadence.
const SLUGRUNNER_IMAGE_ID: &str = "flynn/slugrunner";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    QueryRelease,
    DownloadBinaries,
    Verify,
    RestartLocal,
    WaitClusterHealthy,
    PullLayersFleetwide,
    DeploySystemApps,
    DeployUserApps,
    Done,
}

/// One entry in the fixed, ordered system-app deploy list (section 4.7
/// point 8). `optional` apps may legitimately be absent from the cluster.
pub struct SystemApp {
    pub app_name: &'static str,
    pub optional: bool,
    pub min_version: Option<&'static str>,
    pub image_id: &'static str,
}

/// The coordinator's fixed deploy order. Not named in the specification's
/// source material; chosen to match the singleton slots and shared
/// services referenced elsewhere in this design (discoverd, flannel).
pub const SYSTEM_APPS: &[SystemApp] = &[
    SystemApp { app_name: "discoverd", optional: false, min_version: None, image_id: "flynn/discoverd" },
    SystemApp { app_name: "flannel", optional: false, min_version: None, image_id: "flynn/flannel" },
    SystemApp { app_name: "controller", optional: false, min_version: Some("v20250101.0"), image_id: "flynn/controller" },
    SystemApp { app_name: "router", optional: false, min_version: None, image_id: "flynn/router" },
    SystemApp { app_name: "blobstore", optional: true, min_version: None, image_id: "flynn/blobstore" },
];

#[derive(Debug, Default)]
pub struct DeploySkip {
    pub app_name: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub skipped_system_apps: Vec<DeploySkip>,
    pub deployed_system_apps: Vec<String>,
    pub refreshed_user_apps: Vec<String>,
    pub fleet_pull_failures: Vec<(String, String)>,
}

pub struct Coordinator {
    config: UpdaterConfig,
    discoverd: Arc<dyn DiscoverdClient>,
    controller: Arc<dyn ControllerClient>,
    http: reqwest::Client,
    downloader: Downloader,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(
        config: UpdaterConfig,
        discoverd: Arc<dyn DiscoverdClient>,
        controller: Arc<dyn ControllerClient>,
        cancel: CancellationToken,
    ) -> Self {
        Self { config, discoverd, controller, http: reqwest::Client::new(), downloader: Downloader::new(), cancel }
    }

    /// Drive the whole state machine to completion, logging each stage
    /// transition (section 4.7).
    pub async fn run(&self) -> HostResult<RunReport> {
        let mut stage = Stage::Idle;
        let mut report = RunReport::default();

        stage = self.advance(stage, Stage::QueryRelease);
        let release = self.query_release().await?;

        stage = self.advance(stage, Stage::DownloadBinaries);
        let downloaded = self.downloader.download_release(&release, &self.config.download_dir()).await?;
        self.check_cancelled()?;

        stage = self.advance(stage, Stage::Verify);
        // Verification happens inside the downloader itself (each binary's
        // SHA-512 is checked before the file is renamed into place); this
        // stage exists so a reader of the log can see it happened.
        tracing::info!(count = downloaded.len(), "all binaries verified");

        stage = self.advance(stage, Stage::RestartLocal);
        self.install_and_restart(&downloaded, &release.version).await?;
        self.check_cancelled()?;

        stage = self.advance(stage, Stage::WaitClusterHealthy);
        cluster::wait_cluster_healthy(&self.discoverd, &self.http).await?;

        stage = self.advance(stage, Stage::PullLayersFleetwide);
        let mountspecs = images::fetch_mountspecs(&self.http, &release.images_manifest_url).await?;
        let outcomes = fleet::pull_layers_fleetwide(&self.discoverd, &self.http, &mountspecs).await;
        for outcome in outcomes {
            report.fleet_pull_failures.extend(outcome.failed_layers.into_iter().map(|(id, err)| (format!("{}@{}", outcome.host, id), err)));
        }
        self.check_cancelled()?;

        stage = self.advance(stage, Stage::DeploySystemApps);
        self.deploy_system_apps(&mut report).await?;
        self.check_cancelled()?;

        stage = self.advance(stage, Stage::DeployUserApps);
        self.deploy_user_apps(&mut report).await?;

        self.advance(stage, Stage::Done);
        Ok(report)
    }

    fn advance(&self, from: Stage, to: Stage) -> Stage {
        tracing::info!(from = ?from, to = ?to, "update coordinator stage transition");
        to
    }

    fn check_cancelled(&self) -> HostResult<()> {
        if self.cancel.is_cancelled() {
            return Err(HostError::Transient("update coordinator run was cancelled".into()));
        }
        Ok(())
    }

    async fn query_release(&self) -> HostResult<crate::release::Release> {
        let client = crate::release::ReleaseClient::new(&self.config.channel_url);
        let release = match &self.config.force_tag {
            Some(tag) => client.tagged(tag).await?,
            None => client.latest().await?,
        };

        let current = install::read_install_source(&self.config.state_dir)?;
        if let Some(current) = current {
            let should = version::should_update(&current.version, &release.version, self.config.force)
                .map_err(|e| HostError::Validation(e.to_string()))?;
            if !should {
                return Err(HostError::Conflict(format!(
                    "already on {} (>= published {})",
                    current.version, release.version
                )));
            }
        }
        Ok(release)
    }

    async fn install_and_restart(&self, downloaded: &[std::path::PathBuf], new_version: &str) -> HostResult<()> {
        let bin_dir = self.config.bin_dir();
        tokio::fs::create_dir_all(&bin_dir)
            .await
            .map_err(|e| HostError::Fatal(format!("creating bin dir {}: {e}", bin_dir.display())))?;

        for path in downloaded {
            let dest_name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| HostError::Fatal(format!("binary {} has no usable filename", path.display())))?;
            install::install_binary(path, &bin_dir, dest_name)?;
        }

        let now_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
        install::write_install_source(&self.config.state_dir, &self.config.repository, new_version, now_ms)?;

        self.identify_local_host().await?;

        let resp = self
            .http
            .post(format!("{}/host/update", self.config.agent_url.trim_end_matches('/')))
            .header("Auth-Key", &self.config.auth_key)
            .send()
            .await
            .map_err(|e| HostError::Transient(format!("calling POST /host/update: {e}")))?;
        if !resp.status().is_success() {
            return Err(HostError::Transient(format!("POST /host/update returned {}", resp.status())));
        }
        Ok(())
    }

    async fn identify_local_host(&self) -> HostResult<String> {
        if let Some(id) = &self.config.host_id_override {
            return Ok(id.clone());
        }
        let hostname = hostname();
        let instances = self.discoverd.get_instances("flynn-host").await.unwrap_or_default();
        let known_ids: Vec<String> = instances.iter().map(|i| i.addr.to_string()).collect();
        node_id::identify_local_host(&hostname, &known_ids).map(str::to_string)
    }

    async fn deploy_system_apps(&self, report: &mut RunReport) -> HostResult<()> {
        for spec in SYSTEM_APPS {
            self.check_cancelled()?;
            match self.deploy_one_system_app(spec).await {
                Ok(Some(release_id)) => {
                    report.deployed_system_apps.push(spec.app_name.to_string());
                    tracing::info!(app = spec.app_name, release = %release_id, "deployed system app");
                }
                Ok(None) => {}
                Err(skip) => {
                    tracing::info!(app = spec.app_name, reason = %skip, "skipping system app");
                    report.skipped_system_apps.push(DeploySkip { app_name: spec.app_name.to_string(), reason: skip });
                }
            }
        }
        Ok(())
    }

    /// Returns `Ok(Some(release_id))` on a real deploy, `Err(reason)` for a
    /// logged skip that is not a failure.
    async fn deploy_one_system_app(&self, spec: &SystemApp) -> Result<Option<String>, String> {
        let apps = self.controller.list_apps().await.map_err(|e| e.to_string())?;
        let app = match apps.iter().find(|a| a.name == spec.app_name) {
            Some(app) => app,
            None if spec.optional => return Err("app optional and absent".to_string()),
            None => return Err(format!("required system app {} is missing from the controller", spec.app_name)),
        };

        let release = self
            .controller
            .get_release(&app.id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "release has no artifacts".to_string())?;

        if release.artifact_ids.is_empty() {
            return Err("release has no artifacts".to_string());
        }
        if let Some(min_version) = spec.min_version {
            if let Some(release_min) = &release.min_version {
                let ok = version::should_update(min_version, release_min, false).unwrap_or(true) || release_min == min_version;
                if !ok {
                    return Err(format!("current version predates hard minimum {min_version}"));
                }
            }
        }
        let new_artifact_id = self.controller.create_artifact(spec.image_id).await.map_err(|e| e.to_string())?;
        if release.artifact_ids.first().map(String::as_str) == Some(new_artifact_id.as_str()) {
            return Err("current image already matches new image id".to_string());
        }

        let new_release_id =
            self.controller.clone_release_with_artifact(&release, &new_artifact_id).await.map_err(|e| e.to_string())?;
        self.controller
            .deploy_app_release(&app.id, &new_release_id, DEPLOY_TIMEOUT)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Some(new_release_id))
    }

    /// Refresh every app whose current release runs the shared
    /// slugrunner/redis image, regardless of the app's own version.
    async fn deploy_user_apps(&self, report: &mut RunReport) -> HostResult<()> {
        let apps = self.controller.list_apps().await?;
        for app in apps {
            self.check_cancelled()?;
            if self.refresh_user_app_if_slugrunner(&app).await? {
                report.refreshed_user_apps.push(app.name.clone());
            }
        }
        Ok(())
    }

    async fn refresh_user_app_if_slugrunner(&self, app: &App) -> HostResult<bool> {
        let Some(release) = self.controller.get_release(&app.id).await? else {
            return Ok(false);
        };
        if release.image_id != SLUGRUNNER_IMAGE_ID {
            return Ok(false);
        }
        let new_artifact_id = self.controller.create_artifact(SLUGRUNNER_IMAGE_ID).await?;
        let new_release_id = self.controller.clone_release_with_artifact(&release, &new_artifact_id).await?;
        self.controller.deploy_app_release(&app.id, &new_release_id, DEPLOY_TIMEOUT).await?;
        Ok(true)
    }
}

fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname").unwrap_or_default().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::fake::FakeControllerClient;
    use flynn_discoverd::fake::FakeDiscoverdClient;

    fn app(id: &str, name: &str) -> App {
        App { id: id.to_string(), name: name.to_string(), release_id: None }
    }

    fn release(id: &str, image_id: &str, artifacts: &[&str]) -> ControllerRelease {
        ControllerRelease {
            id: id.to_string(),
            app_id: String::new(),
            artifact_ids: artifacts.iter().map(|s| s.to_string()).collect(),
            image_id: image_id.to_string(),
            min_version: None,
        }
    }

    fn coordinator(controller: FakeControllerClient) -> Coordinator {
        let config = UpdaterConfig {
            channel_url: "https://releases.invalid".into(),
            repository: "flynn/flynn".into(),
            state_dir: std::env::temp_dir().join("flynn-updater-test"),
            agent_url: "http://127.0.0.1:1113".into(),
            auth_key: String::new(),
            discoverd_url: "http://127.0.0.1:1111".into(),
            controller_url: "http://127.0.0.1:1115".into(),
            force_tag: None,
            force: false,
            host_id_override: Some("host-1".into()),
        };
        Coordinator::new(
            config,
            Arc::new(FakeDiscoverdClient::new()),
            Arc::new(controller),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn deploy_system_apps_skips_a_missing_optional_app() {
        let controller = FakeControllerClient { apps: vec![], ..Default::default() };
        let coord = coordinator(controller);
        let mut report = RunReport::default();
        coord.deploy_system_apps(&mut report).await.unwrap();
        assert!(report.deployed_system_apps.is_empty());
        assert!(report.skipped_system_apps.iter().any(|s| s.app_name == "blobstore" && s.reason.contains("optional")));
        assert!(report.skipped_system_apps.iter().any(|s| s.app_name == "discoverd"));
    }

    #[tokio::test]
    async fn deploy_system_apps_deploys_when_image_differs() {
        let discoverd_app = app("a1", "discoverd");
        let controller = FakeControllerClient {
            apps: vec![discoverd_app],
            releases: parking_lot::Mutex::new(
                [("a1".to_string(), release("r1", "flynn/old-discoverd", &["art-1"]))].into_iter().collect(),
            ),
            ..Default::default()
        };
        let coord = coordinator(controller);
        let mut report = RunReport::default();
        coord.deploy_system_apps(&mut report).await.unwrap();
        assert!(report.deployed_system_apps.contains(&"discoverd".to_string()));
    }

    #[tokio::test]
    async fn deploy_user_apps_only_refreshes_slugrunner_apps() {
        let web = app("w1", "web");
        let worker = app("w2", "worker");
        let controller = FakeControllerClient {
            apps: vec![web, worker],
            releases: parking_lot::Mutex::new(
                [
                    ("w1".to_string(), release("rw1", SLUGRUNNER_IMAGE_ID, &["art-a"])),
                    ("w2".to_string(), release("rw2", "flynn/custom-image", &["art-b"])),
                ]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        };
        let coord = coordinator(controller);
        let mut report = RunReport::default();
        coord.deploy_user_apps(&mut report).await.unwrap();
        assert_eq!(report.refreshed_user_apps, vec!["web".to_string()]);
    }
}
