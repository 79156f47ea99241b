use flynn_discoverd::http::HttpDiscoverdClient;
use flynn_updater::config::UpdaterConfig;
use flynn_updater::controller::HttpControllerClient;
use flynn_updater::coordinator::Coordinator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// `flynn-update-coordinator [--tag TAG] [--force] [--host-id ID]`
///
/// Overrides the channel's latest release, the version-ordering check, and
/// hostname-based local node identification respectively; everything else
/// is read from `FLYNN_*` environment variables (see `config::UpdaterConfig`).
fn parse_args(config: &mut UpdaterConfig) {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--tag" => config.force_tag = args.next(),
            "--force" => config.force = true,
            "--host-id" => config.host_id_override = args.next(),
            other => {
                eprintln!("flynn-update-coordinator: unrecognized argument {other}");
                std::process::exit(2);
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let mut config = UpdaterConfig::from_env();
    parse_args(&mut config);

    let discoverd = Arc::new(HttpDiscoverdClient::new(config.discoverd_url.clone()));
    let controller = Arc::new(HttpControllerClient::new(config.controller_url.clone()));
    let cancel = CancellationToken::new();

    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received interrupt, cancelling after the current stage completes");
            shutdown_cancel.cancel();
        }
    });

    let coordinator = Coordinator::new(config, discoverd, controller, cancel);
    match coordinator.run().await {
        Ok(report) => {
            tracing::info!(
                deployed = ?report.deployed_system_apps,
                skipped = ?report.skipped_system_apps.iter().map(|s| &s.app_name).collect::<Vec<_>>(),
                refreshed_user_apps = report.refreshed_user_apps.len(),
                fleet_pull_failures = report.fleet_pull_failures.len(),
                "update coordinator run complete"
            );
            if !report.fleet_pull_failures.is_empty() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "update coordinator run failed");
            std::process::exit(1);
        }
    }
}
