//! Wait for the cluster to settle after the local restart before touching
//! anything fleet-wide (section 4.7 point 6).

use flynn_core::{HostError, HostResult};
use flynn_discoverd::DiscoverdClient;
use std::sync::Arc;
use std::time::Duration;

const POLL_ATTEMPTS: u32 = 30;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Poll the registry for a `status-web` instance, then require its
/// aggregate status endpoint to answer HTTP 200 before declaring the
/// cluster healthy.
pub async fn wait_cluster_healthy(discoverd: &Arc<dyn DiscoverdClient>, http: &reqwest::Client) -> HostResult<()> {
    let addr = poll_for_status_web(discoverd).await?;
    let url = format!("http://{addr}/status");
    let resp = http.get(&url).send().await.map_err(|e| HostError::Transient(format!("GET {url}: {e}")))?;
    if resp.status().as_u16() != 200 {
        return Err(HostError::Transient(format!("{url} returned {}", resp.status())));
    }
    Ok(())
}

async fn poll_for_status_web(discoverd: &Arc<dyn DiscoverdClient>) -> HostResult<std::net::SocketAddr> {
    for attempt in 1..=POLL_ATTEMPTS {
        match discoverd.get_instances("status-web").await {
            Ok(instances) if !instances.is_empty() => return Ok(instances[0].addr),
            Ok(_) => tracing::debug!(attempt, "status-web not yet registered"),
            Err(e) => tracing::warn!(attempt, error = %e, "polling status-web failed"),
        }
        if attempt < POLL_ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
    Err(HostError::Transient("status-web never appeared in the registry".into()))
}
