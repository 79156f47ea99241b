//! Fleet-wide layer pull (section 4.7 point 7).
//!
//! For every host currently in the registry, drive its `POST
//! /host/pull/images` SSE stream to completion before moving on. A host
//! whose stream ends early (`unexpected EOF`, a partial chunk) is retried;
//! a host that completes but reports a failed layer is not — that's a
//! real verification failure, not a transport hiccup.

use flynn_core::MountSpec;
use flynn_discoverd::DiscoverdClient;
use flynn_discoverd::Instance;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::{delay_for_attempt, BackoffConfig};

#[derive(Debug, Deserialize)]
struct ProgressEvent {
    id: String,
    status: String,
    error: Option<String>,
}

#[derive(Debug)]
pub struct HostPullOutcome {
    pub host: String,
    pub failed_layers: Vec<(String, String)>,
}

fn fleet_backoff() -> BackoffConfig {
    BackoffConfig { base_delay: Duration::from_secs(5), max_delay: Duration::from_secs(5), max_attempts: 3 }
}

/// Pull `mountspecs` onto every host returned for the `"flynn-host"`
/// service, in parallel, retrying transport failures per host.
pub async fn pull_layers_fleetwide(
    discoverd: &Arc<dyn DiscoverdClient>,
    http: &reqwest::Client,
    mountspecs: &[MountSpec],
) -> Vec<HostPullOutcome> {
    let hosts = discoverd.get_instances("flynn-host").await.unwrap_or_default();
    let mut outcomes = Vec::with_capacity(hosts.len());
    for host in hosts {
        outcomes.push(pull_to_one_host(http, &host, mountspecs).await);
    }
    outcomes
}

async fn pull_to_one_host(http: &reqwest::Client, host: &Instance, mountspecs: &[MountSpec]) -> HostPullOutcome {
    let backoff = fleet_backoff();
    let mut last_err = None;
    for attempt in 1..=backoff.max_attempts {
        match try_pull_once(http, host.addr, mountspecs).await {
            Ok(failed_layers) => return HostPullOutcome { host: host.addr.to_string(), failed_layers },
            Err(e) => {
                tracing::warn!(host = %host.addr, attempt, error = %e, "layer pull to host failed, retrying");
                last_err = Some(e);
                if attempt < backoff.max_attempts {
                    tokio::time::sleep(delay_for_attempt(&backoff, attempt)).await;
                }
            }
        }
    }
    HostPullOutcome {
        host: host.addr.to_string(),
        failed_layers: vec![("<stream>".to_string(), last_err.unwrap_or_else(|| "exhausted retries".to_string()))],
    }
}

async fn try_pull_once(
    http: &reqwest::Client,
    addr: std::net::SocketAddr,
    mountspecs: &[MountSpec],
) -> Result<Vec<(String, String)>, String> {
    let url = format!("http://{addr}/host/pull/images");
    let resp = http.post(&url).json(&serde_json::json!({ "mountspecs": mountspecs })).send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("{url} returned {}", resp.status()));
    }

    let mut failed = Vec::new();
    let mut buf = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("unexpected EOF reading pull stream: {e}"))?;
        buf.extend_from_slice(&chunk);
        while let Some(event_end) = find_event_boundary(&buf) {
            let (event, rest) = buf.split_at(event_end);
            if let Some(progress) = parse_sse_data(event) {
                if progress.status == "failed" {
                    failed.push((progress.id, progress.error.unwrap_or_else(|| "unknown error".to_string())));
                }
            }
            buf = rest.to_vec();
        }
    }
    Ok(failed)
}

fn find_event_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2)
}

fn parse_sse_data(event: &[u8]) -> Option<ProgressEvent> {
    let text = std::str::from_utf8(event).ok()?;
    let data_line = text.lines().find_map(|line| line.strip_prefix("data:"))?;
    serde_json::from_str(data_line.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sse_data_extracts_the_json_payload() {
        let event = b"event: pull\ndata: {\"id\":\"layer-a\",\"status\":\"done\",\"error\":null}\n\n";
        let progress = parse_sse_data(event).unwrap();
        assert_eq!(progress.id, "layer-a");
        assert_eq!(progress.status, "done");
    }

    #[test]
    fn find_event_boundary_locates_the_blank_line_separator() {
        let buf = b"data: a\n\ndata: b\n\n";
        let boundary = find_event_boundary(buf).unwrap();
        assert_eq!(&buf[..boundary], b"data: a\n\n");
    }

    #[test]
    fn find_event_boundary_is_none_on_a_partial_event() {
        assert!(find_event_boundary(b"data: a").is_none());
    }
}
