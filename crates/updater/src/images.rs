//! Fetches the per-release `images.json` artifact manifest (section 6:
//! `images.json (per release) -- manifest mapping app name -> artifact with
//! layers {id, length, hashes}`) and flattens it into the mountspec list
//! `POST /host/pull/images` expects (section 4.7 point 7).

use flate2::read::GzDecoder;
use flynn_core::{HostError, HostResult, MountSpec};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct ArtifactManifest {
    apps: HashMap<String, AppArtifact>,
}

#[derive(Debug, Deserialize)]
struct AppArtifact {
    layers: Vec<MountSpec>,
}

/// Fetch and gunzip the manifest at `url`, then flatten every app's layer
/// list into one mountspec list. Layers shared across apps (the common
/// base image) appear more than once; the agent's layer store dedupes by
/// id and treats a re-import as a no-op (section 4.4).
pub async fn fetch_mountspecs(http: &reqwest::Client, url: &str) -> HostResult<Vec<MountSpec>> {
    let resp = http.get(url).send().await.map_err(|e| HostError::Transient(format!("fetching {url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(HostError::Transient(format!("fetching {url} returned {}", resp.status())));
    }
    let gz_bytes = resp.bytes().await.map_err(|e| HostError::Transient(format!("reading {url}: {e}")))?;

    let mut json = String::new();
    GzDecoder::new(&gz_bytes[..])
        .read_to_string(&mut json)
        .map_err(|e| HostError::Validation(format!("images manifest at {url} is not valid gzip: {e}")))?;
    let manifest: ArtifactManifest =
        serde_json::from_str(&json).map_err(|e| HostError::Validation(format!("images manifest at {url} is malformed: {e}")))?;

    Ok(manifest.apps.into_values().flat_map(|app| app.layers).collect())
}
