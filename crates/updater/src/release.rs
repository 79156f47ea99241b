//! Querying a release channel (section 4.7 point 1).

use flynn_core::{HostError, HostResult};
use serde::Deserialize;

/// One published release: a version tag and the binaries it ships.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub version: String,
    /// URL of the checksum manifest: lines of `sha512hex  filename`.
    pub checksums_url: String,
    pub binaries: Vec<BinaryRef>,
    /// URL of the gzipped `images.json` artifact manifest (section 6:
    /// app name -> artifact with layers `{id, length, hashes}`).
    pub images_manifest_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinaryRef {
    pub filename: String,
    pub url: String,
}

pub struct ReleaseClient {
    channel_url: String,
    http: reqwest::Client,
}

impl ReleaseClient {
    pub fn new(channel_url: impl Into<String>) -> Self {
        Self { channel_url: channel_url.into(), http: reqwest::Client::new() }
    }

    /// Fetch the latest release on the configured channel.
    pub async fn latest(&self) -> HostResult<Release> {
        self.get(&format!("{}/latest", self.channel_url.trim_end_matches('/'))).await
    }

    /// Fetch a specific tagged release, bypassing channel-latest semantics.
    pub async fn tagged(&self, tag: &str) -> HostResult<Release> {
        self.get(&format!("{}/releases/{tag}", self.channel_url.trim_end_matches('/'))).await
    }

    async fn get(&self, url: &str) -> HostResult<Release> {
        let resp = self.http.get(url).send().await.map_err(|e| HostError::Transient(format!("querying release: {e}")))?;
        if !resp.status().is_success() {
            return Err(HostError::Transient(format!("release query to {url} returned {}", resp.status())));
        }
        resp.json().await.map_err(|e| HostError::Transient(format!("decoding release manifest: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_deserializes_from_the_channel_manifest_shape() {
        let json = r#"{
            "version": "v20260115.0",
            "checksums_url": "https://releases.example/v20260115.0/sha512sums.txt",
            "binaries": [
                {"filename": "flynn-host.gz", "url": "https://releases.example/v20260115.0/flynn-host.gz"}
            ],
            "images_manifest_url": "https://releases.example/v20260115.0/images.json.gz"
        }"#;
        let release: Release = serde_json::from_str(json).unwrap();
        assert_eq!(release.version, "v20260115.0");
        assert_eq!(release.binaries.len(), 1);
        assert_eq!(release.binaries[0].filename, "flynn-host.gz");
    }
}
