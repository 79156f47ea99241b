//! Download and verify a release's binaries (section 4.7 points 2-3).
//!
//! Each binary is written to a unique temp file in the destination
//! directory and atomically renamed once its SHA-512 has been checked
//! against the release's checksum manifest. A checksum mismatch deletes
//! the partial file and retries within the same backoff budget as the
//! fetch itself.

use flynn_core::{HostError, HostResult};
use sha2::{Digest, Sha512};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::backoff::{delay_for_attempt, BackoffConfig};
use crate::release::Release;

/// `sha512hex  filename` lines, as published alongside a release.
pub fn parse_checksums(manifest: &str) -> HashMap<String, String> {
    manifest
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let digest = parts.next()?;
            let filename = parts.next()?;
            Some((filename.to_string(), digest.to_lowercase()))
        })
        .collect()
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

pub struct Downloader {
    http: reqwest::Client,
    backoff: BackoffConfig,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new(), backoff: BackoffConfig::default() }
    }

    /// Fetch every binary in `release` into `dest_dir`, verifying each
    /// against the release's checksum manifest before it counts as done.
    /// Returns the on-disk path of each downloaded file, in release order.
    pub async fn download_release(&self, release: &Release, dest_dir: &Path) -> HostResult<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| HostError::Transient(format!("creating download dir {}: {e}", dest_dir.display())))?;

        let checksums = self.fetch_checksums(release).await?;
        let mut paths = Vec::with_capacity(release.binaries.len());
        for binary in &release.binaries {
            let expected = checksums
                .get(&binary.filename)
                .ok_or_else(|| HostError::Validation(format!("no checksum published for {}", binary.filename)))?;
            paths.push(self.fetch_and_verify(binary, expected, dest_dir).await?);
        }
        Ok(paths)
    }

    async fn fetch_checksums(&self, release: &Release) -> HostResult<HashMap<String, String>> {
        let mut last_err = None;
        for attempt in 1..=self.backoff.max_attempts {
            match self.try_fetch_checksums_once(&release.checksums_url).await {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "fetching release checksums failed");
                    last_err = Some(e);
                    if attempt < self.backoff.max_attempts {
                        tokio::time::sleep(delay_for_attempt(&self.backoff, attempt)).await;
                    }
                }
            }
        }
        Err(HostError::Transient(last_err.unwrap_or_else(|| "exhausted retries".to_string())))
    }

    async fn try_fetch_checksums_once(&self, url: &str) -> Result<HashMap<String, String>, String> {
        let resp = self.http.get(url).send().await.map_err(|e| e.to_string())?.error_for_status().map_err(|e| e.to_string())?;
        let body = resp.text().await.map_err(|e| e.to_string())?;
        Ok(parse_checksums(&body))
    }

    async fn fetch_and_verify(
        &self,
        binary: &crate::release::BinaryRef,
        expected_sha512: &str,
        dest_dir: &Path,
    ) -> HostResult<PathBuf> {
        let dest = dest_dir.join(&binary.filename);
        let url = binary.url.clone();
        let name = binary.filename.clone();
        let mut last_err = None;

        for attempt in 1..=self.backoff.max_attempts {
            match self.try_fetch_once(&url, &dest, expected_sha512).await {
                Ok(()) => return Ok(dest),
                Err(e) => {
                    tracing::warn!(binary = %name, attempt, error = %e, "binary download attempt failed");
                    last_err = Some(e);
                    if attempt < self.backoff.max_attempts {
                        tokio::time::sleep(delay_for_attempt(&self.backoff, attempt)).await;
                    }
                }
            }
        }
        Err(HostError::Transient(format!(
            "{name}: {}",
            last_err.unwrap_or_else(|| "exhausted retries".to_string())
        )))
    }

    async fn try_fetch_once(&self, url: &str, dest: &Path, expected_sha512: &str) -> Result<(), String> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?
            .bytes()
            .await
            .map_err(|e| e.to_string())?;

        let mut hasher = Sha512::new();
        hasher.update(&bytes);
        let digest = hex_encode(hasher.finalize());
        if !digest.eq_ignore_ascii_case(expected_sha512) {
            return Err("checksum mismatch".to_string());
        }

        let tmp = dest.with_extension("part");
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| format!("writing {}: {e}", tmp.display()))?;
        tokio::fs::rename(&tmp, dest).await.map_err(|e| format!("renaming into place: {e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_checksums_reads_sha512hex_filename_pairs() {
        let manifest = "AB12  flynn-host.gz\ncd34  flynn-updater.gz\n";
        let parsed = parse_checksums(manifest);
        assert_eq!(parsed.get("flynn-host.gz"), Some(&"ab12".to_string()));
        assert_eq!(parsed.get("flynn-updater.gz"), Some(&"cd34".to_string()));
    }

    #[test]
    fn parse_checksums_ignores_blank_lines() {
        let manifest = "\nAB12  flynn-host.gz\n\n";
        assert_eq!(parse_checksums(manifest).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn download_release_exhausts_retries_against_an_unreachable_checksum_url() {
        let dir = tempfile::tempdir().unwrap();
        let release = Release {
            version: "v20260101.0".into(),
            checksums_url: "http://127.0.0.1:1/sha512sums.txt".into(),
            binaries: vec![crate::release::BinaryRef {
                filename: "flynn-host.gz".into(),
                url: "http://127.0.0.1:1/flynn-host.gz".into(),
            }],
            images_manifest_url: "http://127.0.0.1:1/images.json.gz".into(),
        };
        // Port 1 has nothing listening in any test environment, so every
        // attempt fails immediately and the paused clock fast-forwards
        // through all five backoff delays without real wall-clock time.
        let downloader = Downloader::new();
        let err = downloader.download_release(&release, dir.path()).await.unwrap_err();
        assert!(matches!(err, HostError::Transient(_)));
    }
}
