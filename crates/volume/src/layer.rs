//! Content-addressed layer cache. `import` is idempotent on `spec.id`:
//! concurrent or repeated imports of the same layer never re-fetch once a
//! verified copy is on disk (section 4.4, `ImportFilesystem`).

use flynn_core::mountspec::MountSpec;
use parking_lot::Mutex;
use sha2::{Digest, Sha512};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("fetching layer {id}: {source}")]
    Fetch { id: String, source: reqwest::Error },
    #[error("layer {id} failed verification: observed size/hash does not match mountspec")]
    VerificationFailed { id: String },
    #[error("io error caching layer {id}: {source}")]
    Io { id: String, source: std::io::Error },
}

/// Local directory cache of read-only layers, keyed by [`MountSpec::id`].
pub struct LayerStore {
    cache_dir: PathBuf,
    /// Ids known to be present and verified, so a repeated import is a
    /// simple path lookup rather than a re-hash of the file on disk.
    verified: Mutex<HashSet<String>>,
}

impl LayerStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self { cache_dir: cache_dir.into(), verified: Mutex::new(HashSet::new()) }
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.cache_dir.join(id)
    }

    /// `ImportFilesystem`: ensure `spec`'s layer is present and verified in
    /// the local cache, fetching it from `spec.url` on a cache miss.
    pub async fn import(&self, spec: &MountSpec) -> Result<PathBuf, LayerError> {
        let dest = self.path_for(&spec.id);
        if self.verified.lock().contains(&spec.id) && dest.exists() {
            return Ok(dest);
        }

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| LayerError::Io { id: spec.id.clone(), source: e })?;

        if !dest.exists() {
            self.fetch(spec, &dest).await?;
        }

        let (len, digest) = hash_file(&dest).await.map_err(|e| LayerError::Io { id: spec.id.clone(), source: e })?;
        let mut observed = HashMap::new();
        observed.insert("sha512".to_string(), digest);
        if !spec.matches_observed(len, &observed) {
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(LayerError::VerificationFailed { id: spec.id.clone() });
        }

        self.verified.lock().insert(spec.id.clone());
        Ok(dest)
    }

    async fn fetch(&self, spec: &MountSpec, dest: &Path) -> Result<(), LayerError> {
        let response = reqwest::get(&spec.url)
            .await
            .map_err(|e| LayerError::Fetch { id: spec.id.clone(), source: e })?
            .error_for_status()
            .map_err(|e| LayerError::Fetch { id: spec.id.clone(), source: e })?;
        let bytes = response.bytes().await.map_err(|e| LayerError::Fetch { id: spec.id.clone(), source: e })?;

        let tmp = dest.with_extension("part");
        let mut file =
            tokio::fs::File::create(&tmp).await.map_err(|e| LayerError::Io { id: spec.id.clone(), source: e })?;
        file.write_all(&bytes).await.map_err(|e| LayerError::Io { id: spec.id.clone(), source: e })?;
        file.flush().await.map_err(|e| LayerError::Io { id: spec.id.clone(), source: e })?;
        tokio::fs::rename(&tmp, dest).await.map_err(|e| LayerError::Io { id: spec.id.clone(), source: e })?;
        Ok(())
    }

    /// Whether `id` is already cached and verified.
    pub fn contains(&self, id: &str) -> bool {
        self.verified.lock().contains(id) && self.path_for(id).exists()
    }
}

async fn hash_file(path: &Path) -> std::io::Result<(u64, String)> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha512::new();
    hasher.update(&bytes);
    Ok((bytes.len() as u64, hex::encode(hasher.finalize())))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}
