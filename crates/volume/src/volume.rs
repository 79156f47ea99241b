//! Writable per-job volumes bound into a job's root filesystem
//! (section 3 `VolumeBinding`, section 4.4).

use flynn_core::job::{JobId, VolumeBinding};
use std::path::{Path, PathBuf};

/// Creates and reclaims the writable directories backing a job's
/// [`VolumeBinding`]s.
pub struct VolumeManager {
    root: PathBuf,
}

impl VolumeManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn job_dir(&self, id: JobId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Create the backing directory for each of a job's volume bindings,
    /// returning the host path each should be bind-mounted from.
    pub async fn prepare(&self, id: JobId, bindings: &[VolumeBinding]) -> std::io::Result<Vec<PathBuf>> {
        let job_dir = self.job_dir(id);
        let mut paths = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let path = job_dir.join(sanitize(&binding.target));
            tokio::fs::create_dir_all(&path).await?;
            paths.push(path);
        }
        Ok(paths)
    }

    /// Reclaim every volume marked `delete_on_stop` once `id` reaches a
    /// terminal status. Volumes without the flag are left in place so a
    /// `resurrect`ed job can find its data again.
    pub async fn reclaim(&self, id: JobId, bindings: &[VolumeBinding]) -> std::io::Result<()> {
        let job_dir = self.job_dir(id);
        for binding in bindings {
            if !binding.delete_on_stop {
                continue;
            }
            let path = job_dir.join(sanitize(&binding.target));
            if path.exists() {
                tokio::fs::remove_dir_all(&path).await?;
            }
        }
        if bindings.iter().all(|b| b.delete_on_stop) && job_dir.exists() {
            let _ = tokio::fs::remove_dir(&job_dir).await;
        }
        Ok(())
    }
}

fn sanitize(target: &str) -> PathBuf {
    Path::new(target.trim_start_matches('/')).components().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(target: &str, delete_on_stop: bool) -> VolumeBinding {
        VolumeBinding { target: target.to_string(), writeable: true, delete_on_stop }
    }

    #[tokio::test]
    async fn prepare_creates_one_directory_per_binding() {
        let dir = tempfile::tempdir().unwrap();
        let manager = VolumeManager::new(dir.path());
        let id = JobId::new();
        let bindings = vec![binding("/data", false), binding("/cache", true)];
        let paths = manager.prepare(id, &bindings).await.unwrap();
        assert_eq!(paths.len(), 2);
        for path in &paths {
            assert!(path.is_dir());
        }
    }

    #[tokio::test]
    async fn reclaim_only_removes_delete_on_stop_volumes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = VolumeManager::new(dir.path());
        let id = JobId::new();
        let bindings = vec![binding("/data", false), binding("/cache", true)];
        let paths = manager.prepare(id, &bindings).await.unwrap();
        manager.reclaim(id, &bindings).await.unwrap();
        assert!(paths[0].exists());
        assert!(!paths[1].exists());
    }
}
