//! A minimal client for the cluster controller API, scoped to exactly what
//! the update coordinator needs to redeploy system and user apps (section
//! 4.7 point 8). Not a general controller SDK: no app creation, scaling, or
//! route management lives here.

use async_trait::async_trait;
use flynn_core::HostResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long a single `deploy_app_release` call is allowed to run before the
/// coordinator gives up on it (section 4.7 point 8, section 5).
pub const DEPLOY_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    pub app_id: String,
    pub artifact_ids: Vec<String>,
    pub image_id: String,
    pub min_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub name: String,
    pub release_id: Option<String>,
}

#[async_trait]
pub trait ControllerClient: Send + Sync {
    async fn list_apps(&self) -> HostResult<Vec<App>>;
    async fn get_release(&self, app_id: &str) -> HostResult<Option<Release>>;
    async fn create_artifact(&self, image_id: &str) -> HostResult<String>;
    /// Clone `release`, swapping in `new_artifact_id`, and return the new
    /// release's id without deploying it yet.
    async fn clone_release_with_artifact(&self, release: &Release, new_artifact_id: &str) -> HostResult<String>;
    async fn deploy_app_release(&self, app_id: &str, release_id: &str, timeout: Duration) -> HostResult<()>;
}

pub struct HttpControllerClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpControllerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), http: reqwest::Client::new() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ControllerClient for HttpControllerClient {
    async fn list_apps(&self) -> HostResult<Vec<App>> {
        crate::http_util::get_json(&self.http, &self.url("/apps")).await
    }

    async fn get_release(&self, app_id: &str) -> HostResult<Option<Release>> {
        crate::http_util::get_json_optional(&self.http, &self.url(&format!("/apps/{app_id}/release"))).await
    }

    async fn create_artifact(&self, image_id: &str) -> HostResult<String> {
        #[derive(Serialize)]
        struct Body<'a> {
            image: &'a str,
        }
        #[derive(Deserialize)]
        struct Created {
            id: String,
        }
        let created: Created =
            crate::http_util::post_json(&self.http, &self.url("/artifacts"), &Body { image: image_id }).await?;
        Ok(created.id)
    }

    async fn clone_release_with_artifact(&self, release: &Release, new_artifact_id: &str) -> HostResult<String> {
        #[derive(Serialize)]
        struct Body<'a> {
            artifact_ids: &'a [String],
        }
        #[derive(Deserialize)]
        struct Cloned {
            id: String,
        }
        let mut artifact_ids = release.artifact_ids.clone();
        if let Some(first) = artifact_ids.first_mut() {
            *first = new_artifact_id.to_string();
        } else {
            artifact_ids.push(new_artifact_id.to_string());
        }
        let cloned: Cloned = crate::http_util::post_json(
            &self.http,
            &self.url(&format!("/releases/{}/clone", release.id)),
            &Body { artifact_ids: &artifact_ids },
        )
        .await?;
        Ok(cloned.id)
    }

    async fn deploy_app_release(&self, app_id: &str, release_id: &str, timeout: Duration) -> HostResult<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            release_id: &'a str,
        }
        let url = self.url(&format!("/apps/{app_id}/deployment"));
        crate::http_util::post_json_with_timeout(&self.http, &url, &Body { release_id }, timeout).await
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeControllerClient {
        pub apps: Vec<App>,
        pub releases: Mutex<HashMap<String, Release>>,
        pub deployed: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ControllerClient for FakeControllerClient {
        async fn list_apps(&self) -> HostResult<Vec<App>> {
            Ok(self.apps.clone())
        }

        async fn get_release(&self, app_id: &str) -> HostResult<Option<Release>> {
            Ok(self.releases.lock().get(app_id).cloned())
        }

        async fn create_artifact(&self, image_id: &str) -> HostResult<String> {
            Ok(format!("artifact-{image_id}"))
        }

        async fn clone_release_with_artifact(&self, release: &Release, new_artifact_id: &str) -> HostResult<String> {
            Ok(format!("{}-cloned-with-{new_artifact_id}", release.id))
        }

        async fn deploy_app_release(&self, app_id: &str, release_id: &str, _timeout: Duration) -> HostResult<()> {
            self.deployed.lock().push((app_id.to_string(), release_id.to_string()));
            Ok(())
        }
    }
}
