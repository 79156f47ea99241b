//! `install-source.json`: which release channel the updater should poll.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSource {
    pub source: String,
    pub repository: String,
    pub version: String,
    pub installed_at_ms: u64,
}

impl InstallSource {
    pub fn github(repository: impl Into<String>, version: impl Into<String>, installed_at_ms: u64) -> Self {
        Self { source: "github".to_string(), repository: repository.into(), version: version.into(), installed_at_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_constructor_sets_source() {
        let src = InstallSource::github("flynn/flynn", "v20260101.0", 42);
        assert_eq!(src.source, "github");
        assert_eq!(src.repository, "flynn/flynn");
        assert_eq!(src.version, "v20260101.0");
    }

    #[test]
    fn round_trips_through_json() {
        let src = InstallSource::github("flynn/flynn", "v20260101.0", 42);
        let json = serde_json::to_string(&src).unwrap();
        let back: InstallSource = serde_json::from_str(&json).unwrap();
        assert_eq!(src, back);
    }
}
