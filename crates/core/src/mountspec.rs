//! Content-addressed filesystem layer references section 3, section 4.4.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single content-addressed, read-only filesystem layer referenced by a
/// job. The Volume/Layer Store resolves these against its local cache,
/// fetching and verifying on miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Layer kind, e.g. `"squashfs"` or `"tar"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Content-addressed layer id, stable across hosts.
    pub id: String,
    /// URL the layer can be fetched from if not already cached.
    pub url: String,
    /// Exact byte length of the layer stream.
    pub size: u64,
    /// Hash-algorithm name (e.g. `"sha512"`) to hex digest.
    #[serde(default)]
    pub hashes: HashMap<String, String>,
    /// Free-form metadata carried alongside the layer.
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl MountSpec {
    /// A layer is valid iff the observed byte length matches exactly and
    /// every listed hash verifies against the supplied digests.
    pub fn matches_observed(&self, observed_len: u64, observed_hashes: &HashMap<String, String>) -> bool {
        if observed_len != self.size {
            return false;
        }
        self.hashes
            .iter()
            .all(|(alg, expected)| observed_hashes.get(alg).is_some_and(|got| got.eq_ignore_ascii_case(expected)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(size: u64, hashes: &[(&str, &str)]) -> MountSpec {
        MountSpec {
            kind: "squashfs".into(),
            id: "layer-a".into(),
            url: "https://example.invalid/layer-a.squashfs".into(),
            size,
            hashes: hashes.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            meta: HashMap::new(),
        }
    }

    #[test]
    fn matches_requires_exact_size() {
        let spec = spec(10, &[("sha512", "abc")]);
        let mut observed = HashMap::new();
        observed.insert("sha512".to_string(), "abc".to_string());
        assert!(!spec.matches_observed(9, &observed));
        assert!(spec.matches_observed(10, &observed));
    }

    #[test]
    fn matches_is_case_insensitive_on_hex() {
        let spec = spec(4, &[("sha512", "ABCD")]);
        let mut observed = HashMap::new();
        observed.insert("sha512".to_string(), "abcd".to_string());
        assert!(spec.matches_observed(4, &observed));
    }

    #[test]
    fn matches_fails_on_missing_algorithm() {
        let spec = spec(4, &[("sha512", "abcd")]);
        let observed = HashMap::new();
        assert!(!spec.matches_observed(4, &observed));
    }
}
