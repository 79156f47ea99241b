//! Identifying the local node among the cluster's registered hosts
//! (section 4.7 point 6).
//!
//! A host's id (as carried in its `GET /host/status` response) is matched
//! against the local machine's hostname after normalizing both: lowercase,
//! strip `-`/`_`. If exactly one registered host is present at all, that
//! host is assumed to be the local one regardless of name match, since a
//! single-node cluster has no ambiguity to resolve.

use flynn_core::{HostError, HostResult};

fn normalize(s: &str) -> String {
    s.chars().filter(|c| *c != '-' && *c != '_').flat_map(|c| c.to_lowercase()).collect()
}

/// Resolve the local node's id out of `known_host_ids`, given the local
/// machine's hostname. Fails with a manual-remedy hint if zero or more
/// than one candidate matches and there isn't exactly one host overall.
pub fn identify_local_host<'a>(hostname: &str, known_host_ids: &'a [String]) -> HostResult<&'a str> {
    if known_host_ids.len() == 1 {
        return Ok(&known_host_ids[0]);
    }

    let normalized_hostname = normalize(hostname);
    let matches: Vec<&str> =
        known_host_ids.iter().filter(|id| normalize(id) == normalized_hostname).map(String::as_str).collect();

    match matches.as_slice() {
        [only] => Ok(only),
        [] => Err(HostError::Fatal(format!("no registered host id matches hostname {hostname:?}"))
            .with_remedy("pass --host-id explicitly to disambiguate")),
        _ => Err(HostError::Fatal(format!("hostname {hostname:?} matches more than one registered host id"))
            .with_remedy("pass --host-id explicitly to disambiguate")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_host_cluster_is_unambiguous_regardless_of_name() {
        let ids = vec!["completely-different-name".to_string()];
        assert_eq!(identify_local_host("my-host", &ids).unwrap(), "completely-different-name");
    }

    #[test]
    fn normalization_strips_dashes_underscores_and_case() {
        let ids = vec!["Host-One".to_string(), "host_two".to_string()];
        assert_eq!(identify_local_host("HOST__ONE", &ids).unwrap(), "Host-One");
    }

    #[test]
    fn no_match_is_a_fatal_error_with_a_remedy() {
        let ids = vec!["host-a".to_string(), "host-b".to_string()];
        let err = identify_local_host("host-c", &ids).unwrap_err();
        assert!(err.to_string().contains("--host-id"));
    }

    #[test]
    fn ambiguous_match_is_a_fatal_error() {
        let ids = vec!["host-a".to_string(), "host_a".to_string(), "other".to_string()];
        let err = identify_local_host("host-a", &ids).unwrap_err();
        assert!(matches!(err, HostError::Fatal(_)));
    }
}
