//! Release version ordering (section 4.7 point 1): the `vYYYYMMDD.N` scheme
//! is date-ordered and compares lexicographically once the date and
//! sequence fields are split out and the sequence is compared numerically.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseVersion {
    date: u32,
    seq: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("release version {0:?} does not match the vYYYYMMDD.N scheme")]
pub struct ParseVersionError(String);

impl FromStr for ReleaseVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix('v').ok_or_else(|| ParseVersionError(s.to_string()))?;
        let (date_part, seq_part) = body.split_once('.').ok_or_else(|| ParseVersionError(s.to_string()))?;
        if date_part.len() != 8 {
            return Err(ParseVersionError(s.to_string()));
        }
        let date = date_part.parse::<u32>().map_err(|_| ParseVersionError(s.to_string()))?;
        let seq = seq_part.parse::<u32>().map_err(|_| ParseVersionError(s.to_string()))?;
        Ok(Self { date, seq })
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{:08}.{}", self.date, self.seq)
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.date.cmp(&other.date).then(self.seq.cmp(&other.seq))
    }
}

/// Whether `latest` warrants an update over `current`, per the release
/// channel's ordering. `force` always answers yes, even downgrading,
/// skipping version parsing entirely.
pub fn should_update(current: &str, latest: &str, force: bool) -> Result<bool, ParseVersionError> {
    if force {
        return Ok(true);
    }
    let current: ReleaseVersion = current.parse()?;
    let latest: ReleaseVersion = latest.parse()?;
    Ok(latest > current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_date_outranks_earlier_date_regardless_of_sequence() {
        let a: ReleaseVersion = "v20260101.9".parse().unwrap();
        let b: ReleaseVersion = "v20260102.0".parse().unwrap();
        assert!(b > a);
    }

    #[test]
    fn same_date_compares_by_sequence() {
        let a: ReleaseVersion = "v20260101.1".parse().unwrap();
        let b: ReleaseVersion = "v20260101.2".parse().unwrap();
        assert!(b > a);
    }

    #[yare::parameterized(
        equal_versions       = { "v20260101.0", "v20260101.0", false, false },
        strictly_newer_date  = { "v20260101.0", "v20260102.0", false, true },
        strictly_older_date  = { "v20260102.0", "v20260101.0", false, false },
        newer_sequence_only  = { "v20260101.0", "v20260101.1", false, true },
        force_ignores_a_downgrade = { "v20260102.0", "v20260101.0", true, true },
        force_ignores_a_tie       = { "v20260101.0", "v20260101.0", true, true },
    )]
    fn should_update_cases(current: &str, latest: &str, force: bool, expected: bool) {
        assert_eq!(should_update(current, latest, force).unwrap(), expected);
    }

    #[yare::parameterized(
        missing_v_prefix = { "2026-01-01" },
        missing_sequence = { "v2026.1" },
        short_date       = { "v202601.1" },
    )]
    fn malformed_version_is_rejected(raw: &str) {
        assert!(raw.parse::<ReleaseVersion>().is_err());
    }
}
