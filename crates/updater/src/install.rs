//! Install downloaded binaries in place (section 4.7 point 4).
//!
//! Each gzipped binary is inflated to `<destname>.tmp` in the same
//! directory as the current binary, made executable, then renamed over it
//! — atomic as long as both paths are on the same filesystem. The
//! destination's install source record is updated last, once every binary
//! has landed.

use flate2::read::GzDecoder;
use flynn_core::install_source::InstallSource;
use flynn_core::{HostError, HostResult};
use std::io::Read;
use std::path::{Path, PathBuf};

#[cfg(unix)]
fn make_executable(path: &Path) -> HostResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| HostError::Fatal(format!("chmod {}: {e}", path.display())))
}

/// Inflate the gzipped binary at `downloaded` and install it as
/// `dest_name` inside `bin_dir`, replacing whatever is there already.
/// Returns the final installed path.
pub fn install_binary(downloaded: &Path, bin_dir: &Path, dest_name: &str) -> HostResult<PathBuf> {
    let raw = std::fs::read(downloaded).map_err(|e| HostError::Fatal(format!("reading {}: {e}", downloaded.display())))?;
    let mut decoder = GzDecoder::new(raw.as_slice());
    let mut inflated = Vec::new();
    decoder.read_to_end(&mut inflated).map_err(|e| HostError::Fatal(format!("inflating {}: {e}", downloaded.display())))?;

    let dest = bin_dir.join(dest_name);
    let tmp = bin_dir.join(format!("{dest_name}.tmp"));
    std::fs::write(&tmp, &inflated).map_err(|e| HostError::Fatal(format!("writing {}: {e}", tmp.display())))?;
    make_executable(&tmp)?;
    std::fs::rename(&tmp, &dest).map_err(|e| HostError::Fatal(format!("installing {}: {e}", dest.display())))?;
    Ok(dest)
}

/// Persist the newly installed version to `install-source.json` next to
/// the binary directory, so the next coordinator run knows the current
/// version without having to ask the running agent.
pub fn write_install_source(state_dir: &Path, repository: &str, version: &str, installed_at_ms: u64) -> HostResult<()> {
    let source = InstallSource::github(repository, version, installed_at_ms);
    let path = state_dir.join("install-source.json");
    let json =
        serde_json::to_string_pretty(&source).map_err(|e| HostError::Fatal(format!("encoding install source: {e}")))?;
    std::fs::write(&path, json).map_err(|e| HostError::Fatal(format!("writing {}: {e}", path.display())))
}

/// Read the currently installed version from `install-source.json`, if one
/// exists. Absence is not an error: a never-updated install has none yet.
pub fn read_install_source(state_dir: &Path) -> HostResult<Option<InstallSource>> {
    let path = state_dir.join("install-source.json");
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let source = serde_json::from_str(&contents).map_err(|e| HostError::Fatal(format!("parsing {}: {e}", path.display())))?;
            Ok(Some(source))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(HostError::Fatal(format!("reading {}: {e}", path.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn install_binary_inflates_and_makes_executable() {
        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("flynn-host.gz");
        std::fs::write(&gz_path, gzip(b"#!/bin/sh\necho hi\n")).unwrap();

        let installed = install_binary(&gz_path, dir.path(), "flynn-host").unwrap();
        let contents = std::fs::read_to_string(&installed).unwrap();
        assert_eq!(contents, "#!/bin/sh\necho hi\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&installed).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn install_binary_replaces_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("flynn-host");
        std::fs::write(&dest, "old contents").unwrap();
        let gz_path = dir.path().join("flynn-host.gz");
        std::fs::write(&gz_path, gzip(b"new contents")).unwrap();

        install_binary(&gz_path, dir.path(), "flynn-host").unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "new contents");
    }

    #[test]
    fn install_source_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        write_install_source(dir.path(), "flynn/flynn", "v20260115.0", 42).unwrap();
        let source = read_install_source(dir.path()).unwrap().unwrap();
        assert_eq!(source.version, "v20260115.0");
        assert_eq!(source.repository, "flynn/flynn");
    }

    #[test]
    fn missing_install_source_is_none_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_install_source(dir.path()).unwrap().is_none());
    }
}
