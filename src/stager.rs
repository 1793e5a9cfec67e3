//! Writes a compiled bundle into a local staging directory.
//!
//! The transfer layer picks files up from here and copies each one to its
//! `remote_path` inside the guest.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{CompileError, Result};
use crate::fs_abstraction::FileSystem;
use crate::generator::{Artifact, ArtifactBundle};

/// Mode applied to init scripts and other shell artifacts.
pub const EXECUTABLE_MODE: u32 = 0o755;

/// `<system temp dir>/vrouter`
pub fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("vrouter")
}

/// A staged artifact and its local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub local_path: PathBuf,
    pub remote_path: String,
}

/// Remove any stale copy, then write `artifact` under `dir`.
pub fn stage_artifact<F: FileSystem + ?Sized>(fs: &F, dir: &Path, artifact: &Artifact) -> Result<StagedFile> {
    let path = dir.join(&artifact.file_name);

    match fs.remove_file(&path) {
        Ok(()) => debug!("Removed stale {:?}", path),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove stale {:?}: {}", path, e),
    }

    fs.write(&path, artifact.content.as_bytes())
        .map_err(|e| CompileError::io(&path, e))?;

    if artifact.executable {
        fs.set_permissions_mode(&path, EXECUTABLE_MODE)
            .map_err(|e| CompileError::io(&path, e))?;
    }

    debug!("Staged {} -> {:?}", artifact.kind, path);
    Ok(StagedFile {
        local_path: path,
        remote_path: artifact.remote_path.clone(),
    })
}

/// Stage every successfully generated artifact of `bundle`.
///
/// Returns one result per artifact; failed compilations are not represented.
pub fn stage<F: FileSystem + ?Sized>(fs: &F, dir: &Path, bundle: &ArtifactBundle) -> Result<Vec<Result<StagedFile>>> {
    fs.create_dir_all(dir).map_err(|e| CompileError::io(dir, e))?;

    Ok(bundle
        .artifacts()
        .map(|artifact| stage_artifact(fs, dir, artifact))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_abstraction::{MockFileSystem, RealFileSystem};
    use crate::generator::ArtifactKind;
    use std::io;
    use tempfile::TempDir;

    fn artifact(kind: ArtifactKind, name: &str, content: &str, executable: bool) -> Artifact {
        Artifact {
            kind,
            file_name: name.to_string(),
            remote_path: format!("/etc/vrouter/{}", name),
            content: content.to_string(),
            executable,
        }
    }

    fn bundle() -> ArtifactBundle {
        ArtifactBundle {
            profile: "home".to_string(),
            entries: vec![
                (
                    ArtifactKind::Ipset,
                    Ok(artifact(ArtifactKind::Ipset, "custom.ipset", "create lan hash:net\n", false)),
                ),
                (
                    ArtifactKind::Dnsmasq,
                    Err(CompileError::Config("broken".to_string())),
                ),
                (
                    ArtifactKind::Watchdog,
                    Ok(artifact(ArtifactKind::Watchdog, "proxies-watchdog", "#!/bin/sh\n", true)),
                ),
            ],
        }
    }

    #[test]
    fn test_stage_writes_successful_artifacts() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("staging");

        let staged = stage(&RealFileSystem, &dir, &bundle()).unwrap();
        assert_eq!(staged.len(), 2);
        assert!(staged.iter().all(|r| r.is_ok()));

        assert_eq!(
            std::fs::read_to_string(dir.join("custom.ipset")).unwrap(),
            "create lan hash:net\n"
        );
        assert!(!dir.join("custom.conf").exists());

        let mode = std::fs::metadata(dir.join("proxies-watchdog"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_stage_twice_is_identical() {
        let temp = TempDir::new().unwrap();
        stage(&RealFileSystem, temp.path(), &bundle()).unwrap();
        let first = std::fs::read(temp.path().join("proxies-watchdog")).unwrap();
        stage(&RealFileSystem, temp.path(), &bundle()).unwrap();
        let second = std::fs::read(temp.path().join("proxies-watchdog")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_stale_file_is_replaced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.ipset");
        std::fs::write(&path, "old contents that are much longer than the new ones\n").unwrap();

        stage(&RealFileSystem, temp.path(), &bundle()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "create lan hash:net\n");
    }

    #[test]
    fn test_remove_error_does_not_abort() {
        let mut fs = MockFileSystem::new();
        fs.expect_create_dir_all().returning(|_| Ok(()));
        fs.expect_remove_file()
            .returning(|_| Err(io::Error::new(io::ErrorKind::PermissionDenied, "busy")));
        fs.expect_write().times(2).returning(|_, _| Ok(()));
        fs.expect_set_permissions_mode()
            .withf(|_, mode| *mode == EXECUTABLE_MODE)
            .times(1)
            .returning(|_, _| Ok(()));

        let staged = stage(&fs, Path::new("/stage"), &bundle()).unwrap();
        assert!(staged.iter().all(|r| r.is_ok()));
        assert_eq!(
            staged[0].as_ref().unwrap().local_path,
            PathBuf::from("/stage/custom.ipset")
        );
    }

    #[test]
    fn test_write_error_is_per_artifact() {
        let mut fs = MockFileSystem::new();
        fs.expect_create_dir_all().returning(|_| Ok(()));
        fs.expect_remove_file()
            .returning(|_| Err(io::Error::new(io::ErrorKind::NotFound, "missing")));
        fs.expect_write().returning(|path, _| {
            if path.ends_with("custom.ipset") {
                Err(io::Error::new(io::ErrorKind::Other, "disk full"))
            } else {
                Ok(())
            }
        });
        fs.expect_set_permissions_mode().returning(|_, _| Ok(()));

        let staged = stage(&fs, Path::new("/stage"), &bundle()).unwrap();
        assert!(matches!(staged[0], Err(CompileError::Io { .. })));
        assert!(staged[1].is_ok());
    }

    #[test]
    fn test_create_dir_failure() {
        let mut fs = MockFileSystem::new();
        fs.expect_create_dir_all()
            .returning(|_| Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")));

        assert!(stage(&fs, Path::new("/stage"), &bundle()).is_err());
    }

    #[test]
    fn test_default_staging_dir() {
        assert!(default_staging_dir().ends_with("vrouter"));
    }
}
