//! Staging of kilosort outputs
//!
//! Each probe's kilosort4 folder is copied into a per-mode workspace before
//! analysis, so the engine never writes next to the original sort.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use walkdir::WalkDir;

use crate::config::ProbeId;
use crate::error::{QcError, Result};

/// Name of the staged copy for one probe.
pub fn staged_dir_name(probe: ProbeId) -> String {
    format!("kilosort4_{}", probe)
}

/// Copy each requested probe's source directory into `destination_root`.
///
/// Existing destinations are replaced only when `overwrite` is set; they are
/// never merged into. The first error stops staging.
pub fn stage(
    sources: &BTreeMap<ProbeId, PathBuf>,
    destination_root: &Path,
    probes: &[ProbeId],
    overwrite: bool,
) -> Result<BTreeMap<ProbeId, PathBuf>> {
    fs::create_dir_all(destination_root).map_err(|e| QcError::StagingCopy {
        from: destination_root.to_path_buf(),
        to: destination_root.to_path_buf(),
        source: e,
    })?;

    let mut staged = BTreeMap::new();
    for &probe in probes {
        let source = sources
            .get(&probe)
            .filter(|dir| dir.is_dir())
            .ok_or_else(|| QcError::MissingSource {
                probe: probe.to_string(),
                path: sources.get(&probe).cloned().unwrap_or_default(),
            })?;

        let destination = destination_root.join(staged_dir_name(probe));
        if destination.exists() {
            if !overwrite {
                return Err(QcError::DestinationExists { path: destination });
            }
            info!("Removing previous staging at {}", destination.display());
            remove_path(&destination)?;
        }

        info!(
            "Staging probe {}: {} -> {}",
            probe,
            source.display(),
            destination.display()
        );
        if let Err(e) = copy_tree(source, &destination) {
            if destination.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&destination) {
                    warn!(
                        "Could not remove partial staging at {}: {}",
                        destination.display(),
                        cleanup
                    );
                }
            }
            return Err(e);
        }
        staged.insert(probe, destination);
    }
    Ok(staged)
}

fn remove_path(path: &Path) -> Result<()> {
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|e| QcError::StagingCopy {
        from: path.to_path_buf(),
        to: path.to_path_buf(),
        source: e,
    })
}

/// Recursive copy; symlinks are followed.
fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.map_err(|e| QcError::StagingCopy {
            from: e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf()),
            to: destination.to_path_buf(),
            source: e.into(),
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = destination.join(relative);

        let copied = if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
        } else {
            fs::copy(entry.path(), &target).map(|_| ())
        };
        copied.map_err(|e| QcError::StagingCopy {
            from: entry.path().to_path_buf(),
            to: target.clone(),
            source: e,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sorted_probe(root: &Path, probe: ProbeId) -> PathBuf {
        let dir = root.join(format!("probe{}", probe)).join("kilosort4");
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("spike_times.npy"), b"times").unwrap();
        fs::write(dir.join("sub").join("params.py"), b"n_channels_dat = 384").unwrap();
        dir
    }

    #[test]
    fn test_stage_copies_tree() {
        let temp = TempDir::new().unwrap();
        let sources = BTreeMap::from([
            (ProbeId::A, sorted_probe(temp.path(), ProbeId::A)),
            (ProbeId::B, sorted_probe(temp.path(), ProbeId::B)),
        ]);
        let dest = temp.path().join("staged");

        let staged = stage(&sources, &dest, &[ProbeId::A, ProbeId::B], false).unwrap();

        assert_eq!(staged.len(), 2);
        assert_eq!(staged[&ProbeId::A], dest.join("kilosort4_A"));
        assert_eq!(
            fs::read(dest.join("kilosort4_B").join("sub").join("params.py")).unwrap(),
            b"n_channels_dat = 384"
        );
    }

    #[test]
    fn test_existing_destination_needs_overwrite() {
        let temp = TempDir::new().unwrap();
        let sources = BTreeMap::from([(ProbeId::C, sorted_probe(temp.path(), ProbeId::C))]);
        let dest = temp.path().join("staged");
        let stale = dest.join("kilosort4_C");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("stale.txt"), b"old").unwrap();

        let err = stage(&sources, &dest, &[ProbeId::C], false).unwrap_err();
        assert_eq!(err.error_code(), "DESTINATION_EXISTS");
        assert!(stale.join("stale.txt").exists());

        stage(&sources, &dest, &[ProbeId::C], true).unwrap();
        assert!(!stale.join("stale.txt").exists());
        assert!(stale.join("spike_times.npy").exists());
    }

    #[test]
    fn test_missing_source() {
        let temp = TempDir::new().unwrap();
        let sources = BTreeMap::from([(ProbeId::D, temp.path().join("nowhere"))]);

        let err = stage(&sources, &temp.path().join("staged"), &[ProbeId::D], false).unwrap_err();
        assert_eq!(err.error_code(), "MISSING_SOURCE");

        let err = stage(&sources, &temp.path().join("staged"), &[ProbeId::E], false).unwrap_err();
        assert!(matches!(err, QcError::MissingSource { ref probe, .. } if probe == "E"));
        assert!(!err.is_recoverable());
    }
}
