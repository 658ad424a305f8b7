//! Harness-side access to the shared FPGA manager device and the overlay registry.
//!
//! Both resources outlive the suite and are never reset by anyone else, so every scenario starts by forcing
//! them back to a known baseline through this module.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::error::ResourceError;

/// Renders a flags word the way it is written to the device.
pub fn format_flags(value: u32) -> String {
    format!("{value:08X}")
}

/// The singleton FPGA manager device, seen through its sysfs attributes.
#[derive(Debug, Clone)]
pub struct FpgaDevice {
    dir: PathBuf,
}

impl FpgaDevice {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn attribute_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    /// Reads an attribute, trimmed of surrounding whitespace.
    pub fn read_attribute(&self, name: &str) -> Result<String, ResourceError> {
        let path = self.attribute_path(name);

        std::fs::read_to_string(&path)
            .map(|contents| contents.trim().to_owned())
            .map_err(|source| ResourceError::Read {
                attribute: name.to_owned(),
                path,
                source,
            })
    }

    /// Writes `value` to the flags attribute, bypassing fpgad.
    pub fn reset_flags(&self, value: u32) -> Result<(), ResourceError> {
        let path = self.attribute_path("flags");

        match std::fs::write(&path, format_flags(value)) {
            Ok(()) => {
                info!(value, path = %path.display(), "Flags written");
                Ok(())
            }
            Err(source) => Err(ResourceError::Write {
                attribute: "flags".to_owned(),
                path,
                source,
            }),
        }
    }
}

/// Result of a best-effort registry clear.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClearReport {
    pub removed: Vec<String>,
    /// Entries that could not be removed, in the order they were attempted.
    pub left_behind: Vec<String>,
}

impl ClearReport {
    pub fn is_clean(&self) -> bool {
        self.left_behind.is_empty()
    }
}

/// The configfs directory holding one subdirectory per applied device-tree overlay.
#[derive(Debug, Clone)]
pub struct OverlayRegistry {
    dir: PathBuf,
}

impl OverlayRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Names of the overlay entries currently present, sorted.
    pub fn entries(&self) -> Result<Vec<String>, ResourceError> {
        let read_error = |source| ResourceError::Read {
            attribute: "overlays".to_owned(),
            path: self.dir.clone(),
            source,
        };

        let mut names = Vec::new();

        for entry in std::fs::read_dir(&self.dir).map_err(read_error)? {
            let entry = entry.map_err(read_error)?;
            if entry.file_type().map_err(read_error)?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        names.sort();

        Ok(names)
    }

    /// Removes every overlay directory it can.
    ///
    /// A single failed removal is logged and skipped; it never stops the siblings from being removed. Only
    /// failing to list the registry itself is an error.
    pub fn clear(&self) -> Result<ClearReport, ResourceError> {
        info!(dir = %self.dir.display(), "Cleaning up applied overlays");

        let mut report = ClearReport::default();

        // Overlays applied later may build on earlier ones, so the last entry goes first.
        for name in self.entries()?.into_iter().rev() {
            let path = self.dir.join(&name);

            match std::fs::remove_dir(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "Removed overlay directory");
                    report.removed.push(name);
                }
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    error!(path = %path.display(), "Permission denied removing overlay; run as root");
                    report.left_behind.push(name);
                }
                Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {
                    warn!(path = %path.display(), "Overlay directory is not empty; leaving it");
                    report.left_behind.push(name);
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to remove overlay directory");
                    report.left_behind.push(name);
                }
            }
        }

        Ok(report)
    }
}
