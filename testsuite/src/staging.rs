//! Fixture files copied into the locations fpgad searches, and removed again afterwards.

use std::io;
use std::path::PathBuf;

use filetime::FileTime;
use tracing::{error, info, warn};

use crate::error::StagingError;

/// A file to copy from `source` to `target` for the duration of a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestData {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl TestData {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Staged,
    /// Nothing was copied because the source does not exist.
    SourceMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnstageOutcome {
    Removed,
    /// The target was already gone.
    AlreadyAbsent,
}

/// Copies `data.source` to `data.target`, with permissions and timestamps.
///
/// A missing source is only logged; callers that need the file decide whether that is fatal.
pub fn stage(data: &TestData) -> Result<StageOutcome, StagingError> {
    let TestData { source, target } = data;

    let metadata = match std::fs::metadata(source) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(source = %source.display(), "Source file missing");
            return Ok(StageOutcome::SourceMissing);
        }
        Err(source_err) => {
            return Err(StagingError {
                action: "inspect",
                path: source.clone(),
                source: source_err,
            });
        }
    };

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StagingError {
            action: "create directory",
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    info!(source = %source.display(), target = %target.display(), "Copying");

    std::fs::copy(source, target).map_err(|e| StagingError {
        action: "copy to",
        path: target.clone(),
        source: e,
    })?;

    let atime = FileTime::from_last_access_time(&metadata);
    let mtime = FileTime::from_last_modification_time(&metadata);
    filetime::set_file_times(target, atime, mtime).map_err(|e| StagingError {
        action: "set timestamps on",
        path: target.clone(),
        source: e,
    })?;

    Ok(StageOutcome::Staged)
}

/// Deletes `data.target`. Calling it when nothing was staged is harmless.
pub fn unstage(data: &TestData) -> Result<UnstageOutcome, StagingError> {
    let target = &data.target;

    info!(target = %target.display(), "Deleting");

    match std::fs::remove_file(target) {
        Ok(()) => Ok(UnstageOutcome::Removed),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(target = %target.display(), "Missing file during cleanup");
            Ok(UnstageOutcome::AlreadyAbsent)
        }
        Err(e) => Err(StagingError {
            action: "remove",
            path: target.clone(),
            source: e,
        }),
    }
}

/// Staged files, unstaged in reverse order when dropped.
///
/// Cleanup failures are logged and never panic, so an assertion failure that is already unwinding is the one
/// that gets reported.
#[derive(Debug, Default)]
pub struct StagedFiles {
    files: Vec<TestData>,
}

impl StagedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages `data` and takes responsibility for unstaging it.
    ///
    /// The binding is tracked even when the source is missing, since unstaging is harmless then.
    pub fn stage(&mut self, data: TestData) -> Result<StageOutcome, StagingError> {
        let outcome = stage(&data);
        self.files.push(data);
        outcome
    }

    /// Unstages everything now instead of on drop.
    pub fn release(mut self) {
        self.unstage_all();
    }

    fn unstage_all(&mut self) {
        while let Some(data) = self.files.pop() {
            if let Err(e) = unstage(&data) {
                error!(error = %e, "Failed to clean up staged file");
            }
        }
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        self.unstage_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_creates_intermediate_directories() {
        let tempdir = tempfile::tempdir().unwrap();
        let source = tempdir.path().join("k26_starter_kits.bit.bin");
        std::fs::write(&source, b"\x00\x09\x0f\xf0").unwrap();
        let old = FileTime::from_unix_time(1_700_000_000, 0);
        filetime::set_file_mtime(&source, old).unwrap();

        let data = TestData::new(
            &source,
            tempdir.path().join("lib/firmware/xilinx/k26_starter_kits/k26-starter-kits.bit.bin"),
        );

        assert_eq!(stage(&data).unwrap(), StageOutcome::Staged);
        assert_eq!(std::fs::read(&data.target).unwrap(), b"\x00\x09\x0f\xf0");

        let staged_mtime = FileTime::from_last_modification_time(&std::fs::metadata(&data.target).unwrap());
        assert_eq!(staged_mtime, old);
    }

    #[test]
    fn missing_source_is_soft() {
        let tempdir = tempfile::tempdir().unwrap();
        let data = TestData::new(tempdir.path().join("nope.bin"), tempdir.path().join("out/nope.bin"));

        assert_eq!(stage(&data).unwrap(), StageOutcome::SourceMissing);
        assert!(!data.target.exists());
    }

    #[test]
    fn unstage_is_idempotent() {
        let tempdir = tempfile::tempdir().unwrap();
        let source = tempdir.path().join("a.dtbo");
        std::fs::write(&source, "overlay").unwrap();
        let data = TestData::new(&source, tempdir.path().join("b.dtbo"));

        stage(&data).unwrap();

        assert_eq!(unstage(&data).unwrap(), UnstageOutcome::Removed);
        assert_eq!(unstage(&data).unwrap(), UnstageOutcome::AlreadyAbsent);
        assert!(source.exists());
    }

    #[test]
    fn staged_files_are_removed_on_drop() {
        let tempdir = tempfile::tempdir().unwrap();
        let source = tempdir.path().join("a.bin");
        std::fs::write(&source, "bits").unwrap();

        let first = tempdir.path().join("firmware/a.bin");
        let second = tempdir.path().join("firmware/xilinx/a.bin");

        {
            let mut staged = StagedFiles::new();
            staged.stage(TestData::new(&source, &first)).unwrap();
            staged.stage(TestData::new(&source, &second)).unwrap();
            assert!(first.exists());
            assert!(second.exists());
        }

        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[test]
    fn release_survives_files_removed_behind_its_back() {
        let tempdir = tempfile::tempdir().unwrap();
        let source = tempdir.path().join("a.bin");
        std::fs::write(&source, "bits").unwrap();
        let target = tempdir.path().join("b.bin");

        let mut staged = StagedFiles::new();
        staged.stage(TestData::new(&source, &target)).unwrap();
        std::fs::remove_file(&target).unwrap();

        staged.release();
        assert!(!target.exists());
    }
}
