//! Scratch area and scoped scratch paths
//!
//! [`ScratchArea`] is bound to one directory and hands out [`ScratchPath`] handles. The area
//! itself holds no mutable state; uniqueness comes from the name scheme plus an exclusive
//! create, so any number of threads and processes can share one directory without locks.
//!
//! # Naming
//!
//! `<prefix>_<purpose>_<pid>_<sequence>_<index>_<millis>.pdf`
//!
//! - `pid` separates sibling worker processes
//! - `sequence` is process-wide and strictly increasing, so concurrent requests in one
//!   process never reuse a name even within the same millisecond
//! - `index` is the caller's position (template or fragment number) and only aids debugging
//! - `millis` separates a restarted process that reused a pid from its predecessor's leftovers
//!
//! # Lifecycle
//!
//! The file is created (empty) at allocation so the name is reserved. The external tool then
//! overwrites it. Dropping the handle deletes it; [`ScratchPath::release`] does the same but
//! reports the outcome to the caller.

use crate::constants::{MAX_ALLOCATION_ATTEMPTS, SCRATCH_EXTENSION};
use crate::{ScratchError, DEFAULT_SCRATCH_PREFIX};
use chrono::Utc;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// What a scratch file is used for. Only affects its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchPurpose {
    /// Output of filling one template
    Fill,
    /// A filled fragment written back out as input to concatenation
    ConcatInput,
    /// Output of concatenation
    ConcatOutput,
}

impl ScratchPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScratchPurpose::Fill => "fill",
            ScratchPurpose::ConcatInput => "concat_in",
            ScratchPurpose::ConcatOutput => "concat_out",
        }
    }
}

/// A directory on a memory-backed mount that hands out self-cleaning scratch files.
#[derive(Debug, Clone)]
pub struct ScratchArea {
    root: PathBuf,
    prefix: String,
}

impl ScratchArea {
    /// Creates a scratch area rooted at `root` with the default prefix.
    ///
    /// # Errors
    ///
    /// Returns `ScratchError::InvalidDirectory` if `root` does not exist, is not a directory,
    /// or cannot be canonicalised.
    pub fn new(root: &Path) -> Result<Self, ScratchError> {
        Self::with_prefix(root, DEFAULT_SCRATCH_PREFIX)
    }

    /// Creates a scratch area with a custom file-name prefix.
    ///
    /// The prefix must be non-empty ASCII alphanumeric (plus `-`), so that
    /// [`Self::leftovers`] can recognise this system's files unambiguously.
    pub fn with_prefix(root: &Path, prefix: &str) -> Result<Self, ScratchError> {
        if prefix.is_empty()
            || !prefix
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(ScratchError::InvalidPrefix(prefix.to_owned()));
        }

        if !root.exists() {
            return Err(ScratchError::InvalidDirectory(format!(
                "Directory does not exist: {}",
                root.display()
            )));
        }

        if !root.is_dir() {
            return Err(ScratchError::InvalidDirectory(format!(
                "Path is not a directory: {}",
                root.display()
            )));
        }

        let root = root.canonicalize().map_err(|e| {
            ScratchError::InvalidDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self {
            root,
            prefix: prefix.to_owned(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Reserves a new, uniquely named scratch file.
    ///
    /// # Errors
    ///
    /// Returns `ScratchError::Allocation` if no unique name could be reserved after a few
    /// attempts, or `ScratchError::Io` if the mount refuses the create (for example when it
    /// is full).
    pub fn allocate(&self, purpose: ScratchPurpose, index: usize) -> Result<ScratchPath, ScratchError> {
        for _attempt in 0..MAX_ALLOCATION_ATTEMPTS {
            let candidate = self.root.join(self.file_name(purpose, index));

            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(_) => {
                    tracing::trace!(path = %candidate.display(), "scratch file allocated");
                    return Ok(ScratchPath {
                        path: candidate,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    tracing::error!(
                        path = %candidate.display(),
                        error = %e,
                        "scratch allocation failed"
                    );
                    return Err(ScratchError::Io(e));
                }
            }
        }

        Err(ScratchError::Allocation(format!(
            "no unique name in {} after {} attempts",
            self.root.display(),
            MAX_ALLOCATION_ATTEMPTS
        )))
    }

    /// Lists files in the area that carry this area's prefix.
    ///
    /// In steady state (no request in flight) this is empty. Anything listed here while the
    /// system is idle was leaked by a hung or killed invocation.
    pub fn leftovers(&self) -> Result<Vec<PathBuf>, ScratchError> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(name) = name.to_str() {
                if self.owns(name) {
                    found.push(entry.path());
                }
            }
        }
        found.sort();
        Ok(found)
    }

    /// Removes this area's files whose last modification is at least `older_than` ago.
    ///
    /// Returns the number of files removed. Files that vanish concurrently are ignored.
    pub fn sweep(&self, older_than: Duration) -> Result<usize, ScratchError> {
        let now = SystemTime::now();
        let mut removed = 0usize;

        for path in self.leftovers()? {
            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(ScratchError::Io(e)),
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < older_than {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    tracing::info!(path = %path.display(), age_secs = age.as_secs(), "swept stale scratch file");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(ScratchError::Io(e)),
            }
        }

        Ok(removed)
    }

    fn file_name(&self, purpose: ScratchPurpose, index: usize) -> String {
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}_{}_{}_{}_{}_{}.{}",
            self.prefix,
            purpose.as_str(),
            std::process::id(),
            sequence,
            index,
            Utc::now().timestamp_millis(),
            SCRATCH_EXTENSION
        )
    }

    fn owns(&self, file_name: &str) -> bool {
        file_name
            .strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with('_'))
            && file_name.ends_with(&format!(".{}", SCRATCH_EXTENSION))
    }
}

/// A reserved scratch file, deleted when the handle goes out of scope.
#[derive(Debug)]
pub struct ScratchPath {
    path: PathBuf,
    released: bool,
}

impl ScratchPath {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole file into memory.
    pub fn read(&self) -> Result<Vec<u8>, ScratchError> {
        fs::read(&self.path).map_err(|e| {
            ScratchError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read scratch file {}: {}", self.path.display(), e),
            ))
        })
    }

    /// Replaces the file content with `bytes`.
    pub fn write(&self, bytes: &[u8]) -> Result<(), ScratchError> {
        fs::write(&self.path, bytes).map_err(|e| {
            ScratchError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write scratch file {}: {}", self.path.display(), e),
            ))
        })
    }

    /// Deletes the file now and reports the outcome.
    ///
    /// A file that is already gone counts as released.
    pub fn release(mut self) -> Result<(), ScratchError> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ScratchError::Io(e)),
        }
    }
}

impl Drop for ScratchPath {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::trace!(path = %self.path.display(), "scratch file released"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                scratch_cleanup_failed = true,
                "failed to remove scratch file"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_scratch_area_new_success() {
        let temp = TempDir::new().unwrap();
        let area = ScratchArea::new(temp.path()).unwrap();

        assert!(area.root().is_dir());
        assert_eq!(area.prefix(), DEFAULT_SCRATCH_PREFIX);
    }

    #[test]
    fn test_scratch_area_root_not_exists() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("non-existent");

        let area = ScratchArea::new(&root);

        assert!(matches!(area, Err(ScratchError::InvalidDirectory(_))));
    }

    #[test]
    fn test_scratch_area_root_not_directory() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("file.txt");
        fs::write(&root, "not a directory").unwrap();

        let area = ScratchArea::new(&root);

        assert!(matches!(area, Err(ScratchError::InvalidDirectory(_))));
    }

    #[test]
    fn test_scratch_area_rejects_bad_prefix() {
        let temp = TempDir::new().unwrap();

        assert!(matches!(
            ScratchArea::with_prefix(temp.path(), ""),
            Err(ScratchError::InvalidPrefix(_))
        ));
        assert!(matches!(
            ScratchArea::with_prefix(temp.path(), "../x"),
            Err(ScratchError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn test_allocate_reserves_file_in_root() {
        let temp = TempDir::new().unwrap();
        let area = ScratchArea::new(temp.path()).unwrap();

        let scratch = area.allocate(ScratchPurpose::Fill, 3).unwrap();

        assert!(scratch.path().exists());
        assert!(scratch.path().starts_with(area.root()));
        let name = scratch.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("lme_fill_"));
        assert!(name.contains(&format!("_{}_", std::process::id())));
        assert!(name.ends_with(".pdf"));
    }

    #[test]
    fn test_drop_removes_file() {
        let temp = TempDir::new().unwrap();
        let area = ScratchArea::new(temp.path()).unwrap();

        let path = {
            let scratch = area.allocate(ScratchPurpose::ConcatOutput, 0).unwrap();
            scratch.write(b"%PDF-1.4").unwrap();
            scratch.path().to_path_buf()
        };

        assert!(!path.exists());
        assert!(area.leftovers().unwrap().is_empty());
    }

    #[test]
    fn test_release_tolerates_missing_file() {
        let temp = TempDir::new().unwrap();
        let area = ScratchArea::new(temp.path()).unwrap();

        let scratch = area.allocate(ScratchPurpose::Fill, 0).unwrap();
        fs::remove_file(scratch.path()).unwrap();

        assert!(scratch.release().is_ok());
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let area = ScratchArea::new(temp.path()).unwrap();

        let scratch = area.allocate(ScratchPurpose::ConcatInput, 1).unwrap();
        scratch.write(b"%PDF-1.7 fragment").unwrap();

        assert_eq!(scratch.read().unwrap(), b"%PDF-1.7 fragment");
    }

    #[test]
    fn test_same_index_never_collides() {
        let temp = TempDir::new().unwrap();
        let area = ScratchArea::new(temp.path()).unwrap();

        let handles: Vec<ScratchPath> = (0..50)
            .map(|_| area.allocate(ScratchPurpose::Fill, 0).unwrap())
            .collect();
        let unique: HashSet<&Path> = handles.iter().map(|h| h.path()).collect();

        assert_eq!(unique.len(), 50);
    }

    #[test]
    fn test_concurrent_allocation_never_collides() {
        let temp = TempDir::new().unwrap();
        let area = ScratchArea::new(temp.path()).unwrap();

        let names: Vec<PathBuf> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        (0..25)
                            .map(|i| {
                                let scratch = area.allocate(ScratchPurpose::Fill, i).unwrap();
                                scratch.path().to_path_buf()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|w| w.join().unwrap())
                .collect()
        });

        let unique: HashSet<&PathBuf> = names.iter().collect();
        assert_eq!(unique.len(), 8 * 25);
        assert!(area.leftovers().unwrap().is_empty());
    }

    #[test]
    fn test_leftovers_only_lists_own_files() {
        let temp = TempDir::new().unwrap();
        let area = ScratchArea::new(temp.path()).unwrap();
        fs::write(temp.path().join("other_app.pdf"), b"x").unwrap();
        fs::write(temp.path().join("lme_notes.txt"), b"x").unwrap();

        let scratch = area.allocate(ScratchPurpose::Fill, 0).unwrap();
        let leftovers = area.leftovers().unwrap();

        assert_eq!(leftovers, vec![scratch.path().to_path_buf()]);
    }

    #[test]
    fn test_sweep_removes_stale_files() {
        let temp = TempDir::new().unwrap();
        let area = ScratchArea::new(temp.path()).unwrap();
        fs::write(temp.path().join("other_app.pdf"), b"x").unwrap();

        let leaked = area.allocate(ScratchPurpose::Fill, 0).unwrap();
        let leaked_path = leaked.path().to_path_buf();
        std::mem::forget(leaked);

        assert_eq!(area.sweep(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(area.sweep(Duration::ZERO).unwrap(), 1);
        assert!(!leaked_path.exists());
        assert!(temp.path().join("other_app.pdf").exists());
    }
}
