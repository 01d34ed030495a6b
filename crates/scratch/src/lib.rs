//! LME Scratch Storage
//!
//! The external form-filling tool only speaks files: it reads a template from a path and
//! writes its output to another path. This crate satisfies that contract without touching
//! persistent storage by placing every intermediate file on a memory-backed mount
//! (normally `/dev/shm`).
//!
//! ## Guarantees
//!
//! - Every allocated path is unique across threads of one process and across sibling
//!   worker processes sharing the mount. Names combine the process id, a process-wide
//!   monotonically increasing sequence, the caller's index and a millisecond timestamp,
//!   and the file is reserved with an exclusive create.
//! - A [`ScratchPath`] removes its file when dropped, on every exit path. The mount is
//!   RAM-limited, so a leaked file is a resource-exhaustion risk rather than clutter.
//! - Removal failures are logged (with `scratch_cleanup_failed = true`) and never abort the
//!   caller.
//!
//! ## Layout
//!
//! ```text
//! /dev/shm/
//! ├── lme_fill_4312_17_0_1718000000123.pdf
//! ├── lme_concat_in_4312_18_0_1718000000150.pdf
//! └── lme_concat_out_4312_20_0_1718000000171.pdf
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use lme_scratch::{ScratchArea, ScratchPurpose};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let area = ScratchArea::new(Path::new("/dev/shm"))?;
//! let scratch = area.allocate(ScratchPurpose::Fill, 0)?;
//! // hand scratch.path() to the external tool, then:
//! let bytes = scratch.read()?;
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```

mod area;
mod constants;

pub use area::{ScratchArea, ScratchPath, ScratchPurpose};
pub use constants::{DEFAULT_SCRATCH_PREFIX, MEMORY_BACKED_DIR, SCRATCH_EXTENSION};

/// Errors that can occur during scratch operations
#[derive(Debug, thiserror::Error)]
pub enum ScratchError {
    /// Scratch directory does not exist or is not a directory
    #[error("Invalid scratch directory: {0}")]
    InvalidDirectory(String),

    /// Prefix would produce names that cannot be told apart from foreign files
    #[error("Invalid scratch prefix: {0}")]
    InvalidPrefix(String),

    /// No unique name could be reserved
    #[error("Could not allocate scratch file: {0}")]
    Allocation(String),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
