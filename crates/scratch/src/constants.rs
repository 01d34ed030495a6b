/// Memory-backed mount used for scratch files when available.
pub const MEMORY_BACKED_DIR: &str = "/dev/shm";

/// Prefix shared by every scratch file this system creates.
pub const DEFAULT_SCRATCH_PREFIX: &str = "lme";

/// Extension of scratch files. The external tool infers nothing from it, but operators do.
pub const SCRATCH_EXTENSION: &str = "pdf";

/// Attempts made to reserve a unique name before giving up.
pub(crate) const MAX_ALLOCATION_ATTEMPTS: usize = 5;
