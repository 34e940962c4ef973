//! Error taxonomy for the file system.
//!
//! Mirrors the teacher kernel's flat `errno` namespace (`ENOENT`, `EEXIST`,
//! ...) but as a proper enum, with a [`Error::to_status`] escape hatch for
//! hosts that want the classic negative-integer API surface described in the
//! specification.

use core::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// An operation failure.
///
/// User errors (`NotFound`, `AlreadyExists`, `InvalidArgument`) leave
/// in-memory state unchanged. `OutOfSpace` triggers one GC attempt before
/// propagating. `Hardware` latches the file system unhealthy: see
/// [`crate::fs::Ffs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No such file or directory (`ENOENT`).
    NotFound,
    /// The target of a creating operation already exists (`EEXIST`).
    AlreadyExists,
    /// A path or argument was malformed (`EINVAL`).
    InvalidArgument,
    /// No free space remains on flash after a GC attempt (`EOS`).
    OutOfSpace,
    /// The in-memory hash table has no free slot (`ENOMEM`).
    OutOfMemory,
    /// On-flash data failed validation; only returned by [`crate::mount`]
    /// operations, which always try to salvage into `lost+found` first
    /// (`ECORRUPT`).
    Corrupt,
    /// The underlying flash device reported a hardware failure (`EHW`).
    Hardware,
    /// A write was attempted after a prior `Hardware` error latched the
    /// file system read-only.
    Unhealthy,
}

impl Error {
    /// Returns the classic negative-errno-style status code for this error,
    /// for hosts that consume the integer API surface described in
    /// `spec.md` §6 instead of this crate's `Result`.
    pub const fn to_status(self) -> i32 {
        -(match self {
            Error::NotFound => 1,
            Error::AlreadyExists => 2,
            Error::InvalidArgument => 3,
            Error::OutOfSpace => 4,
            Error::OutOfMemory => 5,
            Error::Corrupt => 6,
            Error::Hardware => 7,
            Error::Unhealthy => 8,
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Error::NotFound => "no such file or directory",
            Error::AlreadyExists => "file exists",
            Error::InvalidArgument => "invalid argument",
            Error::OutOfSpace => "no space left on device",
            Error::OutOfMemory => "index out of memory",
            Error::Corrupt => "on-flash structure is corrupt",
            Error::Hardware => "flash hardware failure",
            Error::Unhealthy => "file system is unhealthy after a prior hardware error",
        };
        f.write_str(s)
    }
}
