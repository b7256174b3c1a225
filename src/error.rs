//! Error types and errno classification.
//!
//! Failures reach this crate in two encodings: [`std::io::Error`] from the
//! standard library and [`rustix::io::Errno`] from direct syscalls.  Both are
//! reduced to an [`ErrorClass`] exactly once, and every retry decision in the
//! crate is made on that class rather than on raw error codes.

use std::{
    io,
    path::{Path, PathBuf},
};

use rustix::io::Errno;

/// Result type alias for operations that may return an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an OS error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// `EACCES` or `EPERM`: the mode bits (or ownership) forbid the access.
    PermissionDenied,
    /// `ENOENT`.
    NotFound,
    /// `ENOTDIR`: a path walk hit a non-directory where a directory was
    /// expected, which usually means the entry is gone or was replaced.
    NotADirectory,
    Other,
}

impl ErrorClass {
    pub fn is_permission(self) -> bool {
        self == ErrorClass::PermissionDenied
    }

    /// True for both `ENOENT` and `ENOTDIR`.
    pub fn is_not_exist(self) -> bool {
        matches!(self, ErrorClass::NotFound | ErrorClass::NotADirectory)
    }
}

impl From<Errno> for ErrorClass {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::ACCESS | Errno::PERM => ErrorClass::PermissionDenied,
            Errno::NOENT => ErrorClass::NotFound,
            Errno::NOTDIR => ErrorClass::NotADirectory,
            _ => ErrorClass::Other,
        }
    }
}

impl From<&io::Error> for ErrorClass {
    fn from(err: &io::Error) -> Self {
        if let Some(raw) = err.raw_os_error() {
            return Errno::from_raw_os_error(raw).into();
        }

        match err.kind() {
            io::ErrorKind::PermissionDenied => ErrorClass::PermissionDenied,
            io::ErrorKind::NotFound => ErrorClass::NotFound,
            io::ErrorKind::NotADirectory => ErrorClass::NotADirectory,
            _ => ErrorClass::Other,
        }
    }
}

/// Error type for all operations in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested operation itself failed.
    #[error("{op} {}: {source}", .path.display())]
    Op {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    /// An ancestor of the target could not be resolved for a reason that has
    /// nothing to do with permissions.  Escalation cannot repair this.
    #[error("cannot lstat ancestor {}: {source}", .path.display())]
    BrokenAncestor { path: PathBuf, source: io::Error },

    /// Adding mode bits to an ancestor failed.
    #[error("cannot chmod ancestor {}: {source}", .path.display())]
    Escalate { path: PathBuf, source: io::Error },
}

impl Error {
    /// Classifies the error.  Only [`Error::Op`] carries the class of the
    /// underlying failure: escalation bookkeeping errors are never retried.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Op { source, .. } => source.into(),
            Error::BrokenAncestor { .. } | Error::Escalate { .. } => ErrorClass::Other,
        }
    }

    pub fn is_permission(&self) -> bool {
        self.class().is_permission()
    }

    pub fn is_not_exist(&self) -> bool {
        self.class().is_not_exist()
    }

    /// The path the failing syscall was applied to.
    pub fn path(&self) -> &Path {
        match self {
            Error::Op { path, .. }
            | Error::BrokenAncestor { path, .. }
            | Error::Escalate { path, .. } => path,
        }
    }

    /// Discards the context and returns the underlying OS error.
    pub fn into_source(self) -> io::Error {
        match self {
            Error::Op { source, .. }
            | Error::BrokenAncestor { source, .. }
            | Error::Escalate { source, .. } => source,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Op { source, .. } => source.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Attaches the operation name and path to a raw syscall result.
pub trait OpContext<T> {
    fn op(self, op: &'static str, path: &Path) -> Result<T>;
}

impl<T, E: Into<io::Error>> OpContext<T> for std::result::Result<T, E> {
    fn op(self, op: &'static str, path: &Path) -> Result<T> {
        self.map_err(|source| Error::Op {
            op,
            path: path.to_path_buf(),
            source: source.into(),
        })
    }
}
