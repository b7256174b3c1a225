//! Filesystem operations for rootless container image unpacking.
//!
//! An unprivileged user that unpacks a container image ends up owning a tree
//! whose directories may carry restrictive modes such as `0000` or `0500`.
//! Owning a directory is enough to `chmod()` it, but not enough to traverse,
//! list or modify it.  Every operation in this crate first tries the plain
//! syscall.  If that fails with a permission error, the missing `rwx` bits are
//! added to the ancestors of the target, the syscall is retried, and all
//! touched ancestors get their original mode and timestamps back before the
//! call returns.
//!
//! ```no_run
//! use std::io::Read;
//!
//! let mut contents = String::new();
//! unpriv::open("rootfs/etc/locked/config")?.read_to_string(&mut contents)?;
//! unpriv::remove_all("rootfs")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Concurrency
//!
//! Nothing here is synchronized.  The window between escalating a directory
//! and restoring it is visible to every other process running as the same
//! user, and two threads escalating overlapping subtrees will restore each
//! other's ancestors to the wrong mode.  Callers must not run overlapping
//! operations on the same subtree concurrently.

pub mod error;
pub mod metadata;
pub mod ops;
pub mod path;
pub mod remove_all;
pub mod wrap;


pub use error::{Error, ErrorClass, Result};
pub use ops::{
    chmod, chtimes, create, lchown, link, lstat, lutimes, open, read_dir, readlink, remove,
    symlink, DirEntry,
};
pub use remove_all::remove_all;
pub use wrap::wrap;
