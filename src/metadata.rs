//! Metadata snapshots and scoped mode escalation.
//!
//! A [`Frame`] records the mode and timestamps of one path, adds some mode
//! bits to it, and puts everything back when it is dropped.  An
//! [`Escalation`] is a stack of frames that is always unwound innermost
//! first: a parent must never lose its search bit while a frame below it
//! still needs to be restored.

use std::path::{Path, PathBuf};

use log::{trace, warn};
use rustix::fs::{
    chmodat, statat, utimensat, AtFlags, FileType, Mode, RawMode, Timespec, Timestamps, CWD,
};

use crate::error::{OpContext, Result};

/// Mode and timestamps of a path, as seen by `lstat()`.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    mode: Mode,
    file_type: FileType,
    atime: Timespec,
    mtime: Timespec,
}

impl Snapshot {
    /// Captures the current metadata of `path` without following symlinks.
    pub fn capture(path: &Path) -> Result<Self> {
        let stat = statat(CWD, path, AtFlags::SYMLINK_NOFOLLOW).op("lstat", path)?;
        let raw_mode = stat.st_mode as RawMode;

        Ok(Self {
            mode: Mode::from_bits_truncate(raw_mode & 0o7777),
            file_type: FileType::from_raw_mode(raw_mode),
            atime: Timespec {
                tv_sec: stat.st_atime as _,
                tv_nsec: stat.st_atime_nsec as _,
            },
            mtime: Timespec {
                tv_sec: stat.st_mtime as _,
                tv_nsec: stat.st_mtime_nsec as _,
            },
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// Puts the mode back, then the timestamps.
    ///
    /// Failures are logged and otherwise ignored: the outcome of the operation
    /// that required the escalation has already been decided.
    pub fn restore(&self, path: &Path) {
        // chmod() follows symlinks and a link has no mode of its own
        if self.file_type != FileType::Symlink {
            if let Err(err) = chmodat(CWD, path, self.mode, AtFlags::empty()) {
                warn!("Failed to restore mode of {}: {err}", path.display());
            }
        }

        let times = Timestamps {
            last_access: self.atime,
            last_modification: self.mtime,
        };
        if let Err(err) = utimensat(CWD, path, &times, AtFlags::SYMLINK_NOFOLLOW) {
            warn!("Failed to restore timestamps of {}: {err}", path.display());
        }
    }
}

/// One escalated path.  Dropping the frame restores the snapshot.
#[derive(Debug)]
pub struct Frame {
    path: PathBuf,
    snapshot: Snapshot,
}

impl Frame {
    /// Snapshots `path` and adds `bits` to its mode.
    pub fn escalate(path: impl Into<PathBuf>, bits: Mode) -> Result<Self> {
        let path = path.into();
        let snapshot = Snapshot::capture(&path)?;
        Self::apply(path, snapshot, bits)
    }

    /// Adds `bits` to the mode of `path`, which was just captured as
    /// `snapshot`.  Symlinks are left alone.
    pub fn apply(path: PathBuf, snapshot: Snapshot, bits: Mode) -> Result<Self> {
        if snapshot.file_type != FileType::Symlink {
            let mode = snapshot.mode | bits;
            chmodat(CWD, &path, mode, AtFlags::empty()).op("chmod", &path)?;
            trace!(
                "Escalated {} from {:o} to {:o}",
                path.display(),
                snapshot.mode.bits(),
                mode.bits()
            );
        }

        Ok(Self { path, snapshot })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.snapshot.restore(&self.path);
    }
}

/// A stack of frames, restored in reverse order of acquisition.
#[derive(Debug, Default)]
pub struct Escalation {
    frames: Vec<Frame>,
}

impl Escalation {
    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The escalated paths, outermost first.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.frames.iter().map(Frame::path)
    }

    /// Restores every frame, innermost first, and returns the restored paths
    /// in the order they were restored.
    pub fn unwind(&mut self) -> Vec<PathBuf> {
        let mut restored = Vec::with_capacity(self.frames.len());
        while let Some(frame) = self.frames.pop() {
            restored.push(frame.path.clone());
            drop(frame);
        }
        restored
    }
}

impl Drop for Escalation {
    fn drop(&mut self) {
        // Vec drops front to back, which is the wrong way around
        self.unwind();
    }
}
