//! Drop-in replacements for filesystem calls, each run through [`wrap`].
//!
//! Only ancestors are escalated by [`wrap`].  Operations that also need bits
//! on the target itself (opening for read, listing a directory) try without
//! them first, and only add them in their unit of work if the target refuses.
//! Those bits are restored before returning.  Returned file handles
//! therefore refer to paths the caller may no longer be able to resolve.

use std::{
    ffi::{OsStr, OsString},
    fmt,
    fs::File,
    os::{
        fd::AsFd,
        unix::ffi::{OsStrExt, OsStringExt},
    },
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use log::debug;
use rustix::{
    fs::{
        chmodat, chownat, linkat, readlinkat, statat, symlinkat, unlinkat, utimensat, AtFlags,
        Dir, FileType, Mode, OFlags, RawMode, Stat, Timespec, Timestamps, CWD,
    },
    io::Errno,
    process::{Gid, Uid},
};

use crate::{
    error::{ErrorClass, OpContext, Result},
    metadata::Frame,
    wrap::wrap,
};

/// An entry returned by [`read_dir`].
#[derive(Clone)]
pub struct DirEntry {
    path: PathBuf,
    name: OsString,
    stat: Stat,
}

impl DirEntry {
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    /// The directory path joined with [`DirEntry::name`].
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `lstat()` of the entry, taken while the directory was readable.
    pub fn stat(&self) -> &Stat {
        &self.stat
    }

    pub fn file_type(&self) -> FileType {
        FileType::from_raw_mode(self.stat.st_mode as RawMode)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }
}

impl fmt::Debug for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirEntry")
            .field("path", &self.path)
            .field("mode", &format_args!("{:o}", self.stat.st_mode))
            .finish_non_exhaustive()
    }
}

/// Runs `f` on `path`, and if that is refused, runs it again with `bits`
/// added to `path` itself.
///
/// The frame holding the extra bits is handed back with the result, so the
/// caller decides how long they stay.  If `path` can't be escalated (usually
/// because it isn't ours) the first error is returned, as the plain call would
/// have.
pub(crate) fn with_leaf_bits<T, F>(
    path: &Path,
    bits: Mode,
    mut f: F,
) -> Result<(T, Option<Frame>)>
where
    F: FnMut(&Path) -> Result<T>,
{
    let denied = match f(path) {
        Ok(value) => return Ok((value, None)),
        Err(err) if err.is_permission() => err,
        Err(err) => return Err(err),
    };

    let frame = match Frame::escalate(path, bits) {
        Ok(frame) => frame,
        Err(err) => {
            debug!("Cannot escalate {}: {err}", path.display());
            return Err(denied);
        }
    };
    let value = f(path)?;
    Ok((value, Some(frame)))
}

/// Opens `path` for reading.  If the file itself isn't readable, `u+r` is
/// added to it for the duration of the open.
pub fn open(path: impl AsRef<Path>) -> Result<File> {
    wrap(path, |path| {
        let (fd, _frame) = with_leaf_bits(path, Mode::RUSR, |path| {
            rustix::fs::open(path, OFlags::RDONLY | OFlags::CLOEXEC, Mode::empty())
                .op("open", path)
        })?;
        Ok(File::from(fd))
    })
}

/// Creates (or truncates) `path` and opens it for reading and writing.
///
/// The new file doesn't exist yet so it needs no bits of its own, but the
/// directory it lands in might need `u+w`.
pub fn create(path: impl AsRef<Path>) -> Result<File> {
    wrap(path, |path| {
        let fd = rustix::fs::open(
            path,
            OFlags::RDWR | OFlags::CREATE | OFlags::TRUNC | OFlags::CLOEXEC,
            0o666.into(),
        )
        .op("create", path)?;
        Ok(File::from(fd))
    })
}

/// Lists the entries of a directory (without `.` and `..`) along with their
/// `lstat()`.  If the directory can't be listed as is, `u+rx` is added to it
/// while it is read.
pub fn read_dir(path: impl AsRef<Path>) -> Result<Vec<DirEntry>> {
    wrap(path, |path| {
        with_leaf_bits(path, Mode::RUSR | Mode::XUSR, list_dir).map(|(entries, _)| entries)
    })
}

fn list_dir(path: &Path) -> Result<Vec<DirEntry>> {
    let fd = rustix::fs::open(
        path,
        OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
        Mode::empty(),
    )
    .op("open", path)?;

    let mut entries = Vec::new();
    for item in Dir::read_from(&fd).op("readdir", path)? {
        let entry = item.op("readdir", path)?;
        let name = OsStr::from_bytes(entry.file_name().to_bytes());
        if name == "." || name == ".." {
            continue;
        }

        let child = path.join(name);
        let Some(stat) = stat_entry(&fd, name, &child)? else {
            continue;
        };
        entries.push(DirEntry {
            path: child,
            name: name.to_os_string(),
            stat,
        });
    }

    Ok(entries)
}

/// `lstat()`s `name` in the directory `dirfd`, or `None` if it was removed
/// since it was listed.
fn stat_entry(dirfd: impl AsFd, name: &OsStr, child: &Path) -> Result<Option<Stat>> {
    match statat(dirfd, name, AtFlags::SYMLINK_NOFOLLOW) {
        Ok(stat) => Ok(Some(stat)),
        Err(errno) if ErrorClass::from(errno).is_not_exist() => Ok(None),
        Err(errno) => Err(errno).op("lstat", child),
    }
}

/// `lstat()`s `path`.
pub fn lstat(path: impl AsRef<Path>) -> Result<Stat> {
    wrap(path, |path| {
        statat(CWD, path, AtFlags::SYMLINK_NOFOLLOW).op("lstat", path)
    })
}

/// Reads the target of the symlink at `path`.
pub fn readlink(path: impl AsRef<Path>) -> Result<PathBuf> {
    wrap(path, |path| {
        let target = readlinkat(CWD, path, []).op("readlink", path)?;
        Ok(PathBuf::from(OsString::from_vec(target.into_bytes())))
    })
}

/// Creates a symlink at `path` pointing to `target`.  The target is stored as
/// given and is not resolved.
pub fn symlink(target: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<()> {
    let target = target.as_ref();
    wrap(path, |path| symlinkat(target, CWD, path).op("symlink", path))
}

/// Creates a hard link at `path` to the existing file `target`.
///
/// Both paths need to be resolvable at the same time, so this escalates around
/// `path` and, inside that, around `target`.  Ancestors shared by the two are
/// captured twice and restored in reverse order, so the outer snapshot (the
/// original mode) is the one that sticks.
pub fn link(target: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<()> {
    let target = target.as_ref();
    wrap(path, |path| {
        wrap(target, |target| {
            linkat(CWD, target, CWD, path, AtFlags::empty()).op("link", path)
        })
    })
}

/// Changes the mode of `path`.  Follows symlinks, as `chmod(2)` does.
pub fn chmod(path: impl AsRef<Path>, mode: Mode) -> Result<()> {
    wrap(path, |path| {
        chmodat(CWD, path, mode, AtFlags::empty()).op("chmod", path)
    })
}

/// Changes the owner of `path` without following symlinks.
///
/// Rootless callers can only "change" ownership to themselves, so this is
/// rarely useful outside of a user namespace.
pub fn lchown(path: impl AsRef<Path>, uid: Option<Uid>, gid: Option<Gid>) -> Result<()> {
    wrap(path, |path| {
        chownat(CWD, path, uid, gid, AtFlags::SYMLINK_NOFOLLOW).op("lchown", path)
    })
}

fn timespec(time: SystemTime) -> Timespec {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => Timespec {
            tv_sec: since.as_secs() as _,
            tv_nsec: since.subsec_nanos() as _,
        },
        Err(err) => {
            // tv_nsec must stay within [0, 1e9) for times before the epoch
            let before = err.duration();
            let mut tv_sec = -(before.as_secs() as i64);
            let mut tv_nsec = i64::from(before.subsec_nanos());
            if tv_nsec > 0 {
                tv_sec -= 1;
                tv_nsec = 1_000_000_000 - tv_nsec;
            }
            Timespec {
                tv_sec: tv_sec as _,
                tv_nsec: tv_nsec as _,
            }
        }
    }
}

fn set_times(path: &Path, atime: SystemTime, mtime: SystemTime, flags: AtFlags) -> Result<()> {
    let times = Timestamps {
        last_access: timespec(atime),
        last_modification: timespec(mtime),
    };
    wrap(path, |path| {
        utimensat(CWD, path, &times, flags).op("utimensat", path)
    })
}

/// Sets the access and modification times of `path`, following symlinks.
pub fn chtimes(path: impl AsRef<Path>, atime: SystemTime, mtime: SystemTime) -> Result<()> {
    set_times(path.as_ref(), atime, mtime, AtFlags::empty())
}

/// Sets the access and modification times of `path` itself, even if it is a
/// symlink.
pub fn lutimes(path: impl AsRef<Path>, atime: SystemTime, mtime: SystemTime) -> Result<()> {
    set_times(path.as_ref(), atime, mtime, AtFlags::SYMLINK_NOFOLLOW)
}

/// `unlink()`, falling back to `rmdir()`.
///
/// If both fail, the `rmdir()` error is reported unless it is `ENOTDIR`, in
/// which case the path was not a directory and the `unlink()` error is the
/// interesting one.
pub(crate) fn remove_entry(path: &Path) -> Result<()> {
    let unlink_err = match unlinkat(CWD, path, AtFlags::empty()) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    match unlinkat(CWD, path, AtFlags::REMOVEDIR) {
        Ok(()) => Ok(()),
        Err(Errno::NOTDIR) => Err(unlink_err).op("remove", path),
        Err(rmdir_err) => Err(rmdir_err).op("remove", path),
    }
}

/// Removes a file or an empty directory.  Does not recurse: see
/// [`crate::remove_all`] for that.
pub fn remove(path: impl AsRef<Path>) -> Result<()> {
    wrap(path, remove_entry)
}
