//! Recursive removal of trees with arbitrary modes.
//!
//! The walk recurses through [`remove_all`] itself, so every level gets its own
//! escalation context.  Stack depth is proportional to the depth of the tree,
//! which is bounded by what the filesystem lets anyone create; no attempt is
//! made to handle adversarially deep trees.

use std::{
    ffi::{OsStr, OsString},
    os::unix::ffi::OsStrExt,
    path::Path,
};

use log::debug;
use rustix::fs::{statat, AtFlags, Dir, FileType, Mode, OFlags, RawMode, CWD};

use crate::{
    error::{Error, ErrorClass, OpContext, Result},
    ops::{remove_entry, with_leaf_bits},
    wrap::wrap,
};

/// How many names are read from a directory before recursing into them.
const BATCH_SIZE: usize = 128;

/// Removes `path` and, if it is a directory, everything below it.
///
/// Directories that can't be listed or modified because of their mode are
/// escalated as needed.  Entries that disappear while the walk is running are
/// not an error, and neither is a `path` that doesn't exist at all, so calling
/// this twice is harmless.  When several entries fail to be removed every
/// sibling is still attempted and the first error is reported.
pub fn remove_all(path: impl AsRef<Path>) -> Result<()> {
    wrap(path, remove_tree)
}

fn remove_tree(path: &Path) -> Result<()> {
    let removal_err = match remove_entry(path) {
        Ok(()) => return Ok(()),
        Err(err) if err.is_not_exist() => return Ok(()),
        Err(err) => err,
    };

    let stat = match statat(CWD, path, AtFlags::SYMLINK_NOFOLLOW) {
        Ok(stat) => stat,
        Err(errno) if ErrorClass::from(errno).is_not_exist() => return Ok(()),
        Err(errno) => return Err(errno).op("lstat", path),
    };
    if FileType::from_raw_mode(stat.st_mode as RawMode) != FileType::Directory {
        return Err(removal_err);
    }

    let child_err = match remove_children(path) {
        Ok(child_err) => child_err,
        Err(err) if err.is_not_exist() => return Ok(()),
        Err(err) => return Err(err),
    };

    match remove_entry(path) {
        Ok(()) => Ok(()),
        Err(err) if err.is_not_exist() => Ok(()),
        Err(err) => Err(child_err.unwrap_or(err)),
    }
}

/// Empties the directory at `path`.  If it can't be listed as is, `u+rx` is
/// added to it for the duration.
///
/// An `Err` means the directory couldn't be opened at all.  Otherwise the
/// first error hit while reading or removing entries is returned in the `Ok`.
/// The directory has been closed and its metadata restored by the time this
/// returns.
fn remove_children(path: &Path) -> Result<Option<Error>> {
    let (mut dir, _frame) = with_leaf_bits(path, Mode::RUSR | Mode::XUSR, |path| {
        let fd = rustix::fs::open(
            path,
            OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .op("open", path)?;
        Dir::read_from(&fd).op("readdir", path)
    })?;

    let mut first_err = None;
    loop {
        let (names, read_err) = read_batch(&mut dir);

        for name in &names {
            if let Err(err) = remove_all(path.join(name)) {
                debug!("Failed to remove {}: {err}", path.join(name).display());
                first_err.get_or_insert(err);
            }
        }

        if let Some(errno) = read_err {
            first_err.get_or_insert(Error::Op {
                op: "readdir",
                path: path.to_path_buf(),
                source: errno.into(),
            });
            break;
        }
        if names.len() < BATCH_SIZE {
            break;
        }
    }

    Ok(first_err)
}

/// Reads up to [`BATCH_SIZE`] names, skipping `.` and `..`.  A short batch
/// means the end of the directory was reached or reading failed.
fn read_batch(dir: &mut Dir) -> (Vec<OsString>, Option<rustix::io::Errno>) {
    let mut names = Vec::with_capacity(BATCH_SIZE);
    while names.len() < BATCH_SIZE {
        match dir.next() {
            None => break,
            Some(Ok(entry)) => {
                let name = OsStr::from_bytes(entry.file_name().to_bytes());
                if name != "." && name != ".." {
                    names.push(name.to_os_string());
                }
            }
            Some(Err(errno)) => return (names, Some(errno)),
        }
    }
    (names, None)
}

#[cfg(test)]
mod test {
    use std::{
        fs::{create_dir, create_dir_all, write},
        os::unix::fs::symlink,
    };

    use rustix::{
        fs::{mkdirat, openat},
        io::Errno,
    };
    use similar_asserts::assert_eq;

    use super::*;
    use crate::test::{mode_of, set_mode, tempdir};

    #[test]
    fn test_remove_all_missing() {
        let tmp = tempdir();
        remove_all(tmp.path().join("missing")).unwrap();
        remove_all(tmp.path().join("missing/below")).unwrap();
    }

    #[test]
    fn test_remove_all_file() {
        let tmp = tempdir();
        let file = tmp.path().join("file");
        write(&file, "x").unwrap();
        remove_all(&file).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_remove_all_mixed_tree() {
        let tmp = tempdir();
        let root = tmp.path().join("root");
        create_dir_all(root.join("locked/deeper")).unwrap();
        create_dir_all(root.join("readonly")).unwrap();
        write(root.join("file"), "x").unwrap();
        write(root.join("locked/deeper/file"), "x").unwrap();
        write(root.join("readonly/file"), "x").unwrap();
        symlink("does/not/exist", root.join("broken")).unwrap();
        set_mode(&root.join("locked/deeper"), 0o000);
        set_mode(&root.join("locked"), 0o000);
        set_mode(&root.join("readonly"), 0o500);

        let before = mode_of(tmp.path());
        remove_all(&root).unwrap();
        assert!(!root.exists());
        assert_eq!(mode_of(tmp.path()), before);

        // idempotent
        remove_all(&root).unwrap();
    }

    #[test]
    fn test_remove_all_many_entries() {
        let tmp = tempdir();
        let root = tmp.path().join("many");
        create_dir(&root).unwrap();
        for i in 0..(BATCH_SIZE * 2 + 7) {
            write(root.join(format!("file{i}")), "").unwrap();
        }
        set_mode(&root, 0o000);

        remove_all(&root).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_remove_all_inside_locked_parent() {
        let tmp = tempdir();
        let parent = tmp.path().join("parent");
        create_dir_all(parent.join("victim/sub")).unwrap();
        write(parent.join("victim/sub/file"), "x").unwrap();
        write(parent.join("keep"), "x").unwrap();
        set_mode(&parent, 0o500);

        remove_all(parent.join("victim")).unwrap();
        assert_eq!(mode_of(&parent), 0o500);
        assert!(!parent.join("victim").exists());
        assert!(parent.join("keep").exists());
    }

    #[test]
    fn test_remove_all_reports_child_error_and_continues() {
        let tmp = tempdir();
        let root = tmp.path().join("root");
        create_dir_all(root.join("a")).unwrap();
        create_dir_all(root.join("deep")).unwrap();
        create_dir_all(root.join("z")).unwrap();
        write(root.join("a/file"), "").unwrap();
        write(root.join("z/file"), "").unwrap();

        // nest deeper than PATH_MAX so that the joined paths can't be resolved
        let name = "d".repeat(250);
        let mut fd = rustix::fs::open(
            root.join("deep"),
            OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .unwrap();
        for _ in 0..20 {
            mkdirat(&fd, name.as_str(), 0o755.into()).unwrap();
            fd = openat(
                &fd,
                name.as_str(),
                OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
                Mode::empty(),
            )
            .unwrap();
        }

        let err = remove_all(&root).unwrap_err();
        assert_eq!(
            err.into_source().raw_os_error(),
            Some(Errno::NAMETOOLONG.raw_os_error())
        );
        assert!(!root.join("a").exists());
        assert!(!root.join("z").exists());
        assert!(root.join("deep").exists());

        // fd-relative removal copes with the depth
        std::fs::remove_dir_all(&root).unwrap();
    }
}
