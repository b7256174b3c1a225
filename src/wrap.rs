//! The escalation primitive.

use std::path::Path;

use log::debug;
use rustix::fs::{statat, AtFlags, Mode, CWD};

use crate::{
    error::{Error, ErrorClass, Result},
    metadata::{Escalation, Frame, Snapshot},
    path::{dir, join_components, split_path},
};

/// Runs `work` on `path` in a context where every ancestor of `path` can be
/// resolved and modified.
///
/// `work` is called once as-is.  If that fails with anything but a permission
/// error, the result is returned unchanged.  Otherwise the outermost ancestor
/// that can still be `lstat()`ed is located, `rwx` for the owner is added to it
/// and to every directory below it down to the immediate parent of `path`, and
/// `work` is called a second time.  All escalated ancestors get their mode and
/// timestamps back, innermost first, before this function returns.
///
/// `path` itself is never touched: if `work` needs extra bits on the leaf it
/// has to add (and restore) them itself.  Since `work` may run twice it must
/// not have side effects that are unsafe to repeat.
///
/// This only helps a caller who owns the ancestors.  If an ancestor can't be
/// chmod'd at all, the original permission error is returned.
pub fn wrap<T, F>(path: impl AsRef<Path>, mut work: F) -> Result<T>
where
    F: FnMut(&Path) -> Result<T>,
{
    let path = path.as_ref();

    let denied = match work(path) {
        Err(err) if err.is_permission() => err,
        other => return other,
    };

    let Some(escalation) = escalate_ancestors(path)? else {
        return Err(denied);
    };

    let result = work(path);
    drop(escalation);
    result
}

/// Escalates the ancestors of `path`, from the outermost one that is already
/// resolvable down to the immediate parent.
///
/// Returns `None` when escalation is impossible because the ancestors aren't
/// ours to chmod.  Symlinked ancestors are never chmod'd, so a path that runs
/// through a link to an unsearchable directory can't be escalated either.
pub(crate) fn escalate_ancestors(path: &Path) -> Result<Option<Escalation>> {
    let parent = dir(path);
    let parts = split_path(&parent);
    let floor = usize::from(parent.is_absolute());

    let mut start = parts.len();
    loop {
        let current = join_components(&parts[..start]);
        match statat(CWD, current.as_path(), AtFlags::SYMLINK_NOFOLLOW) {
            Ok(_) => break,
            Err(errno) if ErrorClass::from(errno).is_permission() => {
                if start == floor {
                    return Ok(None);
                }
                start -= 1;
            }
            Err(errno) => {
                return Err(Error::BrokenAncestor {
                    path: current,
                    source: errno.into(),
                })
            }
        }
    }

    debug!(
        "Escalating {} ancestor(s) of {}",
        parts.len() + 1 - start,
        path.display()
    );

    let mut escalation = Escalation::default();
    for end in start..=parts.len() {
        let current = join_components(&parts[..end]);
        let snapshot = match Snapshot::capture(&current) {
            Ok(snapshot) => snapshot,
            // below a symlink to a directory we can't search
            Err(err) if err.is_permission() => {
                debug!("Cannot escalate {}: {err}", current.display());
                return Ok(None);
            }
            Err(err) => {
                return Err(Error::BrokenAncestor {
                    path: current,
                    source: err.into_source(),
                })
            }
        };

        match Frame::apply(current, snapshot, Mode::RWXU) {
            Ok(frame) => escalation.push(frame),
            Err(err) if err.is_permission() => {
                debug!("Cannot escalate {}: {err}", err.path().display());
                return Ok(None);
            }
            Err(err) => {
                return Err(Error::Escalate {
                    path: err.path().to_path_buf(),
                    source: err.into_source(),
                })
            }
        }
    }

    Ok(Some(escalation))
}

#[cfg(test)]
mod test {
    use std::{cell::Cell, fs::create_dir_all, path::PathBuf};

    use rustix::io::Errno;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::{
        error::OpContext,
        test::{can_bypass_file_permissions, mode_of, mtime_of, set_mode, tempdir},
    };

    #[test]
    fn test_success_runs_once() {
        let calls = Cell::new(0);
        let value = wrap("/nonexistent/path", |_| {
            calls.set(calls.get() + 1);
            Ok(42)
        })
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let calls = Cell::new(0);
        let err = wrap("/nonexistent/path", |path| {
            calls.set(calls.get() + 1);
            Err::<(), _>(Errno::IO).op("read", path)
        })
        .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Other);
        assert_eq!(err.path(), Path::new("/nonexistent/path"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_retry_with_escalated_parent() {
        let tmp = tempdir();
        let parent = tmp.path().join("parent");
        create_dir_all(&parent).unwrap();
        set_mode(&parent, 0o500);
        let mtime = mtime_of(&parent);
        let target = parent.join("leaf");

        let calls = Cell::new(0);
        let seen = wrap(&target, |path| {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                return Err::<u32, _>(Errno::ACCESS).op("open", path);
            }
            // the leaf is never touched, only its ancestors
            assert_eq!(path, target.as_path());
            Ok(mode_of(&parent))
        })
        .unwrap();

        assert_eq!(calls.get(), 2);
        assert_eq!(seen, 0o700);
        assert_eq!(mode_of(&parent), 0o500);
        assert_eq!(mtime_of(&parent), mtime);
    }

    #[test]
    fn test_persistent_permission_error_is_returned() {
        let tmp = tempdir();
        let target = tmp.path().join("leaf");

        let calls = Cell::new(0);
        let err = wrap(&target, |path| {
            calls.set(calls.get() + 1);
            Err::<(), _>(Errno::ACCESS).op("open", path)
        })
        .unwrap_err();
        assert!(err.is_permission());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_broken_ancestor() {
        let tmp = tempdir();
        let target = tmp.path().join("missing/dir/leaf");

        let calls = Cell::new(0);
        let err = wrap(&target, |path| {
            calls.set(calls.get() + 1);
            Err::<(), _>(Errno::ACCESS).op("open", path)
        })
        .unwrap_err();
        assert!(matches!(err, Error::BrokenAncestor { .. }));
        assert_eq!(err.path(), tmp.path().join("missing/dir"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_escalation_starts_at_resolvable_prefix() {
        if can_bypass_file_permissions() {
            return;
        }

        let tmp = tempdir();
        let a = tmp.path().join("a");
        let c = a.join("b/c");
        create_dir_all(&c).unwrap();
        set_mode(&a, 0o000);

        let mut escalation = escalate_ancestors(&c.join("leaf")).unwrap().unwrap();
        let expected: Vec<PathBuf> = vec![a.clone(), a.join("b"), c.clone()];
        assert_eq!(
            escalation.paths().map(Path::to_path_buf).collect::<Vec<_>>(),
            expected
        );
        assert_eq!(mode_of(&a), 0o700);

        let restored = escalation.unwind();
        assert_eq!(restored, expected.into_iter().rev().collect::<Vec<_>>());
        assert_eq!(mode_of(&a), 0o000);
    }

    #[test]
    fn test_two_blocked_ancestors() {
        if can_bypass_file_permissions() {
            return;
        }

        let tmp = tempdir();
        let a = tmp.path().join("a");
        let b = a.join("b");
        let d = b.join("c/d");
        create_dir_all(&d).unwrap();
        set_mode(&b, 0o000);
        set_mode(&a, 0o000);

        let mut escalation = escalate_ancestors(&d.join("leaf")).unwrap().unwrap();
        let paths: Vec<PathBuf> = escalation.paths().map(Path::to_path_buf).collect();
        assert_eq!(paths[..2].to_vec(), vec![a.clone(), b.clone()]);

        let restored = escalation.unwind();
        assert_eq!(restored.last(), Some(&a));
        assert_eq!(restored[restored.len() - 2], b);
        assert_eq!(mode_of(&a), 0o000);
        set_mode(&a, 0o700);
        assert_eq!(mode_of(&b), 0o000);
    }

    #[test]
    fn test_symlinked_ancestor_is_not_followed() {
        if can_bypass_file_permissions() {
            return;
        }

        let tmp = tempdir();
        let target = tmp.path().join("target");
        create_dir_all(target.join("sub")).unwrap();
        std::os::unix::fs::symlink(&target, tmp.path().join("link")).unwrap();
        set_mode(&target, 0o000);
        let leaf = tmp.path().join("link/sub/leaf");

        assert!(escalate_ancestors(&leaf).unwrap().is_none());
        assert_eq!(mode_of(&target), 0o000);

        let err = wrap(&leaf, |path| Err::<(), _>(Errno::ACCESS).op("open", path)).unwrap_err();
        assert!(err.is_permission());
        assert_eq!(err.path(), leaf.as_path());
        assert_eq!(mode_of(&target), 0o000);
    }
}
