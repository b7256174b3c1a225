//! Lexical path decomposition.
//!
//! Nothing in here touches the filesystem: the escalation code needs to know
//! which ancestors a path has *before* it is allowed to look at them.

use std::{
    ffi::{OsStr, OsString},
    path::{Component, Path, PathBuf},
};

/// Lexically cleans a path.
///
/// Repeated separators and `.` components are dropped, `..` cancels the
/// preceding normal component, and `..` directly below the root is dropped.
/// An empty result becomes `.`.  Symlinks are not consulted, so `a/link/..`
/// cleans to `a` even if `link` points elsewhere.
pub fn clean(path: impl AsRef<Path>) -> PathBuf {
    let mut absolute = false;
    let mut parts: Vec<&OsStr> = Vec::new();

    for component in path.as_ref().components() {
        match component {
            Component::Prefix(_) | Component::CurDir => {}
            Component::RootDir => absolute = true,
            Component::ParentDir => match parts.last() {
                Some(last) if *last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(OsStr::new("..")),
            },
            Component::Normal(name) => parts.push(name),
        }
    }

    let mut cleaned = if absolute {
        PathBuf::from("/")
    } else {
        PathBuf::new()
    };
    cleaned.extend(parts);
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

/// Splits a path into its cleaned components, outermost first.
///
/// Absolute paths start with a `/` element, so every prefix of the returned
/// list joins back into a resolvable ancestor.
pub fn split_path(path: impl AsRef<Path>) -> Vec<OsString> {
    clean(path)
        .components()
        .map(|component| match component {
            Component::RootDir => OsString::from("/"),
            other => other.as_os_str().to_os_string(),
        })
        .collect()
}

/// Joins a (prefix of a) component list produced by [`split_path`].  The empty
/// prefix is the current directory.
pub fn join_components(parts: &[OsString]) -> PathBuf {
    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}

/// Returns the lexical parent directory of a path.
///
/// `a` has the parent `.`, and `/` is its own parent.
pub fn dir(path: impl AsRef<Path>) -> PathBuf {
    let cleaned = clean(path);
    match cleaned.parent() {
        Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
        Some(parent) => parent.to_path_buf(),
        None => cleaned,
    }
}
