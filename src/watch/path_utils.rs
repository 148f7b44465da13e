// src/watch/path_utils.rs

//! Utility functions for matching event paths against watched roots.

use std::path::{Path, PathBuf};

/// Whether root comparison ignores case on this platform.
pub const CASE_INSENSITIVE_FS: bool = cfg!(any(target_os = "macos", target_os = "windows"));

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// If `path` lies strictly inside `root`, return the remainder of `path`
/// after the root prefix (still starting with the separator).
///
/// The prefix comparison optionally folds case; the separator check always
/// looks at the original, unfolded `path`. A root that is a plain string
/// prefix of a sibling (`/a` vs `/ab/file`) does not match.
pub fn strip_root<'a>(path: &'a str, root: &str, fold_case: bool) -> Option<&'a str> {
    let mut path_chars = path.char_indices();
    for r in root.chars() {
        let (_, p) = path_chars.next()?;
        let same = if fold_case {
            p.to_lowercase().eq(r.to_lowercase())
        } else {
            p == r
        };
        if !same {
            return None;
        }
    }

    let offset = path_chars.next().map(|(i, _)| i).unwrap_or(path.len());
    let rest = &path[offset..];

    // A root that already ends in a separator ("/" or "C:\") owns everything
    // below it.
    if root.ends_with(is_separator) && !rest.is_empty() {
        return Some(rest);
    }
    match rest.chars().next() {
        Some(c) if is_separator(c) => Some(rest),
        _ => None,
    }
}

/// Find the first root (in iteration order) that owns `path`.
pub fn find_owning_root<'r, I>(path: &Path, roots: I, fold_case: bool) -> Option<PathBuf>
where
    I: IntoIterator<Item = &'r PathBuf>,
{
    let path_str = path.to_string_lossy();
    roots
        .into_iter()
        .find(|root| strip_root(&path_str, &root.to_string_lossy(), fold_case).is_some())
        .cloned()
}
