//! Path normalization and key-range arithmetic.
//!
//! Drive paths are absolute, `/`-separated, case-sensitive strings with no
//! trailing slash except the root. They double as namespace keys, so every
//! descendant of a folder `F` lies strictly between `F + "/"` and `F + "0"`:
//! `'/'` and `'0'` are adjacent bytes and nothing can sort between them.

use store::KeyRange;

use crate::error::{DriveError, DriveResult};

/// The logical root.
pub const ROOT: &str = "/";

/// Normalize a path: single leading `/`, no empty segments, no trailing `/`.
///
/// `.` and `..` segments and NUL bytes are rejected rather than resolved.
pub fn normalize(path: &str) -> DriveResult<String> {
    if path.contains('\0') {
        return Err(DriveError::InvalidPath {
            path: path.to_string(),
            reason: "paths cannot contain NUL bytes",
        });
    }

    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(DriveError::InvalidPath {
                path: path.to_string(),
                reason: "dot segments are not allowed",
            });
        }
        out.push('/');
        out.push_str(segment);
    }

    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Key prefix for children of `folder`: the empty string for the root.
pub fn key_prefix(folder: &str) -> &str {
    if folder == ROOT {
        ""
    } else {
        folder
    }
}

/// Half-open key range holding exactly the descendants of `folder`.
pub fn subtree_range(folder: &str) -> KeyRange {
    let prefix = key_prefix(folder);
    KeyRange::between(format!("{}/", prefix), format!("{}0", prefix))
}

/// Key of the reserved empty-directory marker for `dir`.
pub fn marker_key(dir: &str) -> String {
    format!("{}/", key_prefix(dir))
}

/// Whether `key` is an empty-directory marker key.
pub fn is_marker_key(key: &str) -> bool {
    key.len() > 1 && key.ends_with('/')
}

/// Join a relative path onto `base` and normalize the result.
pub fn join(base: &str, relative: &str) -> DriveResult<String> {
    normalize(&format!("{}/{}", base, relative))
}

/// Last segment of a normalized path, empty for the root.
pub fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Parent directory of a normalized path, `None` for the root.
pub fn parent_of(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

/// Whether `path` lies strictly inside directory `dir`.
pub fn is_descendant(path: &str, dir: &str) -> bool {
    if dir == ROOT {
        return path != ROOT && path.starts_with('/');
    }
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

/// Remainder of `path` below `root`, with its leading `/`.
///
/// Returns `None` when `path` is not strictly inside `root`.
pub fn relative_to<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    if !is_descendant(path, root) {
        return None;
    }
    Some(&path[key_prefix(root).len()..])
}

/// Every proper ancestor directory of `path`, root first, nearest last.
///
/// When `exclude` is given, that directory and every path above it are
/// dropped, so only ancestors strictly inside `exclude` remain.
pub fn ancestors(path: &str, exclude: Option<&str>) -> Vec<String> {
    let mut dirs = Vec::new();
    let mut current = parent_of(path);
    while let Some(dir) = current {
        let dropped = match exclude {
            Some(excluded) => dir == excluded || !is_descendant(dir, excluded),
            None => false,
        };
        if dropped {
            break;
        }
        dirs.push(dir.to_string());
        current = parent_of(dir);
    }
    dirs.reverse();
    dirs
}

/// Immediate child segment of `key` below `folder`, if `key` is a descendant.
///
/// Returns the name and whether the key ends exactly at that name.
pub fn child_segment<'a>(key: &'a str, folder: &str) -> Option<(&'a str, bool)> {
    let prefix = key_prefix(folder);
    let rest = key.strip_prefix(prefix)?.strip_prefix('/')?;
    match rest.find('/') {
        Some(i) => Some((&rest[..i], false)),
        None => Some((rest, true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("").unwrap(), "/");
        assert_eq!(normalize("a/b").unwrap(), "/a/b");
        assert_eq!(normalize("/a/b/").unwrap(), "/a/b");
        assert_eq!(normalize("//a///b//").unwrap(), "/a/b");
        assert_eq!(normalize("/Case/Sensitive").unwrap(), "/Case/Sensitive");
    }

    #[test]
    fn test_normalize_rejects_dot_segments() {
        assert!(matches!(
            normalize("/a/../b"),
            Err(DriveError::InvalidPath { .. })
        ));
        assert!(normalize("./a").is_err());
        assert!(normalize("/a\0b").is_err());
        assert_eq!(normalize("/a/..b/.c").unwrap(), "/a/..b/.c");
    }

    #[test]
    fn test_subtree_range() {
        let root = subtree_range("/");
        assert!(root.contains("/a"));
        assert!(root.contains("/a/b"));

        let range = subtree_range("/a");
        assert!(range.contains("/a/b"));
        assert!(!range.contains("/a/"));
        assert!(!range.contains("/a"));
        assert!(!range.contains("/a.txt"));
        assert!(!range.contains("/a0"));
        assert!(!range.contains("/ab/c"));
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("/a/b/c", None), vec!["/", "/a", "/a/b"]);
        assert_eq!(ancestors("/a", None), vec!["/"]);
        assert!(ancestors("/", None).is_empty());
    }

    #[test]
    fn test_ancestors_exclude_drops_everything_above() {
        assert_eq!(ancestors("/a/b/c/d", Some("/a")), vec!["/a/b", "/a/b/c"]);
        assert_eq!(ancestors("/a/b", Some("/a")), Vec::<String>::new());
        assert_eq!(ancestors("/a/b/c", Some("/")), vec!["/a", "/a/b"]);
    }

    #[test]
    fn test_name_and_parent() {
        assert_eq!(name_of("/a/b.txt"), "b.txt");
        assert_eq!(name_of("/"), "");
        assert_eq!(parent_of("/a/b"), Some("/a"));
        assert_eq!(parent_of("/a"), Some("/"));
        assert_eq!(parent_of("/"), None);
    }

    #[test]
    fn test_is_descendant() {
        assert!(is_descendant("/a/b", "/a"));
        assert!(is_descendant("/a", "/"));
        assert!(!is_descendant("/ab", "/a"));
        assert!(!is_descendant("/a", "/a"));
        assert!(!is_descendant("/", "/"));
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(relative_to("/src/a/b", "/src"), Some("/a/b"));
        assert_eq!(relative_to("/a", "/"), Some("/a"));
        assert_eq!(relative_to("/srcx/a", "/src"), None);
    }

    #[test]
    fn test_child_segment() {
        assert_eq!(child_segment("/a/b", "/a"), Some(("b", true)));
        assert_eq!(child_segment("/a/b/c", "/a"), Some(("b", false)));
        assert_eq!(child_segment("/a/b/", "/a"), Some(("b", false)));
        assert_eq!(child_segment("/x", "/"), Some(("x", true)));
        assert_eq!(child_segment("/b/c", "/a"), None);
    }

    #[test]
    fn test_marker_keys() {
        assert_eq!(marker_key("/a/b"), "/a/b/");
        assert!(is_marker_key("/a/b/"));
        assert!(!is_marker_key("/a/b"));
        assert!(!is_marker_key("/"));
        assert_eq!(join("/a", "/b/c").unwrap(), "/a/b/c");
    }
}
