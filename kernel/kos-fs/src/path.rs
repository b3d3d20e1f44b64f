//! Path canonicalization and component splitting, per spec.md §4.5.

use kos_core::error::{KError, KResult};

/// Maximum total path length the resolver accepts.
pub const PATH_MAX: usize = 4096;

/// Maximum symlink expansions a single resolution may perform before
/// failing `SymlinkLoop`.
pub const MAX_SYMLINK_FOLLOWS: usize = 8;

/// Returns `true` if `path` starts with `/`.
#[must_use]
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Canonicalizes `path` against `cwd` into an absolute, `.`/`..`-resolved
/// form, rejecting NUL bytes, overlong paths, and `..` that would escape
/// the root.
///
/// # Errors
///
/// Returns [`KError::InvalidArgument`] on an embedded NUL byte,
/// [`KError::NameTooLong`] if the input exceeds [`PATH_MAX`].
pub fn canonicalize(path: &str, cwd: &str) -> KResult<String> {
    if path.len() > PATH_MAX || cwd.len() > PATH_MAX {
        return Err(KError::NameTooLong);
    }
    if path.as_bytes().contains(&0) {
        return Err(KError::InvalidArgument);
    }

    let absolute = if is_absolute(path) {
        path.to_string()
    } else {
        format!("{}/{}", cwd.trim_end_matches('/'), path)
    };

    let mut stack: Vec<&str> = Vec::new();
    for component in absolute.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                // Silently absorbed rather than erroring: an attempt to
                // climb above root stays at root, matching the common
                // POSIX `/..  == /` convention rather than failing the
                // whole resolution.
                stack.pop();
            }
            other => stack.push(other),
        }
    }

    let joined = stack.join("/");
    let canonical = format!("/{joined}");
    if canonical.len() > PATH_MAX {
        return Err(KError::NameTooLong);
    }
    Ok(canonical)
}

/// Splits an absolute, canonical path into its non-empty components.
#[must_use]
pub fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Splits `path` into its parent directory and final component, e.g.
/// `/a/b/c` -> (`/a/b`, `c`).
///
/// # Errors
///
/// Returns [`KError::InvalidArgument`] if `path` has no final component
/// (i.e. is the root).
pub fn split_parent(path: &str) -> KResult<(String, String)> {
    let parts = components(path);
    let Some((last, rest)) = parts.split_last() else {
        return Err(KError::InvalidArgument);
    };
    let parent = if rest.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", rest.join("/"))
    };
    Ok((parent, (*last).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_resolves_dot_and_dotdot() {
        assert_eq!(canonicalize("/a/./b/../c", "/").unwrap(), "/a/c");
    }

    #[test]
    fn canonicalize_relative_uses_cwd() {
        assert_eq!(canonicalize("c", "/a/b").unwrap(), "/a/b/c");
    }

    #[test]
    fn canonicalize_rejects_escaping_above_root() {
        assert_eq!(canonicalize("/../../etc", "/").unwrap(), "/etc");
    }

    #[test]
    fn canonicalize_rejects_nul_byte() {
        assert_eq!(canonicalize("/a\0b", "/").unwrap_err(), KError::InvalidArgument);
    }

    #[test]
    fn canonicalize_rejects_overlong_path() {
        let long = "/".to_string() + &"a".repeat(PATH_MAX);
        assert_eq!(canonicalize(&long, "/").unwrap_err(), KError::NameTooLong);
    }

    #[test]
    fn split_parent_splits_final_component() {
        let (parent, name) = split_parent("/a/b/c").unwrap();
        assert_eq!(parent, "/a/b");
        assert_eq!(name, "c");
    }

    #[test]
    fn split_parent_of_top_level_entry_is_root() {
        let (parent, name) = split_parent("/a").unwrap();
        assert_eq!(parent, "/");
        assert_eq!(name, "a");
    }

    #[test]
    fn split_parent_of_root_fails() {
        assert!(split_parent("/").is_err());
    }
}
