//! # State Paths
//!
//! States are addressed by names joined with [`SEPARATOR`], e.g.
//! `root/gameplay/combat`. The leading root segment is optional.

use crate::error::{StateError, StateResult};

/// Reserved name of the root state.
pub const ROOT_NAME: &str = "root";

/// Separator between path segments.
pub const SEPARATOR: char = '/';

/// Strips one leading root segment, if present.
///
/// ```rust
/// use stratum_states::path::strip_root;
///
/// assert_eq!(strip_root("root/menu/play"), "menu/play");
/// assert_eq!(strip_root("root"), "");
/// assert_eq!(strip_root("menu"), "menu");
/// assert_eq!(strip_root("rooted/x"), "rooted/x");
/// ```
#[must_use]
pub fn strip_root(path: &str) -> &str {
    match path.strip_prefix(ROOT_NAME) {
        Some("") => "",
        Some(rest) => rest.strip_prefix(SEPARATOR).unwrap_or(path),
        None => path,
    }
}

/// Splits on the first separator.
#[must_use]
pub fn split_first(path: &str) -> (&str, Option<&str>) {
    match path.split_once(SEPARATOR) {
        Some((head, tail)) => (head, Some(tail)),
        None => (path, None),
    }
}

/// Splits a path into its parent path and last segment.
#[must_use]
pub fn split_last(path: &str) -> (&str, &str) {
    match path.rsplit_once(SEPARATOR) {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

/// Appends `name` to `parent`.
#[must_use]
pub fn join(parent: &str, name: &str) -> String {
    let mut path = String::with_capacity(parent.len() + 1 + name.len());
    path.push_str(parent);
    path.push(SEPARATOR);
    path.push_str(name);
    path
}

/// Checks that `name` can be used for a non-root state.
///
/// # Errors
///
/// Returns [`StateError::InvalidName`] for empty names, names containing the
/// separator, and the reserved root name.
pub fn validate_name(name: &str) -> StateResult<()> {
    if name.is_empty() || name.contains(SEPARATOR) || name == ROOT_NAME {
        return Err(StateError::InvalidName(name.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_first() {
        assert_eq!(split_first("a/b/c"), ("a", Some("b/c")));
        assert_eq!(split_first("a"), ("a", None));
    }

    #[test]
    fn test_split_last() {
        assert_eq!(split_last("a/b/c"), ("a/b", "c"));
        assert_eq!(split_last("a"), ("", "a"));
    }

    #[test]
    fn test_join() {
        assert_eq!(join("root/menu", "play"), "root/menu/play");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("menu").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(ROOT_NAME).is_err());
    }
}
