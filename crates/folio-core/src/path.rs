//! Root-path arithmetic for the virtual resource tree.
//!
//! Paths are absolute and `/`-separated. Folder paths always end with `/`,
//! file paths never do; the root folder is `/`. Because of the trailing
//! slash, "is `p` inside folder `f`" is a plain prefix test, which is what
//! the lock manager and the subtree queries rely on.

use crate::error::CoreError;

/// The root folder path.
pub const ROOT: &str = "/";

/// Characters never allowed inside a resource name.
const FORBIDDEN_CHARS: &[char] = &['\\', ':', '*', '?', '"', '<', '>', '|'];

/// Returns true if `path` names a folder.
pub fn is_folder_path(path: &str) -> bool {
    path.ends_with('/')
}

/// Validates a single resource name (one path segment).
///
/// Rejects empty names, names made only of dots (`.`, `..`, `...`),
/// names containing `/`, control characters or filesystem-reserved
/// characters.
pub fn validate_name(name: &str) -> Result<(), CoreError> {
    let invalid = |reason: &str| CoreError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.chars().all(|c| c == '.') {
        return Err(invalid("dot-only names are reserved"));
    }
    if name.contains('/') {
        return Err(invalid("name contains '/'"));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(invalid("name contains control characters"));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(invalid(&format!("name contains reserved character '{}'", c)));
    }
    Ok(())
}

/// Normalizes a user-supplied path and validates every segment.
///
/// Adds the leading slash, collapses repeated slashes and forces the trailing
/// slash on or off according to `folder`.
pub fn normalize(path: &str, folder: bool) -> Result<String, CoreError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        if folder {
            return Ok(ROOT.to_string());
        }
        return Err(CoreError::InvalidPath {
            path: path.to_string(),
            reason: "a file cannot be the root".to_string(),
        });
    }
    for segment in &segments {
        validate_name(segment)?;
    }
    let mut normalized = String::with_capacity(path.len() + 2);
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if folder {
        normalized.push('/');
    }
    Ok(normalized)
}

/// Returns the parent folder path, or `None` for the root.
pub fn parent(path: &str) -> Option<String> {
    if path == ROOT || path.is_empty() {
        return None;
    }
    let trimmed = path.trim_end_matches('/');
    trimmed
        .rfind('/')
        .map(|idx| trimmed[..=idx].to_string())
}

/// Returns the last segment of a path, without the folder slash.
pub fn name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// All ancestor folders of `path`, root first, excluding `path` itself.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = parent(path);
    while let Some(p) = current {
        current = parent(&p);
        result.push(p);
    }
    result.reverse();
    result
}

/// Number of segments below the root (`/` is 0, `/a/` and `/a` are 1).
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// True if `path` lies strictly below `folder`.
pub fn is_descendant(path: &str, folder: &str) -> bool {
    is_folder_path(folder) && path.len() > folder.len() && path.starts_with(folder)
}

/// True if `path` is an immediate child of `folder`.
pub fn is_direct_child(path: &str, folder: &str) -> bool {
    parent(path).as_deref() == Some(folder)
}

/// Replaces the `old_prefix` of `path` by `new_prefix` (used for folder moves).
pub fn rebase(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    path.strip_prefix(old_prefix)
        .map(|rest| format!("{}{}", new_prefix, rest))
}

/// Resolves a link target found inside a resource against that resource's
/// folder. Absolute targets are normalized as-is; `.` and `..` segments are
/// folded.
pub fn resolve_link(base: &str, target: &str) -> Option<String> {
    let absolute = if target.starts_with('/') {
        target.to_string()
    } else {
        let base_folder = if is_folder_path(base) {
            base.to_string()
        } else {
            parent(base)?
        };
        format!("{}{}", base_folder, target)
    };
    let folder_target = absolute.ends_with('/');
    let mut stack: Vec<&str> = Vec::new();
    for segment in absolute.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop()?;
            }
            other => stack.push(other),
        }
    }
    if stack.is_empty() {
        return Some(ROOT.to_string());
    }
    let mut resolved = String::new();
    for segment in stack {
        resolved.push('/');
        resolved.push_str(segment);
    }
    if folder_target {
        resolved.push('/');
    }
    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folder_and_file() {
        assert_eq!(normalize("a//b", true).unwrap(), "/a/b/");
        assert_eq!(normalize("/a/b/", false).unwrap(), "/a/b");
        assert_eq!(normalize("/", true).unwrap(), "/");
        assert!(normalize("/", false).is_err());
    }

    #[test]
    fn test_dot_only_names_are_rejected() {
        for bad in [".", "..", "..."] {
            assert!(matches!(
                validate_name(bad),
                Err(CoreError::InvalidName { .. })
            ));
        }
        assert!(normalize("/a/../b", false).is_err());
        assert!(validate_name(".hidden").is_ok());
        assert!(validate_name("file.txt").is_ok());
    }

    #[test]
    fn test_reserved_characters_are_rejected() {
        assert!(validate_name("a:b").is_err());
        assert!(validate_name("tab\there").is_err());
        assert!(validate_name("").is_err());
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent("/a/b"), Some("/a/".to_string()));
        assert_eq!(parent("/a/b/"), Some("/a/".to_string()));
        assert_eq!(parent("/a/"), Some("/".to_string()));
        assert_eq!(parent("/"), None);
        assert_eq!(name("/a/b/"), "b");
        assert_eq!(name("/a/x.txt"), "x.txt");
    }

    #[test]
    fn test_ancestors_root_first() {
        assert_eq!(ancestors("/a/b/c"), vec!["/", "/a/", "/a/b/"]);
        assert!(ancestors("/").is_empty());
    }

    #[test]
    fn test_descendant_checks() {
        assert!(is_descendant("/a/b/c", "/a/"));
        assert!(!is_descendant("/a/", "/a/"));
        assert!(!is_descendant("/ab", "/a/"));
        assert!(is_direct_child("/a/b", "/a/"));
        assert!(!is_direct_child("/a/b/c", "/a/"));
    }

    #[test]
    fn test_rebase() {
        assert_eq!(
            rebase("/a/b/c", "/a/", "/z/").as_deref(),
            Some("/z/b/c")
        );
        assert_eq!(rebase("/q/c", "/a/", "/z/"), None);
    }

    #[test]
    fn test_resolve_link() {
        assert_eq!(resolve_link("/a/page", "img.png").as_deref(), Some("/a/img.png"));
        assert_eq!(resolve_link("/a/b/page", "../x").as_deref(), Some("/a/x"));
        assert_eq!(resolve_link("/a/page", "/abs/y").as_deref(), Some("/abs/y"));
        assert_eq!(resolve_link("/page", "../../x"), None);
    }

    #[test]
    fn test_depth() {
        assert_eq!(depth("/"), 0);
        assert_eq!(depth("/a/"), 1);
        assert_eq!(depth("/a/b"), 2);
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn normalize_is_idempotent(
                segments in proptest::collection::vec("[a-z0-9_]{1,8}", 1..5),
                folder in any::<bool>(),
            ) {
                let raw = segments.join("/");
                let once = normalize(&raw, folder).unwrap();
                let twice = normalize(&once, folder).unwrap();
                prop_assert_eq!(&once, &twice);
                prop_assert_eq!(depth(&once), segments.len());
                prop_assert_eq!(is_folder_path(&once), folder);
            }
        }
    }
}
