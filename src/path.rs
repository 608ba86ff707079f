//! Remote path helpers
//!
//! Remote paths are slash-delimited sequences of non-empty segments relative
//! to the store root. The root itself is the empty string. Every helper here
//! produces canonical paths: no leading, trailing or doubled slashes.

use crate::error::ValidationError;

/// Characters the server cannot store in a file or directory name.
pub const FORBIDDEN_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Root of the remote store.
pub const ROOT: &str = "";

/// Join a parent path with one child segment.
pub fn join(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{}/{}", parent, segment)
    }
}

/// Split a canonical path into its segments. The root yields no segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Parent of a path; the parent of the root is the root.
pub fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(pos) => path[..pos].to_string(),
        None => ROOT.to_string(),
    }
}

/// Split `a/b/c.txt` into (`a/b`, `c.txt`).
pub fn split_last(path: &str) -> (String, Option<String>) {
    let normalized = normalize(path);
    match normalized.rfind('/') {
        Some(pos) => (
            normalized[..pos].to_string(),
            Some(normalized[pos + 1..].to_string()),
        ),
        None if normalized.is_empty() => (ROOT.to_string(), None),
        None => (ROOT.to_string(), Some(normalized)),
    }
}

/// Canonicalize user input: backslashes become slashes, empty segments and
/// surrounding whitespace are dropped. `"/"`, `""` and `"  "` are all root.
pub fn normalize(input: &str) -> String {
    let replaced = input.trim().replace('\\', "/");
    segments(&replaced).join("/")
}

/// Display name of a path's last segment, `None` at root.
pub fn file_name(path: &str) -> Option<&str> {
    segments(path).last().copied()
}

/// Validate a single segment used for navigation.
pub fn validate_segment(segment: &str) -> Result<(), ValidationError> {
    if segment.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if segment.contains('/') {
        return Err(ValidationError::invalid(segment, "contains a path separator"));
    }
    if segment == "." || segment == ".." {
        return Err(ValidationError::invalid(segment, "relative segments are not allowed"));
    }
    Ok(())
}

/// Validate a file or directory name before it is sent to the server.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name == "." || name == ".." {
        return Err(ValidationError::invalid(name, "relative segments are not allowed"));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return Err(ValidationError::invalid(name, format!("contains forbidden character '{}'", c)));
    }
    if name.chars().any(char::is_control) {
        return Err(ValidationError::invalid(name, "contains control characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_root_and_nested() {
        assert_eq!(join("", "docs"), "docs");
        assert_eq!(join("docs", "2024"), "docs/2024");
        assert!(!join("docs/2024", "q1").contains("//"));
    }

    #[test]
    fn test_split_and_rejoin_is_idempotent() {
        for path in ["", "a", "a/b", "a/b/c"] {
            let rejoined = segments(path).join("/");
            assert_eq!(rejoined, path);
            assert_eq!(segments(&rejoined).join("/"), path);
        }
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent(""), "");
        assert_eq!(parent("a"), "");
        assert_eq!(parent("a/b/c"), "a/b");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/"), "");
        assert_eq!(normalize("  "), "");
        assert_eq!(normalize("/a//b/"), "a/b");
        assert_eq!(normalize("a\\b"), "a/b");
    }

    #[test]
    fn test_split_last() {
        assert_eq!(split_last("docs/report.pdf"), ("docs".to_string(), Some("report.pdf".to_string())));
        assert_eq!(split_last("/report.pdf"), ("".to_string(), Some("report.pdf".to_string())));
        assert_eq!(split_last("/"), ("".to_string(), None));
    }

    #[test]
    fn test_validate_segment() {
        assert!(validate_segment("docs").is_ok());
        assert_eq!(validate_segment(""), Err(ValidationError::EmptyName));
        assert!(validate_segment("a/b").is_err());
        assert!(validate_segment("..").is_err());
    }

    #[test]
    fn test_validate_name_forbidden_characters() {
        assert!(validate_name("report.pdf").is_ok());
        assert!(validate_name("résumé 2024.txt").is_ok());
        for bad in ["bad/name.txt", "a<b", "a>b", "a:b", "a\"b", "a\\b", "a|b", "a?b", "a*b"] {
            assert!(
                matches!(validate_name(bad), Err(ValidationError::InvalidName { .. })),
                "{} should be rejected",
                bad
            );
        }
        assert!(validate_name("tab\tname").is_err());
        assert!(validate_name("nul\u{0}").is_err());
        assert_eq!(validate_name("   "), Err(ValidationError::EmptyName));
    }
}
