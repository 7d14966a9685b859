//! Entry-name validation.
//!
//! Package entries are named like `/pages/index/index.js`. A leading separator
//! means "relative to the package root"; names are resolved below the output
//! directory and must never escape it.

use crate::error::SecurityError;
use std::path::{Path, PathBuf};

/// Validates and normalizes an entry name into a path relative to the output root.
///
/// This function:
/// - Accepts both `/` and `\` as separators
/// - Strips leading separators (root-relative names)
/// - Drops empty and `.` segments
/// - Rejects `..` segments and drive prefixes
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use wxapkg::safety::validate_entry_name;
///
/// let path = validate_entry_name("/pages\\index/index.js").unwrap();
/// assert_eq!(path, Path::new("pages/index/index.js"));
///
/// assert!(validate_entry_name("/../../etc/passwd").is_err());
/// ```
pub fn validate_entry_name(name: &str) -> Result<PathBuf, SecurityError> {
    let mut normalized = PathBuf::new();

    for segment in name.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(SecurityError::PathTraversal(format!(
                    "Entry name contains '..' segment: {}",
                    name
                )));
            }
            s if s.contains(':') => {
                // Drive prefixes like "C:" would make the join absolute on Windows.
                return Err(SecurityError::PathTraversal(format!(
                    "Entry name contains a drive prefix: {}",
                    name
                )));
            }
            s => normalized.push(s),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(SecurityError::EmptyPath(name.to_string()));
    }

    Ok(normalized)
}

/// Resolve an entry name to its destination below `output_dir`.
pub fn destination(output_dir: &Path, name: &str) -> Result<PathBuf, SecurityError> {
    Ok(output_dir.join(validate_entry_name(name)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_entry_name_root_relative() {
        assert_eq!(
            validate_entry_name("/app-config.json").unwrap(),
            Path::new("app-config.json")
        );
        assert_eq!(
            validate_entry_name("//pages//a.js").unwrap(),
            Path::new("pages/a.js")
        );
    }

    #[test]
    fn test_validate_entry_name_relative() {
        assert_eq!(
            validate_entry_name("pages/a/a.wxml").unwrap(),
            Path::new("pages/a/a.wxml")
        );
        assert_eq!(
            validate_entry_name("./pages/./a.js").unwrap(),
            Path::new("pages/a.js")
        );
    }

    #[test]
    fn test_validate_entry_name_backslashes() {
        assert_eq!(
            validate_entry_name("\\images\\tab\\home.png").unwrap(),
            Path::new("images/tab/home.png")
        );
    }

    #[test]
    fn test_validate_entry_name_traversal() {
        let result = validate_entry_name("/../etc/passwd");
        assert!(matches!(result, Err(SecurityError::PathTraversal(_))));

        assert!(validate_entry_name("pages/../../x.js").is_err());
        assert!(validate_entry_name("..\\x.js").is_err());
    }

    #[test]
    fn test_validate_entry_name_drive_prefix() {
        assert!(validate_entry_name("C:\\Windows\\x.dll").is_err());
    }

    #[test]
    fn test_validate_entry_name_empty() {
        assert!(matches!(
            validate_entry_name("/"),
            Err(SecurityError::EmptyPath(_))
        ));
        assert!(validate_entry_name("").is_err());
        assert!(validate_entry_name("/./").is_err());
    }

    #[test]
    fn test_validate_entry_name_unicode() {
        assert_eq!(
            validate_entry_name("/分包/页面/首页.js").unwrap(),
            Path::new("分包/页面/首页.js")
        );
    }

    #[test]
    fn test_destination_joins_output_dir() {
        let out = Path::new("/tmp/out");
        assert_eq!(
            destination(out, "/a/b.js").unwrap(),
            Path::new("/tmp/out/a/b.js")
        );
    }
}
