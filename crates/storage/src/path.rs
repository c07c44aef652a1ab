//! Path validation.
//!
//! Storage keys are derived from upstream package names, which we do not
//! control. Anything that reaches a backend is checked here first so that a
//! hostile name can never escape the storage root.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path and returns its normalized form.
///
/// Leading slashes and `.` components are dropped, `..` is resolved but may
/// never climb above the root, and null bytes are rejected outright.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use pkgmirror_storage::validate_path;
/// assert!(validate_path("packagist/p/acme/foo.json.gz").is_ok());
/// assert!(validate_path("packagist/../packages.json").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(
///     validate_path("/packagist//./package/acme/foo.json.gz").unwrap(),
///     Path::new("packagist/package/acme/foo.json.gz")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let invalid = || exn::Exn::from(ErrorKind::InvalidPath(path.to_path_buf()));
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            // Null bytes survive Path::components() on Unix but truncate in
            // C-based syscalls.
            Component::Normal(s) if s.as_encoded_bytes().contains(&0) => return Err(invalid()),
            Component::Normal(s) => components.push(s),
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => return Err(invalid()),
            Component::ParentDir => {
                components.pop().ok_or_else(invalid)?;
            },
        }
    }
    if components.is_empty() {
        return Err(invalid());
    }
    Ok(components.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("packages.json", "packages.json")]
    #[case("mirror/p/acme/foo.json.gz", "mirror/p/acme/foo.json.gz")]
    #[case("/mirror/p/foo.json.gz", "mirror/p/foo.json.gz")]
    #[case("a//b//c", "a/b/c")]
    #[case("a/./b/./c", "a/b/c")]
    #[case("a/b/..", "a")]
    #[case("mirror/", "mirror")]
    fn test_valid_paths(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("../etc/passwd")]
    #[case("a/../../b")]
    #[case("..")]
    #[case("a\0b")]
    #[case("")]
    #[case(".")]
    #[case("//")]
    fn test_invalid_paths(#[case] input: &str) {
        assert!(validate(input).is_err());
    }
}
