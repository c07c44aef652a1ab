//! Storage paths for mirrored documents.
//!
//! Every filename the mirror derives goes through [`sanitize`].

use std::path::PathBuf;

const ROOT_FILE: &str = "packages.json";
const PROVIDER_DIR: &str = "p";
const PACKAGE_DIR: &str = "package";
const DIST_DIR: &str = "dist";
const DOCUMENT_SUFFIX: &str = ".json.gz";
/// Separates a package name from its content hash in a filename.
pub const HASH_SEPARATOR: &str = "__";

/// Lowercase `name` and replace every character outside `[a-z0-9-_/]` with
/// `-`. Empty path segments are dropped, so the result is always relative.
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '_' | '/' => c,
            _ => '-',
        })
        .collect();
    let joined = replaced.split('/').filter(|segment| !segment.is_empty()).collect::<Vec<_>>().join("/");
    if joined.is_empty() { "-".to_string() } else { joined }
}

pub fn root_path(mirror: &str) -> PathBuf {
    PathBuf::from(mirror).join(ROOT_FILE)
}

/// Provider includes and flat includes, keyed by their (hash-substituted) path.
pub fn provider_path(mirror: &str, key: &str) -> PathBuf {
    let key = key.strip_suffix(".json").unwrap_or(key);
    PathBuf::from(mirror).join(PROVIDER_DIR).join(format!("{}{DOCUMENT_SUFFIX}", sanitize(key)))
}

/// Stem of a package file: the sanitized name, plus `__<hash>` when pinned.
fn package_stem(name: &str, hash: Option<&str>) -> String {
    match hash {
        Some(hash) => format!("{}{HASH_SEPARATOR}{}", sanitize(name), sanitize(hash)),
        None => sanitize(name),
    }
}

pub fn package_path(mirror: &str, name: &str, hash: Option<&str>) -> PathBuf {
    PathBuf::from(mirror)
        .join(PACKAGE_DIR)
        .join(format!("{}{DOCUMENT_SUFFIX}", package_stem(name, hash)))
}

/// Directory holding every revision of a package's document.
pub fn package_dir(mirror: &str, name: &str) -> PathBuf {
    let mut path = package_path(mirror, name, None);
    path.pop();
    path
}

/// Whether `file_name` is a document of package `name`, pinned or not.
pub fn is_package_file(file_name: &str, name: &str) -> bool {
    let sanitized = sanitize(name);
    let base = sanitized.rsplit('/').next().unwrap_or(&sanitized);
    let Some(stem) = file_name.strip_suffix(DOCUMENT_SUFFIX) else {
        return false;
    };
    stem == base || stem.strip_prefix(base).is_some_and(|rest| rest.starts_with(HASH_SEPARATOR))
}

pub fn dist_dir(mirror: &str, package: &str) -> PathBuf {
    PathBuf::from(mirror).join(DIST_DIR).join(sanitize(package))
}

pub fn dist_path(mirror: &str, package: &str, hash: &str, kind: &str) -> PathBuf {
    dist_dir(mirror, package).join(format!("{hash}.{}", sanitize(kind)))
}
