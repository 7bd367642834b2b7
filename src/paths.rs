//! Path normalization helpers.
//!
//! Every path that enters the engine is canonicalized before it is used as a cache, scan-memo,
//! or dependency-set key, so that two spellings of the same file (`./src/../src/a.h` vs `src/a.h`)
//! compare equal.

use crate::error::{BuildError, Result};
use std::path::{Path, PathBuf};

/// Canonicalizes `path`, resolving symlinks and normalizing separators.
///
/// Uses `dunce` rather than `std::fs::canonicalize` directly so that on Windows we don't leak
/// `\\?\` verbatim prefixes into paths that get shelled out to the compiler or written into the
/// on-disk caches.
pub fn canonicalize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    dunce::canonicalize(path).map_err(|err| BuildError::io(err, path))
}

/// Best-effort canonicalization for paths that may not exist (e.g. an object file that hasn't
/// been produced yet). Falls back to a lexical join against the current directory.
pub fn canonicalize_lenient(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    dunce::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().unwrap_or_default().join(path)
        }
    })
}

const WHITELISTED_EXTENSIONS: &[&str] = &["c", "h", "cpp", "hpp", "cxx", "rc"];

/// Whether `path`'s extension is one of the C/C++ extensions the timestamp cache hashes.
pub fn is_hashable_source(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| WHITELISTED_EXTENSIONS.iter().any(|w| w.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelisted_extensions_are_case_insensitive() {
        assert!(is_hashable_source(Path::new("foo.CPP")));
        assert!(is_hashable_source(Path::new("foo.H")));
        assert!(!is_hashable_source(Path::new("foo.obj")));
        assert!(!is_hashable_source(Path::new("foo")));
    }
}
