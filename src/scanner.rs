//! Lexical `#include` scanner (C2).
//!
//! Deliberately a lexical over-approximation: no macro expansion, no conditional-directive
//! evaluation. Includes inside comments or `#if 0` blocks are still reported; it is the
//! resolver's job (not this module's) to drop directives that don't resolve to a real file.
//! See `SPEC_FULL.md` §4.2.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncludeKind {
    Quoted,
    Angle,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncludeDirective {
    pub kind: IncludeKind,
    pub target: String,
}

/// Scans the raw bytes of `path` for `#include` directives.
///
/// Returns an empty list if the file cannot be read — callers distinguish "unresolvable
/// include" from "empty file" only at the resolver level, never here.
pub fn scan_includes_uncached(path: &Path) -> Vec<IncludeDirective> {
    let Ok(bytes) = fs::read(path) else { return Vec::new() };
    scan_includes_bytes(&bytes)
}

/// Runs the `#include` grammar described in `SPEC_FULL.md` §4.2 over raw bytes.
pub fn scan_includes_bytes(bytes: &[u8]) -> Vec<IncludeDirective> {
    let mut out = Vec::new();
    let mut i = 0usize;
    let len = bytes.len();

    while i < len {
        if bytes[i] != b'#' {
            i += 1;
            continue;
        }
        let hash_pos = i;
        i += 1;
        skip_horizontal_whitespace(bytes, &mut i);

        if !matches_keyword(bytes, i, b"include") {
            i = hash_pos + 1;
            continue;
        }
        i += "include".len();
        skip_horizontal_whitespace(bytes, &mut i);

        if i >= len {
            break;
        }
        let terminator = match bytes[i] {
            b'"' => b'"',
            b'<' => b'>',
            _ => {
                // Not a recognizable include target; resume the search after the keyword.
                continue;
            }
        };
        let kind = if terminator == b'"' { IncludeKind::Quoted } else { IncludeKind::Angle };
        i += 1;
        let start = i;
        while i < len && bytes[i] != terminator && bytes[i] != b'\n' {
            i += 1;
        }
        if i >= len || bytes[i] != terminator {
            // Unterminated directive (e.g. a newline before the closing delimiter); skip it.
            continue;
        }
        let target_bytes = &bytes[start..i];
        i += 1; // move past the terminator, search resumes from here

        let target = String::from_utf8_lossy(target_bytes).trim().to_string();
        if target.is_empty() {
            continue;
        }
        out.push(IncludeDirective { kind, target });
    }

    out
}

fn skip_horizontal_whitespace(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && (bytes[*i] == b' ' || bytes[*i] == b'\t') {
        *i += 1;
    }
}

fn matches_keyword(bytes: &[u8], at: usize, keyword: &[u8]) -> bool {
    bytes.len() >= at + keyword.len() && &bytes[at..at + keyword.len()] == keyword
}

/// Process-wide, thread-safe memoization of scan results by canonical path.
///
/// First scan for a path fills the entry; subsequent scans for the same path within the run
/// return the cached list without touching the filesystem again.
#[derive(Default)]
pub struct ScanMemo {
    entries: Mutex<HashMap<PathBuf, Vec<IncludeDirective>>>,
}

impl ScanMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized scan of `path`, computing and caching it on first access.
    ///
    /// `path` must already be canonical; the memo key is the path as given.
    pub fn scan(&self, path: &Path) -> Vec<IncludeDirective> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(cached) = entries.get(path) {
            return cached.clone();
        }
        let result = scan_includes_uncached(path);
        entries.insert(path.to_path_buf(), result.clone());
        result
    }
}
