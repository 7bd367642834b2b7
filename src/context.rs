//! Per-task shared state (C11), passed to workers instead of kept in process globals.
//!
//! Two concurrent `CompileTask`s never share a `BuildContext`, which is what makes them
//! independently testable (see `SPEC_FULL.md` §4.10 and the "Process-wide mutable state" design
//! note).

use crate::cache::TimestampCache;
use crate::scanner::ScanMemo;
use std::path::PathBuf;
use std::sync::Arc;

/// Bundles the state that the dependency-scan and out-of-date-evaluation worker pools need
/// read access to, so it can be handed to threads as a single `Arc`.
pub struct BuildContext {
    pub timestamps: TimestampCache,
    pub scan_memo: ScanMemo,
    /// Include search paths, in configured order. Read-only during a build phase.
    pub include_paths: Vec<PathBuf>,
    /// Forced precompiled-header source, if any, always visited first during resolution.
    pub forced_pch: Option<PathBuf>,
}

impl BuildContext {
    pub fn new(include_paths: Vec<PathBuf>, forced_pch: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            timestamps: TimestampCache::load_default(),
            scan_memo: ScanMemo::new(),
            include_paths,
            forced_pch,
        })
    }

    /// Constructs a context around an explicit timestamp cache file, for tests that need
    /// isolation from the shared platform temp directory.
    pub fn with_cache_path(
        cache_path: impl Into<PathBuf>,
        include_paths: Vec<PathBuf>,
        forced_pch: Option<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            timestamps: TimestampCache::load(cache_path),
            scan_memo: ScanMemo::new(),
            include_paths,
            forced_pch,
        })
    }
}
