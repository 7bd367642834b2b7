//! The `CompileTask` configuration surface handed down from the (out-of-scope) script bridge.
//!
//! These types are plain `serde`-(de)serializable structs so a front-end — a config file, a CLI,
//! an embedded scripting language — can build one without this crate depending on any of them.
//! See `SPEC_FULL.md` §3 and §6.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `Debug` or `Release`; also determines which of `FB_COMPILER_DEBUG`/`FB_COMPILER_RELEASE` the
/// dispatcher consults, and (when `objDir` is unset) the default object directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildKind {
    Debug,
    Release,
}

impl BuildKind {
    /// The object-directory leaf name used when `objDir` is left unset.
    pub fn default_obj_dir_name(self) -> &'static str {
        match self {
            BuildKind::Debug => "debug",
            BuildKind::Release => "release",
        }
    }

    pub fn env_override_var(self) -> &'static str {
        match self {
            BuildKind::Debug => "FB_COMPILER_DEBUG",
            BuildKind::Release => "FB_COMPILER_RELEASE",
        }
    }
}

/// C runtime linkage: statically linked or the shared/dynamic CRT.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrtLinkage {
    Static,
    Dynamic,
}

/// One compile task, as configured by the script bridge. See `SPEC_FULL.md` §3 `CompileTask`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileTask {
    pub build: BuildKind,
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub mp_skip_files: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub dependency_check: bool,
    pub crt: CrtLinkage,
    /// Output directory for objects. Empty means "default to `build`'s conventional name".
    #[serde(default)]
    pub obj_dir: PathBuf,
    #[serde(default)]
    pub includes: Vec<PathBuf>,
    #[serde(default)]
    pub defines: Vec<String>,
    /// Target parallelism. `0` (or unset) falls back to hardware parallelism, floor 2.
    #[serde(default)]
    pub threads: usize,
    /// Free-form extra compiler arguments, appended verbatim (whitespace-split).
    #[serde(default)]
    pub args: String,
    pub precompiled_header: Option<PathBuf>,
    pub precompiled_source: Option<PathBuf>,
    #[serde(default)]
    pub warn_level: u8,
    #[serde(default)]
    pub warning_as_error: bool,
    #[serde(default)]
    pub warning_disable: Vec<u32>,
    /// Path to the build script/config that drove this task; its mtime invalidates every object.
    pub build_script: PathBuf,
}

fn default_true() -> bool {
    true
}

impl CompileTask {
    /// The object directory to use, defaulting by convention when `obj_dir` was left empty.
    pub fn effective_obj_dir(&self) -> PathBuf {
        if self.obj_dir.as_os_str().is_empty() {
            PathBuf::from(self.build.default_obj_dir_name())
        } else {
            self.obj_dir.clone()
        }
    }

    /// `threads == 0` means "unset" per `SPEC_FULL.md` §8 boundaries.
    pub fn configured_threads(&self) -> Option<usize> {
        if self.threads == 0 {
            None
        } else {
            Some(self.threads)
        }
    }

    pub fn has_pch(&self) -> bool {
        self.precompiled_header.is_some() && self.precompiled_source.is_some()
    }

    /// Parses a `CompileTask` from a JSON document, the shape a config-file-based script bridge
    /// would hand this crate without needing to depend on it for struct definitions.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
