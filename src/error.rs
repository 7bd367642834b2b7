//! Error types shared by every component of the build engine.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;

pub type Result<T, E = BuildError> = std::result::Result<T, E>;

/// A unified error union for the incremental-build engine.
///
/// Recoverable failures (cache corruption, an unreadable header during a scan) are caught at
/// their point of origin and never constructed as one of these variants; only conditions that
/// should abort the whole build propagate up as a `BuildError`.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to compile {file}: compiler exited with {status}")]
    Compile { file: PathBuf, status: ExitStatus },

    /// The fallback pool drained to exhaustion and `failed` of the `attempted` sources still
    /// didn't produce an object — i.e. a genuine `CompileError`, fatal even after every recovery
    /// phase ran. Not to be confused with [`BuildError::PartialBatchFailure`], which names the
    /// non-fatal case where the fallback pool recovered everything the batch phase missed.
    #[error("{failed} of {attempted} source(s) failed to compile after batch/fallback recovery")]
    CompileFailed { attempted: usize, failed: usize },

    /// Batch phase exited nonzero, but every survivor was recovered by the fallback pool.
    /// Per `SPEC_FULL.md` §7 this is non-fatal and only ever surfaces as an advisory
    /// (`DispatchReport::batch_partial_failure` plus a `tracing::warn!`) — this variant exists to
    /// name the error kind in the taxonomy, not because the dispatcher ever returns it as an
    /// `Err`.
    #[error(
        "batch compile exited nonzero but all {attempted} survivor(s) were recovered by the \
         fallback pool ({failed} initially missing)"
    )]
    PartialBatchFailure { attempted: usize, failed: usize },

    #[error("failed to archive {output}: librarian exited with {status}")]
    Archive { output: PathBuf, status: ExitStatus },

    #[error("could not resolve toolchain: {0}")]
    Toolchain(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub fn io(source: std::io::Error, path: impl AsRef<Path>) -> Self {
        Self::Io { path: path.as_ref().to_path_buf(), source }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
