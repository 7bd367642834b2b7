//! Archive step (C7): bundles object files into a static library via the vendor archiver.
//!
//! Out of scope for deep specification; modeled as a thin `Command`-spawning wrapper sharing
//! `BuildError`'s propagation shape with the compile dispatcher. The one-shot validation pass
//! over the object list is the one place this component reuses the `rayon` data-parallel pattern
//! the compiler front-end uses for independent jobs elsewhere in this codebase (see
//! `compile/project.rs`'s `compile_parallel`) — there's no partial-failure bookkeeping to do here,
//! unlike the dispatcher's batch/fallback recovery.

use crate::error::{BuildError, Result};
use crate::toolchain::ResolvedToolchain;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Invokes the vendor archiver over `objects`, producing `output`. Fails before spawning anything
/// if an object is missing or empty (a prior compile phase should have guaranteed their
/// presence); fails after spawning if the archiver itself exits nonzero.
pub fn archive(objects: &[PathBuf], output: &Path, toolchain: &ResolvedToolchain) -> Result<()> {
    objects.par_iter().try_for_each(|obj| {
        if obj.metadata().map(|m| m.len() > 0).unwrap_or(false) {
            Ok(())
        } else {
            Err(BuildError::config(format!("archive input {} is missing or empty", obj.display())))
        }
    })?;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BuildError::io(e, parent))?;
    }

    let prelude = toolchain.env_prelude();
    let mut line = if prelude.is_empty() {
        toolchain.archiver_exe().to_string()
    } else {
        format!("{} && {}", prelude, toolchain.archiver_exe())
    };
    line.push_str(&format!(" /OUT:{}", output.display()));
    for obj in objects {
        line.push(' ');
        line.push_str(&obj.to_string_lossy());
    }
    tracing::debug!(%line, "archiving");

    let status = crate::shell::command(&line).status().map_err(|e| BuildError::io(e, output))?;
    if !status.success() {
        return Err(BuildError::Archive { output: output.to_path_buf(), status });
    }
    tracing::info!(output = %output.display(), count = objects.len(), "archived static library");
    Ok(())
}
