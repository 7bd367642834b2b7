//! Parallel compile dispatcher (C5).
//!
//! Turns an out-of-date source list into successful object files, or a fatal `BuildError`. Drives
//! the `Idle -> CheckParams -> EvaluateOutOfDate -> DeleteStaleObjects -> PchPhase -> BatchPhase ->
//! FallbackPool -> {Done, Done+Warn, FatalError}` state machine from `SPEC_FULL.md` §4.5 as a
//! sequence of `Result`-returning transitions chained with `?`, mirroring the "drive the state
//! machine to completion" shape this codebase's own compile pipeline uses (see
//! `compile/project.rs`'s `PreprocessedState -> CompiledState -> ArtifactsState` chain).

use crate::error::{BuildError, Result};
use crate::evaluator::OutOfDateSource;
use crate::task::{BuildKind, CompileTask, CrtLinkage};
use crate::toolchain::ResolvedToolchain;
use crate::workers::clamp_thread_count;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Outcome of a successful dispatch. `batch_partial_failure` tracks whether the advisory from
/// `SPEC_FULL.md` §4.5 phase 3 should be emitted.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub compiled: Vec<PathBuf>,
    pub batch_partial_failure: bool,
}

/// Runs the full compile pipeline for the sources `out_of_date` names. Returns `Ok` with an empty
/// report and no subprocess invocations when `out_of_date` is empty (§8 boundary).
pub fn dispatch(
    task: &CompileTask,
    mut out_of_date: Vec<OutOfDateSource>,
    toolchain: &ResolvedToolchain,
) -> Result<DispatchReport> {
    if out_of_date.is_empty() {
        tracing::debug!("nothing out-of-date, skipping compile dispatch entirely");
        return Ok(DispatchReport::default());
    }

    let obj_dir = task.effective_obj_dir();
    fs::create_dir_all(&obj_dir).map_err(|e| BuildError::io(e, &obj_dir))?;

    // Destroy stale objects up front so a failed retry still sees "missing object" as "must
    // rebuild" rather than silently keeping an object from a half-finished previous attempt. This
    // defeats compiler-side incremental features; kept anyway per the documented open question in
    // SPEC_FULL.md §9.
    for item in &out_of_date {
        let _ = fs::remove_file(&item.object);
    }

    let prefix = build_command_prefix(task);

    let pch_job = take_pch_job(task, &mut out_of_date);
    if let Some(pch_job) = &pch_job {
        run_pch_phase(task, pch_job, &prefix, toolchain, &obj_dir)?;
    }

    let (mut skip, batch) = partition_skip(task, out_of_date);

    let mut batch_partial_failure = false;
    if !batch.is_empty() {
        let batch_start = SystemTime::now();
        if run_batch_phase(task, &batch, &prefix, toolchain, &obj_dir).is_err() {
            let (_done, survivors) = diagnose_survivors(&batch, batch_start);
            let recovered = survivors.len();
            tracing::warn!(
                recovered,
                total = batch.len(),
                "batch compile exited nonzero; re-attempting survivors individually"
            );
            skip.extend(survivors);
            batch_partial_failure = true;
        }
    }

    if !skip.is_empty() {
        run_fallback_pool(task, &skip, &prefix, toolchain)?;
        if batch_partial_failure {
            tracing::warn!(
                "batch compile recovered via the fallback pool; consider adding the affected \
                 sources to mpSkipFiles to skip batch mode for them in future runs"
            );
        }
    }

    let mut compiled: Vec<PathBuf> =
        pch_job.iter().chain(batch.iter()).chain(skip.iter()).map(|s| s.object.clone()).collect();
    compiled.sort();
    compiled.dedup();

    Ok(DispatchReport { compiled, batch_partial_failure })
}

/// Builds the command-line prefix shared by every compiler invocation in this task: includes,
/// defines, warning flags, CRT selection, optimization/debug info, plus the `FB_COMPILER`/
/// `FB_COMPILER_DEBUG`/`FB_COMPILER_RELEASE` environment-variable overrides from §6.
fn build_command_prefix(task: &CompileTask) -> Vec<String> {
    let mut args = Vec::new();

    for include in &task.includes {
        args.push(format!("/I{}", include.display()));
    }
    for define in &task.defines {
        args.push(format!("/D{define}"));
    }

    args.push(format!("/W{}", task.warn_level.min(4)));
    if task.warning_as_error {
        args.push("/WX".to_string());
    }
    for code in &task.warning_disable {
        args.push(format!("/wd{code}"));
    }

    args.push(crt_flag(task.crt, task.build).to_string());
    match task.build {
        BuildKind::Debug => args.extend(["/Od".to_string(), "/Zi".to_string()]),
        BuildKind::Release => args.push("/O2".to_string()),
    }

    if task.has_pch() {
        args.push(format!("/Yu{}", task.precompiled_header.as_ref().unwrap().display()));
    }

    if !task.args.trim().is_empty() {
        args.extend(task.args.split_whitespace().map(str::to_string));
    }

    if let Ok(global) = std::env::var("FB_COMPILER") {
        args.extend(global.split_whitespace().map(str::to_string));
    }
    if let Ok(selective) = std::env::var(task.build.env_override_var()) {
        args.extend(selective.split_whitespace().map(str::to_string));
    }

    args
}

fn crt_flag(crt: CrtLinkage, build: BuildKind) -> &'static str {
    match (crt, build) {
        (CrtLinkage::Static, BuildKind::Debug) => "/MTd",
        (CrtLinkage::Static, BuildKind::Release) => "/MT",
        (CrtLinkage::Dynamic, BuildKind::Debug) => "/MDd",
        (CrtLinkage::Dynamic, BuildKind::Release) => "/MD",
    }
}

/// Pulls the PCH-implementing source out of `out_of_date` if both it and the header are
/// configured and it's actually due for recompilation. The header itself is never a translation
/// unit and never appears in `out_of_date`.
fn take_pch_job(task: &CompileTask, out_of_date: &mut Vec<OutOfDateSource>) -> Option<OutOfDateSource> {
    let pch_source = task.precompiled_source.as_ref()?;
    if task.precompiled_header.is_none() {
        return None;
    }
    let pos = out_of_date.iter().position(|s| &s.source == pch_source)?;
    Some(out_of_date.remove(pos))
}

fn run_pch_phase(
    task: &CompileTask,
    pch_job: &OutOfDateSource,
    prefix: &[String],
    toolchain: &ResolvedToolchain,
    obj_dir: &Path,
) -> Result<()> {
    let pch_header = task.precompiled_header.as_ref().expect("checked by take_pch_job");
    let pch_file = obj_dir.join("fbuild.pch");
    let _ = fs::remove_file(&pch_file);

    let mut args = prefix.to_vec();
    args.push(format!("/Yc{}", pch_header.display()));
    args.push(format!("/Fp{}", pch_file.display()));
    args.push(format!("/Fo{}", pch_job.object.display()));
    args.push(pch_job.source.to_string_lossy().into_owned());

    tracing::debug!(source = %pch_job.source.display(), "compiling precompiled header");
    let status = spawn_compile(toolchain, &args)
        .map_err(|e| BuildError::io(e, &pch_job.source))?;
    if !status.success() {
        return Err(BuildError::Compile { file: pch_job.source.clone(), status });
    }
    Ok(())
}

/// Splits `sources` into `(skip, batch)`, where `skip` is every source configured in
/// `mpSkipFiles` (never eligible for batch mode) and `batch` is everything else.
fn partition_skip(
    task: &CompileTask,
    sources: Vec<OutOfDateSource>,
) -> (Vec<OutOfDateSource>, Vec<OutOfDateSource>) {
    sources.into_iter().partition(|s| task.mp_skip_files.contains(&s.source))
}

fn run_batch_phase(
    task: &CompileTask,
    batch: &[OutOfDateSource],
    prefix: &[String],
    toolchain: &ResolvedToolchain,
    obj_dir: &Path,
) -> Result<()> {
    let response_path = obj_dir.join("fbuild_batch.rsp");
    let mut contents = String::new();
    for item in batch {
        contents.push('"');
        contents.push_str(&item.source.to_string_lossy());
        contents.push_str("\" ");
    }
    fs::write(&response_path, contents).map_err(|e| BuildError::io(e, &response_path))?;

    let thread_count = clamp_thread_count(task.configured_threads(), batch.len());

    let mut args = prefix.to_vec();
    args.push(toolchain.batch_flag(thread_count));
    args.push(format!("/Fo{}{}", obj_dir.display(), std::path::MAIN_SEPARATOR));
    args.push(format!("@{}", response_path.display()));

    tracing::debug!(count = batch.len(), thread_count, "running batched compile");
    let status = spawn_compile(toolchain, &args)
        .map_err(|e| BuildError::io(e, &response_path))?;
    if !status.success() {
        return Err(BuildError::Compile { file: response_path, status });
    }
    Ok(())
}

/// Determines which of `batch`'s objects were actually produced by the just-finished batch run,
/// by comparing object mtimes against the timestamp the batch started at — the only reliable
/// post-mortem, since the dispatcher cannot assume batch mode preserves source order or reports
/// per-source failure.
fn diagnose_survivors(
    batch: &[OutOfDateSource],
    batch_start: SystemTime,
) -> (Vec<OutOfDateSource>, Vec<OutOfDateSource>) {
    let mut done = Vec::new();
    let mut survivors = Vec::new();
    for item in batch {
        let built_after_start = fs::metadata(&item.object)
            .and_then(|m| m.modified())
            .map(|modified| modified >= batch_start)
            .unwrap_or(false);
        if built_after_start {
            done.push(item.clone());
        } else {
            survivors.push(item.clone());
        }
    }
    (done, survivors)
}

/// Single-source fallback compile pool. The pre-shuffled queue is fanned across a sized `rayon`
/// pool (same shape as the teacher's `compile_parallel`); the shuffle breaks ordering-dependent
/// livelocks if a specific source position is what triggers a deterministic compiler crash. Every
/// item runs to completion even after failures, so every failing source gets a diagnostic in one
/// run.
fn run_fallback_pool(
    task: &CompileTask,
    skip: &[OutOfDateSource],
    prefix: &[String],
    toolchain: &ResolvedToolchain,
) -> Result<()> {
    let mut shuffled = skip.to_vec();
    shuffled.shuffle(&mut rand::thread_rng());
    let thread_count = clamp_thread_count(task.configured_threads(), skip.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .expect("failed to build fallback compile thread pool");

    let failed = pool.install(|| {
        shuffled
            .into_par_iter()
            .filter(|item| match compile_single(item, prefix, toolchain) {
                Ok(()) => {
                    tracing::debug!(source = %item.source.display(), "fallback compile ok");
                    false
                }
                Err(err) => {
                    tracing::error!(source = %item.source.display(), %err, "fallback compile failed");
                    true
                }
            })
            .count()
    });

    if failed > 0 {
        return Err(BuildError::CompileFailed { attempted: skip.len(), failed });
    }
    Ok(())
}

fn compile_single(item: &OutOfDateSource, prefix: &[String], toolchain: &ResolvedToolchain) -> Result<()> {
    let mut args = prefix.to_vec();
    args.push("/c".to_string());
    args.push(format!("/Fo{}", item.object.display()));
    args.push(item.source.to_string_lossy().into_owned());

    let status = spawn_compile(toolchain, &args).map_err(|e| BuildError::io(e, &item.source))?;
    if !status.success() {
        return Err(BuildError::Compile { file: item.source.clone(), status });
    }
    Ok(())
}

/// Chains the toolchain's environment-priming prelude with the actual compiler invocation via a
/// shell, since the prelude (§4.6) is itself a shell fragment rather than a `Command` this crate
/// can spawn directly. The prelude is empty when a `compiler_override` is configured (tests
/// pointing at a stub compiler), in which case no `&&` is prepended.
fn spawn_compile(toolchain: &ResolvedToolchain, args: &[String]) -> std::io::Result<std::process::ExitStatus> {
    let prelude = toolchain.env_prelude();
    let mut line = if prelude.is_empty() {
        toolchain.compiler_exe()
    } else {
        format!("{} && {}", prelude, toolchain.compiler_exe())
    };
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    tracing::trace!(%line, "spawning compiler");

    crate::shell::command(&line).status()
}
