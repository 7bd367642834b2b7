//! Per-translation-unit out-of-date evaluation (C4).
//!
//! See `SPEC_FULL.md` §4.4. Dispatches across a `rayon` thread pool sized the same way the
//! teacher's `compile_parallel` sizes its own pool, fanning independent per-source checks out
//! and collecting the out-of-date verdicts.

use crate::context::BuildContext;
use crate::resolver;
use crate::workers::clamp_thread_count;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A source file judged to need recompilation, together with the object path it would produce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutOfDateSource {
    pub source: PathBuf,
    pub object: PathBuf,
}

/// Inputs the evaluator needs beyond the shared `BuildContext`: the object directory, the
/// object extension, the driving build script's path (a change to it invalidates everything),
/// and whether dependency checking is enabled at all.
pub struct EvaluationParams<'a> {
    pub sources: &'a [PathBuf],
    pub obj_dir: &'a Path,
    pub obj_extension: &'a str,
    pub build_script: &'a Path,
    pub dependency_check: bool,
    pub configured_threads: Option<usize>,
}

/// Computes the object path a source would produce, per the `objDir / basename(s) + objExt`
/// convention used throughout dispatch and evaluation.
pub fn object_path_for(source: &Path, obj_dir: &Path, obj_extension: &str) -> PathBuf {
    let stem = source.file_stem().unwrap_or_default();
    let mut name = stem.to_os_string();
    name.push(".");
    name.push(obj_extension);
    obj_dir.join(name)
}

/// Evaluates every source in `params.sources`, returning those needing recompilation.
///
/// Order of the returned list is unspecified; callers must not rely on it.
pub fn evaluate(params: &EvaluationParams<'_>, ctx: &Arc<BuildContext>) -> Vec<OutOfDateSource> {
    if !params.dependency_check {
        tracing::debug!("dependency check disabled, every source is out-of-date");
        return params
            .sources
            .iter()
            .map(|s| OutOfDateSource {
                source: s.clone(),
                object: object_path_for(s, params.obj_dir, params.obj_extension),
            })
            .collect();
    }

    let thread_count = clamp_thread_count(params.configured_threads, params.sources.len());
    let build_script_ts = ctx.timestamps.last_write_time(params.build_script);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .expect("failed to build evaluator thread pool");

    pool.install(|| {
        params
            .sources
            .par_iter()
            .filter_map(|source| {
                let object = object_path_for(source, params.obj_dir, params.obj_extension);
                if is_out_of_date(source, &object, build_script_ts, ctx) {
                    Some(OutOfDateSource { source: source.clone(), object })
                } else {
                    None
                }
            })
            .collect()
    })
}

fn is_out_of_date(
    source: &Path,
    object: &Path,
    build_script_ts: crate::cache::TimestampSeconds,
    ctx: &BuildContext,
) -> bool {
    let metadata = std::fs::metadata(object);
    let Ok(metadata) = metadata else {
        tracing::debug!(source = %source.display(), "object missing, out-of-date");
        return true;
    };
    if metadata.len() == 0 {
        tracing::debug!(source = %source.display(), "object is zero length, out-of-date");
        return true;
    }

    let obj_ts = ctx.timestamps.last_write_time(object);
    if obj_ts < build_script_ts {
        tracing::debug!(source = %source.display(), "build script newer than object, out-of-date");
        return true;
    }

    let resolved = resolver::resolve(source, ctx);
    if obj_ts < resolved.max_dep_ts {
        tracing::debug!(source = %source.display(), "dependency newer than object, out-of-date");
        return true;
    }

    tracing::trace!(source = %source.display(), "up to date");
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ctx_for(dir: &Path) -> Arc<BuildContext> {
        BuildContext::with_cache_path(dir.join("ts_cache.txt"), vec![], None)
    }

    #[test]
    fn missing_object_is_out_of_date() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.cpp");
        fs::write(&src, b"int main(){}").unwrap();
        let obj_dir = dir.path().join("obj");
        fs::create_dir_all(&obj_dir).unwrap();
        let script = dir.path().join("build.rs");
        fs::write(&script, b"").unwrap();

        let ctx = ctx_for(dir.path());
        let params = EvaluationParams {
            sources: &[src.clone()],
            obj_dir: &obj_dir,
            obj_extension: "obj",
            build_script: &script,
            dependency_check: true,
            configured_threads: Some(2),
        };

        let out = evaluate(&params, &ctx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, src);
    }

    #[test]
    fn zero_length_object_is_out_of_date() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.cpp");
        fs::write(&src, b"int main(){}").unwrap();
        let obj_dir = dir.path().join("obj");
        fs::create_dir_all(&obj_dir).unwrap();
        fs::write(obj_dir.join("a.obj"), b"").unwrap();
        let script = dir.path().join("build.rs");
        fs::write(&script, b"").unwrap();

        let ctx = ctx_for(dir.path());
        let params = EvaluationParams {
            sources: &[src],
            obj_dir: &obj_dir,
            obj_extension: "obj",
            build_script: &script,
            dependency_check: true,
            configured_threads: Some(2),
        };

        let out = evaluate(&params, &ctx);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn fresh_object_newer_than_everything_is_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("build.rs");
        fs::write(&script, b"").unwrap();
        let src = dir.path().join("a.cpp");
        fs::write(&src, b"int main(){}").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(1100));
        let obj_dir = dir.path().join("obj");
        fs::create_dir_all(&obj_dir).unwrap();
        fs::write(obj_dir.join("a.obj"), b"object bytes").unwrap();

        let ctx = ctx_for(dir.path());
        let params = EvaluationParams {
            sources: &[src],
            obj_dir: &obj_dir,
            obj_extension: "obj",
            build_script: &script,
            dependency_check: true,
            configured_threads: Some(2),
        };

        let out = evaluate(&params, &ctx);
        assert!(out.is_empty());
    }

    #[test]
    fn dependency_check_disabled_marks_everything_out_of_date() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("build.rs");
        fs::write(&script, b"").unwrap();
        let src = dir.path().join("a.cpp");
        fs::write(&src, b"int main(){}").unwrap();
        let obj_dir = dir.path().join("obj");
        fs::create_dir_all(&obj_dir).unwrap();
        fs::write(obj_dir.join("a.obj"), b"object bytes").unwrap();

        let ctx = ctx_for(dir.path());
        let params = EvaluationParams {
            sources: &[src],
            obj_dir: &obj_dir,
            obj_extension: "obj",
            build_script: &script,
            dependency_check: false,
            configured_threads: Some(2),
        };

        let out = evaluate(&params, &ctx);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn stale_dependency_forces_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("build.rs");
        fs::write(&script, b"").unwrap();
        let header = dir.path().join("a.h");
        fs::write(&header, b"int a;").unwrap();
        let src = dir.path().join("a.cpp");
        fs::write(&src, b"#include \"a.h\"\n").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(1100));
        let obj_dir = dir.path().join("obj");
        fs::create_dir_all(&obj_dir).unwrap();
        fs::write(obj_dir.join("a.obj"), b"object bytes").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(1100));
        fs::write(&header, b"int a_changed;").unwrap();

        let ctx = ctx_for(dir.path());
        let params = EvaluationParams {
            sources: &[src],
            obj_dir: &obj_dir,
            obj_extension: "obj",
            build_script: &script,
            dependency_check: true,
            configured_threads: Some(2),
        };

        let out = evaluate(&params, &ctx);
        assert_eq!(out.len(), 1);
    }
}
