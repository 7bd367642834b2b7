//! Transitive dependency resolution (C3) and the per-file sidecar dependency cache.
//!
//! See `SPEC_FULL.md` §4.3. The reference stores the sidecar on an NTFS alternate data stream;
//! this implementation always uses the portable `<file>.cppdeps` sidecar form instead (see
//! DESIGN.md), since alternate data streams aren't guaranteed on every target platform.

use crate::cache::TimestampSeconds;
use crate::context::BuildContext;
use crate::paths;
use crate::scanner::IncludeKind;
use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

pub type DependencySet = HashSet<PathBuf>;

/// Sidecar extension appended to a translation unit's path to locate its dependency cache.
pub const SIDECAR_EXTENSION: &str = "cppdeps";

#[derive(Clone, Debug)]
struct SidecarEntry {
    dep_path: PathBuf,
    dep_ts: TimestampSeconds,
}

#[derive(Clone, Debug)]
struct Sidecar {
    self_path: PathBuf,
    deps: Vec<SidecarEntry>,
}

fn sidecar_path(tu: &Path) -> PathBuf {
    let mut os = tu.as_os_str().to_owned();
    os.push(".");
    os.push(SIDECAR_EXTENSION);
    PathBuf::from(os)
}

/// Binary layout: `<lengthPrefixed selfPath><u32 count>{<lengthPrefixed depPath><u64 ts>}`.
/// Mirrors the alternate-data-stream format the reference writes, so the portable sidecar
/// carries the same on-disk shape.
fn encode_sidecar(sidecar: &Sidecar) -> Vec<u8> {
    let mut buf = Vec::new();
    write_lp_string(&mut buf, &sidecar.self_path);
    buf.extend_from_slice(&(sidecar.deps.len() as u32).to_le_bytes());
    for entry in &sidecar.deps {
        write_lp_string(&mut buf, &entry.dep_path);
        buf.extend_from_slice(&entry.dep_ts.to_le_bytes());
    }
    buf
}

fn decode_sidecar(bytes: &[u8]) -> Option<Sidecar> {
    let mut cursor = Cursor::new(bytes);
    let self_path = read_lp_string(&mut cursor)?;
    let count = read_u32(&mut cursor)?;
    let mut deps = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let dep_path = read_lp_string(&mut cursor)?;
        let dep_ts = read_u64(&mut cursor)?;
        deps.push(SidecarEntry { dep_path, dep_ts });
    }
    Some(Sidecar { self_path, deps })
}

fn write_lp_string(buf: &mut Vec<u8>, path: &Path) {
    let bytes = path.to_string_lossy();
    let bytes = bytes.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn read_lp_string(cursor: &mut Cursor<&[u8]>) -> Option<PathBuf> {
    let len = read_u32(cursor)? as usize;
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes).ok()?;
    Some(PathBuf::from(String::from_utf8(bytes).ok()?))
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Option<u32> {
    let mut bytes = [0u8; 4];
    cursor.read_exact(&mut bytes).ok()?;
    Some(u32::from_le_bytes(bytes))
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Option<u64> {
    let mut bytes = [0u8; 8];
    cursor.read_exact(&mut bytes).ok()?;
    Some(u64::from_le_bytes(bytes))
}

/// Result of resolving a translation unit's transitive dependency closure.
pub struct ResolvedDependencies {
    pub deps: DependencySet,
    pub max_dep_ts: TimestampSeconds,
}

/// Computes the transitive dependency closure of `tu`, consulting (and refreshing) the sidecar
/// cache as described in `SPEC_FULL.md` §4.3.
pub fn resolve(tu: &Path, ctx: &BuildContext) -> ResolvedDependencies {
    let tu = paths::canonicalize_lenient(tu);

    if let Some(resolved) = try_fast_path(&tu, ctx) {
        return resolved;
    }

    let mut visited = DependencySet::new();
    if let Some(pch) = &ctx.forced_pch {
        visit(&paths::canonicalize_lenient(pch), ctx, &mut visited);
    }
    visit(&tu, ctx, &mut visited);

    let max_dep_ts = visited.iter().map(|p| ctx.timestamps.last_write_time(p)).max().unwrap_or(0);

    write_sidecar(&tu, &visited, ctx);

    ResolvedDependencies { deps: visited, max_dep_ts }
}

/// Attempts the sidecar fast path: valid iff every listed dependency's current timestamp
/// matches what was recorded when the sidecar was written.
fn try_fast_path(tu: &Path, ctx: &BuildContext) -> Option<ResolvedDependencies> {
    let sidecar = load_sidecar(tu)?;
    if sidecar.self_path != *tu {
        return None;
    }

    let mut max_dep_ts = 0;
    for entry in &sidecar.deps {
        let current = ctx.timestamps.last_write_time(&entry.dep_path);
        if current != entry.dep_ts {
            return None;
        }
        max_dep_ts = max_dep_ts.max(current);
    }

    let deps = sidecar.deps.into_iter().map(|e| e.dep_path).collect();
    Some(ResolvedDependencies { deps, max_dep_ts })
}

fn load_sidecar(tu: &Path) -> Option<Sidecar> {
    let path = sidecar_path(tu);
    let contents = fs::read(path).ok()?;
    decode_sidecar(&contents)
}

/// Writing a separate sidecar file never touches `tu`'s own mtime, unlike an alternate data
/// stream on the same file — so there's nothing to preserve here.
fn write_sidecar(tu: &Path, deps: &DependencySet, ctx: &BuildContext) {
    let sidecar = Sidecar {
        self_path: tu.to_path_buf(),
        deps: deps
            .iter()
            .map(|p| SidecarEntry { dep_path: p.clone(), dep_ts: ctx.timestamps.last_write_time(p) })
            .collect(),
    };
    let path = sidecar_path(tu);
    let bytes = encode_sidecar(&sidecar);
    if let Err(err) = write_sidecar_bytes(&path, &bytes) {
        tracing::warn!(error = %err, path = %path.display(), "failed to write dependency sidecar cache");
    }
}

fn write_sidecar_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)
}

/// Removes sidecar files whose owning source no longer exists, preventing orphaned caches from
/// accumulating after sources are deleted or renamed (see DESIGN.md Open Question decision).
pub fn prune_orphaned_sidecars(search_dir: &Path) {
    let suffix = format!(".{SIDECAR_EXTENSION}");
    for entry in walkdir::WalkDir::new(search_dir).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        let Some(name) = path.to_str() else { continue };
        if !name.ends_with(&suffix) {
            continue;
        }
        let owner = PathBuf::from(&name[..name.len() - suffix.len()]);
        if !owner.exists() {
            let _ = fs::remove_file(path);
        }
    }
}

fn visit(path: &Path, ctx: &BuildContext, visited: &mut DependencySet) {
    let canonical = paths::canonicalize_lenient(path);
    if !visited.insert(canonical.clone()) {
        return;
    }

    let directives = ctx.scan_memo.scan(&canonical);
    for directive in directives {
        if let Some(resolved) = resolve_directive(&canonical, &directive.target, directive.kind, ctx)
        {
            visit(&resolved, ctx, visited);
        }
    }
}

fn resolve_directive(
    current_file: &Path,
    target: &str,
    kind: IncludeKind,
    ctx: &BuildContext,
) -> Option<PathBuf> {
    let parent = current_file.parent().unwrap_or_else(|| Path::new("."));

    match kind {
        IncludeKind::Quoted => {
            let candidate = parent.join(target);
            if is_regular_file(&candidate) {
                return Some(candidate);
            }
            resolve_angle(target, ctx).or_else(|| last_resort(parent, target))
        }
        IncludeKind::Angle => resolve_angle(target, ctx).or_else(|| last_resort(parent, target)),
    }
}

fn resolve_angle(target: &str, ctx: &BuildContext) -> Option<PathBuf> {
    ctx.include_paths.iter().map(|dir| dir.join(target)).find(|c| is_regular_file(c))
}

fn last_resort(parent: &Path, target: &str) -> Option<PathBuf> {
    let candidate = parent.join(target);
    is_regular_file(&candidate).then_some(candidate)
}

fn is_regular_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ctx_for(dir: &Path, includes: Vec<PathBuf>) -> std::sync::Arc<BuildContext> {
        BuildContext::with_cache_path(dir.join("ts_cache.txt"), includes, None)
    }

    #[test]
    fn resolves_quoted_include_relative_to_includer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.h"), b"int a;").unwrap();
        fs::write(dir.path().join("b.cpp"), b"#include \"a.h\"\n").unwrap();

        let ctx = ctx_for(dir.path(), vec![]);
        let resolved = resolve(&dir.path().join("b.cpp"), &ctx);

        assert_eq!(resolved.deps.len(), 2);
        assert!(resolved.deps.contains(&paths::canonicalize_lenient(dir.path().join("a.h"))));
    }

    #[test]
    fn resolves_angle_include_via_configured_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let inc_dir = dir.path().join("inc");
        fs::create_dir_all(&inc_dir).unwrap();
        fs::write(inc_dir.join("sys.h"), b"int x;").unwrap();
        fs::write(dir.path().join("main.cpp"), b"#include <sys.h>\n").unwrap();

        let ctx = ctx_for(dir.path(), vec![inc_dir.clone()]);
        let resolved = resolve(&dir.path().join("main.cpp"), &ctx);

        assert!(resolved.deps.contains(&paths::canonicalize_lenient(inc_dir.join("sys.h"))));
    }

    #[test]
    fn unresolvable_include_is_silently_dropped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.cpp"), b"#include <does_not_exist.h>\n").unwrap();

        let ctx = ctx_for(dir.path(), vec![]);
        let resolved = resolve(&dir.path().join("main.cpp"), &ctx);

        // only the translation unit itself.
        assert_eq!(resolved.deps.len(), 1);
    }

    #[test]
    fn cyclic_includes_terminate() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.h"), b"#include \"b.h\"\n").unwrap();
        fs::write(dir.path().join("b.h"), b"#include \"a.h\"\n").unwrap();
        fs::write(dir.path().join("main.cpp"), b"#include \"a.h\"\n").unwrap();

        let ctx = ctx_for(dir.path(), vec![]);
        let resolved = resolve(&dir.path().join("main.cpp"), &ctx);
        assert_eq!(resolved.deps.len(), 3);
    }

    #[test]
    fn sidecar_fast_path_yields_identical_set() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.h"), b"int a;").unwrap();
        fs::write(dir.path().join("b.cpp"), b"#include \"a.h\"\n").unwrap();

        let ctx = ctx_for(dir.path(), vec![]);
        let first = resolve(&dir.path().join("b.cpp"), &ctx);
        let second = resolve(&dir.path().join("b.cpp"), &ctx);

        assert_eq!(first.deps, second.deps);
        assert_eq!(first.max_dep_ts, second.max_dep_ts);
    }

    #[test]
    fn stale_sidecar_is_discarded_when_dependency_timestamp_changes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.h"), b"int a;").unwrap();
        fs::write(dir.path().join("b.cpp"), b"#include \"a.h\"\n").unwrap();

        let ctx = ctx_for(dir.path(), vec![]);
        let _ = resolve(&dir.path().join("b.cpp"), &ctx);

        std::thread::sleep(std::time::Duration::from_millis(1100));
        fs::write(dir.path().join("a.h"), b"int a_changed_content;").unwrap();

        // a fresh context clears the in-run memo so the new mtime/hash is actually observed.
        let ctx2 = ctx_for(dir.path(), vec![]);
        let resolved = resolve(&dir.path().join("b.cpp"), &ctx2);
        assert_eq!(resolved.deps.len(), 2);
    }

    #[test]
    fn prune_removes_sidecar_whose_source_was_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("gone.cpp");
        fs::write(&src, b"").unwrap();
        write_sidecar(&src, &DependencySet::new(), &ctx_for(dir.path(), vec![]));
        fs::remove_file(&src).unwrap();

        assert!(sidecar_path(&src).exists());
        prune_orphaned_sidecars(dir.path());
        assert!(!sidecar_path(&src).exists());
    }
}
