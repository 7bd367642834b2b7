//! Persistent last-write-time / content-hash cache (C1).
//!
//! Stabilizes timestamp reads across a single run and across runs of the build engine, so that
//! touched-but-content-unchanged files don't force spurious rebuilds. See `SPEC_FULL.md` §4.1.

use crate::paths;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

/// Unix whole-second modification time. Zero means "unavailable/nonexistent".
pub type TimestampSeconds = u64;

/// A 64-character lowercase hex SHA-256 digest.
pub type ContentHash = String;

pub const CACHE_FILE_NAME: &str = "FBuild_TimestampCache_v1.txt";

#[derive(Clone, Debug, PartialEq, Eq)]
struct PersistedEntry {
    ts: TimestampSeconds,
    hash: ContentHash,
}

/// The persistent, cross-run, thread-safe timestamp/hash cache.
///
/// One instance is shared (via `Arc`) across all workers in a build; `lastWriteTime` may be
/// called concurrently from any of them.
pub struct TimestampCache {
    path: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    /// In-run memo: once a path has been resolved during this run, the answer never changes.
    memo: HashMap<PathBuf, TimestampSeconds>,
    /// Cross-run persisted entries, keyed by canonical path.
    persisted: HashMap<PathBuf, PersistedEntry>,
    dirty: bool,
}

impl TimestampCache {
    /// Loads the cache from the given file, or starts empty if it doesn't exist or is corrupt.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let persisted = match fs::read_to_string(&path) {
            Ok(contents) => parse_cache_text(&contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                tracing::warn!(error = %err, path = %path.display(), "failed to read timestamp cache, starting empty");
                HashMap::new()
            }
        };

        Self { path, inner: Mutex::new(Inner { memo: HashMap::new(), persisted, dirty: false }) }
    }

    /// Loads the cache from the platform temp directory using the well-known filename.
    pub fn load_default() -> Self {
        Self::load(std::env::temp_dir().join(CACHE_FILE_NAME))
    }

    /// Resolves the stable "last write time" for `path` as described in `SPEC_FULL.md` §4.1.
    ///
    /// `path` must already be canonicalized by the caller (the resolver/evaluator own that).
    pub fn last_write_time(&self, path: &Path) -> TimestampSeconds {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&ts) = inner.memo.get(path) {
            return ts;
        }

        let hashable = paths::is_hashable_source(path);
        let ts = if hashable {
            self.resolve_hashable(&mut inner, path)
        } else {
            read_raw_mtime(path).unwrap_or(0)
        };

        inner.memo.insert(path.to_path_buf(), ts);
        ts
    }

    fn resolve_hashable(&self, inner: &mut Inner, path: &Path) -> TimestampSeconds {
        let Some(t_fs) = read_raw_mtime(path) else { return 0 };

        match inner.persisted.get(path).cloned() {
            None => {
                let hash = hash_file(path).unwrap_or_default();
                inner.persisted.insert(path.to_path_buf(), PersistedEntry { ts: t_fs, hash });
                inner.dirty = true;
                t_fs
            }
            Some(entry) if t_fs > entry.ts => {
                let hash = hash_file(path).unwrap_or_default();
                let new_ts = if hash == entry.hash { entry.ts } else { t_fs };
                let new_hash = if hash == entry.hash { entry.hash } else { hash };
                inner
                    .persisted
                    .insert(path.to_path_buf(), PersistedEntry { ts: new_ts, hash: new_hash });
                inner.dirty = true;
                new_ts
            }
            Some(entry) => entry.ts,
        }
    }

    /// Flushes dirty entries to disk, merging against any concurrent external writer by taking
    /// the greater of the two stored timestamps per path (last-writer-wins on the newer mtime).
    ///
    /// A no-op if nothing changed this run. I/O failures are logged and swallowed: a build must
    /// never fail because the cache couldn't be written.
    pub fn flush(&self) {
        let inner = self.inner.lock().unwrap();
        if !inner.dirty {
            return;
        }

        let mut merged = match fs::read_to_string(&self.path) {
            Ok(contents) => parse_cache_text(&contents),
            Err(_) => HashMap::new(),
        };

        for (path, entry) in &inner.persisted {
            match merged.get(path) {
                Some(on_disk) if on_disk.ts > entry.ts => {}
                _ => {
                    merged.insert(path.clone(), entry.clone());
                }
            }
        }

        if let Err(err) = write_cache_text(&self.path, &merged) {
            tracing::error!(error = %err, path = %self.path.display(), "failed to write timestamp cache");
        }
    }
}

impl Drop for TimestampCache {
    fn drop(&mut self) {
        self.flush();
    }
}

fn read_raw_mtime(path: &Path) -> Option<TimestampSeconds> {
    let metadata = fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    let secs = modified.duration_since(SystemTime::UNIX_EPOCH).ok()?.as_secs();
    Some(secs)
}

fn hash_file(path: &Path) -> Option<ContentHash> {
    let contents = fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Some(hex::encode(hasher.finalize()))
}

/// Parses the plain-text persistence format: `<quoted path> <ts> <hex hash>` per line.
/// Malformed lines are skipped; entries for non-whitelisted extensions are dropped.
fn parse_cache_text(contents: &str) -> HashMap<PathBuf, PersistedEntry> {
    let mut out = HashMap::new();
    for line in contents.lines() {
        let Some(record) = parse_cache_line(line) else { continue };
        let (path, entry) = record;
        if paths::is_hashable_source(&path) {
            out.insert(path, entry);
        }
    }
    out
}

fn parse_cache_line(line: &str) -> Option<(PathBuf, PersistedEntry)> {
    let line = line.trim();
    if !line.starts_with('"') {
        return None;
    }
    let rest = &line[1..];
    let end_quote = rest.find('"')?;
    let path = PathBuf::from(&rest[..end_quote]);
    let mut fields = rest[end_quote + 1..].split_whitespace();
    let ts: TimestampSeconds = fields.next()?.parse().ok()?;
    let hash = fields.next()?.to_string();
    if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some((path, PersistedEntry { ts, hash }))
}

fn write_cache_text(path: &Path, entries: &HashMap<PathBuf, PersistedEntry>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut buf = String::new();
    for (path, entry) in entries {
        buf.push('"');
        buf.push_str(&path.to_string_lossy());
        buf.push_str("\" ");
        buf.push_str(&entry.ts.to_string());
        buf.push(' ');
        buf.push_str(&entry.hash);
        buf.push('\n');
    }
    let mut file = fs::File::create(path)?;
    file.write_all(buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn round_trips_through_text_format() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.txt");

        let mut entries = HashMap::new();
        entries.insert(
            PathBuf::from("/src/a.h"),
            PersistedEntry { ts: 123, hash: "a".repeat(64) },
        );
        write_cache_text(&cache_path, &entries).unwrap();

        let text = fs::read_to_string(&cache_path).unwrap();
        let parsed = parse_cache_text(&text);
        assert_eq!(parsed, entries);
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let text = "garbage line\n\"/src/a.h\" 1 tooShort\n\"/src/b.h\" 7 ".to_string()
            + &"f".repeat(64);
        let parsed = parse_cache_text(&text);
        assert_eq!(parsed.len(), 1);
        assert!(parsed.contains_key(Path::new("/src/b.h")));
    }

    #[test]
    fn content_unchanged_touch_does_not_move_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("h.h");
        fs::write(&file, b"same content").unwrap();

        let cache = TimestampCache::load(dir.path().join("cache.txt"));
        let first = cache.last_write_time(&file);
        cache.flush();

        // simulate a touch: rewrite identical bytes, which on most filesystems bumps mtime.
        thread::sleep(Duration::from_millis(1100));
        fs::write(&file, b"same content").unwrap();

        let cache2 = TimestampCache::load(dir.path().join("cache.txt"));
        let second = cache2.last_write_time(&file);
        assert_eq!(first, second);
    }

    #[test]
    fn content_change_advances_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("h.h");
        fs::write(&file, b"v1").unwrap();

        let cache = TimestampCache::load(dir.path().join("cache.txt"));
        let first = cache.last_write_time(&file);
        cache.flush();

        thread::sleep(Duration::from_millis(1100));
        fs::write(&file, b"v2 different length").unwrap();

        let cache2 = TimestampCache::load(dir.path().join("cache.txt"));
        let second = cache2.last_write_time(&file);
        assert!(second > first);
    }

    #[test]
    fn non_whitelisted_extension_is_not_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.obj");
        fs::write(&file, b"binary").unwrap();

        let cache = TimestampCache::load(dir.path().join("cache.txt"));
        let ts = cache.last_write_time(&file);
        assert!(ts > 0);
        cache.flush();
        // non-hashable files never get a persisted entry.
        let contents = fs::read_to_string(dir.path().join("cache.txt")).unwrap_or_default();
        assert!(contents.is_empty());
    }

    #[test]
    fn in_run_memo_is_stable_within_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("h.h");
        fs::write(&file, b"v1").unwrap();

        let cache = TimestampCache::load(dir.path().join("cache.txt"));
        let first = cache.last_write_time(&file);

        // content changes mid-run, but the memo should freeze the answer.
        fs::write(&file, b"v2-totally-different").unwrap();
        let second = cache.last_write_time(&file);
        assert_eq!(first, second);
    }
}
