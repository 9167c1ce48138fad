//! Directory indexer: scan one directory and rebuild its sidecar.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::Instant;

use crate::dirdb::{self, DirDbData, FileEntry, SIDECAR_NAME};
use crate::error::{Error, Result};
use crate::hash::{Hash128, Hasher128};
use crate::paths::normalize_path;
use crate::progress::ProgressSink;

/// Default read buffer size for hashing (1 MiB).
pub const DEFAULT_BUF_SIZE: usize = 1024 * 1024;

/// Seconds between the Windows epoch (1601-01-01) and the Unix epoch.
const WINDOWS_TO_UNIX_EPOCH: u64 = 11_644_473_600;

/// Lookup key for reusing a previously computed hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashReuseKey {
    pub inode: u64,
    pub size: u64,
    pub date: u64,
}

/// Map from reuse key to the prior entry, built from an existing sidecar.
pub type ReuseCache = HashMap<HashReuseKey, FileEntry>;

/// Build a reuse cache from previously loaded directory data.
pub fn reuse_cache(data: &DirDbData) -> ReuseCache {
    let mut cache = ReuseCache::with_capacity(data.files.len());
    for entry in &data.files {
        let key = HashReuseKey {
            inode: entry.inode,
            size: entry.size,
            date: entry.date,
        };
        cache.insert(key, entry.clone());
    }
    cache
}

/// Convert a Unix timestamp to FILETIME ticks (100 ns since 1601-01-01 UTC).
///
/// Negative seconds clamp to 0.
pub fn filetime_from_unix(seconds: i64, nanoseconds: u32) -> u64 {
    if seconds < 0 {
        return 0;
    }
    (seconds as u64 + WINDOWS_TO_UNIX_EPOCH) * 10_000_000 + (nanoseconds as u64) / 100
}

#[cfg(unix)]
fn stat_fields(metadata: &fs::Metadata) -> (u64, u64, u64) {
    use std::os::unix::fs::MetadataExt;
    let nanos = metadata.mtime_nsec().clamp(0, 999_999_999) as u32;
    (
        metadata.ino(),
        metadata.nlink(),
        filetime_from_unix(metadata.mtime(), nanos),
    )
}

#[cfg(not(unix))]
fn stat_fields(metadata: &fs::Metadata) -> (u64, u64, u64) {
    use std::time::UNIX_EPOCH;
    let date = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| filetime_from_unix(d.as_secs() as i64, d.subsec_nanos()))
        .unwrap_or(0);
    (0, 1, date)
}

fn hash_file(
    path: &Path,
    size: u64,
    buf_size: usize,
    sink: &mut dyn ProgressSink,
) -> Result<(Hash128, u64, f64)> {
    let mut file = fs::File::open(path).map_err(|e| Error::io_at(path, e))?;
    sink.hash_started(path, size);
    let mut hasher = Hasher128::new();
    let mut buffer = vec![0u8; buf_size];
    let mut total = 0u64;
    let start = Instant::now();
    loop {
        let count = file.read(&mut buffer).map_err(|e| Error::io_at(path, e))?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
        total += count as u64;
        sink.hash_progress(count as u64);
    }
    let seconds = start.elapsed().as_secs_f64();
    sink.hash_finished();
    Ok((hasher.finalize(), total, seconds))
}

/// Scan `dir_path` (non-recursively), rebuild its sidecar and return the
/// fresh directory data.
///
/// Entries named `.dirdb` and entries that are not regular files are
/// skipped. When a reuse cache is given, a file whose `(inode, size, date)`
/// triple matches a cached entry keeps the cached hash instead of being
/// read. Failure to open or stat a file aborts the whole scan; only
/// permission-denied directory entries are silently skipped.
pub fn build_dir_db(
    dir_path: &Path,
    cache: Option<&ReuseCache>,
    buf_size: usize,
    sink: &mut dyn ProgressSink,
) -> Result<DirDbData> {
    sink.scan_started(dir_path);
    sink.dir_started(dir_path);

    let mut entries: Vec<FileEntry> = Vec::new();
    let mut hashed_bytes = 0u64;
    let mut hash_seconds = 0.0f64;

    let iter = fs::read_dir(dir_path).map_err(|e| Error::io_at(dir_path, e))?;
    for dirent in iter {
        let dirent = match dirent {
            Ok(dirent) => dirent,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                sink.entry_skipped(dir_path, "permission denied");
                continue;
            }
            Err(e) => return Err(Error::io_at(dir_path, e)),
        };
        let name = match dirent.file_name().into_string() {
            Ok(name) => name,
            Err(_) => {
                return Err(Error::path(
                    dirent.path(),
                    "file name is not valid UTF-8",
                ));
            }
        };
        if name == SIDECAR_NAME {
            continue;
        }
        // file_type() does not follow symlinks, so links never count as
        // regular files here.
        let file_type = dirent
            .file_type()
            .map_err(|e| Error::io_at(dirent.path(), e))?;
        if !file_type.is_file() {
            continue;
        }
        let metadata = dirent
            .metadata()
            .map_err(|e| Error::io_at(dirent.path(), e))?;
        let size = metadata.len();
        sink.file_seen(size);
        let (inode, num_links, date) = stat_fields(&metadata);

        let key = HashReuseKey { inode, size, date };
        let cached_hash = cache.and_then(|c| c.get(&key)).map(|entry| entry.hash);
        let hash = match cached_hash {
            Some(hash) => hash,
            None => {
                let (hash, bytes, seconds) =
                    hash_file(&dirent.path(), size, buf_size, sink)?;
                hashed_bytes += bytes;
                hash_seconds += seconds;
                hash
            }
        };

        entries.push(FileEntry {
            name,
            size,
            hash,
            inode,
            date,
            num_links,
        });
    }
    sink.dir_finished();

    dirdb::sort_entries(&mut entries);
    let payload = dirdb::encode(&entries);
    let db_size = dirdb::write_sidecar(dir_path, &payload)?;

    Ok(DirDbData {
        path: normalize_path(dir_path),
        files: entries,
        db_size,
        hashed_bytes,
        hash_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgress;
    use tempfile::TempDir;

    fn build(dir: &Path) -> DirDbData {
        build_dir_db(dir, None, DEFAULT_BUF_SIZE, &mut NullProgress).unwrap()
    }

    #[test]
    fn test_scan_single_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), b"abc").unwrap();

        let data = build(temp_dir.path());
        assert_eq!(data.files.len(), 1);
        assert_eq!(data.files[0].name, "a.txt");
        assert_eq!(data.files[0].size, 3);
        assert_eq!(data.files[0].hash, Hasher128::hash_bytes(b"abc"));
        assert_eq!(data.hashed_bytes, 3);
        assert!(temp_dir.path().join(SIDECAR_NAME).exists());
        assert_eq!(
            data.db_size,
            fs::metadata(temp_dir.path().join(SIDECAR_NAME)).unwrap().len()
        );
    }

    #[test]
    fn test_scan_orders_by_size_then_name() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("z"), b"1").unwrap();
        fs::write(temp_dir.path().join("a"), b"22").unwrap();
        fs::write(temp_dir.path().join("m"), b"3").unwrap();

        let data = build(temp_dir.path());
        let names: Vec<&str> = data.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["m", "z", "a"]);
        let sizes: Vec<u64> = data.files.iter().map(|f| f.size).collect();
        assert_eq!(sizes, [1, 1, 2]);
    }

    #[test]
    fn test_scan_skips_sidecar_and_non_regular_entries() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("kept"), b"x").unwrap();
        fs::create_dir(temp_dir.path().join("subdir")).unwrap();
        // A pre-existing sidecar must never index itself.
        fs::write(temp_dir.path().join(SIDECAR_NAME), b"junk").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("kept", temp_dir.path().join("link")).unwrap();

        let data = build(temp_dir.path());
        let names: Vec<&str> = data.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["kept"]);
    }

    #[test]
    fn test_rebuilt_sidecar_roundtrips() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("one"), b"abc").unwrap();
        fs::write(temp_dir.path().join("two"), b"defg").unwrap();

        let built = build(temp_dir.path());
        let loaded = dirdb::read(temp_dir.path()).unwrap();
        assert_eq!(loaded.files, built.files);
        assert_eq!(loaded.path, built.path);
        assert_eq!(loaded.db_size, built.db_size);
        // Performance counters are zero on a plain load.
        assert_eq!(loaded.hashed_bytes, 0);
        assert_eq!(loaded.hash_seconds, 0.0);
    }

    #[test]
    fn test_reuse_cache_skips_hashing_unchanged_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a"), b"abc").unwrap();
        fs::write(temp_dir.path().join("b"), b"defg").unwrap();

        let first = build(temp_dir.path());
        assert_eq!(first.hashed_bytes, 7);

        let cache = reuse_cache(&first);
        let second =
            build_dir_db(temp_dir.path(), Some(&cache), DEFAULT_BUF_SIZE, &mut NullProgress)
                .unwrap();
        assert_eq!(second.hashed_bytes, 0);
        assert_eq!(second.files, first.files);
    }

    #[test]
    fn test_reuse_cache_rehashes_changed_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a"), b"abc").unwrap();
        fs::write(temp_dir.path().join("b"), b"defg").unwrap();

        let first = build(temp_dir.path());
        let cache = reuse_cache(&first);

        // A size change guarantees a reuse-key miss for this file.
        fs::write(temp_dir.path().join("b"), b"changed!").unwrap();
        let second =
            build_dir_db(temp_dir.path(), Some(&cache), DEFAULT_BUF_SIZE, &mut NullProgress)
                .unwrap();
        assert_eq!(second.hashed_bytes, 8);
        let b = second.files.iter().find(|f| f.name == "b").unwrap();
        assert_eq!(b.hash, Hasher128::hash_bytes(b"changed!"));
    }

    #[test]
    fn test_filetime_conversion() {
        assert_eq!(filetime_from_unix(-5, 0), 0);
        assert_eq!(filetime_from_unix(0, 0), 116_444_736_000_000_000);
        assert_eq!(filetime_from_unix(0, 150), 116_444_736_000_000_001);
        assert_eq!(
            filetime_from_unix(1, 0),
            116_444_736_000_000_000 + 10_000_000
        );
    }

    #[test]
    fn test_empty_directory_produces_empty_sidecar() {
        let temp_dir = TempDir::new().unwrap();
        let data = build(temp_dir.path());
        assert!(data.files.is_empty());
        let loaded = dirdb::read(temp_dir.path()).unwrap();
        assert!(loaded.files.is_empty());
    }
}
