//! Tree walking and sidecar load policy.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::dirdb::{self, DirDbData, SIDECAR_NAME};
use crate::error::Result;
use crate::progress::ProgressSink;
use crate::scan::{self, build_dir_db};

/// How the walker treats each directory's sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Read an existing sidecar, build one only when missing.
    Read,
    /// Rebuild every sidecar from scratch, overwriting existing ones.
    ForceCreate,
    /// Rebuild every sidecar, reusing cached hashes whose
    /// (inode, size, date) triple still matches.
    Update,
}

/// Load or build the sidecar of a single directory according to `mode`.
pub fn load_dir(
    dir_path: &Path,
    mode: LoadMode,
    buf_size: usize,
    sink: &mut dyn ProgressSink,
) -> Result<DirDbData> {
    let db_path = dir_path.join(SIDECAR_NAME);
    match mode {
        LoadMode::Read => {
            if db_path.exists() {
                let data = dirdb::read(dir_path)?;
                sink.dir_started(dir_path);
                let total_bytes = data.files.iter().map(|f| f.size).sum();
                sink.dir_loaded(data.files.len() as u64, total_bytes);
                Ok(data)
            } else {
                build_dir_db(dir_path, None, buf_size, sink)
            }
        }
        LoadMode::ForceCreate => build_dir_db(dir_path, None, buf_size, sink),
        LoadMode::Update => {
            if db_path.exists() {
                let existing = dirdb::read(dir_path)?;
                let cache = scan::reuse_cache(&existing);
                build_dir_db(dir_path, Some(&cache), buf_size, sink)
            } else {
                build_dir_db(dir_path, None, buf_size, sink)
            }
        }
    }
}

/// Recursively process a root: the root directory first, then every
/// subdirectory depth-first.
///
/// Entries that cannot be visited (typically permission denied) are skipped
/// with a diagnostic through the sink; indexing failures abort the walk.
pub fn process_tree(
    root: &Path,
    mode: LoadMode,
    buf_size: usize,
    sink: &mut dyn ProgressSink,
) -> Result<Vec<DirDbData>> {
    let mut dirs = vec![load_dir(root, mode, buf_size, sink)?];
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                sink.entry_skipped(&path, &e.to_string());
                continue;
            }
        };
        if entry.file_type().is_dir() {
            dirs.push(load_dir(entry.path(), mode, buf_size, sink)?);
        }
    }
    Ok(dirs)
}

/// Recursively delete sidecar files under `root`.
///
/// Returns the sidecar paths that were removed, or would be removed when
/// `dry_run` is set.
pub fn remove_sidecars(root: &Path, dry_run: bool, sink: &mut dyn ProgressSink) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let mut remove_in = |dir: &Path| -> Result<()> {
        let db_path = dir.join(SIDECAR_NAME);
        if db_path.exists() {
            if !dry_run {
                std::fs::remove_file(&db_path)
                    .map_err(|e| crate::error::Error::io_at(&db_path, e))?;
            }
            removed.push(db_path);
        }
        Ok(())
    };

    remove_in(root)?;
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                sink.entry_skipped(&path, &e.to_string());
                continue;
            }
        };
        if entry.file_type().is_dir() {
            remove_in(entry.path())?;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgress;
    use std::fs;
    use tempfile::TempDir;

    fn make_tree(root: &Path) {
        fs::write(root.join("top"), b"top").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub").join("inner"), b"inner").unwrap();
        fs::create_dir(root.join("sub").join("deep")).unwrap();
        fs::write(root.join("sub").join("deep").join("leaf"), b"leaf").unwrap();
    }

    #[test]
    fn test_process_tree_visits_every_directory() {
        let temp_dir = TempDir::new().unwrap();
        make_tree(temp_dir.path());

        let dirs = process_tree(
            temp_dir.path(),
            LoadMode::Read,
            scan::DEFAULT_BUF_SIZE,
            &mut NullProgress,
        )
        .unwrap();
        assert_eq!(dirs.len(), 3);
        // Root comes first.
        assert!(dirs[0].path.ends_with(temp_dir.path().file_name().unwrap()));
        assert!(temp_dir.path().join(SIDECAR_NAME).exists());
        assert!(temp_dir.path().join("sub").join(SIDECAR_NAME).exists());
        assert!(temp_dir
            .path()
            .join("sub")
            .join("deep")
            .join(SIDECAR_NAME)
            .exists());
    }

    #[test]
    fn test_read_mode_uses_existing_sidecar() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a"), b"abc").unwrap();

        let first = process_tree(
            temp_dir.path(),
            LoadMode::Read,
            scan::DEFAULT_BUF_SIZE,
            &mut NullProgress,
        )
        .unwrap();
        assert_eq!(first[0].hashed_bytes, 3);

        // Second read run loads from disk: nothing is hashed.
        let second = process_tree(
            temp_dir.path(),
            LoadMode::Read,
            scan::DEFAULT_BUF_SIZE,
            &mut NullProgress,
        )
        .unwrap();
        assert_eq!(second[0].hashed_bytes, 0);
        assert_eq!(second[0].files, first[0].files);
    }

    #[test]
    fn test_force_create_rehashes() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a"), b"abc").unwrap();

        process_tree(
            temp_dir.path(),
            LoadMode::Read,
            scan::DEFAULT_BUF_SIZE,
            &mut NullProgress,
        )
        .unwrap();
        let forced = process_tree(
            temp_dir.path(),
            LoadMode::ForceCreate,
            scan::DEFAULT_BUF_SIZE,
            &mut NullProgress,
        )
        .unwrap();
        assert_eq!(forced[0].hashed_bytes, 3);

        // force-create twice is idempotent on content.
        let again = process_tree(
            temp_dir.path(),
            LoadMode::ForceCreate,
            scan::DEFAULT_BUF_SIZE,
            &mut NullProgress,
        )
        .unwrap();
        assert_eq!(again[0].files, forced[0].files);
    }

    #[test]
    fn test_update_mode_reuses_unchanged_hashes() {
        let temp_dir = TempDir::new().unwrap();
        make_tree(temp_dir.path());

        process_tree(
            temp_dir.path(),
            LoadMode::Read,
            scan::DEFAULT_BUF_SIZE,
            &mut NullProgress,
        )
        .unwrap();

        // Nothing changed: an update hashes zero bytes anywhere.
        let updated = process_tree(
            temp_dir.path(),
            LoadMode::Update,
            scan::DEFAULT_BUF_SIZE,
            &mut NullProgress,
        )
        .unwrap();
        for dir in &updated {
            assert_eq!(dir.hashed_bytes, 0, "rehash in {:?}", dir.path);
        }
    }

    #[test]
    fn test_update_mode_without_sidecar_builds_fresh() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a"), b"abc").unwrap();

        let dirs = process_tree(
            temp_dir.path(),
            LoadMode::Update,
            scan::DEFAULT_BUF_SIZE,
            &mut NullProgress,
        )
        .unwrap();
        assert_eq!(dirs[0].hashed_bytes, 3);
    }

    #[test]
    fn test_remove_sidecars() {
        let temp_dir = TempDir::new().unwrap();
        make_tree(temp_dir.path());
        process_tree(
            temp_dir.path(),
            LoadMode::Read,
            scan::DEFAULT_BUF_SIZE,
            &mut NullProgress,
        )
        .unwrap();

        let planned = remove_sidecars(temp_dir.path(), true, &mut NullProgress).unwrap();
        assert_eq!(planned.len(), 3);
        assert!(temp_dir.path().join(SIDECAR_NAME).exists());

        let removed = remove_sidecars(temp_dir.path(), false, &mut NullProgress).unwrap();
        assert_eq!(removed, planned);
        assert!(!temp_dir.path().join(SIDECAR_NAME).exists());
        assert!(!temp_dir.path().join("sub").join(SIDECAR_NAME).exists());
    }
}
