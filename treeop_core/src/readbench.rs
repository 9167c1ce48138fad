//! Raw read throughput measurement.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

use walkdir::WalkDir;

use crate::dirdb::SIDECAR_NAME;
use crate::error::{Error, Result};
use crate::progress::ProgressSink;

/// Accumulated figures of a readbench run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReadBenchStats {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
    pub seconds: f64,
}

impl ReadBenchStats {
    /// Merge the figures of another run.
    pub fn add(&mut self, other: &ReadBenchStats) {
        self.files += other.files;
        self.dirs += other.dirs;
        self.bytes += other.bytes;
        self.seconds += other.seconds;
    }
}

/// Recursively read every regular file under `root` in `buf_size` chunks.
///
/// Sidecar files are skipped and nothing is written. Entries that cannot
/// be visited are skipped with a diagnostic; a file that fails to open or
/// read aborts the run.
pub fn read_tree(
    root: &Path,
    buf_size: usize,
    sink: &mut dyn ProgressSink,
) -> Result<ReadBenchStats> {
    let mut stats = ReadBenchStats::default();
    let mut buffer = vec![0u8; buf_size];
    let start = Instant::now();

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                sink.entry_skipped(&path, &e.to_string());
                continue;
            }
        };
        if entry.file_type().is_dir() {
            stats.dirs += 1;
            sink.dir_started(entry.path());
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name() == SIDECAR_NAME {
            continue;
        }
        let path = entry.path();
        let size = entry.metadata().map(|m| m.len()).map_err(Error::from)?;
        let mut file = fs::File::open(path).map_err(|e| Error::io_at(path, e))?;
        sink.hash_started(path, size);
        loop {
            let count = file.read(&mut buffer).map_err(|e| Error::io_at(path, e))?;
            if count == 0 {
                break;
            }
            stats.bytes += count as u64;
            sink.hash_progress(count as u64);
        }
        sink.hash_finished();
        stats.files += 1;
        sink.file_seen(size);
    }

    stats.seconds = start.elapsed().as_secs_f64();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgress;
    use tempfile::TempDir;

    #[test]
    fn test_read_tree_counts_files_dirs_and_bytes() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a"), b"12345").unwrap();
        fs::create_dir(temp_dir.path().join("sub")).unwrap();
        fs::write(temp_dir.path().join("sub").join("b"), b"67").unwrap();
        // Sidecars do not count.
        fs::write(temp_dir.path().join(SIDECAR_NAME), b"xxxx").unwrap();

        let stats = read_tree(temp_dir.path(), 4, &mut NullProgress).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.dirs, 2);
        assert_eq!(stats.bytes, 7);
    }

    #[test]
    fn test_read_tree_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a"), b"data").unwrap();

        read_tree(temp_dir.path(), 1024, &mut NullProgress).unwrap();
        let names: Vec<String> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a"]);
    }
}
