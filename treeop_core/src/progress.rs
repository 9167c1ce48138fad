//! Progress reporting seam.
//!
//! The indexer and walker notify an explicit sink instead of a process-wide
//! tracker, so callers that want no output pass [`NullProgress`].

use std::path::Path;

/// Receiver for scan and hash progress events. All methods default to no-ops.
pub trait ProgressSink {
    /// A directory is about to be scanned or loaded.
    fn dir_started(&mut self, _dir: &Path) {}

    /// A directory is being rebuilt by the indexer (not served from its
    /// sidecar).
    fn scan_started(&mut self, _dir: &Path) {}

    /// The current directory has been fully processed.
    fn dir_finished(&mut self) {}

    /// A directory was loaded from its sidecar without scanning.
    fn dir_loaded(&mut self, _file_count: u64, _total_bytes: u64) {}

    /// A regular file was encountered during a scan.
    fn file_seen(&mut self, _size: u64) {}

    /// Hashing of a file begins.
    fn hash_started(&mut self, _path: &Path, _size: u64) {}

    /// A chunk of the current file has been hashed.
    fn hash_progress(&mut self, _bytes: u64) {}

    /// Hashing of the current file is complete.
    fn hash_finished(&mut self) {}

    /// A directory entry was skipped because it could not be visited.
    fn entry_skipped(&mut self, _path: &Path, _reason: &str) {}

    /// All roots are processed; flush any transient output.
    fn finish(&mut self) {}
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {}
