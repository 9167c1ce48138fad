//! # treeop_core
//!
//! Content indexing and set algebra over huge directory trees.
//!
//! Each directory carries a persistent sidecar index (`.dirdb`) caching
//! per-file metadata and a 128-bit content hash. On top of those sidecars
//! the crate answers questions across many roots: how much content is
//! unique versus shared, which files appear where, and how to deduplicate
//! by deletion or by hardlink replacement.
//!
//! ## Features
//!
//! - Bit-exact sidecar codec with forward room for format growth
//! - Incremental scans reusing cached hashes when (inode, size, mtime) match
//! - Cross-root statistics, intersection and redundancy figures
//! - Unique-file extraction, duplicate removal, atomic hardlink replacement
//! - Read-throughput benchmarking
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use treeop_core::{paths, walk, MainDb, LoadMode, NullProgress, DEFAULT_BUF_SIZE};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let root = paths::normalize_path(Path::new("./photos"));
//! let mut db = MainDb::new(vec![root.clone()], false);
//! let dirs = walk::process_tree(&root, LoadMode::Read, DEFAULT_BUF_SIZE, &mut NullProgress)?;
//! db.add_dirs(dirs);
//!
//! for stats in db.root_stats() {
//!     println!(
//!         "{}: {} files, {} redundant",
//!         stats.path.display(),
//!         stats.file_count,
//!         stats.redundant_files
//!     );
//! }
//! # Ok(())
//! # }
//! ```

mod error;
pub mod dirdb;
pub mod hash;
mod maindb;
mod ops;
pub mod paths;
mod progress;
pub mod readbench;
mod relink;
pub mod scan;
pub mod walk;

pub use dirdb::{DirDbData, FileEntry, SIDECAR_NAME};
pub use error::{Error, Result};
pub use hash::{Hash128, Hasher128};
pub use maindb::{
    ContentKey, FileRef, IntersectStats, MainDb, RootData, RootIntersect, RootStats, SizeBucket,
};
pub use ops::{ExtractStats, HardlinkStats, RemoveStats};
pub use progress::{NullProgress, ProgressSink};
pub use readbench::ReadBenchStats;
pub use relink::{replace_with_hardlink, LINK_TEMP_SUFFIX};
pub use scan::{HashReuseKey, DEFAULT_BUF_SIZE};
pub use walk::LoadMode;
