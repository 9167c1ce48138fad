//! In-memory aggregation of loaded directories across roots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::dirdb::{DirDbData, FileEntry};
use crate::hash::{self, Hash128};
use crate::paths::is_path_within;

/// Equivalence key for "same content": size first, then hash.
///
/// Under the same-filename policy the hash half is a digest over the
/// content hash and the leaf name, so equal content under different names
/// stays distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ContentKey {
    pub size: u64,
    pub hash: Hash128,
}

/// One file with its full path, as used by the cross-root operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub path: PathBuf,
    pub size: u64,
    pub hash: Hash128,
    pub inode: u64,
    pub date: u64,
    pub num_links: u64,
}

/// A root directory with its processing time.
#[derive(Debug, Clone)]
pub struct RootData {
    pub path: PathBuf,
    pub elapsed_seconds: f64,
}

/// Per-root statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct RootStats {
    pub path: PathBuf,
    pub dir_count: u64,
    pub file_count: u64,
    pub total_size: u64,
    /// Occurrences of a content key beyond the first.
    pub redundant_files: u64,
    pub redundant_size: u64,
    pub db_size: u64,
    pub hashed_bytes: u64,
    pub hash_seconds: f64,
    pub elapsed_seconds: f64,
}

/// Unique/shared split for one root of an intersection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootIntersect {
    pub path: PathBuf,
    /// Files whose key appears in this root only.
    pub unique_files: u64,
    pub unique_bytes: u64,
    /// Files whose key appears in at least one other root.
    pub shared_files: u64,
    pub shared_bytes: u64,
}

impl RootIntersect {
    pub fn total_files(&self) -> u64 {
        self.unique_files + self.shared_files
    }

    pub fn total_bytes(&self) -> u64 {
        self.unique_bytes + self.shared_bytes
    }
}

/// Intersection statistics across all roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntersectStats {
    pub per_root: Vec<RootIntersect>,
    pub total_unique_files: u64,
    pub total_unique_bytes: u64,
    pub total_shared_files: u64,
    pub total_shared_bytes: u64,
}

/// One bucket of the size histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeBucket {
    pub count: u64,
    pub total_size: u64,
}

/// All loaded directories across all roots.
///
/// A directory belongs to a root iff the root path is a component-wise
/// prefix of the directory path; with overlapping roots a directory
/// aggregates into each containing root.
#[derive(Debug)]
pub struct MainDb {
    pub(crate) roots: Vec<RootData>,
    pub(crate) dirs: Vec<DirDbData>,
    pub(crate) same_filename: bool,
}

impl MainDb {
    /// Create an aggregator over the given (normalized) root paths.
    pub fn new(root_paths: Vec<PathBuf>, same_filename: bool) -> Self {
        let roots = root_paths
            .into_iter()
            .map(|path| RootData {
                path,
                elapsed_seconds: 0.0,
            })
            .collect();
        MainDb {
            roots,
            dirs: Vec::new(),
            same_filename,
        }
    }

    /// Add one loaded directory.
    pub fn add_dir(&mut self, dir: DirDbData) {
        self.dirs.push(dir);
    }

    /// Add a batch of loaded directories.
    pub fn add_dirs(&mut self, dirs: Vec<DirDbData>) {
        self.dirs.extend(dirs);
    }

    /// Record how long a root took to process.
    pub fn set_root_elapsed(&mut self, root: &Path, seconds: f64) {
        if let Some(data) = self.roots.iter_mut().find(|r| r.path == root) {
            data.elapsed_seconds = seconds;
        }
    }

    pub fn roots(&self) -> &[RootData] {
        &self.roots
    }

    pub fn dirs(&self) -> &[DirDbData] {
        &self.dirs
    }

    pub(crate) fn content_key(&self, entry: &FileEntry) -> ContentKey {
        let hash = if self.same_filename {
            hash::combined_name_hash(entry.hash, &entry.name)
        } else {
            entry.hash
        };
        ContentKey {
            size: entry.size,
            hash,
        }
    }

    fn file_ref(dir: &DirDbData, entry: &FileEntry) -> FileRef {
        FileRef {
            path: dir.path.join(&entry.name),
            size: entry.size,
            hash: entry.hash,
            inode: entry.inode,
            date: entry.date,
            num_links: entry.num_links,
        }
    }

    fn dirs_within<'a>(&'a self, root: &'a Path) -> impl Iterator<Item = &'a DirDbData> {
        self.dirs
            .iter()
            .filter(move |dir| is_path_within(root, &dir.path))
    }

    /// Content-key multiset over the directories of one root.
    pub(crate) fn key_map_for_root(&self, root: &Path) -> BTreeMap<ContentKey, Vec<FileRef>> {
        let mut map: BTreeMap<ContentKey, Vec<FileRef>> = BTreeMap::new();
        for dir in self.dirs_within(root) {
            for entry in &dir.files {
                map.entry(self.content_key(entry))
                    .or_default()
                    .push(Self::file_ref(dir, entry));
            }
        }
        map
    }

    /// Content-key multiset over every loaded directory.
    pub(crate) fn key_map_all(&self) -> BTreeMap<ContentKey, Vec<FileRef>> {
        let mut map: BTreeMap<ContentKey, Vec<FileRef>> = BTreeMap::new();
        for dir in &self.dirs {
            for entry in &dir.files {
                map.entry(self.content_key(entry))
                    .or_default()
                    .push(Self::file_ref(dir, entry));
            }
        }
        map
    }

    /// Every loaded file with its full path.
    pub fn all_files(&self) -> Vec<FileRef> {
        let mut refs = Vec::new();
        for dir in &self.dirs {
            for entry in &dir.files {
                refs.push(Self::file_ref(dir, entry));
            }
        }
        refs
    }

    /// Per-root statistics over files, sizes, redundancy and sidecars.
    pub fn root_stats(&self) -> Vec<RootStats> {
        self.roots
            .iter()
            .map(|root| {
                let mut stats = RootStats {
                    path: root.path.clone(),
                    dir_count: 0,
                    file_count: 0,
                    total_size: 0,
                    redundant_files: 0,
                    redundant_size: 0,
                    db_size: 0,
                    hashed_bytes: 0,
                    hash_seconds: 0.0,
                    elapsed_seconds: root.elapsed_seconds,
                };
                let mut counts: BTreeMap<ContentKey, u64> = BTreeMap::new();
                for dir in self.dirs_within(&root.path) {
                    stats.dir_count += 1;
                    stats.file_count += dir.files.len() as u64;
                    stats.db_size += dir.db_size;
                    stats.hashed_bytes += dir.hashed_bytes;
                    stats.hash_seconds += dir.hash_seconds;
                    for entry in &dir.files {
                        stats.total_size += entry.size;
                        *counts.entry(self.content_key(entry)).or_default() += 1;
                    }
                }
                for (key, count) in counts {
                    if count > 1 {
                        let extra = count - 1;
                        stats.redundant_files += extra;
                        stats.redundant_size += extra * key.size;
                    }
                }
                stats
            })
            .collect()
    }

    /// Unique/shared split across all roots.
    ///
    /// A key is shared when it appears in at least two roots; all files of a
    /// shared key count into the shared bucket of each root holding it.
    pub fn intersect(&self) -> IntersectStats {
        let maps: Vec<BTreeMap<ContentKey, Vec<FileRef>>> = self
            .roots
            .iter()
            .map(|root| self.key_map_for_root(&root.path))
            .collect();

        let mut roots_with_key: BTreeMap<ContentKey, u64> = BTreeMap::new();
        for map in &maps {
            for key in map.keys() {
                *roots_with_key.entry(*key).or_default() += 1;
            }
        }

        let mut stats = IntersectStats {
            per_root: Vec::with_capacity(self.roots.len()),
            total_unique_files: 0,
            total_unique_bytes: 0,
            total_shared_files: 0,
            total_shared_bytes: 0,
        };
        for (root, map) in self.roots.iter().zip(&maps) {
            let mut root_stats = RootIntersect {
                path: root.path.clone(),
                unique_files: 0,
                unique_bytes: 0,
                shared_files: 0,
                shared_bytes: 0,
            };
            for (key, refs) in map {
                let count = refs.len() as u64;
                let bytes = count * key.size;
                if roots_with_key[key] >= 2 {
                    root_stats.shared_files += count;
                    root_stats.shared_bytes += bytes;
                } else {
                    root_stats.unique_files += count;
                    root_stats.unique_bytes += bytes;
                }
            }
            stats.total_unique_files += root_stats.unique_files;
            stats.total_unique_bytes += root_stats.unique_bytes;
            stats.total_shared_files += root_stats.shared_files;
            stats.total_shared_bytes += root_stats.shared_bytes;
            stats.per_root.push(root_stats);
        }
        stats
    }

    /// Files of root `a` whose key does not appear in root `b`.
    pub fn files_only_in(&self, a: usize, b: usize) -> Vec<FileRef> {
        let map_a = self.key_map_for_root(&self.roots[a].path);
        let map_b = self.key_map_for_root(&self.roots[b].path);
        let mut refs = Vec::new();
        for (key, list) in map_a {
            if !map_b.contains_key(&key) {
                refs.extend(list);
            }
        }
        refs
    }

    /// Files present in both of two roots, grouped per key with the first
    /// root's files before the second's. Each file is tagged with its root
    /// index.
    pub fn files_in_both(&self, a: usize, b: usize) -> Vec<(usize, FileRef)> {
        let map_a = self.key_map_for_root(&self.roots[a].path);
        let mut map_b = self.key_map_for_root(&self.roots[b].path);
        let mut refs = Vec::new();
        for (key, list) in map_a {
            if let Some(list_b) = map_b.remove(&key) {
                refs.extend(list.into_iter().map(|r| (a, r)));
                refs.extend(list_b.into_iter().map(|r| (b, r)));
            }
        }
        refs
    }

    /// Minimum leading bits distinguishing every observed content hash.
    pub fn min_unique_bits(&self) -> u32 {
        let hashes = self
            .dirs
            .iter()
            .flat_map(|dir| dir.files.iter().map(|f| f.hash))
            .collect();
        hash::min_unique_bits(hashes)
    }

    /// Hex prefix length matching [`MainDb::min_unique_bits`].
    pub fn unique_hex_len(&self) -> usize {
        hash::unique_hex_len(self.min_unique_bits())
    }

    /// Bucket all files by `size / batch * batch`.
    ///
    /// Files larger than `max_size` (when given) are ignored. `batch` must
    /// be positive; the caller validates it.
    pub fn size_histogram(&self, batch: u64, max_size: Option<u64>) -> BTreeMap<u64, SizeBucket> {
        let mut buckets: BTreeMap<u64, SizeBucket> = BTreeMap::new();
        for dir in &self.dirs {
            for entry in &dir.files {
                if let Some(limit) = max_size {
                    if entry.size > limit {
                        continue;
                    }
                }
                let start = entry.size / batch * batch;
                let bucket = buckets.entry(start).or_default();
                bucket.count += 1;
                bucket.total_size += entry.size;
            }
        }
        buckets
    }
}
