//! Mutating operations over aggregated roots: extract, remove, hardlink.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dirdb::SIDECAR_NAME;
use crate::error::{Error, Result};
use crate::maindb::{ContentKey, FileRef, MainDb};
use crate::progress::ProgressSink;
use crate::relink;
use crate::walk::{self, LoadMode};

/// Result of an extract-unique run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractStats {
    pub copied_files: u64,
    pub copied_bytes: u64,
    /// (source, destination) of each performed or planned copy.
    pub copies: Vec<(PathBuf, PathBuf)>,
}

/// Result of a remove-copies run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveStats {
    pub removed_files: u64,
    pub removed_bytes: u64,
    /// Paths deleted, or planned for deletion in a dry run.
    pub removed: Vec<PathBuf>,
}

/// Result of a hardlink-copies run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardlinkStats {
    pub created_links: u64,
    pub removed_bytes: u64,
    /// (replaced file, link target) of each performed or planned replacement.
    pub replacements: Vec<(PathBuf, PathBuf)>,
}

impl MainDb {
    /// Copy files unique to the root at `src` (relative to the root at
    /// `other`) into `dest`, preserving paths relative to the source root.
    ///
    /// `dest` must not pre-exist. Copies never overwrite; a colliding
    /// destination file is an error. A dry run only reports the copies.
    pub fn extract_unique(
        &self,
        src: usize,
        other: usize,
        dest: &Path,
        dry_run: bool,
    ) -> Result<ExtractStats> {
        if dest.exists() {
            return Err(Error::destination_exists(dest));
        }
        let src_root = self.roots[src].path.clone();
        let refs = self.files_only_in(src, other);

        let mut stats = ExtractStats {
            copied_files: 0,
            copied_bytes: 0,
            copies: Vec::new(),
        };
        if !dry_run {
            fs::create_dir_all(dest).map_err(|e| Error::io_at(dest, e))?;
        }
        for file_ref in refs {
            let rel = file_ref.path.strip_prefix(&src_root).map_err(|_| {
                Error::path(&file_ref.path, "not within the source root")
            })?;
            let dest_path = dest.join(rel);
            if !dry_run {
                if let Some(parent) = dest_path.parent() {
                    fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
                }
                if dest_path.exists() {
                    return Err(Error::destination_exists(&dest_path));
                }
                fs::copy(&file_ref.path, &dest_path)
                    .map_err(|e| Error::io_at(&dest_path, e))?;
            }
            stats.copied_files += 1;
            stats.copied_bytes += file_ref.size;
            stats.copies.push((file_ref.path, dest_path));
        }
        Ok(stats)
    }

    /// Delete duplicate files from later roots, keeping every file of the
    /// first root (in command-line order) that holds each content key.
    ///
    /// Directories whose contents changed and which still carry a sidecar
    /// are re-indexed in update mode afterwards. A dry run only reports the
    /// deletions.
    pub fn remove_copies(
        &mut self,
        dry_run: bool,
        buf_size: usize,
        sink: &mut dyn ProgressSink,
    ) -> Result<RemoveStats> {
        let maps: Vec<BTreeMap<ContentKey, Vec<FileRef>>> = self
            .roots
            .iter()
            .map(|root| self.key_map_for_root(&root.path))
            .collect();
        let keys: BTreeSet<ContentKey> =
            maps.iter().flat_map(|map| map.keys().copied()).collect();

        let mut stats = RemoveStats {
            removed_files: 0,
            removed_bytes: 0,
            removed: Vec::new(),
        };
        let mut touched: BTreeSet<PathBuf> = BTreeSet::new();
        for key in keys {
            let Some(first) = maps.iter().position(|map| map.contains_key(&key)) else {
                continue;
            };
            for map in &maps[first + 1..] {
                let Some(refs) = map.get(&key) else {
                    continue;
                };
                for file_ref in refs {
                    if !dry_run {
                        fs::remove_file(&file_ref.path)
                            .map_err(|e| Error::io_at(&file_ref.path, e))?;
                        if let Some(parent) = file_ref.path.parent() {
                            touched.insert(parent.to_path_buf());
                        }
                    }
                    stats.removed_files += 1;
                    stats.removed_bytes += file_ref.size;
                    stats.removed.push(file_ref.path.clone());
                }
            }
        }
        if !dry_run {
            self.reindex_dirs(touched, buf_size, sink)?;
        }
        Ok(stats)
    }

    /// Replace duplicate files with hardlinks to the oldest copy.
    ///
    /// Groups with fewer than two files or smaller than `min_size` are
    /// ignored. The link target is the file with the smallest date (ties
    /// broken by path); a group whose target already carries at least
    /// `max_hardlinks` links is skipped. Files already sharing the target's
    /// inode are left alone. Touched directories are re-indexed in update
    /// mode. A dry run reports the replacements using cached link counts.
    pub fn hardlink_copies(
        &mut self,
        min_size: u64,
        max_hardlinks: u64,
        dry_run: bool,
        buf_size: usize,
        sink: &mut dyn ProgressSink,
    ) -> Result<HardlinkStats> {
        let map = self.key_map_all();
        let mut stats = HardlinkStats {
            created_links: 0,
            removed_bytes: 0,
            replacements: Vec::new(),
        };
        let mut touched: BTreeSet<PathBuf> = BTreeSet::new();
        for (key, refs) in map {
            if refs.len() < 2 || key.size < min_size {
                continue;
            }
            let mut group = refs;
            group.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.path.cmp(&b.path)));
            let target = &group[0];
            let links = if dry_run {
                target.num_links
            } else {
                relink::link_count(&target.path)?
            };
            if links >= max_hardlinks {
                continue;
            }
            for file_ref in &group[1..] {
                if file_ref.inode == target.inode {
                    continue;
                }
                if !dry_run {
                    relink::replace_with_hardlink(&target.path, &file_ref.path)?;
                    if let Some(parent) = file_ref.path.parent() {
                        touched.insert(parent.to_path_buf());
                    }
                }
                stats.created_links += 1;
                stats.removed_bytes += key.size;
                stats
                    .replacements
                    .push((file_ref.path.clone(), target.path.clone()));
            }
        }
        if !dry_run {
            self.reindex_dirs(touched, buf_size, sink)?;
        }
        Ok(stats)
    }

    /// Rebuild the sidecars of changed directories in update mode and
    /// refresh the in-memory copies.
    fn reindex_dirs(
        &mut self,
        touched: BTreeSet<PathBuf>,
        buf_size: usize,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        for dir in touched {
            if !dir.join(SIDECAR_NAME).exists() {
                continue;
            }
            let fresh = walk::load_dir(&dir, LoadMode::Update, buf_size, sink)?;
            if let Some(slot) = self.dirs.iter_mut().find(|d| d.path == fresh.path) {
                *slot = fresh;
            } else {
                self.dirs.push(fresh);
            }
        }
        Ok(())
    }
}
