//! Atomic replacement of a file with a hardlink.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Suffix for the temporary link created next to the replacement target.
pub const LINK_TEMP_SUFFIX: &str = ".treeop_link_tmp";

/// Find a non-existing temporary path next to `target`: the bare suffix
/// first, then numbered variants 1..=99.
fn free_temp_path(target: &Path) -> Result<PathBuf> {
    let base = {
        let mut name = OsString::from(target.as_os_str());
        name.push(LINK_TEMP_SUFFIX);
        PathBuf::from(name)
    };
    if !base.exists() {
        return Ok(base);
    }
    for i in 1..=99u32 {
        let mut name = OsString::from(target.as_os_str());
        name.push(format!("{LINK_TEMP_SUFFIX}{i}"));
        let candidate = PathBuf::from(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(Error::no_free_temp_name(target))
}

/// Atomically replace `target` with a hardlink to `source`.
///
/// A hardlink to `source` is created under a temporary name next to
/// `target` and then renamed over it. Filesystems that refuse to rename
/// over an existing hardlink get a remove-then-rename fallback. The old
/// data is never lost before the new link exists, and the temporary file
/// is removed on every failure path.
pub fn replace_with_hardlink(source: &Path, target: &Path) -> Result<()> {
    let temp = free_temp_path(target)?;
    fs::hard_link(source, &temp).map_err(|e| Error::io_at(&temp, e))?;

    if fs::rename(&temp, target).is_ok() {
        return Ok(());
    }
    let fallback = fs::remove_file(target)
        .and_then(|_| fs::rename(&temp, target));
    match fallback {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&temp);
            Err(Error::io_at(target, e))
        }
    }
}

/// Current hardlink count of `path`, read live from the filesystem.
#[cfg(unix)]
pub fn link_count(path: &Path) -> Result<u64> {
    use std::os::unix::fs::MetadataExt;
    let metadata = fs::metadata(path).map_err(|e| Error::io_at(path, e))?;
    Ok(metadata.nlink())
}

/// Current hardlink count of `path`.
#[cfg(not(unix))]
pub fn link_count(path: &Path) -> Result<u64> {
    fs::metadata(path).map_err(|e| Error::io_at(path, e))?;
    Ok(1)
}
