//! Sidecar (.dirdb) binary format and codec.
//!
//! One sidecar per directory describes every regular file in that directory
//! (the sidecar itself excluded). All integers are little-endian u64 unless
//! noted; tags are 8 ASCII bytes zero-padded and read as a LE u64.
//!
//! ```text
//! u64  "DirDB" tag
//! u64  version (current = 1)
//! u64  "TOC" tag
//! u64  tocCount
//! u64  tocEntrySize            (>= 16; trailing bytes are skipped)
//! TocEntry[tocCount]           first 16 bytes: size u64, fileIndex u64
//! u64  "FILES" tag
//! u64  fileCount
//! u64  fileEntrySize           (>= 48; trailing bytes are skipped)
//! FileEntry[fileCount]         first 48 bytes: nameIndex, hashLo, hashHi,
//!                              inode, date, numLinks
//! u64  "STRINGS" tag
//! u64  stringsSize
//! u8   stringBytes[stringsSize]
//! ```
//!
//! File entries are sorted by size ascending, then name ascending. They do
//! not carry their size; it is reconstructed from the TOC entry whose
//! `[fileIndex, nextFileIndex)` span covers the entry. Strings are length
//! prefixed: a first byte of 0x00..=0xFC is the length itself, 0xFF/0xFE/0xFD
//! announce a 2/4/8-byte little-endian length.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::hash::Hash128;
use crate::paths::normalize_path;

/// Name of the per-directory sidecar file.
pub const SIDECAR_NAME: &str = ".dirdb";

/// Current sidecar format version.
pub const VERSION: u64 = 1;

/// Minimum (and currently emitted) TOC entry size in bytes.
pub const TOC_ENTRY_SIZE: u64 = 16;

/// Minimum (and currently emitted) file entry size in bytes.
pub const FILE_ENTRY_SIZE: u64 = 48;

/// One regular file in one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Leaf name within the directory, never a full path.
    pub name: String,
    /// File size in bytes.
    pub size: u64,
    /// 128-bit content hash.
    pub hash: Hash128,
    /// Filesystem inode at scan time.
    pub inode: u64,
    /// Modification time in FILETIME ticks (100 ns since 1601-01-01 UTC).
    pub date: u64,
    /// Hardlink count at scan time.
    pub num_links: u64,
}

/// In-memory image of one directory's sidecar.
#[derive(Debug, Clone, PartialEq)]
pub struct DirDbData {
    /// Normalized absolute directory path.
    pub path: PathBuf,
    /// Entries sorted by (size, name).
    pub files: Vec<FileEntry>,
    /// On-disk size of the sidecar in bytes.
    pub db_size: u64,
    /// Bytes hashed while building; zero when loaded from disk.
    pub hashed_bytes: u64,
    /// Seconds spent hashing while building; zero when loaded from disk.
    pub hash_seconds: f64,
}

impl DirDbData {
    /// Path of this directory's sidecar file.
    pub fn sidecar_path(&self) -> PathBuf {
        self.path.join(SIDECAR_NAME)
    }
}

/// Encode an ASCII tag of up to 8 characters as a zero-padded LE u64.
fn make_tag(tag: &str) -> u64 {
    let mut value = 0u64;
    for (i, byte) in tag.bytes().take(8).enumerate() {
        value |= (byte as u64) << (8 * i);
    }
    value
}

/// Sort entries into the on-disk order: size ascending, then name.
pub fn sort_entries(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.name.cmp(&b.name)));
}

fn append_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn append_length_string(out: &mut Vec<u8>, s: &str) {
    let len = s.len();
    if len <= 0xfc {
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(0xff);
        out.extend_from_slice(&(len as u16).to_le_bytes());
    } else if len <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    } else {
        out.push(0xfd);
        out.extend_from_slice(&(len as u64).to_le_bytes());
    }
    out.extend_from_slice(s.as_bytes());
}

/// Serialize a (size, name)-sorted entry list into sidecar bytes.
///
/// Emits one TOC entry per run of equal sizes, pointing at the run's first
/// file index, and packs names into the STRINGS blob in order of appearance.
pub fn encode(entries: &[FileEntry]) -> Vec<u8> {
    debug_assert!(entries.windows(2).all(|pair| {
        (pair[0].size, pair[0].name.as_str()) <= (pair[1].size, pair[1].name.as_str())
    }));

    let mut toc: Vec<(u64, u64)> = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        if i == 0 || entries[i - 1].size != entry.size {
            toc.push((entry.size, i as u64));
        }
    }

    let mut strings = Vec::new();
    let mut raw_entries = Vec::with_capacity(entries.len());
    for entry in entries {
        let name_index = strings.len() as u64;
        append_length_string(&mut strings, &entry.name);
        raw_entries.push((name_index, entry));
    }

    let mut out = Vec::new();
    append_u64(&mut out, make_tag("DirDB"));
    append_u64(&mut out, VERSION);
    append_u64(&mut out, make_tag("TOC"));
    append_u64(&mut out, toc.len() as u64);
    append_u64(&mut out, TOC_ENTRY_SIZE);
    for (size, file_index) in &toc {
        append_u64(&mut out, *size);
        append_u64(&mut out, *file_index);
    }
    append_u64(&mut out, make_tag("FILES"));
    append_u64(&mut out, raw_entries.len() as u64);
    append_u64(&mut out, FILE_ENTRY_SIZE);
    for (name_index, entry) in &raw_entries {
        append_u64(&mut out, *name_index);
        append_u64(&mut out, entry.hash.lo());
        append_u64(&mut out, entry.hash.hi());
        append_u64(&mut out, entry.inode);
        append_u64(&mut out, entry.date);
        append_u64(&mut out, entry.num_links);
    }
    append_u64(&mut out, make_tag("STRINGS"));
    append_u64(&mut out, strings.len() as u64);
    out.extend_from_slice(&strings);
    out
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    db_path: &'a Path,
}

impl<'a> Reader<'a> {
    fn read_u64(&mut self, field: &str) -> Result<u64> {
        if self.pos + 8 > self.data.len() {
            return Err(Error::format(
                self.db_path,
                format!("unexpected end of file while reading {field}"),
            ));
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(u64::from_le_bytes(bytes))
    }

    fn expect_tag(&mut self, tag: &str) -> Result<()> {
        let value = self.read_u64(&format!("{tag} tag"))?;
        if value != make_tag(tag) {
            return Err(Error::format(self.db_path, format!("missing {tag} tag")));
        }
        Ok(())
    }

    /// Advance to the declared end of a fixed-size record, skipping bytes a
    /// newer writer may have appended.
    fn skip_record(&mut self, record_start: usize, record_size: u64, field: &str) -> Result<()> {
        let record_end = (record_start as u64)
            .checked_add(record_size)
            .filter(|&end| end <= self.data.len() as u64)
            .ok_or_else(|| {
                Error::format(
                    self.db_path,
                    format!("unexpected end of file inside {field}"),
                )
            })?;
        self.pos = record_end as usize;
        Ok(())
    }
}

fn read_length_string(strings: &[u8], offset: usize, db_path: &Path) -> Result<String> {
    let err = |reason: &str| Error::format(db_path, reason.to_string());
    let mut pos = offset;
    let prefix = *strings.get(pos).ok_or_else(|| err("name index out of bounds"))?;
    pos += 1;
    let len = match prefix {
        0x00..=0xfc => prefix as u64,
        0xff => {
            let bytes = strings
                .get(pos..pos + 2)
                .ok_or_else(|| err("truncated 2-byte string length"))?;
            pos += 2;
            u16::from_le_bytes([bytes[0], bytes[1]]) as u64
        }
        0xfe => {
            let bytes = strings
                .get(pos..pos + 4)
                .ok_or_else(|| err("truncated 4-byte string length"))?;
            pos += 4;
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64
        }
        0xfd => {
            let bytes = strings
                .get(pos..pos + 8)
                .ok_or_else(|| err("truncated 8-byte string length"))?;
            pos += 8;
            u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ])
        }
    };
    let end = (pos as u64)
        .checked_add(len)
        .and_then(|end| usize::try_from(end).ok())
        .ok_or_else(|| err("string length overflows"))?;
    let bytes = strings
        .get(pos..end)
        .ok_or_else(|| err("string length exceeds STRINGS blob"))?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| err("string is not valid UTF-8"))
}

/// Decode sidecar bytes into file entries with reconstructed sizes.
///
/// `db_path` is used only for error reporting.
pub fn decode(data: &[u8], db_path: &Path) -> Result<Vec<FileEntry>> {
    let mut reader = Reader {
        data,
        pos: 0,
        db_path,
    };

    reader.expect_tag("DirDB")?;
    let version = reader.read_u64("version")?;
    if version != VERSION {
        return Err(Error::format(
            db_path,
            format!("unsupported version {version} (expected {VERSION})"),
        ));
    }

    reader.expect_tag("TOC")?;
    let toc_count = reader.read_u64("TOC count")?;
    let toc_entry_size = reader.read_u64("TOC entry size")?;
    if toc_entry_size < TOC_ENTRY_SIZE {
        return Err(Error::format(
            db_path,
            format!("TOC entry size {toc_entry_size} below minimum {TOC_ENTRY_SIZE}"),
        ));
    }
    let mut toc = Vec::new();
    for _ in 0..toc_count {
        let entry_start = reader.pos;
        let size = reader.read_u64("TOC size")?;
        let file_index = reader.read_u64("TOC file index")?;
        reader.skip_record(entry_start, toc_entry_size, "TOC entry")?;
        toc.push((size, file_index));
    }

    reader.expect_tag("FILES")?;
    let file_count = reader.read_u64("file count")?;
    let file_entry_size = reader.read_u64("file entry size")?;
    if file_entry_size < FILE_ENTRY_SIZE {
        return Err(Error::format(
            db_path,
            format!("file entry size {file_entry_size} below minimum {FILE_ENTRY_SIZE}"),
        ));
    }
    struct RawEntry {
        name_index: u64,
        hash: Hash128,
        inode: u64,
        date: u64,
        num_links: u64,
    }
    let mut raw_entries = Vec::new();
    for _ in 0..file_count {
        let entry_start = reader.pos;
        let name_index = reader.read_u64("name index")?;
        let hash_lo = reader.read_u64("hash lo")?;
        let hash_hi = reader.read_u64("hash hi")?;
        let inode = reader.read_u64("inode")?;
        let date = reader.read_u64("date")?;
        let num_links = reader.read_u64("link count")?;
        reader.skip_record(entry_start, file_entry_size, "file entry")?;
        raw_entries.push(RawEntry {
            name_index,
            hash: Hash128::new(hash_hi, hash_lo),
            inode,
            date,
            num_links,
        });
    }

    reader.expect_tag("STRINGS")?;
    let strings_size = reader.read_u64("strings size")?;
    let strings_end = (reader.pos as u64)
        .checked_add(strings_size)
        .filter(|&end| end <= data.len() as u64)
        .ok_or_else(|| Error::format(db_path, "strings size exceeds file"))?;
    let strings = &data[reader.pos..strings_end as usize];

    // Reconstruct per-entry sizes from covering TOC spans.
    if !raw_entries.is_empty() && toc.is_empty() {
        return Err(Error::format(
            db_path,
            "TOC is empty but file entries exist",
        ));
    }
    let mut sizes = vec![0u64; raw_entries.len()];
    for (i, (size, file_index)) in toc.iter().enumerate() {
        let start = usize::try_from(*file_index)
            .map_err(|_| Error::format(db_path, "TOC file index overflows"))?;
        let end = if i + 1 < toc.len() {
            usize::try_from(toc[i + 1].1)
                .map_err(|_| Error::format(db_path, "TOC file index overflows"))?
        } else {
            raw_entries.len()
        };
        if start > end || end > raw_entries.len() {
            return Err(Error::format(db_path, "inconsistent TOC file index"));
        }
        for slot in &mut sizes[start..end] {
            *slot = *size;
        }
    }

    let mut entries = Vec::with_capacity(raw_entries.len());
    for (raw, size) in raw_entries.iter().zip(sizes) {
        let name_index = usize::try_from(raw.name_index)
            .map_err(|_| Error::format(db_path, "name index overflows"))?;
        if name_index >= strings.len() {
            return Err(Error::format(db_path, "name index out of bounds"));
        }
        let name = read_length_string(strings, name_index, db_path)?;
        entries.push(FileEntry {
            name,
            size,
            hash: raw.hash,
            inode: raw.inode,
            date: raw.date,
            num_links: raw.num_links,
        });
    }
    Ok(entries)
}

/// Read and validate the sidecar of `dir_path`.
pub fn read(dir_path: &Path) -> Result<DirDbData> {
    let db_path = dir_path.join(SIDECAR_NAME);
    let data = std::fs::read(&db_path).map_err(|e| Error::io_at(&db_path, e))?;
    let files = decode(&data, &db_path)?;
    Ok(DirDbData {
        path: normalize_path(dir_path),
        files,
        db_size: data.len() as u64,
        hashed_bytes: 0,
        hash_seconds: 0.0,
    })
}

/// Atomically write sidecar bytes into `dir_path`, returning the byte count.
pub fn write_sidecar(dir_path: &Path, payload: &[u8]) -> Result<u64> {
    let db_path = dir_path.join(SIDECAR_NAME);
    let mut temp_file = tempfile::NamedTempFile::new_in(dir_path)?;
    temp_file.write_all(payload)?;
    temp_file.flush()?;
    temp_file.persist(&db_path)?;
    Ok(payload.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hasher128;

    fn entry(name: &str, size: u64, hash: Hash128) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            size,
            hash,
            inode: 7,
            date: 133_000_000_000_000_000,
            num_links: 1,
        }
    }

    fn read_u64_at(data: &[u8], offset: usize) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[offset..offset + 8]);
        u64::from_le_bytes(bytes)
    }

    #[test]
    fn test_encode_minimal_sidecar_layout() {
        let hash = Hasher128::hash_bytes(b"abc");
        let entries = vec![entry("a.txt", 3, hash)];
        let data = encode(&entries);

        assert_eq!(&data[0..5], b"DirDB");
        assert_eq!(&data[5..8], &[0, 0, 0]);
        assert_eq!(read_u64_at(&data, 8), VERSION);
        assert_eq!(&data[16..19], b"TOC");
        assert_eq!(read_u64_at(&data, 24), 1); // tocCount
        assert_eq!(read_u64_at(&data, 32), 16); // tocEntrySize
        assert_eq!(read_u64_at(&data, 40), 3); // size
        assert_eq!(read_u64_at(&data, 48), 0); // fileIndex
        assert_eq!(&data[56..61], b"FILES");
        assert_eq!(read_u64_at(&data, 64), 1); // fileCount
        assert_eq!(read_u64_at(&data, 72), 48); // fileEntrySize
        assert_eq!(read_u64_at(&data, 80), 0); // nameIndex
        assert_eq!(read_u64_at(&data, 88), hash.lo());
        assert_eq!(read_u64_at(&data, 96), hash.hi());
        assert_eq!(&data[128..135], b"STRINGS");
        assert_eq!(read_u64_at(&data, 136), 6); // stringsSize
        assert_eq!(&data[144..150], b"\x05a.txt");
        assert_eq!(data.len(), 150);
    }

    #[test]
    fn test_roundtrip_preserves_entries() {
        let mut entries = vec![
            entry("z", 1, Hasher128::hash_bytes(b"z")),
            entry("a", 2, Hasher128::hash_bytes(b"aa")),
            entry("m", 1, Hasher128::hash_bytes(b"m")),
        ];
        sort_entries(&mut entries);
        let data = encode(&entries);
        let decoded = decode(&data, Path::new("/t/.dirdb")).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn test_sort_order_and_toc_runs() {
        // Files z (1 byte), a (2 bytes), m (1 byte) sort to [m, z, a].
        let mut entries = vec![
            entry("z", 1, Hasher128::hash_bytes(b"z")),
            entry("a", 2, Hasher128::hash_bytes(b"aa")),
            entry("m", 1, Hasher128::hash_bytes(b"m")),
        ];
        sort_entries(&mut entries);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["m", "z", "a"]);
        let sizes: Vec<u64> = entries.iter().map(|e| e.size).collect();
        assert_eq!(sizes, [1, 1, 2]);

        let data = encode(&entries);
        assert_eq!(read_u64_at(&data, 24), 2); // two TOC runs
        assert_eq!(read_u64_at(&data, 40), 1);
        assert_eq!(read_u64_at(&data, 48), 0);
        assert_eq!(read_u64_at(&data, 56), 2);
        assert_eq!(read_u64_at(&data, 64), 2);
    }

    #[test]
    fn test_rejects_unsupported_version() {
        let mut data = encode(&[entry("a", 1, Hash128::default())]);
        data[8..16].copy_from_slice(&2u64.to_le_bytes());
        let err = decode(&data, Path::new("/t/.dirdb")).unwrap_err();
        assert!(err.to_string().contains("version"), "{err}");
    }

    #[test]
    fn test_rejects_bad_tag() {
        let mut data = encode(&[entry("a", 1, Hash128::default())]);
        data[0] = b'X';
        let err = decode(&data, Path::new("/t/.dirdb")).unwrap_err();
        assert!(err.to_string().contains("DirDB tag"), "{err}");
    }

    #[test]
    fn test_rejects_sub_minimum_entry_sizes() {
        let mut data = encode(&[entry("a", 1, Hash128::default())]);
        data[72..80].copy_from_slice(&40u64.to_le_bytes());
        let err = decode(&data, Path::new("/t/.dirdb")).unwrap_err();
        assert!(err.to_string().contains("file entry size"), "{err}");

        let mut data = encode(&[entry("a", 1, Hash128::default())]);
        data[32..40].copy_from_slice(&8u64.to_le_bytes());
        let err = decode(&data, Path::new("/t/.dirdb")).unwrap_err();
        assert!(err.to_string().contains("TOC entry size"), "{err}");
    }

    #[test]
    fn test_rejects_out_of_bounds_name_index() {
        let mut data = encode(&[entry("a", 1, Hash128::default())]);
        data[80..88].copy_from_slice(&100u64.to_le_bytes());
        let err = decode(&data, Path::new("/t/.dirdb")).unwrap_err();
        assert!(err.to_string().contains("name index"), "{err}");
    }

    #[test]
    fn test_rejects_truncation() {
        let data = encode(&[entry("a", 1, Hash128::default())]);
        for len in [0, 7, 20, 45, 90, data.len() - 1] {
            assert!(decode(&data[..len], Path::new("/t/.dirdb")).is_err());
        }
    }

    #[test]
    fn test_rejects_empty_toc_with_files() {
        let entries = vec![entry("a", 1, Hash128::default())];
        let full = encode(&entries);
        // Rebuild without the single TOC entry.
        let mut data = Vec::new();
        data.extend_from_slice(&full[0..24]); // tags + version + TOC tag
        data.extend_from_slice(&0u64.to_le_bytes()); // tocCount = 0
        data.extend_from_slice(&16u64.to_le_bytes());
        data.extend_from_slice(&full[56..]); // FILES onward
        let err = decode(&data, Path::new("/t/.dirdb")).unwrap_err();
        assert!(err.to_string().contains("TOC is empty"), "{err}");
    }

    #[test]
    fn test_rejects_inconsistent_toc_index() {
        let mut entries = vec![
            entry("a", 1, Hash128::default()),
            entry("b", 2, Hash128::default()),
        ];
        sort_entries(&mut entries);
        let mut data = encode(&entries);
        // Second TOC entry's fileIndex points past fileCount.
        data[64..72].copy_from_slice(&9u64.to_le_bytes());
        let err = decode(&data, Path::new("/t/.dirdb")).unwrap_err();
        assert!(err.to_string().contains("TOC file index"), "{err}");
    }

    #[test]
    fn test_reader_skips_oversized_entries() {
        // A writer with larger records: 24-byte TOC entries, 56-byte file
        // entries. The extra bytes must be ignored.
        let hash = Hasher128::hash_bytes(b"abc");
        let mut data = Vec::new();
        append_u64(&mut data, make_tag("DirDB"));
        append_u64(&mut data, VERSION);
        append_u64(&mut data, make_tag("TOC"));
        append_u64(&mut data, 1);
        append_u64(&mut data, 24);
        append_u64(&mut data, 3); // size
        append_u64(&mut data, 0); // fileIndex
        append_u64(&mut data, 0xdead); // future TOC field
        append_u64(&mut data, make_tag("FILES"));
        append_u64(&mut data, 1);
        append_u64(&mut data, 56);
        append_u64(&mut data, 0); // nameIndex
        append_u64(&mut data, hash.lo());
        append_u64(&mut data, hash.hi());
        append_u64(&mut data, 7); // inode
        append_u64(&mut data, 11); // date
        append_u64(&mut data, 1); // numLinks
        append_u64(&mut data, 0xbeef); // future file field
        append_u64(&mut data, make_tag("STRINGS"));
        append_u64(&mut data, 6);
        data.extend_from_slice(b"\x05a.txt");

        let decoded = decode(&data, Path::new("/t/.dirdb")).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, "a.txt");
        assert_eq!(decoded[0].size, 3);
        assert_eq!(decoded[0].hash, hash);
    }

    #[test]
    fn test_long_name_uses_two_byte_prefix() {
        let name = "n".repeat(300);
        let entries = vec![entry(&name, 5, Hash128::default())];
        let data = encode(&entries);
        let decoded = decode(&data, Path::new("/t/.dirdb")).unwrap();
        assert_eq!(decoded[0].name, name);

        let strings_size_off = data.len() - 8 - (1 + 2 + 300);
        assert_eq!(read_u64_at(&data, strings_size_off), 1 + 2 + 300);
        assert_eq!(data[strings_size_off + 8], 0xff);
        assert_eq!(
            u16::from_le_bytes([data[strings_size_off + 9], data[strings_size_off + 10]]),
            300
        );
    }

    // Property-based tests
    use proptest::prelude::*;

    fn arb_entry() -> impl Strategy<Value = FileEntry> {
        (
            "[a-zA-Z0-9._-]{1,40}",
            0u64..1 << 40,
            (any::<u64>(), any::<u64>()),
            any::<u64>(),
            any::<u64>(),
            1u64..100,
        )
            .prop_map(|(name, size, (hi, lo), inode, date, num_links)| FileEntry {
                name,
                size,
                hash: Hash128::new(hi, lo),
                inode,
                date,
                num_links,
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        /// Sidecar round-trip preserves every entry including the size
        /// reconstructed through the TOC.
        #[test]
        fn prop_roundtrip(mut entries in prop::collection::vec(arb_entry(), 0..30)) {
            sort_entries(&mut entries);
            let data = encode(&entries);
            let decoded = decode(&data, Path::new("/t/.dirdb"))?;
            prop_assert_eq!(decoded, entries);
        }

        /// Decoding never panics on arbitrary bytes.
        #[test]
        fn prop_decode_rejects_garbage_gracefully(data: Vec<u8>) {
            let _ = decode(&data, Path::new("/t/.dirdb"));
        }
    }
}
