//! 128-bit content hashing on top of SHA3-256.

use digest::Digest;
use sha3::Sha3_256;
use std::fmt;
use std::io::Read;

use crate::error::Result;

/// Number of digest bytes consumed for the content hash.
pub const HASH_SIZE: usize = 16;

/// A 128-bit content hash stored as two 64-bit halves.
///
/// Ordering is `hi` then `lo`. The hex rendering concatenates `lo` before
/// `hi`, each as 16 zero-padded digits, and the byte serialization is
/// little-endian `lo` followed by little-endian `hi`.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash128 {
    hi: u64,
    lo: u64,
}

impl Hash128 {
    /// Create a hash from its two halves.
    pub fn new(hi: u64, lo: u64) -> Self {
        Hash128 { hi, lo }
    }

    /// High 64 bits.
    pub fn hi(&self) -> u64 {
        self.hi
    }

    /// Low 64 bits.
    pub fn lo(&self) -> u64 {
        self.lo
    }

    /// Interpret 16 digest bytes as little-endian (lo, hi).
    pub fn from_le_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&bytes[..8]);
        hi.copy_from_slice(&bytes[8..]);
        Hash128 {
            hi: u64::from_le_bytes(hi),
            lo: u64::from_le_bytes(lo),
        }
    }

    /// Serialize as 8 little-endian bytes of `lo` followed by 8 of `hi`.
    pub fn to_le_bytes(&self) -> [u8; HASH_SIZE] {
        let mut bytes = [0u8; HASH_SIZE];
        bytes[..8].copy_from_slice(&self.lo.to_le_bytes());
        bytes[8..].copy_from_slice(&self.hi.to_le_bytes());
        bytes
    }

    /// Convert to the 32-character hex form: `lo` digits, then `hi` digits.
    pub fn to_hex(&self) -> String {
        let mut bytes = [0u8; HASH_SIZE];
        bytes[..8].copy_from_slice(&self.lo.to_be_bytes());
        bytes[8..].copy_from_slice(&self.hi.to_be_bytes());
        hex::encode(bytes)
    }
}

impl fmt::Display for Hash128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash128({})", self.to_hex())
    }
}

/// Streaming 128-bit hasher.
///
/// Wraps SHA3-256 and keeps the first 16 digest bytes, so any digest
/// producing at least 16 bytes could back this without touching callers.
pub struct Hasher128 {
    inner: Sha3_256,
}

impl Hasher128 {
    /// Create a fresh hasher.
    pub fn new() -> Self {
        Hasher128 {
            inner: Sha3_256::new(),
        }
    }

    /// Add data.
    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    /// Finalize to the 128-bit content hash.
    pub fn finalize(self) -> Hash128 {
        let digest = self.inner.finalize();
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(&digest[..HASH_SIZE]);
        Hash128::from_le_bytes(bytes)
    }

    /// Hash a byte slice in one call.
    pub fn hash_bytes(data: &[u8]) -> Hash128 {
        let mut hasher = Hasher128::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Hash all data from a reader in `buf_size` chunks.
    ///
    /// Returns the hash and the number of bytes consumed.
    pub fn hash_reader<R: Read>(mut reader: R, buf_size: usize) -> Result<(Hash128, u64)> {
        let mut hasher = Hasher128::new();
        let mut buffer = vec![0u8; buf_size];
        let mut total = 0u64;
        loop {
            let count = reader.read(&mut buffer)?;
            if count == 0 {
                break;
            }
            hasher.update(&buffer[..count]);
            total += count as u64;
        }
        Ok((hasher.finalize(), total))
    }
}

impl Default for Hasher128 {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash for the same-filename content key: digest over the 16 little-endian
/// hash bytes followed by the leaf name bytes. An empty name contributes
/// nothing, leaving the plain key path untouched when the policy is off.
pub fn combined_name_hash(hash: Hash128, name: &str) -> Hash128 {
    let mut hasher = Hasher128::new();
    hasher.update(&hash.to_le_bytes());
    hasher.update(name.as_bytes());
    hasher.finalize()
}

/// Minimum number of leading bits that keeps all given hashes distinguishable.
///
/// Returns 0 when fewer than two distinct hashes exist. After sorting, the
/// longest common prefix between any two distinct hashes occurs between
/// neighboring entries, so only adjacent pairs are inspected.
pub fn min_unique_bits(mut hashes: Vec<Hash128>) -> u32 {
    hashes.sort();
    hashes.dedup();
    if hashes.len() <= 1 {
        return 0;
    }
    let mut max_common = 0u32;
    for pair in hashes.windows(2) {
        let hi_xor = pair[0].hi ^ pair[1].hi;
        let common = if hi_xor == 0 {
            64 + (pair[0].lo ^ pair[1].lo).leading_zeros()
        } else {
            hi_xor.leading_zeros()
        };
        max_common = max_common.max(common);
    }
    (max_common + 1).min(128)
}

/// Hex prefix length for rendering: whole nibbles, clamped to [4, 32].
pub fn unique_hex_len(bits: u32) -> usize {
    let nibbles = bits.div_ceil(4) as usize;
    nibbles.clamp(4, 32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_bytes_is_deterministic() {
        let a = Hasher128::hash_bytes(b"abc");
        let b = Hasher128::hash_bytes(b"abc");
        assert_eq!(a, b);
        assert_ne!(a, Hasher128::hash_bytes(b"abd"));
    }

    #[test]
    fn test_streaming_matches_oneshot() {
        let oneshot = Hasher128::hash_bytes(b"hello world");
        let mut hasher = Hasher128::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), oneshot);
    }

    #[test]
    fn test_hash_reader_counts_bytes() {
        let data = vec![0x42u8; 3000];
        let (hash, bytes) = Hasher128::hash_reader(&data[..], 1024).unwrap();
        assert_eq!(bytes, 3000);
        assert_eq!(hash, Hasher128::hash_bytes(&data));
    }

    #[test]
    fn test_hex_is_lo_then_hi() {
        let hash = Hash128::new(0x0123456789abcdef, 0xfedcba9876543210);
        assert_eq!(hash.to_hex(), "fedcba98765432100123456789abcdef");
    }

    #[test]
    fn test_le_bytes_roundtrip() {
        let hash = Hash128::new(0x1122334455667788, 0x99aabbccddeeff00);
        let bytes = hash.to_le_bytes();
        assert_eq!(bytes[0], 0x00);
        assert_eq!(bytes[7], 0x99);
        assert_eq!(bytes[8], 0x88);
        assert_eq!(bytes[15], 0x11);
        assert_eq!(Hash128::from_le_bytes(bytes), hash);
    }

    #[test]
    fn test_ordering_hi_then_lo() {
        let a = Hash128::new(0, u64::MAX);
        let b = Hash128::new(1, 0);
        assert!(a < b);
    }

    #[test]
    fn test_combined_name_hash_changes_with_name() {
        let base = Hasher128::hash_bytes(b"content");
        let a = combined_name_hash(base, "a.txt");
        let b = combined_name_hash(base, "b.txt");
        assert_ne!(a, b);
        assert_ne!(a, base);
    }

    #[test]
    fn test_min_unique_bits_trivial_sets() {
        assert_eq!(min_unique_bits(vec![]), 0);
        assert_eq!(min_unique_bits(vec![Hash128::new(1, 2)]), 0);
        // Duplicates collapse to one distinct value.
        assert_eq!(
            min_unique_bits(vec![Hash128::new(1, 2), Hash128::new(1, 2)]),
            0
        );
    }

    #[test]
    fn test_min_unique_bits_lowest_bit() {
        // Differ only in the lowest bit: all 127 leading bits collide.
        let bits = min_unique_bits(vec![Hash128::new(0, 0), Hash128::new(0, 1)]);
        assert_eq!(bits, 128);
    }

    #[test]
    fn test_min_unique_bits_clamps_at_128() {
        let bits = min_unique_bits(vec![
            Hash128::new(0, 0),
            Hash128::new(0, 1),
            Hash128::new(0x8000000000000000, 0),
        ]);
        assert_eq!(bits, 128);
    }

    #[test]
    fn test_min_unique_bits_top_nibble() {
        // 0xA... vs 0xB...: the top nibble differs, four bits suffice.
        let bits = min_unique_bits(vec![
            Hash128::new(0xa000000000000000, 0),
            Hash128::new(0xb000000000000000, 0),
        ]);
        assert_eq!(bits, 4);
    }

    #[test]
    fn test_unique_hex_len_clamps() {
        assert_eq!(unique_hex_len(0), 4);
        assert_eq!(unique_hex_len(4), 4);
        assert_eq!(unique_hex_len(17), 5);
        assert_eq!(unique_hex_len(128), 32);
    }

    // Property-based tests
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        /// Little-endian byte serialization is bijective.
        #[test]
        fn prop_le_bytes_roundtrip(bytes in prop::array::uniform16(any::<u8>())) {
            let hash = Hash128::from_le_bytes(bytes);
            prop_assert_eq!(hash.to_le_bytes(), bytes);
        }

        /// Hashing the same data always produces the same hash.
        #[test]
        fn prop_hash_deterministic(data: Vec<u8>) {
            prop_assert_eq!(Hasher128::hash_bytes(&data), Hasher128::hash_bytes(&data));
        }

        /// No two distinct hashes share min_unique_bits leading bits, and
        /// the reported count is exactly the worst pair's prefix plus one.
        #[test]
        fn prop_min_unique_bits_separates(
            raw in prop::collection::vec((any::<u64>(), any::<u64>()), 2..40)
        ) {
            let hashes: Vec<Hash128> =
                raw.into_iter().map(|(hi, lo)| Hash128::new(hi, lo)).collect();
            let mut distinct = hashes.clone();
            distinct.sort();
            distinct.dedup();
            prop_assume!(distinct.len() >= 2);

            let bits = min_unique_bits(hashes);
            prop_assert!(bits >= 1);

            let common = |a: &Hash128, b: &Hash128| -> u32 {
                let hi_xor = a.hi() ^ b.hi();
                if hi_xor == 0 {
                    64 + (a.lo() ^ b.lo()).leading_zeros()
                } else {
                    hi_xor.leading_zeros()
                }
            };
            let mut max_common = 0;
            for i in 0..distinct.len() {
                for j in (i + 1)..distinct.len() {
                    max_common = max_common.max(common(&distinct[i], &distinct[j]));
                }
            }
            if bits < 128 {
                prop_assert!(max_common < bits);
            }
            prop_assert_eq!(bits, (max_common + 1).min(128));
        }
    }
}
