//! # Bloom Filter
//!
//! A space-efficient probabilistic data structure for set membership testing.
//!
//! A bloom filter can tell you with certainty that a key is **not** in the set
//! (no false negatives), but may occasionally report that a key **is** in the
//! set when it isn't (false positives).
//!
//! ## Usage in HeliosKV
//!
//! Every SSTable carries a bloom sidecar file (`<table>.bloom`) built from its
//! keys. Point lookups consult the filter first: a negative answer skips the
//! table entirely, avoiding the sparse-index search and record reads. A
//! missing or malformed sidecar just disables the fast path; the table stays
//! readable.
//!
//! ## Sidecar wire format (all little-endian)
//!
//! ```text
//! [magic: u32 = 0xB100B100][m_bits: u32][k_hashes: u32][nbytes: u32][bits]
//! ```
//!
//! `nbytes` must equal `ceil(m_bits / 8)` or the sidecar is rejected.

use anyhow::{Context, Result};
use hash::fnv1a_64;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Magic identifying a bloom sidecar file.
pub const BLOOM_MAGIC: u32 = 0xB100_B100;

/// Filter sizing: bits allocated per expected key.
pub const BITS_PER_KEY: usize = 10;
/// Filter sizing: number of probe positions per key.
pub const NUM_PROBES: u32 = 7;

// Probe derivation constants. These are part of the sidecar format: a filter
// written with one set of seeds is unreadable with another.
const SEED_A: u64 = 0xA5A5_A5A5_A5A5_A5A5;
const SEED_B: u64 = 0x5A5A_5A5A_5A5A_5A5A;
const MIX_C1: u64 = 0xff51_afd7_ed55_8ccd;
const MIX_C2: u64 = 0xc4ce_b9fe_1a85_ec53;

/// A bloom filter backed by a bit vector with `k` double-hashed probes.
///
/// Probe positions are `(h1 + i * h2) mod m_bits` with `h2` forced odd so the
/// probe sequence cycles through the whole array.
pub struct BloomFilter {
    bits: Vec<u8>,
    m_bits: u32,
    k_hashes: u32,
}

impl BloomFilter {
    /// Creates an empty filter with exactly `m_bits` bits and `k_hashes`
    /// probes. If either is zero the filter is degenerate: it stores nothing
    /// and [`possibly_contains`](Self::possibly_contains) always answers
    /// `true` (conservative: callers fall through to the real lookup).
    #[must_use]
    pub fn new(m_bits: u32, k_hashes: u32) -> Self {
        if m_bits == 0 || k_hashes == 0 {
            return Self {
                bits: Vec::new(),
                m_bits: 0,
                k_hashes: 0,
            };
        }
        let nbytes = (m_bits as usize + 7) / 8;
        Self {
            bits: vec![0u8; nbytes],
            m_bits,
            k_hashes,
        }
    }

    /// Creates a filter sized for `n_keys` keys: [`BITS_PER_KEY`] bits per
    /// key (at least 8 bits total) and [`NUM_PROBES`] probes.
    #[must_use]
    pub fn with_capacity(n_keys: usize) -> Self {
        let m = n_keys
            .saturating_mul(BITS_PER_KEY)
            .max(8)
            .min(u32::MAX as usize) as u32;
        Self::new(m, NUM_PROBES)
    }

    /// Inserts a key.
    pub fn add(&mut self, key: &[u8]) {
        if self.m_bits == 0 || self.k_hashes == 0 {
            return;
        }
        let (h1, h2) = probe_pair(key);
        for i in 0..self.k_hashes {
            let h = h1.wrapping_add(u64::from(i).wrapping_mul(h2));
            self.set_bit((h % u64::from(self.m_bits)) as u32);
        }
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not**. Degenerate filters always answer `true`.
    #[must_use]
    pub fn possibly_contains(&self, key: &[u8]) -> bool {
        if self.m_bits == 0 || self.k_hashes == 0 {
            return true;
        }
        let (h1, h2) = probe_pair(key);
        for i in 0..self.k_hashes {
            let h = h1.wrapping_add(u64::from(i).wrapping_mul(h2));
            if !self.get_bit((h % u64::from(self.m_bits)) as u32) {
                return false;
            }
        }
        true
    }

    /// Returns the number of bits in the filter.
    #[must_use]
    pub fn num_bits(&self) -> u32 {
        self.m_bits
    }

    /// Returns the number of probes.
    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.k_hashes
    }

    /// Serializes the filter in sidecar wire format.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&BLOOM_MAGIC.to_le_bytes())?;
        w.write_all(&self.m_bits.to_le_bytes())?;
        w.write_all(&self.k_hashes.to_le_bytes())?;
        w.write_all(&(self.bits.len() as u32).to_le_bytes())?;
        w.write_all(&self.bits)?;
        Ok(())
    }

    /// Deserializes a filter from sidecar wire format.
    ///
    /// Rejects wrong magic, an `nbytes` that disagrees with `m_bits`, and
    /// short reads.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf4 = [0u8; 4];

        r.read_exact(&mut buf4)?;
        if u32::from_le_bytes(buf4) != BLOOM_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad bloom sidecar magic",
            ));
        }

        r.read_exact(&mut buf4)?;
        let m_bits = u32::from_le_bytes(buf4);
        r.read_exact(&mut buf4)?;
        let k_hashes = u32::from_le_bytes(buf4);
        r.read_exact(&mut buf4)?;
        let nbytes = u32::from_le_bytes(buf4) as usize;

        let expected = if m_bits == 0 || k_hashes == 0 {
            0
        } else {
            (m_bits as usize + 7) / 8
        };
        if nbytes != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bloom sidecar nbytes disagrees with m_bits",
            ));
        }

        let mut filter = Self::new(m_bits, k_hashes);
        if nbytes > 0 {
            r.read_exact(&mut filter.bits)?;
        }
        Ok(filter)
    }

    /// Writes the sidecar atomically: tmp file, fsync, rename into place,
    /// fsync the final file.
    pub fn save_atomic<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let tmp = tmp_path(path);

        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .with_context(|| format!("create bloom tmp at {}", tmp.display()))?;
            self.write_to(&mut f)?;
            f.flush()?;
            f.sync_all()?;
        }

        fs::rename(&tmp, path)
            .with_context(|| format!("install bloom sidecar at {}", path.display()))?;
        File::open(path)?.sync_all()?;
        Ok(())
    }

    /// Loads a sidecar, returning `None` if the file is missing or malformed.
    /// Filtering is an optimization; a broken sidecar must not take the table
    /// down with it.
    #[must_use]
    pub fn load<P: AsRef<Path>>(path: P) -> Option<Self> {
        let mut f = File::open(path).ok()?;
        Self::read_from(&mut f).ok()
    }

    fn set_bit(&mut self, idx: u32) {
        self.bits[(idx / 8) as usize] |= 1 << (idx % 8);
    }

    fn get_bit(&self, idx: u32) -> bool {
        (self.bits[(idx / 8) as usize] >> (idx % 8)) & 1 == 1
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("m_bits", &self.m_bits)
            .field("k_hashes", &self.k_hashes)
            .field("bytes", &self.bits.len())
            .finish()
    }
}

/// Derives the double-hashing pair for `key`: two seeded 64-bit hashes, the
/// second forced odd so the probe stride and the bit-array size are coprime.
fn probe_pair(key: &[u8]) -> (u64, u64) {
    let h1 = seeded_hash64(key, SEED_A);
    let h2 = seeded_hash64(key, SEED_B) | 1;
    (h1, h2)
}

/// FNV-1a-64 of `key` XORed into `seed`, then a 64-bit finalizer mix.
fn seeded_hash64(key: &[u8], seed: u64) -> u64 {
    let mut h = seed ^ fnv1a_64(key);
    h ^= h >> 33;
    h = h.wrapping_mul(MIX_C1);
    h ^= h >> 33;
    h = h.wrapping_mul(MIX_C2);
    h ^= h >> 33;
    h
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}
