use anyhow::{bail, Context, Result};
use bloom::BloomFilter;
use byteorder::{LittleEndian, ReadBytesExt};
use hash::Fnv32;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::format::{
    bloom_sidecar_path, read_footer, FOOTER_BYTES, INDEX_STRIDE, SSTABLE_MAGIC, TOMBSTONE_VSIZE,
};

/// Outcome of a point lookup against a single table.
///
/// The three cases matter to the engine's read path: `Value` and `Tombstone`
/// both stop the newest→oldest walk (a tombstone hides anything older), only
/// `NotFound` falls through to the next table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The key is not in this table.
    NotFound,
    /// The key was deleted; older tables must not be consulted.
    Tombstone,
    /// The key maps to this value.
    Value(Vec<u8>),
}

/// An open, validated SSTable ready for point lookups.
///
/// Owns a persistent file handle (wrapped in a `Mutex` so `get` works through
/// `&self`) and the sparse in-memory index built at open. The file contents
/// are immutable, so any number of `SsTable`s and threads can read the same
/// file safely.
pub struct SsTable {
    path: PathBuf,
    /// Persistent read handle; the mutex only serializes seeks within one
    /// `SsTable`, never across tables.
    file: Mutex<BufReader<File>>,
    /// Byte offset where the records region ends (file size minus footer).
    end: u64,
    /// Sparse index: `(key, offset)` for every 16th record, record 0 always
    /// included. Sorted by key because records are.
    index: Vec<(Vec<u8>, u64)>,
    bloom: Option<BloomFilter>,
    n_records: usize,
}

impl SsTable {
    /// Returns `true` iff the file is a fully-formed SSTable: at least
    /// footer-sized, correct magic, and an FNV-1a-32 checksum of the records
    /// region matching the footer.
    #[must_use]
    pub fn is_valid<P: AsRef<Path>>(path: P) -> bool {
        fn check(path: &Path) -> io::Result<bool> {
            let f = File::open(path)?;
            let size = f.metadata()?.len();
            if size < FOOTER_BYTES {
                return Ok(false);
            }

            let mut r = BufReader::new(f);
            r.seek(SeekFrom::Start(size - FOOTER_BYTES))?;
            let (magic, stored) = read_footer(&mut r)?;
            if magic != SSTABLE_MAGIC {
                return Ok(false);
            }

            r.seek(SeekFrom::Start(0))?;
            let mut hasher = Fnv32::new();
            let mut remaining = size - FOOTER_BYTES;
            let mut buf = [0u8; 64 * 1024];
            while remaining > 0 {
                let n = buf.len().min(remaining as usize);
                r.read_exact(&mut buf[..n])?;
                hasher.update(&buf[..n]);
                remaining -= n as u64;
            }
            Ok(hasher.finalize() == stored)
        }
        check(path.as_ref()).unwrap_or(false)
    }

    /// Opens a table: validates it, loads the bloom sidecar if one is present
    /// and well-formed, and scans the records region once to build the sparse
    /// index.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, truncated, carries the wrong magic, or
    /// fails its checksum. Callers (the engine's recovery path) exclude such
    /// tables from reads and drop them from the manifest.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !Self::is_valid(&path) {
            bail!("invalid sstable (bad footer or checksum): {}", path.display());
        }

        let f = File::open(&path)
            .with_context(|| format!("open sstable at {}", path.display()))?;
        let size = f.metadata()?.len();
        let end = size - FOOTER_BYTES;

        let bloom = BloomFilter::load(bloom_sidecar_path(&path));
        if bloom.is_none() {
            debug!(table = %path.display(), "no usable bloom sidecar; filtering disabled");
        }

        let mut r = BufReader::new(f);
        let mut index = Vec::new();
        let mut offset = 0u64;
        let mut count = 0usize;

        while offset < end {
            if end - offset < 8 {
                break;
            }
            let ksize = u64::from(r.read_u32::<LittleEndian>()?);
            let vsize = r.read_u32::<LittleEndian>()?;
            if offset + 8 + ksize > end {
                break;
            }
            let mut key = vec![0u8; ksize as usize];
            r.read_exact(&mut key)?;
            let mut next = offset + 8 + ksize;
            if vsize != TOMBSTONE_VSIZE {
                let vlen = u64::from(vsize);
                if next + vlen > end {
                    break;
                }
                r.seek_relative(vlen as i64)?;
                next += vlen;
            }

            if count % INDEX_STRIDE == 0 {
                index.push((key, offset));
            }
            count += 1;
            offset = next;
        }

        Ok(Self {
            path,
            file: Mutex::new(r),
            end,
            index,
            bloom,
            n_records: count,
        })
    }

    /// Point lookup for `key`.
    ///
    /// The bloom filter (if loaded) pre-screens; then the sparse index is
    /// binary-searched for the greatest entry with `entry.key <= key`, and at
    /// most [`INDEX_STRIDE`] records are scanned forward from its offset.
    ///
    /// Read errors are reported as [`Lookup::NotFound`]: a torn record in one
    /// table must not fail lookups that other tables can still answer.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Lookup {
        if let Some(filter) = &self.bloom {
            if !filter.possibly_contains(key) {
                return Lookup::NotFound;
            }
        }

        let pos = self.index.partition_point(|(k, _)| k.as_slice() <= key);
        let start = match pos.checked_sub(1) {
            Some(i) => self.index[i].1,
            // Key sorts before the first indexed key; the first index entry
            // is record 0, so this can only match at the very start.
            None => match self.index.first() {
                Some(&(_, off)) => off,
                None => return Lookup::NotFound,
            },
        };

        self.scan_for(key, start).unwrap_or(Lookup::NotFound)
    }

    fn scan_for(&self, target: &[u8], start: u64) -> io::Result<Lookup> {
        let mut f = self.file.lock();
        f.seek(SeekFrom::Start(start))?;
        let mut offset = start;

        loop {
            if offset >= self.end || self.end - offset < 8 {
                return Ok(Lookup::NotFound);
            }
            let ksize = u64::from(f.read_u32::<LittleEndian>()?);
            let vsize = f.read_u32::<LittleEndian>()?;
            if offset + 8 + ksize > self.end {
                return Ok(Lookup::NotFound);
            }
            let mut key = vec![0u8; ksize as usize];
            f.read_exact(&mut key)?;
            offset += 8 + ksize;

            match key.as_slice().cmp(target) {
                Ordering::Greater => return Ok(Lookup::NotFound),
                Ordering::Equal => {
                    if vsize == TOMBSTONE_VSIZE {
                        return Ok(Lookup::Tombstone);
                    }
                    let vlen = u64::from(vsize);
                    if offset + vlen > self.end {
                        return Ok(Lookup::NotFound);
                    }
                    let mut value = vec![0u8; vsize as usize];
                    f.read_exact(&mut value)?;
                    return Ok(Lookup::Value(value));
                }
                Ordering::Less => {
                    if vsize != TOMBSTONE_VSIZE {
                        let vlen = u64::from(vsize);
                        if offset + vlen > self.end {
                            return Ok(Lookup::NotFound);
                        }
                        f.seek_relative(vlen as i64)?;
                        offset += vlen;
                    }
                }
            }
        }
    }

    /// Returns the path this table was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of records counted during the open scan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.n_records
    }

    /// Returns `true` if the table holds zero records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n_records == 0
    }

    /// Returns `true` if a bloom sidecar was loaded for this table.
    #[must_use]
    pub fn has_bloom(&self) -> bool {
        self.bloom.is_some()
    }
}

impl std::fmt::Debug for SsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsTable")
            .field("path", &self.path)
            .field("records", &self.n_records)
            .field("index_entries", &self.index.len())
            .field("has_bloom", &self.bloom.is_some())
            .finish()
    }
}

/// Sequentially decodes every record in the table at `path`, in file order.
///
/// Used by compaction to fold tables into a merge map, and by tests to
/// inspect table contents. Assumes the caller has already checked
/// [`SsTable::is_valid`]; decoding is still bounds-checked and stops at the
/// end of the records region.
pub fn read_entries<P: AsRef<Path>>(path: P) -> Result<Vec<(Vec<u8>, Option<Vec<u8>>)>> {
    let path = path.as_ref();
    let f = File::open(path)
        .with_context(|| format!("open sstable at {}", path.display()))?;
    let size = f.metadata()?.len();
    if size < FOOTER_BYTES {
        bail!("sstable too small: {}", path.display());
    }
    let end = size - FOOTER_BYTES;

    let mut r = BufReader::new(f);
    let mut out = Vec::new();
    let mut offset = 0u64;

    while offset < end {
        if end - offset < 8 {
            break;
        }
        let ksize = u64::from(r.read_u32::<LittleEndian>()?);
        let vsize = r.read_u32::<LittleEndian>()?;
        if offset + 8 + ksize > end {
            break;
        }
        let mut key = vec![0u8; ksize as usize];
        r.read_exact(&mut key)?;
        offset += 8 + ksize;

        if vsize == TOMBSTONE_VSIZE {
            out.push((key, None));
        } else {
            let vlen = u64::from(vsize);
            if offset + vlen > end {
                break;
            }
            let mut value = vec![0u8; vsize as usize];
            r.read_exact(&mut value)?;
            offset += vlen;
            out.push((key, Some(value)));
        }
    }

    Ok(out)
}
