use anyhow::{ensure, Context, Result};
use bloom::BloomFilter;
use byteorder::{LittleEndian, WriteBytesExt};
use hash::Fnv32;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::format::{bloom_sidecar_path, tmp_path, write_footer, TOMBSTONE_VSIZE};

pub struct SsTableWriter;

impl SsTableWriter {
    /// Writes an SSTable at `path` from `entries`, atomically.
    ///
    /// `entries` must be sorted ascending by key with no duplicates, exactly
    /// what a memtable snapshot or a merged `BTreeMap` yields. A `None` value
    /// is a tombstone.
    ///
    /// # Procedure
    ///
    /// 1. Stream records into `path + ".tmp"`, feeding the same bytes into a
    ///    running FNV-1a-32 checksum and each key into a bloom filter sized
    ///    at 10 bits/key (min 8 bits, k = 7).
    /// 2. Append the 12-byte footer (magic + checksum).
    /// 3. Flush, fsync, rename into place, fsync the final file.
    /// 4. Write the bloom sidecar the same way to `path + ".bloom"`.
    ///
    /// After this returns the table is either fully installed and
    /// checksum-valid or (on a crash) absent; a leftover `.tmp` is never
    /// named by the manifest and gets truncated on the next write.
    pub fn write_atomic<'a, I>(path: &Path, entries: I) -> Result<()>
    where
        I: ExactSizeIterator<Item = (&'a [u8], Option<&'a [u8]>)>,
    {
        let tmp = tmp_path(path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .with_context(|| format!("create sstable tmp at {}", tmp.display()))?;
        let mut w = BufWriter::new(file);

        let mut hasher = Fnv32::new();
        let mut filter = BloomFilter::with_capacity(entries.len());

        #[cfg(debug_assertions)]
        let mut prev_key: Option<Vec<u8>> = None;

        for (key, value) in entries {
            #[cfg(debug_assertions)]
            {
                if let Some(prev) = &prev_key {
                    debug_assert!(prev.as_slice() < key, "entries must be sorted and distinct");
                }
                prev_key = Some(key.to_vec());
            }

            ensure!(
                key.len() <= u32::MAX as usize,
                "key too large: {} bytes",
                key.len()
            );
            let ksize = key.len() as u32;
            let vsize = match value {
                Some(v) => {
                    ensure!(
                        v.len() < TOMBSTONE_VSIZE as usize,
                        "value too large: {} bytes (the maximum u32 length is reserved)",
                        v.len()
                    );
                    v.len() as u32
                }
                None => TOMBSTONE_VSIZE,
            };

            w.write_u32::<LittleEndian>(ksize)?;
            w.write_u32::<LittleEndian>(vsize)?;
            w.write_all(key)?;
            hasher.update(&ksize.to_le_bytes());
            hasher.update(&vsize.to_le_bytes());
            hasher.update(key);
            if let Some(v) = value {
                w.write_all(v)?;
                hasher.update(v);
            }

            filter.add(key);
        }

        write_footer(&mut w, hasher.finalize())?;
        w.flush()?;
        let file = w.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, path)
            .with_context(|| format!("install sstable at {}", path.display()))?;
        File::open(path)?.sync_all()?;

        filter.save_atomic(bloom_sidecar_path(path))?;

        Ok(())
    }
}
