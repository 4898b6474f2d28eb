//! Write path: `put()`, `delete()`, `flush()`, and the internal flush
//! pipeline.
//!
//! All mutations flow through this module under the exclusive engine lock.
//! Each write is appended to the WAL first, then applied to the memtable;
//! crossing the byte threshold flushes the memtable into a new SSTable.

use anyhow::{ensure, Context, Result};
use sstable::{SsTable, SsTableWriter};
use std::sync::Arc;
use tracing::info;

use crate::recovery::sst_filename;
use crate::{Engine, Inner, State, MAX_KEY_BYTES, MAX_VALUE_BYTES};

impl Engine {
    /// Inserts or overwrites a key-value pair.
    ///
    /// # Errors
    ///
    /// Rejects empty or oversized keys and oversized values; otherwise fails
    /// only on I/O errors from the WAL append or a triggered flush. A failed
    /// append leaves on-disk state unchanged.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        ensure!(!key.is_empty(), "key must not be empty");
        ensure!(
            key.len() <= MAX_KEY_BYTES,
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_BYTES
        );
        ensure!(
            value.len() <= MAX_VALUE_BYTES,
            "value too large: {} bytes (max {})",
            value.len(),
            MAX_VALUE_BYTES
        );

        let mut state = self.inner.state.write();
        state.wal.append_put(&key, &value)?;
        state.mem.put(key, value);
        self.inner.maybe_flush(&mut state)
    }

    /// Deletes a key by writing a tombstone. The tombstone shadows any older
    /// value in SSTables until a future compaction of the oldest tier could
    /// retire it.
    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        ensure!(!key.is_empty(), "key must not be empty");
        ensure!(
            key.len() <= MAX_KEY_BYTES,
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_BYTES
        );

        let mut state = self.inner.state.write();
        state.wal.append_delete(&key)?;
        state.mem.delete(key);
        self.inner.maybe_flush(&mut state)
    }

    /// Forces the memtable out to a new SSTable. No-op when the memtable is
    /// empty (an empty flush must not create a file).
    pub fn flush(&self) -> Result<()> {
        let mut state = self.inner.state.write();
        self.inner.flush_locked(&mut state)
    }
}

impl Inner {
    pub(crate) fn maybe_flush(&self, state: &mut State) -> Result<()> {
        if state.mem.bytes() >= self.opts.flush_threshold {
            self.flush_locked(state)
        } else {
            Ok(())
        }
    }

    /// Flushes the memtable while holding the exclusive engine lock.
    ///
    /// # Steps
    ///
    /// 1. Allocate the next table id and filename.
    /// 2. Write the SSTable atomically from the sorted memtable snapshot.
    /// 3. Append the filename to the manifest and rewrite it atomically.
    /// 4. Open the new table and install it at the head of the live list.
    /// 5. Clear the memtable and reset the WAL.
    /// 6. Signal the compactor if the live count reached the threshold.
    ///
    /// A crash between steps 2 and 3 leaves the WAL authoritative (the
    /// orphaned file is not in the manifest); after step 3 the SSTable is
    /// authoritative, and replaying a not-yet-reset WAL on top of it is
    /// idempotent.
    pub(crate) fn flush_locked(&self, state: &mut State) -> Result<()> {
        if state.mem.is_empty() {
            return Ok(());
        }

        let id = state.next_sst_id;
        state.next_sst_id += 1;
        let filename = sst_filename(id);
        let path = self.dir.join(&filename);

        SsTableWriter::write_atomic(
            &path,
            state.mem.iter().map(|(k, v)| (k.as_slice(), v.as_deref())),
        )
        .with_context(|| format!("flush memtable to {}", filename))?;

        let mut files = self.manifest.read()?;
        files.push(filename.clone());
        self.manifest.write_atomic(&files)?;

        let table = Arc::new(SsTable::open(&path)?);
        info!(
            table = %filename,
            entries = table.len(),
            bytes = state.mem.bytes(),
            "memtable flushed"
        );
        state.tables.insert(0, table);

        state.mem.clear();
        state.wal.reset()?;

        if state.tables.len() >= self.opts.compact_threshold {
            self.request_compaction();
        }

        Ok(())
    }
}
