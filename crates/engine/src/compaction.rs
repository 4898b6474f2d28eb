//! Size-tiered background compaction.
//!
//! A single worker thread waits on a condvar for a coalesced "work requested"
//! flag, set by [`Engine::compact`] or by a flush that pushed the live table
//! count to the threshold. Each cycle merges the newest `merge_fanin` tables
//! (the most recently flushed, smallest tier) into one, then swaps them out
//! of the manifest and the live list.
//!
//! Tombstones survive the merge: older tables at the front of the manifest
//! may still hold the shadowed keys, so dropping a tombstone here could
//! resurrect them. Only a future full compaction of the oldest tier could
//! retire tombstones safely.

use anyhow::Result;
use sstable::{bloom_sidecar_path, read_entries, SsTable, SsTableWriter};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::recovery::sst_filename;
use crate::{Engine, Inner};

impl Engine {
    /// Signals the background worker to run a compaction cycle. Returns
    /// immediately; the merge happens asynchronously. Signals coalesce: two
    /// requests before the worker wakes run one cycle.
    pub fn compact(&self) {
        self.inner.request_compaction();
    }
}

/// Worker loop: wait for a signal, run one cycle, repeat until stopped.
/// In-progress merges finish before `close` joins the thread; a request
/// pending at shutdown is dropped.
pub(crate) fn bg_loop(inner: &Arc<Inner>) {
    loop {
        {
            let mut bg = inner.bg.lock();
            while !bg.stop && !bg.compact_requested {
                inner.bg_cv.wait(&mut bg);
            }
            if bg.stop {
                return;
            }
            bg.compact_requested = false;
        }

        if let Err(e) = inner.compact_once() {
            warn!(error = %e, "background compaction failed");
        }
    }
}

impl Inner {
    pub(crate) fn request_compaction(&self) {
        {
            let mut bg = self.bg.lock();
            bg.compact_requested = true;
        }
        self.bg_cv.notify_one();
    }

    /// One compaction cycle.
    ///
    /// The engine lock is held only for the critical sections (snapshotting
    /// the manifest, allocating the output id, installing the result), so
    /// writers and readers proceed during the merge itself.
    /// Flushes that land mid-merge append strictly newer tables which are
    /// not part of `merge_files` and stay newer than the merged output.
    pub(crate) fn compact_once(&self) -> Result<()> {
        // Snapshot the manifest under the engine lock.
        let files = {
            let _state = self.state.write();
            self.manifest.read()?
        };
        if files.len() < self.opts.merge_fanin {
            return Ok(());
        }
        let merge_files: Vec<String> = files[files.len() - self.opts.merge_fanin..].to_vec();

        // Merge outside the lock; the inputs are immutable files.
        let merged = merge_entries(&self.dir, &merge_files)?;

        // Allocate the output id under the lock.
        let out_name = {
            let mut state = self.state.write();
            let id = state.next_sst_id;
            state.next_sst_id += 1;
            sst_filename(id)
        };
        let out_path = self.dir.join(&out_name);

        SsTableWriter::write_atomic(
            &out_path,
            merged.iter().map(|(k, v)| (k.as_slice(), v.as_deref())),
        )?;

        // Install under the lock: swap the manifest suffix, delete the
        // merged-away files, and publish the new live list.
        let mut state = self.state.write();
        let current = self.manifest.read()?;
        if current.len() < self.opts.merge_fanin {
            return Ok(());
        }

        // Replace the merged files by name. `merge_files` was a suffix of
        // the snapshot, so everything before its first entry is older and
        // keeps its position; anything after it was flushed during the merge
        // and must stay newer than the merged output.
        let insert_at = current
            .iter()
            .position(|f| *f == merge_files[0])
            .unwrap_or(current.len());
        let mut new_files: Vec<String> = current
            .iter()
            .filter(|f| !merge_files.contains(*f))
            .cloned()
            .collect();
        let insert_at = insert_at.min(new_files.len());
        new_files.insert(insert_at, out_name.clone());
        self.manifest.write_atomic(&new_files)?;

        for name in &merge_files {
            let path = self.dir.join(name);
            let _ = fs::remove_file(&path);
            let _ = fs::remove_file(bloom_sidecar_path(&path));
        }

        let mut tables = Vec::with_capacity(new_files.len());
        for name in new_files.iter().rev() {
            match SsTable::open(self.dir.join(name)) {
                Ok(t) => tables.push(Arc::new(t)),
                Err(e) => warn!(table = %name, error = %e, "excluding unreadable sstable"),
            }
        }
        state.tables = tables;

        info!(
            merged = merge_files.len(),
            entries = merged.len(),
            into = %out_name,
            "compaction installed"
        );
        Ok(())
    }
}

/// Folds the named tables, oldest to newest, into one ordered map; for equal
/// keys the later (newer) table wins, tombstones included. Files that fail
/// validation are skipped rather than aborting the merge.
pub(crate) fn merge_entries(
    dir: &Path,
    files: &[String],
) -> Result<BTreeMap<Vec<u8>, Option<Vec<u8>>>> {
    let mut merged = BTreeMap::new();
    for name in files {
        let path = dir.join(name);
        if !SsTable::is_valid(&path) {
            warn!(table = %name, "skipping invalid sstable during merge");
            continue;
        }
        for (key, value) in read_entries(&path)? {
            merged.insert(key, value);
        }
    }
    Ok(merged)
}
