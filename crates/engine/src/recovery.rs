//! Cold-start recovery: load the manifest and its tables, derive the next
//! table id, and replay the WAL into a fresh memtable.

use anyhow::{Context, Result};
use memtable::Memtable;
use sstable::SsTable;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use wal::{WalError, WalReader, WalRecord};

use crate::manifest::Manifest;

/// Formats the filename for table `id`: `sst_000042.dat`. Ids are zero-padded
/// so a directory listing sorts in creation order; the manifest, not the
/// filename, remains the source of truth for ordering.
pub(crate) fn sst_filename(id: u64) -> String {
    format!("sst_{:06}.dat", id)
}

/// Extracts the id from a table filename, if it has the expected shape.
pub(crate) fn parse_sst_id(name: &str) -> Option<u64> {
    name.strip_prefix("sst_")?
        .strip_suffix(".dat")?
        .parse()
        .ok()
}

/// Loads the live tables named by the manifest (oldest first on disk,
/// newest first in the returned list) and derives the next table id.
///
/// Tables that are missing or fail validation are excluded from reads and
/// dropped from the manifest, which is rewritten atomically. Their ids still
/// count toward `next_sst_id` so ids are never reused.
pub(crate) fn load_tables(
    dir: &Path,
    manifest: &Manifest,
) -> Result<(Vec<Arc<SsTable>>, u64)> {
    let files = manifest.read()?;

    let mut next_id = 1u64;
    for name in &files {
        if let Some(id) = parse_sst_id(name) {
            next_id = next_id.max(id + 1);
        }
    }

    let mut live: Vec<(String, Arc<SsTable>)> = Vec::new();
    for name in &files {
        let path = dir.join(name);
        match SsTable::open(&path) {
            Ok(table) => live.push((name.clone(), Arc::new(table))),
            Err(e) => warn!(table = %name, error = %e, "excluding unreadable sstable"),
        }
    }

    let cleaned: Vec<String> = live.iter().map(|(name, _)| name.clone()).collect();
    if cleaned != files {
        manifest
            .write_atomic(&cleaned)
            .context("rewrite manifest without unreadable tables")?;
        info!(
            dropped = files.len() - cleaned.len(),
            "manifest rewritten without unreadable tables"
        );
    }

    // Manifest is oldest-first; the read path wants newest-first.
    let mut tables: Vec<Arc<SsTable>> = live.into_iter().map(|(_, t)| t).collect();
    tables.reverse();

    Ok((tables, next_id))
}

/// Replays the WAL at `path` into `mem`, returning the number of records
/// applied. A missing file is a fresh database.
///
/// Replay goes straight into the memtable and never back through a WAL
/// writer: the records being replayed are already in the log.
pub(crate) fn replay_wal(path: &Path, mem: &mut Memtable) -> Result<usize> {
    let mut reader = match WalReader::open(path) {
        Ok(r) => r,
        Err(WalError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(anyhow::Error::new(e).context("open wal for replay")),
    };

    let mut applied = 0usize;
    reader.replay(|record| {
        applied += 1;
        match record {
            WalRecord::Put { key, value } => mem.put(key, value),
            WalRecord::Del { key } => mem.delete(key),
        }
    })?;
    Ok(applied)
}
