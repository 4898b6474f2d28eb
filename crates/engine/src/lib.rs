//! # Engine - HeliosKV Storage Engine
//!
//! The central orchestrator that ties together the [`memtable`], [`wal`], and
//! [`sstable`] crates into a complete LSM key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                   ENGINE                      │
//! │                                               │
//! │ write.rs → WAL append → Memtable insert       │
//! │              |                                │
//! │              |  (byte threshold exceeded?)    │
//! │              |            yes                 │
//! │              v                                │
//! │           flush → new SSTable + manifest      │
//! │              |                                │
//! │              |  (live table count >= 8?)      │
//! │              |            yes                 │
//! │              v                                │
//! │       signal background compactor             │
//! │        (merges the 4 newest tables)           │
//! │                                               │
//! │ read.rs → Memtable → tables newest→oldest     │
//! │            (first match wins)                 │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | `lib.rs`       | `Engine` struct, options, open/close, `Debug`, `Drop`|
//! | [`recovery`]   | manifest + SSTable loading, WAL replay               |
//! | [`write`]      | `put()`, `delete()`, `flush()`, internal flush path  |
//! | [`read`]       | `get()`                                              |
//! | [`compaction`] | background worker, size-tiered merge                 |
//! | [`manifest`]   | the `manifest.txt` list of live tables (atomic ops)  |
//!
//! ## Crash Safety
//!
//! Every write is appended to the WAL **before** the memtable update. The WAL
//! is reset only **after** a successful flush + manifest update. SSTables,
//! their bloom sidecars, and the manifest are all installed via temp file +
//! fsync + rename, so a crash leaves either the old state or the new state on
//! disk, never a torn one. On reopen, unreadable tables are excluded and
//! dropped from the manifest, and any unparseable WAL tail is ignored.
//!
//! ## Concurrency
//!
//! One `RwLock` guards the mutable state (memtable, WAL handle, live table
//! list). Readers take it shared just long enough to consult the memtable and
//! clone the table list; table reads happen outside the lock because table
//! files are immutable. A single background thread performs compactions,
//! woken through a condvar by `compact()` or by flush when the live count
//! reaches the threshold.

mod compaction;
mod manifest;
mod read;
mod recovery;
mod write;

use anyhow::{ensure, Context, Result};
use manifest::Manifest;
use memtable::Memtable;
use parking_lot::{Condvar, Mutex, RwLock};
use sstable::SsTable;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;
use wal::WalWriter;

/// Maximum allowed key size (must fit the u32 length field).
pub const MAX_KEY_BYTES: usize = u32::MAX as usize;

/// Maximum allowed value size. The all-ones u32 length marks tombstones on
/// disk, so a value may be at most 2^32 - 2 bytes.
pub const MAX_VALUE_BYTES: usize = (u32::MAX - 1) as usize;

/// Default memtable byte count that triggers a flush (1 MiB).
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1 << 20;

/// Default live-table count at which a flush signals the compactor.
pub const DEFAULT_COMPACT_THRESHOLD: usize = 8;

/// Default number of newest tables merged per compaction cycle.
pub const DEFAULT_MERGE_FANIN: usize = 4;

/// Name of the write-ahead log inside the database directory.
pub const WAL_FILENAME: &str = "wal.log";

/// Engine tuning knobs. [`Options::default`] matches the production
/// constants; tests and the CLI shrink the thresholds. All three counts must
/// be at least 1; [`Engine::open_with`] rejects degenerate values.
#[derive(Debug, Clone)]
pub struct Options {
    /// Memtable byte count that triggers a flush (checked with `>=` after
    /// every write).
    pub flush_threshold: usize,
    /// Live-table count at which a flush signals the background compactor.
    pub compact_threshold: usize,
    /// Number of newest tables merged per compaction cycle.
    pub merge_fanin: usize,
    /// If `true`, every WAL append is followed by fsync.
    pub wal_sync: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            merge_fanin: DEFAULT_MERGE_FANIN,
            wal_sync: false,
        }
    }
}

/// The HeliosKV storage engine.
///
/// All operations take `&self`; the engine is `Send + Sync` and is shared
/// across threads behind an `Arc`.
///
/// # Write Path
///
/// 1. Validate key and value sizes.
/// 2. Append the record to the WAL.
/// 3. Apply the mutation to the memtable.
/// 4. If the memtable byte count reached the threshold, flush it to a new
///    SSTable, append it to the manifest, and reset the WAL.
///
/// # Read Path
///
/// 1. Check the memtable under the shared lock (freshest data, includes
///    tombstones).
/// 2. Check SSTables newest to oldest, outside the lock. First match wins;
///    tombstones shadow older values.
///
/// # Recovery
///
/// `open` loads the manifest, excludes unreadable tables (rewriting the
/// manifest if any were dropped), replays the WAL into a fresh memtable, and
/// starts the background compactor.
pub struct Engine {
    inner: Arc<Inner>,
    /// Background compactor thread, joined by `close`.
    worker: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct Inner {
    pub(crate) dir: PathBuf,
    pub(crate) opts: Options,
    pub(crate) manifest: Manifest,
    pub(crate) state: RwLock<State>,
    pub(crate) bg: Mutex<BgState>,
    pub(crate) bg_cv: Condvar,
}

pub(crate) struct State {
    pub(crate) mem: Memtable,
    pub(crate) wal: WalWriter,
    /// Live tables, newest first. Readers clone the vector out of the lock;
    /// the `Arc`s keep table files readable while compaction swaps the list
    /// and unlinks the merged-away files.
    pub(crate) tables: Vec<Arc<SsTable>>,
    /// Next SSTable id, monotonic within the directory.
    pub(crate) next_sst_id: u64,
}

#[derive(Default)]
pub(crate) struct BgState {
    pub(crate) stop: bool,
    pub(crate) compact_requested: bool,
}

impl Engine {
    /// Opens (creating if necessary) the database at `dir` with default
    /// options.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_with(dir, Options::default())
    }

    /// Opens the database at `dir` with explicit options.
    ///
    /// # Errors
    ///
    /// Rejects degenerate options (any threshold of zero; a fan-in of zero
    /// would give the compactor nothing to merge) and fails on I/O errors
    /// while creating the directory, loading tables, or replaying the WAL.
    pub fn open_with<P: AsRef<Path>>(dir: P, opts: Options) -> Result<Self> {
        ensure!(
            opts.flush_threshold >= 1,
            "flush_threshold must be at least 1"
        );
        ensure!(
            opts.compact_threshold >= 1,
            "compact_threshold must be at least 1"
        );
        ensure!(opts.merge_fanin >= 1, "merge_fanin must be at least 1");

        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create database directory {}", dir.display()))?;

        let manifest = Manifest::new(&dir);
        let (tables, next_sst_id) = recovery::load_tables(&dir, &manifest)?;

        // Replay before opening the writer so the reader has the file to
        // itself, then append from where the durable prefix ends.
        let wal_path = dir.join(WAL_FILENAME);
        let mut mem = Memtable::new();
        let replayed = recovery::replay_wal(&wal_path, &mut mem)?;
        let wal = WalWriter::create(&wal_path, opts.wal_sync)?;

        info!(
            dir = %dir.display(),
            tables = tables.len(),
            wal_records = replayed,
            "engine opened"
        );

        let inner = Arc::new(Inner {
            dir,
            opts,
            manifest,
            state: RwLock::new(State {
                mem,
                wal,
                tables,
                next_sst_id,
            }),
            bg: Mutex::new(BgState::default()),
            bg_cv: Condvar::new(),
        });

        let worker = {
            let inner = Arc::clone(&inner);
            std::thread::Builder::new()
                .name("helios-compactor".into())
                .spawn(move || compaction::bg_loop(&inner))
                .context("spawn background compactor")?
        };

        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stops the background worker and joins it. Idempotent.
    ///
    /// Does **not** flush the memtable: unflushed writes live in the WAL and
    /// are replayed on the next open. Callers that want everything in
    /// SSTables call [`flush`](Self::flush) first.
    pub fn close(&self) {
        {
            let mut bg = self.inner.bg.lock();
            bg.stop = true;
        }
        self.inner.bg_cv.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// Returns the number of live SSTables.
    #[must_use]
    pub fn sstable_count(&self) -> usize {
        self.inner.state.read().tables.len()
    }

    /// Returns the number of entries buffered in the memtable.
    #[must_use]
    pub fn memtable_len(&self) -> usize {
        self.inner.state.read().mem.len()
    }

    /// Returns the approximate byte count buffered in the memtable.
    #[must_use]
    pub fn memtable_bytes(&self) -> usize {
        self.inner.state.read().mem.bytes()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Engine")
            .field("dir", &self.inner.dir)
            .field("memtable_entries", &state.mem.len())
            .field("memtable_bytes", &state.mem.bytes())
            .field("sstable_count", &state.tables.len())
            .field("next_sst_id", &state.next_sst_id)
            .field("flush_threshold", &self.inner.opts.flush_threshold)
            .field("compact_threshold", &self.inner.opts.compact_threshold)
            .field("merge_fanin", &self.inner.opts.merge_fanin)
            .finish()
    }
}

/// Stops and joins the worker so a dropped engine never leaks the thread.
/// Deliberately does not flush; see [`Engine::close`].
impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests;
