//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk storage files for the HeliosKV storage engine.
//!
//! When the in-memory [`memtable`] exceeds its size threshold the engine
//! flushes it to disk as an SSTable; compaction produces them too. SSTables
//! are *write-once, read-many*: once created they are never modified, only
//! replaced and deleted by a later compaction.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ RECORDS (sorted ascending by key, packed, little-endian)      │
//! │                                                               │
//! │ ksize (u32) | vsize (u32) | key | [value]                     │
//! │                                                               │
//! │ vsize == 0xFFFFFFFF marks a tombstone; no value bytes follow. │
//! │ ... repeated for each record ...                              │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 12 bytes)                                 │
//! │                                                               │
//! │ magic (u64 LE = 0x48454C494F535354, "HELIOSST")               │
//! │ checksum (u32 LE, FNV-1a-32 over the whole records region)    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! A bloom sidecar (`<table>.bloom`) sits next to each table; see the
//! [`bloom`] crate for its format. The sidecar is best-effort: if it is
//! missing or malformed, lookups skip the filter and hit the table directly.
//!
//! ## Reading
//!
//! [`SsTable::open`] validates the footer and checksum, then scans the file
//! once to build a **sparse index**: one `(key, offset)` pair for every 16th
//! record. A point lookup binary-searches the index for its entry point and
//! scans forward at most 16 records.

mod format;
mod reader;
mod writer;

pub use format::{
    bloom_sidecar_path, FOOTER_BYTES, INDEX_STRIDE, SSTABLE_MAGIC, TOMBSTONE_VSIZE,
};
pub use reader::{read_entries, Lookup, SsTable};
pub use writer::SsTableWriter;

#[cfg(test)]
mod tests;
