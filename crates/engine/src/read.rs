//! Read path: `get()`.
//!
//! Point lookups check the memtable first (freshest data, includes
//! tombstones), then the SSTables newest to oldest. The first table that
//! knows the key answers for good: a value wins, a tombstone hides anything
//! older.

use sstable::Lookup;

use crate::Engine;

impl Engine {
    /// Looks up a key, returning its value or `None` (absent means never
    /// written *or* deleted; the store does not distinguish the two).
    ///
    /// The shared engine lock is held only while consulting the memtable and
    /// cloning the live table list; table reads run lock-free on immutable
    /// files. A per-table read failure is treated as "not in this table" so
    /// one corrupt file cannot deny reads that other tables can answer.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let tables = {
            let state = self.inner.state.read();
            if let Some(slot) = state.mem.entry(key) {
                return slot.clone();
            }
            state.tables.clone()
        };

        for table in &tables {
            match table.get(key) {
                Lookup::Value(v) => return Some(v),
                Lookup::Tombstone => return None,
                Lookup::NotFound => continue,
            }
        }
        None
    }
}
