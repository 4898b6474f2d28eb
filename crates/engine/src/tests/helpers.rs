use crate::{Engine, Options};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

/// Options with a tiny flush threshold so tests can produce SSTables without
/// writing a megabyte per table. Compaction stays manual unless a test says
/// otherwise.
pub fn small_options() -> Options {
    Options {
        flush_threshold: 64,
        compact_threshold: 100, // effectively disables auto-compaction
        merge_fanin: 4,
        wal_sync: false,
    }
}

pub fn open_small(dir: &Path) -> Engine {
    Engine::open_with(dir, small_options()).unwrap()
}

/// Polls `cond` until it holds or `timeout` elapses. Background compaction
/// is asynchronous, so tests wait on observable state instead of sleeping
/// fixed amounts.
pub fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

pub fn count_dat_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "dat")
                .unwrap_or(false)
        })
        .count()
}
