use super::helpers::*;
use crate::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

// --------------------- Basic writes ---------------------

#[test]
fn put_then_get() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(dir.path())?;

    engine.put(b"name".to_vec(), b"alice".to_vec())?;
    assert_eq!(engine.get(b"name"), Some(b"alice".to_vec()));
    assert_eq!(engine.get(b"missing"), None);
    Ok(())
}

#[test]
fn overwrite_returns_newest() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(dir.path())?;

    engine.put(b"k".to_vec(), b"v1".to_vec())?;
    engine.put(b"k".to_vec(), b"v2".to_vec())?;
    assert_eq!(engine.get(b"k"), Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn delete_hides_value() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(dir.path())?;

    engine.put(b"k".to_vec(), b"v".to_vec())?;
    engine.delete(b"k".to_vec())?;
    assert_eq!(engine.get(b"k"), None);

    // A later put revives the key.
    engine.put(b"k".to_vec(), b"v2".to_vec())?;
    assert_eq!(engine.get(b"k"), Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn delete_of_absent_key_is_recorded_not_an_error() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(dir.path())?;

    engine.delete(b"never-written".to_vec())?;
    assert_eq!(engine.get(b"never-written"), None);
    assert_eq!(engine.memtable_len(), 1); // tombstone buffered
    Ok(())
}

// --------------------- Validation ---------------------

#[test]
fn empty_key_is_rejected() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path()).unwrap();

    assert!(engine.put(Vec::new(), b"v".to_vec()).is_err());
    assert!(engine.delete(Vec::new()).is_err());
}

// --------------------- Flush ---------------------

#[test]
fn flush_threshold_triggers_automatically() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_small(dir.path()); // 64-byte threshold

    // Each entry charges key + value + 16 bytes; a few puts cross 64.
    for i in 0..4u32 {
        engine.put(format!("key{}", i).into_bytes(), vec![b'v'; 10])?;
    }

    assert!(engine.sstable_count() >= 1, "threshold should have flushed");
    Ok(())
}

#[test]
fn byte_count_exactly_at_threshold_flushes() -> Result<()> {
    let dir = tempdir()?;
    // One entry: 1-byte key + 15-byte value + 16 overhead = 32 = threshold.
    let opts = Options {
        flush_threshold: 32,
        ..small_options()
    };
    let engine = Engine::open_with(dir.path(), opts)?;

    engine.put(b"k".to_vec(), vec![b'v'; 15])?;

    // The check is `>=`, so landing exactly on the threshold flushes.
    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(engine.memtable_len(), 0);
    Ok(())
}

#[test]
fn explicit_flush_writes_table_and_resets_wal() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(dir.path())?;

    engine.put(b"a".to_vec(), b"1".to_vec())?;
    engine.put(b"b".to_vec(), b"2".to_vec())?;
    assert!(fs::metadata(dir.path().join(WAL_FILENAME))?.len() > 0);

    engine.flush()?;

    assert_eq!(engine.sstable_count(), 1);
    assert_eq!(engine.memtable_len(), 0);
    assert_eq!(fs::metadata(dir.path().join(WAL_FILENAME))?.len(), 0);

    // Flushed data is still readable.
    assert_eq!(engine.get(b"a"), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b"), Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn flush_of_empty_memtable_is_a_noop() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(dir.path())?;

    engine.flush()?;
    engine.flush()?;

    assert_eq!(engine.sstable_count(), 0);
    assert_eq!(count_dat_files(dir.path()), 0);
    Ok(())
}

#[test]
fn flushed_tombstones_reach_the_table() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(dir.path())?;

    engine.put(b"k".to_vec(), b"v".to_vec())?;
    engine.flush()?;
    engine.delete(b"k".to_vec())?;
    engine.flush()?;

    assert_eq!(engine.sstable_count(), 2);
    assert_eq!(engine.get(b"k"), None);
    Ok(())
}

#[test]
fn table_filenames_are_zero_padded_and_sequential() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(dir.path())?;

    for i in 0..3u32 {
        engine.put(format!("k{}", i).into_bytes(), b"v".to_vec())?;
        engine.flush()?;
    }

    for id in 1..=3u64 {
        assert!(dir.path().join(format!("sst_{:06}.dat", id)).exists());
    }
    Ok(())
}
