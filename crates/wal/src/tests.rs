use super::*;
use hash::fnv1a_32;
use std::fs;
use std::io::Cursor;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn make_put(key: &[u8], value: &[u8]) -> WalRecord {
    WalRecord::Put {
        key: key.to_vec(),
        value: value.to_vec(),
    }
}

fn make_del(key: &[u8]) -> WalRecord {
    WalRecord::Del { key: key.to_vec() }
}

fn replay_all(path: &std::path::Path) -> Result<Vec<WalRecord>, WalError> {
    let mut reader = WalReader::open(path)?;
    let mut recs = Vec::new();
    reader.replay(|r| recs.push(r))?;
    Ok(recs)
}

fn replay_from_bytes(data: &[u8]) -> Vec<WalRecord> {
    let mut reader = WalReader::from_reader(Cursor::new(data.to_vec()));
    let mut recs = Vec::new();
    reader.replay(|r| recs.push(r)).unwrap();
    recs
}

/// Encodes a record by hand, with the checksum as stored on disk unless
/// overridden. Lets corruption tests build byte-exact frames.
fn encode(rec_type: u8, key: &[u8], value: &[u8], bad_checksum: Option<u32>) -> Vec<u8> {
    let ksize = key.len() as u32;
    let vsize = value.len() as u32;
    let total_len = HEADER_BYTES as u32 + ksize + vsize;

    let mut payload = vec![rec_type];
    payload.extend_from_slice(&ksize.to_le_bytes());
    payload.extend_from_slice(&vsize.to_le_bytes());
    payload.extend_from_slice(key);
    payload.extend_from_slice(value);
    let checksum = bad_checksum.unwrap_or_else(|| fnv1a_32(&payload));

    let mut out = Vec::new();
    out.extend_from_slice(&total_len.to_le_bytes());
    out.push(rec_type);
    out.extend_from_slice(&ksize.to_le_bytes());
    out.extend_from_slice(&vsize.to_le_bytes());
    out.extend_from_slice(&checksum.to_le_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(value);
    out
}

// -------------------- Basic write & replay --------------------

#[test]
fn write_and_replay_put_and_del() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut w = WalWriter::create(&path, true).unwrap();
        w.append_put(b"k", b"v1").unwrap();
        w.append_put(b"k2", b"v2").unwrap();
        w.append_delete(b"k").unwrap();
    }

    let recs = replay_all(&path).unwrap();
    assert_eq!(
        recs,
        vec![make_put(b"k", b"v1"), make_put(b"k2", b"v2"), make_del(b"k")]
    );
}

#[test]
fn wire_format_is_exact() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut w = WalWriter::create(&path, false).unwrap();
        w.append_put(b"ab", b"xyz").unwrap();
    }

    let data = fs::read(&path).unwrap();
    assert_eq!(data, encode(1, b"ab", b"xyz", None));
    // total_len = 17 + 2 + 3
    assert_eq!(&data[0..4], &22u32.to_le_bytes());
    assert_eq!(data[4], 1);
}

#[test]
fn delete_record_has_no_value_bytes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut w = WalWriter::create(&path, false).unwrap();
        w.append_delete(b"gone").unwrap();
    }

    let data = fs::read(&path).unwrap();
    assert_eq!(data.len(), HEADER_BYTES + 4);
    assert_eq!(data, encode(2, b"gone", b"", None));
}

#[test]
fn empty_key_and_value() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut w = WalWriter::create(&path, true).unwrap();
        w.append_put(b"", b"").unwrap();
    }

    let recs = replay_all(&path).unwrap();
    assert_eq!(recs, vec![make_put(b"", b"")]);
}

#[test]
fn binary_key_and_value() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    let key = vec![0x00u8, 0xFF, 0x80];
    let val = vec![0xDEu8, 0xAD, 0xBE, 0xEF];

    {
        let mut w = WalWriter::create(&path, true).unwrap();
        w.append_put(&key, &val).unwrap();
    }

    let recs = replay_all(&path).unwrap();
    assert_eq!(
        recs,
        vec![WalRecord::Put {
            key,
            value: val
        }]
    );
}

#[test]
fn large_value_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    let big_val = vec![b'x'; 1_000_000];

    {
        let mut w = WalWriter::create(&path, false).unwrap();
        w.append_put(b"big", &big_val).unwrap();
    }

    let recs = replay_all(&path).unwrap();
    assert_eq!(recs.len(), 1);
    if let WalRecord::Put { value, .. } = &recs[0] {
        assert_eq!(value.len(), 1_000_000);
    } else {
        panic!("expected Put");
    }
}

#[test]
fn append_to_existing_wal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut w = WalWriter::create(&path, true).unwrap();
        w.append_put(b"a", b"1").unwrap();
    }
    {
        let mut w = WalWriter::create(&path, true).unwrap();
        w.append_put(b"b", b"2").unwrap();
    }

    let recs = replay_all(&path).unwrap();
    assert_eq!(recs, vec![make_put(b"a", b"1"), make_put(b"b", b"2")]);
}

// -------------------- Empty WAL --------------------

#[test]
fn replay_empty_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    fs::write(&path, b"").unwrap();

    let recs = replay_all(&path).unwrap();
    assert!(recs.is_empty());
}

#[test]
fn open_non_existent_file_returns_error() {
    let result = WalReader::open("/nonexistent/path/wal.log");
    assert!(matches!(result, Err(WalError::Io(_))));
}

#[test]
fn sync_to_disk_does_not_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let mut w = WalWriter::create(&path, false).unwrap();
    w.append_put(b"k", b"v").unwrap();
    w.sync_to_disk().unwrap();
}

// -------------------- Malformed tails stop cleanly --------------------

#[test]
fn truncated_header_after_valid_records() {
    let mut data = encode(1, b"k1", b"v1", None);
    data.extend_from_slice(&encode(1, b"k2", b"v2", None));
    data.extend_from_slice(&[0x20, 0x00, 0x00, 0x00, 0x01]); // 5 of 17 header bytes

    let recs = replay_from_bytes(&data);
    assert_eq!(recs, vec![make_put(b"k1", b"v1"), make_put(b"k2", b"v2")]);
}

#[test]
fn truncated_payload_stops_cleanly() {
    let mut data = encode(1, b"k1", b"v1", None);
    let second = encode(1, b"key-two", b"value-two", None);
    data.extend_from_slice(&second[..HEADER_BYTES + 3]); // header + partial key

    let recs = replay_from_bytes(&data);
    assert_eq!(recs, vec![make_put(b"k1", b"v1")]);
}

#[test]
fn checksum_mismatch_stops_cleanly_with_prefix() {
    let mut data = encode(1, b"good", b"v", None);
    data.extend_from_slice(&encode(1, b"bad", b"v", Some(0xDEAD_BEEF)));
    data.extend_from_slice(&encode(1, b"after", b"v", None));

    // The corrupt record and everything after it are discarded.
    let recs = replay_from_bytes(&data);
    assert_eq!(recs, vec![make_put(b"good", b"v")]);
}

#[test]
fn unknown_type_stops_cleanly() {
    let mut data = encode(1, b"good", b"v", None);
    data.extend_from_slice(&encode(7, b"k", b"v", None));

    let recs = replay_from_bytes(&data);
    assert_eq!(recs, vec![make_put(b"good", b"v")]);
}

#[test]
fn delete_with_value_bytes_stops_cleanly() {
    let mut data = encode(1, b"good", b"v", None);
    data.extend_from_slice(&encode(2, b"k", b"stray", None)); // delete carrying a value

    let recs = replay_from_bytes(&data);
    assert_eq!(recs, vec![make_put(b"good", b"v")]);
}

#[test]
fn total_len_mismatch_stops_cleanly() {
    let mut bad = encode(1, b"k", b"v", None);
    bad[0..4].copy_from_slice(&99u32.to_le_bytes()); // lie about total_len

    let mut data = encode(1, b"good", b"v", None);
    data.extend_from_slice(&bad);

    let recs = replay_from_bytes(&data);
    assert_eq!(recs, vec![make_put(b"good", b"v")]);
}

#[test]
fn random_garbage_yields_nothing() {
    let recs = replay_from_bytes(&[0xAB; 64]);
    assert!(recs.is_empty());
}

// Truncating the log at *any* byte position must replay exactly the records
// that are fully present before the cut.
#[test]
fn truncation_at_every_byte_position_replays_exact_prefix() {
    let records: Vec<(Vec<u8>, Vec<u8>)> = (0..5)
        .map(|i| {
            (
                format!("key{}", i).into_bytes(),
                format!("value-{}", i).into_bytes(),
            )
        })
        .collect();

    let mut data = Vec::new();
    let mut boundaries = vec![0usize];
    for (k, v) in &records {
        data.extend_from_slice(&encode(1, k, v, None));
        boundaries.push(data.len());
    }

    for cut in 0..=data.len() {
        let expected = boundaries.iter().filter(|&&b| b <= cut).count() - 1;
        let recs = replay_from_bytes(&data[..cut]);
        assert_eq!(
            recs.len(),
            expected,
            "cut at byte {} should yield {} records",
            cut,
            expected
        );
        for (i, rec) in recs.iter().enumerate() {
            assert_eq!(rec, &make_put(&records[i].0, &records[i].1));
        }
    }
}

// -------------------- Reset --------------------

#[test]
fn reset_empties_the_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let mut w = WalWriter::create(&path, false).unwrap();
    w.append_put(b"a", b"1").unwrap();
    w.append_put(b"b", b"2").unwrap();
    assert!(fs::metadata(&path).unwrap().len() > 0);

    w.reset().unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);

    // Writer is still usable after reset.
    w.append_put(b"c", b"3").unwrap();
    drop(w);

    let recs = replay_all(&path).unwrap();
    assert_eq!(recs, vec![make_put(b"c", b"3")]);
}

// -------------------- Stress --------------------

#[test]
fn many_records_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    let n = 5_000usize;
    {
        let mut w = WalWriter::create(&path, false).unwrap();
        for i in 0..n {
            w.append_put(
                format!("key{}", i).as_bytes(),
                format!("val{}", i).as_bytes(),
            )
            .unwrap();
        }
        w.sync_to_disk().unwrap();
    }

    let recs = replay_all(&path).unwrap();
    assert_eq!(recs.len(), n);
    for (i, rec) in recs.iter().enumerate() {
        assert_eq!(
            rec,
            &make_put(
                format!("key{}", i).as_bytes(),
                format!("val{}", i).as_bytes()
            )
        );
    }
}

#[test]
fn interleaved_puts_and_dels() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");

    {
        let mut w = WalWriter::create(&path, false).unwrap();
        for i in 0u64..1000 {
            let key = format!("k{}", i);
            if i % 3 == 0 {
                w.append_delete(key.as_bytes()).unwrap();
            } else {
                w.append_put(key.as_bytes(), b"v").unwrap();
            }
        }
    }

    let recs = replay_all(&path).unwrap();
    assert_eq!(recs.len(), 1000);

    let del_count = recs
        .iter()
        .filter(|r| matches!(r, WalRecord::Del { .. }))
        .count();
    assert_eq!(del_count, 334);
    assert_eq!(recs.len() - del_count, 666);
}
