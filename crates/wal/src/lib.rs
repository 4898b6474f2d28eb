//! # WAL: Write-Ahead Log
//!
//! Provides crash-safe durability for the HeliosKV storage engine.
//!
//! Every mutation (`PUT` or `DELETE`) is serialized into a binary record and
//! appended to the WAL **before** the corresponding memtable update. On
//! restart the WAL is replayed to reconstruct the memtable, so no logged
//! write is lost. After a successful flush the engine calls
//! [`WalWriter::reset`] and the log starts over empty.
//!
//! ## Binary record format (all little-endian)
//!
//! ```text
//! [total_len: u32][type: u8][ksize: u32][vsize: u32][checksum: u32][key][value]
//! ```
//!
//! `type` is `1` for put, `2` for delete (`vsize = 0`, no value bytes).
//! `total_len` counts the 17-byte header plus key and value. `checksum` is
//! FNV-1a-32 over `type ‖ ksize ‖ vsize ‖ key ‖ value`.
//!
//! ## Replay tolerance
//!
//! A crash can leave arbitrary garbage at the end of the log. Replay applies
//! every record whose header, payload, and checksum are fully intact and
//! stops **cleanly** at the first record that isn't. A truncated or mangled
//! tail is the expected crash artifact, not an error.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use hash::Fnv32;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Size of the fixed record header: total_len + type + ksize + vsize + checksum.
pub const HEADER_BYTES: usize = 4 + 1 + 4 + 4 + 4;

const TYPE_PUT: u8 = 1;
const TYPE_DELETE: u8 = 2;

/// A single WAL record: a key-value insertion or a deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// A key-value insertion.
    Put {
        /// The lookup key.
        key: Vec<u8>,
        /// The payload value.
        value: Vec<u8>,
    },
    /// A key deletion (tombstone).
    Del {
        /// The key to delete.
        key: Vec<u8>,
    },
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record whose encoded size does not fit the u32 length field.
    #[error("wal record too large: {0} bytes")]
    RecordTooLarge(u64),
}

/// Append-only WAL writer.
///
/// Records are serialized into a reusable scratch buffer, checksummed, and
/// written to the file in a single `write_all` call. When `sync` is `true`,
/// every append is followed by `sync_all()` (fsync) so the record is durable
/// before the call returns; otherwise the data is only flushed to the OS.
pub struct WalWriter {
    path: PathBuf,
    file: File,
    sync: bool,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl WalWriter {
    /// Opens (or creates) a WAL file in append mode.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file,
            sync,
            buf: Vec::with_capacity(256),
        })
    }

    /// Appends a put record for `key` → `value`.
    pub fn append_put(&mut self, key: &[u8], value: &[u8]) -> Result<(), WalError> {
        self.append_record(TYPE_PUT, key, Some(value))
    }

    /// Appends a delete (tombstone) record for `key`.
    pub fn append_delete(&mut self, key: &[u8]) -> Result<(), WalError> {
        self.append_record(TYPE_DELETE, key, None)
    }

    fn append_record(
        &mut self,
        rec_type: u8,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> Result<(), WalError> {
        let ksize = key.len() as u64;
        let vsize = value.map_or(0, |v| v.len() as u64);

        let total_len = HEADER_BYTES as u64 + ksize + vsize;
        if total_len > u64::from(u32::MAX) {
            return Err(WalError::RecordTooLarge(total_len));
        }
        let (ksize, vsize) = (ksize as u32, vsize as u32);

        // Checksum covers the logical payload, not the framing.
        let mut hasher = Fnv32::new();
        hasher.update(&[rec_type]);
        hasher.update(&ksize.to_le_bytes());
        hasher.update(&vsize.to_le_bytes());
        hasher.update(key);
        if let Some(v) = value {
            hasher.update(v);
        }
        let checksum = hasher.finalize();

        self.buf.clear();
        self.buf.write_u32::<LittleEndian>(total_len as u32)?;
        self.buf.write_u8(rec_type)?;
        self.buf.write_u32::<LittleEndian>(ksize)?;
        self.buf.write_u32::<LittleEndian>(vsize)?;
        self.buf.write_u32::<LittleEndian>(checksum)?;
        self.buf.extend_from_slice(key);
        if let Some(v) = value {
            self.buf.extend_from_slice(v);
        }

        // Single write call for the entire frame.
        self.file.write_all(&self.buf)?;
        self.file.flush()?;

        if self.sync {
            self.file.sync_all()?;
        }

        Ok(())
    }

    /// Forces buffered data to disk via `sync_all()`.
    ///
    /// Useful when `sync` is `false` and the caller wants durability at a
    /// specific point.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Starts the log over: removes the file and reopens it empty for
    /// append. Called only after a successful flush, when every record in
    /// the log is already durable in an SSTable.
    pub fn reset(&mut self) -> Result<(), WalError> {
        fs::remove_file(&self.path)?;
        self.file = open_append(&self.path)?;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Sequential WAL reader that yields the valid record prefix.
///
/// Generic over any `Read` implementor so tests can replay in-memory buffers
/// (`Cursor<Vec<u8>>`) as well as real files.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
}

impl WalReader<File> {
    /// Opens an existing WAL file for sequential replay.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        let f = File::open(path)?;
        Ok(WalReader {
            rdr: BufReader::new(f),
        })
    }
}

impl<R: Read> WalReader<R> {
    /// Constructs a reader from any `Read` implementor.
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
        }
    }

    /// Replays every intact record, calling `apply` for each one.
    ///
    /// # Termination
    ///
    /// Replay stops cleanly (returns `Ok(())`) on any of:
    /// - end of file before or during a header,
    /// - an unknown `type` byte,
    /// - a delete record with a nonzero `vsize`,
    /// - `total_len` disagreeing with `header + ksize + vsize`,
    /// - too few remaining bytes for the key or value,
    /// - a checksum mismatch.
    ///
    /// All of these mean "the durable prefix ends here". Only genuine I/O
    /// errors other than EOF return `Err`.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<(), WalError>
    where
        F: FnMut(WalRecord),
    {
        loop {
            let mut header = [0u8; HEADER_BYTES];
            match read_exact_or_eof(&mut self.rdr, &mut header)? {
                ReadOutcome::Full => {}
                ReadOutcome::Short => return Ok(()),
            }

            let mut fields = &header[..];
            let total_len = fields.read_u32::<LittleEndian>()?;
            let rec_type = fields.read_u8()?;
            let ksize = fields.read_u32::<LittleEndian>()?;
            let vsize = fields.read_u32::<LittleEndian>()?;
            let checksum = fields.read_u32::<LittleEndian>()?;

            if rec_type != TYPE_PUT && rec_type != TYPE_DELETE {
                warn!(rec_type, "wal replay stopped at record with unknown type");
                return Ok(());
            }
            if rec_type == TYPE_DELETE && vsize != 0 {
                warn!("wal replay stopped at delete record carrying a value");
                return Ok(());
            }
            let expected_len = HEADER_BYTES as u64 + u64::from(ksize) + u64::from(vsize);
            if u64::from(total_len) != expected_len {
                warn!(total_len, "wal replay stopped at record with bad length");
                return Ok(());
            }

            let key = match read_payload(&mut self.rdr, ksize as usize)? {
                Some(k) => k,
                None => {
                    warn!("wal replay stopped at truncated key");
                    return Ok(());
                }
            };
            let value = if rec_type == TYPE_PUT {
                match read_payload(&mut self.rdr, vsize as usize)? {
                    Some(v) => Some(v),
                    None => {
                        warn!("wal replay stopped at truncated value");
                        return Ok(());
                    }
                }
            } else {
                None
            };

            let mut hasher = Fnv32::new();
            hasher.update(&[rec_type]);
            hasher.update(&ksize.to_le_bytes());
            hasher.update(&vsize.to_le_bytes());
            hasher.update(&key);
            if let Some(v) = &value {
                hasher.update(v);
            }
            if hasher.finalize() != checksum {
                warn!("wal replay stopped at record with checksum mismatch");
                return Ok(());
            }

            match rec_type {
                TYPE_PUT => apply(WalRecord::Put {
                    key,
                    value: value.unwrap_or_default(),
                }),
                _ => apply(WalRecord::Del { key }),
            }
        }
    }
}

enum ReadOutcome {
    Full,
    Short,
}

/// `read_exact` that treats EOF as a short read instead of an error.
fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<ReadOutcome, WalError> {
    match r.read_exact(buf) {
        Ok(()) => Ok(ReadOutcome::Full),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(ReadOutcome::Short),
        Err(e) => Err(WalError::Io(e)),
    }
}

/// Reads exactly `len` payload bytes, or `None` if the file ends first.
///
/// Sized via `take` + `read_to_end` so a corrupt length field near EOF cannot
/// trigger a huge up-front allocation.
fn read_payload<R: Read>(r: &mut R, len: usize) -> Result<Option<Vec<u8>>, WalError> {
    let mut buf = Vec::with_capacity(len.min(1 << 20));
    let read = r.take(len as u64).read_to_end(&mut buf)?;
    if read < len {
        return Ok(None);
    }
    Ok(Some(buf))
}

#[cfg(test)]
mod tests;
