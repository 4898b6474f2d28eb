use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Result as IoResult, Write};
use std::path::{Path, PathBuf};

/// Magic in the footer of every SSTable ("HELIOSST").
pub const SSTABLE_MAGIC: u64 = 0x4845_4C49_4F53_5354;

/// Footer size: u64 magic + u32 checksum.
pub const FOOTER_BYTES: u64 = 8 + 4;

/// Sentinel `vsize` marking a tombstone record. Real values must be shorter
/// than this, which is why the engine caps value length at 2^32 - 2.
pub const TOMBSTONE_VSIZE: u32 = u32::MAX;

/// Sparse-index stride: one in-memory `(key, offset)` entry per this many
/// records. A lookup scans forward at most this many records from its entry
/// point.
pub const INDEX_STRIDE: usize = 16;

/// Writes the 12-byte footer.
pub fn write_footer<W: Write>(w: &mut W, checksum: u32) -> IoResult<()> {
    w.write_u64::<LittleEndian>(SSTABLE_MAGIC)?;
    w.write_u32::<LittleEndian>(checksum)?;
    Ok(())
}

/// Reads the 12-byte footer from the reader's current position, returning
/// `(magic, checksum)`.
pub fn read_footer<R: Read>(r: &mut R) -> IoResult<(u64, u32)> {
    let magic = r.read_u64::<LittleEndian>()?;
    let checksum = r.read_u32::<LittleEndian>()?;
    Ok((magic, checksum))
}

/// Path of the bloom sidecar belonging to the table at `path`
/// (`sst_000001.dat` → `sst_000001.dat.bloom`).
pub fn bloom_sidecar_path(path: &Path) -> PathBuf {
    append_suffix(path, ".bloom")
}

/// Path of the transient file a table is staged in before rename
/// (`sst_000001.dat` → `sst_000001.dat.tmp`).
pub fn tmp_path(path: &Path) -> PathBuf {
    append_suffix(path, ".tmp")
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}
