//! # Manifest - the list of live SSTables
//!
//! The manifest (`manifest.txt`) names the SSTable files that are currently
//! live, one filename per line, **oldest first**. The engine's in-memory
//! table list is this file reversed. Anything on disk that the manifest does
//! not name (stale temp files, merged-away tables not yet deleted) is dead
//! weight, never data.
//!
//! ## Crash Safety
//!
//! Every change rewrites the whole file atomically: write `manifest.txt.tmp`,
//! fsync, rename over the old manifest. A reader therefore always sees either
//! the previous version or the new one, never a torn file.
//!
//! Text was chosen over binary for debuggability; the file is one short line
//! per table and can be inspected with any editor.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Name of the manifest file within the database directory.
pub const MANIFEST_FILENAME: &str = "manifest.txt";

/// Temporary file used during atomic manifest rewrites.
const MANIFEST_TMP_FILENAME: &str = "manifest.txt.tmp";

/// Handle on the manifest file of one database directory.
#[derive(Debug)]
pub(crate) struct Manifest {
    path: PathBuf,
}

impl Manifest {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(MANIFEST_FILENAME),
        }
    }

    /// Reads the live filenames, oldest first. A missing manifest is an
    /// empty database, not an error. Empty lines are ignored.
    pub fn read(&self) -> Result<Vec<String>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("open manifest at {}", self.path.display()))
            }
        };

        let mut files = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                files.push(trimmed.to_string());
            }
        }
        Ok(files)
    }

    /// Atomically replaces the manifest with `files` (oldest first).
    pub fn write_atomic(&self, files: &[String]) -> Result<()> {
        let tmp = self.path.with_file_name(MANIFEST_TMP_FILENAME);

        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .with_context(|| format!("create manifest tmp at {}", tmp.display()))?;
            for file in files {
                writeln!(f, "{}", file)?;
            }
            f.flush()?;
            f.sync_all()?;
        }

        fs::rename(&tmp, &self.path)
            .with_context(|| format!("install manifest at {}", self.path.display()))?;
        Ok(())
    }
}
