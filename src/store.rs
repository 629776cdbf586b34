//! Filesystem layout and metadata persistence for one queue.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - **Data files** are named `<name>.diskqueue.<NNNNNN>.dat` under the data
//!   path, with a 6-digit zero-padded decimal file number (larger numbers
//!   print at their natural width).
//! - **Metadata** lives in `<name>.diskqueue.meta.dat`: three ASCII lines,
//!   `"<depth>\n<read_file_num>,<read_pos>\n<write_file_num>,<write_pos>\n"`.
//! - **Metadata rewrite is atomic**: written to a `<meta>.<random>.tmp`
//!   sibling, fsynced, then renamed over the real file. Atomicity relies on
//!   POSIX same-directory rename.
//! - **Quarantine** renames a data file in place with a `.bad` suffix.
//!
//! The store knows nothing about cursors or record framing; it only opens,
//! positions, removes, and renames files.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tracing::error;

/// Cursor state parsed from (or written to) the metadata file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Count of undelivered records at persist time.
    pub depth: i64,
    /// File number of the next record to deliver.
    pub read_file_num: i64,
    /// Byte offset of the next record to deliver.
    pub read_pos: i64,
    /// File number of the next record to append.
    pub write_file_num: i64,
    /// Byte offset of the next record to append.
    pub write_pos: i64,
}

/// Names and opens the on-disk files for one queue instance.
#[derive(Debug, Clone)]
pub struct FileStore {
    name: String,
    data_path: PathBuf,
}

impl FileStore {
    /// Create a store for queue `name` rooted at `data_path`.
    pub fn new(name: impl Into<String>, data_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            data_path: data_path.into(),
        }
    }

    /// Path of data file `num`.
    pub fn data_file_path(&self, num: i64) -> PathBuf {
        self.data_path
            .join(format!("{}.diskqueue.{:06}.dat", self.name, num))
    }

    /// Path of the metadata file.
    pub fn metadata_path(&self) -> PathBuf {
        self.data_path
            .join(format!("{}.diskqueue.meta.dat", self.name))
    }

    /// Open data file `num` read-only, positioned at `pos`, behind a buffered reader.
    pub fn open_for_read(&self, num: i64, pos: i64) -> std::io::Result<BufReader<File>> {
        let mut file = OpenOptions::new()
            .read(true)
            .open(self.data_file_path(num))?;
        if pos > 0 {
            file.seek(SeekFrom::Start(pos as u64))?;
        }
        Ok(BufReader::new(file))
    }

    /// Open data file `num` read-write (creating it), positioned at `pos`.
    pub fn open_for_write(&self, num: i64, pos: i64) -> std::io::Result<File> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(self.data_file_path(num))?;
        if pos > 0 {
            file.seek(SeekFrom::Start(pos as u64))?;
        }
        Ok(file)
    }

    /// Remove data files in `[from, to_exclusive)`.
    ///
    /// A missing file is not an error. Other failures are logged and the last
    /// one is returned.
    pub fn remove_range(&self, from: i64, to_exclusive: i64) -> Result<()> {
        let mut last_err = None;
        for num in from..to_exclusive {
            let path = self.data_file_path(num);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    error!(name = %self.name, path = %path.display(), error = %e,
                        "failed to remove data file");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Remove a single data file. Missing files are an error for the caller to classify.
    pub fn remove_data_file(&self, num: i64) -> std::io::Result<()> {
        std::fs::remove_file(self.data_file_path(num))
    }

    /// Rename data file `num` in place with a `.bad` suffix for operator inspection.
    pub fn quarantine(&self, num: i64) -> std::io::Result<PathBuf> {
        let path = self.data_file_path(num);
        let mut bad = path.clone().into_os_string();
        bad.push(".bad");
        let bad = PathBuf::from(bad);
        std::fs::rename(&path, &bad)?;
        Ok(bad)
    }

    /// Atomically rewrite the metadata file.
    ///
    /// The temp sibling gets a random name component so a crashed writer never
    /// collides with a later one; at most one `.tmp` artifact survives a crash.
    pub fn persist_metadata(&self, meta: &Metadata) -> Result<()> {
        let meta_path = self.metadata_path();
        let file_name = meta_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{file_name}."))
            .suffix(".tmp")
            .tempfile_in(&self.data_path)?;

        write!(
            tmp,
            "{}\n{},{}\n{},{}\n",
            meta.depth, meta.read_file_num, meta.read_pos, meta.write_file_num, meta.write_pos
        )?;
        tmp.as_file().sync_all()?;

        tmp.persist(&meta_path)
            .map_err(|e| Error::Io(e.error))?;

        // Durable rename wants the parent directory synced too; best-effort,
        // matching the queue's overall fsync cadence.
        if let Ok(dir) = File::open(&self.data_path) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    /// Load the metadata file.
    ///
    /// Returns `Ok(None)` when the file does not exist (fresh queue). A file
    /// that exists but does not parse is a `Metadata` error; the caller
    /// decides whether that is fatal.
    pub fn load_metadata(&self) -> Result<Option<Metadata>> {
        let mut contents = String::new();
        match File::open(self.metadata_path()) {
            Ok(mut f) => {
                f.read_to_string(&mut contents)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        parse_metadata(&contents).map(Some)
    }

    /// Remove the metadata file. Absence is acceptable.
    pub fn remove_metadata(&self) -> Result<()> {
        match std::fs::remove_file(self.metadata_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!(name = %self.name, error = %e, "failed to remove metadata file");
                Err(e.into())
            }
        }
    }

    /// Queue name (for log context).
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn parse_metadata(contents: &str) -> Result<Metadata> {
    fn int(s: &str, what: &str) -> Result<i64> {
        s.trim()
            .parse::<i64>()
            .map_err(|_| Error::Metadata(format!("bad {what}: {s:?}")))
    }
    fn pair(line: &str, what: &str) -> Result<(i64, i64)> {
        let (a, b) = line
            .split_once(',')
            .ok_or_else(|| Error::Metadata(format!("bad {what} line: {line:?}")))?;
        Ok((int(a, what)?, int(b, what)?))
    }

    let mut lines = contents.lines();
    let depth = int(
        lines
            .next()
            .ok_or_else(|| Error::Metadata("missing depth line".into()))?,
        "depth",
    )?;
    let (read_file_num, read_pos) = pair(
        lines
            .next()
            .ok_or_else(|| Error::Metadata("missing read cursor line".into()))?,
        "read cursor",
    )?;
    let (write_file_num, write_pos) = pair(
        lines
            .next()
            .ok_or_else(|| Error::Metadata("missing write cursor line".into()))?,
        "write cursor",
    )?;

    Ok(Metadata {
        depth,
        read_file_num,
        read_pos,
        write_file_num,
        write_pos,
    })
}
