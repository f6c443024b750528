//! Filesystem capability consumed by the writer.
//!
//! The writer never calls `std::fs` directly. Opening, reading, renaming and
//! removing files, as well as reading the current time for backup names, all
//! go through
//! a [`FileSystem`] so tests can run against [`MemoryFileSystem`] with a fixed
//! clock.
//!
//! [`MemoryFileSystem`]: crate::MemoryFileSystem

use {
    chrono::{DateTime, Utc},
    std::{
        fmt::Debug,
        fs::{self, OpenOptions},
        io::{self, Read, Write},
        path::{Path, PathBuf},
    },
};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Flags applied every time the log file is (re)opened.
///
/// Write access is always requested. The default creates the file when it is
/// missing and appends to it otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFlags {
    /// Create the file if it does not exist.
    pub create: bool,
    /// Position every write at the end of the file.
    pub append: bool,
    /// Truncate an existing file on open.
    pub truncate: bool,
}

impl Default for FileFlags {
    fn default() -> Self {
        FileFlags {
            create: true,
            append: true,
            truncate: false,
        }
    }
}

/// A handle to an open log file.
///
/// The writer only needs to write to it, learn its name and size, and close it.
pub trait LogFile: Write + Send {
    /// The path the file was opened at.
    fn path(&self) -> &Path;

    /// Current size of the file in bytes.
    fn len(&self) -> io::Result<u64>;

    /// Whether the file is empty.
    fn is_empty(&self) -> io::Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// Flush and release the handle.
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Filesystem primitives used by the writer.
pub trait FileSystem: Debug + Send + Sync {
    /// Open the file at `path` with the given flags and creation mode.
    fn open_file(&self, path: &Path, flags: FileFlags, mode: u32) -> io::Result<Box<dyn LogFile>>;

    /// Open the file at `path` for reading. Used to compress rotated backups.
    fn read_file(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Rename `from` to `to`, replacing `to` if it exists.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove the file at `path`.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// The current time, used to name rotated backups.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The real filesystem, backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn open_file(&self, path: &Path, flags: FileFlags, mode: u32) -> io::Result<Box<dyn LogFile>> {
        let mut open_options = OpenOptions::new();
        open_options
            .write(true)
            .create(flags.create)
            .append(flags.append)
            .truncate(flags.truncate);
        #[cfg(unix)]
        open_options.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;

        let file = open_options.open(path)?;
        Ok(Box::new(OsFile {
            path: path.to_path_buf(),
            file,
        }))
    }

    fn read_file(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// A log file on the real filesystem.
#[derive(Debug)]
pub struct OsFile {
    path: PathBuf,
    file: fs::File,
}

impl Write for OsFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl LogFile for OsFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn len(&self) -> io::Result<u64> {
        self.file.metadata().map(|m| m.len())
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }
}
