//! In-memory filesystem for tests.
//!
//! Cloning a [`MemoryFileSystem`] creates a new handle to the same underlying
//! data, so a test can keep one clone for inspection and hand another to the
//! writer.

use {
    crate::fs::{FileFlags, FileSystem, LogFile},
    chrono::{DateTime, Utc},
    std::{
        collections::{hash_map::Entry, HashMap},
        io::{self, Cursor, Read, Write},
        path::{Path, PathBuf},
        sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    },
};

#[derive(Debug, Default)]
struct MemoryEntry {
    data: Vec<u8>,
    mode: u32,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<PathBuf, MemoryEntry>,
    now: Option<DateTime<Utc>>,
    open_handles: usize,
    fail_open: bool,
    fail_rename: bool,
    fail_remove: bool,
    /// Bytes writes may still deliver before failing; `None` is unlimited.
    write_budget: Option<usize>,
}

/// A filesystem that keeps every file in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    state: Arc<RwLock<MemoryState>>,
}

fn injected(op: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("injected {op} failure"))
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Freeze the clock returned by [`FileSystem::now`].
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.write().now = Some(now);
    }

    /// Add a file directly (for test setup).
    pub fn add_file<P: AsRef<Path>>(&self, path: P, data: &[u8]) {
        self.write().files.insert(
            path.as_ref().to_path_buf(),
            MemoryEntry {
                data: data.to_vec(),
                mode: 0o644,
            },
        );
    }

    /// Content of a specific file.
    pub fn get_file<P: AsRef<Path>>(&self, path: P) -> Option<Vec<u8>> {
        self.read().files.get(path.as_ref()).map(|e| e.data.clone())
    }

    /// Creation mode of a specific file.
    pub fn file_mode<P: AsRef<Path>>(&self, path: P) -> Option<u32> {
        self.read().files.get(path.as_ref()).map(|e| e.mode)
    }

    /// Check if a file exists.
    pub fn exists<P: AsRef<Path>>(&self, path: P) -> bool {
        self.read().files.contains_key(path.as_ref())
    }

    /// All file paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.read().files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of handles opened and not yet closed or dropped.
    pub fn open_handles(&self) -> usize {
        self.read().open_handles
    }

    /// Make every subsequent open fail.
    pub fn fail_open(&self, fail: bool) {
        self.write().fail_open = fail;
    }

    /// Make every subsequent rename fail.
    pub fn fail_rename(&self, fail: bool) {
        self.write().fail_rename = fail;
    }

    /// Make every subsequent remove fail.
    pub fn fail_remove(&self, fail: bool) {
        self.write().fail_remove = fail;
    }

    /// Let writes deliver at most `budget` more bytes in total, then fail.
    /// `None` removes the limit.
    pub fn set_write_budget(&self, budget: Option<usize>) {
        self.write().write_budget = budget;
    }
}

impl FileSystem for MemoryFileSystem {
    fn open_file(&self, path: &Path, flags: FileFlags, mode: u32) -> io::Result<Box<dyn LogFile>> {
        let mut state = self.write();
        if state.fail_open {
            return Err(injected("open"));
        }
        match state.files.entry(path.to_path_buf()) {
            Entry::Occupied(mut entry) => {
                if flags.truncate {
                    entry.get_mut().data.clear();
                }
            }
            Entry::Vacant(entry) if flags.create => {
                entry.insert(MemoryEntry {
                    data: Vec::new(),
                    mode,
                });
            }
            Entry::Vacant(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("file not found: {}", path.display()),
                ))
            }
        }
        state.open_handles += 1;

        Ok(Box::new(MemoryFile {
            fs: self.clone(),
            path: path.to_path_buf(),
        }))
    }

    fn read_file(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        let state = self.read();
        if state.fail_open {
            return Err(injected("open"));
        }
        let data = state.files.get(path).map(|e| e.data.clone()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {}", path.display()),
            )
        })?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut state = self.write();
        if state.fail_rename {
            return Err(injected("rename"));
        }
        let entry = state.files.remove(from).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {}", from.display()),
            )
        })?;
        state.files.insert(to.to_path_buf(), entry);
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let mut state = self.write();
        if state.fail_remove {
            return Err(injected("remove"));
        }
        state.files.remove(path).map(|_| ()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {}", path.display()),
            )
        })
    }

    fn now(&self) -> DateTime<Utc> {
        self.read().now.unwrap_or_else(Utc::now)
    }
}

/// A handle to a file in a [`MemoryFileSystem`].
#[derive(Debug)]
pub struct MemoryFile {
    fs: MemoryFileSystem,
    path: PathBuf,
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.fs.write();
        let n = match state.write_budget {
            Some(0) if !buf.is_empty() => return Err(injected("write")),
            Some(budget) => buf.len().min(budget),
            None => buf.len(),
        };
        let entry = state.files.get_mut(&self.path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {}", self.path.display()),
            )
        })?;
        entry.data.extend_from_slice(&buf[..n]);
        if let Some(budget) = state.write_budget.as_mut() {
            *budget -= n;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogFile for MemoryFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn len(&self) -> io::Result<u64> {
        self.fs
            .read()
            .files
            .get(&self.path)
            .map(|e| e.data.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file not found"))
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MemoryFile {
    fn drop(&mut self) {
        let mut state = self.fs.write();
        state.open_handles = state.open_handles.saturating_sub(1);
    }
}
