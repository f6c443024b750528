//! The buffered, size-rotated file writer.

use {
    crate::{
        compression::Compression,
        counter::ByteCounter,
        error::{Error, Result},
        flusher::Flusher,
        fs::{FileFlags, FileSystem, LogFile},
        rotation::backup_path,
    },
    chrono::FixedOffset,
    std::{
        cell::Cell,
        io::{self, BufWriter, Write as _},
        mem,
        path::{Path, PathBuf},
        sync::{Arc, Mutex, MutexGuard, PoisonError},
        time::Duration,
    },
};

thread_local! {
    /// Set while this thread reports a writer's notices.
    static REPORTING: Cell<bool> = const { Cell::new(false) };
}

/// Hook receiving errors that have no caller to return to: background flushes,
/// the trailing flush in [`FileWriter::close`], and post-rotation compression.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Immutable configuration of a writer, fixed when it is built.
pub(crate) struct WriterMeta {
    /// Filesystem primitives used for every open, rename and remove.
    pub(crate) fs: Arc<dyn FileSystem>,
    /// Permission bits for files created by the writer.
    pub(crate) mode: u32,
    /// Flags applied on every (re)open.
    pub(crate) flags: FileFlags,
    /// strftime pattern appended to the name of a retired file.
    pub(crate) rotate_postfix: String,
    /// Offset the backup timestamp is rendered in.
    pub(crate) time_zone: FixedOffset,
    /// Remove the retired file instead of keeping it as a backup.
    pub(crate) delete_old: bool,
    /// Codec applied to backups after rotation.
    pub(crate) compression: Option<Compression>,
    /// Rotation threshold in bytes.
    pub(crate) max_size: u64,
    /// Number of accepted writes after which the buffer is flushed.
    pub(crate) max_batch_size: usize,
    /// Period of the background flush, `None` disables it.
    pub(crate) flush_interval: Option<Duration>,
    /// Capacity of the staging buffer in bytes.
    pub(crate) buffer_capacity: usize,
    pub(crate) error_handler: ErrorHandler,
}

/// Something that happened under the state lock and is reported once the lock
/// is released. A writer used as the tracing sink writes these events back into
/// itself, so they can never be emitted while the lock is held.
enum Notice {
    Opened { path: PathBuf, size: u64 },
    Flushed { staged: usize, flushed: u64 },
    Rotated {
        path: PathBuf,
        backup: Option<PathBuf>,
        staged: usize,
    },
    CloseFailed { path: PathBuf, error: io::Error },
    /// An error with no caller to return to, for the error handler.
    Failed(Error),
}

/// Marks the current thread as reporting until dropped.
struct Reporting {
    nested: bool,
}

impl Reporting {
    fn enter() -> Self {
        Reporting {
            nested: REPORTING.with(|reporting| reporting.replace(true)),
        }
    }
}

impl Drop for Reporting {
    fn drop(&mut self) {
        if !self.nested {
            REPORTING.with(|reporting| reporting.set(false));
        }
    }
}

/// Mutable state, guarded by a single lock.
pub(crate) struct WriterState {
    /// Path of the active file; kept apart from the handle so a rotation can
    /// be retried after a failed reopen.
    path: PathBuf,
    /// Bytes the active file held when opened plus every byte delivered to it
    /// since.
    disk_size: u64,
    buf: BufWriter<ByteCounter>,
    batch_size: usize,
    closed: bool,
    notices: Vec<Notice>,
}

impl WriterState {
    /// Bytes on disk plus bytes still staged in the buffer.
    fn size(&self) -> u64 {
        self.disk_size + self.buf.buffer().len() as u64
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Stage `payload` into the buffer.
    ///
    /// The buffer may spill to the file on its own when it runs out of room;
    /// whatever reached the file is moved into `disk_size` here.
    ///
    /// # Returns
    /// The number of bytes accepted and the error that stopped staging, if
    /// any.
    fn stage(&mut self, payload: &[u8]) -> (usize, io::Result<()>) {
        let mut accepted = 0;
        let res = loop {
            if accepted == payload.len() {
                break Ok(());
            }
            match self.buf.write(&payload[accepted..]) {
                Ok(0) => break Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => accepted += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => break Err(err),
            }
        };
        self.disk_size += self.buf.get_mut().drain();
        (accepted, res)
    }

    /// Push every staged byte through to the active file.
    ///
    /// On failure the bytes the file did not take stay staged, and `disk_size`
    /// still grows by what was delivered, so `size()` is unchanged either way.
    fn flush_buf(&mut self) -> Result<()> {
        self.batch_size = 0;
        let staged = self.buf.buffer().len();
        let res = self.buf.flush();
        let flushed = self.buf.get_mut().drain();
        self.disk_size += flushed;
        self.notices.push(Notice::Flushed { staged, flushed });
        res.map_err(Error::Flush)
    }

    /// Retire the active file and continue on a fresh one at the same path.
    ///
    /// The old handle is closed first. The file is then renamed to
    /// `<path>.<postfix>` (or removed) and a new file is opened in its place.
    /// Staged bytes are left in the buffer and will land in the new file.
    /// If the rename, remove or open fails, the writer is left without an
    /// active file until a later rotation or [`FileWriter::open`] succeeds.
    /// The rename replaces an existing backup of the same name.
    fn rotate_file(&mut self, meta: &WriterMeta) -> Result<()> {
        if let Some(file) = self.buf.get_mut().take() {
            self.release(file);
        }
        self.disk_size = 0;

        let backup = if meta.delete_old {
            meta.fs.remove(&self.path).map_err(|source| Error::Remove {
                path: self.path.clone(),
                source,
            })?;
            None
        } else {
            let backup = backup_path(&self.path, meta.fs.now(), &meta.time_zone, &meta.rotate_postfix);
            meta.fs.rename(&self.path, &backup).map_err(|source| Error::Rename {
                from: self.path.clone(),
                to: backup.clone(),
                source,
            })?;
            Some(backup)
        };

        let file = meta
            .fs
            .open_file(&self.path, meta.flags, meta.mode)
            .map_err(|source| Error::Open {
                path: self.path.clone(),
                source,
            })?;
        self.buf.get_mut().replace(file);
        self.notices.push(Notice::Rotated {
            path: self.path.clone(),
            backup: backup.clone(),
            staged: self.buf.buffer().len(),
        });

        if let (Some(backup), Some(compression)) = (backup, meta.compression) {
            let fs = Arc::clone(&meta.fs);
            let mode = meta.mode;
            let error_handler = meta.error_handler.clone();
            std::thread::spawn(move || match compression.compress(&*fs, &backup, mode) {
                Ok(path) => tracing::debug!(path = %path.display(), "compressed rotated log file"),
                Err(source) => error_handler(&Error::Compress { path: backup, source }),
            });
        }
        Ok(())
    }

    /// Close a retired handle. Failures are logged and otherwise ignored.
    fn release(&mut self, file: Box<dyn LogFile>) {
        let path = file.path().to_path_buf();
        if let Err(error) = file.close() {
            self.notices.push(Notice::CloseFailed { path, error });
        }
    }
}

/// Open `path` and read its current size.
pub(crate) fn open_file(meta: &WriterMeta, path: &Path, mode: u32) -> Result<(Box<dyn LogFile>, u64)> {
    let file = meta.fs.open_file(path, meta.flags, mode).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let len = file.len().map_err(|source| Error::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((file, len))
}

/// State shared between the writer and its background flusher.
pub(crate) struct Shared {
    pub(crate) meta: WriterMeta,
    state: Mutex<WriterState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the state lock, then report the notices it left behind
    /// with the lock released.
    fn with_state<T>(&self, f: impl FnOnce(&mut WriterState) -> T) -> T {
        let mut state = self.lock();
        let out = f(&mut state);
        let notices = mem::take(&mut state.notices);
        drop(state);
        self.report(notices);
        out
    }

    /// Log notices and hand failures to the error handler.
    ///
    /// Diagnostics raised while this thread is already reporting are dropped;
    /// they come from the writer logging about its own writes.
    fn report(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        let reporting = Reporting::enter();
        for notice in notices {
            match notice {
                Notice::Failed(err) => (self.meta.error_handler)(&err),
                _ if reporting.nested => {}
                Notice::Opened { path, size } => {
                    tracing::debug!(path = %path.display(), size, "opened log file")
                }
                Notice::Flushed { staged, flushed } => {
                    tracing::trace!(staged, flushed, "flushed log buffer")
                }
                Notice::Rotated { path, backup, staged } => tracing::debug!(
                    path = %path.display(),
                    backup = ?backup,
                    staged,
                    "rotated log file"
                ),
                Notice::CloseFailed { path, error } => {
                    tracing::warn!(path = %path.display(), error = %error, "failed to close log file")
                }
            }
        }
    }

    /// One background flush. Errors go to the error handler.
    pub(crate) fn tick(&self) {
        self.with_state(|state| {
            if state.closed {
                return;
            }
            if let Err(err) = state.flush_buf() {
                state.notices.push(Notice::Failed(err));
            }
        })
    }
}

/// A buffered writer that rotates its file once it grows past a size limit.
///
/// Payloads are staged in memory and flushed to the file every
/// `max_batch_size` writes, every flush interval, or on demand. Before a
/// payload that would take the file (plus staged bytes) to the size limit is
/// staged, the file is renamed to `<path>.<timestamp>` and a fresh file is
/// opened at `path`.
///
/// All operations take `&self` and are serialized by one lock, so a writer can
/// be shared between threads. It also implements [`io::Write`], which makes it
/// usable with `tracing_appender::non_blocking`, and `Arc<FileWriter>` can be
/// handed to `tracing_subscriber` directly. The writer's own log events and
/// error handler calls happen after the lock is released.
///
/// Build one with [`FileWriterBuilder`](crate::FileWriterBuilder).
pub struct FileWriter {
    shared: Arc<Shared>,
    flusher: Mutex<Option<Flusher>>,
}

impl FileWriter {
    pub(crate) fn new(meta: WriterMeta, path: PathBuf, file: Box<dyn LogFile>, disk_size: u64) -> Result<Self> {
        let buf = BufWriter::with_capacity(meta.buffer_capacity, ByteCounter::new(file));
        let shared = Arc::new(Shared {
            meta,
            state: Mutex::new(WriterState {
                path,
                disk_size,
                buf,
                batch_size: 0,
                closed: false,
                notices: Vec::new(),
            }),
        });
        let flusher = Flusher::spawn(&shared)?;
        Ok(FileWriter {
            shared,
            flusher: Mutex::new(flusher),
        })
    }

    fn lock_flusher(&self) -> MutexGuard<'_, Option<Flusher>> {
        self.flusher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `payload`, rotating first if it would take the file to the size
    /// limit and flushing afterwards if the batch is full.
    ///
    /// # Arguments
    /// * `payload` - The bytes to append.
    /// # Returns
    /// The number of bytes accepted. A flush error raised by a full batch is
    /// returned even though the payload itself was accepted.
    pub fn write(&self, payload: &[u8]) -> Result<usize> {
        let meta = &self.shared.meta;
        self.shared.with_state(|state| {
            state.ensure_open()?;

            if state.size() + payload.len() as u64 >= meta.max_size {
                state.batch_size = 0;
                state.rotate_file(meta)?;
                state.flush_buf()?;
            }

            let (accepted, res) = state.stage(payload);
            if let Err(source) = res {
                return Err(Error::Write { accepted, source });
            }

            state.batch_size += 1;
            if state.batch_size >= meta.max_batch_size {
                // A payload larger than the limit still lands in the fresh file;
                // rotation only guarantees the file is new, not that it fits.
                state.flush_buf()?;
            }
            Ok(accepted)
        })
    }

    /// Flush every staged byte to the active file.
    pub fn flush(&self) -> Result<()> {
        self.shared.with_state(|state| {
            state.ensure_open()?;
            state.flush_buf()
        })
    }

    /// Rotate the active file now, then flush staged bytes into the new file.
    pub fn rotate(&self) -> Result<()> {
        self.shared.with_state(|state| {
            state.ensure_open()?;
            state.batch_size = 0;
            state.rotate_file(&self.shared.meta)?;
            state.flush_buf()
        })
    }

    /// Switch to the file at `path`, created with `mode` if missing.
    ///
    /// The previous handle, if any, is closed. Staged bytes are kept and will
    /// be written to the new file. Opening a closed writer makes it usable
    /// again and restarts the background flush.
    pub fn open<P: AsRef<Path>>(&self, path: P, mode: u32) -> Result<()> {
        let path = path.as_ref();
        let mut flusher = self.lock_flusher();
        self.shared.with_state(|state| {
            let (file, disk_size) = open_file(&self.shared.meta, path, mode)?;
            if let Some(previous) = state.buf.get_mut().replace(file) {
                state.release(previous);
            }
            state.path = path.to_path_buf();
            state.disk_size = disk_size;
            state.closed = false;
            state.notices.push(Notice::Opened {
                path: path.to_path_buf(),
                size: disk_size,
            });
            Ok(())
        })?;
        if flusher.is_none() {
            *flusher = Flusher::spawn(&self.shared)?;
        }
        Ok(())
    }

    /// Stop the background flush, rotate if the file ended up over the size
    /// limit, flush what is staged and release the file.
    ///
    /// The handle is released even when rotation fails. A rotation error is
    /// returned. A failed trailing flush is reported to the error handler
    /// instead. Closing a closed writer does nothing.
    pub fn close(&self) -> Result<()> {
        if let Some(flusher) = self.lock_flusher().take() {
            flusher.stop();
        }

        let meta = &self.shared.meta;
        self.shared.with_state(|state| {
            if state.closed {
                return Ok(());
            }
            state.closed = true;

            let res = if state.size() > meta.max_size {
                state.rotate_file(meta)
            } else {
                Ok(())
            };
            if let Err(err) = state.flush_buf() {
                state.notices.push(Notice::Failed(err));
            }
            if let Some(file) = state.buf.get_mut().take() {
                state.release(file);
            }
            res
        })
    }

    /// Bytes on disk in the active file plus bytes staged in the buffer.
    pub fn size(&self) -> u64 {
        self.shared.lock().size()
    }

    /// Bytes staged in the buffer and not yet written to the file.
    pub fn buffered(&self) -> usize {
        self.shared.lock().buf.buffer().len()
    }

    /// Writes accepted since the last flush.
    pub fn batch_size(&self) -> usize {
        self.shared.lock().batch_size
    }

    /// Path of the active file.
    pub fn path(&self) -> PathBuf {
        self.shared.lock().path.clone()
    }

    /// Whether [`close`](Self::close) was called without a later
    /// [`open`](Self::open).
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "failed to close log file writer");
        }
    }
}

impl io::Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FileWriter::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        FileWriter::flush(self).map_err(Into::into)
    }
}

impl io::Write for &FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FileWriter::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        FileWriter::flush(self).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{builder::FileWriterBuilder, memory::MemoryFileSystem, rotation::RotationSize, TimeZone},
        chrono::{TimeZone as _, Utc},
        std::{
            fs,
            io::{Read as _, Write as _},
            sync::{mpsc, OnceLock, Weak},
            thread,
            time::Instant,
        },
        tempfile::tempdir,
    };

    const PAYLOAD: &[u8] = b"Hello, world!\n";
    const BACKUP: &str = "test.log.2025-04-01T19:55:07+00:00";

    fn memory_fs() -> MemoryFileSystem {
        let fs = MemoryFileSystem::new();
        fs.set_now(Utc.with_ymd_and_hms(2025, 4, 1, 19, 55, 7).unwrap());
        fs
    }

    fn builder(fs: &MemoryFileSystem) -> FileWriterBuilder {
        FileWriterBuilder::new("test.log")
            .file_system(fs.clone())
            .time_zone(TimeZone::UTC)
            .flush_interval(None)
    }

    /// Error handler forwarding every error message to a channel.
    fn recording_handler() -> (impl Fn(&Error) + Send + Sync + 'static, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler = move |err: &Error| {
            let _ = tx.lock().unwrap().send(err.to_string());
        };
        (handler, rx)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Run `f` on a thread whose default subscriber writes into `writer`,
    /// and wait for it to finish.
    fn with_writer_as_sink(
        writer: &Arc<FileWriter>,
        level: tracing::Level,
        f: impl FnOnce(&FileWriter) + Send + 'static,
    ) {
        let sink = Arc::clone(writer);
        let (done, finished) = mpsc::channel();
        thread::spawn(move || {
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(Arc::clone(&sink))
                .finish();
            tracing::subscriber::with_default(subscriber, || f(&sink));
            let _ = done.send(());
        });
        finished
            .recv_timeout(Duration::from_secs(5))
            .expect("writer blocked while logging into itself");
    }

    #[test]
    fn test_build_reads_existing_size() {
        let fs = memory_fs();
        fs.add_file("test.log", PAYLOAD);

        let writer = builder(&fs).build().unwrap();
        assert_eq!(writer.size(), PAYLOAD.len() as u64);
        assert_eq!(writer.path(), PathBuf::from("test.log"));
    }

    #[test]
    fn test_writes_below_limit_accumulate_without_rotation() {
        let fs = memory_fs();
        let writer = builder(&fs).max_size(RotationSize::Bytes(1024)).build().unwrap();

        let mut total = 0;
        for _ in 0..10 {
            total += writer.write(PAYLOAD).unwrap() as u64;
            assert_eq!(writer.size(), total);
        }
        assert_eq!(fs.paths(), vec![PathBuf::from("test.log")]);
        assert_eq!(writer.buffered() as u64, total);
    }

    #[test]
    fn test_single_write_below_limit_lands_on_close() {
        let fs = memory_fs();
        let writer = builder(&fs).max_size(RotationSize::Bytes(20)).build().unwrap();

        assert_eq!(writer.write(PAYLOAD).unwrap(), 14);
        assert_eq!(fs.get_file("test.log").unwrap(), b"");
        writer.close().unwrap();

        assert_eq!(fs.get_file("test.log").unwrap(), PAYLOAD);
        assert_eq!(fs.paths().len(), 1);
    }

    #[test]
    fn test_write_over_limit_rotates_before_staging() {
        let fs = memory_fs();
        let writer = builder(&fs)
            .max_size(RotationSize::Bytes(20))
            .max_batch_size(1)
            .build()
            .unwrap();

        writer.write(PAYLOAD).unwrap();
        writer.write(PAYLOAD).unwrap();
        writer.close().unwrap();

        assert_eq!(fs.paths(), vec![PathBuf::from("test.log"), PathBuf::from(BACKUP)]);
        assert_eq!(fs.get_file(BACKUP).unwrap(), PAYLOAD);
        assert_eq!(fs.get_file("test.log").unwrap(), PAYLOAD);
    }

    #[test]
    fn test_rotation_keeps_staged_bytes() {
        let fs = memory_fs();
        let writer = builder(&fs).max_size(RotationSize::Bytes(20)).build().unwrap();

        writer.write(PAYLOAD).unwrap();
        assert_eq!(writer.buffered(), 14);
        writer.write(PAYLOAD).unwrap();

        // The first payload was still staged when the file rotated, so the
        // post-rotation flush delivered it to the new file.
        assert_eq!(fs.get_file(BACKUP).unwrap(), b"");
        assert_eq!(fs.get_file("test.log").unwrap(), PAYLOAD);
        assert_eq!(writer.buffered(), 14);
        assert_eq!(writer.size(), 28);
    }

    #[test]
    fn test_explicit_rotate_keeps_staged_bytes_in_size() {
        let fs = memory_fs();
        fs.add_file("test.log", b"old contents\n");
        let writer = builder(&fs).build().unwrap();

        writer.write(PAYLOAD).unwrap();
        writer.rotate().unwrap();

        assert_eq!(fs.get_file(BACKUP).unwrap(), b"old contents\n");
        assert_eq!(fs.get_file("test.log").unwrap(), PAYLOAD);
        assert_eq!(writer.size(), PAYLOAD.len() as u64);
        assert_eq!(writer.batch_size(), 0);
    }

    #[test]
    fn test_delete_old_removes_retired_file() {
        let fs = memory_fs();
        let writer = builder(&fs)
            .max_size(RotationSize::Bytes(20))
            .max_batch_size(1)
            .delete_old(true)
            .build()
            .unwrap();

        writer.write(PAYLOAD).unwrap();
        writer.write(PAYLOAD).unwrap();

        assert_eq!(fs.paths(), vec![PathBuf::from("test.log")]);
        assert_eq!(fs.get_file("test.log").unwrap(), PAYLOAD);
    }

    #[test]
    fn test_batch_size_triggers_flush() {
        let fs = memory_fs();
        let writer = builder(&fs).max_batch_size(3).build().unwrap();

        writer.write(PAYLOAD).unwrap();
        writer.write(PAYLOAD).unwrap();
        assert_eq!(writer.batch_size(), 2);
        assert_eq!(fs.get_file("test.log").unwrap(), b"");

        writer.write(PAYLOAD).unwrap();
        assert_eq!(writer.batch_size(), 0);
        assert_eq!(writer.buffered(), 0);
        assert_eq!(fs.get_file("test.log").unwrap().len(), 42);
        assert_eq!(writer.size(), 42);
    }

    #[test]
    fn test_batch_of_one_never_leaves_bytes_staged() {
        let fs = memory_fs();
        let writer = builder(&fs).max_batch_size(1).build().unwrap();

        for i in 1..=5 {
            writer.write(PAYLOAD).unwrap();
            assert_eq!(writer.buffered(), 0);
            assert_eq!(writer.size(), 14 * i);
        }
    }

    #[test]
    fn test_explicit_flush_resets_batch() {
        let fs = memory_fs();
        let writer = builder(&fs).build().unwrap();

        writer.write(PAYLOAD).unwrap();
        writer.flush().unwrap();

        assert_eq!(writer.batch_size(), 0);
        assert_eq!(writer.buffered(), 0);
        assert_eq!(fs.get_file("test.log").unwrap(), PAYLOAD);
    }

    #[test]
    fn test_payload_larger_than_buffer_is_accepted_whole() {
        let fs = memory_fs();
        let writer = builder(&fs).buffer_capacity(8).build().unwrap();

        assert_eq!(writer.write(PAYLOAD).unwrap(), 14);
        assert_eq!(writer.size(), 14);
        writer.write(b"abc").unwrap();
        assert_eq!(writer.size(), 17);
        writer.flush().unwrap();
        assert_eq!(fs.get_file("test.log").unwrap().len(), 17);
    }

    #[test]
    fn test_partial_flush_keeps_size_consistent() {
        let fs = memory_fs();
        let writer = builder(&fs).build().unwrap();

        writer.write(PAYLOAD).unwrap();
        fs.set_write_budget(Some(5));

        let err = writer.flush().unwrap_err();
        assert!(matches!(err, Error::Flush(_)));
        assert_eq!(fs.get_file("test.log").unwrap(), b"Hello");
        assert_eq!(writer.buffered(), 9);
        assert_eq!(writer.size(), 14);

        fs.set_write_budget(None);
        writer.flush().unwrap();
        assert_eq!(fs.get_file("test.log").unwrap(), PAYLOAD);
        assert_eq!(writer.size(), 14);
    }

    #[test]
    fn test_batch_flush_error_is_returned() {
        let fs = memory_fs();
        let writer = builder(&fs).max_batch_size(1).build().unwrap();
        fs.set_write_budget(Some(0));

        assert!(matches!(writer.write(PAYLOAD), Err(Error::Flush(_))));
        assert_eq!(writer.buffered(), 14);
        assert_eq!(writer.size(), 14);
    }

    #[test]
    fn test_rename_failure_aborts_write() {
        let fs = memory_fs();
        let writer = builder(&fs).max_size(RotationSize::Bytes(20)).build().unwrap();

        writer.write(PAYLOAD).unwrap();
        fs.fail_rename(true);

        assert!(matches!(writer.write(PAYLOAD), Err(Error::Rename { .. })));
        assert_eq!(fs.open_handles(), 0);
        assert_eq!(writer.buffered(), 14);

        // A later rotation recovers the writer.
        fs.fail_rename(false);
        writer.rotate().unwrap();
        assert_eq!(fs.open_handles(), 1);
        assert_eq!(fs.get_file("test.log").unwrap(), PAYLOAD);
    }

    #[test]
    fn test_remove_failure_is_reported() {
        let fs = memory_fs();
        let writer = builder(&fs).delete_old(true).build().unwrap();
        fs.fail_remove(true);

        assert!(matches!(writer.rotate(), Err(Error::Remove { .. })));
    }

    #[test]
    fn test_reopen_failure_leaves_no_active_file() {
        let fs = memory_fs();
        let writer = builder(&fs).build().unwrap();
        fs.fail_open(true);

        assert!(matches!(writer.rotate(), Err(Error::Open { .. })));
        assert_eq!(fs.open_handles(), 0);

        writer.write(PAYLOAD).unwrap();
        assert!(matches!(writer.flush(), Err(Error::Flush(_))));
        assert_eq!(writer.buffered(), 14);

        fs.fail_open(false);
        writer.open("other.log", 0o600).unwrap();
        writer.flush().unwrap();
        assert_eq!(fs.get_file("other.log").unwrap(), PAYLOAD);
        assert_eq!(fs.file_mode("other.log"), Some(0o600));
    }

    #[test]
    fn test_open_replaces_handle_and_rebinds_buffer() {
        let fs = memory_fs();
        fs.add_file("other.log", b"0123456789");
        let writer = builder(&fs).build().unwrap();

        writer.write(PAYLOAD).unwrap();
        writer.open("other.log", 0o644).unwrap();

        assert_eq!(fs.open_handles(), 1);
        assert_eq!(writer.path(), PathBuf::from("other.log"));
        assert_eq!(writer.size(), 10 + 14);

        writer.flush().unwrap();
        assert_eq!(fs.get_file("test.log").unwrap(), b"");
        assert_eq!(fs.get_file("other.log").unwrap(), b"0123456789Hello, world!\n");
    }

    #[test]
    fn test_open_failure_keeps_current_file() {
        let fs = memory_fs();
        let writer = builder(&fs).build().unwrap();
        fs.fail_open(true);

        assert!(matches!(writer.open("other.log", 0o644), Err(Error::Open { .. })));
        fs.fail_open(false);
        writer.write(PAYLOAD).unwrap();
        writer.flush().unwrap();
        assert_eq!(fs.get_file("test.log").unwrap(), PAYLOAD);
    }

    #[test]
    fn test_close_rotates_oversized_file() {
        let fs = memory_fs();
        fs.add_file("test.log", b"0123456789012345");
        let writer = builder(&fs).max_size(RotationSize::Bytes(20)).build().unwrap();

        writer.write(b"abc").unwrap();
        assert_eq!(writer.size(), 19);
        fs.add_file("test.log", b"0123456789012345678");
        writer.open("test.log", 0o644).unwrap();
        assert_eq!(writer.size(), 22);

        writer.close().unwrap();
        assert_eq!(fs.get_file(BACKUP).unwrap(), b"0123456789012345678");
        assert_eq!(fs.get_file("test.log").unwrap(), b"abc");
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn test_close_releases_handle_when_rotation_fails() {
        let fs = memory_fs();
        fs.add_file("test.log", &[b'x'; 32]);
        let (handler, errors) = recording_handler();
        let writer = builder(&fs)
            .max_size(RotationSize::Bytes(20))
            .error_handler(handler)
            .build()
            .unwrap();
        fs.fail_rename(true);

        assert!(matches!(writer.close(), Err(Error::Rename { .. })));
        assert_eq!(fs.open_handles(), 0);
        assert!(writer.is_closed());
        // Nothing was staged, so the trailing flush had nothing to report.
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_close_reports_trailing_flush_error_to_handler() {
        let fs = memory_fs();
        let (handler, errors) = recording_handler();
        let writer = builder(&fs).error_handler(handler).build().unwrap();

        writer.write(PAYLOAD).unwrap();
        fs.set_write_budget(Some(0));

        writer.close().unwrap();
        assert_eq!(fs.open_handles(), 0);
        assert!(errors.try_recv().unwrap().starts_with("Failed to flush log buffer"));
    }

    #[test]
    fn test_closed_writer_rejects_operations_until_reopened() {
        let fs = memory_fs();
        let writer = builder(&fs).build().unwrap();
        writer.close().unwrap();
        writer.close().unwrap();

        assert!(matches!(writer.write(PAYLOAD), Err(Error::Closed)));
        assert!(matches!(writer.flush(), Err(Error::Closed)));
        assert!(matches!(writer.rotate(), Err(Error::Closed)));

        writer.open("test.log", 0o644).unwrap();
        assert!(!writer.is_closed());
        writer.write(PAYLOAD).unwrap();
        writer.close().unwrap();
        assert_eq!(fs.get_file("test.log").unwrap(), PAYLOAD);
    }

    #[test]
    fn test_drop_flushes_and_closes() {
        let fs = memory_fs();
        {
            let writer = builder(&fs).build().unwrap();
            writer.write(PAYLOAD).unwrap();
        }
        assert_eq!(fs.get_file("test.log").unwrap(), PAYLOAD);
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn test_io_write_impl() {
        let fs = memory_fs();
        let mut writer = builder(&fs).build().unwrap();

        writeln!(writer, "line {}", 1).unwrap();
        writeln!(&writer, "line {}", 2).unwrap();
        io::Write::flush(&mut writer).unwrap();
        assert_eq!(fs.get_file("test.log").unwrap(), b"line 1\nline 2\n");
    }

    #[test]
    fn test_concurrent_writes_keep_size_consistent() {
        let fs = memory_fs();
        let writer = Arc::new(
            builder(&fs)
                .max_size(RotationSize::Bytes(200))
                .max_batch_size(4)
                .build()
                .unwrap(),
        );

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let writer = Arc::clone(&writer);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        writer.write(PAYLOAD).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let on_disk = fs.get_file("test.log").unwrap().len() as u64;
        assert_eq!(writer.size(), on_disk + writer.buffered() as u64);
        assert!(writer.size() < 200);
    }

    #[test]
    fn test_writer_can_log_its_own_rotation() {
        let fs = memory_fs();
        let writer = Arc::new(
            builder(&fs)
                .max_size(RotationSize::Bytes(20))
                .max_batch_size(1)
                .build()
                .unwrap(),
        );

        with_writer_as_sink(&writer, tracing::Level::TRACE, |writer| {
            writer.write(PAYLOAD).unwrap();
            writer.write(PAYLOAD).unwrap();
        });

        assert!(fs.exists(BACKUP));
        let current = String::from_utf8(fs.get_file("test.log").unwrap()).unwrap();
        assert!(current.contains("flushed log buffer"));
        assert_eq!(writer.buffered(), 0);
    }

    #[test]
    fn test_default_handler_logs_failed_tick_into_the_writer() {
        let fs = memory_fs();
        let writer = Arc::new(builder(&fs).build().unwrap());
        let handle = fs.clone();

        with_writer_as_sink(&writer, tracing::Level::ERROR, move |writer| {
            writer.write(PAYLOAD).unwrap();
            handle.set_write_budget(Some(0));
            writer.shared.tick();
        });

        fs.set_write_budget(None);
        writer.flush().unwrap();
        let content = String::from_utf8(fs.get_file("test.log").unwrap()).unwrap();
        assert!(content.starts_with("Hello, world!\n"));
        assert!(content.contains("background log file operation failed"));
    }

    #[test]
    fn test_error_handler_may_write_to_the_writer() {
        let fs = memory_fs();
        let slot: Arc<OnceLock<Weak<FileWriter>>> = Arc::new(OnceLock::new());
        let target = Arc::clone(&slot);
        let writer = Arc::new(
            builder(&fs)
                .error_handler(move |err: &Error| {
                    if let Some(writer) = target.get().and_then(Weak::upgrade) {
                        let _ = writer.write(format!("error: {err}\n").as_bytes());
                    }
                })
                .build()
                .unwrap(),
        );
        slot.set(Arc::downgrade(&writer)).unwrap();

        writer.write(PAYLOAD).unwrap();
        fs.set_write_budget(Some(0));
        writer.shared.tick();

        fs.set_write_budget(None);
        writer.flush().unwrap();
        assert_eq!(
            fs.get_file("test.log").unwrap(),
            b"Hello, world!\nerror: Failed to flush log buffer: injected write failure\n"
        );
    }

    #[test]
    fn test_rotation_compresses_backup_on_disk() {
        let dir = tempdir().unwrap();
        let writer = FileWriterBuilder::new(dir.path().join("app.log"))
            .max_size(RotationSize::Bytes(20))
            .max_batch_size(1)
            .compression(Compression::Gzip)
            .flush_interval(None)
            .build()
            .unwrap();

        writer.write(PAYLOAD).unwrap();
        writer.write(PAYLOAD).unwrap();

        let names = || -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(dir.path())
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        };
        // The plain backup is removed only once the archive is complete.
        assert!(wait_for(|| {
            let names = names();
            names.len() == 2 && names[1].ends_with(".gz")
        }));

        let names = names();
        assert_eq!(names[0], "app.log");
        assert!(names[1].starts_with("app.log."));
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(fs::File::open(dir.path().join(&names[1])).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, PAYLOAD);
        assert_eq!(fs::read(dir.path().join("app.log")).unwrap(), PAYLOAD);
    }

    #[test]
    fn test_rotation_compresses_backup_within_file_system() {
        let fs = memory_fs();
        let writer = builder(&fs)
            .max_size(RotationSize::Bytes(20))
            .max_batch_size(1)
            .compression(Compression::XZ)
            .build()
            .unwrap();

        writer.write(PAYLOAD).unwrap();
        writer.write(PAYLOAD).unwrap();

        let compressed = format!("{BACKUP}.xz");
        assert!(wait_for(|| fs.exists(&compressed) && !fs.exists(BACKUP)));
        let mut decoded = Vec::new();
        lzma_rs::xz_decompress(&mut &fs.get_file(&compressed).unwrap()[..], &mut decoded).unwrap();
        assert_eq!(decoded, PAYLOAD);
    }

    #[test]
    fn test_delete_old_skips_compression() {
        let fs = memory_fs();
        let (handler, errors) = recording_handler();
        let writer = builder(&fs)
            .max_size(RotationSize::Bytes(20))
            .max_batch_size(1)
            .delete_old(true)
            .compression(Compression::Gzip)
            .error_handler(handler)
            .build()
            .unwrap();

        writer.write(PAYLOAD).unwrap();
        writer.write(PAYLOAD).unwrap();
        thread::sleep(Duration::from_millis(50));

        assert_eq!(fs.paths(), vec![PathBuf::from("test.log")]);
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_rotations_within_one_second_replace_the_backup() {
        let fs = memory_fs();
        fs.add_file("test.log", b"zero\n");
        let writer = builder(&fs).build().unwrap();

        writer.write(b"first\n").unwrap();
        writer.rotate().unwrap();
        assert_eq!(fs.get_file(BACKUP).unwrap(), b"zero\n");

        writer.write(b"second\n").unwrap();
        writer.rotate().unwrap();
        assert_eq!(fs.paths(), vec![PathBuf::from("test.log"), PathBuf::from(BACKUP)]);
        assert_eq!(fs.get_file(BACKUP).unwrap(), b"first\n");
        assert_eq!(fs.get_file("test.log").unwrap(), b"second\n");
    }
}
