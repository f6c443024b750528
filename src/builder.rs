//! Fluent configuration of [`FileWriter`] instances.

use {
    crate::{
        compression::Compression,
        error::{Error, Result},
        fs::{FileFlags, FileSystem, OsFileSystem},
        rotation::{RotationSize, TimeZone, DEFAULT_ROTATE_POSTFIX},
        writer::{open_file, ErrorHandler, FileWriter, WriterMeta},
    },
    chrono::format::{Item, StrftimeItems},
    std::{
        path::{Path, PathBuf},
        sync::Arc,
        time::Duration,
    },
};

/// Owner may read, write and execute; group and others may read and execute.
pub const DEFAULT_FILE_MODE: u32 = 0o755;

/// 4 MiB.
pub const DEFAULT_MAX_SIZE: RotationSize = RotationSize::MB(4);

/// Writes accepted before the buffer is flushed.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 32;

/// Period of the background flush, so logs reach the disk even when the batch
/// never fills.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Capacity of the staging buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Logs the error with `tracing::error!`. The handler runs after the writer
/// lock is released, so this is safe when the writer is the tracing sink.
fn default_error_handler() -> ErrorHandler {
    Arc::new(|err: &Error| tracing::error!(error = %err, "background log file operation failed"))
}

/// Provides a fluent interface for configuring [`FileWriter`] instances.
///
/// # Default Configuration
///
/// If not explicitly configured, a writer uses these defaults:
/// * File mode `0o755`, opened with create + append
/// * Rotation at 4 MiB, backups named `<path>.<RFC 3339 timestamp>` in UTC
/// * No compression, retired files are kept
/// * Flush every 32 writes or every 10 seconds, 4 KiB buffer
/// * Background errors logged with `tracing::error!`
///
/// # Examples
///
/// ```rust
/// use rollfile::{FileWriterBuilder, MemoryFileSystem, RotationSize};
/// use std::time::Duration;
///
/// let writer = FileWriterBuilder::new("app.log")
///     .file_system(MemoryFileSystem::new())
///     .max_size(RotationSize::KB(512))
///     .max_batch_size(64)
///     .flush_interval(Some(Duration::from_secs(1)))
///     .build()
///     .unwrap();
///
/// writer.write(b"Hello, world!\n").unwrap();
/// writer.close().unwrap();
/// ```
pub struct FileWriterBuilder {
    path: PathBuf,
    meta: WriterMeta,
}

impl FileWriterBuilder {
    /// Create a new builder for the log file at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileWriterBuilder {
            path: path.as_ref().to_path_buf(),
            meta: WriterMeta {
                fs: Arc::new(OsFileSystem),
                mode: DEFAULT_FILE_MODE,
                flags: FileFlags::default(),
                rotate_postfix: DEFAULT_ROTATE_POSTFIX.to_string(),
                time_zone: TimeZone::UTC.offset(),
                delete_old: false,
                compression: None,
                max_size: DEFAULT_MAX_SIZE.bytes(),
                max_batch_size: DEFAULT_MAX_BATCH_SIZE,
                flush_interval: Some(DEFAULT_FLUSH_INTERVAL),
                buffer_capacity: DEFAULT_BUFFER_CAPACITY,
                error_handler: default_error_handler(),
            },
        }
    }

    /// Set the file permissions for created log files (Unix-like systems
    /// only), in octal notation like when using chmod.
    pub fn file_mode(self, mode: u32) -> Self {
        Self {
            meta: WriterMeta { mode, ..self.meta },
            ..self
        }
    }

    /// Set the flags applied every time the file is opened.
    pub fn flags(self, flags: FileFlags) -> Self {
        Self {
            meta: WriterMeta { flags, ..self.meta },
            ..self
        }
    }

    /// Set the size at which the file is rotated.
    pub fn max_size(self, max_size: RotationSize) -> Self {
        Self {
            meta: WriterMeta {
                max_size: max_size.bytes(),
                ..self.meta
            },
            ..self
        }
    }

    /// Set the rotation size in (possibly fractional) megabytes.
    pub fn max_size_mb(self, megabytes: f64) -> Self {
        self.max_size(RotationSize::FractionalMB(megabytes))
    }

    /// Compress rotated files with the given codec.
    pub fn compression(self, compression: Compression) -> Self {
        Self {
            meta: WriterMeta {
                compression: Some(compression),
                ..self.meta
            },
            ..self
        }
    }

    /// Delete the retired file on rotation instead of keeping a backup.
    pub fn delete_old(self, delete_old: bool) -> Self {
        Self {
            meta: WriterMeta { delete_old, ..self.meta },
            ..self
        }
    }

    /// Set the strftime pattern used to name backups, e.g. `%Y-%m-%d-%H-%M`.
    ///
    /// Two rotations that render the same name replace the earlier backup.
    /// The default pattern has one-second resolution; add `%f` when files may
    /// rotate faster than that.
    pub fn rotate_postfix<S: Into<String>>(self, postfix: S) -> Self {
        Self {
            meta: WriterMeta {
                rotate_postfix: postfix.into(),
                ..self.meta
            },
            ..self
        }
    }

    /// Set the time zone backup timestamps are rendered in.
    pub fn time_zone(self, time_zone: TimeZone) -> Self {
        Self {
            meta: WriterMeta {
                time_zone: time_zone.offset(),
                ..self.meta
            },
            ..self
        }
    }

    /// Set the background flush period. `None` or a zero duration disables
    /// the background flush.
    pub fn flush_interval(self, flush_interval: Option<Duration>) -> Self {
        Self {
            meta: WriterMeta {
                flush_interval,
                ..self.meta
            },
            ..self
        }
    }

    /// Set the number of writes after which the buffer is flushed.
    pub fn max_batch_size(self, max_batch_size: usize) -> Self {
        Self {
            meta: WriterMeta {
                max_batch_size,
                ..self.meta
            },
            ..self
        }
    }

    /// Set the capacity of the staging buffer in bytes.
    pub fn buffer_capacity(self, buffer_capacity: usize) -> Self {
        Self {
            meta: WriterMeta {
                buffer_capacity,
                ..self.meta
            },
            ..self
        }
    }

    /// Set the hook receiving errors from the background flush, the trailing
    /// flush on close and post-rotation compression.
    ///
    /// The hook is called without the writer lock held and may write to the
    /// writer. Calling [`FileWriter::close`] from it can block: the background
    /// flush thread calls the hook and `close` waits for that thread.
    pub fn error_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        Self {
            meta: WriterMeta {
                error_handler: Arc::new(handler),
                ..self.meta
            },
            ..self
        }
    }

    /// Use `fs` for every file operation instead of the real filesystem.
    pub fn file_system<F: FileSystem + 'static>(self, fs: F) -> Self {
        Self {
            meta: WriterMeta {
                fs: Arc::new(fs),
                ..self.meta
            },
            ..self
        }
    }

    fn validate(&self) -> Result<()> {
        if self.meta.max_size == 0 {
            return Err(Error::Configuration("max size must be greater than zero".to_string()));
        }
        if self.meta.max_batch_size == 0 {
            return Err(Error::Configuration(
                "max batch size must be greater than zero".to_string(),
            ));
        }
        if self.meta.buffer_capacity == 0 {
            return Err(Error::Configuration(
                "buffer capacity must be greater than zero".to_string(),
            ));
        }
        if !self.meta.delete_old {
            let postfix = &self.meta.rotate_postfix;
            if postfix.is_empty() || StrftimeItems::new(postfix).any(|item| matches!(item, Item::Error)) {
                return Err(Error::Configuration(format!("invalid rotate postfix '{postfix}'")));
            }
        }
        Ok(())
    }

    /// Open (or create) the log file and start the writer.
    pub fn build(self) -> Result<FileWriter> {
        self.validate()?;
        let (file, disk_size) = open_file(&self.meta, &self.path, self.meta.mode)?;
        tracing::debug!(path = %self.path.display(), size = disk_size, "opened log file");
        FileWriter::new(self.meta, self.path, file, disk_size)
    }
}
