//! # rollfile
//!
//! rollfile is a buffered, size-rotated file writer meant as a sink for
//! structured log output. Callers push arbitrary byte payloads; the writer
//! stages them in memory, flushes them to disk every N writes or every flush
//! interval, and once the file would grow past a configured size it renames the
//! file to `<path>.<timestamp>` (or deletes it) and carries on writing to a
//! fresh file at the same path. **Bytes staged when the file rotates are never
//! lost**: the buffer is kept and only its destination changes.
//!
//! A [`FileWriter`] implements [`std::io::Write`], so it can be used directly
//! as an appender for the tracing crate through `tracing_appender::non_blocking`.
//!
//! ## Example
//!
//! ```rust
//! use {
//!    rollfile::{FileWriterBuilder, RotationSize},
//!    tracing_subscriber::util::SubscriberInitExt,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!    # let dir = tempfile::tempdir()?;
//!    # let path = dir.path().join("tracing.log");
//!    let writer = FileWriterBuilder::new(path)
//!        .max_size(RotationSize::MB(10)) // Rotate once the file reaches 10 MB
//!        .max_batch_size(16) // Flush every 16 log lines
//!        .build()?;
//!    let (non_blocking, _guard) = tracing_appender::non_blocking(writer);
//!    tracing_subscriber::fmt()
//!        .with_writer(non_blocking)
//!        .with_ansi(false)
//!        .finish()
//!        .try_init()?;
//!
//!    tracing::info!("This is an info message");
//!    tracing::warn!("This is a warning message");
//!
//!    Ok(())
//! }
//! ```
//!
//! ## Testing against an in-memory filesystem
//!
//! Every open, rename and remove goes through a [`FileSystem`]. Swap in a
//! [`MemoryFileSystem`] with a frozen clock to get deterministic backup names:
//!
//! ```rust
//! use {
//!    chrono::{TimeZone as _, Utc},
//!    rollfile::{FileWriterBuilder, MemoryFileSystem, RotationSize},
//! };
//!
//! let fs = MemoryFileSystem::new();
//! fs.set_now(Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap());
//!
//! let writer = FileWriterBuilder::new("app.log")
//!     .file_system(fs.clone())
//!     .max_size(RotationSize::Bytes(20))
//!     .max_batch_size(1)
//!     .build()
//!     .unwrap();
//! writer.write(b"Hello, world!\n").unwrap();
//! writer.write(b"Hello, world!\n").unwrap();
//! writer.close().unwrap();
//!
//! assert!(fs.exists("app.log.2025-04-01T00:00:00+00:00"));
//! ```
mod builder;
mod compression;
mod counter;
mod error;
mod flusher;
mod fs;
mod memory;
mod rotation;
mod writer;

pub use {
    builder::{
        FileWriterBuilder, DEFAULT_BUFFER_CAPACITY, DEFAULT_FILE_MODE, DEFAULT_FLUSH_INTERVAL,
        DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_SIZE,
    },
    compression::Compression,
    error::{Error, Result},
    fs::{FileFlags, FileSystem, LogFile, OsFile, OsFileSystem},
    memory::{MemoryFile, MemoryFileSystem},
    rotation::{RotationSize, TimeZone, DEFAULT_ROTATE_POSTFIX},
    writer::{ErrorHandler, FileWriter},
};
