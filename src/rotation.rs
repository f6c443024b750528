//! Rotation thresholds, time zones and backup naming.

use {
    chrono::{DateTime, FixedOffset, Local, Utc},
    std::path::{Path, PathBuf},
};

/// Default pattern for backup postfixes, RFC 3339 (e.g. `2025-04-01T19:55:00+00:00`).
pub const DEFAULT_ROTATE_POSTFIX: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Defines size thresholds for rotating log files in various units.
///
/// When the active file plus the bytes still waiting in the buffer would reach
/// the threshold, the file is rotated before the next payload is staged.
///
/// # Examples
/// ```
/// use rollfile::{FileWriterBuilder, MemoryFileSystem, RotationSize};
///
/// // Rotate when the file reaches 100 MB
/// let writer = FileWriterBuilder::new("large.log")
///     .file_system(MemoryFileSystem::new())
///     .max_size(RotationSize::MB(100))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RotationSize {
    /// Raw byte count
    Bytes(u64),
    /// Kilobytes (1 KB = 1024 bytes)
    KB(u64),
    /// Megabytes (1 MB = 1024 KB = 1,048,576 bytes)
    MB(u64),
    /// Fractional megabytes, truncated to whole bytes (e.g. `0.5` = 524,288 bytes)
    FractionalMB(f64),
    /// Gigabytes (1 GB = 1024 MB = 1,073,741,824 bytes)
    GB(u64),
}

impl RotationSize {
    /// Get the threshold in bytes.
    pub fn bytes(&self) -> u64 {
        match self {
            RotationSize::Bytes(b) => *b,
            RotationSize::KB(kb) => kb * 1024,
            RotationSize::MB(mb) => mb * 1024 * 1024,
            RotationSize::FractionalMB(mb) => (mb * 1024.0 * 1024.0) as u64,
            RotationSize::GB(gb) => gb * 1024 * 1024 * 1024,
        }
    }
}

/// Specifies the time zone used to render backup timestamps.
///
/// # Examples
/// ```
/// use rollfile::TimeZone;
/// use chrono::FixedOffset;
///
/// // Use UTC time for global deployments
/// let utc = TimeZone::UTC;
///
/// // Use the local system time zone
/// let local = TimeZone::Local;
///
/// // Use a fixed offset for a specific region (e.g., UTC+8)
/// let china = TimeZone::Fix(FixedOffset::east_opt(8 * 3600).unwrap());
/// ```
#[derive(Debug, Clone)]
pub enum TimeZone {
    /// Use UTC time zone.
    UTC,
    /// Use the system's local time zone, resolved when the writer is built.
    Local,
    /// Use a fixed time zone offset.
    Fix(FixedOffset),
}

impl TimeZone {
    pub(crate) fn offset(&self) -> FixedOffset {
        match self {
            TimeZone::UTC => Utc::now().fixed_offset().offset().to_owned(),
            TimeZone::Local => Local::now().offset().to_owned(),
            TimeZone::Fix(fixed_offset) => *fixed_offset,
        }
    }
}

/// Build the name a retired log file is renamed to: `<path>.<formatted now>`.
///
/// # Arguments
/// * `path` - The path of the active log file.
/// * `now` - The rotation time.
/// * `offset` - The offset the timestamp is rendered in.
/// * `postfix` - A chrono strftime pattern.
pub(crate) fn backup_path(path: &Path, now: DateTime<Utc>, offset: &FixedOffset, postfix: &str) -> PathBuf {
    let stamp = now.with_timezone(offset).format(postfix);
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{stamp}"));
    PathBuf::from(name)
}
