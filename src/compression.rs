//! Post-rotation compression of retired log files.
//!
//! Compression runs on a detached thread after a successful rename-rotation,
//! so a slow codec never holds the writer lock. Every read, create and remove
//! goes through the writer's [`FileSystem`].

use {
    crate::fs::{FileFlags, FileSystem},
    flate2::write::GzEncoder,
    std::{
        io::{self, Write as _},
        path::{Path, PathBuf},
    },
};

/// Specifies the compression algorithm to use for rotated log files.
///
/// When a log file is rotated, the backup is compressed with the specified
/// algorithm, given the matching extension and the uncompressed backup is
/// removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Gzip compression. Compressed files will have the `.gz` extension.
    Gzip,
    /// XZ compression. Compressed files will have the `.xz` extension.
    XZ,
}

impl Compression {
    /// Get the extension for the compressed log file.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Gzip => "gz",
            Compression::XZ => "xz",
        }
    }

    /// Compress the file at `path` into `<path>.<extension>` and remove the
    /// uncompressed file.
    ///
    /// # Arguments
    /// * `fs` - The filesystem holding the retired file.
    /// * `path` - The retired log file.
    /// * `mode` - Permission bits for the compressed file.
    /// # Returns
    /// The path of the compressed file.
    pub fn compress(&self, fs: &dyn FileSystem, path: &Path, mode: u32) -> io::Result<PathBuf> {
        let mut reader = io::BufReader::new(fs.read_file(path)?);

        let mut compressed_name = path.as_os_str().to_owned();
        compressed_name.push(format!(".{}", self.extension()));
        let compressed_path = PathBuf::from(compressed_name);

        let flags = FileFlags {
            create: true,
            append: false,
            truncate: true,
        };
        let outfile = fs.open_file(&compressed_path, flags, mode)?;
        let mut writer = io::BufWriter::new(outfile);

        match self {
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(writer, flate2::Compression::default());
                io::copy(&mut reader, &mut encoder)?;
                writer = encoder.finish()?;
            }
            Compression::XZ => {
                lzma_rs::xz_compress(&mut reader, &mut writer)?;
            }
        }
        writer.flush()?;
        writer.into_inner().map_err(io::IntoInnerError::into_error)?.close()?;

        fs.remove(path)?;
        Ok(compressed_path)
    }
}
