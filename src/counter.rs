//! Byte counting, redirectable sink behind the write buffer.
//!
//! The `BufWriter` is built once around a [`ByteCounter`]. Rotation and open
//! only swap the counter's target through `BufWriter::get_mut`, so bytes staged
//! in the buffer survive the swap and land in whichever file is attached when
//! the buffer is next drained.

use {
    crate::fs::LogFile,
    std::io::{self, Write},
};

/// Wraps the active log file and counts the bytes it accepted.
#[derive(Default)]
pub(crate) struct ByteCounter {
    target: Option<Box<dyn LogFile>>,
    count: u64,
}

impl ByteCounter {
    pub(crate) fn new(target: Box<dyn LogFile>) -> Self {
        ByteCounter {
            target: Some(target),
            count: 0,
        }
    }

    /// Attach a new target, returning the previous one.
    pub(crate) fn replace(&mut self, target: Box<dyn LogFile>) -> Option<Box<dyn LogFile>> {
        self.target.replace(target)
    }

    /// Detach the current target.
    pub(crate) fn take(&mut self) -> Option<Box<dyn LogFile>> {
        self.target.take()
    }

    /// Bytes delivered since the last call, resetting the count to zero.
    pub(crate) fn drain(&mut self) -> u64 {
        std::mem::take(&mut self.count)
    }
}

impl Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let target = self.target.as_mut().ok_or_else(no_active_file)?;
        let n = target.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.target.as_mut() {
            Some(target) => target.flush(),
            None => Ok(()),
        }
    }
}

fn no_active_file() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "no active log file")
}
