//! Byte-level capabilities the demuxer reads from and the muxer writes to.
//!
//! These traits are the only place the pipeline touches external I/O. The
//! container layer drives them synchronously through custom AVIO contexts
//! (see `ffmpeg_utils::io`); asynchronous transports are bridged by the
//! adapters in [`async_io`].

pub mod async_io;
pub mod file;
pub mod memory;

pub use async_io::{AsyncSink, AsyncSource, AsyncStreamSource};
pub use file::{FileSink, FileSource};
pub use memory::{MemorySink, MemorySource};

use std::io;

/// Reference point for a seek request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute offset from the start.
    Set,
    /// Relative to the current position.
    Cur,
    /// Relative to the end.
    End,
    /// Query the total size without moving; the offset is ignored.
    Size,
}

/// A readable byte stream.
pub trait ByteSource: Send {
    /// Read up to `buf.len()` bytes. `Ok(0)` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Total size in bytes, or `<= 0` when unknown. Sources that report an
    /// unknown size are treated as non-seekable.
    fn size(&self) -> i64 {
        -1
    }

    /// Reposition the stream, returning the new absolute offset (or the size
    /// for [`Whence::Size`]).
    fn seek(&mut self, _offset: i64, _whence: Whence) -> io::Result<i64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "source is not seekable",
        ))
    }
}

/// A writable byte stream.
pub trait ByteSink: Send {
    /// Write the whole buffer.
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Reposition the stream. Only called when [`is_seekable`](Self::is_seekable)
    /// returns true.
    fn seek(&mut self, _offset: i64, _whence: Whence) -> io::Result<i64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "sink is not seekable",
        ))
    }

    fn is_seekable(&self) -> bool {
        false
    }

    /// Push buffered bytes to the underlying transport.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Resolve a seek request against a stream of known length.
///
/// Returns the new absolute position. Negative results are rejected.
pub(crate) fn resolve_seek(position: u64, len: u64, offset: i64, whence: Whence) -> io::Result<u64> {
    let base = match whence {
        Whence::Set => 0i64,
        Whence::Cur => position as i64,
        Whence::End => len as i64,
        Whence::Size => return Ok(len),
    };
    let target = base
        .checked_add(offset)
        .filter(|t| *t >= 0)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid seek to {} from {:?}", offset, whence),
            )
        })?;
    Ok(target as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_seek() {
        assert_eq!(resolve_seek(5, 10, 2, Whence::Set).unwrap(), 2);
        assert_eq!(resolve_seek(5, 10, 2, Whence::Cur).unwrap(), 7);
        assert_eq!(resolve_seek(5, 10, -3, Whence::End).unwrap(), 7);
        assert_eq!(resolve_seek(5, 10, 99, Whence::Size).unwrap(), 10);
        assert!(resolve_seek(5, 10, -6, Whence::Cur).is_err());
    }
}
