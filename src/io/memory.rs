//! In-memory byte source and sink.
//!
//! `MemorySink` is a cloneable handle: the muxer owns one clone while the
//! caller keeps another to read the finished container back. Each callback
//! takes the lock for a single operation, so FFmpeg querying the size from
//! inside a trailer write never re-enters a held lock.

use super::{resolve_seek, ByteSink, ByteSource, Whence};
use bytes::Bytes;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

/// Seekable source over an immutable byte buffer.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
    position: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(remaining) = self.data.get(self.position..) else {
            return Ok(0);
        };
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }

    fn size(&self) -> i64 {
        self.data.len() as i64
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<i64> {
        let len = self.data.len() as u64;
        let target = resolve_seek(self.position as u64, len, offset, whence)?;
        if whence == Whence::Size {
            return Ok(target as i64);
        }
        // Seeking past the end is allowed; reads there return 0.
        self.position = target as usize;
        Ok(target as i64)
    }
}

#[derive(Debug, Default)]
struct MemoryBuffer {
    buffer: Vec<u8>,
    position: u64,
}

/// Seekable, growable sink backed by a shared `Vec<u8>`.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryBuffer>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of the written data
    pub fn data(&self) -> Vec<u8> {
        self.inner.lock().buffer.clone()
    }

    /// The written data as `Bytes`, ready to feed a [`MemorySource`].
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.data())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().buffer.is_empty()
    }

    /// Clear the buffer
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.buffer.clear();
        inner.position = 0;
    }
}

impl ByteSink for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock();
        let pos = inner.position as usize;
        let end = pos + buf.len();

        if end > inner.buffer.len() {
            inner.buffer.resize(end, 0);
        }

        inner.buffer[pos..end].copy_from_slice(buf);
        inner.position = end as u64;
        Ok(())
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<i64> {
        let mut inner = self.inner.lock();
        let len = inner.buffer.len() as u64;
        let target = resolve_seek(inner.position, len, offset, whence)?;
        if whence != Whence::Size {
            inner.position = target;
        }
        Ok(target as i64)
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_read_and_seek() {
        let mut src = MemorySource::new(&b"hello world"[..]);
        assert_eq!(src.size(), 11);

        let mut buf = [0u8; 5];
        assert_eq!(src.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");

        assert_eq!(src.seek(-5, Whence::End).unwrap(), 6);
        let mut rest = [0u8; 16];
        assert_eq!(src.read(&mut rest).unwrap(), 5);
        assert_eq!(&rest[..5], b"world");
        assert_eq!(src.read(&mut rest).unwrap(), 0);

        assert_eq!(src.seek(0, Whence::Size).unwrap(), 11);
        assert_eq!(src.position(), 11);
    }

    #[test]
    fn test_memory_source_read_past_end() {
        let mut src = MemorySource::new(&b"hello"[..]);
        assert_eq!(src.seek(10, Whence::Set).unwrap(), 10);
        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf).unwrap(), 0);
        assert_eq!(src.position(), 10);

        assert_eq!(src.seek(1, Whence::Set).unwrap(), 1);
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"ello");
    }

    #[test]
    fn test_memory_sink_seek_and_overwrite() {
        let handle = MemorySink::new();
        let mut sink = handle.clone();
        sink.write(b"abcdef").unwrap();
        assert_eq!(sink.seek(2, Whence::Set).unwrap(), 2);
        sink.write(b"XY").unwrap();
        assert_eq!(handle.data(), b"abXYef");

        // Writing past the end zero-fills the gap.
        sink.seek(8, Whence::Set).unwrap();
        sink.write(b"Z").unwrap();
        assert_eq!(handle.data(), b"abXYef\0\0Z");
        assert_eq!(sink.seek(0, Whence::Size).unwrap(), 9);
        assert_eq!(handle.len(), 9);

        handle.clear();
        assert!(handle.is_empty());
    }
}
