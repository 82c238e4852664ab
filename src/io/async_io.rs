//! Adapters from tokio's async I/O traits to the blocking byte capabilities.
//!
//! The demuxer and muxer run synchronously inside FFmpeg callbacks, so each
//! call here parks the current thread on `Handle::block_on`. These adapters
//! must therefore be driven from a blocking thread (`spawn_blocking` or a
//! plain OS thread), never from a runtime worker.

use super::{ByteSink, ByteSource, Whence};
use std::io::{self, SeekFrom};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;

/// Seekable source over any `AsyncRead + AsyncSeek`. Forward-only readers
/// go through [`AsyncStreamSource`].
pub struct AsyncSource<R> {
    handle: Handle,
    reader: R,
    size: i64,
}

impl<R> AsyncSource<R>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    /// Wrap `reader`, measuring its size and rewinding it to the start.
    ///
    /// Must be awaited inside the runtime whose handle later drives reads.
    pub async fn new(mut reader: R) -> io::Result<Self> {
        let size = reader.seek(SeekFrom::End(0)).await? as i64;
        reader.seek(SeekFrom::Start(0)).await?;
        Ok(Self {
            handle: Handle::current(),
            reader,
            size,
        })
    }

    /// Wrap `reader` with an explicit handle and a known size; pass `size <= 0`
    /// for a stream that should be read strictly forward.
    pub fn with_handle(handle: Handle, reader: R, size: i64) -> Self {
        Self {
            handle,
            reader,
            size,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R> ByteSource for AsyncSource<R>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let reader = &mut self.reader;
        self.handle.block_on(reader.read(buf))
    }

    fn size(&self) -> i64 {
        self.size
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<i64> {
        let from = match whence {
            Whence::Size => return Ok(self.size),
            Whence::Set => SeekFrom::Start(offset.max(0) as u64),
            Whence::Cur => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        let reader = &mut self.reader;
        Ok(self.handle.block_on(reader.seek(from))? as i64)
    }
}

/// Forward-only source over any `AsyncRead`, such as a socket or an HTTP
/// body. It reports an unknown size, so the demuxer never seeks it.
pub struct AsyncStreamSource<R> {
    handle: Handle,
    reader: R,
    consumed: u64,
}

impl<R> AsyncStreamSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wrap `reader` using the runtime of the calling context.
    ///
    /// Panics when called outside a tokio runtime, like `Handle::current`.
    pub fn new(reader: R) -> Self {
        Self::with_handle(Handle::current(), reader)
    }

    pub fn with_handle(handle: Handle, reader: R) -> Self {
        Self {
            handle,
            reader,
            consumed: 0,
        }
    }

    /// Bytes read so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R> ByteSource for AsyncStreamSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let reader = &mut self.reader;
        let n = self.handle.block_on(reader.read(buf))?;
        self.consumed += n as u64;
        Ok(n)
    }
}

/// Append-only sink over any `AsyncWrite`.
///
/// Only streaming containers (those that never seek back to patch headers)
/// can be written through it.
pub struct AsyncSink<W> {
    handle: Handle,
    writer: W,
    written: u64,
}

impl<W> AsyncSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap `writer` using the runtime of the calling context.
    ///
    /// Panics when called outside a tokio runtime, like `Handle::current`.
    pub fn new(writer: W) -> Self {
        Self::with_handle(Handle::current(), writer)
    }

    pub fn with_handle(handle: Handle, writer: W) -> Self {
        Self {
            handle,
            writer,
            written: 0,
        }
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> ByteSink for AsyncSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let writer = &mut self.writer;
        self.handle.block_on(writer.write_all(buf))?;
        self.written += buf.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        let writer = &mut self.writer;
        self.handle.block_on(writer.flush())
    }
}
