//! Custom AVIOContexts over the crate's byte capabilities.
//!
//! FFmpeg reads and writes through C callbacks that receive an opaque
//! pointer to a boxed state holding the Rust source or sink. An `io::Error`
//! raised inside a callback is parked in that state, FFmpeg sees
//! `AVERROR(EIO)`, and the owning demuxer or muxer surfaces the parked error
//! as [`Error::Io`] from the call that failed.
//!
//! # Ownership
//! [`CustomInput`] and [`CustomOutput`] pair a format context with the AVIO
//! context it reads from or writes to. The format context is declared first
//! so it is dropped first; the AVIO context, its buffer and the boxed state
//! are released afterwards.

use crate::error::{Error, FfmpegError, Result};
use crate::io::{ByteSink, ByteSource, Whence};
use ffmpeg_next as ffmpeg;
use std::ffi::{c_int, c_void, CString};
use std::io;
use std::ptr;

/// AVIO buffer size handed to FFmpeg.
pub const AVIO_BUFFER_SIZE: usize = 32 * 1024;

const EIO: c_int = ffmpeg::ffi::AVERROR(ffmpeg::error::EIO);

struct SourceState {
    source: Box<dyn ByteSource>,
    error: Option<io::Error>,
}

struct SinkState {
    sink: Box<dyn ByteSink>,
    error: Option<io::Error>,
}

fn whence_from_av(whence: c_int) -> Option<Whence> {
    if whence & ffmpeg::ffi::AVSEEK_SIZE != 0 {
        return Some(Whence::Size);
    }
    match whence & !ffmpeg::ffi::AVSEEK_FORCE {
        0 => Some(Whence::Set),
        1 => Some(Whence::Cur),
        2 => Some(Whence::End),
        _ => None,
    }
}

// C-compatible callbacks for FFmpeg

unsafe extern "C" fn read_packet(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    let state = &mut *(opaque as *mut SourceState);
    let slice = std::slice::from_raw_parts_mut(buf, buf_size.max(0) as usize);
    match state.source.read(slice) {
        Ok(0) => ffmpeg::ffi::AVERROR_EOF,
        Ok(n) => n as c_int,
        Err(e) => {
            state.error = Some(e);
            EIO
        }
    }
}

unsafe extern "C" fn seek_source(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    let state = &mut *(opaque as *mut SourceState);
    let Some(whence) = whence_from_av(whence) else {
        return EIO as i64;
    };
    if whence == Whence::Size {
        let size = state.source.size();
        return if size > 0 { size } else { EIO as i64 };
    }
    match state.source.seek(offset, whence) {
        Ok(pos) => pos,
        Err(e) => {
            state.error = Some(e);
            EIO as i64
        }
    }
}

unsafe extern "C" fn write_packet(opaque: *mut c_void, buf: *const u8, buf_size: c_int) -> c_int {
    let state = &mut *(opaque as *mut SinkState);
    let slice = std::slice::from_raw_parts(buf, buf_size.max(0) as usize);
    match state.sink.write(slice) {
        Ok(()) => buf_size,
        Err(e) => {
            state.error = Some(e);
            EIO
        }
    }
}

unsafe extern "C" fn seek_sink(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    let state = &mut *(opaque as *mut SinkState);
    let Some(whence) = whence_from_av(whence) else {
        return EIO as i64;
    };
    match state.sink.seek(offset, whence) {
        Ok(pos) => pos,
        Err(e) => {
            state.error = Some(e);
            EIO as i64
        }
    }
}

/// Allocate an AVIO context around `opaque`. The caller owns the result.
unsafe fn alloc_avio(
    opaque: *mut c_void,
    write: bool,
    read_cb: Option<unsafe extern "C" fn(*mut c_void, *mut u8, c_int) -> c_int>,
    write_cb: Option<unsafe extern "C" fn(*mut c_void, *const u8, c_int) -> c_int>,
    seek_cb: Option<unsafe extern "C" fn(*mut c_void, i64, c_int) -> i64>,
) -> Result<*mut ffmpeg::ffi::AVIOContext> {
    let buffer = ffmpeg::ffi::av_malloc(AVIO_BUFFER_SIZE) as *mut u8;
    if buffer.is_null() {
        return Err(FfmpegError::Alloc("AVIO buffer").into());
    }

    let avio = ffmpeg::ffi::avio_alloc_context(
        buffer,
        AVIO_BUFFER_SIZE as c_int,
        write as c_int,
        opaque,
        read_cb,
        write_cb,
        seek_cb,
    );
    if avio.is_null() {
        ffmpeg::ffi::av_free(buffer as *mut c_void);
        return Err(FfmpegError::Alloc("AVIO context").into());
    }
    Ok(avio)
}

/// Release an AVIO context and whatever buffer it currently holds.
unsafe fn free_avio(avio: &mut *mut ffmpeg::ffi::AVIOContext) {
    if avio.is_null() {
        return;
    }
    // FFmpeg may have swapped the buffer, so free the one it holds now.
    ffmpeg::ffi::av_freep(&mut (**avio).buffer as *mut *mut u8 as *mut c_void);
    ffmpeg::ffi::avio_context_free(avio);
}

/// Read-side AVIO context over a [`ByteSource`].
struct SourceIo {
    avio: *mut ffmpeg::ffi::AVIOContext,
    state: *mut SourceState,
}

impl SourceIo {
    fn new(source: Box<dyn ByteSource>) -> Result<Self> {
        let seekable = source.size() > 0;
        let state = Box::into_raw(Box::new(SourceState {
            source,
            error: None,
        }));
        // SAFETY: `state` stays valid until `Drop`, which frees the AVIO
        // context before reclaiming the box.
        let avio = unsafe {
            alloc_avio(
                state as *mut c_void,
                false,
                Some(read_packet),
                None,
                if seekable { Some(seek_source) } else { None },
            )
        };
        match avio {
            Ok(avio) => Ok(Self { avio, state }),
            Err(e) => {
                // SAFETY: nothing else references `state` yet.
                drop(unsafe { Box::from_raw(state) });
                Err(e)
            }
        }
    }

    fn take_error(&mut self) -> Option<io::Error> {
        // SAFETY: `state` is valid for the lifetime of `self`, and no FFmpeg
        // call is in flight while we hold `&mut self`.
        unsafe { (*self.state).error.take() }
    }
}

impl Drop for SourceIo {
    fn drop(&mut self) {
        unsafe {
            free_avio(&mut self.avio);
            drop(Box::from_raw(self.state));
        }
    }
}

/// Write-side AVIO context over a [`ByteSink`].
struct SinkIo {
    avio: *mut ffmpeg::ffi::AVIOContext,
    state: *mut SinkState,
}

impl SinkIo {
    fn new(sink: Box<dyn ByteSink>) -> Result<Self> {
        let seekable = sink.is_seekable();
        let state = Box::into_raw(Box::new(SinkState { sink, error: None }));
        // SAFETY: as for `SourceIo::new`.
        let avio = unsafe {
            alloc_avio(
                state as *mut c_void,
                true,
                None,
                Some(write_packet),
                if seekable { Some(seek_sink) } else { None },
            )
        };
        match avio {
            Ok(avio) => Ok(Self { avio, state }),
            Err(e) => {
                drop(unsafe { Box::from_raw(state) });
                Err(e)
            }
        }
    }

    fn take_error(&mut self) -> Option<io::Error> {
        unsafe { (*self.state).error.take() }
    }

    fn flush_sink(&mut self) -> io::Result<()> {
        // SAFETY: `avio` is valid until drop; flushing pushes any bytes still
        // in the AVIO buffer through `write_packet` before the sink flushes.
        unsafe {
            ffmpeg::ffi::avio_flush(self.avio);
            if let Some(e) = (*self.state).error.take() {
                return Err(e);
            }
            (*self.state).sink.flush()
        }
    }
}

impl Drop for SinkIo {
    fn drop(&mut self) {
        unsafe {
            free_avio(&mut self.avio);
            drop(Box::from_raw(self.state));
        }
    }
}

/// A demuxer context reading from a [`ByteSource`].
pub struct CustomInput {
    // Field order matters: the format context drops before its AVIO context.
    input: ffmpeg::format::context::Input,
    io: SourceIo,
}

// SAFETY: the raw pointers in `SourceIo` are exclusively owned by this value
// and the boxed source is `Send`; FFmpeg contexts are not thread-affine.
unsafe impl Send for CustomInput {}

impl CustomInput {
    /// Probe the container in `source` and read stream info.
    pub fn open(source: Box<dyn ByteSource>) -> Result<Self> {
        let mut io = SourceIo::new(source)?;

        // SAFETY: `avformat_alloc_context` returns a fresh context or null.
        // On failure `avformat_open_input` frees the context itself.
        unsafe {
            let mut ctx = ffmpeg::ffi::avformat_alloc_context();
            if ctx.is_null() {
                return Err(FfmpegError::Alloc("format context").into());
            }
            (*ctx).pb = io.avio;
            (*ctx).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO;

            let ret = ffmpeg::ffi::avformat_open_input(
                &mut ctx,
                ptr::null(),
                ptr::null_mut(),
                ptr::null_mut(),
            );
            if ret < 0 {
                return Err(parked_or(io.take_error(), || {
                    Error::Format(format!(
                        "could not open input: {}",
                        ffmpeg::Error::from(ret)
                    ))
                }));
            }

            let ret = ffmpeg::ffi::avformat_find_stream_info(ctx, ptr::null_mut());
            if ret < 0 {
                ffmpeg::ffi::avformat_close_input(&mut ctx);
                return Err(parked_or(io.take_error(), || {
                    Error::Format(format!(
                        "could not find stream info: {}",
                        ffmpeg::Error::from(ret)
                    ))
                }));
            }

            Ok(Self {
                input: ffmpeg::format::context::Input::wrap(ctx),
                io,
            })
        }
    }

    pub fn input(&self) -> &ffmpeg::format::context::Input {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut ffmpeg::format::context::Input {
        &mut self.input
    }

    /// The I/O error parked by the last failing callback, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.io.take_error()
    }
}

/// A muxer context writing to a [`ByteSink`].
pub struct CustomOutput {
    output: ffmpeg::format::context::Output,
    io: SinkIo,
}

// SAFETY: as for `CustomInput`.
unsafe impl Send for CustomOutput {}

impl CustomOutput {
    /// Allocate a muxer for `format_name` (`"matroska"`, `"mpegts"`, ...).
    pub fn open(format_name: &str, sink: Box<dyn ByteSink>) -> Result<Self> {
        let cname = CString::new(format_name)
            .map_err(|_| Error::Format(format!("invalid format name {:?}", format_name)))?;
        let io = SinkIo::new(sink)?;

        // SAFETY: on success `ctx` is a fresh muxer context we own; we attach
        // our AVIO context and flag it custom so FFmpeg never opens a file.
        unsafe {
            let mut ctx: *mut ffmpeg::ffi::AVFormatContext = ptr::null_mut();
            let ret = ffmpeg::ffi::avformat_alloc_output_context2(
                &mut ctx,
                ptr::null_mut(),
                cname.as_ptr(),
                ptr::null(),
            );
            if ret < 0 || ctx.is_null() {
                return Err(Error::Format(format!(
                    "unknown output format '{}'",
                    format_name
                )));
            }
            (*ctx).pb = io.avio;
            (*ctx).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO;

            Ok(Self {
                output: ffmpeg::format::context::Output::wrap(ctx),
                io,
            })
        }
    }

    pub fn output(&self) -> &ffmpeg::format::context::Output {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut ffmpeg::format::context::Output {
        &mut self.output
    }

    pub fn take_error(&mut self) -> Option<io::Error> {
        self.io.take_error()
    }

    /// Flush the AVIO buffer and then the sink itself.
    pub fn flush_sink(&mut self) -> io::Result<()> {
        self.io.flush_sink()
    }
}

impl Drop for CustomOutput {
    fn drop(&mut self) {
        // `Output`'s destructor calls `avio_close(pb)`; the AVIO context is
        // ours, so detach it first.
        super::helpers::detach_avio(&mut self.output);
    }
}

/// Prefer the parked I/O error over FFmpeg's generic failure.
pub(crate) fn parked_or(parked: Option<io::Error>, otherwise: impl FnOnce() -> Error) -> Error {
    match parked {
        Some(e) => Error::Io(e),
        None => otherwise(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySink;

    struct FailingSource;

    impl ByteSource for FailingSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "boom"))
        }
    }

    #[test]
    fn test_whence_mapping() {
        assert_eq!(whence_from_av(0), Some(Whence::Set));
        assert_eq!(whence_from_av(1), Some(Whence::Cur));
        assert_eq!(whence_from_av(2), Some(Whence::End));
        assert_eq!(whence_from_av(ffmpeg::ffi::AVSEEK_SIZE), Some(Whence::Size));
        assert_eq!(whence_from_av(ffmpeg::ffi::AVSEEK_FORCE), Some(Whence::Set));
        assert_eq!(whence_from_av(7), None);
    }

    #[test]
    fn test_open_input_surfaces_io_error() {
        crate::ffmpeg_utils::init().unwrap();
        match CustomInput::open(Box::new(FailingSource)) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            Err(e) => panic!("expected io error, got {}", e),
            Ok(_) => panic!("failing source should not open"),
        }
    }

    #[test]
    fn test_open_output_unknown_format() {
        crate::ffmpeg_utils::init().unwrap();
        let result = CustomOutput::open("no-such-muxer", Box::new(MemorySink::new()));
        assert!(matches!(result, Err(Error::Format(_))));
        assert!(CustomOutput::open("matroska", Box::new(MemorySink::new())).is_ok());
    }
}
