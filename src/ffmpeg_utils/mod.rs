//! FFmpeg module - provides wrappers and utilities for FFmpeg library access
//!
//! This module handles:
//! - FFmpeg initialization
//! - Forwarding FFmpeg's own log output into `tracing`
//! - Custom AVIOContexts over the crate's byte sources and sinks
//! - Raw field access and name lookups

pub mod helpers;
pub mod io;
pub mod utils;

pub use ffmpeg_next as ffmpeg;

/// Initialize the FFmpeg library.
///
/// Call once at startup before opening any demuxer, codec or muxer.
/// Repeated calls are harmless.
pub fn init() -> Result<(), crate::error::FfmpegError> {
    ffmpeg::init().map_err(|e| {
        crate::error::FfmpegError::InitFailed(format!("ffmpeg::init() failed: {}", e))
    })?;

    tracing::info!("FFmpeg initialized");

    Ok(())
}

/// Route FFmpeg's log output through `tracing`.
///
/// `verbose` lowers FFmpeg's threshold from INFO to VERBOSE. Must be called
/// after `init()` and before worker threads start, because the log callback
/// is process-global.
pub fn install_log_bridge(verbose: bool) {
    let level = if verbose {
        ffmpeg::ffi::AV_LOG_VERBOSE
    } else {
        ffmpeg::ffi::AV_LOG_INFO
    };
    // SAFETY: both functions only swap global FFmpeg state; the callback is a
    // plain `extern "C"` fn with static lifetime.
    unsafe {
        ffmpeg::ffi::av_log_set_level(level);
        ffmpeg::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
    }
}

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: ffmpeg::ffi::va_list,
) {
    use std::ffi::CStr;

    if level > unsafe { ffmpeg::ffi::av_log_get_level() } {
        return;
    }

    let mut buf = [0 as std::ffi::c_char; 1024];
    let mut print_prefix: std::ffi::c_int = 1;
    ffmpeg::ffi::av_log_format_line(
        avcl,
        level,
        fmt,
        vl,
        buf.as_mut_ptr(),
        buf.len() as std::ffi::c_int,
        &mut print_prefix,
    );

    let msg = CStr::from_ptr(buf.as_ptr()).to_string_lossy();
    let msg = msg.trim_end();
    if msg.is_empty() {
        return;
    }

    if level <= ffmpeg::ffi::AV_LOG_ERROR {
        tracing::error!(target: "ffmpeg", "{}", msg);
    } else if level <= ffmpeg::ffi::AV_LOG_WARNING {
        tracing::warn!(target: "ffmpeg", "{}", msg);
    } else if level <= ffmpeg::ffi::AV_LOG_INFO {
        tracing::info!(target: "ffmpeg", "{}", msg);
    } else {
        tracing::debug!(target: "ffmpeg", "{}", msg);
    }
}

/// Version string of the linked libavformat, e.g. `"61.7.100"`.
pub fn version_info() -> String {
    let v = ffmpeg::format::version();
    format!("{}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff)
}
