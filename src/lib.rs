//! Streaming media transcoding pipeline.
//!
//! Five stages move media from a byte source to a byte sink:
//! [`Demuxer`] → [`Decoder`] → optional [`Filterer`] → [`Encoder`] →
//! [`Muxer`]. Codec and container work is done by FFmpeg; this crate owns
//! the stage contracts, timestamp rescaling between stages, audio
//! re-chunking ([`AudioFrameFifo`]) and the I/O plumbing.
//!
//! Frames travel between decoder, filter graph and encoder stamped in
//! [`TimeBase::MICROSECONDS`]. [`Transcoder`] drives a whole job from a
//! [`TranscodeConfig`].

pub mod config;
pub mod decoder;
pub mod demuxer;
pub mod encoder;
pub mod error;
pub mod ffmpeg_utils;
pub mod fifo;
pub mod filterer;
pub mod frame;
pub mod io;
pub mod logging;
pub mod metadata;
pub mod muxer;
pub mod packet;
pub mod resampler;
pub mod timebase;
pub mod transcoder;

#[cfg(test)]
pub(crate) mod tests;

pub use config::{Config, LoggingConfig};
pub use decoder::Decoder;
pub use demuxer::Demuxer;
pub use encoder::{Encoder, EncoderConfig, EncoderParams};
pub use error::{Error, FfmpegError, Result};
pub use ffmpeg_utils::version_info as ffmpeg_version_info;
pub use ffmpeg_utils::{init, install_log_bridge};
pub use fifo::AudioFrameFifo;
pub use filterer::{FilterInput, FilterOutput, Filterer};
pub use frame::{AudioFormat, Frame, FrameFormat, MediaType, VideoFormat};
pub use metadata::{FormatInfo, StreamInfo, StreamParameters};
pub use muxer::Muxer;
pub use packet::Packet;
pub use resampler::Resampler;
pub use timebase::TimeBase;
pub use transcoder::{run_async, Progress, TranscodeConfig, Transcoder};
