use thiserror::Error;

/// Main error type for the transcoding pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// The byte source or sink failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unparseable or unsupported container, codec or filter parameters
    #[error("Format error: {0}")]
    Format(String),

    /// The codec rejected a packet of the named stream
    #[error("Decode error on stream {stream}: {message}")]
    Decode { stream: String, message: String },

    /// The codec rejected a frame of the named stream
    #[error("Encode error on stream {stream}: {message}")]
    Encode { stream: String, message: String },

    /// A component was used out of order (programming error)
    #[error("State error: {0}")]
    State(String),

    /// An error originating from the underlying FFmpeg library
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    /// Invalid job configuration or configuration file
    #[error("Configuration error: {0}")]
    Config(String),
}

/// FFmpeg-specific errors that fall outside the pipeline taxonomy
#[derive(Error, Debug)]
pub enum FfmpegError {
    /// Failure during global FFmpeg initialization
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    /// Failure allocating an AVIO or format context
    #[error("Failed to allocate {0}")]
    Alloc(&'static str),

    /// Failure pushing into or pulling from a configured filter graph
    #[error("Filter graph error: {0}")]
    Filter(String),

    /// Failure creating or running an audio resampler
    #[error("Resampler error: {0}")]
    Resample(String),

    /// Failure repositioning the demuxer
    #[error("Seek failed: {0}")]
    Seek(String),
}

impl Error {
    pub(crate) fn decode(stream: &str, err: impl std::fmt::Display) -> Self {
        Error::Decode {
            stream: stream.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn encode(stream: &str, err: impl std::fmt::Display) -> Self {
        Error::Encode {
            stream: stream.to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;
