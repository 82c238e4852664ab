//! Container reader over a [`ByteSource`].

use crate::error::{Error, FfmpegError, Result};
use crate::ffmpeg_utils::helpers;
use crate::ffmpeg_utils::io::{parked_or, CustomInput};
use crate::io::ByteSource;
use crate::metadata::{FormatInfo, StreamParameters};
use crate::packet::Packet;
use crate::timebase::TimeBase;
use ffmpeg_next as ffmpeg;

/// Reads packets in container order and tracks how far each stream has got.
pub struct Demuxer {
    ctx: CustomInput,
    info: FormatInfo,
    /// Per container stream; `None` when the container reports no usable
    /// time base.
    time_bases: Vec<Option<TimeBase>>,
    /// Next expected timestamp per stream, in seconds.
    current: Vec<f64>,
    packets_read: u64,
}

impl Demuxer {
    /// Probe `source` and parse the container headers.
    pub fn open(source: Box<dyn ByteSource>) -> Result<Self> {
        let ctx = CustomInput::open(source)?;
        let info = FormatInfo::from_input(ctx.input())?;

        let time_bases: Vec<Option<TimeBase>> = ctx
            .input()
            .streams()
            .map(|s| TimeBase::try_from(s.time_base()).ok())
            .collect();
        let current = vec![0.0; time_bases.len()];

        tracing::info!(
            format = %info.format_name,
            streams = info.streams.len(),
            duration_secs = info.duration_secs,
            "Opened input"
        );
        for stream in &info.streams {
            tracing::debug!(
                index = stream.index,
                media_type = %stream.media_type,
                codec = %stream.codec_name,
                time_base = %stream.time_base,
                "Input stream"
            );
        }

        Ok(Self {
            ctx,
            info,
            time_bases,
            current,
            packets_read: 0,
        })
    }

    /// Next packet in container order, or `None` at end of stream.
    ///
    /// Timestamps are in the packet's stream time base.
    pub fn read(&mut self) -> Result<Option<Packet>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(self.ctx.input_mut()) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                // A failing source can look like EOF to the demuxer.
                if let Some(e) = self.ctx.take_error() {
                    return Err(Error::Io(e));
                }
                tracing::debug!(packets = self.packets_read, "End of input");
                return Ok(None);
            }
            Err(e) => {
                return Err(parked_or(self.ctx.take_error(), || {
                    Error::Format(format!("failed to read packet: {}", e))
                }))
            }
        }

        let packet = Packet::from_inner(packet);
        self.packets_read += 1;
        self.advance(&packet);

        tracing::trace!(
            stream = packet.stream_index(),
            pts = ?packet.pts(),
            dts = ?packet.dts(),
            size = packet.size(),
            "Read packet"
        );
        Ok(Some(packet))
    }

    fn advance(&mut self, packet: &Packet) {
        let index = packet.stream_index();
        let (Some(pts), Some(Some(tb))) = (packet.pts(), self.time_bases.get(index)) else {
            return;
        };
        if packet.size() == 0 {
            return;
        }
        let end = tb.to_seconds(pts + packet.duration().max(0));
        if let Some(current) = self.current.get_mut(index) {
            if end > *current {
                *current = end;
            }
        }
    }

    /// Position the read cursor at or before `timestamp` (in the stream's
    /// time base) and reset every stream's current time.
    pub fn seek(&mut self, timestamp: i64, stream_index: usize) -> Result<()> {
        self.check_stream(stream_index)?;
        if let Err(e) = helpers::seek_backward(self.ctx.input_mut(), stream_index, timestamp) {
            return Err(parked_or(self.ctx.take_error(), || {
                FfmpegError::Seek(format!(
                    "stream {} to {}: {}",
                    stream_index, timestamp, e
                ))
                .into()
            }));
        }
        self.current.iter_mut().for_each(|t| *t = 0.0);
        tracing::debug!(stream = stream_index, timestamp, "Seeked input");
        Ok(())
    }

    /// Seconds up to which `stream_index` has been read.
    pub fn current_time(&self, stream_index: usize) -> Result<f64> {
        self.check_stream(stream_index)?;
        Ok(self.current[stream_index])
    }

    pub fn format_info(&self) -> &FormatInfo {
        &self.info
    }

    pub fn nb_streams(&self) -> usize {
        self.time_bases.len()
    }

    pub fn stream_time_base(&self, stream_index: usize) -> Result<TimeBase> {
        self.check_stream(stream_index)?;
        self.time_bases[stream_index]
            .ok_or_else(|| Error::Format(format!("stream {} has no time base", stream_index)))
    }

    /// Codec parameters for building a decoder or a transmuxed stream.
    pub fn stream_parameters(&self, stream_index: usize) -> Result<StreamParameters> {
        self.check_stream(stream_index)?;
        let stream = self
            .ctx
            .input()
            .stream(stream_index)
            .ok_or_else(|| Error::State(format!("no stream {}", stream_index)))?;
        StreamParameters::from_stream(&stream)
    }

    pub fn packets_read(&self) -> u64 {
        self.packets_read
    }

    /// Write FFmpeg's format dump to the log.
    pub fn dump(&self) {
        ffmpeg::format::context::input::dump(self.ctx.input(), 0, None);
    }

    fn check_stream(&self, stream_index: usize) -> Result<()> {
        if stream_index >= self.time_bases.len() {
            return Err(Error::State(format!(
                "stream index {} out of range ({} streams)",
                stream_index,
                self.time_bases.len()
            )));
        }
        Ok(())
    }
}
