//! Container writer over a [`ByteSink`].

use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::ffmpeg_utils::helpers;
use crate::ffmpeg_utils::io::{parked_or, CustomOutput};
use crate::io::ByteSink;
use crate::metadata::StreamParameters;
use crate::packet::Packet;
use crate::timebase::TimeBase;
use ffmpeg_next as ffmpeg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MuxerState {
    Setup,
    Writing,
    Finished,
}

struct OutputStream {
    /// Time base packets arrive in.
    packet_time_base: TimeBase,
    /// Time base the container stores; final only after the header.
    stream_time_base: TimeBase,
}

/// Writes packets of one or more streams into a container.
pub struct Muxer {
    ctx: CustomOutput,
    format_name: String,
    streams: Vec<OutputStream>,
    state: MuxerState,
    packets_written: u64,
}

impl Muxer {
    /// Allocate a muxer for `format_name` writing into `sink`.
    pub fn new(format_name: &str, sink: Box<dyn ByteSink>) -> Result<Self> {
        let ctx = CustomOutput::open(format_name, sink)?;
        tracing::debug!(format = format_name, "Created muxer");
        Ok(Self {
            ctx,
            format_name: format_name.to_string(),
            streams: Vec::new(),
            state: MuxerState::Setup,
            packets_written: 0,
        })
    }

    /// Add a stream fed by `encoder`. Returns its index.
    pub fn new_stream(&mut self, encoder: &Encoder) -> Result<usize> {
        self.add_stream(
            encoder.codec_parameters(),
            encoder.codec_time_base(),
            encoder.time_base(),
        )
    }

    /// Add a stream whose packets are copied from a demuxed stream without
    /// re-encoding. Packets keep the source stream's time base.
    pub fn new_stream_from_parameters(&mut self, params: &StreamParameters) -> Result<usize> {
        self.add_stream(params.parameters().clone(), params.time_base(), params.time_base())
    }

    fn add_stream(
        &mut self,
        params: ffmpeg::codec::Parameters,
        initial_time_base: TimeBase,
        packet_time_base: TimeBase,
    ) -> Result<usize> {
        if self.state != MuxerState::Setup {
            return Err(Error::State("cannot add a stream after the header".into()));
        }

        let mut out_stream = self
            .ctx
            .output_mut()
            .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
            .map_err(|e| Error::Format(format!("failed to add stream: {}", e)))?;
        out_stream.set_parameters(params);
        // Let the container pick its own tag for the codec.
        helpers::stream_reset_codec_tag(&mut out_stream);
        out_stream.set_time_base(initial_time_base);
        let index = out_stream.index();

        self.streams.push(OutputStream {
            packet_time_base,
            stream_time_base: initial_time_base,
        });
        tracing::debug!(
            index,
            packet_time_base = %packet_time_base,
            time_base = %initial_time_base,
            "Added output stream"
        );
        Ok(index)
    }

    /// Write the container header. The container may replace the stream
    /// time bases; the final ones are read back here.
    pub fn write_header(&mut self) -> Result<()> {
        match self.state {
            MuxerState::Setup => {}
            MuxerState::Writing => return Err(Error::State("header already written".into())),
            MuxerState::Finished => return Err(Error::State("muxer already finished".into())),
        }
        if self.streams.is_empty() {
            return Err(Error::State("no output streams".into()));
        }

        if let Err(e) = self.ctx.output_mut().write_header() {
            return Err(parked_or(self.ctx.take_error(), || {
                Error::Format(format!(
                    "failed to write {} header: {}",
                    self.format_name, e
                ))
            }));
        }
        self.state = MuxerState::Writing;

        for (index, stream) in self.streams.iter_mut().enumerate() {
            if let Some(s) = self.ctx.output().stream(index) {
                if let Ok(tb) = TimeBase::try_from(s.time_base()) {
                    stream.stream_time_base = tb;
                }
            }
        }
        tracing::info!(
            format = %self.format_name,
            streams = self.streams.len(),
            "Wrote container header"
        );
        Ok(())
    }

    /// Submit one packet for `stream_index`. A flush packet drains the
    /// interleaving queue instead.
    pub fn write_frame(&mut self, mut packet: Packet, stream_index: usize) -> Result<()> {
        match self.state {
            MuxerState::Setup => return Err(Error::State("write_frame before write_header".into())),
            MuxerState::Finished => return Err(Error::State("write_frame after write_trailer".into())),
            MuxerState::Writing => {}
        }
        let Some(stream) = self.streams.get(stream_index) else {
            return Err(Error::State(format!(
                "stream index {} out of range ({} streams)",
                stream_index,
                self.streams.len()
            )));
        };

        if packet.is_flush() {
            return helpers::flush_interleaved(self.ctx.output_mut()).map_err(|e| {
                parked_or(self.ctx.take_error(), || {
                    Error::Format(format!("failed to flush interleaving queue: {}", e))
                })
            });
        }

        packet.rescale(stream.packet_time_base, stream.stream_time_base);
        packet.set_stream_index(stream_index);
        tracing::trace!(
            stream = stream_index,
            pts = ?packet.pts(),
            dts = ?packet.dts(),
            size = packet.size(),
            "Writing packet"
        );

        if let Err(e) = packet.as_inner().write_interleaved(self.ctx.output_mut()) {
            return Err(parked_or(self.ctx.take_error(), || {
                Error::Format(format!("failed to write packet: {}", e))
            }));
        }
        self.packets_written += 1;
        Ok(())
    }

    /// Finalize the container and flush the sink.
    pub fn write_trailer(&mut self) -> Result<()> {
        match self.state {
            MuxerState::Setup => return Err(Error::State("write_trailer before write_header".into())),
            MuxerState::Finished => return Err(Error::State("trailer already written".into())),
            MuxerState::Writing => {}
        }
        self.state = MuxerState::Finished;

        if let Err(e) = self.ctx.output_mut().write_trailer() {
            return Err(parked_or(self.ctx.take_error(), || {
                Error::Format(format!("failed to write trailer: {}", e))
            }));
        }
        self.ctx.flush_sink()?;
        tracing::info!(
            format = %self.format_name,
            packets = self.packets_written,
            "Wrote container trailer"
        );
        Ok(())
    }

    /// Whether the container wants codec extradata in its header rather than
    /// in-band.
    pub fn needs_global_header(&self) -> bool {
        self.ctx
            .output()
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER)
    }

    pub fn format_name(&self) -> &str {
        &self.format_name
    }

    pub fn nb_streams(&self) -> usize {
        self.streams.len()
    }

    /// Container time base of `stream_index`.
    pub fn stream_time_base(&self, stream_index: usize) -> Option<TimeBase> {
        self.streams.get(stream_index).map(|s| s.stream_time_base)
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Write FFmpeg's format dump to the log.
    pub fn dump(&self) {
        ffmpeg::format::context::output::dump(self.ctx.output(), 0, None);
    }
}

/// Default video and audio codec names of an output container.
pub fn default_codecs(format_name: &str) -> Option<(&'static str, &'static str)> {
    helpers::output_format_default_codecs(format_name).map(|(v, a)| (v.name(), a.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{EncoderConfig, EncoderParams};
    use crate::io::MemorySink;
    use std::collections::BTreeMap;

    fn pcm_encoder() -> Encoder {
        Encoder::new(&EncoderConfig {
            codec: "pcm_s16le".to_string(),
            bit_rate: None,
            time_base: None,
            global_header: false,
            options: BTreeMap::new(),
            params: EncoderParams::Audio {
                sample_rate: 48_000,
                channel_layout: "stereo".to_string(),
                sample_format: None,
            },
        })
        .unwrap()
    }

    #[test]
    fn test_default_codecs() {
        crate::ffmpeg_utils::init().unwrap();
        let (_, audio) = default_codecs("wav").unwrap();
        assert_eq!(audio, "pcm_s16le");
        assert!(default_codecs("no-such-format").is_none());
    }

    #[test]
    fn test_write_before_header_is_state_error() {
        crate::ffmpeg_utils::init().unwrap();
        let sink = MemorySink::new();
        let mut muxer = Muxer::new("wav", Box::new(sink.clone())).unwrap();
        let encoder = pcm_encoder();
        let index = muxer.new_stream(&encoder).unwrap();
        assert_eq!(index, 0);

        let packet = Packet::new(&[0u8; 16]).with_pts(Some(0)).with_dts(Some(0));
        assert!(matches!(
            muxer.write_frame(packet, 0),
            Err(Error::State(_))
        ));
        assert!(matches!(muxer.write_trailer(), Err(Error::State(_))));
    }

    #[test]
    fn test_header_twice_is_state_error() {
        crate::ffmpeg_utils::init().unwrap();
        let sink = MemorySink::new();
        let mut muxer = Muxer::new("wav", Box::new(sink.clone())).unwrap();
        muxer.new_stream(&pcm_encoder()).unwrap();
        muxer.write_header().unwrap();
        assert!(matches!(muxer.write_header(), Err(Error::State(_))));
        assert!(matches!(
            muxer.new_stream(&pcm_encoder()),
            Err(Error::State(_))
        ));
        assert!(matches!(
            muxer.write_frame(Packet::new(&[0u8; 4]), 3),
            Err(Error::State(_))
        ));
    }

    #[test]
    fn test_wav_round_trip_into_memory() {
        crate::ffmpeg_utils::init().unwrap();
        let sink = MemorySink::new();
        let mut muxer = Muxer::new("wav", Box::new(sink.clone())).unwrap();
        let encoder = pcm_encoder();
        let index = muxer.new_stream(&encoder).unwrap();
        muxer.write_header().unwrap();
        assert_eq!(muxer.stream_time_base(index), Some(TimeBase::new(1, 48_000).unwrap()));

        // 1024 stereo s16 samples, stamped in microseconds as encoders emit.
        let packet = Packet::new(&[0u8; 4096])
            .with_pts(Some(0))
            .with_dts(Some(0))
            .with_duration(21_333);
        muxer.write_frame(packet, index).unwrap();
        muxer.write_frame(Packet::flush(), index).unwrap();
        muxer.write_trailer().unwrap();
        assert!(matches!(muxer.write_trailer(), Err(Error::State(_))));

        let data = sink.data();
        assert_eq!(&data[..4], b"RIFF");
        assert!(data.len() >= 44 + 4096);
        assert_eq!(muxer.packets_written(), 1);
    }
}
