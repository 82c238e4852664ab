//! Decoder for one compressed stream.
//!
//! Packets arrive in their source stream's time base. Frames leave in
//! [`TimeBase::MICROSECONDS`], named after the decoder.

use crate::demuxer::Demuxer;
use crate::error::{Error, Result};
use crate::frame::{AudioFormat, Frame, MediaType, VideoFormat};
use crate::metadata::StreamParameters;
use crate::packet::Packet;
use crate::timebase::TimeBase;
use ffmpeg_next as ffmpeg;

enum Codec {
    Video(ffmpeg::decoder::Video),
    Audio(ffmpeg::decoder::Audio),
}

pub struct Decoder {
    name: String,
    codec: Codec,
    /// Time base of incoming packets.
    source_time_base: TimeBase,
    /// Time base the codec works in (its packet time base).
    time_base: TimeBase,
    flushed: bool,
    frames_out: u64,
}

impl Decoder {
    /// Open a decoder for a stream described by `params`.
    pub fn new(name: &str, params: &StreamParameters) -> Result<Self> {
        let source_time_base = params.time_base();
        let context = ffmpeg::codec::Context::from_parameters(params.parameters().clone())
            .map_err(|e| {
                Error::Format(format!(
                    "failed to create codec context for '{}': {}",
                    name, e
                ))
            })?;
        let mut decoder = context.decoder();

        // Audio codecs count in samples; video keeps the container's clock.
        let time_base = match params.media_type() {
            MediaType::Audio => {
                let rate = crate::ffmpeg_utils::helpers::codec_params_sample_rate(params.parameters());
                if rate > 0 {
                    TimeBase::for_sample_rate(rate)?
                } else {
                    source_time_base
                }
            }
            MediaType::Video => source_time_base,
        };
        decoder.set_packet_time_base(time_base);

        let open_err = |e: ffmpeg::Error| {
            Error::Format(format!(
                "failed to open {} decoder for '{}': {}",
                params.codec_name(),
                name,
                e
            ))
        };
        let codec = match params.media_type() {
            MediaType::Video => Codec::Video(decoder.video().map_err(open_err)?),
            MediaType::Audio => Codec::Audio(decoder.audio().map_err(open_err)?),
        };

        tracing::debug!(
            name,
            codec = params.codec_name(),
            source_time_base = %source_time_base,
            time_base = %time_base,
            "Opened decoder"
        );

        Ok(Self {
            name: name.to_string(),
            codec,
            source_time_base,
            time_base,
            flushed: false,
            frames_out: 0,
        })
    }

    /// Open a decoder for a demuxer stream, named `in{stream_index}`.
    pub fn from_demuxer(demuxer: &Demuxer, stream_index: usize) -> Result<Self> {
        let params = demuxer.stream_parameters(stream_index)?;
        Self::new(&format!("in{}", stream_index), &params)
    }

    /// Decode one packet and return every frame that became available.
    ///
    /// A flush packet is treated as a call to [`flush`](Self::flush).
    pub fn decode(&mut self, mut packet: Packet) -> Result<Vec<Frame>> {
        if self.flushed {
            return Err(Error::State(format!(
                "decoder '{}' used after flush",
                self.name
            )));
        }
        if packet.is_flush() {
            return self.flush();
        }

        packet.rescale(self.source_time_base, self.time_base);
        let sent = match &mut self.codec {
            Codec::Video(d) => d.send_packet(packet.as_inner()),
            Codec::Audio(d) => d.send_packet(packet.as_inner()),
        };
        sent.map_err(|e| Error::decode(&self.name, e))?;

        self.drain()
    }

    /// Signal end of stream and return the frames the codec still held.
    pub fn flush(&mut self) -> Result<Vec<Frame>> {
        if self.flushed {
            return Err(Error::State(format!(
                "decoder '{}' flushed twice",
                self.name
            )));
        }
        self.flushed = true;

        let sent = match &mut self.codec {
            Codec::Video(d) => d.send_eof(),
            Codec::Audio(d) => d.send_eof(),
        };
        match sent {
            Ok(()) | Err(ffmpeg::Error::Eof) => {}
            Err(e) => return Err(Error::decode(&self.name, e)),
        }

        let frames = self.drain()?;
        tracing::debug!(
            name = %self.name,
            drained = frames.len(),
            total = self.frames_out,
            "Flushed decoder"
        );
        Ok(frames)
    }

    fn drain(&mut self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        loop {
            let received = match &mut self.codec {
                Codec::Video(d) => {
                    let mut frame = ffmpeg::util::frame::Video::empty();
                    d.receive_frame(&mut frame).map(|()| Frame::from_video(frame))
                }
                Codec::Audio(d) => {
                    let mut frame = ffmpeg::util::frame::Audio::empty();
                    d.receive_frame(&mut frame).map(|()| Frame::from_audio(frame))
                }
            };

            let mut frame = match received {
                Ok(frame) => frame,
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(Error::decode(&self.name, e)),
            };

            let best_effort = frame.as_frame().timestamp().or(frame.pts());
            frame.set_pts(self.time_base.rescale_opt(best_effort, TimeBase::MICROSECONDS));
            frame.set_name(self.name.as_str());
            self.frames_out += 1;
            frames.push(frame);
        }
        Ok(frames)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> MediaType {
        match self.codec {
            Codec::Video(_) => MediaType::Video,
            Codec::Audio(_) => MediaType::Audio,
        }
    }

    /// The codec's own time base.
    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    /// The time base of produced frames.
    pub fn output_time_base(&self) -> TimeBase {
        TimeBase::MICROSECONDS
    }

    /// Layout of produced pictures, as far as the codec knows it yet.
    pub fn video_format(&self) -> Option<VideoFormat> {
        match &self.codec {
            Codec::Video(d) => Some(VideoFormat {
                pixel: d.format(),
                width: d.width(),
                height: d.height(),
                sample_aspect_ratio: d.aspect_ratio(),
            }),
            Codec::Audio(_) => None,
        }
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        match &self.codec {
            Codec::Audio(d) => Some(AudioFormat {
                sample: d.format(),
                layout: d.channel_layout(),
                rate: d.rate(),
            }),
            Codec::Video(_) => None,
        }
    }

    pub fn frames_out(&self) -> u64 {
        self.frames_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{StreamDetails, StreamInfo};

    fn pcm_params() -> StreamParameters {
        let info = StreamInfo {
            index: 0,
            media_type: MediaType::Audio,
            codec_name: "pcm_s16le".to_string(),
            time_base: TimeBase::new(1, 48_000).unwrap(),
            bit_rate: 0,
            start_time_secs: 0.0,
            duration_secs: 0.0,
            format_name: "s16".to_string(),
            details: StreamDetails::Audio {
                sample_rate: 48_000,
                channels: 2,
                channel_layout: "stereo".to_string(),
            },
        };
        StreamParameters::from_info(&info).unwrap()
    }

    #[test]
    fn test_create_aac_decoder() {
        let decoder = ffmpeg::codec::decoder::find(ffmpeg::codec::Id::AAC);
        assert!(decoder.is_some());
    }

    #[test]
    fn test_decode_pcm_rescales_to_microseconds() {
        crate::ffmpeg_utils::init().unwrap();
        let mut decoder = Decoder::new("a0", &pcm_params()).unwrap();
        assert_eq!(decoder.media_type(), MediaType::Audio);
        assert_eq!(decoder.time_base(), TimeBase::new(1, 48_000).unwrap());

        // 480 stereo s16 samples, half a second into the stream.
        let packet = Packet::new(&[0u8; 480 * 4])
            .with_pts(Some(24_000))
            .with_dts(Some(24_000))
            .with_duration(480);
        let frames = decoder.decode(packet).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples(), 480);
        assert_eq!(frames[0].pts(), Some(500_000));
        assert_eq!(frames[0].name(), "a0");

        let format = decoder.audio_format().unwrap();
        assert_eq!(format.rate, 48_000);
        assert_eq!(format.channels(), 2);
    }

    #[test]
    fn test_flush_is_single_use() {
        crate::ffmpeg_utils::init().unwrap();
        let mut decoder = Decoder::new("a0", &pcm_params()).unwrap();
        assert!(decoder.flush().unwrap().is_empty());
        assert!(matches!(decoder.flush(), Err(Error::State(_))));
        assert!(matches!(
            decoder.decode(Packet::new(&[0u8; 4])),
            Err(Error::State(_))
        ));
    }

    #[test]
    fn test_flush_packet_flushes() {
        crate::ffmpeg_utils::init().unwrap();
        let mut decoder = Decoder::new("a0", &pcm_params()).unwrap();
        decoder.decode(Packet::flush()).unwrap();
        assert!(matches!(decoder.flush(), Err(Error::State(_))));
    }
}
