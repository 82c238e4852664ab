//! Encoder for one output stream.
//!
//! Frames arrive in [`TimeBase::MICROSECONDS`] and packets leave in it too;
//! inside, everything runs in the codec's own time base. Audio is converted
//! to the codec's sample format when needed and re-chunked through an
//! [`AudioFrameFifo`] so the codec always sees its preferred frame size.

use crate::error::{Error, Result};
use crate::ffmpeg_utils::helpers;
use crate::fifo::AudioFrameFifo;
use crate::frame::{AudioFormat, Frame, MediaType};
use crate::metadata::{Ratio, StreamDetails, StreamInfo};
use crate::packet::Packet;
use crate::resampler::{needs_resampling, Resampler};
use crate::timebase::TimeBase;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Samples per frame for codecs that accept any frame size.
pub const DEFAULT_FRAME_SIZE: usize = 1024;

/// Everything needed to open an encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Codec descriptor name (`"aac"`) or encoder name (`"libx264"`).
    pub codec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<usize>,
    /// Codec time base. Audio always uses at least sample precision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_base: Option<TimeBase>,
    /// Put codec extradata in the container header instead of in-band.
    #[serde(default)]
    pub global_header: bool,
    /// Codec private options, passed to the codec when it is opened.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    pub params: EncoderParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EncoderParams {
    Video {
        width: u32,
        height: u32,
        /// Defaults to the codec's first supported format.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pixel_format: Option<String>,
        frame_rate: Ratio,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_aspect_ratio: Option<Ratio>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gop_size: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_b_frames: Option<usize>,
    },
    Audio {
        sample_rate: u32,
        channel_layout: String,
        /// Defaults to the codec's first supported format.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_format: Option<String>,
    },
}

impl EncoderConfig {
    /// A config for `codec` that reproduces the layout of an input stream.
    pub fn from_stream_info(codec: &str, info: &StreamInfo) -> Self {
        let params = match &info.details {
            StreamDetails::Video {
                width,
                height,
                frame_rate,
                sample_aspect_ratio,
            } => EncoderParams::Video {
                width: *width,
                height: *height,
                pixel_format: helpers::pixel_format_from_name(&info.format_name)
                    .map(|_| info.format_name.clone()),
                frame_rate: *frame_rate,
                sample_aspect_ratio: sample_aspect_ratio.is_set().then_some(*sample_aspect_ratio),
                gop_size: None,
                max_b_frames: None,
            },
            StreamDetails::Audio {
                sample_rate,
                channel_layout,
                ..
            } => EncoderParams::Audio {
                sample_rate: *sample_rate,
                channel_layout: channel_layout.clone(),
                sample_format: None,
            },
        };
        Self {
            codec: codec.to_string(),
            bit_rate: (info.bit_rate > 0).then_some(info.bit_rate as usize),
            time_base: None,
            global_header: false,
            options: BTreeMap::new(),
            params,
        }
    }

    pub fn media_type(&self) -> MediaType {
        match self.params {
            EncoderParams::Video { .. } => MediaType::Video,
            EncoderParams::Audio { .. } => MediaType::Audio,
        }
    }
}

/// Find an encoder by codec descriptor name, falling back to encoder name.
pub fn find_encoder(name: &str) -> Option<ffmpeg::Codec> {
    helpers::codec_id_from_name(name)
        .and_then(codec::encoder::find)
        .or_else(|| codec::encoder::find_by_name(name))
}

/// Whether this FFmpeg build can encode `name`.
pub fn is_encoder_available(name: &str) -> bool {
    find_encoder(name).is_some()
}

struct AudioPath {
    encoder: codec::encoder::Audio,
    format: AudioFormat,
    resampler: Option<Resampler>,
    fifo: AudioFrameFifo,
}

enum Codec {
    Video(codec::encoder::Video),
    Audio(Box<AudioPath>),
}

pub struct Encoder {
    name: String,
    codec_name: String,
    codec: Codec,
    codec_time_base: TimeBase,
    frame_size: usize,
    flushed: bool,
    samples_encoded: u64,
    packets_out: u64,
}

impl Encoder {
    pub fn new(config: &EncoderConfig) -> Result<Self> {
        let found = find_encoder(&config.codec)
            .ok_or_else(|| Error::Format(format!("encoder '{}' not found", config.codec)))?;

        let mut context = codec::Context::new_with_codec(found);
        context.compliance(codec::Compliance::Experimental);
        if config.global_header {
            context.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut options = ffmpeg::Dictionary::new();
        for (key, value) in &config.options {
            options.set(key, value);
        }

        let open_err = |e: ffmpeg::Error| {
            Error::Format(format!("failed to open encoder '{}': {}", config.codec, e))
        };

        let (codec, codec_time_base, frame_size) = match &config.params {
            EncoderParams::Video {
                width,
                height,
                pixel_format,
                frame_rate,
                sample_aspect_ratio,
                gop_size,
                max_b_frames,
            } => {
                let pixel = match pixel_format {
                    Some(name) => helpers::pixel_format_from_name(name)
                        .ok_or_else(|| Error::Format(format!("unknown pixel format '{}'", name)))?,
                    None => found
                        .video()
                        .ok()
                        .and_then(|v| v.formats())
                        .and_then(|mut f| f.next())
                        .unwrap_or(ffmpeg::format::Pixel::YUV420P),
                };
                if !frame_rate.is_set() {
                    return Err(Error::Format(format!(
                        "invalid frame rate {}/{}",
                        frame_rate.num, frame_rate.den
                    )));
                }
                let time_base = match config.time_base {
                    Some(tb) => tb,
                    None => TimeBase::new(frame_rate.den, frame_rate.num)?,
                };

                context.set_time_base(time_base);
                context.set_frame_rate(Some(ffmpeg::Rational::from(*frame_rate)));
                let mut video = context.encoder().video().map_err(open_err)?;
                video.set_width(*width);
                video.set_height(*height);
                video.set_format(pixel);
                if let Some(sar) = sample_aspect_ratio {
                    video.set_aspect_ratio(ffmpeg::Rational::from(*sar));
                }
                if let Some(gop) = gop_size {
                    video.set_gop(*gop);
                }
                if let Some(b) = max_b_frames {
                    video.set_max_b_frames(*b);
                }
                if let Some(rate) = config.bit_rate {
                    video.set_bit_rate(rate);
                }

                let opened = video.open_as_with(found, options).map_err(open_err)?;
                let tb = TimeBase::try_from(opened.time_base()).unwrap_or(time_base);
                (Codec::Video(opened), tb, 0)
            }
            EncoderParams::Audio {
                sample_rate,
                channel_layout,
                sample_format,
            } => {
                let layout = helpers::channel_layout_from_name(channel_layout).ok_or_else(|| {
                    Error::Format(format!("unknown channel layout '{}'", channel_layout))
                })?;
                let sample = match sample_format {
                    Some(name) => helpers::sample_format_from_name(name)
                        .ok_or_else(|| Error::Format(format!("unknown sample format '{}'", name)))?,
                    None => found
                        .audio()
                        .ok()
                        .and_then(|a| a.formats())
                        .and_then(|mut f| f.next())
                        .unwrap_or(ffmpeg::format::Sample::F32(
                            ffmpeg::format::sample::Type::Planar,
                        )),
                };
                let sample_tb = TimeBase::for_sample_rate(*sample_rate)?;
                let time_base = match config.time_base {
                    Some(tb) => sample_tb.finer(tb),
                    None => sample_tb,
                };

                context.set_time_base(time_base);
                let mut audio = context.encoder().audio().map_err(open_err)?;
                audio.set_rate(*sample_rate as i32);
                audio.set_format(sample);
                audio.set_channel_layout(layout);
                if let Some(rate) = config.bit_rate {
                    audio.set_bit_rate(rate);
                }

                let opened = audio.open_as_with(found, options).map_err(open_err)?;
                let tb = TimeBase::try_from(opened.time_base()).unwrap_or(time_base);
                let frame_size = match opened.frame_size() as usize {
                    0 => DEFAULT_FRAME_SIZE,
                    n => n,
                };
                let format = AudioFormat {
                    sample,
                    layout,
                    rate: *sample_rate,
                };
                let fifo = AudioFrameFifo::new(format, frame_size, tb)?;
                (
                    Codec::Audio(Box::new(AudioPath {
                        encoder: opened,
                        format,
                        resampler: None,
                        fifo,
                    })),
                    tb,
                    frame_size,
                )
            }
        };

        tracing::debug!(
            codec = %config.codec,
            media_type = %config.media_type(),
            time_base = %codec_time_base,
            frame_size,
            "Opened encoder"
        );

        Ok(Self {
            name: config.codec.clone(),
            codec_name: config.codec.clone(),
            codec,
            codec_time_base,
            frame_size,
            flushed: false,
            samples_encoded: 0,
            packets_out: 0,
        })
    }

    /// Name used in errors and logs; defaults to the codec name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Encode one frame and return every packet that became available.
    pub fn encode(&mut self, mut frame: Frame) -> Result<Vec<Packet>> {
        if self.flushed {
            return Err(Error::State(format!("encoder '{}' used after flush", self.name)));
        }
        if frame.media_type() != self.media_type() {
            return Err(Error::Format(format!(
                "encoder '{}' got a {} frame",
                self.name,
                frame.media_type()
            )));
        }

        match &mut self.codec {
            Codec::Video(encoder) => {
                frame.set_pts(TimeBase::MICROSECONDS.rescale_opt(frame.pts(), self.codec_time_base));
                frame.reset_picture_type();
                encoder
                    .send_frame(frame.as_frame())
                    .map_err(|e| Error::encode(&self.name, e))?;
                self.drain()
            }
            Codec::Audio(path) => {
                let converted = resample(path, frame)?;
                if let Some(converted) = converted {
                    path.fifo.push(&converted)?;
                }
                let mut packets = Vec::new();
                while path_ready(&self.codec, false) {
                    self.send_fifo_frame()?;
                    packets.extend(self.drain()?);
                }
                Ok(packets)
            }
        }
    }

    /// Drain buffered audio, signal end of stream and return the remaining
    /// packets. May only be called once.
    pub fn flush(&mut self) -> Result<Vec<Packet>> {
        if self.flushed {
            return Err(Error::State(format!("encoder '{}' flushed twice", self.name)));
        }
        self.flushed = true;

        let mut packets = Vec::new();
        if let Codec::Audio(path) = &mut self.codec {
            if let Some(resampler) = path.resampler.as_mut() {
                if let Some(tail) = resampler.flush()? {
                    path.fifo.push(&tail)?;
                }
            }
            while path_ready(&self.codec, true) {
                self.send_fifo_frame()?;
                packets.extend(self.drain()?);
            }
        }

        let sent = match &mut self.codec {
            Codec::Video(e) => e.send_eof(),
            Codec::Audio(path) => path.encoder.send_eof(),
        };
        match sent {
            Ok(()) | Err(ffmpeg::Error::Eof) => {}
            Err(e) => return Err(Error::encode(&self.name, e)),
        }
        packets.extend(self.drain()?);

        tracing::debug!(
            name = %self.name,
            packets = self.packets_out,
            samples = self.samples_encoded,
            "Flushed encoder"
        );
        Ok(packets)
    }

    fn send_fifo_frame(&mut self) -> Result<()> {
        let Codec::Audio(path) = &mut self.codec else {
            return Ok(());
        };
        let Some(frame) = path.fifo.pop(self.frame_size) else {
            return Ok(());
        };
        self.samples_encoded += frame.samples() as u64;
        path.encoder
            .send_frame(frame.as_frame())
            .map_err(|e| Error::encode(&self.name, e))
    }

    fn drain(&mut self) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();
        loop {
            let mut packet = ffmpeg::Packet::empty();
            let received = match &mut self.codec {
                Codec::Video(e) => e.receive_packet(&mut packet),
                Codec::Audio(path) => path.encoder.receive_packet(&mut packet),
            };
            match received {
                Ok(()) => {}
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(Error::encode(&self.name, e)),
            }

            let mut packet = Packet::from_inner(packet);
            packet.rescale(self.codec_time_base, TimeBase::MICROSECONDS);
            tracing::trace!(
                name = %self.name,
                pts = ?packet.pts(),
                size = packet.size(),
                "Encoded packet"
            );
            self.packets_out += 1;
            packets.push(packet);
        }
        Ok(packets)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    pub fn media_type(&self) -> MediaType {
        match self.codec {
            Codec::Video(_) => MediaType::Video,
            Codec::Audio(_) => MediaType::Audio,
        }
    }

    /// The time base the codec works in.
    pub fn codec_time_base(&self) -> TimeBase {
        self.codec_time_base
    }

    /// The time base of produced packets.
    pub fn time_base(&self) -> TimeBase {
        TimeBase::MICROSECONDS
    }

    /// Samples per audio frame handed to the codec; 0 for video.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Total audio samples handed to the codec so far.
    pub fn samples_encoded(&self) -> u64 {
        self.samples_encoded
    }

    pub fn packets_out(&self) -> u64 {
        self.packets_out
    }

    /// Sample layout the codec consumes.
    pub fn audio_format(&self) -> Option<AudioFormat> {
        match &self.codec {
            Codec::Audio(path) => Some(path.format),
            Codec::Video(_) => None,
        }
    }

    /// Codec parameters of the opened encoder, for a muxer stream.
    pub fn codec_parameters(&self) -> codec::Parameters {
        match &self.codec {
            Codec::Video(e) => helpers::encoder_codec_parameters(e),
            Codec::Audio(path) => helpers::encoder_codec_parameters(&path.encoder),
        }
    }
}

fn path_ready(codec: &Codec, flushing: bool) -> bool {
    match codec {
        Codec::Audio(path) => path.fifo.ready(flushing),
        Codec::Video(_) => false,
    }
}

/// Bring `frame` into the codec's sample layout. Returns `None` while the
/// resampler is still priming.
fn resample(path: &mut AudioPath, frame: Frame) -> Result<Option<Frame>> {
    let Some(incoming) = frame.audio_format() else {
        return Ok(None);
    };
    // Any input change retires the current resampler, including a switch
    // to the codec's own layout. Its buffered tail goes out first.
    let stale = path
        .resampler
        .as_ref()
        .is_some_and(|r| needs_resampling(r.input_format(), &incoming));
    if stale {
        if let Some(mut old) = path.resampler.take() {
            if let Some(tail) = old.flush()? {
                path.fifo.push(&tail)?;
            }
        }
    }
    if !needs_resampling(&incoming, &path.format) {
        return Ok(Some(frame));
    }
    if path.resampler.is_none() {
        path.resampler = Some(Resampler::new(incoming, path.format)?);
    }
    match path.resampler.as_mut() {
        Some(resampler) => resampler.convert(&frame),
        None => Ok(None),
    }
}
