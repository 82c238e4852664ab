//! Structured descriptions of containers and their streams.
//!
//! `FormatInfo` is what the demuxer reports after probing; `StreamParameters`
//! is the opaque codec configuration handed to decoders and to transmuxed
//! output streams.

use crate::error::{Error, Result};
use crate::ffmpeg_utils::{helpers, utils};
use crate::frame::{AudioFormat, MediaType, VideoFormat};
use crate::timebase::TimeBase;
use ffmpeg_next as ffmpeg;
use serde::{Deserialize, Serialize};

/// A plain numerator/denominator pair that, unlike [`TimeBase`], may be
/// unset (`0/0` or `0/1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratio {
    pub num: i32,
    pub den: i32,
}

impl Ratio {
    pub fn to_f64(&self) -> f64 {
        utils::rational_to_f64((*self).into())
    }

    pub fn is_set(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

impl From<ffmpeg::Rational> for Ratio {
    fn from(r: ffmpeg::Rational) -> Self {
        Ratio {
            num: r.numerator(),
            den: r.denominator(),
        }
    }
}

impl From<Ratio> for ffmpeg::Rational {
    fn from(r: Ratio) -> Self {
        ffmpeg::Rational::new(r.num, r.den)
    }
}

/// Container-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    /// Demuxer short name, e.g. `"matroska,webm"`.
    pub format_name: String,
    pub bit_rate: i64,
    pub duration_secs: f64,
    /// Video and audio streams only.
    pub streams: Vec<StreamInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Index of the stream in the container.
    pub index: usize,
    pub media_type: MediaType,
    pub codec_name: String,
    pub time_base: TimeBase,
    pub bit_rate: i64,
    pub start_time_secs: f64,
    pub duration_secs: f64,
    /// Pixel format (video) or sample format (audio) name.
    pub format_name: String,
    pub details: StreamDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StreamDetails {
    Video {
        width: u32,
        height: u32,
        frame_rate: Ratio,
        sample_aspect_ratio: Ratio,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
        channel_layout: String,
    },
}

impl FormatInfo {
    /// Describe an opened demuxer context.
    pub fn from_input(input: &ffmpeg::format::context::Input) -> Result<Self> {
        let mut streams = Vec::new();
        for stream in input.streams() {
            if let Some(info) = StreamInfo::from_stream(&stream)? {
                streams.push(info);
            }
        }

        Ok(Self {
            format_name: input.format().name().to_string(),
            bit_rate: input.bit_rate(),
            duration_secs: utils::av_time_to_seconds(input.duration()),
            streams,
        })
    }

    /// Look up a stream by its container index.
    pub fn stream(&self, index: usize) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.index == index)
    }

    /// First stream of the given type.
    pub fn best_stream(&self, media_type: MediaType) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.media_type == media_type)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Format(e.to_string()))
    }
}

impl StreamInfo {
    /// Analyze a container stream. Returns `None` for streams that are neither
    /// video nor audio.
    pub fn from_stream(stream: &ffmpeg::Stream) -> Result<Option<Self>> {
        let params = stream.parameters();
        let Some(media_type) = MediaType::from_ffmpeg(params.medium()) else {
            return Ok(None);
        };

        let time_base = TimeBase::try_from(stream.time_base()).map_err(|_| {
            Error::Format(format!(
                "stream {} has invalid time base {}",
                stream.index(),
                stream.time_base()
            ))
        })?;

        let details = match media_type {
            MediaType::Video => StreamDetails::Video {
                width: helpers::codec_params_width(&params),
                height: helpers::codec_params_height(&params),
                frame_rate: stream.avg_frame_rate().into(),
                sample_aspect_ratio: helpers::codec_params_sample_aspect_ratio(&params).into(),
            },
            MediaType::Audio => StreamDetails::Audio {
                sample_rate: helpers::codec_params_sample_rate(&params),
                channels: helpers::codec_params_channels(&params),
                channel_layout: helpers::channel_layout_name(
                    &helpers::codec_params_channel_layout(&params),
                ),
            },
        };

        Ok(Some(Self {
            index: stream.index(),
            media_type,
            codec_name: params.id().name().to_string(),
            time_base,
            bit_rate: helpers::codec_params_bit_rate(&params),
            start_time_secs: utils::stream_time_to_seconds(stream.start_time(), stream.time_base()),
            duration_secs: utils::stream_time_to_seconds(stream.duration(), stream.time_base()),
            format_name: helpers::codec_params_format_name(&params),
            details,
        }))
    }

    /// Video layout, if this is a video stream with a known pixel format.
    pub fn video_format(&self) -> Option<VideoFormat> {
        match &self.details {
            StreamDetails::Video {
                width,
                height,
                sample_aspect_ratio,
                ..
            } => Some(VideoFormat {
                pixel: helpers::pixel_format_from_name(&self.format_name)?,
                width: *width,
                height: *height,
                sample_aspect_ratio: (*sample_aspect_ratio).into(),
            }),
            StreamDetails::Audio { .. } => None,
        }
    }

    /// Audio layout, if this is an audio stream with a known sample format.
    pub fn audio_format(&self) -> Option<AudioFormat> {
        match &self.details {
            StreamDetails::Audio {
                sample_rate,
                channels,
                channel_layout,
            } => Some(AudioFormat {
                sample: helpers::sample_format_from_name(&self.format_name)?,
                layout: helpers::channel_layout_from_name(channel_layout)
                    .unwrap_or_else(|| ffmpeg::ChannelLayout::default(*channels as i32)),
                rate: *sample_rate,
            }),
            StreamDetails::Video { .. } => None,
        }
    }
}

/// Codec parameters of one stream together with the time base its packets
/// are stamped in.
#[derive(Clone)]
pub struct StreamParameters {
    params: ffmpeg::codec::Parameters,
    time_base: TimeBase,
    media_type: MediaType,
}

impl StreamParameters {
    /// Copy the parameters of a container stream, extradata included.
    pub fn from_stream(stream: &ffmpeg::Stream) -> Result<Self> {
        let media_type = MediaType::from_ffmpeg(stream.parameters().medium()).ok_or_else(|| {
            Error::Format(format!(
                "stream {} is neither video nor audio",
                stream.index()
            ))
        })?;
        let time_base = TimeBase::try_from(stream.time_base())?;
        Ok(Self {
            // Cloning detaches the parameters from the demuxer's lifetime.
            params: stream.parameters().clone(),
            time_base,
            media_type,
        })
    }

    /// Rebuild parameters from a serialized description. Codec private data
    /// (extradata) is not part of `StreamInfo`, so only codecs that carry
    /// their configuration in-band can be decoded this way.
    pub fn from_info(info: &StreamInfo) -> Result<Self> {
        let codec_id = helpers::codec_id_from_name(&info.codec_name)
            .ok_or_else(|| Error::Format(format!("unknown codec '{}'", info.codec_name)))?;

        let mut params = ffmpeg::codec::Parameters::new();
        match info.media_type {
            MediaType::Video => {
                let format = info.video_format().ok_or_else(|| {
                    Error::Format(format!("unknown pixel format '{}'", info.format_name))
                })?;
                helpers::codec_params_set_video(
                    &mut params,
                    codec_id,
                    format.width,
                    format.height,
                    format.pixel,
                    format.sample_aspect_ratio,
                );
            }
            MediaType::Audio => {
                let format = info.audio_format().ok_or_else(|| {
                    Error::Format(format!("unknown sample format '{}'", info.format_name))
                })?;
                helpers::codec_params_set_audio(
                    &mut params,
                    codec_id,
                    format.rate,
                    format.layout,
                    format.sample,
                );
            }
        }

        Ok(Self {
            params,
            time_base: info.time_base,
            media_type: info.media_type,
        })
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn codec_id(&self) -> ffmpeg::codec::Id {
        self.params.id()
    }

    pub fn codec_name(&self) -> &'static str {
        self.params.id().name()
    }

    pub(crate) fn parameters(&self) -> &ffmpeg::codec::Parameters {
        &self.params
    }
}

impl std::fmt::Debug for StreamParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamParameters")
            .field("codec", &self.codec_name())
            .field("media_type", &self.media_type)
            .field("time_base", &self.time_base)
            .finish()
    }
}
