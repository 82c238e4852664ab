//! Decoded media exchanged between decoder, filter graph and encoder.

use crate::error::{Error, Result};
use crate::ffmpeg_utils::helpers;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::frame;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of elementary stream a stage handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
}

impl MediaType {
    pub fn from_ffmpeg(medium: ffmpeg::media::Type) -> Option<Self> {
        match medium {
            ffmpeg::media::Type::Video => Some(MediaType::Video),
            ffmpeg::media::Type::Audio => Some(MediaType::Audio),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picture layout of a video frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoFormat {
    pub pixel: ffmpeg::format::Pixel,
    pub width: u32,
    pub height: u32,
    pub sample_aspect_ratio: ffmpeg::Rational,
}

/// Sample layout of an audio frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    pub sample: ffmpeg::format::Sample,
    pub layout: ffmpeg::ChannelLayout,
    pub rate: u32,
}

impl AudioFormat {
    pub fn channels(&self) -> usize {
        self.layout.channels().max(0) as usize
    }

    /// Number of data planes: one per channel when planar, otherwise one.
    pub fn planes(&self) -> usize {
        if self.sample.is_planar() {
            self.channels()
        } else {
            1
        }
    }

    /// Bytes one sample occupies in a single plane (all channels when packed).
    pub fn plane_sample_bytes(&self) -> usize {
        if self.sample.is_planar() {
            self.sample.bytes()
        } else {
            self.sample.bytes() * self.channels()
        }
    }

    /// Whether frames in `other` can be appended to a buffer of this format
    /// without conversion. Sample rates must match for sample counts to stay
    /// meaningful as timestamps.
    pub fn same_layout(&self, other: &AudioFormat) -> bool {
        self.sample == other.sample && self.channels() == other.channels() && self.rate == other.rate
    }
}

/// Format descriptor of either media type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameFormat {
    Video(VideoFormat),
    Audio(AudioFormat),
}

impl FrameFormat {
    pub fn media_type(&self) -> MediaType {
        match self {
            FrameFormat::Video(_) => MediaType::Video,
            FrameFormat::Audio(_) => MediaType::Audio,
        }
    }
}

#[derive(Clone)]
enum Payload {
    Video(frame::Video),
    Audio(frame::Audio),
}

/// An owned, decoded video picture or block of audio samples.
///
/// The name routes the frame through a filter graph and to encoders;
/// stream indices are not used past the decoder.
#[derive(Clone)]
pub struct Frame {
    payload: Payload,
    name: String,
}

impl Frame {
    /// Allocate a blank picture.
    pub fn new_video(format: VideoFormat) -> Self {
        let mut video = frame::Video::new(format.pixel, format.width, format.height);
        helpers::frame_set_sample_aspect_ratio(&mut video, format.sample_aspect_ratio);
        Self::from_video(video)
    }

    /// Allocate `samples` samples of silence-undefined audio.
    pub fn new_audio(format: AudioFormat, samples: usize) -> Self {
        let mut audio = frame::Audio::new(format.sample, samples, format.layout);
        audio.set_rate(format.rate);
        Self::from_audio(audio)
    }

    /// Build an audio frame by copying caller-supplied planes.
    ///
    /// `planes` must hold [`AudioFormat::planes`] slices, each at least
    /// `samples * plane_sample_bytes()` long.
    pub fn audio_from_planes(format: AudioFormat, samples: usize, planes: &[&[u8]]) -> Result<Self> {
        if planes.len() != format.planes() {
            return Err(Error::Format(format!(
                "expected {} planes, got {}",
                format.planes(),
                planes.len()
            )));
        }
        let plane_bytes = samples * format.plane_sample_bytes();
        if let Some(short) = planes.iter().position(|p| p.len() < plane_bytes) {
            return Err(Error::Format(format!(
                "plane {} holds {} bytes, need {}",
                short,
                planes[short].len(),
                plane_bytes
            )));
        }

        let mut out = Self::new_audio(format, samples);
        for (i, src) in planes.iter().enumerate() {
            out.plane_mut(i).copy_from_slice(&src[..plane_bytes]);
        }
        Ok(out)
    }

    pub fn from_video(video: frame::Video) -> Self {
        Self {
            payload: Payload::Video(video),
            name: String::new(),
        }
    }

    pub fn from_audio(audio: frame::Audio) -> Self {
        Self {
            payload: Payload::Audio(audio),
            name: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.set_pts(pts);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn media_type(&self) -> MediaType {
        match self.payload {
            Payload::Video(_) => MediaType::Video,
            Payload::Audio(_) => MediaType::Audio,
        }
    }

    /// Presentation timestamp, in whatever time base the holding stage uses.
    pub fn pts(&self) -> Option<i64> {
        self.as_frame().pts()
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.as_frame_mut().set_pts(pts);
    }

    pub fn is_key(&self) -> bool {
        self.as_frame().is_key()
    }

    /// Samples per channel; 0 for video.
    pub fn samples(&self) -> usize {
        match &self.payload {
            Payload::Audio(a) => a.samples(),
            Payload::Video(_) => 0,
        }
    }

    pub fn video_format(&self) -> Option<VideoFormat> {
        match &self.payload {
            Payload::Video(v) => Some(video_format_of(v)),
            Payload::Audio(_) => None,
        }
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        match &self.payload {
            Payload::Audio(a) => Some(audio_format_of(a)),
            Payload::Video(_) => None,
        }
    }

    pub fn format(&self) -> FrameFormat {
        match &self.payload {
            Payload::Video(v) => FrameFormat::Video(video_format_of(v)),
            Payload::Audio(a) => FrameFormat::Audio(audio_format_of(a)),
        }
    }

    pub fn as_video(&self) -> Option<&frame::Video> {
        match &self.payload {
            Payload::Video(v) => Some(v),
            Payload::Audio(_) => None,
        }
    }

    pub fn as_video_mut(&mut self) -> Option<&mut frame::Video> {
        match &mut self.payload {
            Payload::Video(v) => Some(v),
            Payload::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&frame::Audio> {
        match &self.payload {
            Payload::Audio(a) => Some(a),
            Payload::Video(_) => None,
        }
    }

    pub fn as_audio_mut(&mut self) -> Option<&mut frame::Audio> {
        match &mut self.payload {
            Payload::Audio(a) => Some(a),
            Payload::Video(_) => None,
        }
    }

    /// Raw bytes of plane `index`.
    ///
    /// Audio planes are trimmed to exactly `samples()` samples; video planes
    /// span `stride * rows` including any row padding.
    pub fn plane(&self, index: usize) -> &[u8] {
        match &self.payload {
            Payload::Video(v) => {
                if index >= v.planes() {
                    return &[];
                }
                v.data(index)
            }
            Payload::Audio(a) => {
                let data = helpers::audio_plane_data(a, index);
                let used = audio_plane_len(a);
                &data[..used.min(data.len())]
            }
        }
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut [u8] {
        match &mut self.payload {
            Payload::Video(v) => {
                if index >= v.planes() {
                    return &mut [];
                }
                v.data_mut(index)
            }
            Payload::Audio(a) => {
                let used = audio_plane_len(a);
                let data = helpers::audio_plane_data_mut(a, index);
                let len = used.min(data.len());
                &mut data[..len]
            }
        }
    }

    /// Clear the picture type so the encoder chooses frame types itself.
    pub(crate) fn reset_picture_type(&mut self) {
        if let Payload::Video(v) = &mut self.payload {
            v.set_kind(ffmpeg::picture::Type::None);
        }
    }

    pub(crate) fn as_frame(&self) -> &ffmpeg::Frame {
        match &self.payload {
            Payload::Video(v) => &**v,
            Payload::Audio(a) => &**a,
        }
    }

    pub(crate) fn as_frame_mut(&mut self) -> &mut ffmpeg::Frame {
        match &mut self.payload {
            Payload::Video(v) => &mut **v,
            Payload::Audio(a) => &mut **a,
        }
    }
}

fn video_format_of(v: &frame::Video) -> VideoFormat {
    VideoFormat {
        pixel: v.format(),
        width: v.width(),
        height: v.height(),
        sample_aspect_ratio: v.aspect_ratio(),
    }
}

fn audio_format_of(a: &frame::Audio) -> AudioFormat {
    AudioFormat {
        sample: a.format(),
        layout: a.channel_layout(),
        rate: a.rate(),
    }
}

fn audio_plane_len(a: &frame::Audio) -> usize {
    let per_sample = if a.is_planar() {
        a.format().bytes()
    } else {
        a.format().bytes() * a.channels() as usize
    };
    a.samples() * per_sample
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Frame");
        s.field("name", &self.name).field("pts", &self.pts());
        match &self.payload {
            Payload::Video(v) => s
                .field("format", &v.format())
                .field("width", &v.width())
                .field("height", &v.height()),
            Payload::Audio(a) => s
                .field("format", &a.format())
                .field("channels", &a.channels())
                .field("rate", &a.rate())
                .field("samples", &a.samples()),
        };
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg::format::{sample::Type as SampleType, Pixel, Sample};

    fn stereo_fltp(rate: u32) -> AudioFormat {
        AudioFormat {
            sample: Sample::F32(SampleType::Planar),
            layout: ffmpeg::ChannelLayout::STEREO,
            rate,
        }
    }

    #[test]
    fn test_new_video_frame() {
        let format = VideoFormat {
            pixel: Pixel::YUV420P,
            width: 64,
            height: 48,
            sample_aspect_ratio: ffmpeg::Rational::new(1, 1),
        };
        let frame = Frame::new_video(format).with_name("v").with_pts(Some(40));
        assert_eq!(frame.media_type(), MediaType::Video);
        assert_eq!(frame.video_format(), Some(format));
        assert!(frame.audio_format().is_none());
        assert_eq!(frame.name(), "v");
        assert_eq!(frame.pts(), Some(40));
        assert_eq!(frame.samples(), 0);
        assert!(frame.plane(0).len() >= 64 * 48);
        assert!(frame.plane(3).is_empty());
    }

    #[test]
    fn test_audio_from_planes_copies_samples() {
        let format = stereo_fltp(48_000);
        let left: Vec<u8> = (0..16u8).collect();
        let right: Vec<u8> = (100..116u8).collect();
        let frame = Frame::audio_from_planes(format, 4, &[&left, &right]).unwrap();
        assert_eq!(frame.samples(), 4);
        assert_eq!(frame.plane(0), &left[..]);
        assert_eq!(frame.plane(1), &right[..]);
        assert_eq!(frame.audio_format(), Some(format));

        let clone = frame.clone();
        assert_eq!(clone.plane(1), &right[..]);
    }

    #[test]
    fn test_audio_from_planes_rejects_bad_shapes() {
        let format = stereo_fltp(48_000);
        let plane = vec![0u8; 16];
        assert!(matches!(
            Frame::audio_from_planes(format, 4, &[&plane]),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            Frame::audio_from_planes(format, 8, &[&plane, &plane]),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_packed_audio_has_single_plane() {
        let format = AudioFormat {
            sample: Sample::I16(SampleType::Packed),
            layout: ffmpeg::ChannelLayout::STEREO,
            rate: 44_100,
        };
        assert_eq!(format.planes(), 1);
        assert_eq!(format.plane_sample_bytes(), 4);
        let frame = Frame::new_audio(format, 10);
        assert_eq!(frame.plane(0).len(), 40);
        assert!(frame.plane(1).is_empty());
    }
}
