//! Sample-accurate re-chunking of decoded audio.
//!
//! Decoders and filters hand out audio in whatever block sizes they like;
//! most encoders want a fixed number of samples per frame. The FIFO absorbs
//! the difference. Input timestamps are discarded: each popped frame's pts is
//! derived from the running count of samples already popped, so the output
//! timeline has no gaps or overlaps.

use crate::error::{Error, Result};
use crate::frame::{AudioFormat, Frame};
use crate::timebase::TimeBase;

pub struct AudioFrameFifo {
    format: AudioFormat,
    frame_size: usize,
    sample_time_base: TimeBase,
    time_base: TimeBase,
    /// One byte buffer per plane, each holding `buffered` samples.
    planes: Vec<Vec<u8>>,
    buffered: usize,
    popped: i64,
    name: String,
}

impl AudioFrameFifo {
    /// Create a FIFO producing `format` frames whose pts are in `time_base`.
    pub fn new(format: AudioFormat, frame_size: usize, time_base: TimeBase) -> Result<Self> {
        let sample_time_base = TimeBase::for_sample_rate(format.rate)?;
        if format.channels() == 0 {
            return Err(Error::Format("audio FIFO needs at least one channel".into()));
        }
        Ok(Self {
            format,
            frame_size,
            sample_time_base,
            time_base,
            planes: vec![Vec::new(); format.planes()],
            buffered: 0,
            popped: 0,
            name: String::new(),
        })
    }

    /// Name stamped on every popped frame.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append all samples of `frame`.
    pub fn push(&mut self, frame: &Frame) -> Result<()> {
        let Some(incoming) = frame.audio_format() else {
            return Err(Error::Format(format!(
                "audio FIFO '{}' got a {} frame",
                self.name,
                frame.media_type()
            )));
        };
        if !self.format.same_layout(&incoming) {
            return Err(Error::Format(format!(
                "audio FIFO '{}' expects {} {}Hz x{}, got {} {}Hz x{}",
                self.name,
                self.format.sample.name(),
                self.format.rate,
                self.format.channels(),
                incoming.sample.name(),
                incoming.rate,
                incoming.channels()
            )));
        }

        let samples = frame.samples();
        let bytes = samples * self.format.plane_sample_bytes();
        if let Some(i) = (0..self.planes.len()).find(|&i| frame.plane(i).len() < bytes) {
            return Err(Error::Format(format!(
                "audio FIFO '{}': plane {} is short ({} < {} bytes)",
                self.name,
                i,
                frame.plane(i).len(),
                bytes
            )));
        }
        for (i, plane) in self.planes.iter_mut().enumerate() {
            plane.reserve_exact(bytes);
            plane.extend_from_slice(&frame.plane(i)[..bytes]);
        }
        self.buffered += samples;
        Ok(())
    }

    /// Remove up to `requested` samples as one frame, or `None` when empty.
    pub fn pop(&mut self, requested: usize) -> Option<Frame> {
        let n = self.buffered.min(requested);
        if n == 0 {
            return None;
        }

        let bytes = n * self.format.plane_sample_bytes();
        let pts = self.sample_time_base.rescale(self.popped, self.time_base);
        let mut out = Frame::new_audio(self.format, n)
            .with_name(self.name.clone())
            .with_pts(Some(pts));
        for (i, plane) in self.planes.iter_mut().enumerate() {
            out.plane_mut(i).copy_from_slice(&plane[..bytes]);
            plane.drain(..bytes);
        }

        self.buffered -= n;
        self.popped += n as i64;
        Some(out)
    }

    /// Buffered samples per channel.
    pub fn size(&self) -> usize {
        self.buffered
    }

    pub fn is_empty(&self) -> bool {
        self.buffered == 0
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Whether a full frame is available, or on `flushing` any remainder.
    pub fn ready(&self, flushing: bool) -> bool {
        self.buffered >= self.frame_size || (flushing && self.buffered > 0)
    }

    /// Total samples popped so far.
    pub fn samples_popped(&self) -> i64 {
        self.popped
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next as ffmpeg;
    use ffmpeg_next::format::{sample::Type as SampleType, Sample};

    fn format() -> AudioFormat {
        AudioFormat {
            sample: Sample::F32(SampleType::Planar),
            layout: ffmpeg::ChannelLayout::STEREO,
            rate: 48_000,
        }
    }

    /// A frame whose samples count up from `start` so ordering is checkable.
    fn ramp(start: u32, samples: usize) -> Frame {
        let left: Vec<u8> = (0..samples as u32)
            .flat_map(|i| ((start + i) as f32).to_ne_bytes())
            .collect();
        let right: Vec<u8> = (0..samples as u32)
            .flat_map(|i| (-((start + i) as f32)).to_ne_bytes())
            .collect();
        Frame::audio_from_planes(format(), samples, &[&left, &right]).unwrap()
    }

    fn first_sample(frame: &Frame, plane: usize) -> f32 {
        let bytes = frame.plane(plane);
        f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[test]
    fn test_rechunk_example() {
        let tb = TimeBase::for_sample_rate(48_000).unwrap();
        let mut fifo = AudioFrameFifo::new(format(), 1024, tb).unwrap();

        fifo.push(&ramp(0, 480)).unwrap();
        fifo.push(&ramp(480, 480)).unwrap();
        fifo.push(&ramp(960, 512)).unwrap();
        assert_eq!(fifo.size(), 1472);

        let first = fifo.pop(1024).unwrap();
        assert_eq!(first.samples(), 1024);
        assert_eq!(first.pts(), Some(0));
        assert_eq!(first_sample(&first, 0), 0.0);

        let second = fifo.pop(1024).unwrap();
        assert_eq!(second.samples(), 448);
        assert_eq!(second.pts(), Some(1024));
        assert_eq!(first_sample(&second, 0), 1024.0);
        assert_eq!(first_sample(&second, 1), -1024.0);

        assert!(fifo.pop(1024).is_none());
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_size_tracks_pushed_minus_popped() {
        let mut fifo = AudioFrameFifo::new(format(), 256, TimeBase::MICROSECONDS).unwrap();
        let mut pushed = 0usize;
        let mut popped = 0usize;
        let mut next = 0u32;
        for chunk in [100usize, 300, 7, 513, 1] {
            fifo.push(&ramp(next, chunk)).unwrap();
            next += chunk as u32;
            pushed += chunk;
            while fifo.ready(false) {
                let before = popped as i64;
                let frame = fifo.pop(fifo.frame_size()).unwrap();
                assert_eq!(frame.samples(), 256);
                let expected = TimeBase::for_sample_rate(48_000)
                    .unwrap()
                    .rescale(before, TimeBase::MICROSECONDS);
                assert_eq!(frame.pts(), Some(expected));
                assert_eq!(first_sample(&frame, 0), popped as f32);
                popped += frame.samples();
            }
            assert_eq!(fifo.size(), pushed - popped);
        }
        assert!(fifo.ready(true));
        let tail = fifo.pop(fifo.frame_size()).unwrap();
        assert_eq!(popped + tail.samples(), pushed);
        assert_eq!(fifo.samples_popped(), pushed as i64);
    }

    #[test]
    fn test_rejects_mismatched_format() {
        let mut fifo = AudioFrameFifo::new(format(), 1024, TimeBase::MICROSECONDS).unwrap();
        let mono = AudioFormat {
            sample: Sample::F32(SampleType::Planar),
            layout: ffmpeg::ChannelLayout::MONO,
            rate: 48_000,
        };
        let frame = Frame::new_audio(mono, 10);
        assert!(matches!(fifo.push(&frame), Err(Error::Format(_))));

        let packed = AudioFormat {
            sample: Sample::I16(SampleType::Packed),
            ..format()
        };
        assert!(matches!(
            fifo.push(&Frame::new_audio(packed, 10)),
            Err(Error::Format(_))
        ));

        let other_rate = AudioFormat {
            rate: 44_100,
            ..format()
        };
        assert!(matches!(
            fifo.push(&Frame::new_audio(other_rate, 10)),
            Err(Error::Format(_))
        ));
        assert_eq!(fifo.size(), 0);
    }
}
