//! Audio sample format, layout and rate conversion.
//!
//! The encoder runs every audio frame whose format differs from the codec's
//! through one of these before it reaches the FIFO.

use crate::error::{FfmpegError, Result};
use crate::frame::{AudioFormat, Frame};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::resampling;
use ffmpeg_next::util::channel_layout::ChannelLayout;

/// Wraps FFmpeg's `SwrContext` for one fixed input and output format.
pub struct Resampler {
    context: resampling::Context,
    input: AudioFormat,
    output: AudioFormat,
}

impl Resampler {
    pub fn new(input: AudioFormat, output: AudioFormat) -> Result<Self> {
        let context = resampling::Context::get(
            input.sample,
            usable_layout(input.layout),
            input.rate,
            output.sample,
            usable_layout(output.layout),
            output.rate,
        )
        .map_err(|e| {
            FfmpegError::Resample(format!(
                "cannot convert {} {}Hz x{} to {} {}Hz x{}: {}",
                input.sample.name(),
                input.rate,
                input.channels(),
                output.sample.name(),
                output.rate,
                output.channels(),
                e
            ))
        })?;

        tracing::debug!(
            from_format = input.sample.name(),
            from_rate = input.rate,
            from_channels = input.channels(),
            to_format = output.sample.name(),
            to_rate = output.rate,
            to_channels = output.channels(),
            "Created audio resampler"
        );

        Ok(Self {
            context,
            input,
            output,
        })
    }

    /// Convert one frame. Returns `None` while the converter is still
    /// buffering input.
    pub fn convert(&mut self, frame: &Frame) -> Result<Option<Frame>> {
        let Some(audio) = frame.as_audio() else {
            return Err(FfmpegError::Resample(format!("'{}' is not audio", frame.name())).into());
        };

        let capacity = self.out_samples(audio.samples());
        let mut out = ffmpeg::util::frame::Audio::new(self.output.sample, capacity, self.output.layout);
        out.set_rate(self.output.rate);
        self.context
            .run(audio, &mut out)
            .map_err(|e| FfmpegError::Resample(format!("resampling error: {}", e)))?;

        if out.samples() == 0 {
            return Ok(None);
        }
        Ok(Some(
            Frame::from_audio(out)
                .with_name(frame.name())
                .with_pts(frame.pts()),
        ))
    }

    /// Drain the samples held back for rate conversion.
    pub fn flush(&mut self) -> Result<Option<Frame>> {
        let capacity = self.out_samples(0);
        if capacity == 0 {
            return Ok(None);
        }
        let mut out = ffmpeg::util::frame::Audio::new(self.output.sample, capacity, self.output.layout);
        out.set_rate(self.output.rate);
        if let Err(e) = self.context.flush(&mut out) {
            // Passthrough contexts have nothing buffered and may refuse.
            tracing::debug!("Resampler flush returned non-fatal error: {}", e);
            return Ok(None);
        }
        if out.samples() == 0 {
            return Ok(None);
        }
        Ok(Some(Frame::from_audio(out)))
    }

    /// Upper bound on output samples for `input_samples` more input.
    fn out_samples(&mut self, input_samples: usize) -> usize {
        // SAFETY: the context is initialized and exclusively borrowed.
        let n = unsafe {
            ffmpeg::ffi::swr_get_out_samples(self.context.as_mut_ptr(), input_samples as i32)
        };
        n.max(0) as usize
    }

    pub fn input_format(&self) -> &AudioFormat {
        &self.input
    }

    pub fn output_format(&self) -> &AudioFormat {
        &self.output
    }
}

/// Whether frames in `from` must be converted to reach `to`.
pub fn needs_resampling(from: &AudioFormat, to: &AudioFormat) -> bool {
    from.rate != to.rate || from.sample != to.sample || from.channels() != to.channels()
}

fn usable_layout(layout: ChannelLayout) -> ChannelLayout {
    if layout.channels() > 0 {
        layout
    } else {
        ChannelLayout::STEREO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg::format::{sample::Type as SampleType, Sample};

    fn s16_stereo(rate: u32) -> AudioFormat {
        AudioFormat {
            sample: Sample::I16(SampleType::Packed),
            layout: ChannelLayout::STEREO,
            rate,
        }
    }

    fn fltp_stereo(rate: u32) -> AudioFormat {
        AudioFormat {
            sample: Sample::F32(SampleType::Planar),
            layout: ChannelLayout::STEREO,
            rate,
        }
    }

    #[test]
    fn test_needs_resampling() {
        assert!(!needs_resampling(&fltp_stereo(48_000), &fltp_stereo(48_000)));
        assert!(needs_resampling(&s16_stereo(48_000), &fltp_stereo(48_000)));
        assert!(needs_resampling(&fltp_stereo(44_100), &fltp_stereo(48_000)));
    }

    #[test]
    fn test_format_conversion_keeps_sample_count() {
        crate::ffmpeg_utils::init().unwrap();
        let mut resampler = Resampler::new(s16_stereo(48_000), fltp_stereo(48_000)).unwrap();

        let mut input = Frame::new_audio(s16_stereo(48_000), 480)
            .with_name("a")
            .with_pts(Some(0));
        input.plane_mut(0).fill(0);

        let mut total = resampler
            .convert(&input)
            .unwrap()
            .map(|f| {
                assert_eq!(f.audio_format().unwrap().sample, Sample::F32(SampleType::Planar));
                assert_eq!(f.name(), "a");
                f.samples()
            })
            .unwrap_or(0);
        total += resampler.flush().unwrap().map(|f| f.samples()).unwrap_or(0);
        assert_eq!(total, 480);
    }

    #[test]
    fn test_rate_conversion_preserves_duration() {
        crate::ffmpeg_utils::init().unwrap();
        let mut resampler = Resampler::new(fltp_stereo(44_100), fltp_stereo(48_000)).unwrap();

        let mut total = 0;
        for _ in 0..10 {
            let mut input = Frame::new_audio(fltp_stereo(44_100), 441);
            input.plane_mut(0).fill(0);
            input.plane_mut(1).fill(0);
            total += resampler.convert(&input).unwrap().map(|f| f.samples()).unwrap_or(0);
        }
        total += resampler.flush().unwrap().map(|f| f.samples()).unwrap_or(0);

        // 0.1 s in, 0.1 s out, give or take the filter's edge.
        assert!((total as i64 - 4_800).abs() <= 32, "got {} samples", total);
    }
}
