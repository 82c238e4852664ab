//! Routes named frames through an FFmpeg filter graph.
//!
//! Each named input becomes a `buffer`/`abuffer` source and each named
//! output a `buffersink`/`abuffersink`. The topology between them is an
//! expression in FFmpeg's filter language whose `[labels]` are those names,
//! e.g. `"[v0] scale=640:-2 [out]"`.

use crate::error::{Error, FfmpegError, Result};
use crate::ffmpeg_utils::helpers;
use crate::frame::{AudioFormat, Frame, FrameFormat, MediaType, VideoFormat};
use crate::timebase::TimeBase;
use ffmpeg_next as ffmpeg;

/// A named graph input and the format of frames pushed into it.
#[derive(Debug, Clone)]
pub struct FilterInput {
    pub name: String,
    pub format: FrameFormat,
}

/// A named graph output.
#[derive(Debug, Clone)]
pub struct FilterOutput {
    pub name: String,
    pub media_type: MediaType,
}

struct SinkEntry {
    label: String,
    context: String,
    media_type: MediaType,
    time_base: TimeBase,
}

struct SourceEntry {
    label: String,
    context: String,
}

pub struct Filterer {
    graph: ffmpeg::filter::Graph,
    sources: Vec<SourceEntry>,
    sinks: Vec<SinkEntry>,
    flushed: bool,
}

fn buffer_args(format: &FrameFormat) -> String {
    let tb = TimeBase::MICROSECONDS;
    match format {
        FrameFormat::Video(VideoFormat {
            pixel,
            width,
            height,
            sample_aspect_ratio,
        }) => {
            let (num, den) = if sample_aspect_ratio.denominator() > 0 {
                (sample_aspect_ratio.numerator(), sample_aspect_ratio.denominator())
            } else {
                (0, 1)
            };
            format!(
                "video_size={}x{}:pix_fmt={}:time_base={}:pixel_aspect={}/{}",
                width,
                height,
                helpers::pixel_format_name(*pixel),
                tb,
                num,
                den
            )
        }
        FrameFormat::Audio(AudioFormat {
            sample,
            layout,
            rate,
        }) => format!(
            "time_base={}:sample_rate={}:sample_fmt={}:channel_layout={}",
            tb,
            rate,
            sample.name(),
            helpers::channel_layout_name(layout)
        ),
    }
}

impl Filterer {
    /// Build and configure a graph from `expression`.
    pub fn new(inputs: &[FilterInput], outputs: &[FilterOutput], expression: &str) -> Result<Self> {
        let mut graph = ffmpeg::filter::Graph::new();
        let graph_err = |what: &str, e: ffmpeg::Error| Error::Format(format!("{}: {}", what, e));

        let mut sources = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            check_label(&input.name)?;
            let filter_name = match input.format.media_type() {
                MediaType::Video => "buffer",
                MediaType::Audio => "abuffer",
            };
            let filter = ffmpeg::filter::find(filter_name)
                .ok_or_else(|| Error::Format(format!("filter '{}' not available", filter_name)))?;
            let context = format!("src{}_{}", i, input.name);
            let args = buffer_args(&input.format);
            graph
                .add(&filter, &context, &args)
                .map_err(|e| graph_err(&format!("source '{}' ({})", input.name, args), e))?;
            sources.push(SourceEntry {
                label: input.name.clone(),
                context,
            });
        }

        let mut sink_contexts = Vec::with_capacity(outputs.len());
        for (i, output) in outputs.iter().enumerate() {
            check_label(&output.name)?;
            let filter_name = match output.media_type {
                MediaType::Video => "buffersink",
                MediaType::Audio => "abuffersink",
            };
            let filter = ffmpeg::filter::find(filter_name)
                .ok_or_else(|| Error::Format(format!("filter '{}' not available", filter_name)))?;
            let context = format!("sink{}_{}", i, output.name);
            graph
                .add(&filter, &context, "")
                .map_err(|e| graph_err(&format!("sink '{}'", output.name), e))?;
            sink_contexts.push(context);
        }

        let source_pairs: Vec<(&str, &str)> = sources
            .iter()
            .map(|s| (s.label.as_str(), s.context.as_str()))
            .collect();
        let sink_pairs: Vec<(&str, &str)> = outputs
            .iter()
            .zip(&sink_contexts)
            .map(|(o, c)| (o.name.as_str(), c.as_str()))
            .collect();
        helpers::parse_filter_graph(&mut graph, expression, &source_pairs, &sink_pairs)
            .map_err(|e| graph_err(&format!("failed to parse filter graph '{}'", expression), e))?;
        graph
            .validate()
            .map_err(|e| graph_err("failed to configure filter graph", e))?;

        let mut sinks = Vec::with_capacity(outputs.len());
        for (output, context) in outputs.iter().zip(sink_contexts) {
            let mut ctx = graph
                .get(&context)
                .ok_or_else(|| Error::Format(format!("sink '{}' vanished", output.name)))?;
            let time_base = TimeBase::try_from(ctx.sink().time_base())?;
            sinks.push(SinkEntry {
                label: output.name.clone(),
                context,
                media_type: output.media_type,
                time_base,
            });
        }

        tracing::debug!(
            expression,
            inputs = sources.len(),
            outputs = sinks.len(),
            "Configured filter graph"
        );

        Ok(Self {
            graph,
            sources,
            sinks,
            flushed: false,
        })
    }

    /// Push `frames` into their sources and collect whatever the sinks
    /// produce. Frames whose name matches no input are dropped.
    pub fn filter(&mut self, frames: Vec<Frame>) -> Result<Vec<Frame>> {
        if self.flushed {
            return Err(Error::State("filter graph used after flush".into()));
        }

        let mut out = Vec::new();
        for frame in frames {
            let Some(source) = self.sources.iter().find(|s| s.label == frame.name()) else {
                tracing::warn!(name = frame.name(), "No filter input with this name, skipping frame");
                continue;
            };
            let mut ctx = self
                .graph
                .get(&source.context)
                .ok_or_else(|| FfmpegError::Filter(format!("source '{}' vanished", source.label)))?;
            ctx.source().add(frame.as_frame()).map_err(|e| {
                FfmpegError::Filter(format!("push into '{}' failed: {}", source.label, e))
            })?;
            self.drain(&mut out)?;
        }
        Ok(out)
    }

    /// Signal end of stream on every input and collect the remaining output.
    ///
    /// Repeated calls return nothing.
    pub fn flush(&mut self) -> Result<Vec<Frame>> {
        let mut out = Vec::new();
        if self.flushed {
            return Ok(out);
        }
        self.flushed = true;

        for source in &self.sources {
            let mut ctx = self
                .graph
                .get(&source.context)
                .ok_or_else(|| FfmpegError::Filter(format!("source '{}' vanished", source.label)))?;
            ctx.source().flush().map_err(|e| {
                FfmpegError::Filter(format!("flush of '{}' failed: {}", source.label, e))
            })?;
        }
        self.drain(&mut out)?;
        tracing::debug!(drained = out.len(), "Flushed filter graph");
        Ok(out)
    }

    fn drain(&mut self, out: &mut Vec<Frame>) -> Result<()> {
        for sink in &self.sinks {
            let mut ctx = self
                .graph
                .get(&sink.context)
                .ok_or_else(|| FfmpegError::Filter(format!("sink '{}' vanished", sink.label)))?;
            loop {
                let pulled = match sink.media_type {
                    MediaType::Video => {
                        let mut f = ffmpeg::util::frame::Video::empty();
                        ctx.sink().frame(&mut f).map(|()| Frame::from_video(f))
                    }
                    MediaType::Audio => {
                        let mut f = ffmpeg::util::frame::Audio::empty();
                        ctx.sink().frame(&mut f).map(|()| Frame::from_audio(f))
                    }
                };
                let mut frame = match pulled {
                    Ok(frame) => frame,
                    Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                    Err(ffmpeg::Error::Eof) => break,
                    Err(e) => {
                        return Err(FfmpegError::Filter(format!(
                            "pull from '{}' failed: {}",
                            sink.label, e
                        ))
                        .into())
                    }
                };
                frame.set_name(sink.label.as_str());
                frame.set_pts(sink.time_base.rescale_opt(frame.pts(), TimeBase::MICROSECONDS));
                frame.reset_picture_type();
                out.push(frame);
            }
        }
        Ok(())
    }

    /// Human-readable description of the configured graph.
    pub fn dump(&self) -> String {
        self.graph.dump()
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.label.as_str())
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.sinks.iter().map(|s| s.label.as_str())
    }
}

fn check_label(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(Error::Format(format!("invalid filter label '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg::format::{sample::Type as SampleType, Pixel, Sample};

    fn audio_format() -> AudioFormat {
        AudioFormat {
            sample: Sample::F32(SampleType::Planar),
            layout: ffmpeg::ChannelLayout::STEREO,
            rate: 48_000,
        }
    }

    fn anull_graph() -> Filterer {
        crate::ffmpeg_utils::init().unwrap();
        Filterer::new(
            &[FilterInput {
                name: "a".into(),
                format: FrameFormat::Audio(audio_format()),
            }],
            &[FilterOutput {
                name: "out".into(),
                media_type: MediaType::Audio,
            }],
            "[a] anull [out]",
        )
        .unwrap()
    }

    #[test]
    fn test_buffer_args() {
        let video = FrameFormat::Video(VideoFormat {
            pixel: Pixel::YUV420P,
            width: 320,
            height: 240,
            sample_aspect_ratio: ffmpeg::Rational::new(1, 1),
        });
        assert_eq!(
            buffer_args(&video),
            "video_size=320x240:pix_fmt=yuv420p:time_base=1/1000000:pixel_aspect=1/1"
        );
        assert_eq!(
            buffer_args(&FrameFormat::Audio(audio_format())),
            "time_base=1/1000000:sample_rate=48000:sample_fmt=fltp:channel_layout=stereo"
        );
    }

    #[test]
    fn test_unmatched_name_is_skipped() {
        let mut graph = anull_graph();
        assert_eq!(graph.input_names().collect::<Vec<_>>(), ["a"]);
        assert_eq!(graph.output_names().collect::<Vec<_>>(), ["out"]);
        assert!(graph.dump().contains("anull"));
        let frame = Frame::new_audio(audio_format(), 256)
            .with_name("x")
            .with_pts(Some(0));
        assert!(graph.filter(vec![frame]).unwrap().is_empty());
        assert!(graph.flush().unwrap().is_empty());
    }

    #[test]
    fn test_anull_renames_and_keeps_timing() {
        let mut graph = anull_graph();
        let mut out = Vec::new();
        for i in 0..4i64 {
            let frame = Frame::new_audio(audio_format(), 480)
                .with_name("a")
                .with_pts(Some(i * 10_000));
            out.extend(graph.filter(vec![frame]).unwrap());
        }
        out.extend(graph.flush().unwrap());

        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|f| f.name() == "out"));
        assert_eq!(out.iter().map(|f| f.samples()).sum::<usize>(), 4 * 480);
        assert_eq!(out[0].pts(), Some(0));
        assert_eq!(out[3].pts(), Some(30_000));
    }

    #[test]
    fn test_flush_then_filter_is_state_error() {
        let mut graph = anull_graph();
        graph.flush().unwrap();
        assert!(graph.flush().unwrap().is_empty());
        let frame = Frame::new_audio(audio_format(), 16).with_name("a");
        assert!(matches!(graph.filter(vec![frame]), Err(Error::State(_))));
    }

    #[test]
    fn test_bad_expression_is_format_error() {
        crate::ffmpeg_utils::init().unwrap();
        let result = Filterer::new(
            &[FilterInput {
                name: "a".into(),
                format: FrameFormat::Audio(audio_format()),
            }],
            &[FilterOutput {
                name: "out".into(),
                media_type: MediaType::Audio,
            }],
            "[a] no_such_filter [out]",
        );
        assert!(matches!(result, Err(Error::Format(_))));
    }
}
