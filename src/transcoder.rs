//! Step-wise driver for a whole demux → decode → filter → encode → mux job.
//!
//! Decoders are named `in{stream_index}`. A frame is routed by name: frames
//! whose stream feeds a filter input enter the graph under that input's
//! name, everything else (and the graph's outputs) goes to every output
//! stream whose `source` equals the frame name.

use crate::decoder::Decoder;
use crate::demuxer::Demuxer;
use crate::encoder::{Encoder, EncoderConfig};
use crate::error::{Error, Result};
use crate::filterer::{FilterInput, FilterOutput, Filterer};
use crate::frame::{Frame, FrameFormat, MediaType};
use crate::io::{ByteSink, ByteSource};
use crate::muxer::Muxer;
use crate::packet::Packet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One transcoding job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Forward FFmpeg's verbose log messages.
    #[serde(default)]
    pub verbose_ffmpeg: bool,
    /// Log progress every this many demuxed packets; 0 disables it.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterConfig>,
    pub output: OutputConfig,
}

fn default_progress_interval() -> u64 {
    500
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Graph in FFmpeg's filter language, labels naming inputs and outputs.
    pub expression: String,
    pub inputs: Vec<FilterInputConfig>,
    pub outputs: Vec<FilterOutputConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterInputConfig {
    pub name: String,
    /// Container stream index feeding this input.
    pub stream: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOutputConfig {
    pub name: String,
    pub media_type: MediaType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Muxer short name, e.g. `"matroska"` or `"mpegts"`.
    pub format: String,
    pub streams: Vec<OutputStreamConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputStreamConfig {
    /// `in{index}` for a decoded input stream, or a filter output name.
    pub source: String,
    pub encoder: EncoderConfig,
}

/// Name of the decoder (and its frames) for a container stream.
pub fn decoder_name(stream_index: usize) -> String {
    format!("in{}", stream_index)
}

fn parse_decoder_name(name: &str) -> Option<usize> {
    name.strip_prefix("in")?.parse().ok()
}

/// Where a job stands after a step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Least advanced participating stream, in seconds.
    pub position_secs: f64,
    pub duration_secs: f64,
    pub packets_read: u64,
    pub packets_written: u64,
    pub finished: bool,
}

impl Progress {
    pub fn percent(&self) -> Option<f64> {
        (self.duration_secs > 0.0)
            .then(|| (self.position_secs / self.duration_secs * 100.0).clamp(0.0, 100.0))
    }
}

impl TranscodeConfig {
    /// Check stream references and names against the input's stream count.
    pub fn validate(&self, nb_streams: usize) -> Result<()> {
        let config_err = |msg: String| Err(Error::Config(msg));

        if self.output.streams.is_empty() {
            return config_err("no output streams configured".into());
        }

        let mut names = HashSet::new();
        let mut filtered_streams = HashSet::new();
        if let Some(filter) = &self.filter {
            for input in &filter.inputs {
                if input.stream >= nb_streams {
                    return config_err(format!(
                        "filter input '{}' references stream {}, input has {}",
                        input.name, input.stream, nb_streams
                    ));
                }
                if !filtered_streams.insert(input.stream) {
                    return config_err(format!(
                        "stream {} feeds more than one filter input",
                        input.stream
                    ));
                }
                if !names.insert(input.name.as_str()) {
                    return config_err(format!("duplicate filter name '{}'", input.name));
                }
            }
            for output in &filter.outputs {
                if !names.insert(output.name.as_str()) {
                    return config_err(format!("duplicate filter name '{}'", output.name));
                }
                if parse_decoder_name(&output.name).is_some() {
                    return config_err(format!(
                        "filter output '{}' shadows a decoder name",
                        output.name
                    ));
                }
            }
        }

        for target in &self.output.streams {
            match parse_decoder_name(&target.source) {
                Some(index) if index >= nb_streams => {
                    return config_err(format!(
                        "output source '{}' references a missing stream",
                        target.source
                    ));
                }
                Some(index) if filtered_streams.contains(&index) => {
                    return config_err(format!(
                        "stream {} is both a filter input and a direct output source",
                        index
                    ));
                }
                Some(_) => {}
                None => {
                    let is_filter_output = self
                        .filter
                        .as_ref()
                        .is_some_and(|f| f.outputs.iter().any(|o| o.name == target.source));
                    if !is_filter_output {
                        return config_err(format!("unknown output source '{}'", target.source));
                    }
                }
            }
        }
        Ok(())
    }

    /// Container streams that need a decoder.
    fn decoded_streams(&self) -> Vec<usize> {
        let mut streams: Vec<usize> = self
            .output
            .streams
            .iter()
            .filter_map(|t| parse_decoder_name(&t.source))
            .chain(self.filter.iter().flat_map(|f| f.inputs.iter().map(|i| i.stream)))
            .collect();
        streams.sort_unstable();
        streams.dedup();
        streams
    }
}

struct Target {
    source: String,
    encoder: Encoder,
    stream_index: usize,
}

struct InputStream {
    index: usize,
    decoder: Decoder,
    /// Filter input this stream's frames are renamed to, if any.
    filter_input: Option<String>,
}

/// Runs a configured job one packet at a time.
pub struct Transcoder {
    demuxer: Demuxer,
    inputs: Vec<InputStream>,
    filterer: Option<Filterer>,
    targets: Vec<Target>,
    muxer: Muxer,
    header_written: bool,
    finished: bool,
    progress_interval: u64,
}

impl Transcoder {
    pub fn new(
        config: &TranscodeConfig,
        source: Box<dyn ByteSource>,
        sink: Box<dyn ByteSink>,
    ) -> Result<Self> {
        let demuxer = Demuxer::open(source)?;
        config.validate(demuxer.nb_streams())?;

        let mut inputs = Vec::new();
        for index in config.decoded_streams() {
            let filter_input = config.filter.as_ref().and_then(|f| {
                f.inputs
                    .iter()
                    .find(|i| i.stream == index)
                    .map(|i| i.name.clone())
            });
            inputs.push(InputStream {
                index,
                decoder: Decoder::from_demuxer(&demuxer, index)?,
                filter_input,
            });
        }

        let filterer = match &config.filter {
            Some(filter) => Some(build_filterer(filter, &inputs)?),
            None => None,
        };

        let mut muxer = Muxer::new(&config.output.format, sink)?;
        let global_header = muxer.needs_global_header();
        let mut targets = Vec::with_capacity(config.output.streams.len());
        for target in &config.output.streams {
            let mut encoder_config = target.encoder.clone();
            encoder_config.global_header |= global_header;
            let encoder = Encoder::new(&encoder_config)?.with_name(target.source.as_str());
            let stream_index = muxer.new_stream(&encoder)?;
            targets.push(Target {
                source: target.source.clone(),
                encoder,
                stream_index,
            });
        }

        tracing::info!(
            decoders = inputs.len(),
            filtered = filterer.is_some(),
            outputs = targets.len(),
            format = %config.output.format,
            "Transcoder ready"
        );

        Ok(Self {
            demuxer,
            inputs,
            filterer,
            targets,
            muxer,
            header_written: false,
            finished: false,
            progress_interval: config.progress_interval,
        })
    }

    /// Process one demuxed packet, or finish the job at end of input.
    pub fn step(&mut self) -> Result<Progress> {
        if self.finished {
            return Ok(self.progress());
        }

        match self.demuxer.read()? {
            Some(packet) => {
                let index = packet.stream_index();
                if let Some(slot) = self.inputs.iter().position(|i| i.index == index) {
                    let frames = self.inputs[slot].decoder.decode(packet)?;
                    self.route_decoded(slot, frames)?;
                }
            }
            None => self.finish()?,
        }
        Ok(self.progress())
    }

    /// Step until the job is done, logging progress along the way.
    pub fn run(mut self) -> Result<Progress> {
        loop {
            let progress = self.step()?;
            if progress.finished {
                tracing::info!(
                    packets_read = progress.packets_read,
                    packets_written = progress.packets_written,
                    duration_secs = progress.duration_secs,
                    "Transcode finished"
                );
                return Ok(progress);
            }
            if self.progress_interval > 0 && progress.packets_read % self.progress_interval == 0 {
                tracing::info!(
                    position_secs = progress.position_secs,
                    percent = progress.percent().unwrap_or(0.0),
                    packets_read = progress.packets_read,
                    packets_written = progress.packets_written,
                    "Transcoding"
                );
            }
        }
    }

    pub fn progress(&self) -> Progress {
        let position_secs = self
            .inputs
            .iter()
            .filter_map(|i| self.demuxer.current_time(i.index).ok())
            .fold(None, |min: Option<f64>, t| Some(min.map_or(t, |m| m.min(t))))
            .unwrap_or(0.0);
        Progress {
            position_secs,
            duration_secs: self.demuxer.format_info().duration_secs,
            packets_read: self.demuxer.packets_read(),
            packets_written: self.muxer.packets_written(),
            finished: self.finished,
        }
    }

    pub fn demuxer(&self) -> &Demuxer {
        &self.demuxer
    }

    fn finish(&mut self) -> Result<()> {
        for slot in 0..self.inputs.len() {
            let frames = self.inputs[slot].decoder.flush()?;
            self.route_decoded(slot, frames)?;
        }
        if let Some(filterer) = self.filterer.as_mut() {
            let frames = filterer.flush()?;
            self.deliver(frames)?;
        }
        for i in 0..self.targets.len() {
            let packets = self.targets[i].encoder.flush()?;
            let stream_index = self.targets[i].stream_index;
            self.mux(packets, stream_index)?;
        }
        if !self.header_written {
            self.muxer.write_header()?;
            self.header_written = true;
        }
        self.muxer.write_trailer()?;
        self.finished = true;
        Ok(())
    }

    fn route_decoded(&mut self, slot: usize, mut frames: Vec<Frame>) -> Result<()> {
        if frames.is_empty() {
            return Ok(());
        }
        let filter_input = self.inputs[slot].filter_input.clone();
        if let (Some(name), Some(filterer)) = (filter_input, self.filterer.as_mut()) {
            for frame in &mut frames {
                frame.set_name(name.as_str());
            }
            let filtered = filterer.filter(frames)?;
            return self.deliver(filtered);
        }
        self.deliver(frames)
    }

    /// Hand frames to every target subscribed to their name.
    fn deliver(&mut self, frames: Vec<Frame>) -> Result<()> {
        for frame in frames {
            let subscribers: Vec<usize> = self
                .targets
                .iter()
                .enumerate()
                .filter(|(_, t)| t.source == frame.name())
                .map(|(i, _)| i)
                .collect();
            let Some((&last, rest)) = subscribers.split_last() else {
                tracing::trace!(name = frame.name(), "No output for frame, dropping");
                continue;
            };
            for &i in rest {
                self.encode_into(i, frame.clone())?;
            }
            self.encode_into(last, frame)?;
        }
        Ok(())
    }

    fn encode_into(&mut self, target: usize, frame: Frame) -> Result<()> {
        let packets = self.targets[target].encoder.encode(frame)?;
        let stream_index = self.targets[target].stream_index;
        self.mux(packets, stream_index)
    }

    fn mux(&mut self, packets: Vec<Packet>, stream_index: usize) -> Result<()> {
        if packets.is_empty() {
            return Ok(());
        }
        if !self.header_written {
            self.muxer.write_header()?;
            self.header_written = true;
        }
        for packet in packets {
            self.muxer.write_frame(packet, stream_index)?;
        }
        Ok(())
    }
}

fn build_filterer(config: &FilterConfig, inputs: &[InputStream]) -> Result<Filterer> {
    let mut filter_inputs = Vec::with_capacity(config.inputs.len());
    for input in &config.inputs {
        let decoder = inputs
            .iter()
            .find(|s| s.index == input.stream)
            .map(|s| &s.decoder)
            .ok_or_else(|| Error::Config(format!("no decoder for stream {}", input.stream)))?;
        let format = match decoder.media_type() {
            MediaType::Video => decoder.video_format().map(FrameFormat::Video),
            MediaType::Audio => decoder.audio_format().map(FrameFormat::Audio),
        }
        .ok_or_else(|| Error::Format(format!("stream {} has no usable format", input.stream)))?;
        filter_inputs.push(FilterInput {
            name: input.name.clone(),
            format,
        });
    }
    let filter_outputs: Vec<FilterOutput> = config
        .outputs
        .iter()
        .map(|o| FilterOutput {
            name: o.name.clone(),
            media_type: o.media_type,
        })
        .collect();
    Filterer::new(&filter_inputs, &filter_outputs, &config.expression)
}

/// Run a job on tokio's blocking pool, so async byte adapters can park on
/// the runtime without stalling its workers.
pub async fn run_async(
    config: TranscodeConfig,
    source: Box<dyn ByteSource>,
    sink: Box<dyn ByteSink>,
) -> Result<Progress> {
    tokio::task::spawn_blocking(move || Transcoder::new(&config, source, sink)?.run())
        .await
        .map_err(|e| Error::State(format!("transcode task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncoderParams;
    use std::collections::BTreeMap;

    fn audio_encoder() -> EncoderConfig {
        EncoderConfig {
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
        }
    }

    fn config(sources: &[&str], filter: Option<FilterConfig>) -> TranscodeConfig {
        TranscodeConfig {
            verbose_ffmpeg: false,
            progress_interval: 0,
            filter,
            output: OutputConfig {
                format: "wav".to_string(),
                streams: sources
                    .iter()
                    .map(|s| OutputStreamConfig {
                        source: s.to_string(),
                        encoder: audio_encoder(),
                    })
                    .collect(),
            },
        }
    }

    fn anull(input_stream: usize) -> FilterConfig {
        FilterConfig {
            expression: "[a] anull [out]".to_string(),
            inputs: vec![FilterInputConfig {
                name: "a".to_string(),
                stream: input_stream,
            }],
            outputs: vec![FilterOutputConfig {
                name: "out".to_string(),
                media_type: MediaType::Audio,
            }],
        }
    }

    #[test]
    fn test_decoder_names() {
        assert_eq!(decoder_name(3), "in3");
        assert_eq!(parse_decoder_name("in3"), Some(3));
        assert_eq!(parse_decoder_name("out"), None);
        assert_eq!(parse_decoder_name("in"), None);
    }

    #[test]
    fn test_validate_accepts_direct_and_filtered() {
        assert!(config(&["in0"], None).validate(1).is_ok());
        assert!(config(&["out", "in1"], Some(anull(0))).validate(2).is_ok());
        assert_eq!(config(&["out", "in1"], Some(anull(0))).decoded_streams(), vec![0, 1]);
    }

    #[test]
    fn test_validate_rejects_bad_references() {
        let missing = config(&["in4"], None).validate(2);
        assert!(matches!(missing, Err(Error::Config(_))));

        let unknown = config(&["nope"], None).validate(2);
        assert!(matches!(unknown, Err(Error::Config(_))));

        let both = config(&["in0"], Some(anull(0))).validate(1);
        assert!(matches!(both, Err(Error::Config(_))));

        let mut dup = anull(0);
        dup.outputs[0].name = "a".to_string();
        let dup = config(&["a"], Some(dup)).validate(1);
        assert!(matches!(dup, Err(Error::Config(_))));

        let empty = config(&[], None).validate(1);
        assert!(matches!(empty, Err(Error::Config(_))));
    }

    #[test]
    fn test_progress_percent() {
        let progress = Progress {
            position_secs: 0.5,
            duration_secs: 2.0,
            packets_read: 10,
            packets_written: 8,
            finished: false,
        };
        assert_eq!(progress.percent(), Some(25.0));
        let unknown = Progress {
            duration_secs: 0.0,
            ..progress
        };
        assert_eq!(unknown.percent(), None);
    }
}
