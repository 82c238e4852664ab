//! Configuration file support
//!
//! A job is described by one TOML file: logging settings plus the
//! transcode graph.

use crate::encoder::{EncoderConfig, EncoderParams};
use crate::error::{Error, Result};
use crate::metadata::Ratio;
use crate::transcoder::{OutputConfig, OutputStreamConfig, TranscodeConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// The job itself
    pub transcode: TranscodeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive, used when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Re-encode stream 0 as MPEG-4 Part 2 video and stream 1 as AAC into
    /// Matroska.
    pub fn default_config() -> Self {
        Self {
            logging: LoggingConfig::default(),
            transcode: TranscodeConfig {
                verbose_ffmpeg: false,
                progress_interval: 500,
                filter: None,
                output: OutputConfig {
                    format: "matroska".to_string(),
                    streams: vec![
                        OutputStreamConfig {
                            source: "in0".to_string(),
                            encoder: EncoderConfig {
                                codec: "mpeg4".to_string(),
                                bit_rate: Some(2_000_000),
                                time_base: None,
                                global_header: false,
                                options: BTreeMap::new(),
                                params: EncoderParams::Video {
                                    width: 1280,
                                    height: 720,
                                    pixel_format: Some("yuv420p".to_string()),
                                    frame_rate: Ratio { num: 25, den: 1 },
                                    sample_aspect_ratio: None,
                                    gop_size: Some(50),
                                    max_b_frames: None,
                                },
                            },
                        },
                        OutputStreamConfig {
                            source: "in1".to_string(),
                            encoder: EncoderConfig {
                                codec: "aac".to_string(),
                                bit_rate: Some(128_000),
                                time_base: None,
                                global_header: false,
                                options: BTreeMap::new(),
                                params: EncoderParams::Audio {
                                    sample_rate: 48_000,
                                    channel_layout: "stereo".to_string(),
                                    sample_format: None,
                                },
                            },
                        },
                    ],
                },
            },
        }
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    Config::default_config().to_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MediaType;
    use crate::transcoder::{FilterConfig, FilterInputConfig, FilterOutputConfig};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default_config();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.transcode.output.format, "matroska");
        assert_eq!(config.transcode.output.streams.len(), 2);
        assert!(config.transcode.validate(2).is_ok());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let mut config = Config::default_config();
        config.logging.format = LogFormat::Json;
        config.transcode.filter = Some(FilterConfig {
            expression: "[v] scale=640:-2 [small]".to_string(),
            inputs: vec![FilterInputConfig {
                name: "v".to_string(),
                stream: 0,
            }],
            outputs: vec![FilterOutputConfig {
                name: "small".to_string(),
                media_type: MediaType::Video,
            }],
        });

        let mut temp_file = NamedTempFile::new().unwrap();
        let content = toml::to_string_pretty(&config).unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let loaded = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_generate_default_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        generate_default_config(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, Config::default_config());
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            [transcode.output]
            format = "wav"

            [[transcode.output.streams]]
            source = "in0"

            [transcode.output.streams.encoder]
            codec = "pcm_s16le"

            [transcode.output.streams.encoder.params]
            kind = "audio"
            sample_rate = 44100
            channel_layout = "mono"
            "#,
        )
        .unwrap();
        assert_eq!(config.logging, LoggingConfig::default());
        assert_eq!(config.transcode.progress_interval, 500);
        assert!(config.transcode.filter.is_none());
        assert!(matches!(
            config.transcode.output.streams[0].encoder.params,
            EncoderParams::Audio { sample_rate: 44_100, .. }
        ));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        assert!(matches!(
            Config::from_toml_str("transcode = 3"),
            Err(Error::Config(_))
        ));
    }
}
