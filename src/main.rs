//! mediaflow command line
//!
//! Runs one transcode job described by a TOML file:
//!
//! ```text
//! mediaflow <config.toml> <input> <output>
//! mediaflow --generate-config <config.toml>
//! ```

use mediaflow::config::{generate_default_config, Config};
use mediaflow::error::{Error, Result};
use mediaflow::io::{FileSink, FileSource};
use mediaflow::logging::init_logging;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "mediaflow";

fn usage() -> String {
    format!(
        "usage: {0} <config.toml> <input> <output>\n       {0} --generate-config <config.toml>",
        APP_NAME
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some("--generate-config") {
        let path = args.get(1).ok_or_else(|| Error::Config(usage()))?;
        generate_default_config(path)?;
        println!("Wrote default configuration to {}", path);
        return Ok(());
    }

    let [config_path, input, output] = args.as_slice() else {
        eprintln!("{}", usage());
        return Err(Error::Config("expected three arguments".to_string()));
    };

    let config = Config::from_file(config_path)?;
    init_logging(&config.logging);

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    mediaflow::init()?;
    mediaflow::install_log_bridge(config.transcode.verbose_ffmpeg);
    tracing::info!("FFmpeg version: {}", mediaflow::ffmpeg_version_info());

    let source = FileSource::open(input)?;
    let sink = FileSink::create(output)?;
    tracing::info!(input = %input, output = %output, "Starting transcode");

    let progress = mediaflow::run_async(config.transcode, Box::new(source), Box::new(sink)).await?;
    tracing::info!(
        packets_read = progress.packets_read,
        packets_written = progress.packets_written,
        "Done"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_usage_names_binary() {
        assert!(usage().starts_with("usage: mediaflow"));
    }
}
