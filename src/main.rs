//! aac-pump command line
//!
//! Encodes raw PCM to ADTS, decodes containers to raw PCM, and plays raw
//! PCM into a file or stdout. Each pass runs on one blocking worker and
//! ends with a JSON summary.

use std::fs::File;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aac_pump::config::LoggingConfig;
use aac_pump::config_file::{generate_default_config, ConfigFile};
use aac_pump::{AudioSink, PlaybackEvent, PlaybackPump, PumpConfig, WriterSink};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "aac-pump";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML); defaults apply when it does not exist
    #[arg(short, long, default_value = "aac-pump.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode raw 16-bit PCM into an ADTS AAC stream
    Encode { input: PathBuf, output: PathBuf },

    /// Decode the first audio track of a container into raw PCM
    Decode { input: PathBuf, output: PathBuf },

    /// Play raw PCM into a file, or stdout with "-"
    Play {
        input: PathBuf,
        #[arg(short, long, default_value = "-")]
        output: String,
    },

    /// Write a configuration file with every default spelled out
    InitConfig { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Command::InitConfig { path } = &args.command {
        generate_default_config(path)?;
        println!("wrote default configuration to {}", path.display());
        return Ok(());
    }

    let (config, load_error) = load_config(&args.config);
    init_logging(&config.logging);
    if let Some(e) = load_error {
        tracing::warn!(
            "Failed to load config file {}: {}. Using defaults.",
            args.config.display(),
            e
        );
    }
    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    tracing::debug!("Configuration loaded: {:?}", config);

    match args.command {
        Command::Encode { input, output } => {
            let report = run_encode(input, output, config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Decode { input, output } => {
            let report = run_decode(input, output, config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Play { input, output } => {
            let to_stdout = output == "-";
            let summary = run_play(input, output, config).await?;
            let json = serde_json::to_string_pretty(&summary)?;
            // keep stdout clean for the audio
            if to_stdout {
                eprintln!("{}", json);
            } else {
                println!("{}", json);
            }
            if let Some(PlaybackEvent::Failed(message)) = summary.last() {
                return Err(message.clone().into());
            }
        }
        Command::InitConfig { .. } => {}
    }

    Ok(())
}

/// Missing file means defaults; a broken one is reported once logging is up.
fn load_config(path: &Path) -> (PumpConfig, Option<String>) {
    if !path.exists() {
        return (PumpConfig::default(), None);
    }
    match ConfigFile::from_file(path) {
        Ok(cf) => (cf.into_pump_config(), None),
        Err(e) => (PumpConfig::default(), Some(e.to_string())),
    }
}

#[cfg(feature = "ffmpeg")]
async fn run_encode(
    input: PathBuf,
    output: PathBuf,
    config: PumpConfig,
) -> Result<aac_pump::PumpReport, Box<dyn std::error::Error>> {
    let report = tokio::task::spawn_blocking(move || {
        aac_pump::encode_with_config(&input, &output, &config)
    })
    .await??;
    Ok(report)
}

#[cfg(feature = "ffmpeg")]
async fn run_decode(
    input: PathBuf,
    output: PathBuf,
    config: PumpConfig,
) -> Result<aac_pump::PumpReport, Box<dyn std::error::Error>> {
    let report = tokio::task::spawn_blocking(move || {
        aac_pump::decode_with_config(&input, &output, &config)
    })
    .await??;
    Ok(report)
}

#[cfg(not(feature = "ffmpeg"))]
async fn run_encode(
    _input: PathBuf,
    _output: PathBuf,
    _config: PumpConfig,
) -> Result<aac_pump::PumpReport, Box<dyn std::error::Error>> {
    Err("encode needs the ffmpeg feature".into())
}

#[cfg(not(feature = "ffmpeg"))]
async fn run_decode(
    _input: PathBuf,
    _output: PathBuf,
    _config: PumpConfig,
) -> Result<aac_pump::PumpReport, Box<dyn std::error::Error>> {
    Err("decode needs the ffmpeg feature".into())
}

/// Play `input` to completion and return every notification it produced.
async fn run_play(
    input: PathBuf,
    output: String,
    config: PumpConfig,
) -> Result<Vec<PlaybackEvent>, Box<dyn std::error::Error>> {
    let sink: Box<dyn AudioSink> = if output == "-" {
        Box::new(WriterSink::new(std::io::stdout(), 0))
    } else {
        Box::new(WriterSink::new(File::create(&output)?, 0))
    };

    let mut pump = PlaybackPump::new(config.playback.clone());
    let mut events = pump.subscribe();

    tokio::task::spawn_blocking(move || -> aac_pump::Result<()> {
        pump.create_session(&input, sink)?;
        pump.start()?;
        pump.wait();
        pump.release();
        Ok(())
    })
    .await??;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    Ok(seen)
}

/// Initialize logging with tracing. Logs go to stderr so stdout can carry
/// audio or the JSON summary.
fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("aac_pump={}", logging.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
