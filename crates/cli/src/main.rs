//! Ringline demo driver
//!
//! Replays a call scenario against the in-memory platform and prints every
//! platform interaction it caused, one JSON object per line.

mod scenario;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ringline_service_core::config::{ConfigFile, Preset, ServiceSettings};
use ringline_service_core::logging::{parse_log_level, setup_logging, LoggingConfig};
use tracing::info;

use crate::scenario::Scenario;

/// Replay call scenarios against the simulated call-service platform
#[derive(Parser, Debug)]
#[command(name = "ringline", version, about)]
struct Cli {
    /// Scenario to replay
    #[arg(value_enum, default_value_t = Scenario::Incoming)]
    scenario: Scenario,

    /// TOML file with `[settings]` and `[types.*]` tables
    #[arg(short, long, env = "RINGLINE_CONFIG", conflicts_with = "preset")]
    config: Option<PathBuf>,

    /// Built-in call type registry (default, livestream, livestream_audio, livestream_guest, audio_call)
    #[arg(short, long, default_value = "default")]
    preset: Preset,

    /// Call type the scenario's calls use
    #[arg(long, default_value = "default")]
    call_type: String,

    /// Register calls with the simulated telephony subsystem
    #[arg(long)]
    telecom: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", env = "RINGLINE_LOG")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Pretty-print the event log instead of one event per line
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = parse_log_level(&cli.log_level)?;
    let mut logging = LoggingConfig::new(level, "ringline");
    if cli.json_logs {
        logging = logging.with_json();
    }
    setup_logging(logging)?;

    let (registry, settings) = match &cli.config {
        Some(path) => ConfigFile::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?
            .into_parts(),
        None => (cli.preset.registry(), ServiceSettings::default()),
    };
    if cli.telecom {
        registry.update(cli.call_type.clone(), |b| b.with_telecom(true));
    }

    info!("Replaying scenario (scenario: {:?}, call_type: {})", cli.scenario, cli.call_type);
    let events = scenario::run(cli.scenario, &cli.call_type, registry, settings).await?;

    if cli.pretty {
        println!("{}", serde_json::to_string_pretty(&events)?);
    } else {
        for event in &events {
            println!("{}", serde_json::to_string(event)?);
        }
    }
    Ok(())
}
