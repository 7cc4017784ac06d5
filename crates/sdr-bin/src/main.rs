//! `sdrctl`: inspect and drive simulated SDR sessions from the shell.
//!
//! ```bash
//! sdrctl parse "uhd,serial=30A1F9B,nchan=2 rtl=0"
//! sdrctl probe uhd
//! sdrctl info --args "rtl=0 hackrf"
//! sdrctl run --config session.toml
//! ```
//!
//! Results go to stdout as JSON, log events to stderr.

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logging::{OutputFormat, TracingConfig};
use sdr_core::{
    ClockSource, DeviceArgs, Direction, FreqRange, GainRange, GainStage, SdrError, SdrResult,
    TimeSource,
};
use sdr_hardware::{
    register_all_backends, BackendRegistry, DeviceClaims, Session, SessionConfig,
    SimulatedInventory,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "sdrctl")]
#[command(about = "SDR device capability registry and multi-board sessions", long_about = None)]
struct Cli {
    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    /// Simulated device inventory (TOML); the built-in bench when absent
    #[arg(long, global = true)]
    inventory: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a device argument string and print one object per board
    Parse {
        /// Argument string, e.g. "rtl=0,bias=1 uhd,nchan=2"
        args: String,
    },

    /// List attached devices, optionally restricted by a hint
    Probe {
        /// Hint such as "uhd" or "nofake"
        #[arg(default_value = "")]
        hint: String,
    },

    /// Open a session and print the capabilities of every channel
    Info {
        /// Device argument string
        #[arg(long, default_value = "")]
        args: String,

        /// Total channel count
        #[arg(long)]
        nchan: Option<usize>,

        /// Open the boards for transmit
        #[arg(long)]
        sink: bool,
    },

    /// Open and start the session described by a config file
    Run {
        /// Session configuration (TOML)
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Parse { args } => {
            init_logging(cli.log_level.as_deref(), cli.log_format)?;
            print_json(&parse_args(args)?)
        }
        Commands::Probe { hint } => {
            init_logging(cli.log_level.as_deref(), cli.log_format)?;
            let registry = build_registry(cli.inventory.as_deref())?;
            print_json(&probe(&registry, hint)?)
        }
        Commands::Info { args, nchan, sink } => {
            init_logging(cli.log_level.as_deref(), cli.log_format)?;
            let registry = build_registry(cli.inventory.as_deref())?;
            let direction = if *sink { Direction::Sink } else { Direction::Source };
            let session = Session::open(args, *nchan, direction, &registry)
                .with_context(|| format!("Failed to open session for '{}'", args))?;
            print_json(&describe(&session)?)
        }
        Commands::Run { config } => run(&cli, config),
    }
}

fn init_logging(level: Option<&str>, format: OutputFormat) -> Result<()> {
    let level = logging::parse_log_level(level.unwrap_or("info"))?;
    logging::init(&TracingConfig::new(level).with_format(format))
}

fn build_registry(inventory: Option<&Path>) -> Result<BackendRegistry> {
    let inventory = match inventory {
        Some(path) => SimulatedInventory::load(path)
            .with_context(|| format!("Failed to load inventory {}", path.display()))?,
        None => SimulatedInventory::default(),
    };
    let mut registry = BackendRegistry::new();
    register_all_backends(&mut registry, Arc::new(inventory), DeviceClaims::new())?;
    Ok(registry)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_args(args: &str) -> Result<Vec<DeviceArgs>> {
    DeviceArgs::parse(args).with_context(|| format!("Invalid device arguments '{}'", args))
}

fn probe(registry: &BackendRegistry, hint: &str) -> Result<Vec<DeviceArgs>> {
    let hint: DeviceArgs = hint.parse()?;
    let found = registry.find_devices(&hint);
    tracing::info!(devices = found.len(), hint = %hint, "probe finished");
    Ok(found)
}

#[derive(Debug, Serialize)]
struct SessionInfo {
    direction: Direction,
    nchan: usize,
    sample_rates: FreqRange,
    boards: Vec<BoardInfo>,
    channels: Vec<ChannelInfo>,
}

#[derive(Debug, Serialize)]
struct BoardInfo {
    args: DeviceArgs,
    clock_sources: Vec<ClockSource>,
    time_sources: Vec<TimeSource>,
}

#[derive(Debug, Serialize)]
struct ChannelInfo {
    channel: usize,
    board: usize,
    local: usize,
    freq_range: FreqRange,
    gain_stages: Vec<GainStage>,
    overall_gain_range: GainRange,
    antennas: Vec<String>,
    bandwidth_range: FreqRange,
    current: sdr_core::ChannelSpec,
}

fn describe(session: &Session) -> Result<SessionInfo> {
    let boards = session
        .board_args()
        .into_iter()
        .enumerate()
        .map(|(board, args)| -> SdrResult<BoardInfo> {
            Ok(BoardInfo {
                args,
                clock_sources: supported(session.get_clock_sources(board))?,
                time_sources: supported(session.get_time_sources(board))?,
            })
        })
        .collect::<SdrResult<Vec<_>>>()?;

    let channels = (0..session.nchan())
        .map(|chan| -> SdrResult<ChannelInfo> {
            let (board, local) = session.route(chan)?;
            Ok(ChannelInfo {
                channel: chan,
                board,
                local,
                freq_range: session.get_freq_range(chan)?,
                gain_stages: session.gain_stages(chan)?,
                overall_gain_range: session.get_overall_gain_range(chan)?,
                antennas: session.get_antennas(chan)?,
                bandwidth_range: session.get_bandwidth_range(chan)?,
                current: session.channel_spec(chan)?,
            })
        })
        .collect::<SdrResult<Vec<_>>>()?;

    Ok(SessionInfo {
        direction: session.direction(),
        nchan: session.nchan(),
        sample_rates: session.get_sample_rates(),
        boards,
        channels,
    })
}

/// Treat an unsupported query as an empty list.
fn supported<T>(result: SdrResult<Vec<T>>) -> SdrResult<Vec<T>> {
    match result {
        Err(SdrError::NotSupported { .. }) => Ok(Vec::new()),
        other => other,
    }
}

fn run(cli: &Cli, path: &Path) -> Result<()> {
    let config = SessionConfig::load_from(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    config.validate().context("Invalid session config")?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(Some(level), cli.log_format)?;

    // The config's inventory applies unless one was given on the command line.
    let inventory = cli.inventory.as_deref().or(config.inventory.as_deref());
    let registry = build_registry(inventory)?;

    let session = config
        .open(&registry)
        .with_context(|| format!("Failed to open session for '{}'", config.args))?;
    let report = session
        .start(&config.start_settings())
        .context("Session start failed")?;
    print_json(&report)?;

    session.release()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_info_command() {
        let cli = Cli::try_parse_from([
            "sdrctl",
            "info",
            "--args",
            "rtl=0 hackrf",
            "--nchan",
            "2",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, OutputFormat::Json);
        match cli.command {
            Commands::Info { args, nchan, sink } => {
                assert_eq!(args, "rtl=0 hackrf");
                assert_eq!(nchan, Some(2));
                assert!(!sink);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn run_requires_config() {
        assert!(Cli::try_parse_from(["sdrctl", "run"]).is_err());
    }

    #[test]
    fn parse_splits_boards() {
        let boards = parse_args("uhd,serial=30A1F9B,nchan=2 rtl=0").unwrap();
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[0].get("nchan"), Some("2"));
        assert!(parse_args("rtl='0").is_err());
    }

    #[test]
    fn probe_honors_hint() {
        let registry = build_registry(None).unwrap();
        let found = probe(&registry, "hackrf").unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].contains_key("hackrf"));
    }

    #[test]
    fn describe_covers_every_channel() {
        let registry = build_registry(None).unwrap();
        let session =
            Session::open("rtl=0 uhd,serial=30A1F9B,nchan=2", None, Direction::Source, &registry)
                .unwrap();
        let info = describe(&session).unwrap();
        assert_eq!(info.channels.len(), 3);
        assert_eq!((info.channels[2].board, info.channels[2].local), (1, 1));
        assert!(info.boards[0].time_sources.is_empty());
        assert!(info.boards[1].clock_sources.contains(&ClockSource::Gpsdo));

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["nchan"], 3);
    }
}
