//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the R-Meter daemon."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use r_meter_common::config::{AppConfig, TransportKind};
use r_meter_common::logging::{init_tracing, init_tracing_to, ConsoleStream};
use r_meter_core::runtime::{poll_once, CounterFarm, MeterRuntime};
use r_meter_metrics::{new_registry, DaemonMetrics};
use tokio::signal;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "configs/r-meter.toml";

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("R-Meter ", env!("CARGO_PKG_VERSION")),
    about = "R-Meter counter polling daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "N", help = "Override the number of counters")]
    counters: Option<u32>,

    #[arg(long, value_name = "PORT", help = "Override the port of counter 1")]
    base_port: Option<u16>,

    #[arg(long, value_enum, help = "Override how counters are polled")]
    transport: Option<CliTransport>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliTransport {
    Http,
    InProcess,
}

impl From<CliTransport> for TransportKind {
    fn from(value: CliTransport) -> Self {
        match value {
            CliTransport::Http => TransportKind::Http,
            CliTransport::InProcess => TransportKind::InProcess,
        }
    }
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Commands {
    #[command(about = "Run simulators, endpoints and the poll cycle until ctrl-c")]
    Run,
    #[command(about = "Run only the simulated counters and their HTTP endpoints")]
    Simulate,
    #[command(about = "Execute a single poll cycle and print its summary as JSON")]
    PollOnce,
    #[command(about = "Validate configuration and print the effective settings")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let load_started = Instant::now();
    let (mut config, source) = load_config(cli.config.as_ref())?;
    if let Some(count) = cli.counters {
        config.counters.count = count;
    }
    if let Some(base_port) = cli.base_port {
        config.counters.base_port = base_port;
    }
    if let Some(transport) = cli.transport {
        config.poller.transport = transport.into();
    }
    config.validate().context("invalid configuration")?;
    let load_duration = load_started.elapsed();

    let command = cli.command.unwrap_or(Commands::Run);
    match command {
        Commands::CheckConfig => {
            print!("{}", config.to_toml()?);
            return Ok(());
        }
        Commands::PollOnce => {
            init_tracing_to("r-meterd", &config.logging, ConsoleStream::Stderr)?;
        }
        Commands::Run | Commands::Simulate => init_tracing("r-meterd", &config.logging)?,
    }
    info!(
        config_path = %source
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<defaults>".to_owned()),
        counters = config.counters.count,
        base_port = config.counters.base_port,
        "configuration loaded"
    );

    match command {
        Commands::Run => run_daemon(config, load_duration.as_secs_f64()).await,
        Commands::Simulate => run_simulator(config).await,
        Commands::PollOnce => {
            let summary = poll_once(&config).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::CheckConfig => Ok(()),
    }
}

/// `--config` wins over `R_METER_CONFIG`, which wins over the default path.
fn load_config(explicit: Option<&PathBuf>) -> Result<(AppConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        return Ok((AppConfig::from_file(path)?, Some(path.clone())));
    }
    let loaded = AppConfig::load_with_source(&[PathBuf::from(DEFAULT_CONFIG_PATH)])?;
    Ok((loaded.config, loaded.source))
}

async fn run_daemon(config: AppConfig, config_load_seconds: f64) -> Result<()> {
    let metrics_registry = if config.metrics.enabled {
        let registry = new_registry();
        let daemon_metrics = DaemonMetrics::new(registry.clone())?;
        daemon_metrics.observe_config_load(config_load_seconds);
        daemon_metrics.inc_start();
        daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), build_profile());
        Some(registry)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let runtime = MeterRuntime::start(&config, metrics_registry).await?;
    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    runtime.shutdown().await
}

async fn run_simulator(config: AppConfig) -> Result<()> {
    let farm = CounterFarm::start(&config, true).await?;
    info!(
        counters = config.counters.count,
        first_port = config.counters.base_port,
        "counter farm running; waiting for termination signal"
    );
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    farm.shutdown().await
}

fn build_profile() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    }
}
