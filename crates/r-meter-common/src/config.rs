//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};
use tracing::debug;

use crate::logging::LogFormat;
use crate::model::AddressPlan;

fn default_counter_count() -> u32 {
    100
}

fn default_counter_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_base_port() -> u16 {
    9001
}

fn default_tick_period() -> Duration {
    Duration::from_secs(5)
}

fn default_initial_amps() -> f64 {
    50.0
}

fn default_initial_energy_kw() -> f64 {
    680.0
}

fn default_simulation_seed() -> u64 {
    0xC0FFEEu64
}

fn default_true() -> bool {
    true
}

fn default_cycle_period() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_event_log_path() -> PathBuf {
    PathBuf::from("target/r-meter/readings.log")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

/// Startup-fatal configuration problems.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("counters.count must be at least 1")]
    NoCounters,
    #[error("counters.base_port {base_port} cannot address {count} counters within the u16 port range")]
    PortRange { base_port: u16, count: u32 },
    #[error("{0} must be greater than zero")]
    ZeroPeriod(&'static str),
    #[error("{field} must be a finite, non-negative number (got {value})")]
    InvalidInitialValue { field: &'static str, value: f64 },
    #[error("poller.poll_timeout ({timeout:?}) must be strictly less than poller.cycle_period ({period:?})")]
    PollTimeoutTooLong { timeout: Duration, period: Duration },
}

/// Primary configuration object for the R-Meter runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub counters: CounterConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "R_METER_CONFIG";

    /// Load configuration together with the effective source path. Falls back to
    /// defaults when none of the candidates exist. Validation is left to the caller
    /// so CLI overrides can be applied first.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_file(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_file(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    /// Parse one explicit file without consulting the environment. Not validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Validate structural invariants. Any error here aborts startup.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.counters.validate()?;
        self.simulation.validate()?;
        self.poller.validate()
    }

    /// Address plan derived from the counter section.
    pub fn address_plan(&self) -> AddressPlan {
        self.counters.address_plan()
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| anyhow!("failed to render config: {err}"))
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterConfig {
    #[serde(default = "default_counter_count")]
    pub count: u32,
    #[serde(default = "default_counter_host")]
    pub host: String,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
}

impl CounterConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.count == 0 {
            return Err(ConfigError::NoCounters);
        }
        let last_port = u64::from(self.base_port) + u64::from(self.count) - 1;
        if last_port > u64::from(u16::MAX) || self.base_port == 0 {
            return Err(ConfigError::PortRange {
                base_port: self.base_port,
                count: self.count,
            });
        }
        Ok(())
    }

    pub fn address_plan(&self) -> AddressPlan {
        AddressPlan::new(self.host.clone(), self.base_port, self.count)
    }
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            count: default_counter_count(),
            host: default_counter_host(),
            base_port: default_base_port(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_period")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub tick_period: Duration,
    /// When false the simulators start paused and hold their initial readings.
    #[serde(default = "default_true")]
    pub ticks_enabled: bool,
    #[serde(default = "default_initial_amps")]
    pub initial_amps: f64,
    #[serde(default = "default_initial_energy_kw")]
    pub initial_energy_kw: f64,
    #[serde(default = "default_simulation_seed")]
    pub random_seed: u64,
    /// Serve one HTTP listener per simulated counter.
    #[serde(default = "default_true")]
    pub serve_endpoints: bool,
}

impl SimulationConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.tick_period.is_zero() {
            return Err(ConfigError::ZeroPeriod("simulation.tick_period"));
        }
        for (field, value) in [
            ("simulation.initial_amps", self.initial_amps),
            ("simulation.initial_energy_kw", self.initial_energy_kw),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidInitialValue { field, value });
            }
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_period: default_tick_period(),
            ticks_enabled: true,
            initial_amps: default_initial_amps(),
            initial_energy_kw: default_initial_energy_kw(),
            random_seed: default_simulation_seed(),
            serve_endpoints: true,
        }
    }
}

/// How the poller reaches counters.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    #[default]
    Http,
    InProcess,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_cycle_period")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub cycle_period: Duration,
    #[serde(default = "default_poll_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub poll_timeout: Duration,
    #[serde(default)]
    pub transport: TransportKind,
}

impl PollerConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.cycle_period.is_zero() {
            return Err(ConfigError::ZeroPeriod("poller.cycle_period"));
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::ZeroPeriod("poller.poll_timeout"));
        }
        if self.poll_timeout >= self.cycle_period {
            return Err(ConfigError::PollTimeoutTooLong {
                timeout: self.poll_timeout,
                period: self.cycle_period,
            });
        }
        Ok(())
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            cycle_period: default_cycle_period(),
            poll_timeout: default_poll_timeout(),
            transport: TransportKind::default(),
        }
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    #[default]
    Memory,
    EventLog,
}

/// Behaviour for readings of counters the store has not seen before.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RegistrationPolicy {
    /// First insert registers the counter.
    #[default]
    Auto,
    /// Inserts for unregistered counters are rejected.
    RequireRegistered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_event_log_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub registration: RegistrationPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_event_log_path(),
            registration: RegistrationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}
