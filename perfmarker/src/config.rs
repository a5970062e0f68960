//! Configuration management for the perfmarker monitors
//!
//! Configuration is loaded from a TOML file, overridden by `PERFMARKER_*`
//! environment variables, and validated before any monitor is constructed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Working set monitor configuration
    pub working_set: WorkingSetConfig,

    /// CPU frequency monitor configuration
    pub cpu_frequency: CpuFrequencyConfig,

    /// Marker sink configuration
    pub sink: SinkConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Working set monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingSetConfig {
    /// Run the monitor during a capture
    pub enabled: bool,

    /// Sampling interval in milliseconds
    pub interval_ms: u64,

    /// Initial process filter: `*` or a `;`-separated list of executable names
    pub process_filter: String,

    /// Initial page table capacity in entries
    pub initial_page_capacity: usize,
}

/// CPU frequency monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuFrequencyConfig {
    /// Run the monitor during a capture
    pub enabled: bool,

    /// Delay between sampling rounds in milliseconds
    pub round_interval_ms: u64,

    /// Busy measurement window per CPU in milliseconds
    pub measurement_window_ms: u64,

    /// Upper bound on the number of logical CPUs monitored
    pub max_cpus: usize,

    /// Pin each worker to its logical CPU
    pub pin_threads: bool,
}

/// Marker sink configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Sink implementation
    pub kind: SinkKind,

    /// Output file for the JSON sink; stdout when absent
    pub path: Option<PathBuf>,
}

/// Available marker sinks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Json,
    Tracing,
    Null,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for WorkingSetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
            process_filter: String::new(),
            initial_page_capacity: 100_000,
        }
    }
}

impl Default for CpuFrequencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            round_interval_ms: 1000,
            measurement_window_ms: 5,
            max_cpus: 64,
            pin_threads: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl WorkingSetConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "working_set.interval_ms".to_string(),
                value: "0".to_string(),
            });
        }

        if self.initial_page_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "working_set.initial_page_capacity".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }
}

impl CpuFrequencyConfig {
    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }

    pub fn measurement_window(&self) -> Duration {
        Duration::from_millis(self.measurement_window_ms)
    }

    /// Logical CPUs that will get a worker: the first `max_cpus` this
    /// process may run on
    pub fn cpus(&self) -> Vec<usize> {
        let allowed = crate::affinity::allowed_cpus().unwrap_or_else(|e| {
            debug!(error = %e, "affinity mask unavailable, assuming cpus 0..n");
            (0..num_cpus::get()).collect()
        });
        allowed.into_iter().take(self.max_cpus).collect()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.round_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cpu_frequency.round_interval_ms".to_string(),
                value: "0".to_string(),
            });
        }

        if self.measurement_window_ms == 0 || self.measurement_window_ms >= self.round_interval_ms {
            return Err(ConfigError::InvalidValue {
                field: "cpu_frequency.measurement_window_ms".to_string(),
                value: self.measurement_window_ms.to_string(),
            });
        }

        if self.max_cpus == 0 || self.max_cpus > 1024 {
            return Err(ConfigError::InvalidValue {
                field: "cpu_frequency.max_cpus".to_string(),
                value: self.max_cpus.to_string(),
            });
        }

        Ok(())
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.to_string_lossy().to_string(),
        })?;

        let config: MonitorConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `PERFMARKER_*` environment overrides on top of this configuration
    pub fn apply_env(mut self) -> ConfigResult<Self> {
        if let Ok(processes) = std::env::var("PERFMARKER_PROCESSES") {
            self.working_set.process_filter = processes;
        }

        if let Ok(interval) = std::env::var("PERFMARKER_WS_INTERVAL_MS") {
            self.working_set.interval_ms = interval.parse().map_err(|_| ConfigError::InvalidValue {
                field: "PERFMARKER_WS_INTERVAL_MS".to_string(),
                value: interval,
            })?;
        }

        if let Ok(interval) = std::env::var("PERFMARKER_CPU_INTERVAL_MS") {
            self.cpu_frequency.round_interval_ms =
                interval.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "PERFMARKER_CPU_INTERVAL_MS".to_string(),
                    value: interval,
                })?;
        }

        if let Ok(level) = std::env::var("PERFMARKER_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(path) = std::env::var("PERFMARKER_SINK_PATH") {
            self.sink.path = Some(PathBuf::from(path));
        }

        Ok(self)
    }

    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> ConfigResult<Self> {
        let config = MonitorConfig::default().apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback order: file -> env -> defaults
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        let mut config = MonitorConfig::default();

        if let Some(path) = config_path {
            if path.as_ref().exists() {
                config = MonitorConfig::from_file(path)?;
            }
        }

        let config = config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        self.working_set.validate()?;
        self.cpu_frequency.validate()?;

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                value: self.logging.level.clone(),
            });
        }

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("perfmarker").join("perfmarker.toml"))
            .ok_or_else(|| ConfigError::ValidationFailed {
                reason: "Unable to determine config directory".to_string(),
            })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| ConfigError::ValidationFailed {
                reason: format!("Unable to create config directory: {}", parent.display()),
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationFailed { reason: e.to_string() })?;

        fs::write(path, content).map_err(|_| ConfigError::PermissionDenied {
            path: path.to_string_lossy().to_string(),
        })?;

        Ok(())
    }
}
