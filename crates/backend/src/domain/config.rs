//! Configuration system for tfindex.
//!
//! Config priority: `--config <path>` > `TFINDEX_CONFIG` > user (~/.config/tfindex/config.toml) > defaults.
//!
//! An explicitly named file that cannot be read or parsed is an error; a missing
//! default-location file falls back to defaults.

use std::{
  collections::HashSet,
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{dirs, domain::item::SourceKind};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("Invalid config: {0}")]
  Invalid(String),
}

// ============================================================================
// Polling
// ============================================================================

/// Collection timer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
  /// Seconds between collection ticks
  pub interval_secs: u64,
}

impl Default for PollingConfig {
  fn default() -> Self {
    Self { interval_secs: 30 }
  }
}

impl PollingConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs)
  }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Worker pool sizing and shutdown behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
  /// Parsing workers (0 = number of CPUs)
  pub parser_workers: usize,

  /// Persistence workers
  pub writer_workers: usize,

  /// How long shutdown waits for workers to join
  pub shutdown_grace_secs: u64,

  /// How often queue depth gauges are refreshed
  pub queue_metrics_interval_secs: u64,
}

impl Default for PipelineSettings {
  fn default() -> Self {
    Self {
      parser_workers: 2,
      writer_workers: 2,
      shutdown_grace_secs: 30,
      queue_metrics_interval_secs: 10,
    }
  }
}

// ============================================================================
// Store
// ============================================================================

/// Store backend options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
  Memory,
  #[default]
  File,
}

/// Persistent store settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
  pub backend: StoreBackend,

  /// Snapshot path for the file backend (default: <data dir>/store.json)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub path: Option<PathBuf>,
}

impl StoreConfig {
  pub fn resolved_path(&self) -> PathBuf {
    self
      .path
      .clone()
      .unwrap_or_else(|| dirs::default_data_dir().join("store.json"))
  }
}

// ============================================================================
// Logging
// ============================================================================

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Log level: error, warn, info, debug, trace
  pub level: String,

  /// File rotation: daily, hourly, never
  pub rotation: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Sources
// ============================================================================

/// One external source to poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
  pub name: String,
  pub kind: SourceKind,

  #[serde(default = "default_true")]
  pub enabled: bool,

  /// Local directory to walk instead of the built-in fixtures
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<PathBuf>,
}

fn default_true() -> bool {
  true
}

// ============================================================================
// Top-level
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
  #[serde(default)]
  pub polling: PollingConfig,

  #[serde(default)]
  pub pipeline: PipelineSettings,

  #[serde(default)]
  pub store: StoreConfig,

  #[serde(default)]
  pub logging: LoggingConfig,

  #[serde(default)]
  pub sources: Vec<SourceConfig>,
}

impl Config {
  /// Load config from an explicit path. Any read or parse failure is an error.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&content, path)
  }

  fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Resolve and load config.
  ///
  /// An explicit path (flag or `TFINDEX_CONFIG`) must be readable. The user-level
  /// file is optional; if it doesn't exist, defaults are used.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    if let Some(path) = explicit {
      return Self::load_from(path);
    }

    if let Ok(path) = std::env::var("TFINDEX_CONFIG")
      && !path.is_empty()
    {
      return Self::load_from(Path::new(&path));
    }

    let user_path = Self::user_config_path();
    if user_path.exists() {
      return Self::load_from(&user_path);
    }

    Ok(Self::default())
  }

  /// Get the user-level config path
  pub fn user_config_path() -> PathBuf {
    dirs::default_config_dir().join("config.toml")
  }

  /// Enabled sources in declaration order
  pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
    self.sources.iter().filter(|s| s.enabled)
  }

  /// Resolved parser worker count (0 means one per CPU)
  pub fn parser_workers(&self) -> usize {
    if self.pipeline.parser_workers == 0 {
      num_cpus::get()
    } else {
      self.pipeline.parser_workers
    }
  }

  /// Reject settings the pipeline cannot run with.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.polling.interval_secs == 0 {
      return Err(ConfigError::Invalid("polling.interval_secs must be greater than 0".into()));
    }
    if self.pipeline.writer_workers == 0 {
      return Err(ConfigError::Invalid("pipeline.writer_workers must be greater than 0".into()));
    }
    if self.pipeline.queue_metrics_interval_secs == 0 {
      return Err(ConfigError::Invalid(
        "pipeline.queue_metrics_interval_secs must be greater than 0".into(),
      ));
    }

    let mut seen = HashSet::new();
    for source in &self.sources {
      if source.name.trim().is_empty() {
        return Err(ConfigError::Invalid("source name must not be empty".into()));
      }
      if !seen.insert(source.name.as_str()) {
        return Err(ConfigError::Invalid(format!("duplicate source name: {}", source.name)));
      }
    }

    Ok(())
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    r#"# tfindex configuration
# Place in ~/.config/tfindex/config.toml or pass --config <path>

# ============================================================================
# Polling
# ============================================================================

[polling]
# Seconds between collection ticks
interval_secs = 30

# ============================================================================
# Pipeline
# ============================================================================

[pipeline]
# Parsing workers (0 = one per CPU)
parser_workers = 2

# Persistence workers
writer_workers = 2

# Seconds shutdown waits for workers before giving up
shutdown_grace_secs = 30

# Seconds between queue depth gauge refreshes
queue_metrics_interval_secs = 10

# ============================================================================
# Store
# ============================================================================

[store]
# Backend: memory (lost on exit) or file (JSON snapshot)
backend = "file"

# Snapshot location (default: <data dir>/store.json)
# path = "/var/lib/tfindex/store.json"

# ============================================================================
# Logging
# ============================================================================

[logging]
# Level: error, warn, info, debug, trace (RUST_LOG overrides)
level = "info"

# Log file rotation when running with --log-file: daily, hourly, never
rotation = "daily"

# ============================================================================
# Sources
# ============================================================================
# kind: object-storage, cluster-secret, source-control
# Without `path`, a source serves built-in sample content.

[[sources]]
name = "state-bucket"
kind = "object-storage"

[[sources]]
name = "infra-repo"
kind = "source-control"
# path = "/srv/checkouts/infra"
"#
    .to_string()
  }
}
