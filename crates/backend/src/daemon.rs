//! Daemon lifecycle.
//!
//! The daemon is the long-running entry point: it loads configuration, opens
//! the store, wires collectors and parsers into a [`Pipeline`], and runs it
//! until a shutdown signal arrives.
//!
//! # Lifecycle
//!
//! 1. Load and validate config (fatal on error)
//! 2. Open the store (fatal on error)
//! 3. Build the parser registry and one collector per enabled source
//! 4. Start the pipeline under the shutdown token
//! 5. Wait for ctrl-c / SIGTERM (or the caller's token)
//! 6. Shut the pipeline down and log a metrics summary

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
  collector,
  domain::config::{Config, ConfigError},
  metrics::{Metrics, MetricsSnapshot, MetricsTotals},
  parser::ParserRegistry,
  pipeline::{Pipeline, PipelineConfig, PipelineError, ShutdownReport},
  store::{Store, StoreError},
};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("Failed to open store: {0}")]
  Store(#[from] StoreError),
  #[error(transparent)]
  Pipeline(#[from] PipelineError),
}

// ============================================================================
// Configuration
// ============================================================================

/// Everything the daemon needs to start, resolved up front.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  /// Explicit config file, if one was given
  pub config_path: Option<PathBuf>,
  pub config: Config,
}

impl RuntimeConfig {
  /// Resolve, load and validate config. Any failure here is fatal.
  pub fn load(config_path: Option<&Path>) -> Result<Self, DaemonError> {
    let config = Config::load(config_path)?;
    config.validate()?;
    Ok(Self {
      config_path: config_path.map(Path::to_path_buf),
      config,
    })
  }

  pub fn from_config(config: Config) -> Result<Self, DaemonError> {
    config.validate()?;
    Ok(Self {
      config_path: None,
      config,
    })
  }
}

// ============================================================================
// Daemon
// ============================================================================

/// What a finished run did
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
  pub shutdown: ShutdownReport,
  pub totals: MetricsTotals,
  pub metrics: MetricsSnapshot,
}

pub struct Daemon {
  runtime_config: RuntimeConfig,
}

impl Daemon {
  pub fn new(runtime_config: RuntimeConfig) -> Self {
    Self { runtime_config }
  }

  /// Run until ctrl-c or SIGTERM.
  pub async fn run(self) -> Result<RunSummary, DaemonError> {
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    let signals = tokio::spawn(async move {
      tokio::select! {
        _ = signal_token.cancelled() => {}
        _ = wait_for_signal() => {
          info!("Received shutdown signal");
          signal_token.cancel();
        }
      }
    });

    let result = self.run_until(shutdown.clone()).await;
    shutdown.cancel();
    let _ = signals.await;
    result
  }

  /// Run until `shutdown` is cancelled.
  pub async fn run_until(self, shutdown: CancellationToken) -> Result<RunSummary, DaemonError> {
    let config = &self.runtime_config.config;

    info!(
      config = ?self.runtime_config.config_path,
      backend = ?config.store.backend,
      sources = config.enabled_sources().count(),
      "Starting tfindex daemon"
    );

    let store = <dyn Store>::open(&config.store).await?;
    let registry = Arc::new(ParserRegistry::with_defaults());
    let collectors = collector::from_config(config);
    if collectors.is_empty() {
      warn!("No enabled sources configured, nothing will be collected");
    }

    let metrics = Arc::new(Metrics::new());
    let pipeline = Pipeline::new(
      PipelineConfig::from_config(config),
      collectors,
      registry,
      store.clone(),
      metrics.clone(),
    );
    let handle = pipeline.start(&shutdown)?;

    shutdown.cancelled().await;

    let report = handle.shutdown().await?;
    let totals = metrics.totals();
    info!(
      items_collected = totals.items_collected,
      records_parsed = totals.records_parsed,
      records_written = totals.records_written,
      failures = totals.failures,
      clean = report.clean,
      "Daemon shutdown complete"
    );

    Ok(RunSummary {
      shutdown: report,
      totals,
      metrics: metrics.snapshot(),
    })
  }
}

/// Resolve on ctrl-c, or SIGTERM on unix.
async fn wait_for_signal() {
  let ctrl_c = async {
    if let Err(e) = signal::ctrl_c().await {
      warn!(error = %e, "Failed to listen for ctrl-c");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
      Ok(mut sigterm) => {
        sigterm.recv().await;
      }
      Err(e) => {
        warn!(error = %e, "Failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {}
    _ = terminate => {}
  }
}
