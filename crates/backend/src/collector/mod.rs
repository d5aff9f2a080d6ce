//! Source collectors
//!
//! A collector pulls raw config and state content from one external source.
//! The pipeline runs one collection worker per enabled collector and calls
//! [`Collector::collect`] once per poll tick.
//!
//! ```text
//! [[sources]] entry
//!   ├── path set   → DirectoryCollector (walks a local checkout / mirror)
//!   └── path unset → FixtureCollector   (built-in sample content)
//! ```

mod directory;
mod fixture;

use std::{path::PathBuf, sync::Arc};

pub use directory::DirectoryCollector;
pub use fixture::FixtureCollector;
use tokio_util::sync::CancellationToken;

use crate::domain::{
  config::{Config, SourceConfig},
  item::{CollectedItem, SourceKind},
};

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
  #[error("Source root does not exist: {0}")]
  MissingRoot(PathBuf),
  #[error("Directory walk failed: {0}")]
  Walk(String),
  #[error("Collection task failed: {0}")]
  Task(String),
  #[error("Collection cancelled")]
  Cancelled,
}

impl CollectError {
  /// Label for the failure counter
  pub fn failure_kind(&self) -> &'static str {
    match self {
      Self::MissingRoot(_) => "missing_root",
      Self::Walk(_) => "walk_failed",
      Self::Task(_) => "task_failed",
      Self::Cancelled => "cancelled",
    }
  }
}

#[async_trait::async_trait]
pub trait Collector: Send + Sync {
  /// Configured source name, unique per process.
  fn name(&self) -> &str;

  fn source_kind(&self) -> SourceKind;

  /// Fetch the current content of the source.
  ///
  /// Implementations should return [`CollectError::Cancelled`] promptly once
  /// `cancel` fires.
  async fn collect(&self, cancel: &CancellationToken) -> Result<Vec<CollectedItem>, CollectError>;
}

impl dyn Collector {
  /// Build the collector for one `[[sources]]` entry.
  pub fn from_source(source: &SourceConfig) -> Arc<dyn Collector> {
    match &source.path {
      Some(root) => Arc::new(DirectoryCollector::new(&source.name, source.kind, root)),
      None => Arc::new(FixtureCollector::new(&source.name, source.kind)),
    }
  }
}

/// Collectors for every enabled source, in declaration order.
pub fn from_config(config: &Config) -> Vec<Arc<dyn Collector>> {
  config.enabled_sources().map(<dyn Collector>::from_source).collect()
}
