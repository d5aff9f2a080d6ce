//! Ingestion pipeline
//!
//! Three worker pools connected by two unbounded queues:
//!
//! ```text
//! Collectors ──(tick)──▶ items queue ──▶ Parsers ──▶ writes queue ──▶ Writers ──▶ Store
//!  1 per source                          N workers                    M workers
//! ```
//!
//! Every loop observes one shared [`CancellationToken`]. Shutdown cancels it,
//! wakes both queues, waits for every worker behind a join barrier bounded by
//! the grace period, and only then closes the store.
//!
//! Failures never leave a loop: each is logged, counted in [`Metrics`], and the
//! loop moves on to the next tick or item.

mod collection;
mod parsing;
mod persistence;

#[cfg(test)]
mod __tests__;

use std::{
  sync::Arc,
  time::{Duration, Instant},
};

use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::{collection::collection_worker, parsing::parsing_worker, persistence::persistence_worker};
use crate::{
  collector::Collector,
  domain::{config::Config, item::CollectedItem, record::NormalizedRecord},
  metrics::Metrics,
  parser::ParserRegistry,
  queue::WorkQueue,
  store::{Store, StoreError},
};

pub const ITEMS_QUEUE: &str = "items";
pub const WRITES_QUEUE: &str = "writes";

/// Unit of work for the persistence pool.
///
/// A parsed item is queued before its records so the owning item of every
/// record reaches the store.
#[derive(Debug, Clone)]
pub enum WriteJob {
  Item(CollectedItem),
  Record(NormalizedRecord),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
  #[error("Invalid pipeline configuration: {0}")]
  InvalidConfig(String),
  #[error("Failed to close store: {0}")]
  StoreClose(#[from] StoreError),
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub poll_interval: Duration,
  pub parser_workers: usize,
  pub writer_workers: usize,
  pub shutdown_grace: Duration,
  pub queue_metrics_interval: Duration,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self::from_config(&Config::default())
  }
}

impl PipelineConfig {
  pub fn from_config(config: &Config) -> Self {
    Self {
      poll_interval: config.polling.interval(),
      parser_workers: config.parser_workers(),
      writer_workers: config.pipeline.writer_workers,
      shutdown_grace: Duration::from_secs(config.pipeline.shutdown_grace_secs),
      queue_metrics_interval: Duration::from_secs(config.pipeline.queue_metrics_interval_secs),
    }
  }

  fn validate(&self) -> Result<(), PipelineError> {
    if self.poll_interval.is_zero() {
      return Err(PipelineError::InvalidConfig("poll interval must be non-zero".into()));
    }
    if self.parser_workers == 0 || self.writer_workers == 0 {
      return Err(PipelineError::InvalidConfig("worker pools must have at least one worker".into()));
    }
    if self.queue_metrics_interval.is_zero() {
      return Err(PipelineError::InvalidConfig("queue metrics interval must be non-zero".into()));
    }
    Ok(())
  }
}

// ============================================================================
// Worker bookkeeping
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  Collection,
  Parsing,
  Persistence,
  QueueSampler,
}

impl Stage {
  pub fn pool(&self) -> &'static str {
    match self {
      Stage::Collection => "collector",
      Stage::Parsing => "parser",
      Stage::Persistence => "writer",
      Stage::QueueSampler => "sampler",
    }
  }
}

/// What one worker loop did before it exited
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
  /// Ticks, items or write jobs handled successfully
  pub processed: u64,
  pub failed: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageReport {
  pub workers: usize,
  pub processed: u64,
  pub failed: u64,
}

impl StageReport {
  fn add(&mut self, stats: WorkerStats) {
    self.workers += 1;
    self.processed += stats.processed;
    self.failed += stats.failed;
  }
}

/// Outcome of [`PipelineHandle::shutdown`]
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
  /// Every worker returned within the grace period
  pub clean: bool,
  /// Workers aborted after the grace period ran out
  pub aborted: usize,
  pub collection: StageReport,
  pub parsing: StageReport,
  pub persistence: StageReport,
  /// Work still queued when the workers stopped
  pub items_abandoned: usize,
  pub writes_abandoned: usize,
  pub elapsed_ms: u64,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Everything the pipeline needs, constructed once by the caller.
pub struct Pipeline {
  config: PipelineConfig,
  collectors: Vec<Arc<dyn Collector>>,
  registry: Arc<ParserRegistry>,
  store: Arc<dyn Store>,
  metrics: Arc<Metrics>,
}

impl Pipeline {
  pub fn new(
    config: PipelineConfig,
    collectors: Vec<Arc<dyn Collector>>,
    registry: Arc<ParserRegistry>,
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
  ) -> Self {
    Self {
      config,
      collectors,
      registry,
      store,
      metrics,
    }
  }

  /// Spawn every worker. `parent` cancelling also stops the pipeline.
  pub fn start(self, parent: &CancellationToken) -> Result<PipelineHandle, PipelineError> {
    self.config.validate()?;

    let cancel = parent.child_token();
    let items = Arc::new(WorkQueue::<CollectedItem>::new(ITEMS_QUEUE));
    let writes = Arc::new(WorkQueue::<WriteJob>::new(WRITES_QUEUE));
    let mut workers: Vec<(Stage, JoinHandle<WorkerStats>)> = Vec::new();

    info!(
      collectors = self.collectors.len(),
      parser_workers = self.config.parser_workers,
      writer_workers = self.config.writer_workers,
      poll_interval_secs = self.config.poll_interval.as_secs_f64(),
      "Starting pipeline"
    );

    // Downstream first, so nothing sits in a queue with no consumer
    for worker_id in 0..self.config.writer_workers {
      let writes = writes.clone();
      let store = self.store.clone();
      let metrics = self.metrics.clone();
      let cancel = cancel.clone();
      workers.push((
        Stage::Persistence,
        tokio::spawn(async move { persistence_worker(worker_id, writes, store, metrics, cancel).await }),
      ));
    }

    for worker_id in 0..self.config.parser_workers {
      let items = items.clone();
      let writes = writes.clone();
      let registry = self.registry.clone();
      let metrics = self.metrics.clone();
      let cancel = cancel.clone();
      workers.push((
        Stage::Parsing,
        tokio::spawn(async move { parsing_worker(worker_id, items, writes, registry, metrics, cancel).await }),
      ));
    }

    for (worker_id, collector) in self.collectors.iter().enumerate() {
      let collector = collector.clone();
      let items = items.clone();
      let metrics = self.metrics.clone();
      let interval = self.config.poll_interval;
      let cancel = cancel.clone();
      workers.push((
        Stage::Collection,
        tokio::spawn(async move { collection_worker(worker_id, collector, items, metrics, interval, cancel).await }),
      ));
    }

    {
      let items = items.clone();
      let writes = writes.clone();
      let metrics = self.metrics.clone();
      let interval = self.config.queue_metrics_interval;
      let cancel = cancel.clone();
      workers.push((
        Stage::QueueSampler,
        tokio::spawn(async move { queue_sampler(items, writes, metrics, interval, cancel).await }),
      ));
    }

    Ok(PipelineHandle {
      cancel,
      workers,
      items,
      writes,
      store: self.store,
      metrics: self.metrics,
      grace: self.config.shutdown_grace,
    })
  }
}

/// A running pipeline
pub struct PipelineHandle {
  cancel: CancellationToken,
  workers: Vec<(Stage, JoinHandle<WorkerStats>)>,
  items: Arc<WorkQueue<CollectedItem>>,
  writes: Arc<WorkQueue<WriteJob>>,
  store: Arc<dyn Store>,
  metrics: Arc<Metrics>,
  grace: Duration,
}

impl PipelineHandle {
  /// The pipeline's own cancellation token (a child of the start token).
  pub fn cancel_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  pub fn metrics(&self) -> &Arc<Metrics> {
    &self.metrics
  }

  pub fn queue_depths(&self) -> (usize, usize) {
    (self.items.size(), self.writes.size())
  }

  /// Stop every worker, then release the store.
  ///
  /// Workers that haven't returned when the grace period ends are aborted and
  /// reported; the store is closed either way, so no write lands after this
  /// returns.
  pub async fn shutdown(self) -> Result<ShutdownReport, PipelineError> {
    let started = Instant::now();
    info!(grace_secs = self.grace.as_secs_f64(), "Shutting down pipeline");

    self.cancel.cancel();
    self.items.close();
    self.writes.close();

    let (stages, mut workers): (Vec<Stage>, Vec<JoinHandle<WorkerStats>>) = self.workers.into_iter().unzip();

    let mut report = ShutdownReport {
      clean: true,
      aborted: 0,
      collection: StageReport::default(),
      parsing: StageReport::default(),
      persistence: StageReport::default(),
      items_abandoned: 0,
      writes_abandoned: 0,
      elapsed_ms: 0,
    };

    let joined = tokio::time::timeout(self.grace, join_all(workers.iter_mut())).await;
    match joined {
      Ok(results) => {
        for (stage, result) in stages.into_iter().zip(results) {
          match result {
            Ok(stats) => match stage {
              Stage::Collection => report.collection.add(stats),
              Stage::Parsing => report.parsing.add(stats),
              Stage::Persistence => report.persistence.add(stats),
              Stage::QueueSampler => {}
            },
            Err(e) => {
              warn!(pool = stage.pool(), error = %e, "Worker task failed");
              report.clean = false;
            }
          }
        }
      }
      Err(_) => {
        warn!(grace_secs = self.grace.as_secs_f64(), "Workers did not stop within grace period, aborting");
        for worker in &workers {
          if !worker.is_finished() {
            worker.abort();
            report.aborted += 1;
          }
        }
        // An aborted task only stops at its next await; the store must not
        // close under a write that is still running.
        join_all(workers.iter_mut()).await;
        report.clean = false;
      }
    }

    report.items_abandoned = self.items.size();
    report.writes_abandoned = self.writes.size();
    self.metrics.set_queue_depth(ITEMS_QUEUE, report.items_abandoned);
    self.metrics.set_queue_depth(WRITES_QUEUE, report.writes_abandoned);

    self.store.close().await?;
    report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    info!(
      clean = report.clean,
      aborted = report.aborted,
      items_abandoned = report.items_abandoned,
      writes_abandoned = report.writes_abandoned,
      elapsed_ms = report.elapsed_ms,
      "Pipeline stopped"
    );
    Ok(report)
  }
}

/// Refresh the queue depth gauges on a fixed interval.
async fn queue_sampler(
  items: Arc<WorkQueue<CollectedItem>>,
  writes: Arc<WorkQueue<WriteJob>>,
  metrics: Arc<Metrics>,
  interval: Duration,
  cancel: CancellationToken,
) -> WorkerStats {
  let mut ticker = tokio::time::interval(interval);
  let mut stats = WorkerStats::default();

  loop {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => break,
      _ = ticker.tick() => {
        let (item_depth, write_depth) = (items.size(), writes.size());
        metrics.set_queue_depth(items.name(), item_depth);
        metrics.set_queue_depth(writes.name(), write_depth);
        debug!(items = item_depth, writes = write_depth, "Queue depth");
        stats.processed += 1;
      }
    }
  }

  stats
}
