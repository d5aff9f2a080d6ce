//! Collection stage - one timer loop per source.

use std::{
  sync::Arc,
  time::{Duration, Instant},
};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{Stage, WorkerStats};
use crate::{
  collector::{CollectError, Collector},
  domain::item::CollectedItem,
  metrics::Metrics,
  queue::WorkQueue,
};

/// Collect from `collector` on every tick and push the results onto `items`.
///
/// The first tick fires immediately. A tick whose collection overruns the
/// interval delays the next one instead of bursting to catch up. A failed
/// collection is logged and counted; the next tick runs as usual.
pub async fn collection_worker(
  worker_id: usize,
  collector: Arc<dyn Collector>,
  items: Arc<WorkQueue<CollectedItem>>,
  metrics: Arc<Metrics>,
  interval: Duration,
  cancel: CancellationToken,
) -> WorkerStats {
  let pool = Stage::Collection.pool();
  let source = collector.name().to_string();
  trace!(worker_id, source = %source, "Collection worker starting");
  metrics.set_worker_up(pool, worker_id, true);

  let mut ticker = tokio::time::interval(interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  let mut stats = WorkerStats::default();

  loop {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => break,
      _ = ticker.tick() => {}
    }

    let started = Instant::now();
    let result = tokio::select! {
      biased;
      _ = cancel.cancelled() => break,
      result = collector.collect(&cancel) => result,
    };
    metrics.observe(pool, "collect", started.elapsed());

    match result {
      Ok(collected) => {
        let count = collected.len();
        for item in collected {
          metrics.item_collected(item.source.as_str(), item.content_type.as_str());
          items.enqueue(item);
        }
        debug!(worker_id, source = %source, count, "Collected items");
        stats.processed += 1;
      }
      Err(CollectError::Cancelled) => break,
      Err(e) => {
        warn!(worker_id, source = %source, error = %e, "Collection failed");
        metrics.failure(pool, e.failure_kind());
        stats.failed += 1;
      }
    }
  }

  metrics.set_worker_up(pool, worker_id, false);
  trace!(worker_id, source = %source, ticks = stats.processed, failed = stats.failed, "Collection worker finished");
  stats
}
