//! Persistence stage - writes queued items and records to the store.

use std::{sync::Arc, time::Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use super::{Stage, WorkerStats, WriteJob};
use crate::{metrics::Metrics, queue::WorkQueue, store::Store};

/// Write jobs until cancelled. Each job is attempted once.
pub async fn persistence_worker(
  worker_id: usize,
  writes: Arc<WorkQueue<WriteJob>>,
  store: Arc<dyn Store>,
  metrics: Arc<Metrics>,
  cancel: CancellationToken,
) -> WorkerStats {
  let pool = Stage::Persistence.pool();
  trace!(worker_id, "Writer worker starting");
  metrics.set_worker_up(pool, worker_id, true);

  let mut stats = WorkerStats::default();

  while !cancel.is_cancelled() {
    let Ok(job) = writes.dequeue(&cancel).await else {
      break;
    };

    let started = Instant::now();
    let (operation, result) = match &job {
      WriteJob::Item(item) => ("write_item", store.write_item(item).await),
      WriteJob::Record(record) => ("write_record", store.write_record(record).await),
    };
    metrics.observe(pool, operation, started.elapsed());

    match result {
      Ok(()) => {
        if let WriteJob::Record(record) = &job {
          metrics.record_written(record.kind.as_str());
        }
        stats.processed += 1;
      }
      Err(e) => {
        let id = match &job {
          WriteJob::Item(item) => &item.id,
          WriteJob::Record(record) => &record.id,
        };
        error!(worker_id, operation, id = %id, error = %e, "Store write failed");
        metrics.failure(pool, e.failure_kind());
        stats.failed += 1;
      }
    }
  }

  metrics.set_worker_up(pool, worker_id, false);
  trace!(worker_id, processed = stats.processed, failed = stats.failed, "Writer worker finished");
  stats
}
