//! Parsing stage - dispatches items to parsers and queues the resulting writes.

use std::{sync::Arc, time::Instant};

use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::{Stage, WorkerStats, WriteJob};
use crate::{domain::item::CollectedItem, metrics::Metrics, parser::ParserRegistry, queue::WorkQueue};

/// Failure kind counted for items no parser accepts
pub const UNSUPPORTED_CONTENT_TYPE: &str = "unsupported_content_type";

/// Parse items until cancelled.
///
/// A failed item is logged, counted and dropped. Items no parser accepts are
/// counted as [`UNSUPPORTED_CONTENT_TYPE`] failures rather than silently
/// discarded.
pub async fn parsing_worker(
  worker_id: usize,
  items: Arc<WorkQueue<CollectedItem>>,
  writes: Arc<WorkQueue<WriteJob>>,
  registry: Arc<ParserRegistry>,
  metrics: Arc<Metrics>,
  cancel: CancellationToken,
) -> WorkerStats {
  let pool = Stage::Parsing.pool();
  trace!(worker_id, "Parser worker starting");
  metrics.set_worker_up(pool, worker_id, true);

  let mut stats = WorkerStats::default();

  while !cancel.is_cancelled() {
    let Ok(item) = items.dequeue(&cancel).await else {
      break;
    };

    if !registry.accepts(item.content_type) {
      warn!(
        worker_id,
        item_id = %item.id,
        path = %item.source_path,
        content_type = %item.content_type,
        "No parser for content type"
      );
      metrics.failure(pool, UNSUPPORTED_CONTENT_TYPE);
      stats.failed += 1;
      continue;
    }

    let started = Instant::now();
    let result = registry.dispatch(&item);
    metrics.observe(pool, "parse", started.elapsed());

    match result {
      Ok(records) => {
        trace!(worker_id, item_id = %item.id, records = records.len(), "Parsed item");
        let content_type = item.content_type.as_str();
        for record in &records {
          metrics.record_parsed(record.kind.as_str(), content_type);
        }

        writes.enqueue(WriteJob::Item(item));
        for record in records {
          writes.enqueue(WriteJob::Record(record));
        }
        stats.processed += 1;
      }
      Err(e) => {
        warn!(worker_id, item_id = %item.id, path = %item.source_path, error = %e, "Failed to parse item");
        metrics.failure(pool, e.failure_kind());
        stats.failed += 1;
      }
    }
  }

  metrics.set_worker_up(pool, worker_id, false);
  trace!(worker_id, processed = stats.processed, failed = stats.failed, "Parser worker finished");
  stats
}
