//! Pipeline metrics.
//!
//! One [`Metrics`] value is created per pipeline and shared by reference with
//! every worker. Series are created on first use and updated with atomics, so
//! workers never contend on a global lock.
//!
//! | Metric              | Type      | Labels                          |
//! |---------------------|-----------|---------------------------------|
//! | `items_collected`   | counter   | `source`, `content_type`        |
//! | `records_parsed`    | counter   | `record_kind`, `content_type`   |
//! | `records_written`   | counter   | `record_kind`                   |
//! | `failures`          | counter   | `component`, `failure_kind`     |
//! | `processing_seconds`| histogram | `component`, `operation`        |
//! | `queue_depth`       | gauge     | `queue`                         |
//! | `worker_up`         | gauge     | `pool`, `worker_id`             |

use std::{
  collections::BTreeMap,
  fmt::Write as _,
  sync::atomic::{AtomicI64, AtomicU64, Ordering},
  time::Duration,
};

use dashmap::DashMap;
use serde::Serialize;

/// Prefix for rendered series names
const NAMESPACE: &str = "tfindex";

/// Conventional default latency buckets, in seconds
const DEFAULT_BUCKETS: [f64; 11] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

// ============================================================================
// Series families
// ============================================================================

struct Family<T> {
  name: &'static str,
  help: &'static str,
  labels: &'static [&'static str],
  series: DashMap<Vec<String>, T>,
}

impl<T: Default> Family<T> {
  fn new(name: &'static str, help: &'static str, labels: &'static [&'static str]) -> Self {
    Self {
      name,
      help,
      labels,
      series: DashMap::new(),
    }
  }

  fn with<R>(&self, values: &[&str], f: impl FnOnce(&T) -> R) -> R {
    debug_assert_eq!(values.len(), self.labels.len(), "label arity for {}", self.name);
    let key: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    if let Some(series) = self.series.get(&key) {
      return f(&series);
    }
    let series = self.series.entry(key).or_default();
    f(&series)
  }

  fn label_map(&self, values: &[String]) -> BTreeMap<String, String> {
    self
      .labels
      .iter()
      .zip(values)
      .map(|(k, v)| (k.to_string(), v.clone()))
      .collect()
  }

  /// Series sorted by label values, for stable output.
  fn sorted<R>(&self, f: impl Fn(&T) -> R) -> Vec<(Vec<String>, R)> {
    let mut out: Vec<(Vec<String>, R)> = self.series.iter().map(|e| (e.key().clone(), f(e.value()))).collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
  }
}

#[derive(Default)]
struct Histogram {
  /// Per-bucket (non-cumulative) counts; the last slot is +Inf
  buckets: [AtomicU64; DEFAULT_BUCKETS.len() + 1],
  count: AtomicU64,
  sum_micros: AtomicU64,
}

impl Histogram {
  fn observe(&self, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let slot = DEFAULT_BUCKETS
      .iter()
      .position(|bound| secs <= *bound)
      .unwrap_or(DEFAULT_BUCKETS.len());
    self.buckets[slot].fetch_add(1, Ordering::Relaxed);
    self.count.fetch_add(1, Ordering::Relaxed);
    self
      .sum_micros
      .fetch_add(elapsed.as_micros().min(u64::MAX as u128) as u64, Ordering::Relaxed);
  }

  fn snapshot(&self) -> HistogramValue {
    let mut cumulative = 0;
    let mut buckets = Vec::with_capacity(DEFAULT_BUCKETS.len());
    for (bound, slot) in DEFAULT_BUCKETS.iter().zip(&self.buckets) {
      cumulative += slot.load(Ordering::Relaxed);
      buckets.push((*bound, cumulative));
    }
    HistogramValue {
      buckets,
      count: self.count.load(Ordering::Relaxed),
      sum_seconds: self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
    }
  }
}

// ============================================================================
// Snapshot types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesValue {
  pub name: &'static str,
  pub labels: BTreeMap<String, String>,
  pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramValue {
  /// `(upper bound, cumulative count)`; +Inf is `count`
  pub buckets: Vec<(f64, u64)>,
  pub count: u64,
  pub sum_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSeries {
  pub name: &'static str,
  pub labels: BTreeMap<String, String>,
  #[serde(flatten)]
  pub value: HistogramValue,
}

/// Point-in-time view of every series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
  pub counters: Vec<SeriesValue>,
  pub gauges: Vec<SeriesValue>,
  pub histograms: Vec<HistogramSeries>,
}

/// Headline totals, logged at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsTotals {
  pub items_collected: u64,
  pub records_parsed: u64,
  pub records_written: u64,
  pub failures: u64,
}

// ============================================================================
// Registry
// ============================================================================

pub struct Metrics {
  items_collected: Family<AtomicU64>,
  records_parsed: Family<AtomicU64>,
  records_written: Family<AtomicU64>,
  failures: Family<AtomicU64>,
  processing_seconds: Family<Histogram>,
  queue_depth: Family<AtomicI64>,
  worker_up: Family<AtomicI64>,
}

impl Default for Metrics {
  fn default() -> Self {
    Self::new()
  }
}

impl Metrics {
  pub fn new() -> Self {
    Self {
      items_collected: Family::new(
        "items_collected",
        "Items returned by collectors",
        &["source", "content_type"],
      ),
      records_parsed: Family::new(
        "records_parsed",
        "Records produced by parsers",
        &["record_kind", "content_type"],
      ),
      records_written: Family::new("records_written", "Records persisted to the store", &["record_kind"]),
      failures: Family::new("failures", "Failures by pipeline component", &["component", "failure_kind"]),
      processing_seconds: Family::new(
        "processing_seconds",
        "Time spent per pipeline operation",
        &["component", "operation"],
      ),
      queue_depth: Family::new("queue_depth", "Items waiting in each queue", &["queue"]),
      worker_up: Family::new("worker_up", "1 while a worker loop is running", &["pool", "worker_id"]),
    }
  }

  pub fn item_collected(&self, source: &str, content_type: &str) {
    self.items_collected.with(&[source, content_type], |c| c.fetch_add(1, Ordering::Relaxed));
  }

  pub fn record_parsed(&self, record_kind: &str, content_type: &str) {
    self.records_parsed.with(&[record_kind, content_type], |c| c.fetch_add(1, Ordering::Relaxed));
  }

  pub fn record_written(&self, record_kind: &str) {
    self.records_written.with(&[record_kind], |c| c.fetch_add(1, Ordering::Relaxed));
  }

  pub fn failure(&self, component: &str, failure_kind: &str) {
    self.failures.with(&[component, failure_kind], |c| c.fetch_add(1, Ordering::Relaxed));
  }

  pub fn observe(&self, component: &str, operation: &str, elapsed: Duration) {
    self.processing_seconds.with(&[component, operation], |h| h.observe(elapsed));
  }

  pub fn set_queue_depth(&self, queue: &str, depth: usize) {
    let depth = i64::try_from(depth).unwrap_or(i64::MAX);
    self.queue_depth.with(&[queue], |g| g.store(depth, Ordering::Relaxed));
  }

  pub fn set_worker_up(&self, pool: &str, worker_id: usize, up: bool) {
    let id = worker_id.to_string();
    self.worker_up.with(&[pool, &id], |g| g.store(i64::from(up), Ordering::Relaxed));
  }

  fn counters(&self) -> [&Family<AtomicU64>; 4] {
    [&self.items_collected, &self.records_parsed, &self.records_written, &self.failures]
  }

  fn gauges(&self) -> [&Family<AtomicI64>; 2] {
    [&self.queue_depth, &self.worker_up]
  }

  /// Current value of one counter series (0 if it was never touched).
  pub fn counter(&self, name: &str, values: &[&str]) -> u64 {
    let key: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    self
      .counters()
      .into_iter()
      .find(|f| f.name == name)
      .and_then(|f| f.series.get(&key).map(|c| c.load(Ordering::Relaxed)))
      .unwrap_or(0)
  }

  /// Sum over every series of a counter.
  pub fn counter_total(&self, name: &str) -> u64 {
    self
      .counters()
      .into_iter()
      .find(|f| f.name == name)
      .map(|f| f.series.iter().map(|c| c.load(Ordering::Relaxed)).sum())
      .unwrap_or(0)
  }

  /// Current value of one gauge series, if it exists.
  pub fn gauge(&self, name: &str, values: &[&str]) -> Option<i64> {
    let key: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    self
      .gauges()
      .into_iter()
      .find(|f| f.name == name)
      .and_then(|f| f.series.get(&key).map(|g| g.load(Ordering::Relaxed)))
  }

  pub fn totals(&self) -> MetricsTotals {
    MetricsTotals {
      items_collected: self.counter_total("items_collected"),
      records_parsed: self.counter_total("records_parsed"),
      records_written: self.counter_total("records_written"),
      failures: self.counter_total("failures"),
    }
  }

  pub fn snapshot(&self) -> MetricsSnapshot {
    let mut counters = Vec::new();
    for family in self.counters() {
      for (values, value) in family.sorted(|c| c.load(Ordering::Relaxed)) {
        counters.push(SeriesValue {
          name: family.name,
          labels: family.label_map(&values),
          value: i64::try_from(value).unwrap_or(i64::MAX),
        });
      }
    }

    let mut gauges = Vec::new();
    for family in self.gauges() {
      for (values, value) in family.sorted(|g| g.load(Ordering::Relaxed)) {
        gauges.push(SeriesValue {
          name: family.name,
          labels: family.label_map(&values),
          value,
        });
      }
    }

    let family = &self.processing_seconds;
    let histograms = family
      .sorted(Histogram::snapshot)
      .into_iter()
      .map(|(values, value)| HistogramSeries {
        name: family.name,
        labels: family.label_map(&values),
        value,
      })
      .collect();

    MetricsSnapshot {
      counters,
      gauges,
      histograms,
    }
  }

  /// Render every series in the Prometheus text exposition format.
  pub fn render_prometheus(&self) -> String {
    let mut out = String::new();

    for family in self.counters() {
      write_header(&mut out, family.name, family.help, "counter");
      for (values, value) in family.sorted(|c| c.load(Ordering::Relaxed)) {
        let _ = writeln!(out, "{NAMESPACE}_{}{} {value}", family.name, labels(family.labels, &values, None));
      }
    }

    for family in self.gauges() {
      write_header(&mut out, family.name, family.help, "gauge");
      for (values, value) in family.sorted(|g| g.load(Ordering::Relaxed)) {
        let _ = writeln!(out, "{NAMESPACE}_{}{} {value}", family.name, labels(family.labels, &values, None));
      }
    }

    let family = &self.processing_seconds;
    write_header(&mut out, family.name, family.help, "histogram");
    for (values, hist) in family.sorted(Histogram::snapshot) {
      let name = family.name;
      for (bound, count) in &hist.buckets {
        let le = bound.to_string();
        let _ = writeln!(out, "{NAMESPACE}_{name}_bucket{} {count}", labels(family.labels, &values, Some(&le)));
      }
      let _ = writeln!(
        out,
        "{NAMESPACE}_{name}_bucket{} {}",
        labels(family.labels, &values, Some("+Inf")),
        hist.count
      );
      let plain = labels(family.labels, &values, None);
      let _ = writeln!(out, "{NAMESPACE}_{name}_sum{plain} {}", hist.sum_seconds);
      let _ = writeln!(out, "{NAMESPACE}_{name}_count{plain} {}", hist.count);
    }

    out
  }
}

fn write_header(out: &mut String, name: &str, help: &str, kind: &str) {
  let _ = writeln!(out, "# HELP {NAMESPACE}_{name} {help}");
  let _ = writeln!(out, "# TYPE {NAMESPACE}_{name} {kind}");
}

fn labels(names: &[&str], values: &[String], le: Option<&str>) -> String {
  let mut pairs: Vec<String> = names
    .iter()
    .zip(values)
    .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
    .collect();
  if let Some(le) = le {
    pairs.push(format!("le=\"{le}\""));
  }
  if pairs.is_empty() {
    String::new()
  } else {
    format!("{{{}}}", pairs.join(","))
  }
}

fn escape_label(value: &str) -> String {
  value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}
