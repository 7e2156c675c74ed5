//! Per-path outcome records and the sinks that consume them
//!
//! Every dual operation produces one [`MetricsRecord`] per path. Sinks are
//! fire-and-forget: `record` returns nothing and a sink handles its own
//! failures.

use crate::config::ImplementationPath;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// How a single path settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Supplier resolved before its deadline
    Success,
    /// Supplier failed before its deadline
    Failure,
    /// Deadline expired first
    Timeout,
}

impl OutcomeKind {
    /// Stable label for logs and metric tags
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a path decided the caller-visible result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathRole {
    /// Outcome returned to the caller
    Primary,
    /// Outcome observed only by metrics
    Shadow,
}

impl PathRole {
    /// Stable label for logs and metric tags
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Shadow => "shadow",
        }
    }
}

/// One path's outcome within one dual operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// Adapter namespace
    pub adapter: String,
    /// Operation name supplied by the caller
    pub operation: String,
    /// Correlates the two records of one call
    pub call_id: Uuid,
    /// Implementation that ran
    pub path: ImplementationPath,
    /// Primary or shadow
    pub role: PathRole,
    /// How the path settled
    pub outcome: OutcomeKind,
    /// Wall-clock time until the path settled or timed out
    pub duration_ms: u64,
    /// When the record was created
    pub recorded_at: DateTime<Utc>,
}

/// Consumer of metrics records
///
/// Implementations must not panic or block for long; they run on the
/// caller's task for the primary path and on the shadow task otherwise.
pub trait MetricsSink: Send + Sync {
    /// Record one entry
    fn record(&self, entry: MetricsRecord);
}

impl<S: MetricsSink + ?Sized> MetricsSink for Arc<S> {
    fn record(&self, entry: MetricsRecord) {
        (**self).record(entry);
    }
}

/// Emits one structured `tracing` event per record
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&self, entry: MetricsRecord) {
        tracing::info!(
            target: "dualrun::metrics",
            adapter = %entry.adapter,
            operation = %entry.operation,
            call_id = %entry.call_id,
            path = %entry.path,
            role = entry.role.as_str(),
            outcome = %entry.outcome,
            duration_ms = entry.duration_ms,
            "dual operation path settled"
        );
    }
}

/// Counter name emitted by [`MetricsFacadeSink`]
pub const PATH_TOTAL_METRIC: &str = "dualrun_path_total";
/// Histogram name emitted by [`MetricsFacadeSink`]
pub const PATH_DURATION_METRIC: &str = "dualrun_path_duration_ms";

/// Forwards records to the `metrics` facade
///
/// Whatever recorder the application installed receives a counter and a
/// duration histogram per record. Without a recorder this is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsFacadeSink;

impl MetricsSink for MetricsFacadeSink {
    #[allow(clippy::cast_precision_loss)]
    fn record(&self, entry: MetricsRecord) {
        let duration_ms = entry.duration_ms as f64;
        let labels = [
            ("adapter", entry.adapter),
            ("operation", entry.operation),
            ("path", entry.path.as_str().to_string()),
            ("role", entry.role.as_str().to_string()),
            ("outcome", entry.outcome.as_str().to_string()),
        ];
        metrics::counter!(PATH_TOTAL_METRIC, &labels).increment(1);
        metrics::histogram!(PATH_DURATION_METRIC, &labels).record(duration_ms);
    }
}

/// Append-only JSON event stream, one object per line
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Create sink writing to `writer`
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> MetricsSink for JsonLinesSink<W> {
    fn record(&self, entry: MetricsRecord) {
        let mut writer = self.writer.lock();
        if let Err(e) = write_line(&mut *writer, &entry) {
            tracing::warn!(
                operation = %entry.operation,
                path = %entry.path,
                error = %e,
                "Dropped metrics record"
            );
        }
    }
}

fn write_line<W: Write>(writer: &mut W, entry: &MetricsRecord) -> std::io::Result<()> {
    serde_json::to_writer(&mut *writer, entry)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Forwards every record to each wrapped sink
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutSink {
    /// Create empty fanout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of wrapped sinks
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Check if no sinks are wrapped
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl MetricsSink for FanoutSink {
    fn record(&self, entry: MetricsRecord) {
        for sink in &self.sinks {
            record_contained(sink.as_ref(), entry.clone());
        }
    }
}

/// Hand a record to `sink`, containing any panic it raises
///
/// Returns false if the sink panicked and the record was dropped.
pub(crate) fn record_contained(sink: &dyn MetricsSink, entry: MetricsRecord) -> bool {
    let path = entry.path;
    let role = entry.role;
    let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| sink.record(entry))).is_ok();
    if !delivered {
        tracing::error!(path = %path, role = role.as_str(), "Metrics sink panicked, record dropped");
    }
    delivered
}

/// In-process buffer of records
///
/// Used by tests and the simulator. Readers can wait for shadow records that
/// arrive after the caller already has its result.
#[derive(Debug, Default)]
pub struct InMemorySink {
    records: Mutex<Vec<MetricsRecord>>,
    arrived: Notify,
}

impl InMemorySink {
    /// Create empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records in arrival order
    #[must_use]
    pub fn records(&self) -> Vec<MetricsRecord> {
        self.records.lock().clone()
    }

    /// Records for one operation
    #[must_use]
    pub fn records_for(&self, operation: &str) -> Vec<MetricsRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.operation == operation)
            .cloned()
            .collect()
    }

    /// Number of records so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Check if nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Wait until at least `count` records exist or `limit` elapses
    ///
    /// Returns true if the count was reached.
    pub async fn wait_for(&self, count: usize, limit: Duration) -> bool {
        let reached = async {
            loop {
                let notified = self.arrived.notified();
                if self.len() >= count {
                    return;
                }
                notified.await;
            }
        };
        crate::timer::with_timeout(reached, limit).await.is_ok()
    }

    /// Aggregate counts and latencies per operation and path
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary::from_records(&self.records.lock())
    }
}

impl MetricsSink for InMemorySink {
    fn record(&self, entry: MetricsRecord) {
        self.records.lock().push(entry);
        self.arrived.notify_waiters();
    }
}

/// Aggregate for one (operation, path) pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathStats {
    /// Records seen
    pub calls: u64,
    /// Successful settlements
    pub successes: u64,
    /// Supplier failures
    pub failures: u64,
    /// Deadline expiries
    pub timeouts: u64,
    /// Mean duration in milliseconds
    pub mean_duration_ms: f64,
    /// Longest duration in milliseconds
    pub max_duration_ms: u64,
}

impl PathStats {
    /// Fraction of calls that succeeded
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.successes as f64 / self.calls as f64;
        rate
    }
}

/// Per-operation, per-path aggregate of records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Keyed by operation name, then by path
    pub operations: BTreeMap<String, BTreeMap<ImplementationPath, PathStats>>,
}

impl MetricsSummary {
    /// Build a summary from raw records
    #[must_use]
    pub fn from_records(records: &[MetricsRecord]) -> Self {
        let mut operations: BTreeMap<String, BTreeMap<ImplementationPath, PathStats>> =
            BTreeMap::new();
        let mut totals: BTreeMap<(String, ImplementationPath), u64> = BTreeMap::new();

        for record in records {
            let stats = operations
                .entry(record.operation.clone())
                .or_default()
                .entry(record.path)
                .or_default();
            stats.calls += 1;
            match record.outcome {
                OutcomeKind::Success => stats.successes += 1,
                OutcomeKind::Failure => stats.failures += 1,
                OutcomeKind::Timeout => stats.timeouts += 1,
            }
            stats.max_duration_ms = stats.max_duration_ms.max(record.duration_ms);
            *totals
                .entry((record.operation.clone(), record.path))
                .or_default() += record.duration_ms;
        }

        for ((operation, path), total) in totals {
            if let Some(stats) = operations.get_mut(&operation).and_then(|p| p.get_mut(&path)) {
                #[allow(clippy::cast_precision_loss)]
                let mean = total as f64 / stats.calls as f64;
                stats.mean_duration_ms = mean;
            }
        }

        Self { operations }
    }

    /// Stats for one operation and path
    #[must_use]
    pub fn get(&self, operation: &str, path: ImplementationPath) -> Option<&PathStats> {
        self.operations.get(operation).and_then(|p| p.get(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(operation: &str, path: ImplementationPath, outcome: OutcomeKind, ms: u64) -> MetricsRecord {
        MetricsRecord {
            adapter: "users".to_string(),
            operation: operation.to_string(),
            call_id: Uuid::new_v4(),
            path,
            role: PathRole::Primary,
            outcome,
            duration_ms: ms,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn summary_aggregates_per_path() {
        let records = vec![
            record("get", ImplementationPath::Legacy, OutcomeKind::Success, 10),
            record("get", ImplementationPath::Legacy, OutcomeKind::Failure, 30),
            record("get", ImplementationPath::New, OutcomeKind::Timeout, 100),
            record("list", ImplementationPath::New, OutcomeKind::Success, 5),
        ];

        let summary = MetricsSummary::from_records(&records);

        let legacy = summary.get("get", ImplementationPath::Legacy).unwrap();
        assert_eq!(legacy.calls, 2);
        assert_eq!(legacy.successes, 1);
        assert_eq!(legacy.failures, 1);
        assert_eq!(legacy.max_duration_ms, 30);
        assert!((legacy.mean_duration_ms - 20.0).abs() < f64::EPSILON);
        assert!((legacy.success_rate() - 0.5).abs() < f64::EPSILON);

        let new = summary.get("get", ImplementationPath::New).unwrap();
        assert_eq!(new.timeouts, 1);
        assert!(summary.get("list", ImplementationPath::Legacy).is_none());
    }

    #[test]
    fn json_lines_sink_writes_one_object_per_record() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.record(record("get", ImplementationPath::Legacy, OutcomeKind::Success, 10));
        sink.record(record("get", ImplementationPath::New, OutcomeKind::Timeout, 100));

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["operation"], "get");
        assert_eq!(second["path"], "new");
        assert_eq!(second["outcome"], "timeout");
        assert_eq!(second["duration_ms"], 100);
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn json_lines_sink_swallows_write_errors() {
        let sink = JsonLinesSink::new(BrokenWriter);
        sink.record(record("get", ImplementationPath::Legacy, OutcomeKind::Success, 1));
    }

    #[test]
    fn fanout_forwards_to_every_sink() {
        let a = Arc::new(InMemorySink::new());
        let b = Arc::new(InMemorySink::new());
        let fanout = FanoutSink::new().with(a.clone()).with(b.clone());
        assert_eq!(fanout.len(), 2);

        fanout.record(record("get", ImplementationPath::New, OutcomeKind::Success, 3));

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    struct ExplodingSink;

    impl MetricsSink for ExplodingSink {
        fn record(&self, _entry: MetricsRecord) {
            panic!("collector unreachable");
        }
    }

    #[test]
    fn fanout_keeps_forwarding_after_a_sink_panics() {
        let before = Arc::new(InMemorySink::new());
        let after = Arc::new(InMemorySink::new());
        let fanout = FanoutSink::new()
            .with(before.clone())
            .with(Arc::new(ExplodingSink))
            .with(after.clone());

        fanout.record(record("get", ImplementationPath::Legacy, OutcomeKind::Success, 4));
        fanout.record(record("get", ImplementationPath::New, OutcomeKind::Failure, 6));

        assert_eq!(before.len(), 2);
        assert_eq!(after.len(), 2);
    }

    #[test]
    fn record_contained_reports_dropped_records() {
        let entry = record("get", ImplementationPath::New, OutcomeKind::Success, 1);
        assert!(!record_contained(&ExplodingSink, entry.clone()));
        assert!(record_contained(&InMemorySink::new(), entry));
    }

    #[test]
    fn facade_sink_without_recorder_is_noop() {
        MetricsFacadeSink.record(record("get", ImplementationPath::Legacy, OutcomeKind::Failure, 7));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_sees_late_records() {
        let sink = Arc::new(InMemorySink::new());
        let writer = sink.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.record(record("get", ImplementationPath::New, OutcomeKind::Success, 20));
        });

        assert!(sink.wait_for(1, Duration::from_secs(1)).await);
        assert!(!sink.wait_for(2, Duration::from_millis(50)).await);
        assert_eq!(sink.records_for("get").len(), 1);
    }
}
