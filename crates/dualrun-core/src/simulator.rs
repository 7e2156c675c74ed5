//! Migration simulator
//!
//! Drives a synthetic concrete adapter through many dual operations with
//! seeded latencies and failure rates for both paths, then reports what the
//! caller saw next to what the metrics recorded. Useful for rehearsing a
//! cutover policy (preference, deadline) before pointing it at real systems.

use crate::adapter::{DualExecutor, DualOperation};
use crate::config::{DualOperationOptions, ImplementationPath};
use crate::error::{ConfigError, DualError};
use crate::metrics::{InMemorySink, MetricsRecord, MetricsSummary, OutcomeKind, PathRole};
use futures::stream::{self, StreamExt};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Latency and reliability of one synthetic implementation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathProfile {
    /// Base latency in milliseconds
    pub latency_ms: u64,
    /// Uniform jitter added on top of the base latency
    pub jitter_ms: u64,
    /// Probability in `[0, 1]` that a call fails
    pub failure_rate: f64,
}

impl Default for PathProfile {
    fn default() -> Self {
        Self {
            latency_ms: 5,
            jitter_ms: 5,
            failure_rate: 0.0,
        }
    }
}

/// Simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Number of dual operations to run
    pub calls: u64,
    /// Maximum calls in flight at once
    pub concurrency: usize,
    /// Operation name used for every call
    pub operation: String,
    /// Legacy implementation profile
    pub legacy: PathProfile,
    /// New implementation profile
    pub new: PathProfile,
    /// Policy under test
    pub options: DualOperationOptions,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            calls: 100,
            concurrency: 16,
            operation: "lookup_price".to_string(),
            legacy: PathProfile::default(),
            new: PathProfile::default(),
            options: DualOperationOptions::default(),
        }
    }
}

impl SimulatorConfig {
    /// Reject configurations that cannot run
    ///
    /// # Errors
    /// - `ConfigError::InvalidSimulation` for zero calls, zero concurrency or
    ///   a failure rate outside `[0, 1]`
    /// - option errors from [`DualOperationOptions::validate`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.calls == 0 {
            return Err(ConfigError::InvalidSimulation(
                "calls must be positive".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidSimulation(
                "concurrency must be positive".to_string(),
            ));
        }
        for (path, profile) in [("legacy", &self.legacy), ("new", &self.new)] {
            if !(0.0..=1.0).contains(&profile.failure_rate) {
                return Err(ConfigError::InvalidSimulation(format!(
                    "{path} failure_rate must be within [0, 1], got {}",
                    profile.failure_rate
                )));
            }
        }
        self.options.validate()
    }
}

/// Error produced by the synthetic backends
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{backend} backend unavailable for sku {sku}")]
pub struct BackendError {
    /// Which implementation failed
    pub backend: ImplementationPath,
    /// Request that failed
    pub sku: u64,
}

/// Price answer returned by both synthetic backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Request key
    pub sku: u64,
    /// Price in cents
    pub cents: u64,
    /// Which backend produced the answer
    pub source: ImplementationPath,
}

/// Pre-rolled behaviour of one path for one call
#[derive(Debug, Clone, Copy)]
struct Scripted {
    delay: Duration,
    fails: bool,
}

impl Scripted {
    fn roll(rng: &mut StdRng, profile: &PathProfile) -> Self {
        let jitter = if profile.jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..=profile.jitter_ms)
        };
        Self {
            delay: Duration::from_millis(profile.latency_ms.saturating_add(jitter)),
            fails: rng.gen_bool(profile.failure_rate),
        }
    }

    async fn quote(self, backend: ImplementationPath, sku: u64) -> Result<Quote, BackendError> {
        tokio::time::sleep(self.delay).await;
        if self.fails {
            return Err(BackendError { backend, sku });
        }
        Ok(Quote {
            sku,
            cents: sku * 100 + 99,
            source: backend,
        })
    }
}

/// Synthetic concrete adapter: a price lookup migrating between two backends
struct PriceLookup<D> {
    dual: Arc<D>,
    operation: String,
    options: DualOperationOptions,
}

impl<D: DualOperation> PriceLookup<D> {
    async fn quote(
        &self,
        sku: u64,
        legacy: Scripted,
        new: Scripted,
    ) -> Result<Quote, DualError<BackendError>> {
        self.dual
            .dual_operation(
                &self.operation,
                move || legacy.quote(ImplementationPath::Legacy, sku),
                move || new.quote(ImplementationPath::New, sku),
                self.options,
            )
            .await
    }
}

/// What callers observed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerStats {
    /// Calls that returned a value
    pub succeeded: u64,
    /// Calls that returned the primary's own error
    pub failed: u64,
    /// Calls that returned a timeout
    pub timed_out: u64,
}

/// Calls where the two paths disagreed on availability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    /// Primary succeeded, shadow did not
    pub shadow_only_failures: u64,
    /// Shadow succeeded, primary did not
    pub primary_only_failures: u64,
    /// Calls missing a primary or shadow record
    pub incomplete_calls: u64,
}

impl Divergence {
    /// Pair primary and shadow records by call id and compare outcomes
    #[must_use]
    pub fn from_records(records: &[MetricsRecord]) -> Self {
        let mut calls: BTreeMap<Uuid, (Option<OutcomeKind>, Option<OutcomeKind>)> =
            BTreeMap::new();
        for record in records {
            let entry = calls.entry(record.call_id).or_default();
            match record.role {
                PathRole::Primary => entry.0 = Some(record.outcome),
                PathRole::Shadow => entry.1 = Some(record.outcome),
            }
        }

        let mut divergence = Self::default();
        for outcomes in calls.values() {
            match outcomes {
                (Some(OutcomeKind::Success), Some(OutcomeKind::Success)) => {}
                (Some(OutcomeKind::Success), Some(_)) => divergence.shadow_only_failures += 1,
                (Some(_), Some(OutcomeKind::Success)) => divergence.primary_only_failures += 1,
                (Some(_), Some(_)) => {}
                _ => divergence.incomplete_calls += 1,
            }
        }
        divergence
    }
}

/// Final report from the simulator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Configuration that produced this report
    pub config: SimulatorConfig,
    /// Caller-visible outcomes
    pub caller: CallerStats,
    /// Per-path metrics aggregate
    pub metrics: MetricsSummary,
    /// Availability disagreements between the paths
    pub divergence: Divergence,
    /// Records received, expected to be twice the call count
    pub records: u64,
    /// Wall-clock duration of the whole run
    pub elapsed_ms: u64,
}

impl SimulationReport {
    /// Check that every call produced exactly one record per path
    #[must_use]
    pub fn complete(&self) -> bool {
        self.records == self.config.calls * 2 && self.divergence.incomplete_calls == 0
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== dualrun Simulation Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Operation: {}\n", self.config.operation));
        report.push_str(&format!("Primary Path: {}\n", self.config.options.primary()));
        report.push_str(&format!("Timeout: {}ms\n", self.config.options.timeout_ms));
        report.push_str(&format!("Calls: {}\n", self.config.calls));
        report.push_str(&format!("Elapsed: {}ms\n\n", self.elapsed_ms));

        report.push_str("=== Caller View ===\n");
        report.push_str(&format!("Succeeded: {}\n", self.caller.succeeded));
        report.push_str(&format!("Failed: {}\n", self.caller.failed));
        report.push_str(&format!("Timed Out: {}\n\n", self.caller.timed_out));

        report.push_str("=== Paths ===\n");
        for (operation, paths) in &self.metrics.operations {
            for (path, stats) in paths {
                report.push_str(&format!(
                    "{operation}/{path}: calls={} ok={} failed={} timeout={} mean={:.1}ms max={}ms\n",
                    stats.calls,
                    stats.successes,
                    stats.failures,
                    stats.timeouts,
                    stats.mean_duration_ms,
                    stats.max_duration_ms,
                ));
            }
        }

        report.push_str("\n=== Divergence ===\n");
        report.push_str(&format!(
            "Shadow-only failures: {}\n",
            self.divergence.shadow_only_failures
        ));
        report.push_str(&format!(
            "Primary-only failures: {}\n",
            self.divergence.primary_only_failures
        ));
        report.push_str(&format!(
            "Incomplete calls: {}\n",
            self.divergence.incomplete_calls
        ));

        report.push_str(&format!(
            "\n=== Records: {} ({}) ===\n",
            self.records,
            if self.complete() { "COMPLETE" } else { "INCOMPLETE" }
        ));

        report
    }
}

/// Run the simulator
///
/// # Errors
/// Any error from [`SimulatorConfig::validate`]
pub async fn run_simulation(config: SimulatorConfig) -> Result<SimulationReport, ConfigError> {
    config.validate()?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let script: Vec<(u64, Scripted, Scripted)> = (0..config.calls)
        .map(|sku| {
            let legacy = Scripted::roll(&mut rng, &config.legacy);
            let new = Scripted::roll(&mut rng, &config.new);
            (sku, legacy, new)
        })
        .collect();

    let sink = Arc::new(InMemorySink::new());
    let executor = DualExecutor::new("simulator").with_sink(sink.clone());
    let adapter = PriceLookup {
        dual: Arc::new(executor),
        operation: config.operation.clone(),
        options: config.options,
    };

    tracing::info!(
        seed = config.seed,
        calls = config.calls,
        primary = %config.options.primary(),
        timeout_ms = config.options.timeout_ms,
        "Starting simulation"
    );
    let start = tokio::time::Instant::now();

    let outcomes: Vec<Result<Quote, DualError<BackendError>>> = stream::iter(script)
        .map(|(sku, legacy, new)| adapter.quote(sku, legacy, new))
        .buffer_unordered(config.concurrency)
        .collect()
        .await;

    let mut caller = CallerStats::default();
    for outcome in &outcomes {
        match outcome {
            Ok(_) => caller.succeeded += 1,
            Err(DualError::Timeout { .. }) => caller.timed_out += 1,
            Err(_) => caller.failed += 1,
        }
    }

    // Shadow paths may still be running; they finish within one deadline.
    let expected = usize::try_from(config.calls * 2).unwrap_or(usize::MAX);
    let grace = config.options.timeout() + Duration::from_millis(100);
    if !sink.wait_for(expected, grace).await {
        tracing::warn!(
            expected,
            received = sink.len(),
            "Not every shadow path reported before the grace period ended"
        );
    }

    let records = sink.records();
    let report = SimulationReport {
        caller,
        metrics: MetricsSummary::from_records(&records),
        divergence: Divergence::from_records(&records),
        records: records.len() as u64,
        elapsed_ms: crate::timer::duration_ms(start.elapsed()),
        config,
    };

    tracing::info!(
        succeeded = report.caller.succeeded,
        failed = report.caller.failed,
        timed_out = report.caller.timed_out,
        records = report.records,
        "Simulation finished"
    );
    Ok(report)
}
