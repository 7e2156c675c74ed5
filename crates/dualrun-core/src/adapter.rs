//! Dual-execution adapter
//!
//! Runs the legacy and the new implementation of one logical operation
//! concurrently during a migration window. The primary path (chosen by
//! [`DualOperationOptions::prefer_legacy`]) decides what the caller sees; the
//! shadow path runs on its own task and only feeds metrics.
//!
//! # Per-call lifecycle
//!
//! ```text
//! validate ──► invoke both suppliers ──► spawn observer(shadow)
//!                                    └─► spawn observer(primary) ──► reply ──► Ok / Err
//!
//! observer: run under deadline ──► record ──► reply (primary only)
//! ```
//!
//! Deadlines are per path. Each path runs on its own task, so a timeout stops
//! the waiting, not the work. Records are written by the observers, so both
//! paths are recorded even when the caller drops the call midway.

use crate::config::{DualOperationOptions, FacadeConfig, ImplementationPath};
use crate::error::{ConfigError, DualError};
use crate::metrics::{
    record_contained, MetricsRecord, MetricsSink, OutcomeKind, PathRole, TracingSink,
};
use crate::timer;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::Instrument;
use uuid::Uuid;

/// Validated, non-blank operation name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationName(String);

impl OperationName {
    /// Create operation name
    ///
    /// # Errors
    /// - `ConfigError::EmptyOperationName` if `name` is blank
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyOperationName);
        }
        Ok(Self(name))
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability to run two implementations of one operation side by side
///
/// Concrete adapters hold something implementing this trait (usually an
/// `Arc<DualExecutor>`) and call it with closures bound to their real
/// systems.
#[async_trait::async_trait]
pub trait DualOperation: Send + Sync {
    /// Run `legacy` and `new` concurrently and return the primary result
    ///
    /// Each supplier is invoked exactly once. The primary path's error is
    /// returned as [`DualError::Upstream`] without wrapping.
    ///
    /// # Errors
    /// - `DualError::Configuration` if `operation` is blank or `options` are
    ///   invalid; neither supplier is invoked
    /// - `DualError::Upstream` if the primary supplier fails
    /// - `DualError::Timeout` if the primary supplier misses its deadline
    async fn dual_operation<T, E, L, N, LF, NF>(
        &self,
        operation: &str,
        legacy: L,
        new: N,
        options: DualOperationOptions,
    ) -> Result<T, DualError<E>>
    where
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
        L: FnOnce() -> LF + Send,
        N: FnOnce() -> NF + Send,
        LF: Future<Output = Result<T, E>> + Send + 'static,
        NF: Future<Output = Result<T, E>> + Send + 'static;

    /// Options configured for `operation`
    fn options_for(&self, _operation: &str) -> DualOperationOptions {
        DualOperationOptions::default()
    }

    /// Run with the options configured for `operation`
    ///
    /// # Errors
    /// Same as [`DualOperation::dual_operation`]
    async fn dual_operation_configured<T, E, L, N, LF, NF>(
        &self,
        operation: &str,
        legacy: L,
        new: N,
    ) -> Result<T, DualError<E>>
    where
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
        L: FnOnce() -> LF + Send,
        N: FnOnce() -> NF + Send,
        LF: Future<Output = Result<T, E>> + Send + 'static,
        NF: Future<Output = Result<T, E>> + Send + 'static,
    {
        let options = self.options_for(operation);
        self.dual_operation(operation, legacy, new, options).await
    }
}

/// Shared orchestration core
///
/// Holds only its configuration and a sink. Nothing accumulates across calls.
#[derive(Clone)]
pub struct DualExecutor {
    config: FacadeConfig,
    sink: Arc<dyn MetricsSink>,
}

impl DualExecutor {
    /// Create executor for adapter `name` with default options and the
    /// tracing sink
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: FacadeConfig::new(name),
            sink: Arc::new(TracingSink),
        }
    }

    /// Create executor from a loaded config
    ///
    /// # Errors
    /// Any error from [`FacadeConfig::validate`]
    pub fn from_config(config: FacadeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            sink: Arc::new(TracingSink),
        })
    }

    /// With metrics sink
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Adapter name used to namespace metrics and logs
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.adapter_name
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &FacadeConfig {
        &self.config
    }
}

impl std::fmt::Debug for DualExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl DualOperation for DualExecutor {
    async fn dual_operation<T, E, L, N, LF, NF>(
        &self,
        operation: &str,
        legacy: L,
        new: N,
        options: DualOperationOptions,
    ) -> Result<T, DualError<E>>
    where
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
        L: FnOnce() -> LF + Send,
        N: FnOnce() -> NF + Send,
        LF: Future<Output = Result<T, E>> + Send + 'static,
        NF: Future<Output = Result<T, E>> + Send + 'static,
    {
        let operation = OperationName::new(operation)?;
        options.validate()?;

        let call = CallContext {
            adapter: self.config.adapter_name.clone(),
            operation: operation.as_str().to_string(),
            call_id: Uuid::new_v4(),
        };
        let span = tracing::debug_span!(
            "dual_operation",
            adapter = %call.adapter,
            operation = %call.operation,
            call_id = %call.call_id,
        );

        let limit = options.timeout();
        let legacy_run = legacy().boxed();
        let new_run = new().boxed();
        let (primary_run, shadow_run) = match options.primary() {
            ImplementationPath::Legacy => (legacy_run, new_run),
            ImplementationPath::New => (new_run, legacy_run),
        };

        tokio::spawn(
            observe_path(
                call.clone(),
                options.shadow(),
                PathRole::Shadow,
                shadow_run,
                limit,
                Arc::clone(&self.sink),
                None,
            )
            .instrument(span.clone()),
        );

        let (reply, settled) = oneshot::channel();
        tokio::spawn(
            observe_path(
                call,
                options.primary(),
                PathRole::Primary,
                primary_run,
                limit,
                Arc::clone(&self.sink),
                Some(reply),
            )
            .instrument(span),
        );

        match settled.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => std::panic::resume_unwind(panic),
            // Observer dropped without replying: the runtime is shutting down.
            Err(_) => Err(DualError::Cancelled),
        }
    }

    fn options_for(&self, operation: &str) -> DualOperationOptions {
        self.config.options_for(operation)
    }
}

/// Correlation data shared by both records of one call
#[derive(Debug, Clone)]
struct CallContext {
    adapter: String,
    operation: String,
    call_id: Uuid,
}

impl CallContext {
    fn record(
        &self,
        path: ImplementationPath,
        role: PathRole,
        outcome: OutcomeKind,
        elapsed: Duration,
    ) -> MetricsRecord {
        MetricsRecord {
            adapter: self.adapter.clone(),
            operation: self.operation.clone(),
            call_id: self.call_id,
            path,
            role,
            outcome,
            duration_ms: timer::duration_ms(elapsed),
            recorded_at: chrono::Utc::now(),
        }
    }
}

/// Run one path on its own task and wait for it under its deadline
///
/// On expiry the task is detached, not aborted, so the underlying work still
/// finishes. A panic inside the supplier resumes on the awaiting task.
async fn run_path<T, E>(
    run: BoxFuture<'static, Result<T, E>>,
    limit: Duration,
) -> (Result<T, DualError<E>>, Duration)
where
    T: Send + 'static,
    E: Send + 'static,
{
    let task = tokio::spawn(run);
    let (settled, elapsed) = timer::timed(timer::with_timeout(task, limit)).await;
    let outcome = match settled {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(DualError::Upstream(e)),
        Ok(Err(join_error)) => match join_error.try_into_panic() {
            Ok(payload) => std::panic::resume_unwind(payload),
            Err(_) => Err(DualError::Cancelled),
        },
        Err(timed_out) => Err(timed_out.into()),
    };
    (outcome, elapsed)
}

/// Outcome handed back to the caller, or the panic raised by the supplier
type PathResult<T, E> = std::thread::Result<Result<T, DualError<E>>>;

/// Drive one path to completion, record it, then reply if anyone listens
///
/// Runs on its own task. Shadow failures, timeouts and panics end here; a
/// primary panic is forwarded through `reply` and resumed on the caller.
async fn observe_path<T, E>(
    call: CallContext,
    path: ImplementationPath,
    role: PathRole,
    run: BoxFuture<'static, Result<T, E>>,
    limit: Duration,
    sink: Arc<dyn MetricsSink>,
    reply: Option<oneshot::Sender<PathResult<T, E>>>,
) where
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let start = tokio::time::Instant::now();
    let settled = AssertUnwindSafe(run_path(run, limit)).catch_unwind().await;
    let (kind, elapsed) = match &settled {
        Ok((outcome, elapsed)) => {
            log_outcome(path, role, outcome, *elapsed);
            (outcome_kind(outcome), *elapsed)
        }
        Err(_) => {
            tracing::error!(path = %path, role = role.as_str(), "Implementation panicked");
            (OutcomeKind::Failure, start.elapsed())
        }
    };
    record_contained(sink.as_ref(), call.record(path, role, kind, elapsed));

    if let Some(reply) = reply {
        // The caller may have stopped waiting; the record above still stands.
        let _ = reply.send(settled.map(|(outcome, _)| outcome));
    }
}

fn log_outcome<T, E: std::fmt::Display>(
    path: ImplementationPath,
    role: PathRole,
    outcome: &Result<T, DualError<E>>,
    elapsed: Duration,
) {
    match (role, outcome) {
        (PathRole::Primary, Ok(_)) => tracing::debug!(
            path = %path,
            elapsed_ms = timer::duration_ms(elapsed),
            "Primary path succeeded"
        ),
        (PathRole::Shadow, Ok(_)) => tracing::debug!(
            path = %path,
            elapsed_ms = timer::duration_ms(elapsed),
            "Shadow path succeeded"
        ),
        (PathRole::Primary, Err(e)) => {
            tracing::warn!(path = %path, error = %e, "Primary path failed");
        }
        (PathRole::Shadow, Err(e)) => tracing::warn!(
            path = %path,
            outcome = %outcome_kind(outcome),
            error = %e,
            "Shadow path failed"
        ),
    }
}

fn outcome_kind<T, E>(outcome: &Result<T, DualError<E>>) -> OutcomeKind {
    match outcome {
        Ok(_) => OutcomeKind::Success,
        Err(DualError::Timeout { .. }) => OutcomeKind::Timeout,
        Err(_) => OutcomeKind::Failure,
    }
}
