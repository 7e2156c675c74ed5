//! Testing utilities for the dualrun workspace
//!
//! Shared fixtures: scripted suppliers with call counters, payload and error
//! types shaped like real backends, and misbehaving sinks.

#![allow(missing_docs)]

use dualrun_core::{MetricsRecord, MetricsSink};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub type SupplierFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub data: String,
}

impl Payload {
    pub fn new(data: &str) -> Self {
        Self {
            data: data.to_string(),
        }
    }
}

/// Backend error with an identity the tests can compare
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub id: u32,
    pub message: String,
}

impl BackendError {
    pub fn new(id: u32, message: &str) -> Self {
        Self {
            id,
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BackendError {}

/// Counts supplier invocations across clones
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Supplier that counts its invocation, sleeps `delay`, then yields `result`
pub fn scripted<T, E>(
    counter: &CallCounter,
    delay: Duration,
    result: Result<T, E>,
) -> impl FnOnce() -> SupplierFuture<T, E> + Send + 'static
where
    T: Send + 'static,
    E: Send + 'static,
{
    let counter = counter.clone();
    move || {
        counter.hit();
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            result
        })
    }
}

pub fn ok_after(
    counter: &CallCounter,
    ms: u64,
    data: &str,
) -> impl FnOnce() -> SupplierFuture<Payload, BackendError> + Send + 'static {
    scripted(counter, Duration::from_millis(ms), Ok(Payload::new(data)))
}

pub fn err_after(
    counter: &CallCounter,
    ms: u64,
    error: BackendError,
) -> impl FnOnce() -> SupplierFuture<Payload, BackendError> + Send + 'static {
    scripted(counter, Duration::from_millis(ms), Err(error))
}

/// Sink that panics on every record
#[derive(Debug, Default)]
pub struct PanickingSink;

impl MetricsSink for PanickingSink {
    fn record(&self, _entry: MetricsRecord) {
        panic!("metrics backend exploded");
    }
}
