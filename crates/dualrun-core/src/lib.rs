//! dualrun Core - Dual-execution migration facade
//!
//! During a cutover from a legacy implementation to a new one, callers run
//! both side by side:
//! - The primary path (legacy by default) decides the caller-visible result
//! - The shadow path runs concurrently and only feeds metrics
//! - Each path has its own deadline; a slow shadow never delays the caller
//! - Primary errors pass through unwrapped; shadow errors never surface
//!
//! # Example
//!
//! ```rust,ignore
//! use dualrun_core::prelude::*;
//!
//! # async fn example() -> Result<(), DualError<std::io::Error>> {
//! let executor = DualExecutor::new("users");
//!
//! let name = executor
//!     .dual_operation(
//!         "get_user",
//!         || async { Ok::<_, std::io::Error>("ada".to_string()) },
//!         || async { Ok("ada".to_string()) },
//!         DualOperationOptions::default(),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

// Core modules
pub mod adapter;
pub mod config;
pub mod error;
pub mod metrics;
pub mod simulator;
pub mod timer;

// Re-exports for convenience
pub use adapter::{DualExecutor, DualOperation, OperationName};
pub use config::{
    DualOperationOptions, FacadeConfig, ImplementationPath, OperationOverride, DEFAULT_TIMEOUT_MS,
};
pub use error::{ConfigError, DualError, TimedOut, TIMEOUT_MESSAGE};
pub use metrics::{
    FanoutSink, InMemorySink, JsonLinesSink, MetricsFacadeSink, MetricsRecord, MetricsSink,
    MetricsSummary, OutcomeKind, PathRole, PathStats, TracingSink,
};
pub use simulator::{run_simulation, SimulationReport, SimulatorConfig};
pub use timer::with_timeout;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for adapters built on dualrun
    pub use crate::{
        DualError, DualExecutor, DualOperation, DualOperationOptions, FacadeConfig,
        ImplementationPath, MetricsSink,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
