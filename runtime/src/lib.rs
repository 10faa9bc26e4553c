//! # Booking Ledger Runtime
//!
//! The imperative shell around the ledger's pure decision logic.
//!
//! ## Components
//!
//! - **Effect runner**: spawns reducer effects fire-and-forget and tracks
//!   them for graceful shutdown
//! - **Keyed locks**: linearize admissions per `(business, date)` without
//!   blocking unrelated keys
//! - **Retry**: exponential backoff for transient store failures
//! - **Metrics**: Prometheus recorders and exporter
//!
//! ## Example
//!
//! ```
//! use booking_ledger_core::effect::Effect;
//! use booking_ledger_runtime::EffectRunner;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let runner = EffectRunner::new();
//! runner.run([Effect::Future(Box::pin(async {}))]);
//! runner.drain().await;
//! assert_eq!(runner.pending(), 0);
//! # }
//! ```

/// Fire-and-forget effect execution
pub mod effects;

/// Per-key async locks
pub mod locks;

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

pub use effects::{EffectError, EffectRunner};
pub use locks::{KeyGuard, KeyedLocks};
pub use retry::{RetryPolicy, Retryable};
