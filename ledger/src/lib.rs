//! # Booking Ledger
//!
//! Conflict-free admission and lifecycle management of reservations for
//! businesses that sell fixed-length appointment slots.
//!
//! ## Core guarantees
//!
//! - **No double booking**: two active reservations of one business never
//!   overlap on the same date, however many requests race for a slot
//! - **Monotonic lifecycle**: `completed` and `cancelled` are final
//! - **Explicit actors**: every call names who is asking, and only the
//!   parties of a reservation may act on it
//! - **Notifications never decide outcomes**: delivery runs in the
//!   background and its failures are only logged and counted
//!
//! ## Layout
//!
//! - [`resolver`]: admission of new requests
//! - [`lifecycle`]: status transitions, detail edits and deletion
//! - [`ledger`]: the [`BookingLedger`] facade
//! - [`config`]: environment-driven configuration
//! - [`telemetry`]: tracing and metrics bootstrap

use booking_ledger_core::effect::Effect;
use booking_ledger_core::environment::{Notification, Notifier};
use booking_ledger_runtime::metrics::EffectMetrics;
use std::sync::Arc;

pub mod config;
pub mod ledger;
pub mod lifecycle;
pub mod resolver;
pub mod telemetry;

pub use config::Config;
pub use ledger::{BookingLedger, BusinessStats, ConnectError, LedgerEnvironment, TransitionRequest};
pub use lifecycle::LifecycleManager;
pub use resolver::{Admission, BookingRequest, ConflictResolver};

/// Deliver `notification` in the background. Failures are logged and counted.
pub(crate) fn notification_effect(
    notifier: &Arc<dyn Notifier>,
    notification: Notification,
) -> Effect {
    let notifier = Arc::clone(notifier);

    Effect::Future(Box::pin(async move {
        let kind = notification.kind();
        match notifier.notify(notification).await {
            Ok(()) => tracing::debug!(kind, "Notification delivered"),
            Err(error) => {
                tracing::warn!(kind, error = %error, "Notification delivery failed");
                EffectMetrics::record_failure("notification");
            },
        }
    }))
}
