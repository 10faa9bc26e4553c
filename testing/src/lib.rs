//! # Booking Ledger Testing
//!
//! Testing utilities and helpers for the booking ledger.
//!
//! This crate provides:
//! - Mock implementations of environment traits (clock, directory, notifier)
//! - [`InMemoryReservationStore`] with fault injection
//! - [`ReducerTest`], a Given-When-Then harness for reducers
//! - Fixtures for a typical business week and proptest strategies
//!
//! ## Example
//!
//! ```
//! use booking_ledger_testing::{fixtures, InMemoryReservationStore};
//! use booking_ledger_core::store::ReservationStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = InMemoryReservationStore::new();
//! let salon = fixtures::salon();
//! let created = store
//!     .create(fixtures::new_reservation(salon.id, fixtures::monday(), "10:00", 30))
//!     .await
//!     .unwrap();
//! assert_eq!(store.get(created.id).await.unwrap(), Some(created));
//! # }
//! ```

use booking_ledger_core::environment::Clock;
use chrono::{DateTime, Utc};

pub mod fixtures;
pub mod memory_store;
pub mod reducer_test;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use booking_ledger_core::BookingError;
    use booking_ledger_core::environment::{BusinessDirectory, Notification, Notifier};
    use booking_ledger_core::types::{BusinessId, BusinessProfile};
    use std::collections::HashMap;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, PoisonError, RwLock};
    use std::time::Duration;

    /// Controllable clock for deterministic tests
    ///
    /// Returns the same time until moved with [`set`](Self::set) or
    /// [`advance`](Self::advance). Clones share the same time.
    ///
    /// # Example
    ///
    /// ```
    /// use booking_ledger_testing::mocks::FixedClock;
    /// use booking_ledger_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.clone().advance(Duration::hours(1));
    /// assert_eq!(clock.now() - before, Duration::hours(1));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Business directory backed by a map
    #[derive(Debug, Clone, Default)]
    pub struct StaticDirectory {
        profiles: Arc<RwLock<HashMap<BusinessId, BusinessProfile>>>,
        unavailable: Arc<AtomicBool>,
    }

    impl StaticDirectory {
        /// Empty directory
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Directory containing `profile`
        #[must_use]
        pub fn with(self, profile: BusinessProfile) -> Self {
            self.insert(profile);
            self
        }

        /// Add or replace a profile
        pub fn insert(&self, profile: BusinessProfile) {
            self.profiles
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(profile.id, profile);
        }

        /// Make every lookup fail with [`BookingError::Unavailable`]
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }
    }

    impl BusinessDirectory for StaticDirectory {
        fn business(
            &self,
            id: BusinessId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<BusinessProfile>, BookingError>> + Send + '_>>
        {
            Box::pin(async move {
                if self.unavailable.load(Ordering::SeqCst) {
                    return Err(BookingError::Unavailable("directory offline".to_string()));
                }
                Ok(self
                    .profiles
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&id)
                    .cloned())
            })
        }
    }

    /// Notifier that records every notification it is asked to deliver
    #[derive(Debug, Clone, Default)]
    pub struct RecordingNotifier {
        sent: Arc<RwLock<Vec<Notification>>>,
        failing: Arc<AtomicBool>,
        delay_ms: Arc<AtomicU64>,
    }

    impl RecordingNotifier {
        /// Notifier that accepts everything
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make deliveries fail (they are still recorded)
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Hold every delivery for `delay` before recording it
        pub fn set_delay(&self, delay: Duration) {
            let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            self.delay_ms.store(millis, Ordering::SeqCst);
        }

        /// Everything delivered so far, in order
        #[must_use]
        pub fn sent(&self) -> Vec<Notification> {
            self.sent
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Labels of everything delivered so far
        #[must_use]
        pub fn kinds(&self) -> Vec<&'static str> {
            self.sent().iter().map(Notification::kind).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(
            &self,
            notification: Notification,
        ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>> {
            Box::pin(async move {
                let delay = self.delay_ms.load(Ordering::SeqCst);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                self.sent
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(notification);
                if self.failing.load(Ordering::SeqCst) {
                    Err("push gateway rejected the message".to_string())
                } else {
                    Ok(())
                }
            })
        }
    }
}

/// Install a `tracing` subscriber for test output.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use memory_store::InMemoryReservationStore;
pub use mocks::{FixedClock, RecordingNotifier, StaticDirectory, test_clock};
pub use reducer_test::{ReducerTest, assertions};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_stable_until_moved() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());

        let shared = clock.clone();
        shared.advance(chrono::Duration::minutes(30));
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:30:00+00:00");
    }
}
