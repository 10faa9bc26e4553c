//! In-memory reservation store for fast, deterministic testing.
//!
//! All records live in one `RwLock`-guarded map; the write lock is the
//! store's atomic section, so the conditional create, the status guard of
//! `update` and the checks of `delete` are each evaluated and applied
//! without interleaving. Secondary orderings are computed at query time.
//!
//! Fault injection (latency, lost acknowledgements, backend failures) lets
//! tests exercise timeouts and retries without a database.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use booking_ledger_core::environment::{Clock, SystemClock};
use booking_ledger_core::error::DenyReason;
use booking_ledger_core::store::{
    ReservationStore, StoreError, StoreFuture, business_order, customer_order, deletable,
};
use booking_ledger_core::types::{
    BusinessId, CustomerId, IdempotencyKey, NewReservation, Reservation, ReservationFilter,
    ReservationId, ReservationPatch,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

#[derive(Default)]
struct Faults {
    latency: Mutex<Duration>,
    ack_delay: Mutex<Duration>,
    failing_reads: AtomicUsize,
    failing_writes: AtomicUsize,
    unconditional: AtomicBool,
}

/// In-memory [`ReservationStore`].
///
/// Clones share the same records.
///
/// # Example
///
/// ```
/// use booking_ledger_testing::InMemoryReservationStore;
///
/// let store = InMemoryReservationStore::new();
/// assert!(store.is_empty());
/// ```
#[derive(Clone)]
pub struct InMemoryReservationStore {
    records: Arc<RwLock<HashMap<ReservationId, Reservation>>>,
    clock: Arc<dyn Clock>,
    faults: Arc<Faults>,
}

impl fmt::Debug for InMemoryReservationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryReservationStore")
            .field("records", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryReservationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReservationStore {
    /// Empty store stamping records with the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty store stamping records with `clock`
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            clock,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Put a record in place as-is, bypassing every check.
    pub fn insert(&self, reservation: Reservation) {
        self.records
            .write()
            .unwrap()
            .insert(reservation.id, reservation);
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Whether the store holds no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Every record, in business order
    #[must_use]
    pub fn all(&self) -> Vec<Reservation> {
        let mut all: Vec<_> = self.records.read().unwrap().values().cloned().collect();
        all.sort_by(business_order);
        all
    }

    /// Delay every call by `latency` before it touches the records
    pub fn set_latency(&self, latency: Duration) {
        *self.faults.latency.lock().unwrap() = latency;
    }

    /// Delay the acknowledgement of every successful write by `delay`.
    ///
    /// The write is already committed while the caller waits, which models
    /// a response lost to a timeout.
    pub fn set_ack_delay(&self, delay: Duration) {
        *self.faults.ack_delay.lock().unwrap() = delay;
    }

    /// Fail the next `count` reads with a backend error
    pub fn fail_next_reads(&self, count: usize) {
        self.faults.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` writes with a backend error
    pub fn fail_next_writes(&self, count: usize) {
        self.faults.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Skip the overlap check of `create`, leaving admission control
    /// entirely to the caller.
    pub fn set_unconditional(&self, unconditional: bool) {
        self.faults
            .unconditional
            .store(unconditional, Ordering::SeqCst);
    }

    async fn enter(&self, failures: &AtomicUsize, operation: &str) -> Result<(), StoreError> {
        let latency = *self.faults.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let injected = failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Backend(format!("injected {operation} failure")));
        }
        Ok(())
    }

    async fn acknowledge(&self) {
        let delay = *self.faults.ack_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn create_now(&self, new: NewReservation) -> Result<Reservation, StoreError> {
        new.validate().map_err(StoreError::Validation)?;
        let interval = new
            .interval()
            .ok_or_else(|| StoreError::Validation("invalid interval".to_string()))?;

        let mut records = self.records.write().unwrap();

        if let Some(key) = &new.idempotency_key {
            let earlier = records.values().find(|r| {
                r.customer_id == new.customer_id && r.idempotency_key.as_ref() == Some(key)
            });
            if let Some(earlier) = earlier {
                return Ok(earlier.clone());
            }
        }

        if new.status.is_active() && !self.faults.unconditional.load(Ordering::SeqCst) {
            let conflicting = records.values().find(|r| {
                r.business_id == new.business_id
                    && r.date == new.date
                    && r.status.is_active()
                    && r.interval().overlaps(&interval)
            });
            if let Some(conflicting) = conflicting {
                return Err(StoreError::Conflict {
                    date: new.date,
                    requested: interval,
                    conflicting: Some(conflicting.id),
                });
            }
        }

        let reservation = new.into_reservation(ReservationId::new(), self.clock.now());
        records.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    fn update_now(
        &self,
        id: ReservationId,
        patch: ReservationPatch,
    ) -> Result<Reservation, StoreError> {
        let mut records = self.records.write().unwrap();
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if let Some(expected) = patch.expected_status {
            if record.status != expected {
                return Err(StoreError::StatusMismatch {
                    current: record.status,
                });
            }
        }

        patch.apply_to(record);
        record.updated_at = self.clock.now().max(record.created_at);
        Ok(record.clone())
    }

    fn delete_now(&self, id: ReservationId, requesting: CustomerId) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap();
        let record = records.get(&id).ok_or(StoreError::NotFound(id))?;

        if record.customer_id != requesting {
            return Err(StoreError::Forbidden(DenyReason::NotOwner));
        }
        if !deletable(record.status) {
            return Err(StoreError::InvalidState {
                current: record.status,
            });
        }

        records.remove(&id);
        Ok(())
    }
}

impl ReservationStore for InMemoryReservationStore {
    fn create(&self, reservation: NewReservation) -> StoreFuture<'_, Reservation> {
        Box::pin(async move {
            self.enter(&self.faults.failing_writes, "create").await?;
            let created = self.create_now(reservation)?;
            self.acknowledge().await;
            Ok(created)
        })
    }

    fn get(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            self.enter(&self.faults.failing_reads, "get").await?;
            Ok(self.records.read().unwrap().get(&id).cloned())
        })
    }

    fn list_by_business(
        &self,
        business_id: BusinessId,
        filter: ReservationFilter,
    ) -> StoreFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            self.enter(&self.faults.failing_reads, "list_by_business")
                .await?;
            let mut found: Vec<_> = self
                .records
                .read()
                .unwrap()
                .values()
                .filter(|r| r.business_id == business_id && filter.matches(r))
                .cloned()
                .collect();
            found.sort_by(business_order);
            Ok(found)
        })
    }

    fn list_by_customer(&self, customer_id: CustomerId) -> StoreFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            self.enter(&self.faults.failing_reads, "list_by_customer")
                .await?;
            let mut found: Vec<_> = self
                .records
                .read()
                .unwrap()
                .values()
                .filter(|r| r.customer_id == customer_id)
                .cloned()
                .collect();
            found.sort_by(customer_order);
            Ok(found)
        })
    }

    fn update(&self, id: ReservationId, patch: ReservationPatch) -> StoreFuture<'_, Reservation> {
        Box::pin(async move {
            self.enter(&self.faults.failing_writes, "update").await?;
            let updated = self.update_now(id, patch)?;
            self.acknowledge().await;
            Ok(updated)
        })
    }

    fn delete(&self, id: ReservationId, requesting_customer: CustomerId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.enter(&self.faults.failing_writes, "delete").await?;
            self.delete_now(id, requesting_customer)?;
            self.acknowledge().await;
            Ok(())
        })
    }

    fn find_by_idempotency_key(
        &self,
        customer_id: CustomerId,
        key: IdempotencyKey,
    ) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            self.enter(&self.faults.failing_reads, "find_by_idempotency_key")
                .await?;
            Ok(self
                .records
                .read()
                .unwrap()
                .values()
                .find(|r| r.customer_id == customer_id && r.idempotency_key.as_ref() == Some(&key))
                .cloned())
        })
    }
}
