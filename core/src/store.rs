//! Reservation store trait and its error type.
//!
//! The store is the single shared mutable resource of the ledger: only it
//! materializes state changes. Deciders (the conflict resolver and the
//! lifecycle manager) always re-read from it before deciding.
//!
//! # Implementations
//!
//! - `PostgresReservationStore` (in `booking-ledger-postgres`): production
//! - `InMemoryReservationStore` (in `booking-ledger-testing`): fast, deterministic tests
//!
//! # Example
//!
//! ```no_run
//! use booking_ledger_core::store::{ReservationStore, StoreError};
//! use booking_ledger_core::types::{BusinessId, ReservationFilter};
//!
//! async fn agenda<S: ReservationStore>(store: &S, business: BusinessId) -> Result<(), StoreError> {
//!     for reservation in store.list_by_business(business, ReservationFilter::all()).await? {
//!         println!("{} {} {}", reservation.date, reservation.time, reservation.status);
//!     }
//!     Ok(())
//! }
//! ```

use crate::error::{BookingError, DenyReason};
use crate::slots::TimeRange;
use crate::types::{
    BusinessId, CustomerId, IdempotencyKey, NewReservation, Reservation, ReservationFilter,
    ReservationId, ReservationPatch, ReservationStatus,
};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by store methods
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record with this id.
    #[error("Reservation not found: {0}")]
    NotFound(ReservationId),

    /// Conditional create refused: an active reservation overlaps at write time.
    #[error("Conflicting active reservation for {date} {requested}")]
    Conflict {
        /// Date of the refused reservation
        date: NaiveDate,
        /// Interval of the refused reservation
        requested: TimeRange,
        /// The overlapping record, when the backend can name it
        conflicting: Option<ReservationId>,
    },

    /// The `expected_status` guard of an update did not hold.
    #[error("Status mismatch: stored status is {current}")]
    StatusMismatch {
        /// Status currently stored
        current: ReservationStatus,
    },

    /// The requester may not touch the record.
    #[error("Forbidden: {0}")]
    Forbidden(DenyReason),

    /// The record's status does not allow the operation.
    #[error("Operation not allowed while reservation is {current}")]
    InvalidState {
        /// Status currently stored
        current: ReservationStatus,
    },

    /// Required fields missing or malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Backend failure (connection, query, decoding).
    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for BookingError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Forbidden(reason) => Self::Authorization { reason },
            StoreError::InvalidState { current } | StoreError::StatusMismatch { current } => {
                Self::InvalidState { current }
            },
            StoreError::Validation(message) => Self::Validation(message),
            StoreError::Backend(message) => Self::Unavailable(message),
            StoreError::Conflict {
                date,
                requested,
                conflicting,
            } => Self::SlotConflict {
                date,
                requested,
                conflicting,
            },
        }
    }
}

/// Durable CRUD for reservation records.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the ledger can hold an
/// `Arc<dyn ReservationStore>` and move it into effects.
pub trait ReservationStore: Send + Sync {
    /// Persist a new reservation.
    ///
    /// Assigns the id and sets `created_at = updated_at = now`. The write is
    /// conditional: it fails with [`StoreError::Conflict`] when an active
    /// reservation of the same business and date overlaps the new interval
    /// at write time.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Validation`] for malformed input
    /// - [`StoreError::Conflict`] when the interval is taken
    /// - [`StoreError::Backend`] on storage failure
    fn create(&self, reservation: NewReservation) -> StoreFuture<'_, Reservation>;

    /// Fetch one reservation.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on storage failure.
    fn get(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>>;

    /// Reservations of a business, ordered by `(date, time)` ascending.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on storage failure.
    fn list_by_business(
        &self,
        business_id: BusinessId,
        filter: ReservationFilter,
    ) -> StoreFuture<'_, Vec<Reservation>>;

    /// Reservations of a customer, most recent date first.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on storage failure.
    fn list_by_customer(&self, customer_id: CustomerId) -> StoreFuture<'_, Vec<Reservation>>;

    /// Merge a patch and bump `updated_at`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if absent
    /// - [`StoreError::StatusMismatch`] if `patch.expected_status` does not hold
    /// - [`StoreError::Backend`] on storage failure
    fn update(&self, id: ReservationId, patch: ReservationPatch) -> StoreFuture<'_, Reservation>;

    /// Remove a record on behalf of its customer.
    ///
    /// Ownership and status are checked inside the store's atomic section.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if absent
    /// - [`StoreError::Forbidden`] unless `requesting_customer` owns it
    /// - [`StoreError::InvalidState`] if it is `confirmed` or `completed`
    /// - [`StoreError::Backend`] on storage failure
    fn delete(&self, id: ReservationId, requesting_customer: CustomerId) -> StoreFuture<'_, ()>;

    /// The reservation a customer created with this idempotency key, if any.
    ///
    /// # Errors
    ///
    /// [`StoreError::Backend`] on storage failure.
    fn find_by_idempotency_key(
        &self,
        customer_id: CustomerId,
        key: IdempotencyKey,
    ) -> StoreFuture<'_, Option<Reservation>>;
}

/// Whether a record may be deleted in its current status.
#[must_use]
pub const fn deletable(status: ReservationStatus) -> bool {
    matches!(status, ReservationStatus::Pending | ReservationStatus::Cancelled)
}

/// Ordering used by [`ReservationStore::list_by_business`].
#[must_use]
pub fn business_order(a: &Reservation, b: &Reservation) -> Ordering {
    (a.date, a.time, a.created_at).cmp(&(b.date, b.time, b.created_at))
}

/// Ordering used by [`ReservationStore::list_by_customer`].
#[must_use]
pub fn customer_order(a: &Reservation, b: &Reservation) -> Ordering {
    (b.date, b.time, b.created_at).cmp(&(a.date, a.time, a.created_at))
}
