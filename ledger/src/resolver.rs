//! Conflict Resolver: admission control for new reservation requests.
//!
//! Admission is split the usual way:
//!
//! - [`AdmissionReducer`] is pure. Given a [`DaySheet`] (the business's
//!   hours and the active reservations of one date) it decides whether a
//!   request fits, and once the record is persisted it describes the
//!   notification to send.
//! - [`ConflictResolver`] is the shell. It loads the day sheet, holds the
//!   `(business, date)` admission lock across check-then-write, persists
//!   through the store's conditional `create`, and runs the effects.
//!
//! The store re-checks overlap inside its own atomic section, so two
//! processes sharing one database cannot double-book either.

use crate::notification_effect;
use booking_ledger_core::effect::Effect;
use booking_ledger_core::environment::{BusinessDirectory, Notification, Notifier};
use booking_ledger_core::reducer::Reducer;
use booking_ledger_core::slots::{DayHours, SlotTime, TimeRange, candidate_slots};
use booking_ledger_core::store::{ReservationStore, StoreError};
use booking_ledger_core::types::{
    BusinessId, BusinessProfile, CustomerContact, CustomerId, IdempotencyKey, NewReservation,
    Reservation, ReservationFilter, ReservationStatus, ServiceId,
};
use booking_ledger_core::{BookingError, NaiveDate, SmallVec, smallvec};
use booking_ledger_runtime::metrics::AdmissionMetrics;
use booking_ledger_runtime::retry::retry;
use booking_ledger_runtime::{EffectRunner, KeyedLocks, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Request
// ============================================================================

/// A customer's request for a slot.
///
/// Duration is not part of the request: it comes from the service when one
/// is named, otherwise from the configured default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    /// Business to book with
    pub business_id: BusinessId,
    /// Requesting customer
    pub customer_id: CustomerId,
    /// Service from the business catalog
    pub service_id: Option<ServiceId>,
    /// Appointment date
    pub date: NaiveDate,
    /// Appointment start, business-local
    pub time: SlotTime,
    /// Free-form note for the business
    pub notes: Option<String>,
    /// Contact details
    pub contact: Option<CustomerContact>,
    /// Client-generated token identifying this logical request
    pub idempotency_key: Option<IdempotencyKey>,
}

impl BookingRequest {
    /// Minimal request: no service, notes, contact or idempotency key.
    #[must_use]
    pub const fn new(
        business_id: BusinessId,
        customer_id: CustomerId,
        date: NaiveDate,
        time: SlotTime,
    ) -> Self {
        Self {
            business_id,
            customer_id,
            service_id: None,
            date,
            time,
            notes: None,
            contact: None,
            idempotency_key: None,
        }
    }

    /// Book a catalog service
    #[must_use]
    pub const fn with_service(mut self, service_id: ServiceId) -> Self {
        self.service_id = Some(service_id);
        self
    }

    /// Attach contact details
    #[must_use]
    pub fn with_contact(mut self, contact: CustomerContact) -> Self {
        self.contact = Some(contact);
        self
    }

    /// Attach a note
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Attach an idempotency key
    #[must_use]
    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    /// The record to admit, in `pending` status.
    #[must_use]
    pub fn into_new_reservation(self, duration_minutes: u16) -> NewReservation {
        NewReservation {
            business_id: self.business_id,
            customer_id: self.customer_id,
            service_id: self.service_id,
            date: self.date,
            time: self.time,
            duration_minutes,
            status: ReservationStatus::Pending,
            notes: self.notes,
            contact: self.contact,
            idempotency_key: self.idempotency_key,
        }
    }
}

/// Duration of a booking: the service's, or `default` without a service.
///
/// # Errors
///
/// [`BookingError::Validation`] when the service is not in the catalog.
pub fn booking_duration(
    profile: &BusinessProfile,
    service_id: Option<ServiceId>,
    default: u16,
) -> Result<u16, BookingError> {
    match service_id {
        Some(id) => profile
            .service(id)
            .map(|service| service.duration_minutes)
            .ok_or_else(|| BookingError::validation(format!("unknown service {id}"))),
        None => Ok(default),
    }
}

// ============================================================================
// State
// ============================================================================

/// The active reservations of one business on one date, plus the
/// outcome of the latest admission decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DaySheet {
    /// Business the sheet belongs to
    pub business_id: BusinessId,
    /// Date of the sheet
    pub date: NaiveDate,
    /// Opening hours, `None` when closed
    pub hours: Option<DayHours>,
    /// Pending and confirmed reservations
    pub active: Vec<Reservation>,
    /// Request accepted by the last decision, awaiting persistence
    pub admitted: Option<NewReservation>,
    /// Last error (for validation feedback)
    pub last_error: Option<BookingError>,
}

impl DaySheet {
    /// A sheet with no decision yet.
    ///
    /// Records that are not active are dropped.
    #[must_use]
    pub fn new(
        business_id: BusinessId,
        date: NaiveDate,
        hours: Option<DayHours>,
        reservations: Vec<Reservation>,
    ) -> Self {
        Self {
            business_id,
            date,
            hours,
            active: reservations
                .into_iter()
                .filter(|r| r.status.is_active())
                .collect(),
            admitted: None,
            last_error: None,
        }
    }

    /// The first active reservation overlapping `interval`
    #[must_use]
    pub fn conflict_with(&self, interval: &TimeRange) -> Option<&Reservation> {
        self.active
            .iter()
            .find(|reservation| reservation.interval().overlaps(interval))
    }

    /// Candidate starts for a booking of `duration` that overlap nothing.
    #[must_use]
    pub fn open_slots(&self, granularity: u16, duration: u16) -> Vec<SlotTime> {
        candidate_slots(self.hours, granularity, duration)
            .filter(|start| {
                TimeRange::starting_at(*start, duration)
                    .is_some_and(|interval| self.conflict_with(&interval).is_none())
            })
            .collect()
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Actions for the admission reducer
#[derive(Clone, Debug)]
pub enum AdmissionAction {
    // Commands
    /// Decide a request against the sheet
    Request {
        /// Record to admit, duration already resolved
        request: NewReservation,
    },

    // Events
    /// The store persisted the admitted request
    Persisted {
        /// The stored record
        reservation: Reservation,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the admission reducer
#[derive(Clone)]
pub struct AdmissionEnvironment {
    /// Delivery of the "reservation requested" notification
    pub notifier: Arc<dyn Notifier>,
}

impl AdmissionEnvironment {
    /// Creates a new `AdmissionEnvironment`
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Pure admission decisions over a [`DaySheet`]
#[derive(Clone, Copy, Debug, Default)]
pub struct AdmissionReducer;

impl AdmissionReducer {
    /// Creates a new `AdmissionReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a request against the sheet.
    ///
    /// Order: well-formed record, day open, inside hours, free interval.
    fn validate_request(sheet: &DaySheet, request: &NewReservation) -> Result<(), BookingError> {
        request.validate().map_err(BookingError::Validation)?;
        if request.business_id != sheet.business_id || request.date != sheet.date {
            return Err(BookingError::validation(
                "request does not belong to this day sheet",
            ));
        }

        let requested = request
            .interval()
            .ok_or_else(|| BookingError::validation("invalid interval"))?;
        let hours = sheet.hours.ok_or_else(|| {
            BookingError::validation(format!("business is closed on {}", sheet.date))
        })?;
        if !hours.window().contains(&requested) {
            return Err(BookingError::validation(format!(
                "{requested} is outside operating hours {}",
                hours.window()
            )));
        }

        if let Some(existing) = sheet.conflict_with(&requested) {
            return Err(BookingError::SlotConflict {
                date: sheet.date,
                requested,
                conflicting: Some(existing.id),
            });
        }
        Ok(())
    }
}

impl Reducer for AdmissionReducer {
    type State = DaySheet;
    type Action = AdmissionAction;
    type Environment = AdmissionEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect; 4]> {
        match action {
            AdmissionAction::Request { mut request } => {
                state.admitted = None;
                state.last_error = None;

                if let Err(error) = Self::validate_request(state, &request) {
                    state.last_error = Some(error);
                    return SmallVec::new();
                }

                request.status = ReservationStatus::Pending;
                state.admitted = Some(request);
                SmallVec::new()
            },

            AdmissionAction::Persisted { reservation } => {
                state.admitted = None;
                if reservation.status.is_active()
                    && !state.active.iter().any(|r| r.id == reservation.id)
                {
                    state.active.push(reservation.clone());
                }

                smallvec![notification_effect(
                    &env.notifier,
                    Notification::Requested(reservation),
                )]
            },
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Outcome of a successful admission
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// A new record was persisted
    Admitted(Reservation),
    /// The idempotency key matched an earlier record, which is returned
    Replayed(Reservation),
}

impl Admission {
    /// The reservation, however it was obtained
    #[must_use]
    pub fn into_reservation(self) -> Reservation {
        match self {
            Self::Admitted(reservation) | Self::Replayed(reservation) => reservation,
        }
    }
}

/// Serializes and persists admissions.
#[derive(Clone)]
pub struct ConflictResolver {
    store: Arc<dyn ReservationStore>,
    directory: Arc<dyn BusinessDirectory>,
    env: AdmissionEnvironment,
    locks: KeyedLocks<(BusinessId, NaiveDate)>,
    effects: EffectRunner,
    read_policy: RetryPolicy,
    default_duration_minutes: u16,
    request_timeout: Duration,
}

impl ConflictResolver {
    /// Creates a resolver over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ReservationStore>,
        directory: Arc<dyn BusinessDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            directory,
            env: AdmissionEnvironment::new(notifier),
            locks: KeyedLocks::new(),
            effects: EffectRunner::new(),
            read_policy: RetryPolicy::default(),
            default_duration_minutes: 30,
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Duration used when a request names no service
    #[must_use]
    pub const fn with_default_duration(mut self, minutes: u16) -> Self {
        self.default_duration_minutes = minutes;
        self
    }

    /// Bound on one admission, lock wait included
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Backoff for reads that hit a transient failure
    #[must_use]
    pub fn with_read_policy(mut self, policy: RetryPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    /// Runner executing notification effects
    #[must_use]
    pub fn with_effects(mut self, effects: EffectRunner) -> Self {
        self.effects = effects;
        self
    }

    /// Admit a request or explain why not.
    ///
    /// Nothing is written on any failure path. On [`BookingError::Timeout`]
    /// the caller may retry; with an idempotency key the retry returns the
    /// record if the first attempt was in fact persisted.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Validation`] for unknown business or service,
    ///   closed day, out-of-hours or malformed requests
    /// - [`BookingError::SlotConflict`] when the interval is taken
    /// - [`BookingError::Unavailable`] when the store keeps failing
    /// - [`BookingError::Timeout`] when `request_timeout` elapses
    #[tracing::instrument(
        skip(self, request),
        fields(
            business_id = %request.business_id,
            customer_id = %request.customer_id,
            date = %request.date,
            time = %request.time,
        )
    )]
    pub async fn admit(&self, request: BookingRequest) -> Result<Admission, BookingError> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.request_timeout, self.admit_locked(request))
            .await
            .unwrap_or_else(|_| {
                tracing::warn!(timeout = ?self.request_timeout, "Admission timed out");
                Err(BookingError::Timeout)
            });

        match &outcome {
            Ok(Admission::Admitted(reservation)) => {
                tracing::info!(reservation_id = %reservation.id, "Reservation admitted");
                AdmissionMetrics::record_admitted(started.elapsed());
            },
            Ok(Admission::Replayed(reservation)) => {
                tracing::info!(reservation_id = %reservation.id, "Replayed earlier admission");
                AdmissionMetrics::record_replayed();
            },
            Err(error @ BookingError::SlotConflict { .. }) => {
                tracing::info!(error = %error, "Admission refused");
                AdmissionMetrics::record_conflict(started.elapsed());
            },
            Err(error) => {
                tracing::info!(error = %error, "Admission rejected");
                AdmissionMetrics::record_rejected(error.kind().as_str());
            },
        }
        outcome
    }

    /// Active reservations and hours of one business date.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for an unknown business,
    /// [`BookingError::Unavailable`] when reads keep failing.
    pub async fn day_sheet(
        &self,
        business_id: BusinessId,
        date: NaiveDate,
    ) -> Result<(BusinessProfile, DaySheet), BookingError> {
        let profile = self.profile(business_id).await?;
        let sheet = self.load_sheet(&profile, date).await?;
        Ok((profile, sheet))
    }

    async fn admit_locked(&self, request: BookingRequest) -> Result<Admission, BookingError> {
        let profile = self.profile(request.business_id).await?;
        let duration =
            booking_duration(&profile, request.service_id, self.default_duration_minutes)?;
        let new = request.into_new_reservation(duration);

        let _guard = self.locks.lock((new.business_id, new.date)).await;
        AdmissionMetrics::record_active_locks(self.locks.active_keys());

        if let Some(key) = &new.idempotency_key {
            let earlier = retry(&self.read_policy, "find_by_idempotency_key", || {
                self.store.find_by_idempotency_key(new.customer_id, key.clone())
            })
            .await?;
            if let Some(earlier) = earlier {
                return replay(earlier, &new);
            }
        }

        let mut sheet = self.load_sheet(&profile, new.date).await?;
        let reducer = AdmissionReducer::new();

        let effects =
            reducer.reduce(&mut sheet, AdmissionAction::Request { request: new }, &self.env);
        debug_assert!(effects.is_empty(), "admission decisions have no side effects");
        if let Some(error) = sheet.last_error.take() {
            return Err(error);
        }
        let admitted = sheet
            .admitted
            .take()
            .ok_or_else(|| BookingError::validation("request was not admitted"))?;

        let reservation = match self.store.create(admitted).await {
            Ok(reservation) => reservation,
            Err(error @ StoreError::Conflict { .. }) => {
                tracing::warn!(
                    error = %error,
                    "Store refused an admitted request; another writer got there first"
                );
                return Err(error.into());
            },
            Err(error) => return Err(error.into()),
        };

        let effects = reducer.reduce(
            &mut sheet,
            AdmissionAction::Persisted {
                reservation: reservation.clone(),
            },
            &self.env,
        );
        self.effects.run(effects);
        Ok(Admission::Admitted(reservation))
    }

    async fn profile(&self, business_id: BusinessId) -> Result<BusinessProfile, BookingError> {
        retry(&self.read_policy, "business_lookup", || {
            self.directory.business(business_id)
        })
        .await?
        .ok_or_else(|| BookingError::validation(format!("unknown business {business_id}")))
    }

    async fn load_sheet(
        &self,
        profile: &BusinessProfile,
        date: NaiveDate,
    ) -> Result<DaySheet, BookingError> {
        let active = retry(&self.read_policy, "list_by_business", || {
            self.store
                .list_by_business(profile.id, ReservationFilter::active_on(date))
        })
        .await?;
        Ok(DaySheet::new(
            profile.id,
            date,
            profile.weekly_hours.for_date(date),
            active,
        ))
    }
}

/// Return `earlier` for a retried request, refusing a key reused for a
/// different slot.
fn replay(earlier: Reservation, new: &NewReservation) -> Result<Admission, BookingError> {
    let same_slot = earlier.business_id == new.business_id
        && earlier.date == new.date
        && earlier.time == new.time;
    if !same_slot {
        tracing::warn!(
            reservation_id = %earlier.id,
            "Idempotency key reused for a different slot"
        );
        return Err(BookingError::validation(format!(
            "idempotency key already used for {} on {} at {}",
            earlier.business_id, earlier.date, earlier.time
        )));
    }
    Ok(Admission::Replayed(earlier))
}
