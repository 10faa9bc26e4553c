//! The public face of the booking ledger.
//!
//! [`BookingLedger`] wires the [`ConflictResolver`] and the
//! [`LifecycleManager`] to one store, one business directory and one
//! notifier, and adds the read-side operations (listings, open slots,
//! dashboard counts).

use crate::config::{BookingConfig, Config, ConfigError};
use crate::lifecycle::{LifecycleEnvironment, LifecycleManager};
use crate::resolver::{BookingRequest, ConflictResolver, booking_duration};
use booking_ledger_core::environment::{BusinessDirectory, Clock, Notifier, SystemClock};
use booking_ledger_core::slots::SlotTime;
use booking_ledger_core::store::{ReservationStore, StoreError};
use booking_ledger_core::types::{
    Actor, BusinessId, CustomerContact, CustomerId, Reservation, ReservationFilter, ReservationId,
    ReservationStatus, ServiceId,
};
use booking_ledger_core::{BookingError, NaiveDate};
use booking_ledger_postgres::PostgresReservationStore;
use booking_ledger_runtime::retry::retry;
use booking_ledger_runtime::{EffectError, EffectRunner, RetryPolicy};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from [`BookingLedger::connect`]
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The configuration is inconsistent
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The database could not be reached or migrated
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Collaborators shared by every ledger operation
#[derive(Clone)]
pub struct LedgerEnvironment {
    /// Reservation persistence
    pub store: Arc<dyn ReservationStore>,
    /// Business profiles
    pub directory: Arc<dyn BusinessDirectory>,
    /// Notification delivery
    pub notifier: Arc<dyn Notifier>,
    /// Time source for the completion check
    pub clock: Arc<dyn Clock>,
}

/// Request to move a reservation to a new status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    /// Reservation to move
    pub id: ReservationId,
    /// Who asks
    pub actor: Actor,
    /// Requested status
    pub target: ReservationStatus,
}

/// Dashboard counts for one business
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessStats {
    /// All reservations
    pub total: usize,
    /// Awaiting the business
    pub pending: usize,
    /// Accepted
    pub confirmed: usize,
    /// Took place
    pub completed: usize,
    /// Withdrawn
    pub cancelled: usize,
    /// Pending or confirmed, dated today or later
    pub upcoming: usize,
}

impl BusinessStats {
    /// Count `reservations` as seen on `today`.
    #[must_use]
    pub fn tally<'a>(
        reservations: impl IntoIterator<Item = &'a Reservation>,
        today: NaiveDate,
    ) -> Self {
        reservations
            .into_iter()
            .fold(Self::default(), |mut stats, reservation| {
                stats.total += 1;
                match reservation.status {
                    ReservationStatus::Pending => stats.pending += 1,
                    ReservationStatus::Confirmed => stats.confirmed += 1,
                    ReservationStatus::Completed => stats.completed += 1,
                    ReservationStatus::Cancelled => stats.cancelled += 1,
                }
                if reservation.status.is_active() && reservation.date >= today {
                    stats.upcoming += 1;
                }
                stats
            })
    }
}

/// Admission, lifecycle and queries over one reservation store.
///
/// # Example
///
/// ```ignore
/// let ledger = BookingLedger::new(env, &config.booking, config.retry.policy());
///
/// let reservation = ledger
///     .create(BookingRequest::new(salon, customer, date, "10:00".parse()?))
///     .await?;
///
/// ledger
///     .transition(TransitionRequest {
///         id: reservation.id,
///         actor: Actor::Business(salon),
///         target: ReservationStatus::Confirmed,
///     })
///     .await?;
/// ```
#[derive(Clone)]
pub struct BookingLedger {
    store: Arc<dyn ReservationStore>,
    resolver: ConflictResolver,
    lifecycle: LifecycleManager,
    effects: EffectRunner,
    read_policy: RetryPolicy,
    default_duration_minutes: u16,
    slot_granularity_minutes: u16,
    shutdown_timeout: Duration,
}

impl BookingLedger {
    /// Assemble a ledger from its collaborators.
    #[must_use]
    pub fn new(env: LedgerEnvironment, config: &BookingConfig, read_policy: RetryPolicy) -> Self {
        let effects = EffectRunner::new();
        let resolver = ConflictResolver::new(
            Arc::clone(&env.store),
            Arc::clone(&env.directory),
            Arc::clone(&env.notifier),
        )
        .with_default_duration(config.default_duration_minutes)
        .with_request_timeout(config.request_timeout())
        .with_read_policy(read_policy.clone())
        .with_effects(effects.clone());

        let lifecycle_env = LifecycleEnvironment {
            clock: env.clock,
            notifier: env.notifier,
            enforce_completion_after_start: config.enforce_completion_after_start,
        };
        let lifecycle = LifecycleManager::new(Arc::clone(&env.store), env.directory, lifecycle_env)
            .with_max_attempts(config.max_transition_attempts)
            .with_read_policy(read_policy.clone())
            .with_effects(effects.clone());

        Self {
            store: env.store,
            resolver,
            lifecycle,
            effects,
            read_policy,
            default_duration_minutes: config.default_duration_minutes,
            slot_granularity_minutes: config.slot_granularity_minutes,
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    /// Connect to `PostgreSQL`, run migrations and assemble a ledger.
    ///
    /// # Errors
    ///
    /// [`ConnectError::Config`] for an invalid configuration,
    /// [`ConnectError::Store`] when the database is unreachable or a
    /// migration fails.
    pub async fn connect(
        config: &Config,
        directory: Arc<dyn BusinessDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConnectError> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(Duration::from_secs(config.database.connect_timeout))
            .connect(&config.database.url)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect: {e}")))?;

        let store = PostgresReservationStore::new(pool);
        store.migrate().await?;
        tracing::info!(
            max_connections = config.database.max_connections,
            "Booking ledger connected"
        );

        let env = LedgerEnvironment {
            store: Arc::new(store),
            directory,
            notifier,
            clock: Arc::new(SystemClock),
        };
        Ok(Self::new(env, &config.booking, config.retry.policy()))
    }

    /// Book a slot.
    ///
    /// Retrying with the same idempotency key returns the first record.
    ///
    /// # Errors
    ///
    /// See [`ConflictResolver::admit`].
    pub async fn create(&self, request: BookingRequest) -> Result<Reservation, BookingError> {
        self.resolver
            .admit(request)
            .await
            .map(crate::resolver::Admission::into_reservation)
    }

    /// One reservation, visible to its business and its customer.
    ///
    /// # Errors
    ///
    /// See [`LifecycleManager::view`].
    pub async fn get(&self, id: ReservationId, actor: Actor) -> Result<Reservation, BookingError> {
        self.lifecycle.view(id, actor).await
    }

    /// Reservations of a business, ordered by date and time.
    ///
    /// # Errors
    ///
    /// [`BookingError::Unavailable`] when reads keep failing.
    #[tracing::instrument(skip(self, filter))]
    pub async fn list_by_business(
        &self,
        business_id: BusinessId,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, BookingError> {
        let listed = retry(&self.read_policy, "list_by_business", || {
            self.store.list_by_business(business_id, filter.clone())
        })
        .await?;
        Ok(listed)
    }

    /// Reservations of a customer, most recent date first.
    ///
    /// # Errors
    ///
    /// [`BookingError::Unavailable`] when reads keep failing.
    #[tracing::instrument(skip(self))]
    pub async fn list_by_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<Reservation>, BookingError> {
        let listed = retry(&self.read_policy, "list_by_customer", || {
            self.store.list_by_customer(customer_id)
        })
        .await?;
        Ok(listed)
    }

    /// Move a reservation through its lifecycle.
    ///
    /// # Errors
    ///
    /// See [`LifecycleManager::transition`].
    pub async fn transition(&self, request: TransitionRequest) -> Result<Reservation, BookingError> {
        self.lifecycle
            .transition(request.id, request.actor, request.target)
            .await
    }

    /// Remove a pending or cancelled reservation. Customers only.
    ///
    /// # Errors
    ///
    /// See [`LifecycleManager::delete`].
    pub async fn delete(&self, id: ReservationId, actor: Actor) -> Result<(), BookingError> {
        self.lifecycle.delete(id, actor).await
    }

    /// Replace notes and/or contact of an open reservation.
    ///
    /// `None` leaves a field as it is, `Some(None)` clears it.
    ///
    /// # Errors
    ///
    /// See [`LifecycleManager::update_details`].
    pub async fn update_details(
        &self,
        id: ReservationId,
        actor: Actor,
        notes: Option<Option<String>>,
        contact: Option<Option<CustomerContact>>,
    ) -> Result<Reservation, BookingError> {
        self.lifecycle.update_details(id, actor, notes, contact).await
    }

    /// Starts on `date` where a booking of the service would fit right now.
    ///
    /// Advisory only: admission re-checks under its lock.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for an unknown business or service,
    /// [`BookingError::Unavailable`] when reads keep failing.
    #[tracing::instrument(skip(self))]
    pub async fn open_slots(
        &self,
        business_id: BusinessId,
        date: NaiveDate,
        service_id: Option<ServiceId>,
    ) -> Result<Vec<SlotTime>, BookingError> {
        let (profile, sheet) = self.resolver.day_sheet(business_id, date).await?;
        let duration = booking_duration(&profile, service_id, self.default_duration_minutes)?;
        Ok(sheet.open_slots(self.slot_granularity_minutes, duration))
    }

    /// Counts per status and upcoming active bookings of a business.
    ///
    /// # Errors
    ///
    /// [`BookingError::Unavailable`] when reads keep failing.
    pub async fn business_stats(
        &self,
        business_id: BusinessId,
        today: NaiveDate,
    ) -> Result<BusinessStats, BookingError> {
        let reservations = self
            .list_by_business(business_id, ReservationFilter::all())
            .await?;
        Ok(BusinessStats::tally(&reservations, today))
    }

    /// Wait until no notification is in flight.
    pub async fn drain(&self) {
        self.effects.drain().await;
    }

    /// Stop accepting notifications and wait, up to the configured
    /// shutdown timeout, for those in flight.
    ///
    /// # Errors
    ///
    /// [`EffectError::ShutdownTimeout`] with the number of notifications
    /// still running when the timeout passes.
    pub async fn shutdown(&self) -> Result<(), EffectError> {
        self.effects.shutdown(self.shutdown_timeout).await
    }
}
