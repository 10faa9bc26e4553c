//! `PostgreSQL` implementation of [`ReservationStore`].
//!
//! # Atomic sections
//!
//! - `create` takes a transaction-scoped advisory lock on
//!   `(business_id, date)`, then checks the idempotency key, then the
//!   overlap, then inserts. Two creates for the same day sheet cannot
//!   interleave, even from different processes.
//! - `update` and `delete` lock the row with `SELECT ... FOR UPDATE` and
//!   decide on the locked copy.

use booking_ledger_core::environment::{Clock, SystemClock};
use booking_ledger_core::error::DenyReason;
use booking_ledger_core::slots::SlotTime;
use booking_ledger_core::store::{ReservationStore, StoreError, StoreFuture, deletable};
use booking_ledger_core::types::{
    BusinessId, CustomerContact, CustomerId, IdempotencyKey, NewReservation, Reservation,
    ReservationFilter, ReservationId, ReservationPatch, ServiceId,
};
use booking_ledger_runtime::metrics::StoreMetrics;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const COLUMNS: &str = "id, business_id, customer_id, service_id, date, start_minute, \
     duration_minutes, status, notes, contact_name, contact_email, contact_phone, \
     idempotency_key, created_at, updated_at";

/// `PostgreSQL`-backed reservation store.
///
/// Cloning is cheap: clones share the connection pool.
#[derive(Clone)]
pub struct PostgresReservationStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresReservationStore {
    /// Wrap an existing pool. Timestamps come from the system clock.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// Connect a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections, "Connected reservation store");
        Ok(Self::new(pool))
    }

    /// Use `clock` for `created_at` and `updated_at`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn create_now(&self, new: NewReservation) -> Result<Reservation, StoreError> {
        new.validate().map_err(StoreError::Validation)?;
        let interval = new
            .interval()
            .ok_or_else(|| StoreError::Validation("invalid interval".to_string()))?;

        let mut tx = self.pool.begin().await.map_err(backend)?;

        // Serializes every create on this day sheet until commit or rollback.
        sqlx::query(
            "SELECT pg_advisory_xact_lock(hashtext($1::text), $2::date - DATE '2000-01-01')",
        )
        .bind(new.business_id.as_uuid())
        .bind(new.date)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if let Some(key) = &new.idempotency_key {
            let earlier = sqlx::query_as::<_, ReservationRow>(&format!(
                "SELECT {COLUMNS} FROM reservations WHERE customer_id = $1 AND idempotency_key = $2"
            ))
            .bind(new.customer_id.as_uuid())
            .bind(key.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;

            if let Some(earlier) = earlier {
                tracing::debug!(
                    customer_id = %new.customer_id,
                    reservation_id = %earlier.id,
                    "Idempotency key matched an existing reservation"
                );
                return earlier.into_reservation();
            }
        }

        if new.status.is_active() {
            let conflicting: Option<(Uuid,)> = sqlx::query_as(
                r"
                SELECT id FROM reservations
                WHERE business_id = $1
                  AND date = $2
                  AND status IN ('pending', 'confirmed')
                  AND start_minute < $4
                  AND $3 < end_minute
                ORDER BY start_minute
                LIMIT 1
                ",
            )
            .bind(new.business_id.as_uuid())
            .bind(new.date)
            .bind(i32::from(interval.start.minutes()))
            .bind(i32::from(interval.end.minutes()))
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;

            if let Some((id,)) = conflicting {
                return Err(StoreError::Conflict {
                    date: new.date,
                    requested: interval,
                    conflicting: Some(ReservationId::from_uuid(id)),
                });
            }
        }

        let customer_id = new.customer_id;
        let key = new.idempotency_key.clone();
        let record = new.into_reservation(ReservationId::new(), self.clock.now());
        let (contact_name, contact_email, contact_phone) = contact_columns(record.contact.as_ref());

        let inserted = sqlx::query_as::<_, ReservationRow>(&format!(
            r"
            INSERT INTO reservations ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {COLUMNS}
            "
        ))
        .bind(record.id.as_uuid())
        .bind(record.business_id.as_uuid())
        .bind(record.customer_id.as_uuid())
        .bind(record.service_id.as_ref().map(ServiceId::as_uuid))
        .bind(record.date)
        .bind(i32::from(record.time.minutes()))
        .bind(i32::from(record.duration_minutes))
        .bind(record.status.as_str())
        .bind(record.notes.as_deref())
        .bind(contact_name)
        .bind(contact_email)
        .bind(contact_phone)
        .bind(record.idempotency_key.as_ref().map(IdempotencyKey::as_str))
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // Same key raced in through another day sheet's lock.
                drop(tx);
                let Some(key) = key else {
                    return Err(StoreError::Backend(db_err.to_string()));
                };
                return self
                    .find_now(customer_id, key)
                    .await?
                    .ok_or_else(|| StoreError::Backend(db_err.to_string()));
            },
            Err(e) => return Err(backend(e)),
        };

        tx.commit().await.map_err(backend)?;
        row.into_reservation()
    }

    async fn get_now(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .map(ReservationRow::into_reservation)
        .transpose()
    }

    async fn list_business_now(
        &self,
        business_id: BusinessId,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, StoreError> {
        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|status| status.as_str().to_string())
            .collect();

        sqlx::query_as::<_, ReservationRow>(&format!(
            r"
            SELECT {COLUMNS} FROM reservations
            WHERE business_id = $1
              AND (cardinality($2::text[]) = 0 OR status = ANY($2::text[]))
              AND ($3::date IS NULL OR date = $3)
            ORDER BY date, start_minute, created_at
            "
        ))
        .bind(business_id.as_uuid())
        .bind(statuses)
        .bind(filter.date)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(ReservationRow::into_reservation)
        .collect()
    }

    async fn list_customer_now(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<Reservation>, StoreError> {
        sqlx::query_as::<_, ReservationRow>(&format!(
            r"
            SELECT {COLUMNS} FROM reservations
            WHERE customer_id = $1
            ORDER BY date DESC, start_minute DESC, created_at DESC
            "
        ))
        .bind(customer_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(ReservationRow::into_reservation)
        .collect()
    }

    async fn update_now(
        &self,
        id: ReservationId,
        patch: ReservationPatch,
    ) -> Result<Reservation, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let mut record = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {COLUMNS} FROM reservations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound(id))?
        .into_reservation()?;

        if let Some(expected) = patch.expected_status {
            if record.status != expected {
                return Err(StoreError::StatusMismatch {
                    current: record.status,
                });
            }
        }

        patch.apply_to(&mut record);
        let updated_at = self.clock.now().max(record.created_at);
        let (contact_name, contact_email, contact_phone) = contact_columns(record.contact.as_ref());

        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            r"
            UPDATE reservations
            SET status = $2, notes = $3, contact_name = $4, contact_email = $5,
                contact_phone = $6, updated_at = $7
            WHERE id = $1
            RETURNING {COLUMNS}
            "
        ))
        .bind(id.as_uuid())
        .bind(record.status.as_str())
        .bind(record.notes.as_deref())
        .bind(contact_name)
        .bind(contact_email)
        .bind(contact_phone)
        .bind(updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        row.into_reservation()
    }

    async fn delete_now(
        &self,
        id: ReservationId,
        requesting_customer: CustomerId,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let (customer_id, status): (Uuid, String) = sqlx::query_as(
            "SELECT customer_id, status FROM reservations WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?
        .ok_or(StoreError::NotFound(id))?;

        if CustomerId::from_uuid(customer_id) != requesting_customer {
            return Err(StoreError::Forbidden(DenyReason::NotOwner));
        }
        let current = status.parse().map_err(StoreError::Backend)?;
        if !deletable(current) {
            return Err(StoreError::InvalidState { current });
        }

        sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn find_now(
        &self,
        customer_id: CustomerId,
        key: IdempotencyKey,
    ) -> Result<Option<Reservation>, StoreError> {
        sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {COLUMNS} FROM reservations WHERE customer_id = $1 AND idempotency_key = $2"
        ))
        .bind(customer_id.as_uuid())
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .map(ReservationRow::into_reservation)
        .transpose()
    }
}

impl ReservationStore for PostgresReservationStore {
    fn create(&self, reservation: NewReservation) -> StoreFuture<'_, Reservation> {
        Box::pin(timed("create", self.create_now(reservation)))
    }

    fn get(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(timed("get", self.get_now(id)))
    }

    fn list_by_business(
        &self,
        business_id: BusinessId,
        filter: ReservationFilter,
    ) -> StoreFuture<'_, Vec<Reservation>> {
        Box::pin(timed(
            "list_by_business",
            self.list_business_now(business_id, filter),
        ))
    }

    fn list_by_customer(&self, customer_id: CustomerId) -> StoreFuture<'_, Vec<Reservation>> {
        Box::pin(timed("list_by_customer", self.list_customer_now(customer_id)))
    }

    fn update(&self, id: ReservationId, patch: ReservationPatch) -> StoreFuture<'_, Reservation> {
        Box::pin(timed("update", self.update_now(id, patch)))
    }

    fn delete(&self, id: ReservationId, requesting_customer: CustomerId) -> StoreFuture<'_, ()> {
        Box::pin(timed("delete", self.delete_now(id, requesting_customer)))
    }

    fn find_by_idempotency_key(
        &self,
        customer_id: CustomerId,
        key: IdempotencyKey,
    ) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(timed("find_by_idempotency_key", self.find_now(customer_id, key)))
    }
}

/// Record latency for every call and count backend failures.
async fn timed<T>(
    operation: &'static str,
    query: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    let started = Instant::now();
    let result = query.await;
    StoreMetrics::record_query(operation, started.elapsed());

    if let Err(StoreError::Backend(message)) = &result {
        StoreMetrics::record_error(operation);
        tracing::warn!(operation, error = %message, "Reservation store query failed");
    }
    result
}

fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn contact_columns(
    contact: Option<&CustomerContact>,
) -> (Option<&str>, Option<&str>, Option<&str>) {
    contact.map_or((None, None, None), |c| {
        (Some(c.name.as_str()), c.email.as_deref(), c.phone.as_deref())
    })
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    business_id: Uuid,
    customer_id: Uuid,
    service_id: Option<Uuid>,
    date: NaiveDate,
    start_minute: i32,
    duration_minutes: i32,
    status: String,
    notes: Option<String>,
    contact_name: Option<String>,
    contact_email: Option<String>,
    contact_phone: Option<String>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ReservationRow {
    fn into_reservation(self) -> Result<Reservation, StoreError> {
        let id = self.id;
        let corrupt =
            |column: &str| StoreError::Backend(format!("reservation {id} has invalid {column}"));

        let time = u16::try_from(self.start_minute)
            .ok()
            .and_then(SlotTime::from_minutes)
            .ok_or_else(|| corrupt("start_minute"))?;
        let duration_minutes =
            u16::try_from(self.duration_minutes).map_err(|_| corrupt("duration_minutes"))?;
        let status = self.status.parse().map_err(StoreError::Backend)?;
        let idempotency_key = self
            .idempotency_key
            .map(IdempotencyKey::new)
            .transpose()
            .map_err(StoreError::Backend)?;
        let contact = self.contact_name.map(|name| CustomerContact {
            name,
            email: self.contact_email,
            phone: self.contact_phone,
        });

        Ok(Reservation {
            id: ReservationId::from_uuid(self.id),
            business_id: BusinessId::from_uuid(self.business_id),
            customer_id: CustomerId::from_uuid(self.customer_id),
            service_id: self.service_id.map(ServiceId::from_uuid),
            date: self.date,
            time,
            duration_minutes,
            status,
            notes: self.notes,
            contact,
            idempotency_key,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
