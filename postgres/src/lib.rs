//! `PostgreSQL` reservation store for the booking ledger.
//!
//! This crate provides a PostgreSQL-based store that implements the
//! `ReservationStore` trait from `booking-ledger-core`. It supports:
//!
//! - Conditional admission: the overlap check and the insert run in one
//!   transaction serialized per business and date by an advisory lock
//! - Idempotent creates keyed on `(customer_id, idempotency_key)`
//! - Guarded status updates (`SELECT ... FOR UPDATE`)
//! - Connection pooling and embedded migrations
//!
//! # Example
//!
//! ```no_run
//! use booking_ledger_postgres::PostgresReservationStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresReservationStore::connect("postgres://localhost/bookings", 10).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod reservations;

pub use reservations::PostgresReservationStore;
