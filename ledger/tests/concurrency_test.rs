//! Racing admissions: no double booking, however requests interleave.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code fails loudly

use booking_ledger::config::BookingConfig;
use booking_ledger::{BookingLedger, BookingRequest, LedgerEnvironment};
use booking_ledger_core::BookingError;
use booking_ledger_core::environment::NoopNotifier;
use booking_ledger_core::slots::SlotTime;
use booking_ledger_core::types::{CustomerId, Reservation, ReservationId};
use booking_ledger_runtime::RetryPolicy;
use booking_ledger_testing::fixtures::{self, at, monday};
use booking_ledger_testing::{InMemoryReservationStore, StaticDirectory, test_clock};
use chrono::Duration as ChronoDuration;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn ledger_over(store: &InMemoryReservationStore) -> BookingLedger {
    let env = LedgerEnvironment {
        store: Arc::new(store.clone()),
        directory: Arc::new(StaticDirectory::new().with(fixtures::salon())),
        notifier: Arc::new(NoopNotifier),
        clock: Arc::new(test_clock()),
    };
    BookingLedger::new(env, &BookingConfig::default(), RetryPolicy::none())
}

async fn race(ledger: &BookingLedger, requests: Vec<BookingRequest>) -> Vec<Result<Reservation, BookingError>> {
    let attempts = requests.into_iter().map(|request| {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.create(request).await })
    });
    futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("admission task panicked"))
        .collect()
}

fn assert_no_overlap(reservations: &[Reservation]) {
    let active: Vec<_> = reservations.iter().filter(|r| r.status.is_active()).collect();
    for (i, a) in active.iter().enumerate() {
        for b in &active[i + 1..] {
            if a.business_id == b.business_id && a.date == b.date {
                assert!(
                    !a.interval().overlaps(&b.interval()),
                    "double booking: {} {} and {} {}",
                    a.time,
                    a.duration_minutes,
                    b.time,
                    b.duration_minutes
                );
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_concurrent_requests_admit_exactly_one() {
    let store = InMemoryReservationStore::new();
    store.set_latency(Duration::from_millis(5));
    let ledger = ledger_over(&store);

    let requests = (0..2)
        .map(|_| BookingRequest::new(fixtures::SALON, CustomerId::new(), monday(), at("10:00")))
        .collect();
    let results = race(&ledger, requests).await;

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(BookingError::SlotConflict { .. })))
        .count();
    assert_eq!((admitted, conflicts), (1, 1), "{results:?}");
    assert_eq!(store.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admission_lock_alone_prevents_double_booking() {
    // The store accepts anything, so only the resolver stands in the way
    let store = InMemoryReservationStore::new();
    store.set_unconditional(true);
    store.set_latency(Duration::from_millis(5));
    let ledger = ledger_over(&store);

    let requests = (0..16)
        .map(|_| BookingRequest::new(fixtures::SALON, CustomerId::new(), monday(), at("14:00")))
        .collect();
    let results = race(&ledger, requests).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_conflict_names_the_occupying_reservation() {
    let store = InMemoryReservationStore::new();
    let ledger = ledger_over(&store);
    let earlier = fixtures::new_reservation(fixtures::SALON, monday(), "10:00", 30)
        .into_reservation(ReservationId::new(), chrono::Utc::now());
    store.insert(earlier.clone());

    let result = ledger
        .create(BookingRequest::new(fixtures::SALON, CustomerId::new(), monday(), at("10:00")))
        .await;
    let Err(BookingError::SlotConflict { conflicting, .. }) = result else {
        panic!("expected a slot conflict, got {result:?}");
    };
    assert_eq!(conflicting, Some(earlier.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_dates_do_not_wait_for_each_other() {
    let store = InMemoryReservationStore::new();
    store.set_latency(Duration::from_millis(50));
    let ledger = ledger_over(&store);

    // Each admission makes two store calls, so eight serialized admissions
    // would take at least 800ms
    let requests = (0..8)
        .map(|day| {
            let date = monday() + ChronoDuration::weeks(day);
            BookingRequest::new(fixtures::SALON, CustomerId::new(), date, at("10:00"))
        })
        .collect();

    let started = Instant::now();
    let results = race(&ledger, requests).await;
    let elapsed = started.elapsed();

    assert!(results.iter().all(Result::is_ok), "{results:?}");
    assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
}

fn booking() -> impl Strategy<Value = (SlotTime, bool)> {
    (fixtures::quarter_hour_start(), any::<bool>())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn concurrent_admissions_never_overlap(bookings in prop::collection::vec(booking(), 2..12)) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let store = InMemoryReservationStore::new();
            store.set_unconditional(true);
            let ledger = ledger_over(&store);

            let requests = bookings
                .iter()
                .map(|(time, color)| {
                    let request =
                        BookingRequest::new(fixtures::SALON, CustomerId::new(), monday(), *time);
                    if *color { request.with_service(fixtures::COLOR) } else { request }
                })
                .collect();
            let results = race(&ledger, requests).await;

            for result in &results {
                let expected = matches!(
                    result,
                    Ok(_) | Err(BookingError::SlotConflict { .. } | BookingError::Validation(_))
                );
                prop_assert!(expected, "unexpected outcome {:?}", result);
            }
            let admitted = results.iter().filter(|r| r.is_ok()).count();
            prop_assert_eq!(admitted, store.len());
            assert_no_overlap(&store.all());
            Ok(())
        })?;
    }
}
