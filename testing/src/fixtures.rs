//! Fixtures: a salon open Monday to Saturday, its services, and builders
//! for reservations against it.
//!
//! Dates are chosen after [`test_clock`](crate::test_clock) (2025-01-01), so
//! appointments on [`monday`] lie in the future until the clock is advanced.

#![allow(clippy::unwrap_used)] // Fixture data is hardcoded and valid

use booking_ledger_core::slots::{DayHours, SlotTime};
use booking_ledger_core::types::{
    BusinessId, BusinessProfile, CustomerContact, CustomerId, NewReservation, ReservationStatus,
    Service, ServiceId, WeeklyHours,
};
use chrono::{NaiveDate, Weekday};
use proptest::prelude::*;
use uuid::Uuid;

/// 30-minute haircut
pub const HAIRCUT: ServiceId = ServiceId::from_uuid(Uuid::from_u128(0x5e41_0001));

/// 90-minute color treatment
pub const COLOR: ServiceId = ServiceId::from_uuid(Uuid::from_u128(0x5e41_0002));

/// Fixed id of [`salon`]
pub const SALON: BusinessId = BusinessId::from_uuid(Uuid::from_u128(0xb0_0001));

/// Parse `HH:MM`
#[must_use]
pub fn at(time: &str) -> SlotTime {
    time.parse().unwrap()
}

/// `09:00`–`17:00`
#[must_use]
pub fn nine_to_five() -> DayHours {
    DayHours::new(at("09:00"), at("17:00")).unwrap()
}

/// Open Monday to Saturday 09:00–17:00 (Saturday 10:00–14:00), closed Sunday,
/// UTC, with a haircut and a color service.
#[must_use]
pub fn salon() -> BusinessProfile {
    let weekdays = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ];
    BusinessProfile {
        id: SALON,
        name: "Studio Nine".to_string(),
        weekly_hours: WeeklyHours::uniform(nine_to_five(), &weekdays)
            .with_day(Weekday::Sat, DayHours::new(at("10:00"), at("14:00")).unwrap()),
        services: vec![
            Service {
                id: HAIRCUT,
                name: "Haircut".to_string(),
                duration_minutes: 30,
                price_cents: Some(3_500),
            },
            Service {
                id: COLOR,
                name: "Color".to_string(),
                duration_minutes: 90,
                price_cents: None,
            },
        ],
        utc_offset_minutes: 0,
    }
}

/// 2025-01-06, a Monday
#[must_use]
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
}

/// 2025-01-12, a Sunday (salon closed)
#[must_use]
pub fn sunday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 12).unwrap()
}

/// A pending reservation request for a fresh customer
#[must_use]
pub fn new_reservation(
    business_id: BusinessId,
    date: NaiveDate,
    time: &str,
    duration_minutes: u16,
) -> NewReservation {
    NewReservation {
        business_id,
        customer_id: CustomerId::new(),
        service_id: None,
        date,
        time: at(time),
        duration_minutes,
        status: ReservationStatus::Pending,
        notes: None,
        contact: Some(CustomerContact::named("Grace Hopper")),
        idempotency_key: None,
    }
}

/// Strategy for start times on the half hour within 09:00–16:30
pub fn half_hour_start() -> impl Strategy<Value = SlotTime> {
    (18_u16..34).prop_map(|half_hours| SlotTime::from_minutes(half_hours * 30).unwrap())
}

/// Strategy for start times on any 15-minute boundary within 08:00–17:45
pub fn quarter_hour_start() -> impl Strategy<Value = SlotTime> {
    (32_u16..72).prop_map(|quarters| SlotTime::from_minutes(quarters * 15).unwrap())
}

/// Strategy for appointment lengths between 15 and 120 minutes
pub fn duration() -> impl Strategy<Value = u16> {
    prop::sample::select(vec![15_u16, 30, 45, 60, 90, 120])
}

/// Strategy for any reservation status
pub fn status() -> impl Strategy<Value = ReservationStatus> {
    prop::sample::select(ReservationStatus::ALL.to_vec())
}
