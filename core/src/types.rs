//! Domain types for the booking ledger.
//!
//! Identifiers, the reservation record and its status, the input and patch
//! shapes accepted by the store, the acting party of a request, and the
//! business profile the ledger reads from its directory.

use crate::slots::{DayHours, SlotTime, TimeRange};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a reservation
    ReservationId
);
uuid_id!(
    /// Unique identifier for a business
    BusinessId
);
uuid_id!(
    /// Unique identifier for a customer
    CustomerId
);
uuid_id!(
    /// Unique identifier for a service in a business catalog
    ServiceId
);

/// Client-generated token identifying one logical booking request.
///
/// Retrying a request with the same key returns the reservation created by
/// the first successful attempt instead of booking twice.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Minimum accepted key length
    pub const MIN_LEN: usize = 16;
    /// Maximum accepted key length
    pub const MAX_LEN: usize = 128;

    /// Validate and wrap a key.
    ///
    /// # Errors
    ///
    /// Returns a message when the key is shorter than 16 or longer than 128
    /// characters.
    pub fn new(key: impl Into<String>) -> Result<Self, String> {
        let key = key.into();
        let len = key.chars().count();
        if (Self::MIN_LEN..=Self::MAX_LEN).contains(&len) {
            Ok(Self(key))
        } else {
            Err(format!(
                "idempotency key must be between {} and {} characters",
                Self::MIN_LEN,
                Self::MAX_LEN
            ))
        }
    }

    /// The key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// Reservation lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Requested by the customer, awaiting the business
    Pending,
    /// Accepted by the business
    Confirmed,
    /// Appointment took place
    Completed,
    /// Withdrawn by either party
    Cancelled,
}

impl ReservationStatus {
    /// Every status, in lifecycle order
    pub const ALL: [Self; 4] = [
        Self::Pending,
        Self::Confirmed,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Statuses that hold capacity and take part in conflict checks
    pub const ACTIVE: [Self; 2] = [Self::Pending, Self::Confirmed];

    /// No transition leaves a terminal status
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether the reservation currently occupies its slot
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Lowercase wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown reservation status '{s}'"))
    }
}

/// Contact details the customer left with the booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerContact {
    /// Display name
    pub name: String,
    /// Optional email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Optional phone number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl CustomerContact {
    /// Contact with only a name
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: None,
            phone: None,
        }
    }
}

/// A persisted reservation record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Assigned by the store
    pub id: ReservationId,
    /// Owning business, immutable
    pub business_id: BusinessId,
    /// Requesting customer, immutable
    pub customer_id: CustomerId,
    /// Booked service, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
    /// Calendar date
    pub date: NaiveDate,
    /// Business-local start time
    pub time: SlotTime,
    /// Length of the appointment
    pub duration_minutes: u16,
    /// Lifecycle status
    pub status: ReservationStatus,
    /// Free-form customer text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Customer contact details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<CustomerContact>,
    /// Token of the request that created this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<IdempotencyKey>,
    /// Set by the store on creation
    pub created_at: DateTime<Utc>,
    /// Set by the store on every mutation
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// The occupied interval `[time, time + duration)`.
    ///
    /// Records are validated on creation so the end never passes midnight;
    /// should one do so anyway the interval is clamped to `24:00`.
    #[must_use]
    pub fn interval(&self) -> TimeRange {
        TimeRange {
            start: self.time,
            end: self
                .time
                .checked_add(self.duration_minutes)
                .unwrap_or(SlotTime::END_OF_DAY),
        }
    }

    /// Absolute start instant given the business's UTC offset.
    #[must_use]
    pub fn starts_at(&self, utc_offset_minutes: i32) -> Option<DateTime<Utc>> {
        let offset = FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?;
        let local = self.date.and_time(self.time.to_naive_time()?);
        offset
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Input to [`ReservationStore::create`](crate::store::ReservationStore::create):
/// a reservation minus id and timestamps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReservation {
    /// Owning business
    pub business_id: BusinessId,
    /// Requesting customer
    pub customer_id: CustomerId,
    /// Booked service
    pub service_id: Option<ServiceId>,
    /// Calendar date
    pub date: NaiveDate,
    /// Start time
    pub time: SlotTime,
    /// Appointment length
    pub duration_minutes: u16,
    /// Initial status
    pub status: ReservationStatus,
    /// Customer notes
    pub notes: Option<String>,
    /// Contact details
    pub contact: Option<CustomerContact>,
    /// Idempotency token
    pub idempotency_key: Option<IdempotencyKey>,
}

impl NewReservation {
    /// The interval this reservation would occupy, if well formed.
    #[must_use]
    pub const fn interval(&self) -> Option<TimeRange> {
        TimeRange::starting_at(self.time, self.duration_minutes)
    }

    /// Check the fields every store requires.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.duration_minutes == 0 {
            return Err("duration must be positive".to_string());
        }
        if self.interval().is_none() {
            return Err(format!(
                "{} plus {} minutes runs past the end of the day",
                self.time, self.duration_minutes
            ));
        }
        if let Some(contact) = &self.contact {
            if contact.name.trim().is_empty() {
                return Err("contact name must not be empty".to_string());
            }
        }
        Ok(())
    }

    /// Materialize the record once the store has chosen an id and a timestamp.
    #[must_use]
    pub fn into_reservation(self, id: ReservationId, now: DateTime<Utc>) -> Reservation {
        Reservation {
            id,
            business_id: self.business_id,
            customer_id: self.customer_id,
            service_id: self.service_id,
            date: self.date,
            time: self.time,
            duration_minutes: self.duration_minutes,
            status: self.status,
            notes: self.notes,
            contact: self.contact,
            idempotency_key: self.idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a reservation.
///
/// `business_id`, `customer_id`, `date` and `time` are immutable and have no
/// counterpart here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    /// Replace notes (`Some(None)` clears them)
    pub notes: Option<Option<String>>,
    /// Replace contact (`Some(None)` clears it)
    pub contact: Option<Option<CustomerContact>>,
    /// New status
    pub status: Option<ReservationStatus>,
    /// Apply only if the stored status still equals this one
    pub expected_status: Option<ReservationStatus>,
}

impl ReservationPatch {
    /// Patch that moves the status, guarded on the status it was decided from.
    #[must_use]
    pub const fn transition(from: ReservationStatus, to: ReservationStatus) -> Self {
        Self {
            notes: None,
            contact: None,
            status: Some(to),
            expected_status: Some(from),
        }
    }

    /// Set notes
    #[must_use]
    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = Some(notes);
        self
    }

    /// Set contact
    #[must_use]
    pub fn with_contact(mut self, contact: Option<CustomerContact>) -> Self {
        self.contact = Some(contact);
        self
    }

    /// Guard on the current status
    #[must_use]
    pub const fn expecting(mut self, status: ReservationStatus) -> Self {
        self.expected_status = Some(status);
        self
    }

    /// Merge into a record. Does not touch `updated_at`.
    pub fn apply_to(self, reservation: &mut Reservation) {
        if let Some(notes) = self.notes {
            reservation.notes = notes;
        }
        if let Some(contact) = self.contact {
            reservation.contact = contact;
        }
        if let Some(status) = self.status {
            reservation.status = status;
        }
    }
}

/// Query filter for business listings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationFilter {
    /// Accepted statuses; empty accepts all
    #[serde(default)]
    pub statuses: Vec<ReservationStatus>,
    /// Restrict to one date
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl ReservationFilter {
    /// Accept everything
    #[must_use]
    pub const fn all() -> Self {
        Self {
            statuses: Vec::new(),
            date: None,
        }
    }

    /// Only one status
    #[must_use]
    pub fn with_status(status: ReservationStatus) -> Self {
        Self {
            statuses: vec![status],
            date: None,
        }
    }

    /// Pending and confirmed reservations on one date
    #[must_use]
    pub fn active_on(date: NaiveDate) -> Self {
        Self {
            statuses: ReservationStatus::ACTIVE.to_vec(),
            date: Some(date),
        }
    }

    /// Whether a record passes this filter
    #[must_use]
    pub fn matches(&self, reservation: &Reservation) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&reservation.status))
            && self.date.is_none_or(|date| reservation.date == date)
    }
}

// ============================================================================
// Actors
// ============================================================================

/// Role of the party making a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    /// A customer acting on their own bookings
    Customer,
    /// A business owner acting on bookings made with them
    Business,
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer => f.write_str("customer"),
            Self::Business => f.write_str("business"),
        }
    }
}

/// The authenticated party behind a request, passed explicitly to every call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "lowercase")]
pub enum Actor {
    /// Customer identity
    Customer(CustomerId),
    /// Business owner identity
    Business(BusinessId),
}

impl Actor {
    /// The actor's role
    #[must_use]
    pub const fn role(&self) -> ActorRole {
        match self {
            Self::Customer(_) => ActorRole::Customer,
            Self::Business(_) => ActorRole::Business,
        }
    }

    /// The raw identifier, whatever the role
    #[must_use]
    pub const fn id(&self) -> &Uuid {
        match self {
            Self::Customer(id) => id.as_uuid(),
            Self::Business(id) => id.as_uuid(),
        }
    }

    /// Rebuild an actor from the `(actorId, actorRole)` pair of a request.
    #[must_use]
    pub const fn from_parts(id: Uuid, role: ActorRole) -> Self {
        match role {
            ActorRole::Customer => Self::Customer(CustomerId::from_uuid(id)),
            ActorRole::Business => Self::Business(BusinessId::from_uuid(id)),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role(), self.id())
    }
}

// ============================================================================
// Business profile (read from the directory)
// ============================================================================

/// A bookable service from a business catalog
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service identifier
    pub id: ServiceId,
    /// Display name
    pub name: String,
    /// Appointment length
    pub duration_minutes: u16,
    /// Optional price in cents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<u64>,
}

/// Opening hours for each weekday
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyHours([Option<DayHours>; 7]);

impl WeeklyHours {
    /// Closed every day
    #[must_use]
    pub const fn closed() -> Self {
        Self([None; 7])
    }

    /// The same hours on each of the given weekdays, closed otherwise
    #[must_use]
    pub fn uniform(hours: DayHours, days: &[Weekday]) -> Self {
        days.iter()
            .fold(Self::closed(), |week, day| week.with_day(*day, hours))
    }

    /// Set the hours of one weekday
    #[must_use]
    pub fn with_day(mut self, day: Weekday, hours: DayHours) -> Self {
        self.0[day.num_days_from_monday() as usize] = Some(hours);
        self
    }

    /// Close one weekday
    #[must_use]
    pub fn without_day(mut self, day: Weekday) -> Self {
        self.0[day.num_days_from_monday() as usize] = None;
        self
    }

    /// Hours of a weekday
    #[must_use]
    pub fn on(&self, day: Weekday) -> Option<DayHours> {
        self.0[day.num_days_from_monday() as usize]
    }

    /// Hours that apply on a calendar date
    #[must_use]
    pub fn for_date(&self, date: NaiveDate) -> Option<DayHours> {
        self.on(date.weekday())
    }
}

/// The parts of a business profile the ledger needs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessProfile {
    /// Business identifier
    pub id: BusinessId,
    /// Display name
    pub name: String,
    /// Opening hours per weekday
    pub weekly_hours: WeeklyHours,
    /// Service catalog
    #[serde(default)]
    pub services: Vec<Service>,
    /// Offset of business-local time from UTC
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl BusinessProfile {
    /// Look up a service in the catalog
    #[must_use]
    pub fn service(&self, id: ServiceId) -> Option<&Service> {
        self.services.iter().find(|service| service.id == id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> Reservation {
        NewReservation {
            business_id: BusinessId::new(),
            customer_id: CustomerId::new(),
            service_id: None,
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            time: "10:00".parse().unwrap(),
            duration_minutes: 30,
            status: ReservationStatus::Pending,
            notes: Some("window seat".to_string()),
            contact: Some(CustomerContact::named("Ada")),
            idempotency_key: None,
        }
        .into_reservation(ReservationId::new(), Utc::now())
    }

    #[test]
    fn status_wire_names_round_trip() {
        for status in ReservationStatus::ALL {
            assert_eq!(status.as_str().parse::<ReservationStatus>(), Ok(status));
        }
        assert!("archived".parse::<ReservationStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&ReservationStatus::Confirmed).unwrap(),
            "\"confirmed\""
        );
    }

    #[test]
    fn reservation_serializes_in_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("businessId").is_some());
        assert!(json.get("durationMinutes").is_some());
        assert_eq!(json["time"], "10:00");
        assert_eq!(json["date"], "2025-03-10");
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn patch_merges_only_given_fields() {
        let mut reservation = sample();
        ReservationPatch::default()
            .with_notes(None)
            .apply_to(&mut reservation);
        assert_eq!(reservation.notes, None);
        assert_eq!(reservation.status, ReservationStatus::Pending);
        assert!(reservation.contact.is_some());
    }

    #[test]
    fn validation_rejects_overnight_and_blank_names() {
        let base = NewReservation {
            business_id: BusinessId::new(),
            customer_id: CustomerId::new(),
            service_id: None,
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            time: "23:45".parse().unwrap(),
            duration_minutes: 30,
            status: ReservationStatus::Pending,
            notes: None,
            contact: None,
            idempotency_key: None,
        };
        assert!(base.validate().is_err());

        let blank = NewReservation {
            time: "10:00".parse().unwrap(),
            contact: Some(CustomerContact::named("  ")),
            ..base
        };
        assert!(blank.validate().is_err());
    }

    #[test]
    fn idempotency_key_length_is_bounded() {
        assert!(IdempotencyKey::new("short").is_err());
        assert!(IdempotencyKey::new("a".repeat(129)).is_err());
        assert!(IdempotencyKey::new("550e8400-e29b-41d4").is_ok());
    }

    #[test]
    fn starts_at_uses_business_offset() {
        let reservation = sample();
        let start = reservation.starts_at(120).unwrap();
        assert_eq!(start.to_rfc3339(), "2025-03-10T08:00:00+00:00");
    }

    #[test]
    fn weekly_hours_lookup_by_date() {
        let hours = DayHours::new("09:00".parse().unwrap(), "17:00".parse().unwrap()).unwrap();
        let week = WeeklyHours::uniform(hours, &[Weekday::Mon, Weekday::Tue]);
        // 2025-03-10 is a Monday, 2025-03-12 a Wednesday
        assert_eq!(week.for_date(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()), Some(hours));
        assert_eq!(week.for_date(NaiveDate::from_ymd_opt(2025, 3, 12).unwrap()), None);
    }

    #[test]
    fn actor_from_parts_matches_role() {
        let id = Uuid::new_v4();
        assert_eq!(
            Actor::from_parts(id, ActorRole::Business),
            Actor::Business(BusinessId::from_uuid(id))
        );
        assert_eq!(Actor::from_parts(id, ActorRole::Customer).role(), ActorRole::Customer);
    }
}
