//! Capability checks: who may do what to a reservation.
//!
//! Every authorization decision in the ledger goes through [`authorize`], so
//! role rules live in one place instead of being scattered through call sites.

use crate::error::{BookingError, DenyReason};
use crate::types::{Actor, Reservation, ReservationStatus};

/// Something an actor may want to do with a reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Read the record
    View,
    /// Move `pending → confirmed`
    Confirm,
    /// Move `confirmed → completed`
    Complete,
    /// Move to `cancelled`
    Cancel,
    /// Physically remove the record
    Delete,
    /// Change notes or contact details
    EditDetails,
}

impl Capability {
    /// The capability needed to move a reservation into `target`.
    ///
    /// `pending` is only ever an initial status, so nothing grants it.
    #[must_use]
    pub const fn for_target(target: ReservationStatus) -> Option<Self> {
        match target {
            ReservationStatus::Pending => None,
            ReservationStatus::Confirmed => Some(Self::Confirm),
            ReservationStatus::Completed => Some(Self::Complete),
            ReservationStatus::Cancelled => Some(Self::Cancel),
        }
    }
}

/// Outcome of a capability check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// The actor may proceed
    Allow,
    /// The actor is refused
    Deny(DenyReason),
}

impl Decision {
    /// Whether the actor may proceed
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Convert into a ledger result.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Authorization`] for a denial.
    pub const fn into_result(self) -> Result<(), BookingError> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(BookingError::Authorization { reason }),
        }
    }
}

/// Whether the actor owns either side of the reservation.
#[must_use]
pub fn owns(actor: &Actor, reservation: &Reservation) -> bool {
    match actor {
        Actor::Customer(id) => *id == reservation.customer_id,
        Actor::Business(id) => *id == reservation.business_id,
    }
}

/// Decide whether `actor` may exercise `capability` on `reservation`.
///
/// Ownership is checked first: an actor that owns neither side is always
/// denied with [`DenyReason::NotOwner`], whatever the capability.
#[must_use]
pub fn authorize(actor: &Actor, reservation: &Reservation, capability: Capability) -> Decision {
    if !owns(actor, reservation) {
        return Decision::Deny(DenyReason::NotOwner);
    }

    let permitted = match actor {
        Actor::Business(_) => matches!(
            capability,
            Capability::View | Capability::Confirm | Capability::Complete | Capability::Cancel
        ),
        Actor::Customer(_) => matches!(
            capability,
            Capability::View | Capability::Cancel | Capability::Delete | Capability::EditDetails
        ),
    };

    if permitted {
        Decision::Allow
    } else {
        Decision::Deny(DenyReason::RoleNotPermitted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{BusinessId, CustomerId, NewReservation, ReservationId};
    use chrono::{NaiveDate, Utc};

    fn reservation() -> Reservation {
        NewReservation {
            business_id: BusinessId::new(),
            customer_id: CustomerId::new(),
            service_id: None,
            date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            time: "11:00".parse().unwrap(),
            duration_minutes: 30,
            status: ReservationStatus::Pending,
            notes: None,
            contact: None,
            idempotency_key: None,
        }
        .into_reservation(ReservationId::new(), Utc::now())
    }

    #[test]
    fn strangers_are_never_owners() {
        let r = reservation();
        let caps = [
            Capability::View,
            Capability::Confirm,
            Capability::Complete,
            Capability::Cancel,
            Capability::Delete,
            Capability::EditDetails,
        ];
        for actor in [Actor::Customer(CustomerId::new()), Actor::Business(BusinessId::new())] {
            for cap in caps {
                assert_eq!(authorize(&actor, &r, cap), Decision::Deny(DenyReason::NotOwner));
            }
        }
    }

    #[test]
    fn business_confirms_customer_cannot() {
        let r = reservation();
        assert!(authorize(&Actor::Business(r.business_id), &r, Capability::Confirm).is_allowed());
        assert_eq!(
            authorize(&Actor::Customer(r.customer_id), &r, Capability::Confirm),
            Decision::Deny(DenyReason::RoleNotPermitted)
        );
    }

    #[test]
    fn both_owners_may_cancel() {
        let r = reservation();
        assert!(authorize(&Actor::Business(r.business_id), &r, Capability::Cancel).is_allowed());
        assert!(authorize(&Actor::Customer(r.customer_id), &r, Capability::Cancel).is_allowed());
    }

    #[test]
    fn only_customer_deletes() {
        let r = reservation();
        assert!(authorize(&Actor::Customer(r.customer_id), &r, Capability::Delete).is_allowed());
        assert!(
            authorize(&Actor::Business(r.business_id), &r, Capability::Delete)
                .into_result()
                .is_err()
        );
    }

    #[test]
    fn nothing_grants_pending() {
        assert_eq!(Capability::for_target(ReservationStatus::Pending), None);
        assert_eq!(
            Capability::for_target(ReservationStatus::Completed),
            Some(Capability::Complete)
        );
    }
}
