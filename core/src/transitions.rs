//! The reservation status machine.
//!
//! ```text
//! pending ──► confirmed ──► completed
//!    │            │
//!    └────────────┴──────► cancelled
//! ```
//!
//! `completed` and `cancelled` are terminal.

use crate::error::BookingError;
use crate::types::ReservationStatus;

/// Statuses reachable in one step from `from`.
#[must_use]
pub const fn successors(from: ReservationStatus) -> &'static [ReservationStatus] {
    match from {
        ReservationStatus::Pending => &[ReservationStatus::Confirmed, ReservationStatus::Cancelled],
        ReservationStatus::Confirmed => &[ReservationStatus::Completed, ReservationStatus::Cancelled],
        ReservationStatus::Completed | ReservationStatus::Cancelled => &[],
    }
}

/// Whether `from → to` is an edge of the machine.
#[must_use]
pub fn is_allowed(from: ReservationStatus, to: ReservationStatus) -> bool {
    successors(from).contains(&to)
}

/// Check a move against the machine.
///
/// # Errors
///
/// Returns [`BookingError::InvalidStateTransition`] carrying the current
/// status when `from` is terminal or `from → to` is not an edge.
pub fn check(from: ReservationStatus, to: ReservationStatus) -> Result<(), BookingError> {
    if from.is_terminal() {
        return Err(BookingError::InvalidStateTransition {
            current: from,
            target: to,
            detail: format!("{from} is a terminal status"),
        });
    }
    if !is_allowed(from, to) {
        return Err(BookingError::InvalidStateTransition {
            current: from,
            target: to,
            detail: format!("{from} cannot move to {to}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ReservationStatus::{Cancelled, Completed, Confirmed, Pending};

    #[test]
    fn machine_edges() {
        assert!(check(Pending, Confirmed).is_ok());
        assert!(check(Pending, Cancelled).is_ok());
        assert!(check(Confirmed, Completed).is_ok());
        assert!(check(Confirmed, Cancelled).is_ok());
        assert!(check(Pending, Completed).is_err());
        assert!(check(Confirmed, Pending).is_err());
        assert!(check(Pending, Pending).is_err());
    }

    #[test]
    fn terminal_error_reports_current_status() {
        let Err(BookingError::InvalidStateTransition { current, .. }) = check(Completed, Cancelled)
        else {
            unreachable!("completed is terminal");
        };
        assert_eq!(current, Completed);
    }

    fn status() -> impl Strategy<Value = ReservationStatus> {
        prop::sample::select(ReservationStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn nothing_leaves_a_terminal_status(path in prop::collection::vec(status(), 0..12)) {
            let mut current = Pending;
            let mut reached_terminal = false;
            for target in path {
                let was_terminal = current.is_terminal();
                if check(current, target).is_ok() {
                    prop_assert!(!was_terminal);
                    current = target;
                }
                if reached_terminal {
                    prop_assert!(current.is_terminal());
                }
                reached_terminal |= current.is_terminal();
            }
        }
    }
}
