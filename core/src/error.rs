//! Error taxonomy surfaced to callers of the booking ledger.

use crate::slots::TimeRange;
use crate::types::{ReservationId, ReservationStatus};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for ledger operations
pub type Result<T> = std::result::Result<T, BookingError>;

/// Stable category of a [`BookingError`], suitable for mapping to UI messages
/// or status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing input
    Validation,
    /// Requested interval is taken
    SlotConflict,
    /// Actor lacks rights for the mutation
    Authorization,
    /// Transition not permitted from the current status
    InvalidStateTransition,
    /// Operation not permitted in the current status
    InvalidState,
    /// Referenced record does not exist
    NotFound,
    /// Backend unreachable or failing
    Unavailable,
    /// Operation did not finish in time
    Timeout,
}

impl ErrorKind {
    /// `snake_case` label, used as a metrics tag
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::SlotConflict => "slot_conflict",
            Self::Authorization => "authorization",
            Self::InvalidStateTransition => "invalid_state_transition",
            Self::InvalidState => "invalid_state",
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
        }
    }
}

/// Why an actor was refused
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Actor is neither the owning business nor the owning customer
    NotOwner,
    /// Actor owns the record but their role may not perform this action
    RoleNotPermitted,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOwner => f.write_str("actor does not own this reservation"),
            Self::RoleNotPermitted => f.write_str("actor's role may not perform this action"),
        }
    }
}

/// Errors returned by the booking ledger.
///
/// Conflicts, authorization failures and transient backend failures are
/// distinct variants: they call for different corrective actions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Malformed or missing input. Never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The requested interval overlaps an active reservation.
    ///
    /// Callers should offer alternative slots instead of retrying.
    #[error("Slot {date} {requested} is no longer available")]
    SlotConflict {
        /// Requested date
        date: NaiveDate,
        /// Requested interval
        requested: TimeRange,
        /// An active reservation occupying part of the interval, when known
        conflicting: Option<ReservationId>,
    },

    /// The actor may not perform this mutation.
    #[error("Not permitted: {reason}")]
    Authorization {
        /// Why the actor was refused
        reason: DenyReason,
    },

    /// The status machine does not allow this move.
    #[error("Cannot move reservation from {current} to {target}: {detail}")]
    InvalidStateTransition {
        /// Status at the time of the decision, so the caller can reconcile
        current: ReservationStatus,
        /// Requested status
        target: ReservationStatus,
        /// Human-readable explanation
        detail: String,
    },

    /// The operation is not allowed while the reservation is in this status.
    #[error("Operation not allowed while reservation is {current}")]
    InvalidState {
        /// Current status
        current: ReservationStatus,
    },

    /// No reservation with this id (possibly deleted concurrently).
    #[error("Reservation {0} not found")]
    NotFound(ReservationId),

    /// Transient backend failure. Safe to retry with backoff.
    #[error("Reservation store unavailable: {0}")]
    Unavailable(String),

    /// The operation timed out before the store acknowledged it.
    #[error("Operation timed out")]
    Timeout,
}

impl BookingError {
    /// Stable category of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::SlotConflict { .. } => ErrorKind::SlotConflict,
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Timeout => ErrorKind::Timeout,
        }
    }

    /// Only transient failures are worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }

    /// Shorthand for a validation error
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(BookingError::Unavailable("connection reset".into()).is_retryable());
        assert!(BookingError::Timeout.is_retryable());
        assert!(!BookingError::validation("missing date").is_retryable());
        assert!(
            !BookingError::Authorization {
                reason: DenyReason::NotOwner
            }
            .is_retryable()
        );
    }

    #[test]
    fn conflict_and_authorization_are_distinguishable() {
        let denied = BookingError::Authorization {
            reason: DenyReason::RoleNotPermitted,
        };
        assert_eq!(denied.kind(), ErrorKind::Authorization);
        assert_ne!(denied.kind(), ErrorKind::SlotConflict);
        assert!(denied.to_string().contains("role"));
    }
}
