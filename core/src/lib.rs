//! # Booking Ledger Core
//!
//! Core traits and types for the booking ledger.
//!
//! This crate holds everything the ledger decides with, and nothing it
//! executes: the domain model, the slot model, the error taxonomy, the
//! reservation status machine, the capability check, and the abstractions
//! over the outside world (store, clock, business directory, notifier).
//!
//! ## Core Concepts
//!
//! - **State**: the facts a decision is made from (a day sheet, a reservation)
//! - **Action**: all inputs to a reducer (requests and recorded writes)
//! - **Reducer**: pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: side effect descriptions (not execution)
//! - **Environment**: injected dependencies via traits
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Explicit Effects (no hidden I/O)
//! - Explicit actor context (no ambient session)
//! - Dependency Injection via Environment
//!
//! ## Example
//!
//! ```
//! use booking_ledger_core::slots::{candidate_slots, DayHours, SlotTime};
//!
//! let hours = DayHours::new(SlotTime::from_hm(9, 0).unwrap(), SlotTime::from_hm(17, 0).unwrap());
//! let slots: Vec<_> = candidate_slots(hours, 30, 30).collect();
//! assert_eq!(slots.len(), 16);
//! assert_eq!(slots[15].to_string(), "16:30");
//! ```

pub mod capability;
pub mod error;
pub mod slots;
pub mod store;
pub mod transitions;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, Utc};
pub use error::{BookingError, DenyReason, ErrorKind, Result};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

/// Reducer module - The core trait for decision logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They contain all booking rules and are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for decision logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The facts this reducer decides over
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for AdmissionReducer {
    ///     type State = DaySheet;
    ///     type Action = AdmissionAction;
    ///     type Environment = AdmissionEnvironment;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut DaySheet,
    ///         action: AdmissionAction,
    ///         env: &AdmissionEnvironment,
    ///     ) -> SmallVec<[Effect; 4]> {
    ///         match action {
    ///             AdmissionAction::Request { .. } => smallvec![Effect::None],
    ///             _ => smallvec![],
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// Most actions yield zero or one effect, so the return type stays
        /// on the stack for up to four.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution).
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the runtime's effect runner.
    ///
    /// Booking effects are terminal: whatever they do (deliver a
    /// notification) never feeds back into a decision, so they produce no
    /// action.
    pub enum Effect {
        /// No-op effect
        None,

        /// Arbitrary async computation, run in the background
        Future(Pin<Box<dyn Future<Output = ()> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl std::fmt::Debug for Effect {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl Effect {
        /// Whether this effect does nothing
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external collaborators are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use crate::error::BookingError;
    use crate::types::{
        Actor, BusinessId, BusinessProfile, CustomerId, Reservation, ReservationId,
        ReservationStatus,
    };
    use chrono::{DateTime, Utc};
    use std::future::Future;
    use std::pin::Pin;

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Read access to business profiles (hours, services, offset).
    ///
    /// Profile and catalog maintenance happen elsewhere; the ledger only reads.
    pub trait BusinessDirectory: Send + Sync {
        /// Look up a business.
        ///
        /// # Errors
        ///
        /// [`BookingError::Unavailable`] when the directory cannot be reached.
        fn business(
            &self,
            id: BusinessId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<BusinessProfile>, BookingError>> + Send + '_>>;
    }

    /// Something worth telling the parties of a reservation about
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Notification {
        /// A customer requested a new reservation
        Requested(Reservation),
        /// A reservation moved to a new status
        StatusChanged {
            /// The record after the move
            reservation: Reservation,
            /// Status before the move
            from: ReservationStatus,
            /// Who moved it
            actor: Actor,
        },
        /// A customer removed their reservation
        Deleted {
            /// Removed record
            id: ReservationId,
            /// Business it was booked with
            business_id: BusinessId,
            /// Customer who removed it
            customer_id: CustomerId,
        },
    }

    impl Notification {
        /// Short label for logs and metrics
        #[must_use]
        pub const fn kind(&self) -> &'static str {
            match self {
                Self::Requested(_) => "requested",
                Self::StatusChanged { .. } => "status_changed",
                Self::Deleted { .. } => "deleted",
            }
        }
    }

    /// Delivery of notifications (push, email, ...).
    ///
    /// Delivery is fire-and-forget: a failure is logged and counted but
    /// never changes the outcome of the operation that caused it.
    pub trait Notifier: Send + Sync {
        /// Deliver one notification.
        ///
        /// # Errors
        ///
        /// A description of the delivery failure.
        fn notify(
            &self,
            notification: Notification,
        ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>>;
    }

    /// Notifier that drops everything
    #[derive(Clone, Copy, Debug, Default)]
    pub struct NoopNotifier;

    impl Notifier for NoopNotifier {
        fn notify(
            &self,
            _notification: Notification,
        ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;

    #[test]
    fn only_the_no_op_effect_is_none() {
        assert!(Effect::None.is_none());
        assert!(!Effect::Future(Box::pin(async {})).is_none());
    }

    #[test]
    fn future_effect_debug_hides_the_future() {
        let effect = Effect::Future(Box::pin(async {}));
        assert_eq!(format!("{effect:?}"), "Effect::Future(<future>)");
    }
}
