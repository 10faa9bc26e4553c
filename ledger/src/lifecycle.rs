//! Lifecycle Manager: status transitions, detail edits and deletion.
//!
//! [`LifecycleReducer`] decides on a freshly read record; [`LifecycleManager`]
//! reads, asks the reducer, and writes with an `expected_status` guard. When
//! the guard fails another writer moved the record first, so the manager
//! reads again and re-decides, up to `max_transition_attempts` times.
//!
//! Checks for a transition run in this order, and the first failure wins:
//!
//! 1. the record exists
//! 2. the actor owns it (as its business or its customer)
//! 3. the current status is not terminal
//! 4. the actor's role grants the needed capability
//! 5. the move is an edge of the status machine
//! 6. `completed` only once the appointment has started

use crate::notification_effect;
use booking_ledger_core::capability::{Capability, authorize, owns};
use booking_ledger_core::effect::Effect;
use booking_ledger_core::environment::{BusinessDirectory, Clock, Notification, Notifier};
use booking_ledger_core::reducer::Reducer;
use booking_ledger_core::store::{ReservationStore, StoreError, deletable};
use booking_ledger_core::transitions;
use booking_ledger_core::types::{
    Actor, BusinessId, CustomerContact, CustomerId, Reservation, ReservationId, ReservationPatch,
    ReservationStatus,
};
use booking_ledger_core::{BookingError, DenyReason, SmallVec, smallvec};
use booking_ledger_runtime::metrics::LifecycleMetrics;
use booking_ledger_runtime::retry::retry;
use booking_ledger_runtime::{EffectRunner, RetryPolicy};
use std::sync::Arc;

// ============================================================================
// State
// ============================================================================

/// Write the reducer decided on
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlannedWrite {
    /// Guarded partial update
    Update(ReservationPatch),
    /// Removal on behalf of this customer
    Delete(CustomerId),
}

/// One reservation as just read from the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleState {
    /// The record
    pub reservation: Reservation,
    /// Offset of the business's local time, for the completion check
    pub utc_offset_minutes: i32,
    /// Write accepted by the last decision
    pub planned: Option<PlannedWrite>,
    /// Whether the record has been removed
    pub deleted: bool,
    /// Last error (for validation feedback)
    pub last_error: Option<BookingError>,
}

impl LifecycleState {
    /// State for a freshly read record
    #[must_use]
    pub const fn new(reservation: Reservation, utc_offset_minutes: i32) -> Self {
        Self {
            reservation,
            utc_offset_minutes,
            planned: None,
            deleted: false,
            last_error: None,
        }
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Actions for the lifecycle reducer
#[derive(Clone, Debug)]
pub enum LifecycleAction {
    // Commands
    /// Move the reservation to `target`
    Transition {
        /// Who asks
        actor: Actor,
        /// Requested status
        target: ReservationStatus,
    },

    /// Change notes and/or contact details
    EditDetails {
        /// Who asks
        actor: Actor,
        /// Replacement notes (`Some(None)` clears)
        notes: Option<Option<String>>,
        /// Replacement contact (`Some(None)` clears)
        contact: Option<Option<CustomerContact>>,
    },

    /// Remove the reservation
    Delete {
        /// Who asks
        actor: Actor,
    },

    // Events
    /// A transition was written
    Transitioned {
        /// The record after the write
        reservation: Reservation,
        /// Who moved it
        actor: Actor,
    },

    /// Details were written
    DetailsUpdated {
        /// The record after the write
        reservation: Reservation,
    },

    /// The record was removed
    Deleted {
        /// Who removed it
        actor: Actor,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the lifecycle reducer
#[derive(Clone)]
pub struct LifecycleEnvironment {
    /// Clock for the completion check
    pub clock: Arc<dyn Clock>,
    /// Delivery of status-change notifications
    pub notifier: Arc<dyn Notifier>,
    /// Refuse `completed` before the appointment start
    pub enforce_completion_after_start: bool,
}

impl LifecycleEnvironment {
    /// Creates a new `LifecycleEnvironment` that enforces the completion check
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            clock,
            notifier,
            enforce_completion_after_start: true,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Pure lifecycle decisions over one reservation
#[derive(Clone, Copy, Debug, Default)]
pub struct LifecycleReducer;

impl LifecycleReducer {
    /// Creates a new `LifecycleReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn decide_transition(
        state: &LifecycleState,
        actor: &Actor,
        target: ReservationStatus,
        env: &LifecycleEnvironment,
    ) -> Result<ReservationPatch, BookingError> {
        let reservation = &state.reservation;
        let current = reservation.status;

        if !owns(actor, reservation) {
            return Err(BookingError::Authorization {
                reason: DenyReason::NotOwner,
            });
        }
        if current.is_terminal() {
            transitions::check(current, target)?;
        }
        if let Some(capability) = Capability::for_target(target) {
            authorize(actor, reservation, capability).into_result()?;
        }
        transitions::check(current, target)?;

        if target == ReservationStatus::Completed && env.enforce_completion_after_start {
            if let Some(starts_at) = reservation.starts_at(state.utc_offset_minutes) {
                if env.clock.now() < starts_at {
                    return Err(BookingError::InvalidStateTransition {
                        current,
                        target,
                        detail: format!("appointment has not started yet (starts {starts_at})"),
                    });
                }
            }
        }

        Ok(ReservationPatch::transition(current, target))
    }

    fn decide_edit(
        state: &LifecycleState,
        actor: &Actor,
        notes: Option<Option<String>>,
        contact: Option<Option<CustomerContact>>,
    ) -> Result<ReservationPatch, BookingError> {
        let reservation = &state.reservation;

        authorize(actor, reservation, Capability::EditDetails).into_result()?;
        if reservation.status.is_terminal() {
            return Err(BookingError::InvalidState {
                current: reservation.status,
            });
        }
        if let Some(Some(contact)) = &contact {
            if contact.name.trim().is_empty() {
                return Err(BookingError::validation("contact name must not be empty"));
            }
        }

        Ok(ReservationPatch {
            notes,
            contact,
            status: None,
            expected_status: Some(reservation.status),
        })
    }

    fn decide_delete(state: &LifecycleState, actor: &Actor) -> Result<CustomerId, BookingError> {
        let reservation = &state.reservation;

        authorize(actor, reservation, Capability::Delete).into_result()?;
        if !deletable(reservation.status) {
            return Err(BookingError::InvalidState {
                current: reservation.status,
            });
        }
        match actor {
            Actor::Customer(customer_id) => Ok(*customer_id),
            Actor::Business(_) => Err(BookingError::Authorization {
                reason: DenyReason::RoleNotPermitted,
            }),
        }
    }

    fn record(state: &mut LifecycleState, decision: Result<PlannedWrite, BookingError>) {
        state.planned = None;
        state.last_error = None;
        match decision {
            Ok(write) => state.planned = Some(write),
            Err(error) => state.last_error = Some(error),
        }
    }
}

impl Reducer for LifecycleReducer {
    type State = LifecycleState;
    type Action = LifecycleAction;
    type Environment = LifecycleEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect; 4]> {
        if state.deleted {
            state.last_error = Some(BookingError::NotFound(state.reservation.id));
            return SmallVec::new();
        }

        match action {
            LifecycleAction::Transition { actor, target } => {
                let decision = Self::decide_transition(state, &actor, target, env);
                Self::record(state, decision.map(PlannedWrite::Update));
                SmallVec::new()
            },

            LifecycleAction::EditDetails {
                actor,
                notes,
                contact,
            } => {
                let decision = Self::decide_edit(state, &actor, notes, contact);
                Self::record(state, decision.map(PlannedWrite::Update));
                SmallVec::new()
            },

            LifecycleAction::Delete { actor } => {
                let decision = Self::decide_delete(state, &actor);
                Self::record(state, decision.map(PlannedWrite::Delete));
                SmallVec::new()
            },

            LifecycleAction::Transitioned { reservation, actor } => {
                let from = state.reservation.status;
                state.planned = None;
                state.reservation = reservation.clone();

                smallvec![notification_effect(
                    &env.notifier,
                    Notification::StatusChanged {
                        reservation,
                        from,
                        actor,
                    },
                )]
            },

            LifecycleAction::DetailsUpdated { reservation } => {
                state.planned = None;
                state.reservation = reservation;
                SmallVec::new()
            },

            LifecycleAction::Deleted { actor } => {
                state.planned = None;
                state.deleted = true;
                let reservation = &state.reservation;
                tracing::debug!(reservation_id = %reservation.id, actor = %actor, "Reservation deleted");

                smallvec![notification_effect(
                    &env.notifier,
                    Notification::Deleted {
                        id: reservation.id,
                        business_id: reservation.business_id,
                        customer_id: reservation.customer_id,
                    },
                )]
            },
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Reads, decides and writes lifecycle changes.
#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn ReservationStore>,
    directory: Arc<dyn BusinessDirectory>,
    env: LifecycleEnvironment,
    effects: EffectRunner,
    read_policy: RetryPolicy,
    max_attempts: u32,
}

impl LifecycleManager {
    /// Creates a manager over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ReservationStore>,
        directory: Arc<dyn BusinessDirectory>,
        env: LifecycleEnvironment,
    ) -> Self {
        Self {
            store,
            directory,
            env,
            effects: EffectRunner::new(),
            read_policy: RetryPolicy::default(),
            max_attempts: 3,
        }
    }

    /// Decide-and-write rounds before giving up on a record that keeps changing
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Backoff for reads that hit a transient failure
    #[must_use]
    pub fn with_read_policy(mut self, policy: RetryPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    /// Runner executing notification effects
    #[must_use]
    pub fn with_effects(mut self, effects: EffectRunner) -> Self {
        self.effects = effects;
        self
    }

    /// Read one reservation on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`], [`BookingError::Authorization`] for
    /// strangers, [`BookingError::Unavailable`] when reads keep failing.
    pub async fn view(&self, id: ReservationId, actor: Actor) -> Result<Reservation, BookingError> {
        let reservation = self.read(id).await?;
        authorize(&actor, &reservation, Capability::View).into_result()?;
        Ok(reservation)
    }

    /// Move a reservation to `target`.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] if the record does not exist
    /// - [`BookingError::Authorization`] if the actor may not do this
    /// - [`BookingError::InvalidStateTransition`] with the current status
    /// - [`BookingError::Unavailable`] when the store fails or the record
    ///   keeps changing underneath
    #[tracing::instrument(skip(self), fields(actor = %actor))]
    pub async fn transition(
        &self,
        id: ReservationId,
        actor: Actor,
        target: ReservationStatus,
    ) -> Result<Reservation, BookingError> {
        let result = self
            .decide_and_update(
                id,
                LifecycleAction::Transition { actor, target },
                target == ReservationStatus::Completed,
                |reservation| LifecycleAction::Transitioned { reservation, actor },
            )
            .await;

        match &result {
            Ok((from, reservation)) => {
                tracing::info!(from = %from, to = %reservation.status, "Reservation transitioned");
                LifecycleMetrics::record_transition(from.as_str(), reservation.status.as_str());
            },
            Err(error) => {
                tracing::info!(error = %error, "Transition refused");
                LifecycleMetrics::record_rejected(error.kind().as_str());
            },
        }
        result.map(|(_, reservation)| reservation)
    }

    /// Replace notes and/or contact details of a non-terminal reservation.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] if the record does not exist
    /// - [`BookingError::Authorization`] unless the actor is the owning customer
    /// - [`BookingError::InvalidState`] once the record is terminal
    /// - [`BookingError::Validation`] for an empty contact name
    #[tracing::instrument(skip(self, notes, contact), fields(actor = %actor))]
    pub async fn update_details(
        &self,
        id: ReservationId,
        actor: Actor,
        notes: Option<Option<String>>,
        contact: Option<Option<CustomerContact>>,
    ) -> Result<Reservation, BookingError> {
        self.decide_and_update(
            id,
            LifecycleAction::EditDetails {
                actor,
                notes,
                contact,
            },
            false,
            |reservation| LifecycleAction::DetailsUpdated { reservation },
        )
        .await
        .map(|(_, reservation)| reservation)
    }

    /// Remove a reservation on behalf of its customer.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] if the record does not exist
    /// - [`BookingError::Authorization`] unless the actor is the owning customer
    /// - [`BookingError::InvalidState`] if it is `confirmed` or `completed`
    #[tracing::instrument(skip(self), fields(actor = %actor))]
    pub async fn delete(&self, id: ReservationId, actor: Actor) -> Result<(), BookingError> {
        let reducer = LifecycleReducer::new();
        let mut state = self.load(id, false).await?;

        let effects = reducer.reduce(&mut state, LifecycleAction::Delete { actor }, &self.env);
        debug_assert!(effects.is_empty(), "lifecycle decisions have no side effects");
        if let Some(error) = state.last_error.take() {
            tracing::info!(error = %error, "Deletion refused");
            return Err(error);
        }
        let Some(PlannedWrite::Delete(customer_id)) = state.planned.take() else {
            return Err(BookingError::validation("deletion was not planned"));
        };

        // The store repeats ownership and status checks atomically.
        self.store.delete(id, customer_id).await?;

        let effects = reducer.reduce(&mut state, LifecycleAction::Deleted { actor }, &self.env);
        self.effects.run(effects);
        LifecycleMetrics::record_deletion();
        Ok(())
    }

    /// Decide `command` on a fresh read and write the planned patch,
    /// re-deciding when the status changed in between.
    ///
    /// Returns the status the winning decision was made from.
    async fn decide_and_update(
        &self,
        id: ReservationId,
        command: LifecycleAction,
        needs_offset: bool,
        written: impl Fn(Reservation) -> LifecycleAction,
    ) -> Result<(ReservationStatus, Reservation), BookingError> {
        let reducer = LifecycleReducer::new();

        for attempt in 1..=self.max_attempts {
            let mut state = self.load(id, needs_offset).await?;
            let from = state.reservation.status;

            let effects = reducer.reduce(&mut state, command.clone(), &self.env);
            debug_assert!(effects.is_empty(), "lifecycle decisions have no side effects");
            if let Some(error) = state.last_error.take() {
                return Err(error);
            }
            let Some(PlannedWrite::Update(patch)) = state.planned.take() else {
                return Err(BookingError::validation("update was not planned"));
            };

            match self.store.update(id, patch).await {
                Ok(updated) => {
                    let effects = reducer.reduce(&mut state, written(updated.clone()), &self.env);
                    self.effects.run(effects);
                    return Ok((from, updated));
                },
                Err(StoreError::StatusMismatch { current }) => {
                    tracing::debug!(
                        attempt,
                        decided_from = %from,
                        current = %current,
                        "Status changed concurrently, deciding again"
                    );
                    LifecycleMetrics::record_race();
                },
                Err(error) => return Err(error.into()),
            }
        }

        Err(BookingError::Unavailable(format!(
            "reservation {id} changed concurrently {} times",
            self.max_attempts
        )))
    }

    async fn read(&self, id: ReservationId) -> Result<Reservation, BookingError> {
        retry(&self.read_policy, "get", || self.store.get(id))
            .await?
            .ok_or(BookingError::NotFound(id))
    }

    async fn load(&self, id: ReservationId, needs_offset: bool) -> Result<LifecycleState, BookingError> {
        let reservation = self.read(id).await?;
        let offset = if needs_offset && self.env.enforce_completion_after_start {
            self.utc_offset(reservation.business_id).await?
        } else {
            0
        };
        Ok(LifecycleState::new(reservation, offset))
    }

    async fn utc_offset(&self, business_id: BusinessId) -> Result<i32, BookingError> {
        let profile = retry(&self.read_policy, "business_lookup", || {
            self.directory.business(business_id)
        })
        .await?;

        Ok(profile.map_or_else(
            || {
                tracing::warn!(business_id = %business_id, "Unknown business, assuming UTC");
                0
            },
            |profile| profile.utc_offset_minutes,
        ))
    }
}
