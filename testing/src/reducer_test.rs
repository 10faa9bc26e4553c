//! Given-When-Then harness for reducers.
//!
//! Booking decisions are pure reducers, so most rules are tested without a
//! store or a runtime: give the facts, send one or more actions, assert on
//! the resulting state and effects.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use booking_ledger_core::{effect::Effect, reducer::Reducer};

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for effect assertion functions
type EffectAssertion = Box<dyn FnOnce(&[Effect])>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// Effects from every action are collected in order, so assertions see the
/// effects of the whole sequence.
///
/// # Example
///
/// ```ignore
/// use booking_ledger_testing::ReducerTest;
///
/// ReducerTest::new(AdmissionReducer)
///     .with_env(env)
///     .given_state(DaySheet::new(date, hours, existing))
///     .when_action(AdmissionAction::Request { .. })
///     .then_state(|sheet| assert!(sheet.last_error.is_some()))
///     .then_effects(assertions::assert_no_effects)
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    initial_state: Option<S>,
    actions: Vec<A>,
    state_assertions: Vec<StateAssertion<S>>,
    effect_assertions: Vec<EffectAssertion>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            actions: Vec::new(),
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Add an action to send (When)
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.actions.push(action);
        self
    }

    /// Add several actions, sent in order (When)
    #[must_use]
    pub fn when_actions(mut self, actions: impl IntoIterator<Item = A>) -> Self {
        self.actions.extend(actions);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the resulting effects (Then)
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if initial state, actions, or environment are not set,
    /// or if any assertions fail.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");

        assert!(
            !self.actions.is_empty(),
            "At least one action must be set with when_action()"
        );

        let env = self
            .environment
            .expect("Environment must be set with with_env()");

        let mut effects = Vec::new();
        for action in self.actions {
            effects.extend(self.reducer.reduce(&mut state, action, &env));
        }

        for assertion in self.state_assertions {
            assertion(&state);
        }

        for assertion in self.effect_assertions {
            assertion(&effects);
        }
    }
}

/// Helper assertions for effects
pub mod assertions {
    use booking_ledger_core::effect::Effect;

    /// Assert that nothing would happen outside the reducer
    ///
    /// # Panics
    ///
    /// Panics if any effect does something.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_effects(effects: &[Effect]) {
        assert!(
            effects.iter().all(Effect::is_none),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the number of effects doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_effects_count(effects: &[Effect], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {} effects, but found {}",
            expected,
            effects.len()
        );
    }

    /// Assert that effects contain at least one Future effect
    ///
    /// # Panics
    ///
    /// Panics if no Future effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_future_effect(effects: &[Effect]) {
        assert!(
            effects.iter().any(|e| matches!(e, Effect::Future(_))),
            "Expected at least one Future effect, but none found"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_ledger_core::effect::Effect;
    use booking_ledger_core::reducer::Reducer;
    use smallvec::{SmallVec, smallvec};

    /// Seats left at a counter; a toy reducer exercising the harness.
    #[derive(Clone, Debug)]
    struct Counter {
        free: u32,
        refused: u32,
    }

    #[derive(Clone, Debug)]
    enum CounterAction {
        Take,
        Release,
    }

    struct CounterReducer;

    impl Reducer for CounterReducer {
        type State = Counter;
        type Action = CounterAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> SmallVec<[Effect; 4]> {
            match action {
                CounterAction::Take if state.free == 0 => {
                    state.refused += 1;
                    SmallVec::new()
                },
                CounterAction::Take => {
                    state.free -= 1;
                    smallvec![Effect::Future(Box::pin(async {}))]
                },
                CounterAction::Release => {
                    state.free += 1;
                    smallvec![Effect::None]
                },
            }
        }
    }

    #[test]
    fn collects_effects_across_actions() {
        ReducerTest::new(CounterReducer)
            .with_env(())
            .given_state(Counter { free: 1, refused: 0 })
            .when_actions([CounterAction::Take, CounterAction::Take])
            .then_state(|state| {
                assert_eq!(state.free, 0);
                assert_eq!(state.refused, 1);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn none_effects_count_as_no_effects() {
        ReducerTest::new(CounterReducer)
            .with_env(())
            .given_state(Counter { free: 0, refused: 0 })
            .when_action(CounterAction::Release)
            .then_state(|state| assert_eq!(state.free, 1))
            .then_effects(assertions::assert_no_effects)
            .run();
    }
}
