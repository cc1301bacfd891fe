//! Counter units, actions, and the selector the CLI reads through.

use std::sync::Arc;

use async_trait::async_trait;
use ripple_store::{Action, BoxError, Selector, State, Unit, UpdateContext, Updater};
use thiserror::Error;

pub type Key = &'static str;

pub const COUNTER: Key = "COUNTER_STATE";
pub const HISTORY: Key = "HISTORY_STATE";

/// Raise the counter. Negative amounts are rejected; use `Decrement`.
#[derive(Debug, Clone, Copy)]
pub struct Increment(pub i64);

/// Lower the counter. Negative amounts are rejected; use `Increment`.
#[derive(Debug, Clone, Copy)]
pub struct Decrement(pub i64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CounterError {
    #[error("negative increment {0}, use a decrement instead")]
    NegativeIncrement(i64),

    #[error("negative decrement {0}, use an increment instead")]
    NegativeDecrement(i64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter(pub i64);

#[async_trait]
impl Updater<Key> for Counter {
    async fn update(&self, _ctx: &UpdateContext<Key>, action: &Action) -> Result<Unit<Key>, BoxError> {
        if let Some(Increment(amount)) = action.downcast_ref::<Increment>() {
            if *amount < 0 {
                return Err(CounterError::NegativeIncrement(*amount).into());
            }
            return Ok(Arc::new(Counter(self.0 + amount)));
        }
        if let Some(Decrement(amount)) = action.downcast_ref::<Decrement>() {
            if *amount < 0 {
                return Err(CounterError::NegativeDecrement(*amount).into());
            }
            return Ok(Arc::new(Counter(self.0 - amount)));
        }
        Ok(self.unchanged())
    }
}

/// Signed deltas applied so far, oldest first.
#[derive(Debug, Clone, Default)]
pub struct History(pub Arc<Vec<i64>>);

#[async_trait]
impl Updater<Key> for History {
    async fn update(&self, _ctx: &UpdateContext<Key>, action: &Action) -> Result<Unit<Key>, BoxError> {
        let delta = if let Some(Increment(amount)) = action.downcast_ref::<Increment>() {
            *amount
        } else if let Some(Decrement(amount)) = action.downcast_ref::<Decrement>() {
            -*amount
        } else {
            return Ok(self.unchanged());
        };
        let mut deltas = self.0.as_ref().clone();
        deltas.push(delta);
        Ok(Arc::new(History(Arc::new(deltas))))
    }
}

/// The initial state: counter at zero, empty history.
pub fn initial_state() -> State<Key> {
    State::new()
        .with(COUNTER, Counter::default())
        .with(HISTORY, History::default())
}

/// What the CLI shows after each commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountInfo {
    pub value: i64,
    pub is_positive: bool,
    pub steps: usize,
}

impl CountInfo {
    pub fn is_negative(&self) -> bool {
        self.value < 0
    }
}

impl Selector<Key> for CountInfo {
    fn select_from(&mut self, state: &State<Key>) {
        if let Some(counter) = state.get_as::<Counter>(&COUNTER) {
            self.value = counter.0;
            self.is_positive = counter.0 > 0;
        }
        if let Some(history) = state.get_as::<History>(&HISTORY) {
            self.steps = history.0.len();
        }
    }
}

/// Turn a signed step into the action that applies it.
pub fn step_action(step: i64) -> Action {
    if step >= 0 {
        Action::new(Increment(step))
    } else {
        Action::new(Decrement(-step))
    }
}
