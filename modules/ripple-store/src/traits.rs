//! Core traits for the store.

use std::any::Any;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::UpdateContext;
use crate::error::BoxError;
use crate::types::{Action, State, Unit};

/// Anything usable as a registration key in a `State`.
///
/// Keys are only hashed and compared, never ordered.
pub trait StateKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> StateKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Type-erased view of a unit, so selectors can read concrete values back.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// An immutable piece of tracked state that knows how to respond to actions.
///
/// `update` must not mutate `self`; it returns the successor value. A unit
/// that does not care about an action returns itself unchanged (see
/// [`Updater::unchanged`]) rather than an error.
///
/// Units run concurrently with each other and must not touch shared state.
/// The store does not enforce this.
#[async_trait]
pub trait Updater<K: StateKey>: AsAny {
    async fn update(&self, ctx: &UpdateContext<K>, action: &Action) -> Result<Unit<K>, BoxError>;

    /// Successor for actions this unit ignores.
    fn unchanged(&self) -> Unit<K>
    where
        Self: Clone + Sized,
    {
        Arc::new(self.clone())
    }
}

impl<K: StateKey> dyn Updater<K> {
    /// Borrow the concrete unit if it is a `T`.
    pub fn downcast_ref<T: Updater<K>>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Updater<K>>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Pulls the data it needs out of a snapshot. Must only read.
pub trait Selector<K: StateKey> {
    fn select_from(&mut self, state: &State<K>);
}

/// Selecting into a `State` takes a shallow copy of every unit.
impl<K: StateKey> Selector<K> for State<K> {
    fn select_from(&mut self, state: &State<K>) {
        for (key, unit) in state.iter() {
            self.insert(key.clone(), Arc::clone(unit));
        }
    }
}

impl<K, F> Selector<K> for F
where
    K: StateKey,
    F: FnMut(&State<K>),
{
    fn select_from(&mut self, state: &State<K>) {
        self(state)
    }
}
