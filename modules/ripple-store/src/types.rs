//! Core types: actions, units, snapshots. Domain-agnostic.

use std::any::Any;
use std::collections::hash_map;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::traits::{StateKey, Updater};

/// A shared, immutable unit of state.
pub type Unit<K> = Arc<dyn Updater<K>>;

/// An opaque event value. Cheap to clone; only units interpret it.
#[derive(Clone)]
pub struct Action {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Action {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Rust type name of the wrapped value. Used for logging.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// The whole tracked state at one instant: key → unit.
///
/// Cloning is shallow. Units are shared by reference and never mutated, so a
/// clone is an independent snapshot.
pub struct State<K: StateKey> {
    units: HashMap<K, Unit<K>>,
}

impl<K: StateKey> State<K> {
    pub fn new() -> Self {
        Self {
            units: HashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            units: HashMap::with_capacity(capacity),
        }
    }

    /// Builder-style insert, for assembling an initial state.
    pub fn with(mut self, key: K, unit: impl Updater<K>) -> Self {
        self.units.insert(key, Arc::new(unit));
        self
    }

    pub fn insert(&mut self, key: K, unit: Unit<K>) -> Option<Unit<K>> {
        self.units.insert(key, unit)
    }

    pub fn get(&self, key: &K) -> Option<&Unit<K>> {
        self.units.get(key)
    }

    /// Borrow the unit at `key` as its concrete type.
    pub fn get_as<T: Updater<K>>(&self, key: &K) -> Option<&T> {
        self.units.get(key).and_then(|unit| unit.downcast_ref::<T>())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.units.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.units.keys()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, K, Unit<K>> {
        self.units.iter()
    }

    /// Replace each key present in `next`. Keys absent from `next` are kept.
    pub(crate) fn merge(&mut self, next: State<K>) {
        self.units.extend(next.units);
    }
}

impl<K: StateKey> Default for State<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StateKey> Clone for State<K> {
    fn clone(&self) -> Self {
        Self {
            units: self.units.clone(),
        }
    }
}

impl<K: StateKey> fmt::Debug for State<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.units.iter().map(|(k, v)| (k, (**v).type_name())))
            .finish()
    }
}

impl<K: StateKey> FromIterator<(K, Unit<K>)> for State<K> {
    fn from_iter<I: IntoIterator<Item = (K, Unit<K>)>>(iter: I) -> Self {
        Self {
            units: iter.into_iter().collect(),
        }
    }
}

impl<K: StateKey> IntoIterator for State<K> {
    type Item = (K, Unit<K>);
    type IntoIter = hash_map::IntoIter<K, Unit<K>>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.into_iter()
    }
}

impl<'a, K: StateKey> IntoIterator for &'a State<K> {
    type Item = (&'a K, &'a Unit<K>);
    type IntoIter = hash_map::Iter<'a, K, Unit<K>>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.iter()
    }
}
