//! Counter demo for the ripple store.

pub mod counter;

pub use counter::{CountInfo, Counter, CounterError, Decrement, History, Increment};
