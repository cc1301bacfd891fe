//! In-memory, concurrency-safe state store.
//!
//! Dispatch an action → every registered `Updater` produces its successor in
//! parallel → the new snapshot commits atomically → subscribers are notified.
//! A failing unit aborts the whole dispatch and leaves the state untouched.
//!
//! The canonical snapshot, the action queue, and the subscriber set are each
//! owned by a single actor task. Callers only ever hold a `Store` handle.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod middleware;
mod owner;
mod sequencer;
pub mod store;
mod subscribers;
pub mod traits;
pub mod types;

pub use config::StoreSettings;
pub use context::{Context, UpdateContext};
pub use error::{BoxError, DispatchError, DispatchResult};
pub use middleware::{Middleware, MiddlewareFactory, Next};
pub use store::{
    default_perform_dispatch, PerformDispatch, Store, StoreBuilder, StoreConfig, WeakStore,
};
pub use subscribers::{Sink, Subscription};
pub use traits::{AsAny, Selector, StateKey, Updater};
pub use types::{Action, State, Unit};
