//! Shared test units and actions.
//!
//! Every unit here is immutable: updates build a new value and leave `self`
//! alone. Side channels (atomics, barriers) exist only so tests can observe
//! what ran.
#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ripple_store::{Action, BoxError, State, Store, Unit, UpdateContext, Updater};
use thiserror::Error;
use tokio::sync::Barrier;

pub type Key = &'static str;

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Appended to every `Recorder`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record(pub String);

/// Adds to every `Counter`. Negative amounts are rejected.
#[derive(Debug, Clone, Copy)]
pub struct Add(pub i64);

/// Rejected by `Picky`, ignored by everything else.
#[derive(Debug, Clone, Copy)]
pub struct Reject;

/// Nobody handles this.
#[derive(Debug, Clone, Copy)]
pub struct Unknown;

/// Makes `Sleeper` wait before answering.
#[derive(Debug, Clone, Copy)]
pub struct Nap(pub Duration);

/// Makes `Bomb` panic.
#[derive(Debug, Clone, Copy)]
pub struct Detonate;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
#[error("negative amount: {0}")]
pub struct NegativeAmount(pub i64);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0} refuses this action")]
pub struct Refused(pub String);

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// Remembers every `Record` label it has seen, in order.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub seen: Arc<Vec<String>>,
}

#[async_trait]
impl Updater<Key> for Recorder {
    async fn update(&self, _ctx: &UpdateContext<Key>, action: &Action) -> Result<Unit<Key>, BoxError> {
        match action.downcast_ref::<Record>() {
            Some(Record(label)) => {
                let mut seen = self.seen.as_ref().clone();
                seen.push(label.clone());
                Ok(Arc::new(Recorder {
                    seen: Arc::new(seen),
                }))
            }
            None => Ok(self.unchanged()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter(pub i64);

#[async_trait]
impl Updater<Key> for Counter {
    async fn update(&self, _ctx: &UpdateContext<Key>, action: &Action) -> Result<Unit<Key>, BoxError> {
        match action.downcast_ref::<Add>() {
            Some(Add(amount)) if *amount < 0 => Err(NegativeAmount(*amount).into()),
            Some(Add(amount)) => Ok(Arc::new(Counter(self.0 + amount))),
            None => Ok(self.unchanged()),
        }
    }
}

/// Fails on `Reject`, counts everything else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Picky {
    pub updates: u32,
}

#[async_trait]
impl Updater<Key> for Picky {
    async fn update(&self, ctx: &UpdateContext<Key>, action: &Action) -> Result<Unit<Key>, BoxError> {
        if action.is::<Reject>() {
            return Err(Refused(ctx.key().to_string()).into());
        }
        Ok(Arc::new(Picky {
            updates: self.updates + 1,
        }))
    }
}

/// Stores the key it was last updated under.
#[derive(Debug, Clone, Default)]
pub struct KeyAware {
    pub seen_key: Option<Key>,
}

#[async_trait]
impl Updater<Key> for KeyAware {
    async fn update(&self, ctx: &UpdateContext<Key>, _action: &Action) -> Result<Unit<Key>, BoxError> {
        Ok(Arc::new(KeyAware {
            seen_key: Some(*ctx.key()),
        }))
    }
}

/// Sleeps on `Nap`, then answers unchanged.
#[derive(Debug, Clone, Default)]
pub struct Sleeper;

#[async_trait]
impl Updater<Key> for Sleeper {
    async fn update(&self, _ctx: &UpdateContext<Key>, action: &Action) -> Result<Unit<Key>, BoxError> {
        if let Some(Nap(duration)) = action.downcast_ref::<Nap>() {
            tokio::time::sleep(*duration).await;
        }
        Ok(self.unchanged())
    }
}

/// Panics on `Detonate`.
#[derive(Debug, Clone, Default)]
pub struct Bomb;

#[async_trait]
impl Updater<Key> for Bomb {
    async fn update(&self, _ctx: &UpdateContext<Key>, action: &Action) -> Result<Unit<Key>, BoxError> {
        if action.is::<Detonate>() {
            panic!("bomb went off");
        }
        Ok(self.unchanged())
    }
}

/// Panics in `update` itself, before any future exists. Written without
/// `#[async_trait]` so the panic happens at call time, not at first poll.
#[derive(Debug, Clone, Default)]
pub struct EagerBomb;

impl Updater<Key> for EagerBomb {
    fn update<'life0, 'life1, 'life2, 'async_trait>(
        &'life0 self,
        _ctx: &'life1 UpdateContext<Key>,
        _action: &'life2 Action,
    ) -> Pin<Box<dyn Future<Output = Result<Unit<Key>, BoxError>> + Send + 'async_trait>>
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        'life2: 'async_trait,
    {
        panic!("eager bomb went off")
    }
}

/// Waits for its dispatch to be cancelled and flags that it saw it.
#[derive(Debug, Clone)]
pub struct CancelWatcher {
    pub saw_cancel: Arc<AtomicBool>,
}

#[async_trait]
impl Updater<Key> for CancelWatcher {
    async fn update(&self, ctx: &UpdateContext<Key>, _action: &Action) -> Result<Unit<Key>, BoxError> {
        let cancelled = tokio::time::timeout(Duration::from_secs(5), ctx.cancelled()).await;
        if cancelled.is_ok() && ctx.is_cancelled() {
            self.saw_cancel.store(true, Ordering::SeqCst);
        }
        Ok(self.unchanged())
    }
}

/// Only finishes when every unit sharing the barrier is running at once.
#[derive(Debug, Clone)]
pub struct Rendezvous {
    pub barrier: Arc<Barrier>,
}

#[async_trait]
impl Updater<Key> for Rendezvous {
    async fn update(&self, _ctx: &UpdateContext<Key>, _action: &Action) -> Result<Unit<Key>, BoxError> {
        self.barrier.wait().await;
        Ok(self.unchanged())
    }
}

/// Records the value it read before producing `value + 1`, and flags any
/// overlap with another update of the same unit.
#[derive(Debug, Clone)]
pub struct Sequence {
    pub value: usize,
    pub reads: Arc<std::sync::Mutex<Vec<usize>>>,
    pub in_flight: Arc<AtomicUsize>,
    pub overlapped: Arc<AtomicBool>,
}

impl Sequence {
    pub fn new() -> Self {
        Self {
            value: 0,
            reads: Arc::default(),
            in_flight: Arc::default(),
            overlapped: Arc::default(),
        }
    }
}

#[async_trait]
impl Updater<Key> for Sequence {
    async fn update(&self, _ctx: &UpdateContext<Key>, _action: &Action) -> Result<Unit<Key>, BoxError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        self.reads.lock().unwrap().push(self.value);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Arc::new(Sequence {
            value: self.value + 1,
            ..self.clone()
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn recorders(keys: &[Key]) -> State<Key> {
    keys.iter()
        .fold(State::new(), |state, key| state.with(*key, Recorder::default()))
}

pub async fn seen(store: &Store<Key>, key: Key) -> Vec<String> {
    let state = store.snapshot().await.unwrap();
    state
        .get_as::<Recorder>(&key)
        .expect("recorder registered")
        .seen
        .as_ref()
        .clone()
}

pub async fn count(store: &Store<Key>, key: Key) -> i64 {
    let state = store.snapshot().await.unwrap();
    state.get_as::<Counter>(&key).expect("counter registered").0
}
