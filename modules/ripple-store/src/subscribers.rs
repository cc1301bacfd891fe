//! Subscriber registry actor.
//!
//! Owns the set of sinks. Subscribe, unsubscribe, and publish are commands
//! processed one at a time by the registry task, so they never race.
//!
//! Publishing awaits each sink in turn. A sink that stops draining holds the
//! registry on that send; later commands, including the next commit's
//! publish, queue up behind it in the bounded inbox.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{DispatchError, DispatchResult};
use crate::store::Store;
use crate::traits::StateKey;

/// A sink notified with the store after every commit.
pub type Sink<K> = mpsc::Sender<Store<K>>;

enum RegistryCmd<K: StateKey> {
    Subscribe {
        sink: Sink<K>,
        resp: oneshot::Sender<u64>,
    },
    Unsubscribe {
        id: u64,
        resp: oneshot::Sender<bool>,
    },
    Publish {
        store: Store<K>,
    },
    Count {
        resp: oneshot::Sender<usize>,
    },
}

/// Handle to the registry task.
pub(crate) struct Registry<K: StateKey> {
    tx: mpsc::Sender<RegistryCmd<K>>,
}

impl<K: StateKey> Clone for Registry<K> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<K: StateKey> Registry<K> {
    pub(crate) fn spawn(inbox_capacity: usize, shutdown: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(inbox_capacity.max(1));
        let actor = RegistryActor {
            sinks: BTreeMap::new(),
            pruned: BTreeSet::new(),
            next_id: 0,
            rx,
            shutdown,
        };
        tokio::spawn(actor.run());
        Self { tx }
    }

    pub(crate) async fn subscribe(&self, sink: Sink<K>) -> DispatchResult<Subscription<K>> {
        let (resp, rx) = oneshot::channel();
        self.send(RegistryCmd::Subscribe { sink, resp }).await?;
        let id = rx.await.map_err(|_| DispatchError::Closed)?;
        Ok(Subscription {
            id,
            registry: self.clone(),
        })
    }

    async fn unsubscribe(&self, id: u64) -> bool {
        let (resp, rx) = oneshot::channel();
        if self.send(RegistryCmd::Unsubscribe { id, resp }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Hand a commit notification to the registry. Returns once the registry
    /// has accepted it, not once every sink has received it.
    pub(crate) async fn publish(&self, store: Store<K>) -> DispatchResult<()> {
        self.send(RegistryCmd::Publish { store }).await
    }

    pub(crate) async fn count(&self) -> DispatchResult<usize> {
        let (resp, rx) = oneshot::channel();
        self.send(RegistryCmd::Count { resp }).await?;
        rx.await.map_err(|_| DispatchError::Closed)
    }

    async fn send(&self, cmd: RegistryCmd<K>) -> DispatchResult<()> {
        self.tx.send(cmd).await.map_err(|_| DispatchError::Closed)
    }
}

/// Returned by `Store::subscribe`. Dropping it does not unsubscribe.
pub struct Subscription<K: StateKey> {
    id: u64,
    registry: Registry<K>,
}

impl<K: StateKey> Subscription<K> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the sink and close it. `true` exactly once per subscription,
    /// even if the registry already dropped the sink because its receiver
    /// went away. `false` afterwards or once the store is gone.
    pub async fn unsubscribe(&self) -> bool {
        self.registry.unsubscribe(self.id).await
    }
}

impl<K: StateKey> std::fmt::Debug for Subscription<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

struct RegistryActor<K: StateKey> {
    sinks: BTreeMap<u64, Sink<K>>,
    /// Ids dropped because their receiver went away. The owner's first
    /// `unsubscribe` still reports success for them.
    pruned: BTreeSet<u64>,
    next_id: u64,
    rx: mpsc::Receiver<RegistryCmd<K>>,
    shutdown: CancellationToken,
}

impl<K: StateKey> RegistryActor<K> {
    async fn run(mut self) {
        let shutdown = self.shutdown.clone();
        loop {
            let cmd = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => cmd,
                    None => break,
                },
            };

            // A stuck sink must not keep the registry alive past shutdown.
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.handle(cmd) => {}
            }
        }
        debug!(subscribers = self.sinks.len(), "Subscriber registry stopped");
    }

    async fn handle(&mut self, cmd: RegistryCmd<K>) {
        match cmd {
            RegistryCmd::Subscribe { sink, resp } => {
                let id = self.next_id;
                self.next_id += 1;
                self.sinks.insert(id, sink);
                trace!(id, "Subscriber added");
                let _ = resp.send(id);
            }
            RegistryCmd::Unsubscribe { id, resp } => {
                // Dropping the sender closes the subscriber's channel.
                let removed = self.sinks.remove(&id).is_some() || self.pruned.remove(&id);
                trace!(id, removed, "Subscriber removed");
                let _ = resp.send(removed);
            }
            RegistryCmd::Publish { store } => self.publish(store).await,
            RegistryCmd::Count { resp } => {
                let _ = resp.send(self.sinks.len());
            }
        }
    }

    async fn publish(&mut self, store: Store<K>) {
        let mut closed = Vec::new();
        for (id, sink) in &self.sinks {
            if sink.send(store.clone()).await.is_err() {
                closed.push(*id);
            }
        }
        for id in closed {
            debug!(id, "Pruning subscriber with dropped receiver");
            self.sinks.remove(&id);
            self.pruned.insert(id);
        }
    }
}
