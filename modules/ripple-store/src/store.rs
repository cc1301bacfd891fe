//! The `Store` handle and its construction.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::StoreSettings;
use crate::context::Context;
use crate::engine;
use crate::error::{DispatchError, DispatchResult};
use crate::middleware::{self, Middleware, MiddlewareFactory};
use crate::owner::StateOwner;
use crate::sequencer::{QueuedAction, Sequencer};
use crate::subscribers::{Registry, Sink, Subscription};
use crate::traits::{Selector, StateKey};
use crate::types::{Action, State};

/// Computes the next snapshot for an action. The default is
/// [`engine::apply`]; replace it to stub out updates in tests or to change
/// the fan-out strategy.
pub type PerformDispatch<K> = Arc<
    dyn Fn(Context, State<K>, Action) -> BoxFuture<'static, DispatchResult<State<K>>>
        + Send
        + Sync,
>;

/// The parallel fan-out/fan-in update.
pub fn default_perform_dispatch<K: StateKey>() -> PerformDispatch<K> {
    Arc::new(
        |ctx: Context,
         state: State<K>,
         action: Action|
         -> BoxFuture<'static, DispatchResult<State<K>>> {
            async move { engine::apply(&ctx, state, &action).await }.boxed()
        },
    )
}

/// Everything a store is built from, besides its initial state.
pub struct StoreConfig<K: StateKey> {
    pub perform_dispatch: PerformDispatch<K>,
    /// Outermost first.
    pub middleware: Vec<MiddlewareFactory<K>>,
    pub settings: StoreSettings,
}

impl<K: StateKey> Default for StoreConfig<K> {
    fn default() -> Self {
        Self {
            perform_dispatch: default_perform_dispatch(),
            middleware: Vec::new(),
            settings: StoreSettings::default(),
        }
    }
}

/// Builder for a `Store`. Each method is a configuration step applied in
/// call order.
pub struct StoreBuilder<K: StateKey> {
    initial: State<K>,
    config: StoreConfig<K>,
}

impl<K: StateKey> StoreBuilder<K> {
    /// Apply an arbitrary configuration function, e.g. `middleware::apply(..)`.
    pub fn configure(mut self, f: impl FnOnce(&mut StoreConfig<K>)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn middleware(mut self, mw: Middleware) -> Self {
        self.config.middleware.push(middleware::factory(mw));
        self
    }

    /// Middleware that needs the store itself. Hold on to it through
    /// `Store::downgrade`, otherwise the store never shuts down on drop.
    pub fn middleware_with(
        mut self,
        factory: impl FnOnce(&Store<K>) -> Middleware + Send + 'static,
    ) -> Self {
        self.config.middleware.push(Box::new(factory));
        self
    }

    pub fn perform_dispatch(mut self, perform_dispatch: PerformDispatch<K>) -> Self {
        self.config.perform_dispatch = perform_dispatch;
        self
    }

    pub fn settings(mut self, settings: StoreSettings) -> Self {
        self.config.settings = settings;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.settings.queue_capacity = capacity;
        self
    }

    pub fn notify_capacity(mut self, capacity: usize) -> Self {
        self.config.settings.notify_capacity = capacity;
        self
    }

    pub fn build(self) -> Store<K> {
        Store::start(self.initial, self.config)
    }
}

struct Inner<K: StateKey> {
    queue: mpsc::Sender<QueuedAction>,
    owner: StateOwner<K>,
    registry: Registry<K>,
    shutdown: CancellationToken,
}

impl<K: StateKey> Drop for Inner<K> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Handle to a running store. Cheap to clone; every clone talks to the same
/// actors.
///
/// The actors stop when the last handle is dropped or on [`Store::shutdown`].
/// Must be created inside a tokio runtime.
pub struct Store<K: StateKey> {
    inner: Arc<Inner<K>>,
}

impl<K: StateKey> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: StateKey> fmt::Debug for Store<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<K: StateKey> Store<K> {
    /// Start a store with default configuration.
    pub fn new(initial: State<K>) -> Self {
        Self::start(initial, StoreConfig::default())
    }

    pub fn builder(initial: State<K>) -> StoreBuilder<K> {
        StoreBuilder {
            initial,
            config: StoreConfig::default(),
        }
    }

    /// Start a store after applying each configuration function, in order,
    /// to a default `StoreConfig`. Mix different closures by boxing them.
    pub fn with_config<I, F>(initial: State<K>, configs: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: FnOnce(&mut StoreConfig<K>),
    {
        let mut config = StoreConfig::default();
        for configure in configs {
            configure(&mut config);
        }
        Self::start(initial, config)
    }

    fn start(initial: State<K>, config: StoreConfig<K>) -> Self {
        let StoreConfig {
            perform_dispatch,
            middleware: factories,
            settings,
        } = config;

        let shutdown = CancellationToken::new();
        let units = initial.len();
        let owner = StateOwner::spawn(initial, shutdown.clone());
        let registry = Registry::spawn(settings.notify_capacity, shutdown.clone());
        let (queue, queue_rx) = mpsc::channel(settings.queue_capacity.max(1));

        let store = Store {
            inner: Arc::new(Inner {
                queue,
                owner: owner.clone(),
                registry: registry.clone(),
                shutdown: shutdown.clone(),
            }),
        };

        let middleware: Vec<Middleware> = factories
            .into_iter()
            .map(|factory| factory(&store))
            .collect();
        let layers = middleware.len();
        let chain = middleware::compose(middleware);

        Sequencer::spawn(
            queue_rx,
            chain,
            perform_dispatch,
            owner,
            registry,
            store.downgrade(),
            shutdown,
        );

        debug!(
            units,
            middleware = layers,
            queue_capacity = settings.queue_capacity,
            "Store started"
        );
        store
    }

    /// Queue `action` and wait for it to settle.
    ///
    /// Dispatches run one at a time in arrival order. On error the state is
    /// exactly what it was before and subscribers hear nothing. `Ok` also
    /// covers an action dropped by middleware without a state change, and a
    /// commit whose notification was lost to shutdown.
    pub async fn dispatch(&self, ctx: &Context, action: Action) -> DispatchResult {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }
        let (resp, rx) = oneshot::channel();
        let queued = QueuedAction {
            ctx: ctx.clone(),
            action,
            resp,
        };
        self.inner
            .queue
            .send(queued)
            .await
            .map_err(|_| DispatchError::Closed)?;
        rx.await.map_err(|_| DispatchError::Closed)?
    }

    /// `dispatch` with a fresh context, wrapping `value` as the action.
    pub async fn dispatch_action<A: Any + Send + Sync>(&self, value: A) -> DispatchResult {
        self.dispatch(&Context::new(), Action::new(value)).await
    }

    /// Let `selector` pull what it needs from the current state.
    ///
    /// The selector reads a shallow copy taken by the state owner, so it can
    /// never observe a half-applied commit.
    pub async fn select<S: Selector<K> + ?Sized>(&self, selector: &mut S) -> DispatchResult {
        let snapshot = self.inner.owner.snapshot().await?;
        selector.select_from(&snapshot);
        Ok(())
    }

    /// Run `f` on the state owner against the live snapshot, read-only.
    pub async fn read<F, R>(&self, f: F) -> DispatchResult<R>
    where
        F: FnOnce(&State<K>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.inner.owner.with_state(move |state| f(state)).await
    }

    /// Shallow copy of the current state.
    pub async fn snapshot(&self) -> DispatchResult<State<K>> {
        self.inner.owner.snapshot().await
    }

    /// Send this store to `sink` after every successful commit until
    /// unsubscribed.
    pub async fn subscribe(&self, sink: Sink<K>) -> DispatchResult<Subscription<K>> {
        self.inner.registry.subscribe(sink).await
    }

    /// Subscribe through a fresh channel of the given capacity.
    pub async fn subscribe_channel(
        &self,
        capacity: usize,
    ) -> DispatchResult<(Subscription<K>, mpsc::Receiver<Store<K>>)> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscription = self.subscribe(tx).await?;
        Ok((subscription, rx))
    }

    pub async fn subscriber_count(&self) -> DispatchResult<usize> {
        self.inner.registry.count().await
    }

    /// Stop all actors. Pending and later calls fail with `Closed`.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn downgrade(&self) -> WeakStore<K> {
        WeakStore {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning store handle. Does not keep the actors alive.
pub struct WeakStore<K: StateKey> {
    inner: Weak<Inner<K>>,
}

impl<K: StateKey> Clone for WeakStore<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<K: StateKey> WeakStore<K> {
    pub fn upgrade(&self) -> Option<Store<K>> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}
