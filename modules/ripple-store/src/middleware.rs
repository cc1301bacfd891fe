//! Middleware chain wrapping dispatch.
//!
//! A middleware node receives the context, the action, and a `Next`
//! continuation for the rest of the chain. It can inspect or replace the
//! pair before forwarding, inspect or transform the result afterwards, or
//! skip `next` entirely. Skipping short-circuits the chain: nothing below it
//! runs, nothing commits, and the dispatch resolves to whatever the node
//! returns.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{BoxError, DispatchError, DispatchResult};
use crate::store::{Store, StoreConfig};
use crate::traits::StateKey;
use crate::types::Action;

/// The rest of the chain, as seen from a middleware node.
pub type Next = Arc<dyn Fn(Context, Action) -> BoxFuture<'static, DispatchResult> + Send + Sync>;

/// One interceptor in the chain.
pub type Middleware =
    Arc<dyn Fn(Context, Action, Next) -> BoxFuture<'static, DispatchResult> + Send + Sync>;

/// Builds a middleware once the store exists, so the node can read from it
/// or spawn follow-up dispatches.
///
/// Dispatching from inside a node and awaiting the result deadlocks: the
/// sequencer runs one action at a time. Spawn the dispatch instead.
pub type MiddlewareFactory<K> = Box<dyn FnOnce(&Store<K>) -> Middleware + Send>;

/// Adapt an async closure into a `Middleware`.
pub fn from_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(Context, Action, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult> + Send + 'static,
{
    Arc::new(
        move |ctx: Context, action: Action, next: Next| -> BoxFuture<'static, DispatchResult> {
            f(ctx, action, next).boxed()
        },
    )
}

/// Adapt an async closure into a `Next` continuation.
pub fn next_fn<F, Fut>(f: F) -> Next
where
    F: Fn(Context, Action) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult> + Send + 'static,
{
    Arc::new(
        move |ctx: Context, action: Action| -> BoxFuture<'static, DispatchResult> {
            f(ctx, action).boxed()
        },
    )
}

/// Wrap `terminal` in `mws`, outermost first.
///
/// Calling the result runs `mws[0]`, whose `next` runs `mws[1]`, and so on
/// down to `terminal`. With no middleware this is `terminal` itself.
pub fn wrap(mws: &[Middleware], terminal: Next) -> Next {
    mws.iter().rev().fold(terminal, |next, mw| {
        let mw = Arc::clone(mw);
        let wrapped: Next = Arc::new(
            move |ctx: Context, action: Action| -> BoxFuture<'static, DispatchResult> {
                mw(ctx, action, Arc::clone(&next))
            },
        );
        wrapped
    })
}

/// Combine several middleware into one.
///
/// `compose(vec![])` forwards straight to whatever `Next` it is given.
pub fn compose(mws: Vec<Middleware>) -> Middleware {
    let mws: Arc<[Middleware]> = mws.into();
    Arc::new(
        move |ctx: Context, action: Action, terminal: Next| -> BoxFuture<'static, DispatchResult> {
            wrap(&mws, terminal)(ctx, action)
        },
    )
}

/// Store configuration function that installs the given middleware, in order,
/// after any installed earlier.
pub fn apply<K: StateKey>(
    factories: Vec<MiddlewareFactory<K>>,
) -> impl FnOnce(&mut StoreConfig<K>) {
    move |config: &mut StoreConfig<K>| config.middleware.extend(factories)
}

/// Factory for a middleware that does not need the store.
pub fn factory<K: StateKey>(mw: Middleware) -> MiddlewareFactory<K> {
    Box::new(move |_store: &Store<K>| mw)
}

/// Logs each dispatch with its outcome and duration.
pub fn logging() -> Middleware {
    from_fn(|ctx: Context, action: Action, next: Next| async move {
        let started = Instant::now();
        let action_type = action.type_name();
        debug!(action = action_type, "Dispatching");

        let result = next(ctx, action).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(action = action_type, elapsed_ms, "Dispatch complete"),
            Err(err) => warn!(action = action_type, elapsed_ms, error = %err, "Dispatch failed"),
        }
        result
    })
}

/// Drops actions the predicate rejects. A dropped action is not an error;
/// the dispatch succeeds without a state change.
pub fn filter<P>(predicate: P) -> Middleware
where
    P: Fn(&Action) -> bool + Send + Sync + 'static,
{
    let predicate = Arc::new(predicate);
    from_fn(move |ctx: Context, action: Action, next: Next| {
        let predicate = Arc::clone(&predicate);
        async move {
            if !predicate(&action) {
                debug!(action = action.type_name(), "Action filtered out");
                return Ok(());
            }
            next(ctx, action).await
        }
    })
}

/// Fails the dispatch when `check` rejects the action.
pub fn validate<C>(check: C) -> Middleware
where
    C: Fn(&Action) -> Result<(), BoxError> + Send + Sync + 'static,
{
    let check = Arc::new(check);
    from_fn(move |ctx: Context, action: Action, next: Next| {
        let check = Arc::clone(&check);
        async move {
            check(&action).map_err(DispatchError::Middleware)?;
            next(ctx, action).await
        }
    })
}
