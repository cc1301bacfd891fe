//! The action queue.
//!
//! Enqueue → middleware chain → snapshot → update → commit → publish, one
//! action at a time in arrival order. The next action is not dequeued until
//! the current one has fully settled.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::DispatchResult;
use crate::middleware::{self, Middleware, Next};
use crate::owner::StateOwner;
use crate::store::{PerformDispatch, WeakStore};
use crate::subscribers::Registry;
use crate::traits::StateKey;
use crate::types::Action;

/// A dispatch waiting its turn. `resp` is answered exactly once.
pub(crate) struct QueuedAction {
    pub(crate) ctx: Context,
    pub(crate) action: Action,
    pub(crate) resp: oneshot::Sender<DispatchResult>,
}

pub(crate) struct Sequencer {
    rx: mpsc::Receiver<QueuedAction>,
    chain: Middleware,
    terminal: Next,
    shutdown: CancellationToken,
    processed: u64,
}

impl Sequencer {
    pub(crate) fn spawn<K: StateKey>(
        rx: mpsc::Receiver<QueuedAction>,
        chain: Middleware,
        perform_dispatch: PerformDispatch<K>,
        owner: StateOwner<K>,
        registry: Registry<K>,
        store: WeakStore<K>,
        shutdown: CancellationToken,
    ) {
        let sequencer = Sequencer {
            rx,
            chain,
            terminal: terminal(perform_dispatch, owner, registry, store),
            shutdown,
            processed: 0,
        };
        tokio::spawn(sequencer.run());
    }

    async fn run(mut self) {
        loop {
            let queued = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                queued = self.rx.recv() => match queued {
                    Some(queued) => queued,
                    None => break,
                },
            };
            self.process(queued).await;
        }
        // Requests still queued are dropped with their reply slots; their
        // callers see `DispatchError::Closed`.
        debug!(processed = self.processed, "Action sequencer stopped");
    }

    async fn process(&mut self, queued: QueuedAction) {
        let QueuedAction { ctx, action, resp } = queued;
        let seq = self.processed;
        self.processed += 1;

        let action_type = action.type_name();
        debug!(seq, action = action_type, "Processing action");

        let result = (self.chain)(ctx, action, Arc::clone(&self.terminal)).await;
        if let Err(err) = &result {
            warn!(seq, action = action_type, error = %err, "Dispatch failed, state unchanged");
        }

        // The caller may have stopped waiting; the outcome stands regardless.
        let _ = resp.send(result);
    }
}

/// The innermost continuation: read the snapshot, update, commit, publish.
/// Nothing is written when the update fails. Once the commit lands the
/// dispatch succeeds, even if the notification cannot be handed off.
fn terminal<K: StateKey>(
    perform_dispatch: PerformDispatch<K>,
    owner: StateOwner<K>,
    registry: Registry<K>,
    store: WeakStore<K>,
) -> Next {
    middleware::next_fn(move |ctx: Context, action: Action| {
        let perform_dispatch = Arc::clone(&perform_dispatch);
        let owner = owner.clone();
        let registry = registry.clone();
        let store = store.clone();
        async move {
            let current = owner.snapshot().await?;
            let next = perform_dispatch(ctx, current, action).await?;
            let units = next.len();
            owner.commit(next).await?;
            debug!(units, "State committed");

            // The commit stands from here on; a lost notification does not
            // turn it into a failed dispatch.
            if let Some(store) = store.upgrade() {
                if let Err(err) = registry.publish(store).await {
                    warn!(error = %err, "State committed but subscribers were not notified");
                }
            }
            Ok(())
        }
    })
}
