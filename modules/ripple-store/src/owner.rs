//! State owner actor: the only holder of the live snapshot.
//!
//! Every read and write is a closure sent to the owner task and run there
//! one at a time, so no access ever overlaps another.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};
use crate::traits::StateKey;
use crate::types::State;

type Access<K> = Box<dyn FnOnce(&mut State<K>) + Send>;

const INBOX_CAPACITY: usize = 32;

/// Handle to the state owner task.
pub(crate) struct StateOwner<K: StateKey> {
    tx: mpsc::Sender<Access<K>>,
}

impl<K: StateKey> Clone for StateOwner<K> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<K: StateKey> StateOwner<K> {
    /// Spawn the owner task. `initial` is moved in, so nothing outside can
    /// reach the live snapshot.
    pub(crate) fn spawn(initial: State<K>, shutdown: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        tokio::spawn(run(initial, rx, shutdown));
        Self { tx }
    }

    /// Run `f` against the live snapshot with exclusive access.
    pub(crate) async fn with_state<F, R>(&self, f: F) -> DispatchResult<R>
    where
        F: FnOnce(&mut State<K>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (resp_tx, resp_rx) = oneshot::channel();
        let access: Access<K> = Box::new(move |state| {
            let _ = resp_tx.send(f(state));
        });
        self.tx
            .send(access)
            .await
            .map_err(|_| DispatchError::Closed)?;
        resp_rx.await.map_err(|_| DispatchError::Closed)
    }

    /// Shallow copy of the live snapshot.
    pub(crate) async fn snapshot(&self) -> DispatchResult<State<K>> {
        self.with_state(|state| state.clone()).await
    }

    /// Replace every key present in `next`.
    pub(crate) async fn commit(&self, next: State<K>) -> DispatchResult<()> {
        self.with_state(move |state| state.merge(next)).await
    }
}

async fn run<K: StateKey>(
    mut state: State<K>,
    mut rx: mpsc::Receiver<Access<K>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            access = rx.recv() => match access {
                Some(access) => access(&mut state),
                None => break,
            },
        }
    }
    debug!(units = state.len(), "State owner stopped");
}
