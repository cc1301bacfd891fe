//! Cancellation and deadline propagation for dispatches.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::traits::StateKey;

/// Carries a cancellation signal and an optional deadline into a dispatch.
///
/// Cancelling a context cancels every context derived from it, never the
/// other way round.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A fresh context that is never cancelled unless asked to.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context cancelled together with this one, or on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that expires at `deadline` (or earlier, if this one does).
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.err().is_some()
    }

    /// Why this context is done, if it is.
    pub fn err(&self) -> Option<DispatchError> {
        if self.token.is_cancelled() {
            return Some(DispatchError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DispatchError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> DispatchError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => DispatchError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => DispatchError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                DispatchError::Cancelled
            }
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// What a unit sees while computing its successor: its own key plus the
/// per-dispatch context.
///
/// The context is cancelled as soon as a sibling unit fails, so long-running
/// units can stop early. Their results are discarded either way.
#[derive(Debug, Clone)]
pub struct UpdateContext<K: StateKey> {
    key: K,
    ctx: Context,
}

impl<K: StateKey> UpdateContext<K> {
    pub fn new(key: K, ctx: Context) -> Self {
        Self { key, ctx }
    }

    /// The key this unit is registered under.
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.ctx.done().await;
    }

    pub fn into_key(self) -> K {
        self.key
    }
}
