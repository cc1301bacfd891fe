//! The fan-out/fan-in update.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::context::{Context, UpdateContext};
use crate::error::{DispatchError, DispatchResult};
use crate::traits::StateKey;
use crate::types::{Action, State};

/// Compute the next snapshot for one action.
///
/// Every unit runs as its own task. The result is either a snapshot holding a
/// successor for every key, or the first error observed. On error the
/// remaining units are signalled through their context and left to finish on
/// their own; their results are dropped. Cancellation of `ctx` wins over both
/// success and unit errors.
pub async fn apply<K: StateKey>(
    ctx: &Context,
    state: State<K>,
    action: &Action,
) -> DispatchResult<State<K>> {
    if let Some(err) = ctx.err() {
        return Err(err);
    }

    let expected = state.len();
    if expected == 0 {
        return Ok(State::new());
    }

    // Per-dispatch scope: cancelled on every exit path, including drop.
    let scope = ctx.child();
    let _cancel_on_exit = scope.token().clone().drop_guard();

    debug!(units = expected, action = action.type_name(), "Fanning out update");

    let mut tasks = JoinSet::new();
    let mut keys = HashMap::with_capacity(expected);
    for (key, unit) in state {
        let update_ctx = UpdateContext::new(key.clone(), scope.clone());
        let action = action.clone();
        // `update` itself may panic before returning a future, so the call
        // happens inside the guard.
        let handle = tasks.spawn(async move {
            let outcome = AssertUnwindSafe(async { unit.update(&update_ctx, &action).await })
                .catch_unwind()
                .await;
            (update_ctx.into_key(), outcome)
        });
        keys.insert(handle.id(), key);
    }

    let mut next = State::with_capacity(expected);
    let result = loop {
        tokio::select! {
            biased;

            err = ctx.done() => break Err(err),

            joined = tasks.join_next_with_id() => match joined {
                Some(Ok((_, (key, Ok(Ok(unit)))))) => {
                    trace!(key = ?key, "Unit updated");
                    next.insert(key, unit);
                    if next.len() == expected {
                        break Ok(next);
                    }
                }
                Some(Ok((_, (key, Ok(Err(source)))))) => {
                    break Err(DispatchError::Update {
                        key: format!("{key:?}"),
                        source,
                    });
                }
                Some(Ok((_, (key, Err(panic))))) => {
                    break Err(DispatchError::UnitPanicked {
                        key: format!("{key:?}"),
                        message: panic_message(panic.as_ref()),
                    });
                }
                Some(Err(join_err)) if join_err.is_panic() => {
                    let key = keys
                        .remove(&join_err.id())
                        .map(|key| format!("{key:?}"))
                        .unwrap_or_default();
                    break Err(DispatchError::UnitPanicked {
                        key,
                        message: panic_message(join_err.into_panic().as_ref()),
                    });
                }
                // Aborted tasks only show up when the runtime is going away.
                Some(Err(_)) | None => break Err(DispatchError::Closed),
            },
        }
    };

    if let Err(err) = &result {
        debug!(error = %err, "Update aborted");
        scope.cancel();
    }
    tasks.detach_all();

    result
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");

        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(owned.as_ref()), "bang");

        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
