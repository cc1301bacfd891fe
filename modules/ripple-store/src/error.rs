//! Typed errors for dispatch.

use thiserror::Error;

/// Error type returned by `Updater::update` and by middleware nodes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors a dispatch can surface to its caller.
///
/// Whatever the variant, a failed dispatch never touches the canonical state
/// and never notifies subscribers.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A unit rejected the action. Only the first failure is reported.
    #[error("update failed for key {key}: {source}")]
    Update {
        key: String,
        #[source]
        source: BoxError,
    },

    /// A unit panicked while computing its successor.
    #[error("update panicked for key {key}: {message}")]
    UnitPanicked { key: String, message: String },

    /// The caller's context was cancelled before the commit.
    #[error("dispatch cancelled")]
    Cancelled,

    /// The caller's context deadline passed before the commit.
    #[error("dispatch deadline exceeded")]
    DeadlineExceeded,

    /// A middleware node failed the dispatch on purpose.
    #[error("middleware rejected dispatch: {0}")]
    Middleware(#[source] BoxError),

    /// The store was shut down (or every handle dropped).
    #[error("store is closed")]
    Closed,
}

impl DispatchError {
    /// Wrap an arbitrary error raised inside a middleware node.
    pub fn middleware(err: impl Into<BoxError>) -> Self {
        DispatchError::Middleware(err.into())
    }

    /// The error a unit returned, if this is a unit update failure.
    pub fn unit_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            DispatchError::Update { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }

    /// Key of the unit that failed, for `Update` and `UnitPanicked`.
    pub fn key(&self) -> Option<&str> {
        match self {
            DispatchError::Update { key, .. } | DispatchError::UnitPanicked { key, .. } => {
                Some(key)
            }
            _ => None,
        }
    }

    /// True for caller-side cancellation (explicit or deadline).
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            DispatchError::Cancelled | DispatchError::DeadlineExceeded
        )
    }
}

/// Result type alias for dispatch operations.
pub type DispatchResult<T = ()> = std::result::Result<T, DispatchError>;
