//! Store settings loaded from the environment.

use anyhow::{Context as _, Result};

pub const DEFAULT_QUEUE_CAPACITY: usize = 8;
pub const DEFAULT_NOTIFY_CAPACITY: usize = 1;

/// Queue sizes for a store.
///
/// `queue_capacity` bounds pending dispatches; callers wait once it is full.
/// `notify_capacity` bounds commit notifications waiting on the subscriber
/// registry; once full, the dispatch path waits on slow subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub queue_capacity: usize,
    pub notify_capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            notify_capacity: DEFAULT_NOTIFY_CAPACITY,
        }
    }
}

impl StoreSettings {
    /// Read `RIPPLE_QUEUE_CAPACITY` and `RIPPLE_NOTIFY_CAPACITY`, falling back
    /// to the defaults when unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let settings = Self {
            queue_capacity: capacity(&lookup, "RIPPLE_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            notify_capacity: capacity(
                &lookup,
                "RIPPLE_NOTIFY_CAPACITY",
                DEFAULT_NOTIFY_CAPACITY,
            )?,
        };
        settings.log();
        Ok(settings)
    }

    pub fn log(&self) {
        tracing::info!("Store settings loaded:");
        tracing::info!("  RIPPLE_QUEUE_CAPACITY: {}", self.queue_capacity);
        tracing::info!("  RIPPLE_NOTIFY_CAPACITY: {}", self.notify_capacity);
    }
}

fn capacity(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: usize) -> Result<usize> {
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    let value: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("{name} must be a positive integer, got {raw:?}"))?;
    anyhow::ensure!(value > 0, "{name} must be at least 1");
    Ok(value)
}
