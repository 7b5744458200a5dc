//! Cooperative cancellation of a backward pass
//!
//! The extractor polls its watchdog every [`Watchdog::poll_every`] instances,
//! and so does the trace producer thread in pipeline mode. Stopping is
//! best-effort: a visitor callback that runs for a long time is not
//! interrupted until it returns.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default number of instances between two polls
pub const DEFAULT_POLL_INTERVAL: usize = 1 << 16;

/// A dynamically dispatched [`Watchdog`] instance.
pub type DynWatchdog = Arc<dyn Watchdog>;

/// An object that can be polled to see if the backward pass needs to abort.
pub trait Watchdog: Debug + Send + Sync {
    /// Checks if the pass should halt and return [`crate::Error::Interrupted`].
    #[must_use]
    fn should_stop(&self) -> bool;

    /// Number of instances to process between two polls.
    #[must_use]
    fn poll_every(&self) -> usize;
}

/// A watchdog that never stops the pass.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LazyWatchdog;

impl LazyWatchdog {
    /// Wraps `self` into an [`Arc`].
    #[must_use]
    pub fn in_arc(self) -> DynWatchdog {
        Arc::new(self)
    }
}

impl Watchdog for LazyWatchdog {
    fn should_stop(&self) -> bool {
        false
    }

    fn poll_every(&self) -> usize {
        DEFAULT_POLL_INTERVAL
    }
}

/// A watchdog that stops the pass once a shared flag is set.
#[derive(Clone, Debug)]
pub struct FlagWatchdog {
    flag: Arc<AtomicBool>,
    poll_interval: usize,
}

impl FlagWatchdog {
    /// Constructs a new `FlagWatchdog` wrapping the provided `flag`.
    #[must_use]
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self {
            flag,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Specifies the number of instances between two polls.
    #[must_use]
    pub fn polling_every(mut self, instances: usize) -> Self {
        self.poll_interval = instances.max(1);
        self
    }

    /// Wraps the watchdog into an [`Arc`].
    #[must_use]
    pub fn in_arc(self) -> DynWatchdog {
        Arc::new(self)
    }
}

impl Watchdog for FlagWatchdog {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    fn poll_every(&self) -> usize {
        self.poll_interval
    }
}
