//! "Has the page settled?" — the two halves of the quiescence oracle.
//!
//! [`idle`] watches the in-flight request set and announces a network-idle
//! window; [`waiter`] composes the full set of settling signals around a
//! user action and decides when (or whether) the page navigated at all.

pub mod idle;
pub mod waiter;

pub use idle::{IdleTracker, DEFAULT_QUIET_WINDOW};
pub use waiter::{Expectation, NavigationWaiter, Settled, WaitError, WaitOptions};
