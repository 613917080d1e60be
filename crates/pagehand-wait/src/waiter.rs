//! The navigation waiter: did the action make the page move, and if so,
//! when has it settled?
//!
//! The waiter is armed *before* the action runs so no signal can be lost.
//! Expectations are added conditionally as signals arrive — a frame that
//! starts loading promises a load event and a frame stop, a created target
//! promises a navigation, an XHR promises network idle. If nothing arms
//! within the start window the action caused no navigation and the wait
//! returns immediately. The subscription is a scoped guard, so every exit
//! path leaves the bus without the action's listener.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace};

use pagehand_bus::{PageSignal, SignalBus, SignalSubscription};
use pagehand_core::PagehandError;

/// How long to wait for any settling signal before concluding the action
/// did not navigate.
pub const DEFAULT_WAIT_FOR_START: Duration = Duration::from_millis(500);

/// Default deadline for the whole wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Poll interval for the root-document readiness check.
const ROOT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug)]
pub struct WaitOptions {
    /// When false the action skips the settling wait entirely.
    pub await_navigation: bool,
    pub wait_for_start: Duration,
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            await_navigation: true,
            wait_for_start: DEFAULT_WAIT_FOR_START,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl WaitOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// A settling signal the waiter has promised to see before returning.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Expectation {
    Load,
    DomContent,
    FrameStopped(String),
    TargetNavigated,
    NetworkIdle,
    FirstMeaningfulPaint,
}

/// Outcome of a completed wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Settled {
    /// Nothing armed within the start window.
    NoNavigation,
    /// Every armed expectation was satisfied.
    Navigated,
}

#[derive(Clone, Debug, Error)]
pub enum WaitError {
    #[error("navigation did not settle within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("signal bus closed while waiting")]
    BusClosed,
}

impl From<WaitError> for PagehandError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout { timeout_ms } => PagehandError::NavigationTimeout { timeout_ms },
            WaitError::BusClosed => PagehandError::Internal(err.to_string()),
        }
    }
}

pub struct NavigationWaiter {
    subscription: SignalSubscription,
    expected: HashSet<Expectation>,
    satisfied: HashSet<Expectation>,
}

impl NavigationWaiter {
    /// Subscribe to the bus. Must happen before the action is dispatched.
    pub fn arm(bus: &SignalBus) -> Self {
        Self {
            subscription: bus.subscribe(),
            expected: HashSet::new(),
            satisfied: HashSet::new(),
        }
    }

    /// Pre-arm an expectation the caller knows must come (e.g. `goto`
    /// promises a load and a DOM-content event up front).
    pub fn expect(&mut self, expectation: Expectation) {
        self.expected.insert(expectation);
    }

    /// Run the waiting protocol. `root_ready` is polled once all armed
    /// expectations are satisfied; it reports whether the attached target's
    /// root document id is available again.
    pub async fn settle<F, Fut>(
        mut self,
        options: &WaitOptions,
        root_ready: F,
    ) -> Result<Settled, WaitError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        let started = Instant::now();
        let deadline = started + options.timeout;
        let start_deadline = started + options.wait_for_start;

        // Phase 1: wait for the expectation set to become non-empty. This
        // resolves on the first arming signal, never on satisfaction — an
        // empty set after the window means the action did not navigate.
        while self.expected.is_empty() {
            let now = Instant::now();
            if now >= start_deadline {
                trace!("nothing armed within start window");
                return Ok(Settled::NoNavigation);
            }
            match tokio::time::timeout(start_deadline - now, self.subscription.recv()).await {
                Ok(Some(signal)) => self.absorb(&signal),
                Ok(None) => return Err(WaitError::BusClosed),
                Err(_) => return Ok(Settled::NoNavigation),
            }
        }

        // Phase 2: drain signals until everything armed is satisfied. New
        // arrivals may keep extending the set.
        while !self.complete() {
            let now = Instant::now();
            if now >= deadline {
                return Err(self.timeout_error(options));
            }
            match tokio::time::timeout(deadline - now, self.subscription.recv()).await {
                Ok(Some(signal)) => self.absorb(&signal),
                Ok(None) => return Err(WaitError::BusClosed),
                Err(_) => return Err(self.timeout_error(options)),
            }
        }

        // Phase 3: the DOM session must be usable again before control
        // returns to the caller.
        while !root_ready().await {
            if Instant::now() + ROOT_POLL_INTERVAL >= deadline {
                return Err(self.timeout_error(options));
            }
            tokio::time::sleep(ROOT_POLL_INTERVAL).await;
        }

        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "page settled");
        Ok(Settled::Navigated)
    }

    fn complete(&self) -> bool {
        self.expected.iter().all(|e| self.satisfied.contains(e))
    }

    fn timeout_error(&self, options: &WaitOptions) -> WaitError {
        debug!(
            expected = ?self.expected,
            satisfied = ?self.satisfied,
            "navigation wait timed out"
        );
        WaitError::Timeout {
            timeout_ms: options.timeout.as_millis() as u64,
        }
    }

    /// Apply the arming rules and record satisfactions for one signal.
    fn absorb(&mut self, signal: &PageSignal) {
        match signal {
            PageSignal::FrameStartedLoading { frame } => {
                self.expected.insert(Expectation::Load);
                self.expected.insert(Expectation::FrameStopped(frame.clone()));
            }
            PageSignal::TargetCreated { .. } => {
                self.expected.insert(Expectation::TargetNavigated);
            }
            PageSignal::RequestStarted { .. } => {
                self.expected.insert(Expectation::NetworkIdle);
            }
            PageSignal::LoadEventFired => {
                self.satisfied.insert(Expectation::Load);
            }
            PageSignal::DomContentEventFired => {
                self.satisfied.insert(Expectation::DomContent);
            }
            PageSignal::FrameStoppedLoading { frame } => {
                self.satisfied
                    .insert(Expectation::FrameStopped(frame.clone()));
            }
            PageSignal::NetworkIdle => {
                self.satisfied.insert(Expectation::NetworkIdle);
            }
            PageSignal::TargetNavigated { .. } => {
                self.satisfied.insert(Expectation::TargetNavigated);
            }
            PageSignal::FirstMeaningfulPaint => {
                self.satisfied.insert(Expectation::FirstMeaningfulPaint);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagehand_core::{RequestId, TargetId};

    fn opts(start_ms: u64, timeout_ms: u64) -> WaitOptions {
        WaitOptions {
            await_navigation: true,
            wait_for_start: Duration::from_millis(start_ms),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_navigation_returns_after_start_window() {
        let bus = SignalBus::new(32);
        let waiter = NavigationWaiter::arm(&bus);
        let outcome = waiter
            .settle(&opts(500, 15_000), || async { true })
            .await
            .unwrap();
        assert_eq!(outcome, Settled::NoNavigation);
    }

    #[tokio::test(start_paused = true)]
    async fn frame_start_arms_load_and_frame_stop() {
        let bus = SignalBus::new(32);
        let waiter = NavigationWaiter::arm(&bus);

        bus.publish(PageSignal::FrameStartedLoading {
            frame: "f1".into(),
        });
        bus.publish(PageSignal::LoadEventFired);
        bus.publish(PageSignal::FrameStoppedLoading {
            frame: "f1".into(),
        });

        let outcome = waiter
            .settle(&opts(500, 15_000), || async { true })
            .await
            .unwrap();
        assert_eq!(outcome, Settled::Navigated);
    }

    #[tokio::test(start_paused = true)]
    async fn xhr_extends_the_wait_with_network_idle() {
        let bus = SignalBus::new(32);
        let mut waiter = NavigationWaiter::arm(&bus);
        waiter.expect(Expectation::Load);

        bus.publish(PageSignal::LoadEventFired);
        // An XHR right after load means the wait must now include idle.
        bus.publish(PageSignal::RequestStarted {
            request: RequestId("r1".into()),
        });
        bus.publish(PageSignal::RequestSettled {
            request: RequestId("r1".into()),
        });
        bus.publish(PageSignal::NetworkIdle);

        let outcome = waiter
            .settle(&opts(500, 15_000), || async { true })
            .await
            .unwrap();
        assert_eq!(outcome, Settled::Navigated);
    }

    #[tokio::test(start_paused = true)]
    async fn unsatisfied_expectation_times_out_with_budget() {
        let bus = SignalBus::new(32);
        let mut waiter = NavigationWaiter::arm(&bus);
        waiter.expect(Expectation::Load);

        let err = waiter
            .settle(&opts(500, 2_000), || async { true })
            .await
            .unwrap_err();
        match err {
            WaitError::Timeout { timeout_ms } => assert_eq!(timeout_ms, 2_000),
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn target_created_promises_a_navigation() {
        let bus = SignalBus::new(32);
        let waiter = NavigationWaiter::arm(&bus);

        bus.publish(PageSignal::TargetCreated {
            target: TargetId("t2".into()),
        });
        bus.publish(PageSignal::TargetNavigated {
            target: TargetId("t2".into()),
            url: "http://b.example/".into(),
        });

        let outcome = waiter
            .settle(&opts(500, 15_000), || async { true })
            .await
            .unwrap();
        assert_eq!(outcome, Settled::Navigated);
    }

    #[tokio::test(start_paused = true)]
    async fn listener_detaches_on_every_exit_path() {
        let bus = SignalBus::new(32);

        let waiter = NavigationWaiter::arm(&bus);
        assert_eq!(bus.listener_count(), 1);
        let _ = waiter.settle(&opts(100, 1_000), || async { true }).await;
        assert_eq!(bus.listener_count(), 0);

        let mut waiter = NavigationWaiter::arm(&bus);
        waiter.expect(Expectation::Load);
        let _ = waiter.settle(&opts(100, 300), || async { true }).await;
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn root_readiness_is_polled_before_returning() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let bus = SignalBus::new(32);
        let mut waiter = NavigationWaiter::arm(&bus);
        waiter.expect(Expectation::Load);
        bus.publish(PageSignal::LoadEventFired);

        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let outcome = waiter
            .settle(&opts(500, 15_000), move || {
                let counter = Arc::clone(&counter);
                async move { counter.fetch_add(1, Ordering::SeqCst) >= 2 }
            })
            .await
            .unwrap();
        assert_eq!(outcome, Settled::Navigated);
        assert!(polls.load(Ordering::SeqCst) >= 3);
    }
}
