//! In-flight request tracking and the network-idle signal.
//!
//! The tracker is passive: it only publishes [`PageSignal::NetworkIdle`]
//! once the in-flight set has been empty for a full quiet window. Whether
//! idleness matters for the current wait is the waiter's call.

use std::collections::HashSet;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use pagehand_bus::{PageSignal, SignalBus};
use pagehand_core::RequestId;

/// Quiet window with no outstanding requests before idle fires.
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(500);

/// Background task owning the in-flight set.
pub struct IdleTracker {
    task: JoinHandle<()>,
}

impl IdleTracker {
    /// Subscribe to the bus and start tracking. The tracker republishes
    /// onto the same bus it listens to.
    pub fn spawn(bus: SignalBus, quiet_window: Duration) -> Self {
        let task = tokio::spawn(run(bus, quiet_window));
        Self { task }
    }
}

impl Drop for IdleTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(bus: SignalBus, quiet_window: Duration) {
    let mut subscription = bus.subscribe();
    let mut inflight: HashSet<RequestId> = HashSet::new();
    // Armed once the set drains; a new request during the window disarms it.
    let mut quiet_until: Option<Instant> = None;

    loop {
        let signal = if let Some(deadline) = quiet_until {
            tokio::select! {
                signal = subscription.recv() => signal,
                _ = tokio::time::sleep_until(deadline) => {
                    quiet_until = None;
                    trace!("network idle window elapsed");
                    bus.publish(PageSignal::NetworkIdle);
                    continue;
                }
            }
        } else {
            subscription.recv().await
        };

        let Some(signal) = signal else { break };
        match signal {
            PageSignal::RequestStarted { request } => {
                inflight.insert(request);
                quiet_until = None;
            }
            PageSignal::RequestSettled { request } => {
                inflight.remove(&request);
                if inflight.is_empty() {
                    quiet_until = Some(Instant::now() + quiet_window);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    async fn next_idle(sub: &mut pagehand_bus::SignalSubscription) -> bool {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), sub.recv()).await {
                Ok(Some(PageSignal::NetworkIdle)) => return true,
                Ok(Some(_)) => continue,
                _ => return false,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_fires_after_quiet_window() {
        let bus = SignalBus::new(32);
        let _tracker = IdleTracker::spawn(bus.clone(), DEFAULT_QUIET_WINDOW);
        tokio::task::yield_now().await;

        let mut sub = bus.subscribe();
        bus.publish(PageSignal::RequestStarted {
            request: RequestId("r1".into()),
        });
        bus.publish(PageSignal::RequestSettled {
            request: RequestId("r1".into()),
        });
        tokio::task::yield_now().await;

        advance(DEFAULT_QUIET_WINDOW + Duration::from_millis(10)).await;
        assert!(next_idle(&mut sub).await);
    }

    #[tokio::test(start_paused = true)]
    async fn new_request_rearms_the_window() {
        let bus = SignalBus::new(32);
        let _tracker = IdleTracker::spawn(bus.clone(), DEFAULT_QUIET_WINDOW);
        tokio::task::yield_now().await;

        let mut sub = bus.subscribe();
        bus.publish(PageSignal::RequestStarted {
            request: RequestId("r1".into()),
        });
        bus.publish(PageSignal::RequestSettled {
            request: RequestId("r1".into()),
        });
        tokio::task::yield_now().await;

        // Halfway through the quiet window a new request starts.
        advance(Duration::from_millis(250)).await;
        bus.publish(PageSignal::RequestStarted {
            request: RequestId("r2".into()),
        });
        tokio::task::yield_now().await;

        // The original window elapsing must not produce idle.
        advance(Duration::from_millis(300)).await;
        tokio::task::yield_now().await;

        bus.publish(PageSignal::RequestSettled {
            request: RequestId("r2".into()),
        });
        tokio::task::yield_now().await;
        advance(DEFAULT_QUIET_WINDOW + Duration::from_millis(10)).await;

        assert!(next_idle(&mut sub).await);
    }

    #[tokio::test(start_paused = true)]
    async fn outstanding_request_blocks_idle() {
        let bus = SignalBus::new(32);
        let _tracker = IdleTracker::spawn(bus.clone(), DEFAULT_QUIET_WINDOW);
        tokio::task::yield_now().await;

        let mut sub = bus.subscribe();
        bus.publish(PageSignal::RequestStarted {
            request: RequestId("never-finishes".into()),
        });
        tokio::task::yield_now().await;
        advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;

        let got = tokio::time::timeout(Duration::from_millis(100), sub.recv()).await;
        // Only the RequestStarted echo is on the bus; no idle signal.
        match got {
            Ok(Some(PageSignal::RequestStarted { .. })) => {}
            Ok(other) => panic!("unexpected signal: {other:?}"),
            Err(_) => {}
        }
    }
}
