//! Process-wide bus for browser-originated signals.
//!
//! Domain adapters publish canonical [`PageSignal`]s here; the navigation
//! waiter, the network-idle tracker and the dialog dispatcher subscribe.
//! Subscriptions are scoped guard values: dropping a [`SignalSubscription`]
//! detaches the listener, which is how actions guarantee they leave no
//! listeners behind on any exit path.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use pagehand_core::{RequestId, TargetId};

/// JavaScript dialog flavours the browser can open.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DialogKind {
    Alert,
    Confirm,
    Prompt,
    BeforeUnload,
}

impl DialogKind {
    pub fn from_cdp(kind: &str) -> Option<Self> {
        match kind {
            "alert" => Some(Self::Alert),
            "confirm" => Some(Self::Confirm),
            "prompt" => Some(Self::Prompt),
            "beforeunload" => Some(Self::BeforeUnload),
            _ => None,
        }
    }
}

/// Canonical, closed set of signals the adapters republish from CDP events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PageSignal {
    /// Network.requestWillBeSent
    RequestStarted { request: RequestId },
    /// Network.loadingFinished / Network.loadingFailed
    RequestSettled { request: RequestId },
    /// Page.loadEventFired
    LoadEventFired,
    /// Page.domContentEventFired
    DomContentEventFired,
    /// Page.frameStartedLoading
    FrameStartedLoading { frame: String },
    /// Page.frameStoppedLoading
    FrameStoppedLoading { frame: String },
    /// Page.lifecycleEvent with name firstMeaningfulPaint
    FirstMeaningfulPaint,
    /// Page.lifecycleEvent with name firstPaint
    FirstPaint,
    /// Target.targetCreated
    TargetCreated { target: TargetId },
    /// Target.targetInfoChanged where the url actually changed
    TargetNavigated { target: TargetId, url: String },
    /// Target.targetDestroyed
    TargetDestroyed { target: TargetId },
    /// Emitted by the idle tracker after a quiet window with nothing in flight
    NetworkIdle,
    /// Page.javascriptDialogOpening
    DialogOpening { kind: DialogKind, message: String },
}

/// Broadcast bus carrying [`PageSignal`]s.
///
/// Cloning is cheap; all clones publish into the same channel.
#[derive(Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<PageSignal>,
}

impl SignalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a signal. Publishing with no live subscribers is not an
    /// error; the signal is simply dropped.
    pub fn publish(&self, signal: PageSignal) {
        trace!(?signal, "bus publish");
        let _ = self.sender.send(signal);
    }

    /// Attach a scoped listener. The listener is detached when the returned
    /// guard is dropped.
    pub fn subscribe(&self) -> SignalSubscription {
        SignalSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of currently attached listeners.
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(512)
    }
}

/// Scoped bus subscription. Dropping it removes the listener.
pub struct SignalSubscription {
    receiver: broadcast::Receiver<PageSignal>,
}

impl SignalSubscription {
    /// Receive the next signal, waiting if none is buffered.
    ///
    /// Returns `None` once the bus is gone. A lagged receiver skips ahead to
    /// the oldest retained signal rather than failing the caller.
    pub async fn recv(&mut self) -> Option<PageSignal> {
        loop {
            match self.receiver.recv().await {
                Ok(signal) => return Some(signal),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    trace!(missed, "bus subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = SignalBus::new(8);
        let mut sub = bus.subscribe();
        bus.publish(PageSignal::LoadEventFired);
        assert_eq!(sub.recv().await, Some(PageSignal::LoadEventFired));
    }

    #[tokio::test]
    async fn dropping_subscription_detaches_listener() {
        let bus = SignalBus::new(8);
        assert_eq!(bus.listener_count(), 0);
        let sub = bus.subscribe();
        assert_eq!(bus.listener_count(), 1);
        drop(sub);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = SignalBus::new(8);
        bus.publish(PageSignal::NetworkIdle);
    }

    #[test]
    fn dialog_kind_parses_cdp_names() {
        assert_eq!(DialogKind::from_cdp("alert"), Some(DialogKind::Alert));
        assert_eq!(
            DialogKind::from_cdp("beforeunload"),
            Some(DialogKind::BeforeUnload)
        );
        assert_eq!(DialogKind::from_cdp("popup"), None);
    }
}
