//! JavaScript dialog handling.
//!
//! Handlers are registered per dialog kind, optionally filtered by exact
//! message. When the page opens a matching dialog the callback runs with a
//! [`Dialog`] handle that can accept or dismiss it.

use std::sync::{Arc, Mutex as StdMutex, Weak};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use pagehand_bus::{DialogKind, PageSignal, SignalBus};
use pagehand_cdp::CdpClient;
use pagehand_core::{PagehandError, Result};

use crate::session::Session;

/// A live dialog the page has opened.
pub struct Dialog {
    pub kind: DialogKind,
    pub message: String,
    client: CdpClient,
}

impl Dialog {
    pub async fn accept(&self) -> Result<()> {
        self.client
            .page()
            .handle_javascript_dialog(true, None)
            .await
            .map_err(PagehandError::from)
    }

    /// Accept a prompt with the given input text.
    pub async fn accept_with(&self, text: &str) -> Result<()> {
        self.client
            .page()
            .handle_javascript_dialog(true, Some(text))
            .await
            .map_err(PagehandError::from)
    }

    pub async fn dismiss(&self) -> Result<()> {
        self.client
            .page()
            .handle_javascript_dialog(false, None)
            .await
            .map_err(PagehandError::from)
    }
}

pub(crate) type DialogCallback = Arc<dyn Fn(Dialog) -> BoxFuture<'static, ()> + Send + Sync>;

struct Registration {
    kind: DialogKind,
    /// `None` matches any message of the kind.
    message: Option<String>,
    callback: DialogCallback,
}

/// Registry plus the dispatcher task watching the bus.
pub(crate) struct DialogHooks {
    handlers: Arc<StdMutex<Vec<Registration>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DialogHooks {
    pub(crate) fn new() -> Self {
        Self {
            handlers: Arc::new(StdMutex::new(Vec::new())),
            task: Mutex::new(None),
        }
    }

    pub(crate) fn register(
        &self,
        kind: DialogKind,
        message: Option<String>,
        callback: DialogCallback,
    ) {
        self.handlers.lock().unwrap().push(Registration {
            kind,
            message,
            callback,
        });
    }

    /// Start (or restart) the dispatcher against the session's bus.
    pub(crate) async fn spawn_dispatcher(&self, bus: &SignalBus, session: &Arc<Session>) {
        let mut slot = self.task.lock().await;
        if let Some(old) = slot.take() {
            old.abort();
        }

        let handlers = Arc::clone(&self.handlers);
        let weak: Weak<Session> = Arc::downgrade(session);
        let mut subscription = bus.subscribe();
        *slot = Some(tokio::spawn(async move {
            while let Some(signal) = subscription.recv().await {
                let PageSignal::DialogOpening { kind, message } = signal else {
                    continue;
                };
                let Some(session) = weak.upgrade() else { break };
                let Ok(client) = session.client().await else {
                    continue;
                };

                let callback = {
                    let handlers = handlers.lock().unwrap();
                    handlers
                        .iter()
                        .find(|r| {
                            r.kind == kind
                                && r.message.as_deref().map_or(true, |m| m == message)
                        })
                        .map(|r| Arc::clone(&r.callback))
                };

                match callback {
                    Some(callback) => {
                        debug!(?kind, %message, "dispatching dialog handler");
                        callback(Dialog {
                            kind,
                            message,
                            client,
                        })
                        .await;
                    }
                    None => {
                        // Unhandled dialogs would wedge the page; dismiss.
                        warn!(?kind, %message, "no handler registered, dismissing dialog");
                        let _ = client.page().handle_javascript_dialog(false, None).await;
                    }
                }
            }
        }));
    }

    pub(crate) async fn shutdown(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        self.handlers.lock().unwrap().clear();
    }
}
