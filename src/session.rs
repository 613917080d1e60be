//! Session lifecycle: process, attachment, targets, reconnection.
//!
//! A session owns one browser process and, at any moment, one attached CDP
//! client bound to one page target. Switching targets destroys the client
//! and builds a fresh one; every node id held before the switch is stale
//! afterwards, which is why the root document id is re-fetched on attach
//! and on every load event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pagehand_bus::{PageSignal, SignalBus};
use pagehand_cdp::{BrowserProcess, CdpClient, EventRepublisher, LaunchOptions, TargetRegistry};
use pagehand_core::{NodeId, PagehandError, Result, TargetDescriptor, TargetId};
use pagehand_wait::{Expectation, IdleTracker, NavigationWaiter, Settled, WaitOptions};

use crate::config::BrowserOptions;

/// Interval between reconnect attempts.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) struct Session {
    pub(crate) options: BrowserOptions,
    pub(crate) bus: SignalBus,
    pub(crate) registry: Arc<TargetRegistry>,
    process: Mutex<BrowserProcess>,
    client: RwLock<Option<CdpClient>>,
    republisher: Mutex<Option<EventRepublisher>>,
    current_target: RwLock<Option<TargetId>>,
    root_node: RwLock<Option<NodeId>>,
    closed: AtomicBool,
    _idle: IdleTracker,
    root_refresher: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Launch the browser, attach to a page target and enable the domain
    /// set the rest of the library relies on.
    pub(crate) async fn open(options: BrowserOptions) -> Result<Arc<Self>> {
        let launch = LaunchOptions {
            executable: options.executable.clone(),
            port: options.port,
            headless: options.headless,
            window_size: options.window_size,
            args: options.args.clone(),
        };
        let process = BrowserProcess::launch(&launch).await.map_err(PagehandError::from)?;

        let bus = SignalBus::default();
        let idle = IdleTracker::spawn(bus.clone(), options.network_idle_window);

        let session = Arc::new(Self {
            options,
            bus,
            registry: Arc::new(TargetRegistry::new()),
            process: Mutex::new(process),
            client: RwLock::new(None),
            republisher: Mutex::new(None),
            current_target: RwLock::new(None),
            root_node: RwLock::new(None),
            closed: AtomicBool::new(false),
            _idle: idle,
            root_refresher: Mutex::new(None),
        });

        let initial = session.discover_initial_target().await?;
        session.attach(&initial).await?;
        Session::spawn_root_refresher(&session).await;

        info!(target = %initial.id, "session attached");
        Ok(session)
    }

    /// Ask the browser endpoint for its open targets and pick (or create)
    /// a page to attach to.
    async fn discover_initial_target(&self) -> Result<TargetDescriptor> {
        let ws_url = {
            let process = self.process.lock().await;
            process.ws_url().to_string()
        };
        let browser_client = self.connect_with_retry(&ws_url).await?;
        browser_client
            .target()
            .set_discover_targets(true)
            .await
            .map_err(PagehandError::from)?;

        let targets = browser_client
            .target()
            .get_targets()
            .await
            .map_err(PagehandError::from)?;
        for target in &targets {
            self.registry.upsert(target.clone());
        }

        let page = match targets.into_iter().find(|t| t.is_page()) {
            Some(page) => page,
            None => {
                let id = browser_client
                    .target()
                    .create_target("about:blank")
                    .await
                    .map_err(PagehandError::from)?;
                let descriptor = TargetDescriptor {
                    id,
                    kind: "page".into(),
                    url: "about:blank".into(),
                    title: String::new(),
                };
                self.registry.upsert(descriptor.clone());
                descriptor
            }
        };

        browser_client.close().await;
        Ok(page)
    }

    /// Attach to a target: new client, domain enables, event republisher,
    /// fresh root node id.
    pub(crate) async fn attach(&self, target: &TargetDescriptor) -> Result<()> {
        self.ensure_open()?;

        // Detach the previous client's listeners before connecting anew;
        // the retry loop must be restartable without leaking them.
        *self.republisher.lock().await = None;
        if let Some(old) = self.client.write().await.take() {
            old.close().await;
        }
        *self.root_node.write().await = None;

        let ws_url = {
            let process = self.process.lock().await;
            process.page_ws_url(&target.id.0)
        };
        let client = self.connect_with_retry(&ws_url).await?;

        let (network, page, dom, overlay, security) = (
            client.network(),
            client.page(),
            client.dom(),
            client.overlay(),
            client.security(),
        );
        tokio::try_join!(
            network.enable(),
            page.enable(),
            dom.enable(),
            overlay.enable(),
            security.enable(),
        )
        .map_err(PagehandError::from)?;
        client
            .page()
            .set_lifecycle_events_enabled(true)
            .await
            .map_err(PagehandError::from)?;
        client
            .runtime()
            .enable()
            .await
            .map_err(PagehandError::from)?;
        client
            .target()
            .set_discover_targets(true)
            .await
            .map_err(PagehandError::from)?;

        if self.options.ignore_ssl_errors {
            client
                .security()
                .set_ignore_certificate_errors(true)
                .await
                .map_err(PagehandError::from)?;
        }

        *self.republisher.lock().await = Some(EventRepublisher::spawn(
            &client,
            self.bus.clone(),
            Arc::clone(&self.registry),
        ));

        let root = client.dom().get_document().await.map_err(PagehandError::from)?;
        *self.root_node.write().await = Some(root);

        self.registry.upsert(target.clone());
        *self.current_target.write().await = Some(target.id.clone());
        *self.client.write().await = Some(client);

        debug!(target = %target.id, root = %root, "attached to target");
        Ok(())
    }

    /// Connect, retrying every second for as long as the process lives.
    async fn connect_with_retry(&self, ws_url: &str) -> Result<CdpClient> {
        loop {
            match CdpClient::connect(ws_url).await {
                Ok(client) => return Ok(client),
                Err(err) => {
                    let mut process = self.process.lock().await;
                    if !process.is_running() {
                        return Err(PagehandError::Launch(
                            "browser process exited during connect".into(),
                        ));
                    }
                    drop(process);
                    warn!(error = %err, url = ws_url, "connect failed, retrying");
                    tokio::time::sleep(RECONNECT_INTERVAL).await;
                }
            }
        }
    }

    /// Re-fetch the root document id whenever a page finishes loading.
    async fn spawn_root_refresher(session: &Arc<Self>) {
        let weak: Weak<Session> = Arc::downgrade(session);
        let mut subscription = session.bus.subscribe();
        let task = tokio::spawn(async move {
            while let Some(signal) = subscription.recv().await {
                if signal != PageSignal::LoadEventFired {
                    continue;
                }
                let Some(session) = weak.upgrade() else { break };
                if let Err(err) = session.refresh_root().await {
                    debug!(error = %err, "root refresh after load failed");
                }
            }
        });
        *session.root_refresher.lock().await = Some(task);
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PagehandError::NotInitialized);
        }
        Ok(())
    }

    pub(crate) async fn client(&self) -> Result<CdpClient> {
        self.ensure_open()?;
        self.client
            .read()
            .await
            .clone()
            .ok_or(PagehandError::NotInitialized)
    }

    pub(crate) async fn root_node(&self) -> Result<NodeId> {
        if let Some(root) = *self.root_node.read().await {
            return Ok(root);
        }
        self.refresh_root().await
    }

    pub(crate) async fn refresh_root(&self) -> Result<NodeId> {
        let client = self.client().await?;
        let root = client.dom().get_document().await.map_err(PagehandError::from)?;
        *self.root_node.write().await = Some(root);
        Ok(root)
    }

    pub(crate) async fn current_target(&self) -> Option<TargetDescriptor> {
        let id = self.current_target.read().await.clone()?;
        self.registry.get(&id)
    }

    /// Run `action` between arming the waiter and settling it. This is the
    /// ordering that guarantees no signal is lost: listeners are installed
    /// before the action dispatches anything.
    pub(crate) async fn with_navigation<F, Fut, T>(
        &self,
        options: WaitOptions,
        pre_armed: &[Expectation],
        action: F,
    ) -> Result<(T, Settled)>
    where
        F: FnOnce(CdpClient) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let client = self.client().await?;
        let mut waiter = NavigationWaiter::arm(&self.bus);
        for expectation in pre_armed {
            waiter.expect(expectation.clone());
        }

        let value = action(client).await?;

        if !options.await_navigation {
            // Dropping the waiter detaches its listener.
            return Ok((value, Settled::NoNavigation));
        }

        let settled = waiter
            .settle(&options, || async { self.refresh_root().await.is_ok() })
            .await?;
        Ok((value, settled))
    }

    pub(crate) fn wait_options(&self, timeout: Option<Duration>) -> WaitOptions {
        WaitOptions {
            await_navigation: true,
            wait_for_start: self.options.wait_for_start,
            timeout: timeout.unwrap_or(self.options.action_timeout),
        }
    }

    /// Look a target up by exact url or title and attach to it.
    pub(crate) async fn switch_to(&self, needle: &str) -> Result<TargetDescriptor> {
        self.ensure_open()?;
        self.refresh_targets().await?;
        let target = self.registry.find(needle).ok_or_else(|| {
            PagehandError::InvalidOperation(format!("no open tab matches \"{needle}\""))
        })?;
        self.attach(&target).await?;
        Ok(target)
    }

    /// Create a new tab, wait for it to navigate, attach to it.
    pub(crate) async fn open_tab(&self, url: &str, timeout: Option<Duration>) -> Result<TargetDescriptor> {
        self.ensure_open()?;
        let wait = WaitOptions {
            await_navigation: true,
            wait_for_start: self.options.wait_for_start,
            timeout: timeout.unwrap_or(self.options.navigation_timeout),
        };

        let client = self.client().await?;
        let mut waiter = NavigationWaiter::arm(&self.bus);
        waiter.expect(Expectation::TargetNavigated);

        let id = client
            .target()
            .create_target(url)
            .await
            .map_err(PagehandError::from)?;

        // The root check refers to the still-attached old target; the new
        // one gets its root on attach below.
        waiter.settle(&wait, || async { true }).await?;

        self.refresh_targets().await?;
        let descriptor = self.registry.get(&id).unwrap_or(TargetDescriptor {
            id: id.clone(),
            kind: "page".into(),
            url: url.to_string(),
            title: String::new(),
        });
        self.attach(&descriptor).await?;
        Ok(descriptor)
    }

    /// Close a tab. Closing the last one shuts the whole browser down.
    pub(crate) async fn close_tab(&self, needle: Option<&str>) -> Result<CloseTabOutcome> {
        self.ensure_open()?;
        self.refresh_targets().await?;

        let target = match needle {
            Some(needle) => self.registry.find(needle).ok_or_else(|| {
                PagehandError::InvalidOperation(format!("no open tab matches \"{needle}\""))
            })?,
            None => self
                .current_target()
                .await
                .ok_or(PagehandError::NotInitialized)?,
        };

        if self.registry.page_count() <= 1 {
            self.close().await?;
            return Ok(CloseTabOutcome::ClosedBrowser);
        }

        let client = self.client().await?;
        client
            .target()
            .close_target(&target.id)
            .await
            .map_err(PagehandError::from)?;
        self.registry.remove(&target.id);

        let next = self
            .registry
            .pages()
            .into_iter()
            .find(|t| t.id != target.id)
            .ok_or_else(|| PagehandError::internal("no target left to attach to"))?;
        self.attach(&next).await?;
        Ok(CloseTabOutcome::SwitchedTo(next))
    }

    async fn refresh_targets(&self) -> Result<()> {
        let client = self.client().await?;
        let targets = client
            .target()
            .get_targets()
            .await
            .map_err(PagehandError::from)?;
        for target in targets {
            self.registry.upsert(target);
        }
        Ok(())
    }

    /// Tear the session down: best-effort page close, client close,
    /// process termination, async profile removal.
    pub(crate) async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(PagehandError::NotInitialized);
        }

        if let Some(task) = self.root_refresher.lock().await.take() {
            task.abort();
        }

        if let Some(client) = self.client.write().await.take() {
            if let Err(err) = client.page().close().await {
                debug!(error = %err, "page close during shutdown failed");
            }
            client.close().await;
        }
        *self.republisher.lock().await = None;

        let mut process = self.process.lock().await;
        process.shutdown().await;
        info!("session closed");
        Ok(())
    }
}

pub(crate) enum CloseTabOutcome {
    ClosedBrowser,
    SwitchedTo(TargetDescriptor),
}

/// Prefix bare hostnames with `http://`; `file:` and other schemed urls
/// pass through untouched. Normalization is a fixed point.
pub(crate) fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.contains("://")
        || trimmed.starts_with("about:")
        || trimmed.starts_with("file:")
        || trimmed.starts_with("data:")
        || trimmed.starts_with("chrome:")
    {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_prepends_http_once() {
        assert_eq!(normalize_url("example.com"), "http://example.com");
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
        assert_eq!(normalize_url("file:///tmp/page.html"), "file:///tmp/page.html");
        assert_eq!(normalize_url("about:blank"), "about:blank");
    }

    #[test]
    fn normalize_is_a_fixed_point() {
        for url in ["example.com", "http://example.com", "file:///x", "data:text/html,hi"] {
            let once = normalize_url(url);
            assert_eq!(normalize_url(&once), once);
        }
    }
}
