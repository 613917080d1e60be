//! The public browser handle and its verbs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::instrument;

use pagehand_bus::DialogKind;
use pagehand_cdp::CdpClient;
use pagehand_core::{PagehandError, Result, TargetDescriptor};
use pagehand_locator::{Element, Selector};
use pagehand_wait::{Expectation, WaitOptions};

use crate::actions::{self, ClickSpec};
use crate::config::{
    ActionResult, BrowserOptions, ClickOptions, NavOptions, PressOptions, ScreenshotOptions,
    WriteOptions,
};
use crate::dialogs::{Dialog, DialogHooks};
use crate::dom::PageDom;
use crate::input;
use crate::intercept::{InterceptAction, InterceptHooks};
use crate::session::{normalize_url, CloseTabOutcome, Session};

/// A launched browser: one process, one attached tab at a time.
///
/// All verbs are async and return an [`ActionResult`] naming what happened.
/// Dropping the handle without calling [`Browser::close`] leaves process
/// teardown to the child's kill-on-drop guard.
pub struct Browser {
    session: Arc<Session>,
    dom: PageDom,
    dialogs: DialogHooks,
    intercept: InterceptHooks,
}

impl Browser {
    /// Launch a browser and attach to its first page target.
    pub async fn launch(options: BrowserOptions) -> Result<Self> {
        let session = Session::open(options).await?;
        let dialogs = DialogHooks::new();
        dialogs.spawn_dispatcher(&session.bus, &session).await;
        Ok(Self {
            dom: PageDom::new(Arc::clone(&session)),
            session,
            dialogs,
            intercept: InterceptHooks::new(),
        })
    }

    /// Close the browser: page close, client teardown, process kill,
    /// profile removal. A second close fails with `NotInitialized`.
    pub async fn close(&self) -> Result<ActionResult> {
        self.dialogs.shutdown().await;
        self.intercept.shutdown().await;
        self.session.close().await?;
        Ok(ActionResult::new("Browser closed"))
    }

    /// The raw CDP client for anything the verbs do not cover.
    pub async fn client(&self) -> Result<CdpClient> {
        self.session.client().await
    }

    /// Observe-mode pacing: every verb pauses first so a human can watch.
    async fn pace(&self) {
        if self.session.options.observe {
            tokio::time::sleep(self.session.options.observe_time).await;
        }
    }

    // -----------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn goto(&self, url: &str, options: NavOptions) -> Result<ActionResult> {
        self.pace().await;
        let url = normalize_url(url);
        let wait = WaitOptions {
            await_navigation: true,
            wait_for_start: self.session.options.wait_for_start,
            timeout: options
                .timeout
                .unwrap_or(self.session.options.navigation_timeout),
        };

        if let Some(headers) = &options.headers {
            let client = self.session.client().await?;
            client
                .network()
                .set_extra_headers(headers)
                .await
                .map_err(PagehandError::from)?;
        }

        let navigated_url = url.clone();
        let (_, _) = self
            .session
            .with_navigation(
                wait,
                &[Expectation::Load, Expectation::DomContent],
                |client| async move {
                    if let Some(reason) = client
                        .page()
                        .navigate(&navigated_url)
                        .await
                        .map_err(PagehandError::from)?
                    {
                        return Err(PagehandError::NavigationFailed {
                            url: navigated_url.clone(),
                            reason,
                        });
                    }
                    Ok(())
                },
            )
            .await?;

        Ok(ActionResult::with_url(
            format!("Navigated to url \"{url}\""),
            url,
        ))
    }

    /// Reload the current page. The url parameter is accepted for surface
    /// compatibility but Page.reload does not take one; it is ignored.
    pub async fn reload(&self, _url: Option<&str>) -> Result<ActionResult> {
        self.pace().await;
        let wait = self.session.wait_options(None);
        self.session
            .with_navigation(wait, &[Expectation::Load], |client| async move {
                client.page().reload().await.map_err(PagehandError::from)
            })
            .await?;
        Ok(ActionResult::new("Reloaded the page"))
    }

    pub async fn title(&self) -> Result<String> {
        let client = self.session.client().await?;
        let value = client
            .runtime()
            .evaluate("document.title")
            .await
            .map_err(PagehandError::from)?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn current_url(&self) -> Result<String> {
        let client = self.session.client().await?;
        let value = client
            .runtime()
            .evaluate("window.location.href")
            .await
            .map_err(PagehandError::from)?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Capture a screenshot. Returns the PNG bytes; unless
    /// `options.return_bytes` is set they are also written to disk.
    pub async fn screenshot(&self, options: ScreenshotOptions) -> Result<(ActionResult, Vec<u8>)> {
        self.pace().await;
        let client = self.session.client().await?;
        let data = client
            .page()
            .capture_screenshot("png")
            .await
            .map_err(PagehandError::from)?;
        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|e| PagehandError::internal(format!("bad screenshot payload: {e}")))?;

        if options.return_bytes {
            return Ok((ActionResult::new("Screenshot captured"), bytes));
        }

        let path = options.path.unwrap_or_else(default_screenshot_path);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| PagehandError::internal(format!("failed to write screenshot: {e}")))?;
        Ok((
            ActionResult::new(format!("Screenshot saved to {}", path.display())),
            bytes,
        ))
    }

    // -----------------------------------------------------------------
    // Pointer verbs
    // -----------------------------------------------------------------

    pub async fn click(
        &self,
        selector: impl Into<Selector>,
        options: ClickOptions,
    ) -> Result<ActionResult> {
        self.pace().await;
        actions::click(
            &self.session,
            &self.dom,
            &selector.into(),
            ClickSpec::single(),
            &options,
        )
        .await
    }

    /// Double click. Does not await navigation unless asked to.
    pub async fn double_click(&self, selector: impl Into<Selector>) -> Result<ActionResult> {
        self.pace().await;
        let options = ClickOptions {
            await_navigation: false,
            ..ClickOptions::default()
        };
        actions::click(
            &self.session,
            &self.dom,
            &selector.into(),
            ClickSpec::double(),
            &options,
        )
        .await
    }

    /// Right click. Does not await navigation unless asked to.
    pub async fn right_click(&self, selector: impl Into<Selector>) -> Result<ActionResult> {
        self.pace().await;
        let options = ClickOptions {
            await_navigation: false,
            ..ClickOptions::default()
        };
        actions::click(
            &self.session,
            &self.dom,
            &selector.into(),
            ClickSpec::right(),
            &options,
        )
        .await
    }

    pub async fn hover(&self, selector: impl Into<Selector>) -> Result<ActionResult> {
        self.pace().await;
        actions::hover(&self.session, &self.dom, &selector.into()).await
    }

    pub async fn focus(&self, selector: impl Into<Selector>) -> Result<ActionResult> {
        self.pace().await;
        actions::focus(&self.session, &self.dom, &selector.into()).await
    }

    pub async fn highlight(&self, selector: impl Into<Selector>) -> Result<ActionResult> {
        self.pace().await;
        actions::highlight(&self.session, &self.dom, &selector.into()).await
    }

    pub async fn clear_highlights(&self) -> Result<ActionResult> {
        actions::clear_highlights(&self.session).await
    }

    pub async fn scroll_to(&self, selector: impl Into<Selector>) -> Result<ActionResult> {
        self.pace().await;
        actions::scroll_to(&self.session, &self.dom, &selector.into()).await
    }

    pub async fn scroll_right(&self, px: Option<i64>) -> Result<ActionResult> {
        actions::scroll_by(&self.session, px.unwrap_or(100), 0, "right").await
    }

    pub async fn scroll_left(&self, px: Option<i64>) -> Result<ActionResult> {
        actions::scroll_by(&self.session, -px.unwrap_or(100), 0, "left").await
    }

    pub async fn scroll_down(&self, px: Option<i64>) -> Result<ActionResult> {
        actions::scroll_by(&self.session, 0, px.unwrap_or(100), "down").await
    }

    pub async fn scroll_up(&self, px: Option<i64>) -> Result<ActionResult> {
        actions::scroll_by(&self.session, 0, -px.unwrap_or(100), "up").await
    }

    // -----------------------------------------------------------------
    // Keyboard verbs
    // -----------------------------------------------------------------

    /// Type text into `into` (or whatever currently holds focus).
    pub async fn write(
        &self,
        text: &str,
        into: Option<Selector>,
        options: WriteOptions,
    ) -> Result<ActionResult> {
        self.pace().await;
        input::write(&self.session, &self.dom, text, into, &options).await
    }

    /// Empty the target field (triple-click select plus backspace).
    pub async fn clear(&self, selector: Option<Selector>) -> Result<ActionResult> {
        self.pace().await;
        input::clear(&self.session, &self.dom, selector).await
    }

    /// Press a key or chord: downs in order, ups in reverse.
    pub async fn press(&self, keys: &[&str], options: PressOptions) -> Result<ActionResult> {
        self.pace().await;
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        input::press(&self.session, &keys, &options).await
    }

    /// Put a file into a file input.
    pub async fn attach_file(
        &self,
        path: impl Into<PathBuf>,
        to: impl Into<Selector>,
    ) -> Result<ActionResult> {
        self.pace().await;
        let path: PathBuf = path.into();
        let absolute = std::fs::canonicalize(&path).map_err(|_| PagehandError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let selector = to.into();
        let node = actions::first_candidate(&self.session, &self.dom, &selector).await?;
        let client = self.session.client().await?;
        client
            .dom()
            .set_file_input_files(node, &[absolute.display().to_string()])
            .await
            .map_err(PagehandError::from)?;
        Ok(ActionResult::new(format!(
            "Attached {} to {}",
            absolute.display(),
            selector.description()
        )))
    }

    // -----------------------------------------------------------------
    // Elements and evaluation
    // -----------------------------------------------------------------

    /// A lazy handle over whatever `selector` matches.
    pub fn element(&self, selector: impl Into<Selector>) -> Element<'_> {
        Element::new(&self.dom, selector.into()).with_polling(
            self.session.options.retry_interval,
            self.session.options.retry_timeout,
        )
    }

    /// `innerText` of every match.
    pub async fn text(&self, selector: impl Into<Selector>) -> Result<Vec<String>> {
        self.element(selector).text().await
    }

    /// Evaluate an expression in the page and return its JSON value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let client = self.session.client().await?;
        client
            .runtime()
            .evaluate(expression)
            .await
            .map_err(PagehandError::from)
    }

    /// Plain timed wait.
    pub async fn wait_for(&self, duration: std::time::Duration) -> Result<ActionResult> {
        tokio::time::sleep(duration).await;
        Ok(ActionResult::new(format!(
            "Waited for {} ms",
            duration.as_millis()
        )))
    }

    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<ActionResult> {
        let client = self.session.client().await?;
        client
            .emulation()
            .set_device_metrics_override(width, height, 1.0, false)
            .await
            .map_err(PagehandError::from)?;
        Ok(ActionResult::new(format!(
            "Viewport set to {width}x{height}"
        )))
    }

    // -----------------------------------------------------------------
    // Tabs
    // -----------------------------------------------------------------

    /// Attach to the open tab whose url or title equals `needle`.
    pub async fn switch_to(&self, needle: &str) -> Result<ActionResult> {
        self.pace().await;
        let target = self.session.switch_to(needle).await?;
        self.reinstall_intercept().await?;
        Ok(ActionResult::with_url(
            format!("Switched to tab matching \"{needle}\""),
            target.url,
        ))
    }

    pub async fn open_tab(&self, url: &str, options: NavOptions) -> Result<ActionResult> {
        self.pace().await;
        let url = normalize_url(url);
        let target = self.session.open_tab(&url, options.timeout).await?;
        self.reinstall_intercept().await?;
        Ok(ActionResult::with_url(
            format!("Opened tab with url \"{url}\""),
            target.url,
        ))
    }

    /// Close a tab by url/title, or the current one. Closing the last tab
    /// closes the browser.
    pub async fn close_tab(&self, needle: Option<&str>) -> Result<ActionResult> {
        self.pace().await;
        match self.session.close_tab(needle).await? {
            CloseTabOutcome::ClosedBrowser => {
                self.dialogs.shutdown().await;
                self.intercept.shutdown().await;
                Ok(ActionResult::new("Closing last target and browser."))
            }
            CloseTabOutcome::SwitchedTo(target) => {
                self.reinstall_intercept().await?;
                Ok(ActionResult::with_url(
                    format!("Closed tab and switched to \"{}\"", target.url),
                    target.url,
                ))
            }
        }
    }

    /// Every open page target: id, url, title.
    pub async fn tabs(&self) -> Result<Vec<TargetDescriptor>> {
        self.session.ensure_open()?;
        Ok(self.session.registry.pages())
    }

    // -----------------------------------------------------------------
    // Dialogs and interception
    // -----------------------------------------------------------------

    /// Register a handler for `alert` dialogs, optionally filtered by
    /// exact message.
    pub fn on_alert<F, Fut>(&self, message: Option<String>, callback: F)
    where
        F: Fn(Dialog) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.on_dialog(DialogKind::Alert, message, callback);
    }

    pub fn on_confirm<F, Fut>(&self, message: Option<String>, callback: F)
    where
        F: Fn(Dialog) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.on_dialog(DialogKind::Confirm, message, callback);
    }

    pub fn on_prompt<F, Fut>(&self, message: Option<String>, callback: F)
    where
        F: Fn(Dialog) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.on_dialog(DialogKind::Prompt, message, callback);
    }

    pub fn on_before_unload<F, Fut>(&self, callback: F)
    where
        F: Fn(Dialog) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.on_dialog(DialogKind::BeforeUnload, None, callback);
    }

    pub fn on_dialog<F, Fut>(&self, kind: DialogKind, message: Option<String>, callback: F)
    where
        F: Fn(Dialog) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let callback = Arc::new(callback);
        self.dialogs.register(
            kind,
            message,
            Arc::new(move |dialog| -> BoxFuture<'static, ()> {
                let callback = Arc::clone(&callback);
                Box::pin(async move { callback(dialog).await })
            }),
        );
    }

    /// Intercept requests whose url matches `pattern`.
    pub async fn intercept(
        &self,
        pattern: impl Into<String>,
        action: InterceptAction,
    ) -> Result<ActionResult> {
        let pattern = pattern.into();
        self.intercept.add(pattern.clone(), action);
        if !self.intercept.is_enabled() {
            let client = self.session.client().await?;
            self.intercept.install(&client).await?;
        }
        Ok(ActionResult::new(format!(
            "Intercepting requests matching \"{pattern}\""
        )))
    }

    /// Interception is per-client; a target switch needs a re-install.
    async fn reinstall_intercept(&self) -> Result<()> {
        if self.intercept.is_enabled() {
            let client = self.session.client().await?;
            self.intercept.install(&client).await?;
        }
        Ok(())
    }
}

fn default_screenshot_path() -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    PathBuf::from(format!("Screenshot-{millis}.png"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_screenshot_name_carries_a_timestamp() {
        let path = default_screenshot_path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Screenshot-"));
        assert!(name.ends_with(".png"));
    }
}
