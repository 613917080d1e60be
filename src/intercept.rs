//! Network request interception.
//!
//! Rules pair a url pattern with an action: block the request, answer it
//! with a mock, redirect it, or hand it to a rewriter callback. Rules are
//! kept in insertion order and the first match wins; registering the same
//! pattern again replaces the earlier rule. Everything resets when the
//! browser closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use pagehand_cdp::CdpClient;
use pagehand_core::{PagehandError, Result};

/// What to do with a matching request.
#[derive(Clone)]
pub enum InterceptAction {
    /// Fail the request outright.
    Block,
    /// Answer with a canned response: `{status?, headers?, body?}`.
    MockResponse(Value),
    /// Send the request to a different url instead.
    Redirect(String),
    /// Hand the paused request to user code.
    Rewrite(RewriteFn),
}

pub type RewriteFn = Arc<dyn Fn(InterceptedRequest) -> BoxFuture<'static, ()> + Send + Sync>;

/// A paused request handed to a rewriter.
pub struct InterceptedRequest {
    request_id: String,
    /// The CDP request object (url, method, headers, postData).
    pub request: Value,
    client: CdpClient,
    handled: Arc<AtomicBool>,
}

impl InterceptedRequest {
    pub fn url(&self) -> &str {
        self.request.get("url").and_then(Value::as_str).unwrap_or("")
    }

    /// Let the request through, optionally overriding url, method, headers
    /// or post data.
    pub async fn continue_with(&self, overrides: Value) -> Result<()> {
        self.handled.store(true, Ordering::SeqCst);
        self.client
            .fetch()
            .continue_request(&self.request_id, overrides)
            .await
            .map_err(PagehandError::from)
    }

    /// Answer with a mock response object.
    pub async fn respond(&self, mock: Value) -> Result<()> {
        self.handled.store(true, Ordering::SeqCst);
        fulfill(&self.client, &self.request_id, &mock).await
    }

    pub async fn block(&self) -> Result<()> {
        self.handled.store(true, Ordering::SeqCst);
        self.client
            .fetch()
            .fail_request(&self.request_id, "Failed")
            .await
            .map_err(PagehandError::from)
    }
}

/// Rule store plus the dispatcher bound to the attached client.
pub(crate) struct InterceptHooks {
    rules: Arc<StdMutex<Vec<(String, InterceptAction)>>>,
    enabled: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InterceptHooks {
    pub(crate) fn new() -> Self {
        Self {
            rules: Arc::new(StdMutex::new(Vec::new())),
            enabled: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Add or replace the rule for `pattern`.
    pub(crate) fn add(&self, pattern: String, action: InterceptAction) {
        let mut rules = self.rules.lock().unwrap();
        if let Some(existing) = rules.iter_mut().find(|(p, _)| *p == pattern) {
            existing.1 = action;
        } else {
            rules.push((pattern, action));
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable fetch pausing on the client and start the dispatcher. Called
    /// on first rule registration and again after every target switch.
    pub(crate) async fn install(&self, client: &CdpClient) -> Result<()> {
        client.fetch().enable().await.map_err(PagehandError::from)?;
        self.enabled.store(true, Ordering::SeqCst);

        let mut slot = self.task.lock().await;
        if let Some(old) = slot.take() {
            old.abort();
        }

        let rules = Arc::clone(&self.rules);
        let events_client = client.clone();
        let mut events = client.subscribe_events();
        *slot = Some(tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if event.method != "Fetch.requestPaused" {
                    continue;
                }
                let Some(request_id) = event
                    .params
                    .get("requestId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                else {
                    continue;
                };
                let request = event.params.get("request").cloned().unwrap_or(Value::Null);
                let url = request.get("url").and_then(Value::as_str).unwrap_or("");

                let action = {
                    let rules = rules.lock().unwrap();
                    rules
                        .iter()
                        .find(|(pattern, _)| pattern_matches(pattern, url))
                        .map(|(_, action)| action.clone())
                };

                if let Err(err) =
                    apply(&events_client, &request_id, request, action).await
                {
                    warn!(error = %err, "interception action failed");
                }
            }
        }));
        Ok(())
    }

    pub(crate) async fn shutdown(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        self.rules.lock().unwrap().clear();
        self.enabled.store(false, Ordering::SeqCst);
    }
}

async fn apply(
    client: &CdpClient,
    request_id: &str,
    request: Value,
    action: Option<InterceptAction>,
) -> Result<()> {
    match action {
        None => client
            .fetch()
            .continue_request(request_id, Value::Null)
            .await
            .map_err(PagehandError::from),
        Some(InterceptAction::Block) => {
            debug!(request_id, "blocking request");
            client
                .fetch()
                .fail_request(request_id, "Failed")
                .await
                .map_err(PagehandError::from)
        }
        Some(InterceptAction::MockResponse(mock)) => fulfill(client, request_id, &mock).await,
        Some(InterceptAction::Redirect(url)) => client
            .fetch()
            .continue_request(request_id, json!({ "url": url }))
            .await
            .map_err(PagehandError::from),
        Some(InterceptAction::Rewrite(callback)) => {
            let handled = Arc::new(AtomicBool::new(false));
            let intercepted = InterceptedRequest {
                request_id: request_id.to_string(),
                request,
                client: client.clone(),
                handled: Arc::clone(&handled),
            };
            callback(intercepted).await;
            // A rewriter that decided nothing lets the request through.
            if !handled.load(Ordering::SeqCst) {
                client
                    .fetch()
                    .continue_request(request_id, Value::Null)
                    .await
                    .map_err(PagehandError::from)?;
            }
            Ok(())
        }
    }
}

/// Answer a paused request from a mock object.
async fn fulfill(client: &CdpClient, request_id: &str, mock: &Value) -> Result<()> {
    let status = mock
        .get("status")
        .and_then(Value::as_u64)
        .unwrap_or(200) as u16;

    let mut headers: Vec<(String, String)> = mock
        .get("headers")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                .collect()
        })
        .unwrap_or_default();

    let body = match mock.get("body") {
        Some(Value::String(text)) => text.clone(),
        Some(other) => {
            if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                headers.push(("content-type".into(), "application/json".into()));
            }
            other.to_string()
        }
        None => String::new(),
    };

    client
        .fetch()
        .fulfill_request(request_id, status, &headers, &BASE64.encode(body))
        .await
        .map_err(PagehandError::from)
}

/// Url pattern match: `*` wildcards, otherwise substring containment.
pub(crate) fn pattern_matches(pattern: &str, url: &str) -> bool {
    if !pattern.contains('*') {
        return url.contains(pattern);
    }
    let mut position = 0;
    let mut first = true;
    for (index, part) in pattern.split('*').enumerate() {
        if part.is_empty() {
            first = false;
            continue;
        }
        match url[position..].find(part) {
            Some(found) => {
                // Without a leading `*`, the first part must anchor at 0.
                if first && index == 0 && found != 0 {
                    return false;
                }
                position += found + part.len();
            }
            None => return false,
        }
        first = false;
    }
    // A pattern without a trailing `*` must consume to the end.
    if !pattern.ends_with('*') {
        return url.len() == position;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_patterns_match_by_containment() {
        assert!(pattern_matches("analytics", "https://x.example/analytics.js"));
        assert!(!pattern_matches("analytics", "https://x.example/app.js"));
    }

    #[test]
    fn star_patterns_glob() {
        assert!(pattern_matches("https://*/ads/*", "https://x.example/ads/banner.png"));
        assert!(pattern_matches("*.png", "https://x.example/img/logo.png"));
        assert!(!pattern_matches("*.png", "https://x.example/img/logo.png?v=2"));
        assert!(pattern_matches("*.png*", "https://x.example/img/logo.png?v=2"));
    }

    #[test]
    fn latest_rule_for_a_pattern_wins() {
        let hooks = InterceptHooks::new();
        hooks.add("x".into(), InterceptAction::Block);
        hooks.add("x".into(), InterceptAction::Redirect("http://y.example".into()));
        let rules = hooks.rules.lock().unwrap();
        assert_eq!(rules.len(), 1);
        assert!(matches!(rules[0].1, InterceptAction::Redirect(_)));
    }
}
