//! Caller-facing element handles.
//!
//! An [`Element`] is lazy: it holds a selector and only touches the page
//! when queried. The operations it exposes depend on the selector's kind —
//! reading `value` from a paragraph or checking a link is refused up front
//! rather than failing obscurely in the page.

use std::time::Duration;

use serde_json::json;

use pagehand_core::{NodeId, PagehandError, Result};

use crate::resolve::{resolve, resolve_polling, DomPort, ResolveOptions, RETRY_INTERVAL, RETRY_TIMEOUT};
use crate::selector::{ElementKind, Selector};

const INNER_TEXT_FN: &str = "function() { return this.innerText; }";
const VALUE_FN: &str = "function() { return this.value; }";
const IS_CHECKED_FN: &str = "function() { return !!this.checked; }";
const SET_CHECKED_FN: &str = "function(state) { \
    this.checked = state; \
    this.dispatchEvent(new Event('change', { bubbles: true })); \
}";
const SELECT_OPTION_FN: &str = "function(value) { \
    const options = Array.from(this.options); \
    const match = options.find(o => o.value === value || o.text === value); \
    if (!match) { throw new Error('option not found: ' + value); } \
    this.value = match.value; \
    this.dispatchEvent(new Event('change', { bubbles: true })); \
}";

/// Lazy handle over whatever a selector matches.
pub struct Element<'a> {
    port: &'a dyn DomPort,
    selector: Selector,
    interval: Duration,
    timeout: Duration,
}

impl<'a> Element<'a> {
    pub fn new(port: &'a dyn DomPort, selector: Selector) -> Self {
        Self {
            port,
            selector,
            interval: RETRY_INTERVAL,
            timeout: RETRY_TIMEOUT,
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn description(&self) -> String {
        self.selector.description()
    }

    /// All visible matches, waiting up to the configured timeout for the
    /// first one to appear.
    pub async fn get(&self) -> Result<Vec<NodeId>> {
        resolve_polling(self.port, &self.selector, self.interval, self.timeout).await
    }

    /// Whether at least one visible match appears within `timeout`,
    /// polling every `interval`.
    pub async fn exists(&self, interval: Duration, timeout: Duration) -> Result<bool> {
        match resolve_polling(self.port, &self.selector, interval, timeout).await {
            Ok(_) => Ok(true),
            Err(PagehandError::ElementNotFound { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }

    /// `innerText` of every match, without waiting.
    pub async fn text(&self) -> Result<Vec<String>> {
        let nodes = resolve(self.port, &self.selector, ResolveOptions::default()).await?;
        if nodes.is_empty() {
            return Err(PagehandError::ElementNotFound {
                selector: self.description(),
            });
        }
        let mut texts = Vec::with_capacity(nodes.len());
        for node in nodes {
            let value = self.port.eval_on_node(node, INNER_TEXT_FN, &[]).await?;
            texts.push(value.as_str().unwrap_or_default().to_string());
        }
        Ok(texts)
    }

    /// Current value of the first match. Text, input, file and combo-box
    /// fields only.
    pub async fn value(&self) -> Result<String> {
        self.require_kind(
            &[
                ElementKind::TextField,
                ElementKind::InputField,
                ElementKind::FileField,
                ElementKind::ComboBox,
            ],
            "value",
        )?;
        let node = self.first().await?;
        let value = self.port.eval_on_node(node, VALUE_FN, &[]).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn is_checked(&self) -> Result<bool> {
        self.require_kind(
            &[ElementKind::CheckBox, ElementKind::RadioButton],
            "is_checked",
        )?;
        let node = self.first().await?;
        let value = self.port.eval_on_node(node, IS_CHECKED_FN, &[]).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Alias kept for parity with `select`/`deselect` on toggles.
    pub async fn is_selected(&self) -> Result<bool> {
        self.is_checked().await
    }

    pub async fn check(&self) -> Result<()> {
        self.set_checked(true).await
    }

    pub async fn uncheck(&self) -> Result<()> {
        self.set_checked(false).await
    }

    pub async fn select(&self) -> Result<()> {
        self.set_checked(true).await
    }

    pub async fn deselect(&self) -> Result<()> {
        self.set_checked(false).await
    }

    async fn set_checked(&self, state: bool) -> Result<()> {
        self.require_kind(
            &[ElementKind::CheckBox, ElementKind::RadioButton],
            "check/uncheck",
        )?;
        let node = self.first().await?;
        self.port
            .eval_on_node(node, SET_CHECKED_FN, &[json!(state)])
            .await?;
        Ok(())
    }

    /// Choose a combo-box option by value or visible text.
    pub async fn select_option(&self, value: &str) -> Result<()> {
        self.require_kind(&[ElementKind::ComboBox], "select_option")?;
        let node = self.first().await?;
        self.port
            .eval_on_node(node, SELECT_OPTION_FN, &[json!(value)])
            .await?;
        Ok(())
    }

    async fn first(&self) -> Result<NodeId> {
        let nodes = self.get().await?;
        nodes.first().copied().ok_or_else(|| PagehandError::ElementNotFound {
            selector: self.description(),
        })
    }

    fn require_kind(&self, allowed: &[ElementKind], operation: &str) -> Result<()> {
        match self.selector.kind() {
            // Raw and text selectors defer to the page at runtime.
            None => Ok(()),
            Some(kind) if allowed.contains(&kind) => Ok(()),
            Some(_) => Err(PagehandError::InvalidOperation(format!(
                "{operation} is not supported on {}",
                self.description()
            ))),
        }
    }
}

/// Build a handle with a custom polling cadence.
impl<'a> Element<'a> {
    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.interval = interval;
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::stub::StubPage;

    #[tokio::test]
    async fn value_is_refused_on_a_link() {
        let page = StubPage::default();
        let element = Element::new(
            &page,
            Selector::typed(ElementKind::Link, Some("Home".into()), vec![]),
        );
        let err = element.value().await.unwrap_err();
        assert!(matches!(err, PagehandError::InvalidOperation(_)));
        assert!(err.to_string().contains("link with label \"Home\""));
    }

    #[tokio::test]
    async fn check_is_refused_on_a_combo_box() {
        let page = StubPage::default();
        let element = Element::new(
            &page,
            Selector::typed(ElementKind::ComboBox, Some("Country".into()), vec![]),
        );
        assert!(matches!(
            element.check().await.unwrap_err(),
            PagehandError::InvalidOperation(_)
        ));
    }

    #[tokio::test]
    async fn exists_returns_false_instead_of_failing() {
        tokio::time::pause();
        let page = StubPage::default();
        let element = Element::new(&page, Selector::contains("Ghost"));
        let found = element
            .exists(Duration::from_millis(50), Duration::from_millis(120))
            .await
            .unwrap();
        assert!(!found);
    }
}
