//! Selector resolution: queries, visibility, relatives, polling.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace};

use pagehand_core::{NodeId, PagehandError, Rect, Result};

use crate::selector::{QueryPlan, Selector};

/// Default polling cadence for `get`/`exists`.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(1000);
pub const RETRY_TIMEOUT: Duration = Duration::from_millis(10000);

/// What the resolver needs from the attached page.
#[async_trait]
pub trait DomPort: Send + Sync {
    async fn query_xpath(&self, expr: &str) -> Result<Vec<NodeId>>;
    async fn query_css(&self, expr: &str) -> Result<Vec<NodeId>>;
    /// Visibility per the `offsetParent` rule.
    async fn is_visible(&self, node: NodeId) -> Result<bool>;
    /// Viewport rectangle; `None` when the node has no box.
    async fn bounding_box(&self, node: NodeId) -> Result<Option<Rect>>;
    /// Run a function against the node (`this` is the element).
    async fn eval_on_node(&self, node: NodeId, declaration: &str, args: &[Value])
        -> Result<Value>;
}

#[derive(Clone, Copy, Debug)]
pub struct ResolveOptions {
    pub visible_only: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self { visible_only: true }
    }
}

/// Resolve a selector to node ids, best match first.
///
/// Query plans run in order until one yields candidates; the raw list is
/// filtered by visibility and then by the selector's relative constraints,
/// ranked by ascending total planar distance.
pub async fn resolve(
    port: &dyn DomPort,
    selector: &Selector,
    options: ResolveOptions,
) -> Result<Vec<NodeId>> {
    let mut nodes = Vec::new();
    for plan in selector.plans() {
        nodes = match &plan {
            QueryPlan::Xpath(expr) => port.query_xpath(expr).await?,
            QueryPlan::Css(expr) => port.query_css(expr).await?,
        };
        trace!(?plan, count = nodes.len(), "query plan evaluated");
        if !nodes.is_empty() {
            break;
        }
    }

    if options.visible_only {
        let mut visible = Vec::with_capacity(nodes.len());
        for node in nodes {
            if port.is_visible(node).await.unwrap_or(false) {
                visible.push(node);
            }
        }
        nodes = visible;
    }

    if selector.relatives.is_empty() || nodes.is_empty() {
        return Ok(nodes);
    }

    rank_by_relatives(port, selector, nodes).await
}

/// Apply relative constraints: all must hold, winner is the smallest summed
/// distance across constraints.
async fn rank_by_relatives(
    port: &dyn DomPort,
    selector: &Selector,
    candidates: Vec<NodeId>,
) -> Result<Vec<NodeId>> {
    // Anchor rects are computed once per constraint, lazily against the
    // same page state the candidates came from.
    let mut anchor_rects: Vec<Vec<Rect>> = Vec::with_capacity(selector.relatives.len());
    for constraint in &selector.relatives {
        let anchors = Box::pin(resolve(port, &constraint.anchor, ResolveOptions::default())).await?;
        if anchors.is_empty() {
            return Err(PagehandError::ElementNotFound {
                selector: constraint.anchor.description(),
            });
        }
        let mut rects = Vec::with_capacity(anchors.len());
        for anchor in anchors {
            if let Some(rect) = port.bounding_box(anchor).await? {
                rects.push(rect);
            }
        }
        anchor_rects.push(rects);
    }

    let mut scored: Vec<(f64, NodeId)> = Vec::new();
    'candidates: for node in candidates {
        let Some(rect) = port.bounding_box(node).await? else {
            continue;
        };
        let mut total = 0.0;
        for (constraint, anchors) in selector.relatives.iter().zip(&anchor_rects) {
            match constraint.score(&rect, anchors) {
                Some(score) => total += score,
                None => continue 'candidates,
            }
        }
        scored.push((total, node));
    }

    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    debug!(count = scored.len(), "candidates after relative ranking");
    Ok(scored.into_iter().map(|(_, node)| node).collect())
}

/// Poll [`resolve`] until at least one node matches or the timeout lapses.
pub async fn resolve_polling(
    port: &dyn DomPort,
    selector: &Selector,
    interval: Duration,
    timeout: Duration,
) -> Result<Vec<NodeId>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let nodes = resolve(port, selector, ResolveOptions::default()).await?;
        if !nodes.is_empty() {
            return Ok(nodes);
        }
        if tokio::time::Instant::now() + interval > deadline {
            return Err(PagehandError::ElementNotFound {
                selector: selector.description(),
            });
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory page for resolver tests: canned query results plus
    /// per-node visibility and geometry.
    #[derive(Default)]
    pub struct StubPage {
        pub xpath: Mutex<HashMap<String, Vec<NodeId>>>,
        pub css: Mutex<HashMap<String, Vec<NodeId>>>,
        pub hidden: Mutex<Vec<NodeId>>,
        pub rects: Mutex<HashMap<i64, Rect>>,
    }

    impl StubPage {
        pub fn with_xpath(self, expr: &str, nodes: Vec<NodeId>) -> Self {
            self.xpath.lock().unwrap().insert(expr.to_string(), nodes);
            self
        }

        pub fn with_any_xpath(self, nodes: Vec<NodeId>) -> Self {
            self.xpath.lock().unwrap().insert(String::new(), nodes);
            self
        }

        pub fn hide(self, node: NodeId) -> Self {
            self.hidden.lock().unwrap().push(node);
            self
        }

        pub fn rect(self, node: NodeId, rect: Rect) -> Self {
            self.rects.lock().unwrap().insert(node.0, rect);
            self
        }
    }

    #[async_trait]
    impl DomPort for StubPage {
        async fn query_xpath(&self, expr: &str) -> Result<Vec<NodeId>> {
            let map = self.xpath.lock().unwrap();
            Ok(map
                .get(expr)
                .or_else(|| map.get(""))
                .cloned()
                .unwrap_or_default())
        }

        async fn query_css(&self, expr: &str) -> Result<Vec<NodeId>> {
            Ok(self.css.lock().unwrap().get(expr).cloned().unwrap_or_default())
        }

        async fn is_visible(&self, node: NodeId) -> Result<bool> {
            Ok(!self.hidden.lock().unwrap().contains(&node))
        }

        async fn bounding_box(&self, node: NodeId) -> Result<Option<Rect>> {
            Ok(self.rects.lock().unwrap().get(&node.0).copied())
        }

        async fn eval_on_node(
            &self,
            _node: NodeId,
            _declaration: &str,
            _args: &[Value],
        ) -> Result<Value> {
            Ok(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stub::StubPage;
    use super::*;
    use crate::selector::ElementKind;

    #[tokio::test]
    async fn hidden_candidates_are_filtered_out() {
        // Two buttons labelled the same; one is display:none.
        let selector = Selector::typed(ElementKind::Button, Some("Submit".into()), vec![]);
        let page = StubPage::default()
            .with_any_xpath(vec![NodeId(1), NodeId(2)])
            .hide(NodeId(2));

        let nodes = resolve(&page, &selector, ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(nodes, vec![NodeId(1)]);
    }

    #[tokio::test]
    async fn relatives_pick_the_nearest_accepting_candidate() {
        // Two Delete links; anchors "Alice" (node 10) and "Bob" (node 11).
        let delete = Selector::typed(ElementKind::Link, Some("Delete".into()), vec![])
            .to_right_of(Selector::contains("Bob"));

        let bob_anchor_xpath = Selector::contains("Bob").plans();
        let crate::selector::QueryPlan::Xpath(anchor_expr) = &bob_anchor_xpath[0] else {
            panic!("expected xpath plan");
        };

        let delete_plans = delete.plans();
        let crate::selector::QueryPlan::Xpath(delete_expr) = &delete_plans[0] else {
            panic!("expected xpath plan");
        };

        let page = StubPage::default()
            .with_xpath(delete_expr, vec![NodeId(1), NodeId(2)])
            .with_xpath(anchor_expr, vec![NodeId(11)])
            // Alice's row Delete at y=0, Bob's row Delete at y=40.
            .rect(NodeId(1), Rect::new(300.0, 0.0, 350.0, 20.0))
            .rect(NodeId(2), Rect::new(300.0, 40.0, 350.0, 60.0))
            .rect(NodeId(11), Rect::new(50.0, 40.0, 90.0, 60.0));

        let nodes = resolve(&page, &delete, ResolveOptions::default())
            .await
            .unwrap();
        // Both are right of Bob, but node 2 shares Bob's row and wins.
        assert_eq!(nodes, vec![NodeId(2), NodeId(1)]);
    }

    #[tokio::test]
    async fn missing_anchor_names_the_anchor_selector() {
        let selector =
            Selector::contains("Delete").to_right_of(Selector::contains("Nobody"));
        // Only the candidate query matches; the anchor resolves empty.
        let page = StubPage::default()
            .with_xpath("//*[contains(@value, 'Delete')]", vec![NodeId(1)])
            .rect(NodeId(1), Rect::new(0.0, 0.0, 10.0, 10.0));

        let err = resolve(&page, &selector, ResolveOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Nobody"));
    }

    #[tokio::test]
    async fn polling_times_out_with_the_selector_description() {
        tokio::time::pause();
        let selector = Selector::contains("Ghost");
        let page = StubPage::default();

        let err = resolve_polling(
            &page,
            &selector,
            Duration::from_millis(100),
            Duration::from_millis(350),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Ghost"));
    }
}
