//! The session-backed [`DomPort`]: how selectors touch the live page.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use pagehand_cdp::CallArg;
use pagehand_core::{NodeId, PagehandError, Rect, Result};
use pagehand_locator::DomPort;

use crate::session::Session;

/// Visibility per the `offsetParent` rule: detached and `display:none`
/// elements have no offset parent.
const IS_VISIBLE_FN: &str = "function() { return this.offsetParent !== null; }";

pub(crate) struct PageDom {
    session: Arc<Session>,
}

impl PageDom {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl DomPort for PageDom {
    async fn query_xpath(&self, expr: &str) -> Result<Vec<NodeId>> {
        let client = self.session.client().await?;
        // performSearch needs a live root; fetch it so the search runs
        // against the current document.
        self.session.root_node().await?;
        let nodes = client.dom().search(expr).await.map_err(PagehandError::from)?;
        trace!(expr, count = nodes.len(), "xpath query");
        Ok(nodes)
    }

    async fn query_css(&self, expr: &str) -> Result<Vec<NodeId>> {
        let client = self.session.client().await?;
        let root = self.session.root_node().await?;
        let nodes = client
            .dom()
            .query_selector_all(root, expr)
            .await
            .map_err(PagehandError::from)?;
        trace!(expr, count = nodes.len(), "css query");
        Ok(nodes)
    }

    async fn is_visible(&self, node: NodeId) -> Result<bool> {
        let client = self.session.client().await?;
        let object_id = match client.dom().resolve_node(node).await {
            Ok(id) => id,
            // A node that cannot be resolved anymore is simply not visible.
            Err(_) => return Ok(false),
        };
        let value = client
            .runtime()
            .call_function_on_value(&object_id, IS_VISIBLE_FN, &[])
            .await
            .map_err(PagehandError::from)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn bounding_box(&self, node: NodeId) -> Result<Option<Rect>> {
        let client = self.session.client().await?;
        match client.dom().box_model(node).await {
            Ok(rect) => Ok(Some(rect)),
            // No box model means the node is not rendered; callers skip it.
            Err(_) => Ok(None),
        }
    }

    async fn eval_on_node(
        &self,
        node: NodeId,
        declaration: &str,
        args: &[Value],
    ) -> Result<Value> {
        let client = self.session.client().await?;
        let object_id = client
            .dom()
            .resolve_node(node)
            .await
            .map_err(PagehandError::from)?;
        let call_args: Vec<CallArg> = args.iter().cloned().map(CallArg::Value).collect();
        client
            .runtime()
            .call_function_on_value(&object_id, declaration, &call_args)
            .await
            .map_err(PagehandError::from)
    }
}
