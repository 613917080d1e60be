//! The resilient action pipeline.
//!
//! Every pointer verb goes through the same stages: resolve candidates,
//! cap the list, scroll each into view, hit-test its center, dispatch the
//! input on the first candidate that is really there, then hand off to the
//! navigation waiter that was armed before anything moved.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, instrument, trace};

use pagehand_cdp::{CallArg, CdpClient};
use pagehand_core::{ActionId, NodeId, PagehandError, Result};
use pagehand_locator::{resolve_polling, Selector};

use crate::config::{ActionResult, ClickOptions};
use crate::dom::PageDom;
use crate::input::KeyModifiers;
use crate::session::Session;

/// In-page hit test. Passes when the element at the candidate's center is
/// the candidate itself, a descendant, effectively transparent (opacity
/// below 0.1 on either side), or belongs to one of the sibling candidates
/// the same selector matched.
const HIT_CHECK_FN: &str = "function(x, y) { \
    const hit = document.elementFromPoint(x, y); \
    if (!hit) { return false; } \
    if (hit === this || this.contains(hit)) { return true; } \
    const opacity = el => parseFloat(getComputedStyle(el).opacity || '1'); \
    if (opacity(this) < 0.1 || opacity(hit) < 0.1) { return true; } \
    const siblings = Array.prototype.slice.call(arguments, 2); \
    return siblings.some(el => el === hit || el.contains(hit)); \
}";

#[derive(Clone, Copy, Debug)]
pub(crate) enum MouseButton {
    Left,
    Right,
}

impl MouseButton {
    fn as_cdp(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
        }
    }
}

pub(crate) struct ClickSpec {
    pub button: MouseButton,
    pub click_count: u32,
    pub modifiers: KeyModifiers,
}

impl ClickSpec {
    pub fn single() -> Self {
        Self {
            button: MouseButton::Left,
            click_count: 1,
            modifiers: KeyModifiers::empty(),
        }
    }

    pub fn double() -> Self {
        Self {
            click_count: 2,
            ..Self::single()
        }
    }

    pub fn right() -> Self {
        Self {
            button: MouseButton::Right,
            ..Self::single()
        }
    }
}

/// A candidate that survived the scroll + hit-test stages.
struct HitPoint {
    node: NodeId,
    x: f64,
    y: f64,
}

#[instrument(skip_all, fields(action = %ActionId::new().0, selector = %selector.description()))]
pub(crate) async fn click(
    session: &Arc<Session>,
    dom: &PageDom,
    selector: &Selector,
    spec: ClickSpec,
    options: &ClickOptions,
) -> Result<ActionResult> {
    let description = selector.description();
    let mut wait = session.wait_options(options.timeout);
    wait.await_navigation = options.await_navigation;
    if let Some(start) = options.wait_for_start {
        wait.wait_for_start = start;
    }

    let mut spec = spec;
    spec.modifiers = options.modifiers;
    let (result, settled) = session
        .with_navigation(wait, &[], |client| async move {
            let hit = hit_testable_candidate(session, dom, selector).await?;
            reject_file_input(&client, hit.node, &description).await?;
            dispatch_click(&client, &hit, &spec).await?;
            Ok(ActionResult::new(format!("Clicked {description}")))
        })
        .await?;

    trace!(?settled, "click settled");
    Ok(result)
}

/// Move the pointer over the element. The move itself is fire-and-forget;
/// only the settle wait is awaited.
pub(crate) async fn hover(
    session: &Arc<Session>,
    dom: &PageDom,
    selector: &Selector,
) -> Result<ActionResult> {
    let description = selector.description();
    let wait = session.wait_options(None);

    let (result, _) = session
        .with_navigation(wait, &[], |client| async move {
            let hit = hit_testable_candidate(session, dom, selector).await?;
            let mouse_client = client.clone();
            tokio::spawn(async move {
                let _ = mouse_client
                    .input()
                    .mouse_event("mouseMoved", hit.x, hit.y, "none", 0, 0)
                    .await;
            });
            Ok(ActionResult::new(format!("Hovered over {description}")))
        })
        .await?;
    Ok(result)
}

pub(crate) async fn focus(
    session: &Arc<Session>,
    dom: &PageDom,
    selector: &Selector,
) -> Result<ActionResult> {
    let description = selector.description();
    let node = first_candidate(session, dom, selector).await?;
    let client = session.client().await?;
    client.dom().focus(node).await.map_err(PagehandError::from)?;
    Ok(ActionResult::new(format!("Focussed on {description}")))
}

pub(crate) async fn scroll_to(
    session: &Arc<Session>,
    dom: &PageDom,
    selector: &Selector,
) -> Result<ActionResult> {
    let description = selector.description();
    let node = first_candidate(session, dom, selector).await?;
    let client = session.client().await?;
    client
        .dom()
        .scroll_into_view_if_needed(node)
        .await
        .map_err(PagehandError::from)?;
    Ok(ActionResult::new(format!("Scrolled to {description}")))
}

/// Scroll the viewport by pixel deltas.
pub(crate) async fn scroll_by(
    session: &Arc<Session>,
    dx: i64,
    dy: i64,
    direction: &str,
) -> Result<ActionResult> {
    let client = session.client().await?;
    client
        .runtime()
        .evaluate(&format!("window.scrollBy({dx}, {dy})"))
        .await
        .map_err(PagehandError::from)?;
    Ok(ActionResult::new(format!("Scrolled {direction}")))
}

pub(crate) async fn highlight(
    session: &Arc<Session>,
    dom: &PageDom,
    selector: &Selector,
) -> Result<ActionResult> {
    let description = selector.description();
    let node = first_candidate(session, dom, selector).await?;
    let client = session.client().await?;
    client
        .overlay()
        .highlight_node(node)
        .await
        .map_err(PagehandError::from)?;
    Ok(ActionResult::new(format!("Highlighted {description}")))
}

pub(crate) async fn clear_highlights(session: &Arc<Session>) -> Result<ActionResult> {
    let client = session.client().await?;
    client
        .overlay()
        .hide_highlight()
        .await
        .map_err(PagehandError::from)?;
    Ok(ActionResult::new("Cleared highlights"))
}

pub(crate) async fn first_candidate(
    session: &Arc<Session>,
    dom: &PageDom,
    selector: &Selector,
) -> Result<NodeId> {
    let nodes = resolve_polling(
        dom,
        selector,
        session.options.retry_interval,
        session.options.retry_timeout,
    )
    .await?;
    nodes
        .first()
        .copied()
        .ok_or_else(|| PagehandError::ElementNotFound {
            selector: selector.description(),
        })
}

/// Stages 1–3 of the pipeline: resolve, cap, scroll + hit-test in order.
async fn hit_testable_candidate(
    session: &Arc<Session>,
    dom: &PageDom,
    selector: &Selector,
) -> Result<HitPoint> {
    let client = session.client().await?;
    let nodes = resolve_polling(
        dom,
        selector,
        session.options.retry_interval,
        session.options.retry_timeout,
    )
    .await?;

    let total = nodes.len();
    let cap = session.options.elements_to_match;
    let candidates: Vec<NodeId> = nodes.into_iter().take(cap).collect();
    debug!(total, considered = candidates.len(), "click candidates");

    // Remote objects for the sibling-tolerance part of the hit test.
    let mut object_ids: Vec<Option<String>> = Vec::with_capacity(candidates.len());
    for node in &candidates {
        object_ids.push(client.dom().resolve_node(*node).await.ok());
    }

    for (index, node) in candidates.iter().enumerate() {
        if client.dom().scroll_into_view_if_needed(*node).await.is_err() {
            continue;
        }
        let Ok((x, y)) = client.dom().center(*node).await else {
            continue;
        };
        let Some(object_id) = object_ids[index].as_deref() else {
            continue;
        };

        let mut args = vec![CallArg::Value(json!(x)), CallArg::Value(json!(y))];
        for (other, sibling) in object_ids.iter().enumerate() {
            if other == index {
                continue;
            }
            if let Some(id) = sibling {
                args.push(CallArg::ObjectId(id.clone()));
            }
        }

        let passed = client
            .runtime()
            .call_function_on_value(object_id, HIT_CHECK_FN, &args)
            .await
            .map(|value| value.as_bool().unwrap_or(false))
            .unwrap_or(false);
        if passed {
            return Ok(HitPoint { node: *node, x, y });
        }
        trace!(node = %node, "candidate covered at its center");
    }

    if total > cap {
        Err(PagehandError::TooManyMatches {
            selector: selector.description(),
            count: total,
        })
    } else {
        Err(PagehandError::ElementCovered {
            selector: selector.description(),
        })
    }
}

/// File inputs cannot be clicked open; uploading goes through `attach`.
async fn reject_file_input(
    client: &CdpClient,
    node: NodeId,
    description: &str,
) -> Result<()> {
    let attributes = client
        .dom()
        .attributes(node)
        .await
        .map_err(PagehandError::from)?;
    let is_file = attributes
        .iter()
        .any(|(name, value)| name == "type" && value == "file");
    if is_file {
        return Err(PagehandError::InvalidOperation(format!(
            "clicking {description} would open a native file dialog; use attach to upload a file"
        )));
    }
    Ok(())
}

async fn dispatch_click(client: &CdpClient, hit: &HitPoint, spec: &ClickSpec) -> Result<()> {
    let input = client.input();
    let button = spec.button.as_cdp();
    let modifiers = spec.modifiers.bits();
    input
        .mouse_event("mouseMoved", hit.x, hit.y, "none", 0, modifiers)
        .await
        .map_err(PagehandError::from)?;
    input
        .mouse_event("mousePressed", hit.x, hit.y, button, spec.click_count, modifiers)
        .await
        .map_err(PagehandError::from)?;
    input
        .mouse_event("mouseReleased", hit.x, hit.y, button, spec.click_count, modifiers)
        .await
        .map_err(PagehandError::from)?;
    Ok(())
}

/// Triple-click the element to select its content (used by `clear`).
pub(crate) async fn select_all_at(client: &CdpClient, x: f64, y: f64) -> Result<()> {
    let input = client.input();
    input
        .mouse_event("mouseMoved", x, y, "none", 0, 0)
        .await
        .map_err(PagehandError::from)?;
    input
        .mouse_event("mousePressed", x, y, "left", 3, 0)
        .await
        .map_err(PagehandError::from)?;
    input
        .mouse_event("mouseReleased", x, y, "left", 3, 0)
        .await
        .map_err(PagehandError::from)?;
    Ok(())
}
