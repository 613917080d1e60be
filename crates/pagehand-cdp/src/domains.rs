//! Thin per-domain command wrappers.
//!
//! Each handle only translates between Rust signatures and CDP method
//! names/params; coordination lives above this layer. Anything the wrappers
//! do not cover can go through [`crate::CdpClient::call`] directly.

use serde_json::{json, Map, Value};

use pagehand_core::{NodeId, Rect, TargetDescriptor, TargetId};

use crate::client::CdpClient;
use crate::CdpError;

/// Argument to `Runtime.callFunctionOn`: plain JSON or a remote object.
#[derive(Clone, Debug)]
pub enum CallArg {
    Value(Value),
    ObjectId(String),
}

impl CallArg {
    fn to_wire(&self) -> Value {
        match self {
            CallArg::Value(v) => json!({ "value": v }),
            CallArg::ObjectId(id) => json!({ "objectId": id }),
        }
    }
}

pub struct Page<'a> {
    pub(crate) client: &'a CdpClient,
}

impl Page<'_> {
    pub async fn enable(&self) -> Result<(), CdpError> {
        self.client.call("Page.enable", json!({})).await?;
        Ok(())
    }

    pub async fn set_lifecycle_events_enabled(&self, enabled: bool) -> Result<(), CdpError> {
        self.client
            .call("Page.setLifecycleEventsEnabled", json!({ "enabled": enabled }))
            .await?;
        Ok(())
    }

    /// Start a navigation. Returns the `errorText` the browser reported, if
    /// any; the caller decides how to surface it.
    pub async fn navigate(&self, url: &str) -> Result<Option<String>, CdpError> {
        let result = self.client.call("Page.navigate", json!({ "url": url })).await?;
        Ok(result
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string))
    }

    pub async fn reload(&self) -> Result<(), CdpError> {
        self.client.call("Page.reload", json!({})).await?;
        Ok(())
    }

    pub async fn bring_to_front(&self) -> Result<(), CdpError> {
        self.client.call("Page.bringToFront", json!({})).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), CdpError> {
        self.client.call("Page.close", json!({})).await?;
        Ok(())
    }

    /// Capture a screenshot; returns the base64 payload.
    pub async fn capture_screenshot(&self, format: &str) -> Result<String, CdpError> {
        let result = self
            .client
            .call("Page.captureScreenshot", json!({ "format": format }))
            .await?;
        result
            .get("data")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CdpError::Protocol("captureScreenshot returned no data".into()))
    }

    pub async fn handle_javascript_dialog(
        &self,
        accept: bool,
        prompt_text: Option<&str>,
    ) -> Result<(), CdpError> {
        let mut params = Map::new();
        params.insert("accept".into(), json!(accept));
        if let Some(text) = prompt_text {
            params.insert("promptText".into(), json!(text));
        }
        self.client
            .call("Page.handleJavaScriptDialog", Value::Object(params))
            .await?;
        Ok(())
    }
}

pub struct Dom<'a> {
    pub(crate) client: &'a CdpClient,
}

impl Dom<'_> {
    pub async fn enable(&self) -> Result<(), CdpError> {
        self.client.call("DOM.enable", json!({})).await?;
        Ok(())
    }

    /// Fetch the root document node id.
    pub async fn get_document(&self) -> Result<NodeId, CdpError> {
        let result = self.client.call("DOM.getDocument", json!({})).await?;
        result
            .pointer("/root/nodeId")
            .and_then(Value::as_i64)
            .map(NodeId)
            .ok_or_else(|| CdpError::Protocol("DOM.getDocument returned no root nodeId".into()))
    }

    pub async fn query_selector_all(
        &self,
        root: NodeId,
        selector: &str,
    ) -> Result<Vec<NodeId>, CdpError> {
        let result = self
            .client
            .call(
                "DOM.querySelectorAll",
                json!({ "nodeId": root.0, "selector": selector }),
            )
            .await?;
        Ok(node_id_array(result.get("nodeIds")))
    }

    /// Run a DOM search (XPath, selector or plain text query) and collect
    /// every result node.
    pub async fn search(&self, query: &str) -> Result<Vec<NodeId>, CdpError> {
        let result = self
            .client
            .call("DOM.performSearch", json!({ "query": query }))
            .await?;
        let search_id = result
            .get("searchId")
            .and_then(Value::as_str)
            .ok_or_else(|| CdpError::Protocol("DOM.performSearch returned no searchId".into()))?
            .to_string();
        let count = result
            .get("resultCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        if count == 0 {
            let _ = self
                .client
                .call("DOM.discardSearchResults", json!({ "searchId": search_id }))
                .await;
            return Ok(Vec::new());
        }

        let results = self
            .client
            .call(
                "DOM.getSearchResults",
                json!({ "searchId": search_id, "fromIndex": 0, "toIndex": count }),
            )
            .await;
        let _ = self
            .client
            .call("DOM.discardSearchResults", json!({ "searchId": search_id }))
            .await;
        Ok(node_id_array(results?.get("nodeIds")))
    }

    /// Resolve a node id into a remote object usable with
    /// `Runtime.callFunctionOn`.
    pub async fn resolve_node(&self, node: NodeId) -> Result<String, CdpError> {
        let result = self
            .client
            .call("DOM.resolveNode", json!({ "nodeId": node.0 }))
            .await?;
        result
            .pointer("/object/objectId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CdpError::Protocol("DOM.resolveNode returned no objectId".into()))
    }

    /// Map a remote object back to a node id (0 means unknown).
    pub async fn request_node(&self, object_id: &str) -> Result<Option<NodeId>, CdpError> {
        let result = self
            .client
            .call("DOM.requestNode", json!({ "objectId": object_id }))
            .await?;
        Ok(result
            .get("nodeId")
            .and_then(Value::as_i64)
            .filter(|id| *id != 0)
            .map(NodeId))
    }

    /// Content-box rectangle of a node. Nodes without a box (e.g. detached
    /// or `display:none`) surface as a wire error from the browser.
    pub async fn box_model(&self, node: NodeId) -> Result<Rect, CdpError> {
        let result = self
            .client
            .call("DOM.getBoxModel", json!({ "nodeId": node.0 }))
            .await?;
        let quad: Vec<f64> = result
            .pointer("/model/content")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        Rect::from_quad(&quad)
            .ok_or_else(|| CdpError::Protocol("DOM.getBoxModel returned a malformed quad".into()))
    }

    /// Center of a node's content box.
    pub async fn center(&self, node: NodeId) -> Result<(f64, f64), CdpError> {
        Ok(self.box_model(node).await?.center())
    }

    pub async fn scroll_into_view_if_needed(&self, node: NodeId) -> Result<(), CdpError> {
        self.client
            .call("DOM.scrollIntoViewIfNeeded", json!({ "nodeId": node.0 }))
            .await?;
        Ok(())
    }

    pub async fn focus(&self, node: NodeId) -> Result<(), CdpError> {
        self.client
            .call("DOM.focus", json!({ "nodeId": node.0 }))
            .await?;
        Ok(())
    }

    pub async fn set_file_input_files(
        &self,
        node: NodeId,
        files: &[String],
    ) -> Result<(), CdpError> {
        self.client
            .call(
                "DOM.setFileInputFiles",
                json!({ "nodeId": node.0, "files": files }),
            )
            .await?;
        Ok(())
    }

    /// Attribute name/value pairs of an element node.
    pub async fn attributes(&self, node: NodeId) -> Result<Vec<(String, String)>, CdpError> {
        let result = self
            .client
            .call("DOM.getAttributes", json!({ "nodeId": node.0 }))
            .await?;
        let flat: Vec<String> = result
            .get("attributes")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(flat
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect())
    }
}

pub struct Runtime<'a> {
    pub(crate) client: &'a CdpClient,
}

impl Runtime<'_> {
    pub async fn enable(&self) -> Result<(), CdpError> {
        self.client.call("Runtime.enable", json!({})).await?;
        Ok(())
    }

    /// Evaluate an expression in the page. JS exceptions surface as
    /// protocol errors carrying the exception description.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, CdpError> {
        let result = self
            .client
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        reject_exception(&result)?;
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    /// Call a function with a remote object as `this`. Returns the raw
    /// `result` descriptor so callers can read either `value` or `objectId`.
    pub async fn call_function_on(
        &self,
        object_id: &str,
        declaration: &str,
        args: &[CallArg],
    ) -> Result<Value, CdpError> {
        let result = self
            .client
            .call(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": declaration,
                    "arguments": args.iter().map(CallArg::to_wire).collect::<Vec<_>>(),
                    "returnByValue": false,
                }),
            )
            .await?;
        reject_exception(&result)?;
        Ok(result.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Same as [`call_function_on`], but forces `returnByValue` and yields
    /// the plain JSON value.
    pub async fn call_function_on_value(
        &self,
        object_id: &str,
        declaration: &str,
        args: &[CallArg],
    ) -> Result<Value, CdpError> {
        let result = self
            .client
            .call(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": declaration,
                    "arguments": args.iter().map(CallArg::to_wire).collect::<Vec<_>>(),
                    "returnByValue": true,
                }),
            )
            .await?;
        reject_exception(&result)?;
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }
}

fn reject_exception(result: &Value) -> Result<(), CdpError> {
    if let Some(details) = result.get("exceptionDetails") {
        let message = details
            .pointer("/exception/description")
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("unknown javascript exception");
        return Err(CdpError::Protocol(format!("page script threw: {message}")));
    }
    Ok(())
}

pub struct Network<'a> {
    pub(crate) client: &'a CdpClient,
}

impl Network<'_> {
    pub async fn enable(&self) -> Result<(), CdpError> {
        self.client.call("Network.enable", json!({})).await?;
        Ok(())
    }

    pub async fn set_extra_headers(&self, headers: &Value) -> Result<(), CdpError> {
        self.client
            .call("Network.setExtraHTTPHeaders", json!({ "headers": headers }))
            .await?;
        Ok(())
    }
}

pub struct Input<'a> {
    pub(crate) client: &'a CdpClient,
}

impl Input<'_> {
    pub async fn mouse_event(
        &self,
        kind: &str,
        x: f64,
        y: f64,
        button: &str,
        click_count: u32,
        modifiers: u32,
    ) -> Result<(), CdpError> {
        self.client
            .call(
                "Input.dispatchMouseEvent",
                json!({
                    "type": kind,
                    "x": x,
                    "y": y,
                    "button": button,
                    "clickCount": click_count,
                    "modifiers": modifiers,
                }),
            )
            .await?;
        Ok(())
    }

    /// Raw key event; the caller supplies the full CDP parameter object.
    pub async fn key_event(&self, params: Value) -> Result<(), CdpError> {
        self.client.call("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }
}

pub struct Target<'a> {
    pub(crate) client: &'a CdpClient,
}

impl Target<'_> {
    pub async fn set_discover_targets(&self, discover: bool) -> Result<(), CdpError> {
        self.client
            .call("Target.setDiscoverTargets", json!({ "discover": discover }))
            .await?;
        Ok(())
    }

    pub async fn get_targets(&self) -> Result<Vec<TargetDescriptor>, CdpError> {
        let result = self.client.call("Target.getTargets", json!({})).await?;
        let infos = result
            .get("targetInfos")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(infos.iter().filter_map(parse_target_info).collect())
    }

    pub async fn create_target(&self, url: &str) -> Result<TargetId, CdpError> {
        let result = self
            .client
            .call("Target.createTarget", json!({ "url": url }))
            .await?;
        result
            .get("targetId")
            .and_then(Value::as_str)
            .map(|id| TargetId(id.to_string()))
            .ok_or_else(|| CdpError::Protocol("Target.createTarget returned no targetId".into()))
    }

    pub async fn close_target(&self, target: &TargetId) -> Result<(), CdpError> {
        self.client
            .call("Target.closeTarget", json!({ "targetId": target.0 }))
            .await?;
        Ok(())
    }

    pub async fn activate_target(&self, target: &TargetId) -> Result<(), CdpError> {
        self.client
            .call("Target.activateTarget", json!({ "targetId": target.0 }))
            .await?;
        Ok(())
    }
}

pub(crate) fn parse_target_info(info: &Value) -> Option<TargetDescriptor> {
    Some(TargetDescriptor {
        id: TargetId(info.get("targetId")?.as_str()?.to_string()),
        kind: info
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        url: info
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        title: info
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

pub struct Overlay<'a> {
    pub(crate) client: &'a CdpClient,
}

impl Overlay<'_> {
    pub async fn enable(&self) -> Result<(), CdpError> {
        self.client.call("Overlay.enable", json!({})).await?;
        Ok(())
    }

    /// Outline a node with a translucent highlight.
    pub async fn highlight_node(&self, node: NodeId) -> Result<(), CdpError> {
        self.client
            .call(
                "Overlay.highlightNode",
                json!({
                    "nodeId": node.0,
                    "highlightConfig": {
                        "contentColor": { "r": 255, "g": 234, "b": 0, "a": 0.35 },
                        "showInfo": true,
                    },
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn hide_highlight(&self) -> Result<(), CdpError> {
        self.client.call("Overlay.hideHighlight", json!({})).await?;
        Ok(())
    }
}

pub struct Security<'a> {
    pub(crate) client: &'a CdpClient,
}

impl Security<'_> {
    pub async fn enable(&self) -> Result<(), CdpError> {
        self.client.call("Security.enable", json!({})).await?;
        Ok(())
    }

    pub async fn set_ignore_certificate_errors(&self, ignore: bool) -> Result<(), CdpError> {
        self.client
            .call(
                "Security.setIgnoreCertificateErrors",
                json!({ "ignore": ignore }),
            )
            .await?;
        Ok(())
    }
}

pub struct Emulation<'a> {
    pub(crate) client: &'a CdpClient,
}

impl Emulation<'_> {
    pub async fn set_device_metrics_override(
        &self,
        width: u32,
        height: u32,
        device_scale_factor: f64,
        mobile: bool,
    ) -> Result<(), CdpError> {
        self.client
            .call(
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": width,
                    "height": height,
                    "deviceScaleFactor": device_scale_factor,
                    "mobile": mobile,
                }),
            )
            .await?;
        Ok(())
    }
}

pub struct Fetch<'a> {
    pub(crate) client: &'a CdpClient,
}

impl Fetch<'_> {
    /// Enable request pausing for every request.
    pub async fn enable(&self) -> Result<(), CdpError> {
        self.client
            .call(
                "Fetch.enable",
                json!({ "patterns": [{ "urlPattern": "*" }] }),
            )
            .await?;
        Ok(())
    }

    pub async fn disable(&self) -> Result<(), CdpError> {
        self.client.call("Fetch.disable", json!({})).await?;
        Ok(())
    }

    pub async fn fulfill_request(
        &self,
        request_id: &str,
        status: u16,
        headers: &[(String, String)],
        body_base64: &str,
    ) -> Result<(), CdpError> {
        let headers: Vec<Value> = headers
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        self.client
            .call(
                "Fetch.fulfillRequest",
                json!({
                    "requestId": request_id,
                    "responseCode": status,
                    "responseHeaders": headers,
                    "body": body_base64,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn fail_request(&self, request_id: &str, reason: &str) -> Result<(), CdpError> {
        self.client
            .call(
                "Fetch.failRequest",
                json!({ "requestId": request_id, "errorReason": reason }),
            )
            .await?;
        Ok(())
    }

    /// Let the request through, optionally overriding url/method/headers.
    pub async fn continue_request(
        &self,
        request_id: &str,
        overrides: Value,
    ) -> Result<(), CdpError> {
        let mut params = match overrides {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(CdpError::Protocol(format!(
                    "continueRequest overrides must be an object, got {other}"
                )))
            }
        };
        params.insert("requestId".into(), json!(request_id));
        self.client
            .call("Fetch.continueRequest", Value::Object(params))
            .await?;
        Ok(())
    }
}

fn node_id_array(value: Option<&Value>) -> Vec<NodeId> {
    value
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_i64)
                .filter(|id| *id != 0)
                .map(NodeId)
                .collect()
        })
        .unwrap_or_default()
}
