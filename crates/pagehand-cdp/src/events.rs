//! Republishes CDP events as canonical bus signals.
//!
//! One republisher per attached client. The mapping is fixed:
//!
//! | CDP event                               | bus signal            |
//! |-----------------------------------------|-----------------------|
//! | Network.requestWillBeSent               | RequestStarted        |
//! | Network.loadingFinished / loadingFailed | RequestSettled        |
//! | Page.loadEventFired                     | LoadEventFired        |
//! | Page.domContentEventFired               | DomContentEventFired  |
//! | Page.frameStartedLoading                | FrameStartedLoading   |
//! | Page.frameStoppedLoading                | FrameStoppedLoading   |
//! | Page.lifecycleEvent(firstMeaningfulPaint) | FirstMeaningfulPaint + FirstPaint |
//! | Page.lifecycleEvent(firstPaint)         | FirstPaint            |
//! | Target.targetCreated                    | TargetCreated         |
//! | Target.targetInfoChanged (url changed)  | TargetNavigated       |
//! | Target.targetDestroyed                  | TargetDestroyed       |
//! | Page.javascriptDialogOpening            | DialogOpening         |

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::trace;

use pagehand_bus::{DialogKind, PageSignal, SignalBus};
use pagehand_core::{RequestId, TargetId};

use crate::domains::parse_target_info;
use crate::registry::TargetRegistry;
use crate::transport::WireEvent;
use crate::CdpClient;

/// Background task translating wire events into bus signals.
pub struct EventRepublisher {
    task: JoinHandle<()>,
}

impl EventRepublisher {
    pub fn spawn(client: &CdpClient, bus: SignalBus, registry: Arc<TargetRegistry>) -> Self {
        let receiver = client.subscribe_events();
        let task = tokio::spawn(run(receiver, bus, registry));
        Self { task }
    }
}

impl Drop for EventRepublisher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut receiver: broadcast::Receiver<WireEvent>,
    bus: SignalBus,
    registry: Arc<TargetRegistry>,
) {
    loop {
        let event = match receiver.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                trace!(missed, "republisher lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        for signal in translate(&event, &registry) {
            bus.publish(signal);
        }
    }
}

/// Pure translation step; registry is consulted to detect url changes.
fn translate(event: &WireEvent, registry: &TargetRegistry) -> Vec<PageSignal> {
    let params = &event.params;
    match event.method.as_str() {
        "Network.requestWillBeSent" => request_id(params)
            .map(|request| vec![PageSignal::RequestStarted { request }])
            .unwrap_or_default(),
        "Network.loadingFinished" | "Network.loadingFailed" => request_id(params)
            .map(|request| vec![PageSignal::RequestSettled { request }])
            .unwrap_or_default(),
        "Page.loadEventFired" => vec![PageSignal::LoadEventFired],
        "Page.domContentEventFired" => vec![PageSignal::DomContentEventFired],
        "Page.frameStartedLoading" => frame_id(params)
            .map(|frame| vec![PageSignal::FrameStartedLoading { frame }])
            .unwrap_or_default(),
        "Page.frameStoppedLoading" => frame_id(params)
            .map(|frame| vec![PageSignal::FrameStoppedLoading { frame }])
            .unwrap_or_default(),
        "Page.lifecycleEvent" => match params.get("name").and_then(Value::as_str) {
            Some("firstMeaningfulPaint") => {
                vec![PageSignal::FirstMeaningfulPaint, PageSignal::FirstPaint]
            }
            Some("firstPaint") => vec![PageSignal::FirstPaint],
            _ => Vec::new(),
        },
        "Target.targetCreated" => {
            let Some(info) = params.get("targetInfo") else {
                return Vec::new();
            };
            let Some(target) = parse_target_info(info) else {
                return Vec::new();
            };
            let id = target.id.clone();
            registry.upsert(target);
            vec![PageSignal::TargetCreated { target: id }]
        }
        "Target.targetInfoChanged" => {
            let Some(info) = params.get("targetInfo") else {
                return Vec::new();
            };
            let Some(target) = parse_target_info(info) else {
                return Vec::new();
            };
            let id = target.id.clone();
            let url = target.url.clone();
            let previous = registry.update_url(&id, &url);
            if previous.is_none() {
                registry.upsert(target);
                return Vec::new();
            }
            // Only an actual url change counts as a navigation.
            if previous.as_deref() == Some(url.as_str()) {
                Vec::new()
            } else {
                vec![PageSignal::TargetNavigated { target: id, url }]
            }
        }
        "Target.targetDestroyed" => {
            let Some(id) = params.get("targetId").and_then(Value::as_str) else {
                return Vec::new();
            };
            let target = TargetId(id.to_string());
            registry.remove(&target);
            vec![PageSignal::TargetDestroyed { target }]
        }
        "Page.javascriptDialogOpening" => {
            let kind = params
                .get("type")
                .and_then(Value::as_str)
                .and_then(DialogKind::from_cdp);
            let message = params
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            kind.map(|kind| vec![PageSignal::DialogOpening { kind, message }])
                .unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

fn request_id(params: &Value) -> Option<RequestId> {
    params
        .get("requestId")
        .and_then(Value::as_str)
        .map(|id| RequestId(id.to_string()))
}

fn frame_id(params: &Value) -> Option<String> {
    params
        .get("frameId")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(method: &str, params: Value) -> WireEvent {
        WireEvent {
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn request_events_map_to_inflight_signals() {
        let registry = TargetRegistry::new();
        let started = translate(
            &event("Network.requestWillBeSent", json!({"requestId": "r1"})),
            &registry,
        );
        assert_eq!(
            started,
            vec![PageSignal::RequestStarted {
                request: RequestId("r1".into())
            }]
        );

        let failed = translate(
            &event("Network.loadingFailed", json!({"requestId": "r1"})),
            &registry,
        );
        assert_eq!(
            failed,
            vec![PageSignal::RequestSettled {
                request: RequestId("r1".into())
            }]
        );
    }

    #[test]
    fn target_info_change_emits_navigated_only_on_url_change() {
        let registry = TargetRegistry::new();
        let created = translate(
            &event(
                "Target.targetCreated",
                json!({"targetInfo": {"targetId": "t1", "type": "page", "url": "about:blank", "title": ""}}),
            ),
            &registry,
        );
        assert_eq!(
            created,
            vec![PageSignal::TargetCreated {
                target: TargetId("t1".into())
            }]
        );

        // Same url: title-only change, not a navigation.
        let unchanged = translate(
            &event(
                "Target.targetInfoChanged",
                json!({"targetInfo": {"targetId": "t1", "type": "page", "url": "about:blank", "title": "New"}}),
            ),
            &registry,
        );
        assert!(unchanged.is_empty());

        let navigated = translate(
            &event(
                "Target.targetInfoChanged",
                json!({"targetInfo": {"targetId": "t1", "type": "page", "url": "http://a.example/", "title": "A"}}),
            ),
            &registry,
        );
        assert_eq!(
            navigated,
            vec![PageSignal::TargetNavigated {
                target: TargetId("t1".into()),
                url: "http://a.example/".into()
            }]
        );
    }

    #[test]
    fn lifecycle_paint_events_fan_out() {
        let registry = TargetRegistry::new();
        let signals = translate(
            &event("Page.lifecycleEvent", json!({"name": "firstMeaningfulPaint"})),
            &registry,
        );
        assert_eq!(
            signals,
            vec![PageSignal::FirstMeaningfulPaint, PageSignal::FirstPaint]
        );
    }

    #[test]
    fn dialogs_carry_kind_and_message() {
        let registry = TargetRegistry::new();
        let signals = translate(
            &event(
                "Page.javascriptDialogOpening",
                json!({"type": "confirm", "message": "Sure?"}),
            ),
            &registry,
        );
        assert_eq!(
            signals,
            vec![PageSignal::DialogOpening {
                kind: DialogKind::Confirm,
                message: "Sure?".into()
            }]
        );
    }

    #[test]
    fn unknown_events_produce_nothing() {
        let registry = TargetRegistry::new();
        assert!(translate(&event("Animation.animationStarted", json!({})), &registry).is_empty());
    }
}
