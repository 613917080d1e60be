//! JSON-RPC 2.0 over the DevTools WebSocket.
//!
//! One [`Transport`] speaks to one debugging target. Commands get
//! monotonically increasing ids and are correlated back to their callers
//! through a pending map; everything that arrives without an id is an event
//! and is fanned out to subscribers. When the socket drops, every pending
//! caller is failed with [`CdpError::Closed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::CdpError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, CdpError>>>>>;

/// Default per-command deadline.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A CDP event as it came off the wire.
#[derive(Clone, Debug)]
pub struct WireEvent {
    pub method: String,
    pub params: Value,
}

#[derive(Serialize)]
struct WireCommand<'a> {
    id: u64,
    method: &'a str,
    params: &'a Value,
}

/// WebSocket JSON-RPC client for a single debugging target.
pub struct Transport {
    url: String,
    next_id: AtomicU64,
    pending: Pending,
    writer: Mutex<WsSink>,
    events: broadcast::Sender<WireEvent>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Transport {
    /// Connect to a DevTools WebSocket endpoint
    /// (`ws://host:port/devtools/page/<id>` or `.../browser/<id>`).
    pub async fn connect(ws_url: &str) -> Result<Self, CdpError> {
        let (stream, _) = tokio_tungstenite::connect_async(ws_url).await.map_err(|e| {
            CdpError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            }
        })?;
        let (writer, reader) = stream.split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(1024);
        let alive = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(read_loop(
            reader,
            Arc::clone(&pending),
            events.clone(),
            Arc::clone(&alive),
        ));

        debug!(url = ws_url, "cdp transport connected");

        Ok(Self {
            url: ws_url.to_string(),
            next_id: AtomicU64::new(1),
            pending,
            writer: Mutex::new(writer),
            events,
            alive,
            reader: reader_handle,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Subscribe to raw CDP events. Each subscriber sees every event.
    pub fn subscribe_events(&self) -> broadcast::Receiver<WireEvent> {
        self.events.subscribe()
    }

    /// Send a command and await its result with the default deadline.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        self.send_with_timeout(method, params, COMMAND_TIMEOUT).await
    }

    /// Send a command and await its result, bounded by `timeout`.
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        if !self.is_alive() {
            return Err(CdpError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_string(&WireCommand {
            id,
            method,
            params: &params,
        })
        .map_err(|e| CdpError::Protocol(format!("failed to serialize command: {e}")))?;

        trace!(id, method, "cdp send");

        // The responder must be registered before the frame hits the wire,
        // otherwise a fast response races the insert.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(Message::Text(frame.into())).await {
                self.pending.lock().await.remove(&id);
                return Err(CdpError::Protocol(format!("websocket send failed: {e}")));
            }
        }

        let outcome = tokio::time::timeout(timeout, rx).await;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CdpError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(CdpError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Close the socket and stop the reader task.
    pub async fn close(&self) {
        self.alive.store(false, Ordering::Relaxed);
        let mut writer = self.writer.lock().await;
        let _ = writer.send(Message::Close(None)).await;
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.reader.abort();
    }
}

async fn read_loop(
    mut reader: WsSource,
    pending: Pending,
    events: broadcast::Sender<WireEvent>,
    alive: Arc<AtomicBool>,
) {
    while let Some(next) = reader.next().await {
        let message = match next {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "cdp read error, stopping reader");
                break;
            }
        };

        let text = match message {
            Message::Text(t) => t.to_string(),
            Message::Binary(b) => match String::from_utf8(b.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Message::Close(_) => {
                debug!("cdp socket closed by remote");
                break;
            }
            _ => continue,
        };

        let json: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparseable cdp frame");
                continue;
            }
        };

        match classify(&json) {
            Some(Frame::Response { id }) => {
                let result = extract_result(&json);
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(result);
                } else {
                    trace!(id, "response for unknown command id");
                }
            }
            Some(Frame::Event { method }) => {
                let params = json.get("params").cloned().unwrap_or(Value::Null);
                let _ = events.send(WireEvent { method, params });
            }
            None => trace!("frame with neither id nor method"),
        }
    }

    alive.store(false, Ordering::Relaxed);
    for (_, tx) in pending.lock().await.drain() {
        let _ = tx.send(Err(CdpError::Closed));
    }
}

enum Frame {
    Response { id: u64 },
    Event { method: String },
}

fn classify(json: &Value) -> Option<Frame> {
    if let Some(id) = json.get("id").and_then(Value::as_u64) {
        return Some(Frame::Response { id });
    }
    json.get("method")
        .and_then(Value::as_str)
        .map(|method| Frame::Event {
            method: method.to_string(),
        })
}

fn extract_result(json: &Value) -> Result<Value, CdpError> {
    if let Some(error) = json.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        // The method name is filled in by the caller-facing wrapper; at this
        // depth only the wire knows the id.
        return Err(CdpError::Wire {
            method: String::new(),
            code,
            message,
        });
    }
    Ok(json.get("result").cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_splits_responses_and_events() {
        let response = json!({"id": 3, "result": {}});
        assert!(matches!(
            classify(&response),
            Some(Frame::Response { id: 3 })
        ));

        let event = json!({"method": "Page.loadEventFired", "params": {}});
        match classify(&event) {
            Some(Frame::Event { method }) => assert_eq!(method, "Page.loadEventFired"),
            other => panic!("expected event, got {:?}", other.is_some()),
        }

        assert!(classify(&json!({"params": {}})).is_none());
    }

    #[test]
    fn extract_result_surfaces_wire_errors() {
        let frame = json!({
            "id": 9,
            "error": {"code": -32000, "message": "Cannot find context"}
        });
        let err = extract_result(&frame).unwrap_err();
        match err {
            CdpError::Wire { code, message, .. } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "Cannot find context");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn extract_result_defaults_to_null() {
        let frame = json!({"id": 1});
        assert_eq!(extract_result(&frame).unwrap(), Value::Null);
    }

    #[test]
    fn command_serialization_shape() {
        let cmd = WireCommand {
            id: 7,
            method: "Runtime.evaluate",
            params: &json!({"expression": "1+1"}),
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "Runtime.evaluate");
        assert_eq!(value["params"]["expression"], "1+1");
    }
}
