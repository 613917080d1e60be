//! Per-target CDP client with domain handles.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::domains::{Dom, Emulation, Fetch, Input, Network, Overlay, Page, Runtime, Security, Target};
use crate::transport::{Transport, WireEvent};
use crate::CdpError;

/// Client bound to a single debugging target.
///
/// One client per target; a target switch destroys the old client and
/// constructs a new one. Cloning shares the underlying socket.
#[derive(Clone)]
pub struct CdpClient {
    transport: Arc<Transport>,
}

impl CdpClient {
    /// Connect to a target's WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self, CdpError> {
        let transport = Transport::connect(ws_url).await?;
        Ok(Self {
            transport: Arc::new(transport),
        })
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WireEvent> {
        self.transport.subscribe_events()
    }

    /// Issue a raw CDP command. Wire errors are tagged with the method name.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        self.transport
            .send(method, params)
            .await
            .map_err(|e| name_method(e, method))
    }

    /// Issue a raw CDP command with a custom deadline.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        self.transport
            .send_with_timeout(method, params, timeout)
            .await
            .map_err(|e| name_method(e, method))
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }

    pub fn page(&self) -> Page<'_> {
        Page { client: self }
    }

    pub fn dom(&self) -> Dom<'_> {
        Dom { client: self }
    }

    pub fn runtime(&self) -> Runtime<'_> {
        Runtime { client: self }
    }

    pub fn network(&self) -> Network<'_> {
        Network { client: self }
    }

    pub fn input(&self) -> Input<'_> {
        Input { client: self }
    }

    pub fn target(&self) -> Target<'_> {
        Target { client: self }
    }

    pub fn overlay(&self) -> Overlay<'_> {
        Overlay { client: self }
    }

    pub fn security(&self) -> Security<'_> {
        Security { client: self }
    }

    pub fn emulation(&self) -> Emulation<'_> {
        Emulation { client: self }
    }

    pub fn fetch(&self) -> Fetch<'_> {
        Fetch { client: self }
    }
}

fn name_method(err: CdpError, method: &str) -> CdpError {
    match err {
        CdpError::Wire { code, message, .. } => CdpError::Wire {
            method: method.to_string(),
            code,
            message,
        },
        other => other,
    }
}
