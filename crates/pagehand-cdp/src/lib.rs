//! Browser process management and the raw DevTools-protocol client.
//!
//! The layering, bottom up:
//!
//! - [`launcher`] spawns a Chromium-family binary with a throwaway profile
//!   and discovers the DevTools WebSocket endpoint from its stderr.
//! - [`transport`] runs JSON-RPC 2.0 over that WebSocket: id correlation,
//!   response routing, event fan-out.
//! - [`client`] and [`domains`] give each CDP domain a thin typed handle.
//! - [`events`] republishes the CDP events the rest of the workspace cares
//!   about as [`pagehand_bus::PageSignal`]s.
//! - [`registry`] tracks the targets the browser reports.

pub mod client;
pub mod domains;
pub mod events;
pub mod launcher;
pub mod registry;
pub mod transport;

pub use client::CdpClient;
pub use domains::CallArg;
pub use events::EventRepublisher;
pub use launcher::{BrowserProcess, LaunchOptions};
pub use registry::TargetRegistry;
pub use transport::{Transport, WireEvent};

use thiserror::Error;

/// Failures raised below the session layer.
#[derive(Clone, Debug, Error)]
pub enum CdpError {
    #[error("failed to connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("cdp method {method} failed: {message}")]
    Wire {
        method: String,
        code: i64,
        message: String,
    },

    #[error("cdp method {method} timed out after {timeout_ms} ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed")]
    Closed,

    #[error("failed to launch browser: {0}")]
    Launch(String),
}

impl From<CdpError> for pagehand_core::PagehandError {
    fn from(err: CdpError) -> Self {
        match err {
            CdpError::Wire {
                method, message, ..
            } => pagehand_core::PagehandError::Wire { method, message },
            CdpError::Timeout { method, timeout_ms } => pagehand_core::PagehandError::Wire {
                method,
                message: format!("timed out after {timeout_ms} ms"),
            },
            CdpError::Launch(reason) => pagehand_core::PagehandError::Launch(reason),
            other => pagehand_core::PagehandError::Internal(other.to_string()),
        }
    }
}
