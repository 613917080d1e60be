//! Shared types for the pagehand workspace.
//!
//! Everything the crates pass across their seams lives here: the id newtypes,
//! viewport geometry, the target descriptor, and the single error taxonomy
//! the public surface exposes.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// CDP-scoped identifier for a DOM node.
///
/// Node ids are only meaningful inside the DOM session of the target they
/// were fetched from; after a target switch every previously held id is
/// stale and must be re-resolved.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub i64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a debuggable target (page, service worker, ...).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network request identifier as reported by the Network domain.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation id attached to a single user action, mostly for tracing.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

/// A debuggable unit known to the browser.
///
/// Equality is by id only; url and title are snapshots that may already be
/// stale by the time they are read.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub id: TargetId,
    pub kind: String,
    pub url: String,
    pub title: String,
}

impl PartialEq for TargetDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TargetDescriptor {}

impl TargetDescriptor {
    pub fn is_page(&self) -> bool {
        self.kind == "page"
    }
}

/// Axis-aligned rectangle in viewport pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Build a rect from a CDP content quad (eight numbers, clockwise from
    /// the top-left corner).
    pub fn from_quad(quad: &[f64]) -> Option<Self> {
        if quad.len() < 8 {
            return None;
        }
        let xs = [quad[0], quad[2], quad[4], quad[6]];
        let ys = [quad[1], quad[3], quad[5], quad[7]];
        Some(Self {
            left: xs.iter().cloned().fold(f64::INFINITY, f64::min),
            top: ys.iter().cloned().fold(f64::INFINITY, f64::min),
            right: xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            bottom: ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.left + self.width() / 2.0,
            self.top + self.height() / 2.0,
        )
    }

    /// Euclidean distance between the centers of two rects.
    pub fn center_distance(&self, other: &Rect) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Smallest absolute difference between any pair of corresponding edges.
    ///
    /// This is the "near" metric: two rects are near when some edge of one
    /// sits within a threshold of the matching edge of the other.
    pub fn min_edge_distance(&self, other: &Rect) -> f64 {
        let diffs = [
            (self.left - other.left).abs(),
            (self.right - other.right).abs(),
            (self.top - other.top).abs(),
            (self.bottom - other.bottom).abs(),
            (self.left - other.right).abs(),
            (self.right - other.left).abs(),
            (self.top - other.bottom).abs(),
            (self.bottom - other.top).abs(),
        ];
        diffs.iter().cloned().fold(f64::INFINITY, f64::min)
    }
}

/// Everything that can go wrong between a verb call and the browser.
#[derive(Debug, Error)]
pub enum PagehandError {
    #[error("browser is not initialized, launch it before issuing actions")]
    NotInitialized,

    #[error("navigation did not settle within {timeout_ms} ms; consider increasing the timeout")]
    NavigationTimeout { timeout_ms: u64 },

    #[error("Navigation to url {url} failed. REASON: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("element not found for selector {selector}")]
    ElementNotFound { selector: String },

    #[error("element matching {selector} is covered by other element")]
    ElementCovered { selector: String },

    #[error("{count} elements matched {selector}. Please provide a better selector, too many matches.")]
    TooManyMatches { selector: String, count: usize },

    #[error("{0}")]
    InvalidOperation(String),

    #[error("cdp method {method} failed: {message}")]
    Wire { method: String, message: String },

    #[error("file not found at {path}")]
    FileNotFound { path: String },

    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("{0}")]
    Internal(String),
}

impl PagehandError {
    pub fn wire(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Wire {
            method: method.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

pub type Result<T> = std::result::Result<T, PagehandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_equality_is_by_id() {
        let a = TargetDescriptor {
            id: TargetId("t1".into()),
            kind: "page".into(),
            url: "http://a.example".into(),
            title: "A".into(),
        };
        let b = TargetDescriptor {
            id: TargetId("t1".into()),
            kind: "page".into(),
            url: "http://b.example".into(),
            title: "B".into(),
        };
        assert_eq!(a, b);
    }

    #[test]
    fn rect_from_quad_takes_extremes() {
        let quad = [10.0, 20.0, 110.0, 20.0, 110.0, 60.0, 10.0, 60.0];
        let rect = Rect::from_quad(&quad).unwrap();
        assert_eq!(rect, Rect::new(10.0, 20.0, 110.0, 60.0));
        assert_eq!(rect.center(), (60.0, 40.0));
    }

    #[test]
    fn rect_from_short_quad_is_none() {
        assert!(Rect::from_quad(&[1.0, 2.0]).is_none());
    }

    #[test]
    fn min_edge_distance_counts_opposing_edges() {
        // Two boxes 20px apart horizontally.
        let a = Rect::new(0.0, 0.0, 100.0, 50.0);
        let b = Rect::new(120.0, 0.0, 220.0, 50.0);
        assert_eq!(a.min_edge_distance(&b), 20.0);
    }

    #[test]
    fn error_messages_name_the_selector() {
        let err = PagehandError::ElementNotFound {
            selector: "button with label \"Submit\"".into(),
        };
        assert!(err.to_string().contains("button with label \"Submit\""));

        let err = PagehandError::TooManyMatches {
            selector: "link".into(),
            count: 42,
        };
        assert!(err.to_string().contains("better selector"));
    }
}
