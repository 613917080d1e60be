//! Semantic element lookup.
//!
//! A [`Selector`] describes what the user means ("the button labelled
//! Submit, to the right of Bob"); [`resolve`] turns it into visible node
//! ids through whatever implements [`DomPort`]. Relative constraints are
//! ranked by planar distance, so the winner is the candidate nearest its
//! anchor that satisfies every predicate.

pub mod element;
pub mod relative;
pub mod resolve;
pub mod selector;

pub use element::Element;
pub use relative::{RelativeConstraint, RelativeKind, NEAR_THRESHOLD_PX};
pub use resolve::{resolve, resolve_polling, DomPort, ResolveOptions, RETRY_INTERVAL, RETRY_TIMEOUT};
pub use selector::{ElementKind, Query, Selector};
