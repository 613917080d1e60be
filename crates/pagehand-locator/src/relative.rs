//! Spatial constraints between a candidate and an anchor.

use serde::{Deserialize, Serialize};

use pagehand_core::Rect;

use crate::selector::Selector;

/// Edge proximity threshold for [`RelativeKind::Near`], in pixels.
pub const NEAR_THRESHOLD_PX: f64 = 30.0;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RelativeKind {
    LeftOf,
    RightOf,
    Above,
    Below,
    Near,
}

impl RelativeKind {
    /// Whether `candidate` satisfies this constraint against `anchor`.
    pub fn accepts(&self, candidate: &Rect, anchor: &Rect) -> bool {
        match self {
            RelativeKind::LeftOf => candidate.left < anchor.left,
            RelativeKind::RightOf => candidate.right > anchor.right,
            RelativeKind::Above => candidate.top < anchor.top,
            RelativeKind::Below => candidate.bottom > anchor.bottom,
            RelativeKind::Near => candidate.min_edge_distance(anchor) <= NEAR_THRESHOLD_PX,
        }
    }

    /// Planar distance used for ranking accepted candidates.
    pub fn distance(&self, candidate: &Rect, anchor: &Rect) -> f64 {
        candidate.center_distance(anchor)
    }

    fn preposition(&self) -> &'static str {
        match self {
            RelativeKind::LeftOf => "to left of",
            RelativeKind::RightOf => "to right of",
            RelativeKind::Above => "above",
            RelativeKind::Below => "below",
            RelativeKind::Near => "near",
        }
    }
}

/// One relative constraint: a kind plus the anchor it refers to.
#[derive(Clone, Debug, PartialEq)]
pub struct RelativeConstraint {
    pub kind: RelativeKind,
    pub anchor: Box<Selector>,
}

impl RelativeConstraint {
    pub fn new(kind: RelativeKind, anchor: Selector) -> Self {
        Self {
            kind,
            anchor: Box::new(anchor),
        }
    }

    pub fn description(&self) -> String {
        format!("{} {}", self.kind.preposition(), self.anchor.description())
    }

    /// Score a candidate against a set of anchor rectangles.
    ///
    /// The predicate must hold against at least one anchor rect; the score
    /// is the distance to the nearest accepting anchor. `None` means
    /// rejected.
    pub fn score(&self, candidate: &Rect, anchors: &[Rect]) -> Option<f64> {
        anchors
            .iter()
            .filter(|anchor| self.kind.accepts(candidate, anchor))
            .map(|anchor| self.kind.distance(candidate, anchor))
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(left: f64, top: f64, right: f64, bottom: f64) -> Rect {
        Rect::new(left, top, right, bottom)
    }

    #[test]
    fn left_of_accepts_iff_candidate_left_is_smaller() {
        let anchor = rect(100.0, 0.0, 200.0, 20.0);
        assert!(RelativeKind::LeftOf.accepts(&rect(0.0, 0.0, 90.0, 20.0), &anchor));
        assert!(!RelativeKind::LeftOf.accepts(&rect(100.0, 0.0, 150.0, 20.0), &anchor));
        assert!(!RelativeKind::LeftOf.accepts(&rect(150.0, 0.0, 250.0, 20.0), &anchor));
    }

    #[test]
    fn right_above_below_mirror_the_left_rule() {
        let anchor = rect(100.0, 100.0, 200.0, 200.0);
        assert!(RelativeKind::RightOf.accepts(&rect(150.0, 100.0, 260.0, 200.0), &anchor));
        assert!(!RelativeKind::RightOf.accepts(&rect(50.0, 100.0, 200.0, 200.0), &anchor));
        assert!(RelativeKind::Above.accepts(&rect(100.0, 10.0, 200.0, 90.0), &anchor));
        assert!(!RelativeKind::Above.accepts(&rect(100.0, 100.0, 200.0, 150.0), &anchor));
        assert!(RelativeKind::Below.accepts(&rect(100.0, 150.0, 200.0, 260.0), &anchor));
        assert!(!RelativeKind::Below.accepts(&rect(100.0, 100.0, 200.0, 200.0), &anchor));
    }

    #[test]
    fn near_accepts_within_thirty_pixels() {
        let anchor = rect(100.0, 100.0, 200.0, 130.0);
        // 20px to the right of the anchor's right edge.
        assert!(RelativeKind::Near.accepts(&rect(220.0, 100.0, 300.0, 130.0), &anchor));
        // 31px away: too far.
        assert!(!RelativeKind::Near.accepts(&rect(231.0, 231.0, 300.0, 300.0), &anchor));
    }

    #[test]
    fn score_is_distance_to_nearest_accepting_anchor() {
        let constraint = RelativeConstraint::new(
            RelativeKind::RightOf,
            Selector::contains("Bob"),
        );
        let candidate = rect(300.0, 0.0, 340.0, 20.0);
        let anchors = vec![
            rect(0.0, 0.0, 40.0, 20.0),
            rect(200.0, 0.0, 240.0, 20.0),
        ];
        let score = constraint.score(&candidate, &anchors).unwrap();
        // Nearest accepting anchor is the second one, 100px away.
        assert_eq!(score, 100.0);
    }

    #[test]
    fn score_rejects_when_no_anchor_accepts() {
        let constraint = RelativeConstraint::new(
            RelativeKind::LeftOf,
            Selector::contains("Bob"),
        );
        let candidate = rect(300.0, 0.0, 340.0, 20.0);
        let anchors = vec![rect(0.0, 0.0, 40.0, 20.0)];
        assert!(constraint.score(&candidate, &anchors).is_none());
    }
}
