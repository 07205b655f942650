//! Quality gate and geometry correction for detected regions.
//!
//! The oracle's boxes are estimates in percent of the page. Two things are
//! done with them before any pixel is cut:
//!
//! 1. [`QualityGate`] scores each candidate from its confidence, boundary
//!    quality and completeness signals, and rejects those below threshold.
//! 2. [`GeometryCorrector`] clamps surviving boxes into the page and pads
//!    them where detections are known to be too tight (small regions,
//!    captions below the visual, the top pixel row).
//!
//! Correction returns a [`CorrectedBox`]. Correcting a `CorrectedBox` again
//! is the identity, so re-running correction never drifts a box.

use crate::config::{GeometryParams, QualityParams};
use crate::output::ReferenceIntent;
use crate::region::{
    BoundaryQuality, CandidateRegion, CompletenessSignals, CorrectedBox, ElementKind, NormalizedBox,
};
use tracing::debug;

/// Outcome of the quality gate for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub pass: bool,
    /// Composite score; `0.0` when rejected before scoring.
    pub score: f64,
    pub reason: String,
}

impl GateDecision {
    fn reject(score: f64, reason: impl Into<String>) -> Self {
        Self {
            pass: false,
            score,
            reason: reason.into(),
        }
    }
}

/// Composite-score gate run on every candidate before correction.
#[derive(Debug, Clone)]
pub struct QualityGate {
    params: QualityParams,
}

impl QualityGate {
    pub fn new(params: QualityParams) -> Self {
        Self { params }
    }

    fn quality_score(&self, quality: Option<BoundaryQuality>) -> f64 {
        let s = &self.params.boundary_scores;
        match quality.unwrap_or(BoundaryQuality::Fair) {
            BoundaryQuality::Excellent => s.excellent,
            BoundaryQuality::Good => s.good,
            BoundaryQuality::Fair => s.fair,
            BoundaryQuality::Poor => s.poor,
        }
    }

    /// `confidence·Wc + quality·Wq + bonus` with kind-specific weights.
    pub fn composite_score(
        &self,
        confidence: f64,
        boundary_quality: Option<BoundaryQuality>,
        completeness: Option<&CompletenessSignals>,
        kind: ElementKind,
    ) -> f64 {
        let p = &self.params;
        let has_title = completeness.is_some_and(|c| c.has_title);
        let has_color = completeness.is_some_and(|c| c.has_color);
        let (wc, wq, bonus) = match kind {
            ElementKind::Table => (
                p.table_confidence_weight,
                p.table_quality_weight,
                if has_title { p.completeness_bonus } else { 0.0 },
            ),
            ElementKind::Figure | ElementKind::Unspecified => (
                p.figure_confidence_weight,
                p.figure_quality_weight,
                if has_title && has_color {
                    p.completeness_bonus
                } else {
                    0.0
                },
            ),
        };
        confidence * wc + self.quality_score(boundary_quality) * wq + bonus
    }

    /// Decide whether a candidate is trustworthy enough to crop.
    pub fn should_process(
        &self,
        confidence: f64,
        boundary_quality: Option<BoundaryQuality>,
        completeness: Option<&CompletenessSignals>,
        kind: ElementKind,
        has_specific_query: bool,
    ) -> GateDecision {
        let p = &self.params;
        if confidence < p.min_confidence {
            return GateDecision::reject(
                0.0,
                format!("confidence {:.2} below floor {:.2}", confidence, p.min_confidence),
            );
        }
        let score = self.composite_score(confidence, boundary_quality, completeness, kind);
        let threshold = if has_specific_query {
            p.specific_threshold
        } else {
            p.generic_threshold
        };
        if score >= threshold {
            GateDecision {
                pass: true,
                score,
                reason: format!("score {:.3} >= {:.2}", score, threshold),
            }
        } else {
            GateDecision::reject(score, format!("score {:.3} below {:.2}", score, threshold))
        }
    }

    /// Full admission check: relevance under a specific query, then scoring.
    pub fn admit(&self, candidate: &CandidateRegion, intent: &ReferenceIntent) -> GateDecision {
        let specific = intent.is_specific();
        if specific && !candidate.matches_query {
            return GateDecision::reject(0.0, "does not match the query");
        }
        let decision = self.should_process(
            candidate.confidence,
            candidate.boundary_quality,
            candidate.completeness.as_ref(),
            candidate.kind(),
            specific,
        );
        debug!(
            "Page {} {}: {} ({})",
            candidate.page_number,
            candidate.element_id,
            if decision.pass { "admitted" } else { "rejected" },
            decision.reason
        );
        decision
    }
}

/// A box that geometry correction accepts.
///
/// Raw boxes run through every correction step; already-corrected boxes
/// pass through unchanged.
pub trait Correctable {
    fn into_corrected(self, corrector: &GeometryCorrector) -> CorrectedBox;
}

impl Correctable for NormalizedBox {
    fn into_corrected(self, corrector: &GeometryCorrector) -> CorrectedBox {
        CorrectedBox::new_unchecked(corrector.apply_steps(self))
    }
}

impl Correctable for CorrectedBox {
    fn into_corrected(self, _corrector: &GeometryCorrector) -> CorrectedBox {
        self
    }
}

/// Clamp-and-pad correction of normalized boxes.
#[derive(Debug, Clone)]
pub struct GeometryCorrector {
    params: GeometryParams,
}

impl GeometryCorrector {
    pub fn new(params: GeometryParams) -> Self {
        Self { params }
    }

    pub fn correct(&self, bbox: impl Correctable) -> CorrectedBox {
        bbox.into_corrected(self)
    }

    fn apply_steps(&self, raw: NormalizedBox) -> NormalizedBox {
        let p = &self.params;
        let finite_or = |v: f64, fallback: f64| if v.is_finite() { v } else { fallback };

        // 1. Origin into [0, max_coordinate].
        let mut x = finite_or(raw.x, 0.0).max(0.0).min(p.max_coordinate);
        let mut y = finite_or(raw.y, 0.0).max(0.0).min(p.max_coordinate);

        // 2. Extent into [min_dimension, min(max_dimension, 1 - origin)].
        let (nx, mut width) = clamp_extent(x, finite_or(raw.width, 0.0), p);
        let (ny, mut height) = clamp_extent(y, finite_or(raw.height, 0.0), p);
        x = nx;
        y = ny;

        // 3. Small regions grow toward the top-left only.
        if width < p.small_region_threshold {
            let grow = p.max_expansion.min(x).min(p.max_dimension - width).max(0.0);
            x -= grow;
            width += grow;
        }
        if height < p.small_region_threshold {
            let grow = p.max_expansion.min(y).min(p.max_dimension - height).max(0.0);
            y -= grow;
            height += grow;
        }

        // 4. Room for a caption below short visuals.
        if height < p.height_threshold && y + height + p.title_margin <= 1.0 {
            height += p.title_margin;
        }

        // 5. Keep the top pixel row.
        if y > p.top_offset_threshold {
            y -= p.top_margin;
            height += p.top_margin;
        }

        NormalizedBox::new(x, y, width, height)
    }
}

/// Clamp one axis. When the origin leaves less than `min_dimension` of room
/// the origin moves back so the floor still fits on the page.
fn clamp_extent(origin: f64, extent: f64, p: &GeometryParams) -> (f64, f64) {
    let origin = origin.min(1.0 - p.min_dimension);
    let ceiling = p.max_dimension.min(1.0 - origin).max(p.min_dimension);
    (origin, extent.max(p.min_dimension).min(ceiling))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FigureParams;

    fn gate() -> QualityGate {
        QualityGate::new(FigureParams::default().quality)
    }

    fn corrector() -> GeometryCorrector {
        GeometryCorrector::new(FigureParams::default().geometry)
    }

    fn signals(has_color: bool, has_title: bool) -> CompletenessSignals {
        CompletenessSignals {
            has_color,
            has_title,
            element_type: None,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn figure_composite_with_bonus() {
        let s = gate().composite_score(
            0.92,
            Some(BoundaryQuality::Good),
            Some(&signals(true, true)),
            ElementKind::Figure,
        );
        assert!(approx(s, 0.892), "got {s}");
    }

    #[test]
    fn table_bonus_needs_only_title() {
        let s = gate().composite_score(
            0.8,
            Some(BoundaryQuality::Excellent),
            Some(&signals(false, true)),
            ElementKind::Table,
        );
        assert!(approx(s, 0.8 * 0.7 + 0.2 + 0.1), "got {s}");
    }

    #[test]
    fn missing_quality_scores_as_fair() {
        let s = gate().composite_score(0.5, None, None, ElementKind::Figure);
        assert!(approx(s, 0.3 + 0.18));
    }

    #[test]
    fn confidence_floor_rejects_regardless_of_score() {
        let d = gate().should_process(
            0.49,
            Some(BoundaryQuality::Excellent),
            Some(&signals(true, true)),
            ElementKind::Figure,
            true,
        );
        assert!(!d.pass);
        assert!(d.reason.contains("floor"));
    }

    #[test]
    fn threshold_depends_on_specificity() {
        // 0.6·0.6 + 0.8·0.3 = 0.60: clears 0.55, not 0.65.
        let g = gate();
        let q = Some(BoundaryQuality::Good);
        assert!(g.should_process(0.6, q, None, ElementKind::Figure, true).pass);
        assert!(!g.should_process(0.6, q, None, ElementKind::Figure, false).pass);
    }

    #[test]
    fn threshold_is_inclusive() {
        let g = gate();
        let s = g.composite_score(0.75, Some(BoundaryQuality::Good), None, ElementKind::Figure);
        let mut params = FigureParams::default().quality;
        params.generic_threshold = s;
        let d = QualityGate::new(params).should_process(
            0.75,
            Some(BoundaryQuality::Good),
            None,
            ElementKind::Figure,
            false,
        );
        assert!(d.pass);
    }

    #[test]
    fn unmatched_candidate_rejected_under_specific_query() {
        let c = CandidateRegion {
            page_number: 1,
            element_id: "f".into(),
            element_type: "figure".into(),
            title: String::new(),
            description: String::new(),
            bbox: NormalizedBox::new(0.1, 0.1, 0.5, 0.5),
            confidence: 0.99,
            matches_query: false,
            boundary_quality: Some(BoundaryQuality::Excellent),
            completeness: None,
        };
        let specific = ReferenceIntent {
            has_reference: true,
            number: Some(1),
            kind: ElementKind::Figure,
            free_text: None,
        };
        assert!(!gate().admit(&c, &specific).pass);

        let generic = ReferenceIntent {
            has_reference: true,
            ..Default::default()
        };
        assert!(gate().admit(&c, &generic).pass);
    }

    #[test]
    fn corrects_large_box_into_page() {
        let b = corrector().correct(NormalizedBox::new(0.97, -0.1, 0.5, 1.4));
        assert!(b.is_within_page(), "{b:?}");
        assert!(b.width >= 0.08 - 1e-12 && b.height >= 0.08 - 1e-12);
        // Pushed back to fit the floor, then padded left by max_expansion.
        assert!(approx(b.x, 0.87));
        assert!(approx(b.right(), 1.0));
    }

    #[test]
    fn small_region_grows_top_left() {
        let raw = NormalizedBox::new(0.5, 0.5, 0.1, 0.3);
        let b = corrector().correct(raw);
        assert!(approx(b.x, 0.45));
        assert!(approx(b.width, 0.15));
        assert!(approx(b.right(), raw.right()));
    }

    #[test]
    fn short_region_gets_caption_and_top_margin() {
        let b = corrector().correct(NormalizedBox::new(0.1, 0.3, 0.5, 0.2));
        // Caption +0.03 below, then top row: y -0.01, height +0.01.
        assert!(approx(b.y, 0.29));
        assert!(approx(b.height, 0.24));
        assert!(approx(b.bottom(), 0.53));
    }

    #[test]
    fn region_at_page_top_keeps_origin() {
        let b = corrector().correct(NormalizedBox::new(0.1, 0.01, 0.5, 0.5));
        assert!(approx(b.y, 0.01));
        assert!(approx(b.height, 0.5));
    }

    #[test]
    fn non_finite_input_is_sanitised() {
        let b = corrector().correct(NormalizedBox::new(f64::NAN, 0.2, f64::INFINITY, 0.3));
        assert!(b.is_within_page(), "{b:?}");
    }

    #[test]
    fn correction_is_idempotent() {
        let c = corrector();
        let raws = [
            NormalizedBox::new(0.1, 0.3, 0.5, 0.2),
            NormalizedBox::new(0.0, 0.0, 0.01, 0.01),
            NormalizedBox::new(0.96, 0.96, 0.5, 0.5),
            NormalizedBox::new(0.2, 0.05, 0.9, 0.95),
        ];
        for raw in raws {
            let once = c.correct(raw);
            let twice = c.correct(once);
            assert_eq!(once, twice);
            assert!(once.is_within_page(), "{raw:?} -> {once:?}");
            assert!(once.width >= 0.08 - 1e-12 && once.height >= 0.08 - 1e-12);
        }
    }
}
