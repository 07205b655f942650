//! Result types produced by a figure-locating query.

use crate::error::FigureError;
use crate::region::{CandidateRegion, CorrectedBox, ElementKind, PixelBox};
use crate::store::ArtifactRef;
use serde::{Deserialize, Serialize};

/// A structured reading of what visual element a question refers to.
///
/// Derived once per question by [`crate::pipeline::intent::extract`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceIntent {
    pub has_reference: bool,
    pub number: Option<u32>,
    pub kind: ElementKind,
    pub free_text: Option<String>,
}

impl ReferenceIntent {
    /// True when the question names a number or carries a description,
    /// which lowers the gate threshold and makes `matches_query` binding.
    pub fn is_specific(&self) -> bool {
        self.number.is_some() || self.free_text.is_some()
    }

    /// Query text sent to the oracle, or `None` to enumerate every element.
    pub fn query_text(&self) -> Option<String> {
        match (self.number, &self.free_text) {
            (Some(n), _) => Some(format!("{} {}", self.kind.label(), n)),
            (None, Some(text)) => Some(text.clone()),
            (None, None) => None,
        }
    }
}

/// The oracle's second-opinion ranking over a batch of crops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub reviewed_count: usize,
    /// Score in `[0, 10]` by batch index; `None` where the reply had no
    /// usable number. May be shorter than the batch.
    pub per_candidate_scores: Vec<Option<f64>>,
    pub best_index: usize,
    pub confidence: f64,
    pub rationale: String,
}

/// The durable crop artifact returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFigure {
    pub document_id: String,
    /// 1-indexed page number.
    pub page_number: usize,
    #[serde(rename = "box")]
    pub bbox: CorrectedBox,
    pub pixel_box: PixelBox,
    pub artifact_ref: ArtifactRef,
    pub source_candidate: CandidateRegion,
    /// Composite gate score of the source candidate.
    pub composite_score: f64,
    /// Review score `[0, 10]` for this crop when review selected it.
    pub review_score: Option<f64>,
    pub review_confidence: Option<f64>,
    pub review_rationale: Option<String>,
    /// Non-fatal quality warnings raised while cropping.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<FigureError>,
}

/// Outcome of one page-detection call.
///
/// Always produced, never propagated as an error: a failed page carries an
/// empty candidate list and `error` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageDetection {
    /// 1-indexed page number.
    pub page_number: usize,
    pub candidates: Vec<CandidateRegion>,
    pub duration_ms: u64,
    pub error: Option<FigureError>,
}

impl PageDetection {
    pub fn failed(page_number: usize, error: FigureError, duration_ms: u64) -> Self {
        Self {
            page_number,
            candidates: Vec::new(),
            duration_ms,
            error: Some(error),
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-query lifecycle.
///
/// ```text
/// Searching ─▶ CandidatesFound ─▶ Reviewing ─▶ Resolved
///     └──────▶ NoCandidates ──────────────────▶ Resolved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchState {
    Searching,
    CandidatesFound,
    NoCandidates,
    Reviewing,
    Resolved,
}

impl SearchState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: SearchState) -> bool {
        use SearchState::*;
        matches!(
            (self, next),
            (Searching, CandidatesFound)
                | (Searching, NoCandidates)
                | (CandidatesFound, Reviewing)
                | (CandidatesFound, Resolved)
                | (Reviewing, Resolved)
                | (NoCandidates, Resolved)
        )
    }
}

/// Query-level statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocateStats {
    pub pages_searched: usize,
    pub pages_failed: usize,
    pub candidates_passed: usize,
    pub candidates_cropped: usize,
    pub reviewed: bool,
    /// The query was cancelled after detection; nothing was cropped.
    pub cancelled: bool,
    pub total_duration_ms: u64,
    pub detection_duration_ms: u64,
}

/// What [`crate::locate::FigureLocator::locate_and_extract`] returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocateOutput {
    pub figures: Vec<ExtractedFigure>,
    /// Raw candidates returned by the oracle across all searched pages.
    pub candidates_considered: usize,
    pub intent: ReferenceIntent,
    pub pages: Vec<PageDetection>,
    /// Query-level failures: crops that could not be written, or
    /// [`FigureError::NoCandidates`] when the gate admitted nothing.
    /// Per-page detection failures stay on their [`PageDetection`].
    pub errors: Vec<FigureError>,
    pub stats: LocateStats,
}

impl LocateOutput {
    pub(crate) fn empty(intent: ReferenceIntent) -> Self {
        Self {
            figures: Vec::new(),
            candidates_considered: 0,
            intent,
            pages: Vec::new(),
            errors: Vec::new(),
            stats: LocateStats::default(),
        }
    }
}
