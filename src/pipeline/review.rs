//! Candidate ranking, eager cropping and the second-opinion review.
//!
//! All admitted candidates from every searched page are merged here:
//!
//! 1. Sort by raw confidence, highest first (page order breaks ties).
//! 2. Keep the top `review_top_k`.
//! 3. Crop each one in parallel on the blocking pool. Candidates below
//!    `review_margin_below` confidence get an extra normalized margin.
//! 4. With two or more crops, ask the oracle which one answers the
//!    question. An in-range `best_index` wins and carries the review's
//!    score, confidence and rationale.
//! 5. Otherwise the highest-confidence crop wins, unannotated.
//!
//! Losing crops are discarded so only the winner's artifact survives.

use crate::error::{CropError, FigureError, OracleError};
use crate::oracle::VisualOracle;
use crate::output::{ExtractedFigure, ReviewVerdict};
use crate::pipeline::crop::CropArtifact;
use crate::pipeline::response::parse_review;
use crate::progress::ProgressCallback;
use crate::region::{CandidateRegion, CorrectedBox, NormalizedBox};
use crate::store::ArtifactRef;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Produces review-grade crops for candidates. Called on the blocking pool.
pub trait CandidateCropper: Send + Sync {
    fn crop(&self, candidate: &CandidateRegion, bbox: &NormalizedBox) -> Result<CropArtifact, CropError>;

    /// Remove a crop that lost the review. Failures are logged, not raised.
    fn discard(&self, artifact: &ArtifactRef);
}

/// A candidate that passed the gate, with its corrected box and score.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: CandidateRegion,
    pub bbox: CorrectedBox,
    pub composite_score: f64,
}

/// Knobs for [`CandidateRanker`].
#[derive(Debug, Clone)]
pub struct RankSettings {
    pub top_k: usize,
    pub review_enabled: bool,
    pub review_timeout: Duration,
    pub review_margin: f64,
    pub review_margin_below: f64,
}

/// What ranking produced.
#[derive(Debug, Clone, Default)]
pub struct RankOutcome {
    pub figure: Option<ExtractedFigure>,
    pub cropped: usize,
    /// True when a review call was issued, whatever its result.
    pub reviewed: bool,
    /// One [`FigureError::CropIo`] per candidate that could not be cropped.
    pub errors: Vec<FigureError>,
}

struct Cropped {
    scored: ScoredCandidate,
    artifact: CropArtifact,
}

pub struct CandidateRanker {
    oracle: Arc<dyn VisualOracle>,
    cropper: Arc<dyn CandidateCropper>,
    settings: RankSettings,
    progress: Option<ProgressCallback>,
}

impl CandidateRanker {
    pub fn new(
        oracle: Arc<dyn VisualOracle>,
        cropper: Arc<dyn CandidateCropper>,
        settings: RankSettings,
        progress: Option<ProgressCallback>,
    ) -> Self {
        Self {
            oracle,
            cropper,
            settings,
            progress,
        }
    }

    /// Pick the single best figure among `candidates`, or none.
    pub async fn rank_and_select(
        &self,
        document_id: &str,
        mut candidates: Vec<ScoredCandidate>,
        query: &str,
    ) -> RankOutcome {
        if candidates.is_empty() {
            return RankOutcome::default();
        }

        candidates.sort_by(|a, b| {
            b.candidate
                .confidence
                .total_cmp(&a.candidate.confidence)
                .then(a.candidate.page_number.cmp(&b.candidate.page_number))
        });
        candidates.truncate(self.settings.top_k.max(1));

        let (crops, errors) = self.crop_all(candidates).await;
        let mut outcome = RankOutcome {
            cropped: crops.len(),
            errors,
            ..Default::default()
        };
        if crops.is_empty() {
            warn!("No candidate could be cropped");
            return outcome;
        }

        let (winner, verdict, inconclusive) = if self.settings.review_enabled && crops.len() >= 2 {
            outcome.reviewed = true;
            match self.review(&crops, query).await {
                Ok(v) if v.best_index < crops.len() => (v.best_index, Some(v), None),
                Ok(v) => (
                    0,
                    None,
                    Some(format!(
                        "best_index {} out of range for {} crops",
                        v.best_index,
                        crops.len()
                    )),
                ),
                Err(detail) => (0, None, Some(detail)),
            }
        } else {
            (0, None, None)
        };

        let mut selected = None;
        for (i, c) in crops.into_iter().enumerate() {
            if i == winner {
                selected = Some(c);
            } else {
                self.cropper.discard(&c.artifact.artifact_ref);
            }
        }
        let Some(Cropped { scored, artifact }) = selected else {
            return outcome;
        };

        let mut warnings = artifact.warnings;
        if let Some(detail) = inconclusive {
            warn!("Review inconclusive, keeping highest-confidence crop: {}", detail);
            warnings.push(FigureError::ReviewInconclusive { detail });
        }
        if let Some(v) = &verdict {
            info!(
                "Review picked crop {} (page {}, confidence {:.2})",
                winner, scored.candidate.page_number, v.confidence
            );
        }

        outcome.figure = Some(ExtractedFigure {
            document_id: document_id.to_string(),
            page_number: scored.candidate.page_number,
            bbox: scored.bbox,
            pixel_box: artifact.pixel_box,
            artifact_ref: artifact.artifact_ref,
            composite_score: scored.composite_score,
            review_score: verdict
                .as_ref()
                .and_then(|v| v.per_candidate_scores.get(winner).copied().flatten()),
            review_confidence: verdict.as_ref().map(|v| v.confidence),
            review_rationale: verdict.map(|v| v.rationale),
            source_candidate: scored.candidate,
            warnings,
        });
        outcome
    }

    /// Crop every candidate concurrently. Failures come back as errors
    /// alongside the crops that succeeded.
    async fn crop_all(&self, candidates: Vec<ScoredCandidate>) -> (Vec<Cropped>, Vec<FigureError>) {
        let tasks = candidates.into_iter().map(|scored| {
            let cropper = Arc::clone(&self.cropper);
            let bbox = if scored.candidate.confidence < self.settings.review_margin_below {
                scored.bbox.expanded(self.settings.review_margin)
            } else {
                scored.bbox.into_inner()
            };
            async move {
                let page = scored.candidate.page_number;
                let result = tokio::task::spawn_blocking({
                    let candidate = scored.candidate.clone();
                    move || cropper.crop(&candidate, &bbox)
                })
                .await;
                let detail = match result {
                    Ok(Ok(artifact)) => return Ok(Cropped { scored, artifact }),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => format!("crop task panicked: {e}"),
                };
                let err = FigureError::CropIo { page, detail };
                warn!("{}", err);
                Err(err)
            }
        });

        let mut crops = Vec::new();
        let mut errors = Vec::new();
        for result in futures::future::join_all(tasks).await {
            match result {
                Ok(c) => crops.push(c),
                Err(e) => errors.push(e),
            }
        }
        (crops, errors)
    }

    async fn review(&self, crops: &[Cropped], query: &str) -> Result<ReviewVerdict, String> {
        if let Some(cb) = &self.progress {
            cb.on_review_start(crops.len());
        }
        let images: Vec<DynamicImage> = crops.iter().map(|c| c.artifact.image.clone()).collect();
        debug!("Reviewing {} crops for '{}'", images.len(), query);

        let call = self.oracle.review_candidates(&images, query);
        let reply = match tokio::time::timeout(self.settings.review_timeout, call).await {
            Ok(Ok(text)) => text,
            Ok(Err(OracleError::Timeout { elapsed_ms })) => {
                return Err(format!("review timed out after {}ms", elapsed_ms))
            }
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) => {
                return Err(format!(
                    "review timed out after {}ms",
                    self.settings.review_timeout.as_millis()
                ))
            }
        };
        parse_review(&reply, crops.len()).map_err(|e| e.to_string())
    }
}
