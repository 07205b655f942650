//! Query entry points: question in, cropped figures out.
//!
//! [`FigureLocator::locate_and_extract`] runs the whole pipeline for one
//! question against one document:
//!
//! ```text
//! question ─▶ intent ─▶ page set ─▶ detect (parallel) ─▶ gate + correct
//!                                                            │
//!                       ExtractedFigure ◀─ crop ◀─ rank + review
//! ```
//!
//! Only caller mistakes are fatal (bad document id, unknown document,
//! unconfigured provider). Everything the oracle or the pixel pipeline does
//! wrong degrades to fewer candidates, and the worst outcome is an empty
//! `figures` list.

use crate::config::LocatorConfig;
use crate::error::{CropError, FigureError, LocateError};
use crate::oracle::VisualOracle;
use crate::output::{LocateOutput, LocateStats, PageDetection, ReferenceIntent, SearchState};
use crate::pipeline::crop::{CropArtifact, CropExtractor};
use crate::pipeline::geometry::{GeometryCorrector, QualityGate};
use crate::pipeline::llm::VlmOracle;
use crate::pipeline::pages::{self, LeadingPages, RelevanceSelector};
use crate::pipeline::review::{CandidateCropper, CandidateRanker, RankSettings, ScoredCandidate};
use crate::pipeline::intent;
use crate::region::{CandidateRegion, NormalizedBox};
use crate::store::{is_valid_segment, ArtifactRef, DirectoryPageStore, FigureStore, PageSource};
use crate::stream::{detect_stream, SearchCancel};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Locates figures and tables in one collection of documents.
///
/// Cheap to share behind an `Arc`; queries hold no mutable state.
pub struct FigureLocator {
    config: LocatorConfig,
    oracle: Arc<dyn VisualOracle>,
    pages: Arc<dyn PageSource>,
    store: FigureStore,
    relevance: Arc<dyn RelevanceSelector>,
}

impl FigureLocator {
    /// Assemble a locator from explicit parts.
    pub fn new(
        config: LocatorConfig,
        oracle: Arc<dyn VisualOracle>,
        pages: Arc<dyn PageSource>,
        store: FigureStore,
    ) -> Self {
        let relevance = Arc::new(LeadingPages {
            max_pages: config.relevance_max_pages,
        });
        Self {
            config,
            oracle,
            pages,
            store,
            relevance,
        }
    }

    /// Locator over `<data_dir>` with a VLM oracle resolved from `config`.
    ///
    /// # Errors
    /// [`LocateError::ProviderNotConfigured`] when no provider can be built.
    pub fn from_config(config: LocatorConfig, data_dir: impl AsRef<Path>) -> Result<Self, LocateError> {
        let provider = resolve_provider(&config)?;
        let oracle = Arc::new(VlmOracle::new(provider, config.temperature, config.max_tokens));
        let data_dir = data_dir.as_ref();
        Ok(Self::new(
            config,
            oracle,
            Arc::new(DirectoryPageStore::new(data_dir)),
            FigureStore::new(data_dir),
        ))
    }

    /// Replace the fallback page selector used for non-reference questions.
    pub fn with_relevance(mut self, relevance: Arc<dyn RelevanceSelector>) -> Self {
        self.relevance = relevance;
        self
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    pub fn store(&self) -> &FigureStore {
        &self.store
    }

    /// Read the PNG bytes of an extracted figure.
    pub fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, LocateError> {
        self.store.fetch(artifact)
    }

    /// Remove every figure extracted from a document.
    pub fn delete_document_figures(&self, document_id: &str) -> Result<usize, LocateError> {
        self.store.delete_document(document_id)
    }

    /// Find and crop the figure or table `question` refers to.
    ///
    /// Non-reference questions search the pages chosen by the relevance
    /// selector (or nothing at all when `require_reference` is set).
    ///
    /// # Errors
    /// [`LocateError::InvalidDocumentId`] or [`LocateError::DocumentNotFound`].
    /// Oracle and crop failures never surface here.
    pub async fn locate_and_extract(
        &self,
        document_id: &str,
        question: &str,
    ) -> Result<LocateOutput, LocateError> {
        self.locate_and_extract_with(document_id, question, None, &SearchCancel::new())
            .await
    }

    /// [`Self::locate_and_extract`] with the retrieval layer's relevant pages
    /// and a cancellation handle.
    ///
    /// Cancelling stops new page calls. If the flag is set by the time
    /// detection finishes, nothing is cropped or reviewed and the partial
    /// output comes back with `stats.cancelled` set.
    pub async fn locate_and_extract_with(
        &self,
        document_id: &str,
        question: &str,
        relevant_pages: Option<&[usize]>,
        cancel: &SearchCancel,
    ) -> Result<LocateOutput, LocateError> {
        let total_start = Instant::now();
        if !is_valid_segment(document_id) {
            return Err(LocateError::InvalidDocumentId {
                document_id: document_id.to_string(),
            });
        }
        let total_pages = self
            .pages
            .page_count(document_id)
            .ok_or_else(|| LocateError::DocumentNotFound {
                document_id: document_id.to_string(),
            })?;

        let intent = intent::extract(question);
        info!(
            "Locating in {} ({} pages): reference={} number={:?} kind={}",
            document_id, total_pages, intent.has_reference, intent.number, intent.kind
        );

        if !intent.has_reference && self.config.require_reference {
            debug!("Question names no visual element, nothing to search");
            return Ok(LocateOutput::empty(intent));
        }

        let relevant = match relevant_pages {
            Some(p) => p.to_vec(),
            None if intent.has_reference => Vec::new(),
            None => self.relevance.relevant_pages(document_id, question, total_pages),
        };
        let page_numbers = pages::select(&intent, total_pages, &relevant);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_search_start(page_numbers.len());
        }

        // ── Detection ────────────────────────────────────────────────────
        let mut state = SearchState::Searching;
        let detect_start = Instant::now();
        let mut detections: Vec<PageDetection> = detect_stream(
            Arc::clone(&self.oracle),
            Arc::clone(&self.pages),
            document_id,
            page_numbers,
            intent.query_text(),
            &self.config,
            cancel,
        )
        .collect()
        .await;
        detections.sort_by_key(|d| d.page_number);
        let detection_duration_ms = detect_start.elapsed().as_millis() as u64;

        let candidates_considered: usize = detections.iter().map(|d| d.candidates.len()).sum();
        let mut stats = LocateStats {
            pages_searched: detections.len(),
            pages_failed: detections
                .iter()
                .filter(|d| d.error.as_ref().is_some_and(FigureError::skips_page))
                .count(),
            detection_duration_ms,
            ..Default::default()
        };

        // ── Gate and correction ──────────────────────────────────────────
        let scored = self.admit(&detections, &intent);
        stats.candidates_passed = scored.len();
        info!(
            "{} of {} candidates passed the quality gate ({} pages failed)",
            scored.len(),
            candidates_considered,
            stats.pages_failed
        );

        // ── Ranking, review, crop ────────────────────────────────────────
        let mut figures = Vec::new();
        let mut errors = Vec::new();
        if cancel.is_cancelled() {
            info!("Query cancelled after detection, {} candidates left uncropped", scored.len());
            stats.cancelled = true;
        } else if scored.is_empty() {
            advance(&mut state, SearchState::NoCandidates);
            errors.push(FigureError::NoCandidates);
        } else {
            advance(&mut state, SearchState::CandidatesFound);
            let outcome = self
                .ranker(document_id)
                .rank_and_select(document_id, scored, review_query(question, &intent).as_str())
                .await;
            if outcome.reviewed {
                advance(&mut state, SearchState::Reviewing);
            }
            stats.candidates_cropped = outcome.cropped;
            stats.reviewed = outcome.reviewed;
            figures.extend(outcome.figure);
            errors.extend(outcome.errors);
        }
        if !stats.cancelled {
            advance(&mut state, SearchState::Resolved);
        }

        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        match figures.first() {
            Some(f) => info!(
                "Extracted figure from page {} → {} in {}ms",
                f.page_number, f.artifact_ref, stats.total_duration_ms
            ),
            None => info!("No matching figure found in {}ms", stats.total_duration_ms),
        }
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_search_complete(candidates_considered, figures.len());
        }

        Ok(LocateOutput {
            figures,
            candidates_considered,
            intent,
            pages: detections,
            errors,
            stats,
        })
    }

    /// Gate every detected candidate and correct the survivors.
    fn admit(&self, detections: &[PageDetection], intent: &ReferenceIntent) -> Vec<ScoredCandidate> {
        let gate = QualityGate::new(self.config.params.quality.clone());
        let corrector = GeometryCorrector::new(self.config.params.geometry.clone());
        detections
            .iter()
            .flat_map(|d| d.candidates.iter())
            .filter_map(|c| {
                let decision = gate.admit(c, intent);
                decision.pass.then(|| ScoredCandidate {
                    candidate: c.clone(),
                    bbox: corrector.correct(c.bbox),
                    composite_score: decision.score,
                })
            })
            .collect()
    }

    fn ranker(&self, document_id: &str) -> CandidateRanker {
        let crop = &self.config.params.crop;
        let cropper = Arc::new(StoreCropper {
            pages: Arc::clone(&self.pages),
            store: self.store.clone(),
            extractor: CropExtractor::new(crop.clone()),
            document_id: document_id.to_string(),
        });
        CandidateRanker::new(
            Arc::clone(&self.oracle),
            cropper,
            RankSettings {
                top_k: self.config.review_top_k,
                review_enabled: self.config.review_enabled,
                review_timeout: Duration::from_millis(self.config.review_timeout_ms),
                review_margin: crop.review_margin,
                review_margin_below: crop.review_margin_below,
            },
            self.config.progress_callback.clone(),
        )
    }
}

fn advance(state: &mut SearchState, next: SearchState) {
    debug_assert!(state.can_advance_to(next), "{:?} -> {:?}", state, next);
    debug!("Search state {:?} -> {:?}", state, next);
    *state = next;
}

/// Text shown to the reviewer: the user's own words when present.
fn review_query(question: &str, intent: &ReferenceIntent) -> String {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        intent.query_text().unwrap_or_default()
    } else {
        trimmed.to_string()
    }
}

/// Crops candidates from the page store into the figure store.
struct StoreCropper {
    pages: Arc<dyn PageSource>,
    store: FigureStore,
    extractor: CropExtractor,
    document_id: String,
}

impl CandidateCropper for StoreCropper {
    fn crop(&self, candidate: &CandidateRegion, bbox: &NormalizedBox) -> Result<CropArtifact, CropError> {
        let page = candidate.page_number;
        let path = self
            .pages
            .page_image(&self.document_id, page)
            .ok_or_else(|| CropError::SourceMissing {
                path: PathBuf::from(format!("{}/page_{}", self.document_id, page)),
            })?;
        self.extractor.extract(
            &self.store,
            &self.document_id,
            page,
            &path,
            bbox,
            &candidate.artifact_stem(),
        )
    }

    fn discard(&self, artifact: &ArtifactRef) {
        if let Err(e) = self.store.discard(artifact) {
            warn!("Could not discard {}: {}", artifact, e);
        }
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, LocateError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        LocateError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the API key comes
///    from the provider's usual environment variable.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
fn resolve_provider(config: &LocatorConfig) -> Result<Arc<dyn LLMProvider>, LocateError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| LocateError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
