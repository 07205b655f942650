//! Configuration types for figure localisation and extraction.
//!
//! All behaviour is controlled through [`LocatorConfig`], built via its
//! [`LocatorConfigBuilder`]. The empirically tuned constants of the quality
//! gate, the geometry corrector and the crop extractor live in
//! [`FigureParams`] so they can be loaded from JSON and adjusted per
//! deployment without recompiling.

use crate::error::LocateError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Configuration for a figure-locating query.
///
/// # Example
/// ```rust
/// use edgequake_figures::LocatorConfig;
///
/// let config = LocatorConfig::builder()
///     .concurrency(4)
///     .review_top_k(3)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct LocatorConfig {
    /// Maximum concurrent per-page detection calls. Default: 10.
    ///
    /// Detection calls are network-bound and independent. Lower this when the
    /// provider starts answering with `429`.
    pub concurrency: usize,

    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for oracle calls. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the oracle may generate per call. Default: 3000.
    pub max_tokens: usize,

    /// Deadline for one page-detection call, in milliseconds. Default: 120 000.
    pub api_timeout_ms: u64,

    /// Deadline for the review call, in milliseconds. Default: 120 000.
    pub review_timeout_ms: u64,

    /// Ask the oracle to arbitrate between candidates. Default: true.
    ///
    /// When disabled the highest-confidence candidate always wins.
    pub review_enabled: bool,

    /// Number of top candidates cropped and sent to review. Default: 3.
    pub review_top_k: usize,

    /// Skip the search entirely when the question names no visual element. Default: true.
    pub require_reference: bool,

    /// Pages searched by the default relevance selector for
    /// non-reference questions. Default: 3.
    pub relevance_max_pages: usize,

    /// Tuned thresholds and margins.
    pub params: FigureParams,

    /// Per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 3000,
            api_timeout_ms: 120_000,
            review_timeout_ms: 120_000,
            review_enabled: true,
            review_top_k: 3,
            require_reference: true,
            relevance_max_pages: 3,
            params: FigureParams::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for LocatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocatorConfig")
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_ms", &self.api_timeout_ms)
            .field("review_timeout_ms", &self.review_timeout_ms)
            .field("review_enabled", &self.review_enabled)
            .field("review_top_k", &self.review_top_k)
            .field("require_reference", &self.require_reference)
            .field("params", &self.params)
            .finish()
    }
}

impl LocatorConfig {
    /// Create a new builder for `LocatorConfig`.
    pub fn builder() -> LocatorConfigBuilder {
        LocatorConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`LocatorConfig`].
pub struct LocatorConfigBuilder {
    config: LocatorConfig,
}

impl LocatorConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_ms(mut self, ms: u64) -> Self {
        self.config.api_timeout_ms = ms;
        self
    }

    pub fn review_timeout_ms(mut self, ms: u64) -> Self {
        self.config.review_timeout_ms = ms;
        self
    }

    pub fn review_enabled(mut self, v: bool) -> Self {
        self.config.review_enabled = v;
        self
    }

    pub fn review_top_k(mut self, k: usize) -> Self {
        self.config.review_top_k = k;
        self
    }

    pub fn require_reference(mut self, v: bool) -> Self {
        self.config.require_reference = v;
        self
    }

    pub fn relevance_max_pages(mut self, n: usize) -> Self {
        self.config.relevance_max_pages = n.max(1);
        self
    }

    pub fn params(mut self, params: FigureParams) -> Self {
        self.config.params = params;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<LocatorConfig, LocateError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(LocateError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.review_top_k == 0 {
            return Err(LocateError::InvalidConfig("review_top_k must be ≥ 1".into()));
        }
        if c.api_timeout_ms == 0 || c.review_timeout_ms == 0 {
            return Err(LocateError::InvalidConfig(
                "Oracle timeouts must be > 0 ms".into(),
            ));
        }
        c.params.validate()?;
        Ok(self.config)
    }
}

// ── Tuned parameters ─────────────────────────────────────────────────────

/// Every tuned constant of the pipeline, grouped by stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FigureParams {
    pub quality: QualityParams,
    pub geometry: GeometryParams,
    pub crop: CropParams,
}

impl FigureParams {
    /// Load parameters from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, LocateError> {
        let text = std::fs::read_to_string(path).map_err(|e| LocateError::StoreIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        let params: FigureParams = serde_json::from_str(&text)
            .map_err(|e| LocateError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        params.validate()?;
        Ok(params)
    }

    /// Reject values that would break the gate or the page-bound invariants.
    pub fn validate(&self) -> Result<(), LocateError> {
        let unit = |name: &str, v: f64| -> Result<(), LocateError> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(LocateError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {v}"
                )))
            }
        };
        let q = &self.quality;
        unit("quality.figure_confidence_weight", q.figure_confidence_weight)?;
        unit("quality.figure_quality_weight", q.figure_quality_weight)?;
        unit("quality.table_confidence_weight", q.table_confidence_weight)?;
        unit("quality.table_quality_weight", q.table_quality_weight)?;
        unit("quality.completeness_bonus", q.completeness_bonus)?;
        unit("quality.specific_threshold", q.specific_threshold)?;
        unit("quality.generic_threshold", q.generic_threshold)?;
        unit("quality.min_confidence", q.min_confidence)?;

        let g = &self.geometry;
        unit("geometry.max_coordinate", g.max_coordinate)?;
        unit("geometry.min_dimension", g.min_dimension)?;
        unit("geometry.max_dimension", g.max_dimension)?;
        unit("geometry.max_expansion", g.max_expansion)?;
        unit("geometry.title_margin", g.title_margin)?;
        unit("geometry.top_margin", g.top_margin)?;
        if g.min_dimension <= 0.0 || g.min_dimension > g.max_dimension {
            return Err(LocateError::InvalidConfig(format!(
                "geometry.min_dimension ({}) must be > 0 and ≤ max_dimension ({})",
                g.min_dimension, g.max_dimension
            )));
        }

        let c = &self.crop;
        unit("crop.expansion_ratio", c.expansion_ratio)?;
        unit("crop.max_size_ratio", c.max_size_ratio)?;
        unit("crop.review_margin", c.review_margin)?;
        if c.min_size_px == 0 {
            return Err(LocateError::InvalidConfig("crop.min_size_px must be ≥ 1".into()));
        }
        Ok(())
    }
}

/// Composite-score weights and gate thresholds.
///
/// `score = confidence × Wc + quality_score(boundary) × Wq + bonus`, with
/// separate weights for tables because structural completeness matters more
/// than colour there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityParams {
    pub figure_confidence_weight: f64,
    pub figure_quality_weight: f64,
    pub table_confidence_weight: f64,
    pub table_quality_weight: f64,
    pub completeness_bonus: f64,
    /// Gate threshold when the query names a number or a description.
    pub specific_threshold: f64,
    /// Gate threshold for generic queries.
    pub generic_threshold: f64,
    /// Raw confidence floor, applied regardless of the composite score.
    pub min_confidence: f64,
    pub boundary_scores: BoundaryScores,
}

impl Default for QualityParams {
    fn default() -> Self {
        Self {
            figure_confidence_weight: 0.6,
            figure_quality_weight: 0.3,
            table_confidence_weight: 0.7,
            table_quality_weight: 0.2,
            completeness_bonus: 0.1,
            specific_threshold: 0.55,
            generic_threshold: 0.65,
            min_confidence: 0.5,
            boundary_scores: BoundaryScores::default(),
        }
    }
}

/// Score for each boundary-quality label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryScores {
    pub excellent: f64,
    pub good: f64,
    pub fair: f64,
    pub poor: f64,
}

impl Default for BoundaryScores {
    fn default() -> Self {
        Self {
            excellent: 1.0,
            good: 0.8,
            fair: 0.6,
            poor: 0.3,
        }
    }
}

/// Normalized-space correction margins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryParams {
    /// Upper clamp for `x` and `y`, leaving room for later expansion.
    pub max_coordinate: f64,
    /// Floor on width/height (fraction of the page).
    pub min_dimension: f64,
    /// Ceiling on width/height (fraction of the page).
    pub max_dimension: f64,
    /// Below this width/height a region is expanded toward the top-left.
    pub small_region_threshold: f64,
    /// Maximum top-left expansion for small regions.
    pub max_expansion: f64,
    /// Extra height below short regions, for captions.
    pub title_margin: f64,
    /// Regions shorter than this receive the title margin.
    pub height_threshold: f64,
    /// Upward shift applied to regions not touching the top edge.
    pub top_margin: f64,
    /// Regions with `y` above this receive the top margin.
    pub top_offset_threshold: f64,
}

impl Default for GeometryParams {
    fn default() -> Self {
        Self {
            max_coordinate: 0.95,
            min_dimension: 0.08,
            max_dimension: 0.9,
            small_region_threshold: 0.15,
            max_expansion: 0.05,
            title_margin: 0.03,
            height_threshold: 0.25,
            top_margin: 0.01,
            top_offset_threshold: 0.02,
        }
    }
}

/// Pixel-space crop parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropParams {
    /// Pixel expansion as a fraction of the crop extent, per side.
    pub expansion_ratio: f64,
    /// Minimum pixel expansion per side.
    pub min_margin_px: u32,
    /// Crops narrower or shorter than this are re-centred to this size.
    pub min_size_px: u32,
    /// Final crops below this size trigger a quality warning.
    pub warn_min_px: u32,
    /// Final crops above this fraction of the page trigger a quality warning.
    pub max_size_ratio: f64,
    /// Extra normalized margin for review crops of low-confidence candidates.
    pub review_margin: f64,
    /// Candidates below this confidence get `review_margin`.
    pub review_margin_below: f64,
}

impl Default for CropParams {
    fn default() -> Self {
        Self {
            expansion_ratio: 0.02,
            min_margin_px: 5,
            min_size_px: 80,
            warn_min_px: 50,
            max_size_ratio: 0.9,
            review_margin: 0.02,
            review_margin_below: 0.9,
        }
    }
}
