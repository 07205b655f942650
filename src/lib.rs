//! # edgequake-figures
//!
//! Find the figure or table a question refers to, crop it from the page image
//! and store it as a PNG, using Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! A retrieval layer over rasterised documents can answer "what does Figure 2
//! show?" only if it can *see* Figure 2. Captions drift from their figures,
//! page layouts vary, and numbering is not always printed where a parser would
//! look. Instead this crate asks a VLM to enumerate the visual elements on
//! each page, filters and corrects the proposed boxes with plain geometry, and
//! lets the model compare the best crops side by side before one is chosen.
//!
//! ## Pipeline Overview
//!
//! ```text
//! question + document id
//!  │
//!  ├─ 1. Intent   does the question name a figure/table? which number?
//!  ├─ 2. Pages    every page for a reference, relevant pages otherwise
//!  ├─ 3. Detect   concurrent VLM calls, one per page, under a deadline
//!  ├─ 4. Gate     composite score + query match, then box correction
//!  ├─ 5. Review   crop the top candidates, VLM picks the best one
//!  └─ 6. Store    PNG artifact under figures/<document_id>/
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_figures::{FigureLocator, LocatorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let locator = FigureLocator::from_config(LocatorConfig::default(), "data")?;
//!     let output = locator
//!         .locate_and_extract("3f2a9c", "What does Figure 2 show?")
//!         .await?;
//!     for fig in &output.figures {
//!         println!("page {} -> {}", fig.page_number, fig.artifact_ref);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `figlocate` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-figures = { version = "0.1", default-features = false }
//! ```
//!
//! ## Testing without a model
//!
//! Everything that talks to the VLM goes through [`VisualOracle`]. Implement
//! it with canned JSON replies and pass it to [`FigureLocator::new`] to run
//! the whole pipeline offline.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod locate;
pub mod oracle;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod region;
pub mod store;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    BoundaryScores, CropParams, FigureParams, GeometryParams, LocatorConfig, LocatorConfigBuilder,
    QualityParams,
};
pub use error::{CropError, FigureError, LocateError, OracleError, ResponseParseError};
pub use locate::FigureLocator;
pub use oracle::VisualOracle;
pub use output::{
    ExtractedFigure, LocateOutput, LocateStats, PageDetection, ReferenceIntent, ReviewVerdict,
    SearchState,
};
pub use pipeline::intent::extract as extract_intent;
pub use pipeline::llm::VlmOracle;
pub use pipeline::pages::{LeadingPages, RelevanceSelector};
pub use progress::{LocateProgressCallback, NoopProgressCallback, ProgressCallback};
pub use region::{
    BoundaryQuality, CandidateRegion, CompletenessSignals, CorrectedBox, ElementKind,
    NormalizedBox, PixelBox,
};
pub use store::{ArtifactRef, DirectoryPageStore, FigureStore, PageSource};
pub use stream::{detect_stream, DetectionStream, SearchCancel};
