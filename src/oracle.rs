//! The external visual-analysis oracle, as a two-method interface.
//!
//! The pipeline never assumes anything about how the oracle reasons: it
//! sends an image (or a batch of crops) and receives free text expected to
//! contain one JSON object. Extracting and validating that object is the job
//! of [`crate::pipeline::response`]. [`crate::pipeline::llm::VlmOracle`] is
//! the production implementation; tests substitute deterministic stubs.

use crate::error::OracleError;
use async_trait::async_trait;
use image::DynamicImage;

#[async_trait]
pub trait VisualOracle: Send + Sync {
    /// Enumerate candidate regions on one page image.
    ///
    /// With `query = None` the oracle lists every visual element; otherwise
    /// it annotates each element with whether it matches the query.
    async fn detect_regions(
        &self,
        image: &DynamicImage,
        query: Option<&str>,
    ) -> Result<String, OracleError>;

    /// Score a batch of candidate crops against the user's question and
    /// pick the best one.
    async fn review_candidates(
        &self,
        images: &[DynamicImage],
        query: &str,
    ) -> Result<String, OracleError>;
}
