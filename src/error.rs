//! Error types for the edgequake-figures library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`LocateError`] is **fatal**: the query cannot run at all (unknown
//!   document, provider not configured, invalid configuration). Returned as
//!   `Err(LocateError)` from [`crate::locate::FigureLocator::locate_and_extract`].
//!
//! * [`FigureError`] is **non-fatal**: one page, one candidate or the review
//!   step failed, but the query carries on. Stored inside
//!   [`crate::output::PageDetection`] or logged, never propagated. The worst
//!   outcome a user sees from these is "no figure found".
//!
//! The oracle boundary and the crop stage have their own narrow error types
//! ([`OracleError`], [`ResponseParseError`], [`CropError`]) that are folded
//! into [`FigureError`] by the stage that owns them.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-figures library.
#[derive(Debug, Error)]
pub enum LocateError {
    /// The page source has no record of this document.
    #[error("Document '{document_id}' not found")]
    DocumentNotFound { document_id: String },

    /// Document ids are used as directory names and must be a single path segment.
    #[error("Invalid document id '{document_id}': must be a single path segment")]
    InvalidDocumentId { document_id: String },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The artifact store could not be read or written.
    #[error("Artifact store I/O failed at '{path}': {source}")]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A non-fatal error for a single page, candidate or review call.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum FigureError {
    /// Network or provider failure on a detection call; the page is skipped.
    #[error("Page {page}: oracle unavailable: {detail}")]
    OracleUnavailable { page: usize, detail: String },

    /// Detection call exceeded its deadline; treated like `OracleUnavailable`.
    #[error("Page {page}: oracle call timed out after {secs}s")]
    OracleTimeout { page: usize, secs: u64 },

    /// The oracle answered but no usable structure was found in the reply.
    #[error("Page {page}: malformed oracle response: {detail}")]
    MalformedResponse { page: usize, detail: String },

    /// The page source has no image for this page.
    #[error("Page {page}: page image not found")]
    PageImageMissing { page: usize },

    /// No candidate passed the quality gate on any searched page.
    #[error("No matching figure found")]
    NoCandidates,

    /// The review call failed or returned an unusable verdict.
    #[error("Review inconclusive: {detail}")]
    ReviewInconclusive { detail: String },

    /// Cropping failed for one candidate; the candidate is dropped.
    #[error("Page {page}: crop failed: {detail}")]
    CropIo { page: usize, detail: String },

    /// Crop produced but its size is suspicious. A warning, not a failure.
    #[error("Page {page}: degenerate crop {width}x{height}px: {detail}")]
    GeometryDegenerate {
        page: usize,
        width: u32,
        height: u32,
        detail: String,
    },

    /// The query was cancelled before this page was searched.
    #[error("Page {page}: search cancelled")]
    Cancelled { page: usize },
}

impl FigureError {
    /// True for the failures that mean "this page produced no candidates"
    /// as opposed to warnings attached to a produced artifact.
    pub fn skips_page(&self) -> bool {
        matches!(
            self,
            FigureError::OracleUnavailable { .. }
                | FigureError::OracleTimeout { .. }
                | FigureError::MalformedResponse { .. }
                | FigureError::PageImageMissing { .. }
                | FigureError::Cancelled { .. }
        )
    }
}

/// Failure at the visual-oracle boundary.
#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error("oracle call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("oracle transport error: {0}")]
    Transport(String),

    #[error("image encoding failed: {0}")]
    Encoding(String),
}

/// Failure to pull a structured object out of an oracle's free-text reply.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResponseParseError {
    #[error("no JSON object found in response")]
    NoJsonObject,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("missing field '{0}'")]
    MissingField(&'static str),
}

/// Failure while cropping a page image or persisting the crop.
#[derive(Debug, Error)]
pub enum CropError {
    #[error("source image not found: '{path}'")]
    SourceMissing { path: PathBuf },

    #[error("could not decode '{path}': {detail}")]
    Decode { path: PathBuf, detail: String },

    #[error("source image has zero width or height")]
    EmptyImage,

    #[error("failed to write artifact '{path}': {detail}")]
    Write { path: PathBuf, detail: String },
}
