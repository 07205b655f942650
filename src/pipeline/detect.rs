//! Per-page region detection.
//!
//! One oracle call per page under a hard deadline. [`detect`] never fails:
//! timeouts, transport errors and unreadable replies all become a
//! [`PageDetection`] with no candidates and `error` set, and the caller
//! moves on to the next page.

use crate::error::{FigureError, OracleError};
use crate::oracle::VisualOracle;
use crate::output::PageDetection;
use crate::pipeline::response::parse_detection;
use image::DynamicImage;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Ask the oracle for candidate regions on one page.
pub async fn detect(
    oracle: &dyn VisualOracle,
    page_number: usize,
    image: &DynamicImage,
    query: Option<&str>,
    timeout: Duration,
) -> PageDetection {
    let start = Instant::now();
    let elapsed_ms = || start.elapsed().as_millis() as u64;

    let reply = match tokio::time::timeout(timeout, oracle.detect_regions(image, query)).await {
        Ok(Ok(text)) => text,
        Ok(Err(OracleError::Timeout { elapsed_ms: ms })) => {
            warn!("Page {}: oracle timed out after {}ms", page_number, ms);
            return PageDetection::failed(
                page_number,
                FigureError::OracleTimeout {
                    page: page_number,
                    secs: ms / 1000,
                },
                elapsed_ms(),
            );
        }
        Ok(Err(e)) => {
            warn!("Page {}: oracle call failed: {}", page_number, e);
            return PageDetection::failed(
                page_number,
                FigureError::OracleUnavailable {
                    page: page_number,
                    detail: e.to_string(),
                },
                elapsed_ms(),
            );
        }
        Err(_) => {
            warn!("Page {}: oracle timed out after {:?}", page_number, timeout);
            return PageDetection::failed(
                page_number,
                FigureError::OracleTimeout {
                    page: page_number,
                    secs: timeout.as_secs(),
                },
                elapsed_ms(),
            );
        }
    };

    match parse_detection(&reply, page_number) {
        Ok(candidates) => {
            debug!(
                "Page {}: {} candidate(s) in {}ms",
                page_number,
                candidates.len(),
                elapsed_ms()
            );
            PageDetection {
                page_number,
                candidates,
                duration_ms: elapsed_ms(),
                error: None,
            }
        }
        Err(e) => {
            warn!("Page {}: unusable detection reply: {}", page_number, e);
            PageDetection::failed(
                page_number,
                FigureError::MalformedResponse {
                    page: page_number,
                    detail: e.to_string(),
                },
                elapsed_ms(),
            )
        }
    }
}
