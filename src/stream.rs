//! Streaming detection API: emit per-page results as they complete.
//!
//! ## Why stream?
//!
//! A reference question searches every page, and on a long document that
//! takes a while. [`detect_stream`] yields one [`PageDetection`] per page as
//! soon as its oracle call returns, so callers can show progress or stop
//! early. [`crate::locate::FigureLocator`] consumes the same stream and
//! merges it before ranking.
//!
//! Pages arrive in completion order. Ranking does not depend on page order,
//! so nothing here sorts.
//!
//! ## Cancellation
//!
//! [`SearchCancel`] stops new page calls from being issued. Calls already in
//! flight run to completion or to their deadline, and pages that never
//! started are reported with [`FigureError::Cancelled`].

use crate::config::LocatorConfig;
use crate::error::FigureError;
use crate::oracle::VisualOracle;
use crate::output::PageDetection;
use crate::pipeline::detect::detect;
use crate::store::PageSource;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::Stream;
use tracing::{debug, warn};

/// A boxed stream of per-page detection results.
pub type DetectionStream = Pin<Box<dyn Stream<Item = PageDetection> + Send>>;

/// Cooperative cancellation flag shared between a caller and a running query.
#[derive(Debug, Clone, Default)]
pub struct SearchCancel(Arc<AtomicBool>);

impl SearchCancel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop issuing new page calls. In-flight calls are left alone.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run region detection over `page_numbers`, streaming results.
///
/// At most `config.concurrency` oracle calls run at once, each bounded by
/// `config.api_timeout_ms`. The stream always yields exactly one item per
/// requested page.
pub fn detect_stream(
    oracle: Arc<dyn VisualOracle>,
    pages: Arc<dyn PageSource>,
    document_id: &str,
    page_numbers: Vec<usize>,
    query: Option<String>,
    config: &LocatorConfig,
    cancel: &SearchCancel,
) -> DetectionStream {
    let total_pages = page_numbers.len();
    let timeout = Duration::from_millis(config.api_timeout_ms);
    let progress = config.progress_callback.clone();
    let document_id: Arc<str> = Arc::from(document_id);
    let query: Option<Arc<str>> = query.map(Arc::from);
    let cancel = cancel.clone();

    let s = stream::iter(page_numbers.into_iter().map(move |page_num| {
        let oracle = Arc::clone(&oracle);
        let pages = Arc::clone(&pages);
        let document_id = Arc::clone(&document_id);
        let query = query.clone();
        let progress = progress.clone();
        let cancel = cancel.clone();
        async move {
            let result = if cancel.is_cancelled() {
                debug!("Page {}: not searched, query cancelled", page_num);
                PageDetection::failed(page_num, FigureError::Cancelled { page: page_num }, 0)
            } else {
                if let Some(ref cb) = progress {
                    cb.on_page_start(page_num, total_pages);
                }
                search_page(&*oracle, &*pages, &document_id, page_num, query.as_deref(), timeout).await
            };

            if let Some(ref cb) = progress {
                match &result.error {
                    None => cb.on_page_complete(page_num, total_pages, result.candidates.len()),
                    Some(e) => cb.on_page_error(page_num, total_pages, &e.to_string()),
                }
            }
            result
        }
    }))
    .buffer_unordered(config.concurrency.max(1));

    Box::pin(s)
}

/// Load one page image off the async runtime, then run detection on it.
async fn search_page(
    oracle: &dyn VisualOracle,
    pages: &dyn PageSource,
    document_id: &str,
    page_num: usize,
    query: Option<&str>,
    timeout: Duration,
) -> PageDetection {
    let missing = || PageDetection::failed(page_num, FigureError::PageImageMissing { page: page_num }, 0);

    let Some(path) = pages.page_image(document_id, page_num) else {
        warn!("Page {}: no page image for document {}", page_num, document_id);
        return missing();
    };

    let image = match tokio::task::spawn_blocking(move || image::open(&path).map_err(|e| (path, e))).await {
        Ok(Ok(img)) => img,
        Ok(Err((path, e))) => {
            warn!("Page {}: cannot decode '{}': {}", page_num, path.display(), e);
            return missing();
        }
        Err(e) => {
            warn!("Page {}: image load task failed: {}", page_num, e);
            return missing();
        }
    };

    detect(oracle, page_num, &image, query, timeout).await
}
