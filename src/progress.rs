//! Progress-callback trait for per-page search events.
//!
//! Inject an [`Arc<dyn LocateProgressCallback>`] via
//! [`crate::config::LocatorConfigBuilder::progress_callback`] to receive
//! events while a query searches pages, reviews candidates and resolves.
//! Callers can forward events to a channel keyed by their own job id, a
//! WebSocket, or a terminal progress bar. The library keeps no global
//! progress state.
//!
//! # Example
//!
//! ```rust
//! use edgequake_figures::{LocateProgressCallback, LocatorConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     searched: AtomicUsize,
//! }
//!
//! impl LocateProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, candidates: usize) {
//!         self.searched.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{}: {} candidates", page_num, total_pages, candidates);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { searched: AtomicUsize::new(0) });
//!
//! let config = LocatorConfig::builder()
//!     .progress_callback(counter as Arc<dyn LocateProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the locator as it searches pages.
///
/// Page events may arrive concurrently from different tasks, so
/// implementations must protect shared mutable state. All methods default
/// to no-ops.
pub trait LocateProgressCallback: Send + Sync {
    /// Called once before any page is searched.
    fn on_search_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the detection request is sent for a page.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page was searched successfully.
    ///
    /// `candidates` counts raw detections, before the quality gate.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, candidates: usize) {
        let _ = (page_num, total_pages, candidates);
    }

    /// Called when a page was skipped (oracle failure, timeout, missing image).
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called before the review call, with the number of crops submitted.
    fn on_review_start(&self, candidates: usize) {
        let _ = candidates;
    }

    /// Called once when the query resolves.
    fn on_search_complete(&self, candidates_considered: usize, figures: usize) {
        let _ = (candidates_considered, figures);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl LocateProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::LocatorConfig`].
pub type ProgressCallback = Arc<dyn LocateProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        reviewed: AtomicUsize,
        figures: AtomicUsize,
    }

    impl LocateProgressCallback for TrackingCallback {
        fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page_num: usize, _total_pages: usize, _candidates: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_review_start(&self, candidates: usize) {
            self.reviewed.store(candidates, Ordering::SeqCst);
        }

        fn on_search_complete(&self, _candidates_considered: usize, figures: usize) {
            self.figures.store(figures, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_search_start(5);
        cb.on_page_start(1, 5);
        cb.on_page_complete(1, 5, 2);
        cb.on_page_error(2, 5, "timeout");
        cb.on_review_start(2);
        cb.on_search_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_page_start(1, 2);
        tracker.on_page_complete(1, 2, 3);
        tracker.on_page_start(2, 2);
        tracker.on_page_error(2, 2, "malformed");
        tracker.on_review_start(3);
        tracker.on_search_complete(3, 1);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.reviewed.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.figures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn LocateProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_search_start(10);
        cb.on_page_complete(1, 10, 0);
    }
}
