//! Offline integration tests for `FigureLocator`.
//!
//! A scripted oracle stands in for the VLM and pages are plain PNGs in a
//! temp directory laid out the way `DirectoryPageStore` expects. Each page
//! image gets a distinct width so the oracle can tell which page it is
//! looking at.

use async_trait::async_trait;
use edgequake_figures::{
    DirectoryPageStore, FigureError, FigureLocator, FigureStore, LocateError,
    LocateProgressCallback, LocatorConfig, OracleError, SearchCancel, VisualOracle,
};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const BASE_WIDTH: u32 = 400;
const PAGE_HEIGHT: u32 = 600;
const DOC: &str = "paper-1";

// ── Scripted oracle ──────────────────────────────────────────────────────────

enum Reply {
    Json(serde_json::Value),
    Garbage,
    Hang,
}

#[derive(Default)]
struct ScriptedOracle {
    pages: HashMap<u32, Reply>,
    review: Option<serde_json::Value>,
    detect_calls: AtomicUsize,
    review_calls: AtomicUsize,
    queries: Mutex<Vec<Option<String>>>,
    cancel_on_detect: Option<SearchCancel>,
}

impl ScriptedOracle {
    fn page(mut self, page: u32, reply: Reply) -> Self {
        self.pages.insert(page, reply);
        self
    }

    fn review(mut self, reply: serde_json::Value) -> Self {
        self.review = Some(reply);
        self
    }
}

#[async_trait]
impl VisualOracle for ScriptedOracle {
    async fn detect_regions(
        &self,
        image: &DynamicImage,
        query: Option<&str>,
    ) -> Result<String, OracleError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.map(str::to_string));
        if let Some(cancel) = &self.cancel_on_detect {
            cancel.cancel();
        }
        match self.pages.get(&(image.width() - BASE_WIDTH)) {
            Some(Reply::Json(v)) => Ok(v.to_string()),
            Some(Reply::Garbage) => Ok("I could not find anything useful here.".to_string()),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(json!({ "elements": [] }).to_string())
            }
            None => Ok(json!({ "elements": [] }).to_string()),
        }
    }

    async fn review_candidates(
        &self,
        _images: &[DynamicImage],
        _query: &str,
    ) -> Result<String, OracleError> {
        self.review_calls.fetch_add(1, Ordering::SeqCst);
        self.review
            .as_ref()
            .map(|v| v.to_string())
            .ok_or_else(|| OracleError::Transport("no review scripted".into()))
    }
}

fn element(confidence: f64, matches_query: bool) -> serde_json::Value {
    json!({
        "id": "fig-a",
        "type": "chart",
        "title": "Accuracy by model size",
        "position": { "x": 20, "y": 25, "width": 55, "height": 35 },
        "confidence": confidence,
        "matches_query": matches_query,
        "boundary_quality": "good",
        "completeness": { "has_color": true, "has_title": true }
    })
}

fn page_with(elements: Vec<serde_json::Value>) -> Reply {
    Reply::Json(json!({ "elements": elements }))
}

// ── Fixture ──────────────────────────────────────────────────────────────────

fn write_document(dir: &Path, pages: u32) {
    let images = dir.join("images").join(DOC);
    std::fs::create_dir_all(&images).unwrap();
    for n in 1..=pages {
        RgbImage::from_pixel(BASE_WIDTH + n, PAGE_HEIGHT, Rgb([255, 255, 255]))
            .save(images.join(format!("page_{n}.png")))
            .unwrap();
    }
    std::fs::write(
        dir.join(format!("{DOC}.json")),
        json!({ "total_pages": pages }).to_string(),
    )
    .unwrap();
}

fn locator(dir: &TempDir, oracle: Arc<ScriptedOracle>, config: LocatorConfig) -> FigureLocator {
    FigureLocator::new(
        config,
        oracle,
        Arc::new(DirectoryPageStore::new(dir.path())),
        FigureStore::new(dir.path()),
    )
}

fn figure_files(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path().join("figures").join(DOC))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn numbered_figure_on_one_page_is_cropped_without_review() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), 10);
    let oracle = Arc::new(ScriptedOracle::default().page(6, page_with(vec![element(0.92, true)])));
    let loc = locator(&dir, oracle.clone(), LocatorConfig::default());

    let out = loc
        .locate_and_extract(DOC, "What does Figure 2 show?")
        .await
        .unwrap();

    assert_eq!(out.intent.number, Some(2));
    assert_eq!(oracle.detect_calls.load(Ordering::SeqCst), 10);
    assert_eq!(oracle.review_calls.load(Ordering::SeqCst), 0);
    assert_eq!(out.candidates_considered, 1);
    assert_eq!(out.figures.len(), 1);

    let fig = &out.figures[0];
    assert_eq!(fig.page_number, 6);
    assert!((fig.composite_score - 0.892).abs() < 1e-9);
    assert!(fig.bbox.get().is_within_page());
    assert!(fig.review_rationale.is_none());

    let saved = image::open(loc.store().resolve(&fig.artifact_ref).unwrap()).unwrap();
    assert_eq!(saved.dimensions(), (fig.pixel_box.width(), fig.pixel_box.height()));
    assert!(oracle
        .queries
        .lock()
        .unwrap()
        .iter()
        .all(|q| q.as_deref() == Some("Figure 2")));
}

#[tokio::test]
async fn unmatched_candidates_yield_no_figure() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), 3);
    let oracle = Arc::new(
        ScriptedOracle::default()
            .page(1, page_with(vec![element(0.95, false)]))
            .page(2, page_with(vec![element(0.9, false)]))
            .page(3, page_with(vec![element(0.97, false)])),
    );
    let loc = locator(&dir, oracle.clone(), LocatorConfig::default());

    let out = loc.locate_and_extract(DOC, "Show me Figure 7").await.unwrap();

    assert!(out.figures.is_empty());
    assert_eq!(out.candidates_considered, 3);
    assert_eq!(out.stats.candidates_passed, 0);
    assert_eq!(out.errors, vec![FigureError::NoCandidates]);
    assert_eq!(oracle.review_calls.load(Ordering::SeqCst), 0);
    assert_eq!(figure_files(&dir), 0);
}

#[tokio::test]
async fn review_verdict_overrides_confidence_order() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), 6);
    let oracle = Arc::new(
        ScriptedOracle::default()
            .page(2, page_with(vec![element(0.81, true)]))
            .page(5, page_with(vec![element(0.88, true)]))
            // Batch order is confidence-descending: [page 5, page 2].
            .review(json!({
                "best_index": 1,
                "scores": [6.5, 9.0],
                "confidence": 0.9,
                "rationale": "second crop shows the full chart with its caption"
            })),
    );
    let loc = locator(&dir, oracle.clone(), LocatorConfig::default());

    let out = loc.locate_and_extract(DOC, "Figure 3").await.unwrap();

    assert_eq!(oracle.review_calls.load(Ordering::SeqCst), 1);
    assert!(out.stats.reviewed);
    assert_eq!(out.stats.candidates_cropped, 2);
    assert_eq!(out.figures.len(), 1);
    let fig = &out.figures[0];
    assert_eq!(fig.page_number, 2);
    assert_eq!(fig.review_score, Some(9.0));
    assert!(fig.review_rationale.as_deref().unwrap().contains("caption"));
    // The losing crop is removed from the store.
    assert_eq!(figure_files(&dir), 1);
}

#[tokio::test]
async fn review_disabled_keeps_highest_confidence() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), 6);
    let oracle = Arc::new(
        ScriptedOracle::default()
            .page(2, page_with(vec![element(0.81, true)]))
            .page(5, page_with(vec![element(0.88, true)])),
    );
    let config = LocatorConfig::builder().review_enabled(false).build().unwrap();
    let loc = locator(&dir, oracle.clone(), config);

    let out = loc.locate_and_extract(DOC, "Figure 3").await.unwrap();

    assert_eq!(oracle.review_calls.load(Ordering::SeqCst), 0);
    assert_eq!(out.figures[0].page_number, 5);
}

#[tokio::test]
async fn failed_pages_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), 3);
    let oracle = Arc::new(
        ScriptedOracle::default()
            .page(1, Reply::Hang)
            .page(2, Reply::Garbage)
            .page(3, page_with(vec![element(0.93, true)])),
    );
    let config = LocatorConfig::builder().api_timeout_ms(200).build().unwrap();
    let loc = locator(&dir, oracle, config);

    let out = loc.locate_and_extract(DOC, "Table 1").await.unwrap();

    assert_eq!(out.stats.pages_searched, 3);
    assert_eq!(out.stats.pages_failed, 2);
    assert!(matches!(out.pages[0].error, Some(FigureError::OracleTimeout { page: 1, .. })));
    assert!(matches!(out.pages[1].error, Some(FigureError::MalformedResponse { page: 2, .. })));
    assert_eq!(out.figures.len(), 1);
    assert_eq!(out.figures[0].page_number, 3);
}

#[tokio::test]
async fn bare_mention_uses_generic_threshold() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), 2);
    // 0.6 × 0.6 + 0.8 × 0.3 = 0.60: enough for a specific query, not a generic one.
    let mut weak = element(0.6, false);
    weak["completeness"] = json!({ "has_color": false, "has_title": false });
    let oracle = Arc::new(ScriptedOracle::default().page(1, page_with(vec![weak])));
    let loc = locator(&dir, oracle.clone(), LocatorConfig::default());

    let out = loc
        .locate_and_extract(DOC, "What does the chart suggest about accuracy?")
        .await
        .unwrap();

    assert!(out.intent.has_reference);
    assert!(!out.intent.is_specific());
    assert!(oracle.queries.lock().unwrap().iter().all(Option::is_none));
    assert_eq!(out.candidates_considered, 1);
    assert!(out.figures.is_empty());
}

#[tokio::test]
async fn question_without_reference_searches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), 4);
    let oracle = Arc::new(ScriptedOracle::default());
    let loc = locator(&dir, oracle.clone(), LocatorConfig::default());

    let out = loc
        .locate_and_extract(DOC, "What is the main contribution?")
        .await
        .unwrap();

    assert!(!out.intent.has_reference);
    assert!(out.figures.is_empty());
    assert!(out.pages.is_empty());
    assert_eq!(oracle.detect_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreferenced_search_uses_relevant_pages() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), 8);
    let oracle = Arc::new(ScriptedOracle::default().page(4, page_with(vec![element(0.95, false)])));
    let config = LocatorConfig::builder().require_reference(false).build().unwrap();
    let loc = locator(&dir, oracle.clone(), config);

    let out = loc
        .locate_and_extract_with(
            DOC,
            "How is the encoder trained?",
            Some(&[4, 9, 2, 4]),
            &SearchCancel::new(),
        )
        .await
        .unwrap();

    // Page 9 is out of range and the duplicate 4 collapses.
    let searched: Vec<_> = out.pages.iter().map(|p| p.page_number).collect();
    assert_eq!(searched, vec![2, 4]);
    assert_eq!(oracle.detect_calls.load(Ordering::SeqCst), 2);
    assert_eq!(out.figures.len(), 1);
    assert_eq!(out.figures[0].page_number, 4);
}

#[tokio::test]
async fn unknown_and_malformed_documents_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), 1);
    let loc = locator(&dir, Arc::new(ScriptedOracle::default()), LocatorConfig::default());

    let err = loc.locate_and_extract("missing", "Figure 1").await.unwrap_err();
    assert!(matches!(err, LocateError::DocumentNotFound { .. }));

    let err = loc.locate_and_extract("../etc", "Figure 1").await.unwrap_err();
    assert!(matches!(err, LocateError::InvalidDocumentId { .. }));
}

#[tokio::test]
async fn artifacts_can_be_fetched_and_deleted() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), 2);
    let oracle = Arc::new(ScriptedOracle::default().page(2, page_with(vec![element(0.95, true)])));
    let loc = locator(&dir, oracle, LocatorConfig::default());

    let out = loc.locate_and_extract(DOC, "Fig. 1").await.unwrap();
    let artifact = &out.figures[0].artifact_ref;

    let bytes = loc.fetch_artifact(artifact).unwrap();
    assert_eq!(&bytes[..4], b"\x89PNG");

    assert_eq!(loc.delete_document_figures(DOC).unwrap(), 1);
    assert!(loc.fetch_artifact(artifact).is_err());
    assert_eq!(loc.delete_document_figures(DOC).unwrap(), 0);
}

#[derive(Default)]
struct RecordingCallback {
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    finished: Mutex<Option<(usize, usize)>>,
}

impl LocateProgressCallback for RecordingCallback {
    fn on_search_start(&self, total_pages: usize) {
        self.started.store(total_pages, Ordering::SeqCst);
    }

    fn on_page_complete(&self, _page: usize, _total: usize, _candidates: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_error(&self, _page: usize, _total: usize, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_search_complete(&self, candidates_considered: usize, figures: usize) {
        *self.finished.lock().unwrap() = Some((candidates_considered, figures));
    }
}

#[tokio::test]
async fn progress_events_cover_every_page() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), 4);
    let oracle = Arc::new(
        ScriptedOracle::default()
            .page(1, Reply::Garbage)
            .page(3, page_with(vec![element(0.95, true)])),
    );
    let cb = Arc::new(RecordingCallback::default());
    let config = LocatorConfig::builder()
        .progress_callback(cb.clone() as Arc<dyn LocateProgressCallback>)
        .build()
        .unwrap();
    let loc = locator(&dir, oracle, config);

    loc.locate_and_extract(DOC, "图2").await.unwrap();

    assert_eq!(cb.started.load(Ordering::SeqCst), 4);
    assert_eq!(cb.completed.load(Ordering::SeqCst), 3);
    assert_eq!(cb.failed.load(Ordering::SeqCst), 1);
    assert_eq!(*cb.finished.lock().unwrap(), Some((1, 1)));
}

#[tokio::test]
async fn unwritable_figure_store_reports_crop_failures() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), 3);
    // A plain file where the figures directory should go.
    std::fs::write(dir.path().join("figures"), b"not a directory").unwrap();
    let oracle = Arc::new(
        ScriptedOracle::default()
            .page(1, page_with(vec![element(0.93, true)]))
            .page(3, page_with(vec![element(0.85, true)])),
    );
    let loc = locator(&dir, oracle.clone(), LocatorConfig::default());

    let out = loc.locate_and_extract(DOC, "Figure 4").await.unwrap();

    assert!(out.figures.is_empty());
    assert_eq!(out.stats.candidates_passed, 2);
    assert_eq!(out.stats.candidates_cropped, 0);
    assert_eq!(oracle.review_calls.load(Ordering::SeqCst), 0);
    let mut failed_pages: Vec<_> = out
        .errors
        .iter()
        .map(|e| match e {
            FigureError::CropIo { page, .. } => *page,
            other => panic!("unexpected error {other:?}"),
        })
        .collect();
    failed_pages.sort_unstable();
    assert_eq!(failed_pages, vec![1, 3]);
}

#[tokio::test]
async fn cancelled_query_crops_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_document(dir.path(), 2);
    let cancel = SearchCancel::new();
    let oracle = Arc::new(ScriptedOracle {
        cancel_on_detect: Some(cancel.clone()),
        ..ScriptedOracle::default()
            .page(1, page_with(vec![element(0.95, true)]))
            .page(2, page_with(vec![element(0.9, true)]))
            .review(json!({ "best_index": 0 }))
    });
    let config = LocatorConfig::builder().concurrency(1).build().unwrap();
    let loc = locator(&dir, oracle.clone(), config);

    let out = loc
        .locate_and_extract_with(DOC, "Figure 1", None, &cancel)
        .await
        .unwrap();

    assert!(out.stats.cancelled);
    assert!(out.figures.is_empty());
    assert!(out.errors.is_empty());
    assert_eq!(oracle.detect_calls.load(Ordering::SeqCst), 1);
    assert!(matches!(out.pages[1].error, Some(FigureError::Cancelled { page: 2 })));
    assert_eq!(out.stats.candidates_cropped, 0);
    assert_eq!(oracle.review_calls.load(Ordering::SeqCst), 0);
    assert_eq!(figure_files(&dir), 0);
}
