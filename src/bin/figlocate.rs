//! CLI binary for edgequake-figures.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `LocatorConfig`, runs one query and prints the result.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_figures::{
    extract_intent, FigureError, FigureLocator, FigureParams, LocateOutput, LocateProgressCallback,
    LocatorConfig, ProgressCallback, ReferenceIntent, SearchCancel,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per page.
/// Pages complete out of order, so start times are tracked per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading question…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Searching");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl LocateProgressCallback for CliProgressCallback {
    fn on_search_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Searching {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, candidates: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<14}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{candidates:>2} candidate(s)")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_review_start(&self, candidates: usize) {
        self.bar.set_prefix("Reviewing");
        self.bar
            .set_message(format!("asking the model to compare {candidates} crops"));
    }

    fn on_search_complete(&self, candidates_considered: usize, figures: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        let failed_note = if failed > 0 {
            format!("  ({} pages skipped)", red(&failed.to_string()))
        } else {
            String::new()
        };
        eprintln!(
            "{} {} figure(s) from {} candidate(s){}",
            if figures > 0 { green("✔") } else { cyan("⚠") },
            bold(&figures.to_string()),
            candidates_considered,
            failed_note,
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Crop the figure a question refers to
  figlocate -d 3f2a9c "What does Figure 2 show?"

  # Copy the PNG out of the artifact store
  figlocate -d 3f2a9c "Show me Table 3" --export ./out

  # Only print how the question is understood (no API key needed)
  figlocate --intent-only "请显示图3"

  # Search the retrieval layer's pages for a question without a reference
  figlocate -d 3f2a9c --search-unreferenced --relevant-pages 2,5-7 "Explain the architecture"

  # Tuned thresholds from a JSON file, no review call
  figlocate -d 3f2a9c --params params.json --no-review "Figure 4"

DATA LAYOUT (--data-dir):
  <dir>/<document_id>.json              metadata with "total_pages"
  <dir>/images/<document_id>/page_N.png rasterised pages (input)
  <dir>/figures/<document_id>/*.png     extracted figures (output)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
"#;

/// Locate and crop figures and tables in rasterised documents using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "figlocate",
    version,
    about = "Locate and crop the figure or table a question refers to",
    long_about = "Find the figure or table a natural-language question refers to in a \
rasterised document, crop it from the page image and store it as a PNG. Region detection \
and candidate review are done by a Vision Language Model (OpenAI, Anthropic, Gemini, \
Ollama or any OpenAI-compatible endpoint).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// The user's question, e.g. "What does Figure 2 show?".
    question: String,

    /// Document id (directory name under images/).
    #[arg(short, long, env = "FIGLOCATE_DOCUMENT", required_unless_present = "intent_only")]
    document: Option<String>,

    /// Root of the document data tree.
    #[arg(long, env = "FIGLOCATE_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Number of concurrent page-detection calls.
    #[arg(short, long, env = "FIGLOCATE_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// Max LLM output tokens per call.
    #[arg(long, env = "FIGLOCATE_MAX_TOKENS", default_value_t = 3000)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "FIGLOCATE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Per-page detection timeout in seconds.
    #[arg(long, env = "FIGLOCATE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Review call timeout in seconds.
    #[arg(long, env = "FIGLOCATE_REVIEW_TIMEOUT", default_value_t = 120)]
    review_timeout: u64,

    /// Candidates cropped and sent to review.
    #[arg(long, env = "FIGLOCATE_TOP_K", default_value_t = 3)]
    top_k: usize,

    /// Skip the review call; the highest-confidence candidate wins.
    #[arg(long)]
    no_review: bool,

    /// Search even when the question names no figure or table.
    #[arg(long)]
    search_unreferenced: bool,

    /// Pages the retrieval layer found relevant: 5, 3-7 or 1,3,5-6.
    #[arg(long)]
    relevant_pages: Option<String>,

    /// JSON file overriding tuned thresholds and margins.
    #[arg(long, env = "FIGLOCATE_PARAMS")]
    params: Option<PathBuf>,

    /// Copy extracted PNGs into this directory.
    #[arg(long)]
    export: Option<PathBuf>,

    /// Output structured JSON (LocateOutput).
    #[arg(long)]
    json: bool,

    /// Print the parsed reference intent and exit.
    #[arg(long)]
    intent_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "FIGLOCATE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FIGLOCATE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FIGLOCATE_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs are suppressed while the progress bar is live.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.intent_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Intent-only mode ─────────────────────────────────────────────────
    if cli.intent_only {
        print_intent(&extract_intent(&cli.question), cli.json)?;
        return Ok(());
    }
    let document = cli
        .document
        .as_deref()
        .context("--document is required")?;

    // ── Build locator ────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn LocateProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let locator = FigureLocator::from_config(config, &cli.data_dir)
        .context("Failed to initialise the vision provider")?;

    let relevant = cli
        .relevant_pages
        .as_deref()
        .map(parse_pages)
        .transpose()?;

    // ── Run query ────────────────────────────────────────────────────────
    let cancel = cancel_on_ctrl_c();
    let output = locator
        .locate_and_extract_with(document, &cli.question, relevant.as_deref(), &cancel)
        .await
        .context("Figure search failed")?;

    if let Some(ref dir) = cli.export {
        export_figures(&locator, &output, dir)?;
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&locator, &output);
    }

    Ok(())
}

/// Map CLI args to `LocatorConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<LocatorConfig> {
    let params = match cli.params {
        Some(ref path) => FigureParams::from_json_file(path)
            .with_context(|| format!("Failed to load parameters from {:?}", path))?,
        None => FigureParams::default(),
    };

    let mut builder = LocatorConfig::builder()
        .concurrency(cli.concurrency)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_ms(cli.api_timeout.saturating_mul(1000))
        .review_timeout_ms(cli.review_timeout.saturating_mul(1000))
        .review_top_k(cli.top_k)
        .review_enabled(!cli.no_review)
        .require_reference(!cli.search_unreferenced)
        .params(params);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }

    builder.build().context("Invalid configuration")
}

fn print_intent(intent: &ReferenceIntent, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(intent).context("Failed to serialise intent")?
        );
        return Ok(());
    }
    println!("Reference:    {}", intent.has_reference);
    println!("Kind:         {}", intent.kind);
    match intent.number {
        Some(n) => println!("Number:       {n}"),
        None => println!("Number:       -"),
    }
    println!("Specific:     {}", intent.is_specific());
    if let Some(q) = intent.query_text() {
        println!("Oracle query: {q}");
    }
    Ok(())
}

/// A cancel flag that trips on the first Ctrl-C.
fn cancel_on_ctrl_c() -> SearchCancel {
    let cancel = SearchCancel::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Cancelling: waiting for in-flight pages…", cyan("⚠"));
            flag.cancel();
        }
    });
    cancel
}

fn print_summary(locator: &FigureLocator, output: &LocateOutput) {
    for e in &output.errors {
        if !matches!(e, FigureError::NoCandidates) {
            eprintln!("{} {}", red("✗"), e);
        }
    }
    if output.stats.cancelled {
        eprintln!("Search cancelled, nothing was extracted");
        return;
    }
    if output.figures.is_empty() {
        eprintln!(
            "No matching figure found ({} candidate(s) considered, {} page(s) searched)",
            output.candidates_considered, output.stats.pages_searched
        );
        return;
    }
    for fig in &output.figures {
        let path = locator
            .store()
            .resolve(&fig.artifact_ref)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| fig.artifact_ref.to_string());
        println!(
            "{}  page {}  {}x{}px  score {:.2}  →  {}",
            green("✔"),
            fig.page_number,
            fig.pixel_box.width(),
            fig.pixel_box.height(),
            fig.composite_score,
            bold(&path),
        );
        if let Some(ref rationale) = fig.review_rationale {
            println!("   {}", dim(&format!("review: {rationale}")));
        }
        for w in &fig.warnings {
            println!("   {} {}", cyan("⚠"), w);
        }
    }
}

/// Copy every extracted figure out of the artifact store.
fn export_figures(locator: &FigureLocator, output: &LocateOutput, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    for fig in &output.figures {
        let bytes = locator
            .fetch_artifact(&fig.artifact_ref)
            .with_context(|| format!("Failed to read {}", fig.artifact_ref))?;
        let target = dir.join(fig.artifact_ref.file_name());
        std::fs::write(&target, bytes).with_context(|| format!("Failed to write {:?}", target))?;
    }
    Ok(())
}

/// Upper bound for `--relevant-pages`; keeps a typo from allocating a huge range.
const MAX_PAGE_NUMBER: usize = 100_000;

/// Parse `--relevant-pages` into 1-indexed page numbers.
fn parse_pages(s: &str) -> Result<Vec<usize>> {
    let mut pages = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let start: usize = start.trim().parse().context("Invalid start page in range")?;
            let end: usize = end.trim().parse().context("Invalid end page in range")?;
            if start < 1 {
                anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
            }
            if start > end {
                anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
            }
            if end > MAX_PAGE_NUMBER {
                anyhow::bail!("Page {end} is beyond the supported maximum of {MAX_PAGE_NUMBER}");
            }
            pages.extend(start..=end);
        } else {
            let page: usize = part
                .parse()
                .with_context(|| format!("Invalid page number: '{}'", part))?;
            if page < 1 {
                anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
            }
            pages.push(page);
        }
    }
    Ok(pages)
}
