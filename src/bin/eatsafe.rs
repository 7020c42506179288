//! CLI binary for eatsafe.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ScanConfig` and prints the report.

use anyhow::{Context, Result};
use clap::Parser;
use eatsafe::{
    inspect, AnalysisResult, EatSafeError, ExtractedText, ImageInfo, IngredientDetails,
    OcrEngineMode, PageSegMode, ProgressCallback, ScanConfig, ScanProgressCallback, ScanReport, Scanner, Stage,
    TesseractEngine,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner naming the running stage, with one log line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Scanning");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Setup => "Setting up",
        Stage::Upload => "Reading image",
        Stage::Validate => "Validating image",
        Stage::Preprocess => "Preparing image",
        Stage::Extract => "Extracting text",
        Stage::Analyze => "Analyzing ingredients",
    }
}

impl ScanProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_message(format!("{}…", stage_label(stage)));
    }

    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<22} {}",
            green("✓"),
            stage_label(stage),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_relaxed_retry(&self, chars: usize) {
        self.bar.println(format!(
            "  {} only {chars} characters read; retrying with relaxed OCR settings",
            yellow("⚠"),
        ));
    }

    fn on_stage_error(&self, stage: Stage, _error: &str) {
        self.bar
            .println(format!("  {} {}", red("✗"), stage_label(stage)));
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Scan a label photo
  eatsafe label.jpg

  # Scan a photo from a URL and print JSON
  eatsafe --json https://example.com/cereal-box.png

  # OCR only, no API key needed
  eatsafe --text-only label.jpg

  # Image facts and quality estimate only
  eatsafe --inspect-only label.jpg

  # Explain one ingredient
  eatsafe --explain "xanthan gum"

  # Faint or glossy label: lower the confidence cut-off
  eatsafe --confidence 0.2 --psm sparse-text label.jpg

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EATSAFE_PROVIDER        Override provider (openai, anthropic, gemini, ollama)
  EATSAFE_MODEL           Override model ID (default gpt-4o)
  EATSAFE_TESSERACT       Path to the tesseract binary
  RUST_LOG                Log filter, e.g. eatsafe=debug

SETUP:
  1. Install Tesseract:  apt install tesseract-ocr   |   brew install tesseract
  2. Set API key:        export OPENAI_API_KEY=sk-...
  3. Scan:               eatsafe label.jpg
"#;

/// Read a food label photo and explain its ingredients.
#[derive(Parser, Debug)]
#[command(
    name = "eatsafe",
    version,
    about = "Read the ingredient list from a food label photo and explain it",
    long_about = "Validate and clean up a photo of a food label, read its text with Tesseract \
OCR, and ask an LLM to list the ingredients, likely allergens and dietary flags. Supports \
OpenAI, Anthropic, Google Gemini, Ollama and other providers via edgequake-llm.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image path (JPEG, PNG, BMP, TIFF) or HTTP/HTTPS URL.
    #[arg(required_unless_present = "explain")]
    input: Option<String>,

    /// LLM model ID (e.g. gpt-4o, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EATSAFE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EATSAFE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Path to the tesseract binary.
    #[arg(long, env = "EATSAFE_TESSERACT")]
    tesseract: Option<PathBuf>,

    /// OCR language(s), e.g. eng or eng+fra.
    #[arg(long, env = "EATSAFE_LANG", default_value = "eng")]
    lang: String,

    /// Page segmentation mode for the first OCR pass.
    #[arg(long, env = "EATSAFE_PSM", value_enum, default_value = "single-block")]
    psm: PsmArg,

    /// Page segmentation mode for the relaxed retry.
    #[arg(long, env = "EATSAFE_RELAXED_PSM", value_enum, default_value = "auto")]
    relaxed_psm: PsmArg,

    /// Tesseract engine mode.
    #[arg(long, env = "EATSAFE_OEM", value_enum, default_value = "default")]
    oem: OemArg,

    /// Characters Tesseract may emit (defaults to the built-in label set).
    #[arg(long, env = "EATSAFE_ALLOWLIST")]
    allowlist: Option<String>,

    /// Minimum word confidence (0.0–1.0) for the first OCR pass.
    #[arg(long, env = "EATSAFE_CONFIDENCE", default_value_t = 0.30)]
    confidence: f32,

    /// Minimum word confidence for the relaxed retry.
    #[arg(long, env = "EATSAFE_RELAXED_CONFIDENCE", default_value_t = 0.10)]
    relaxed_confidence: f32,

    /// Fail instead of retrying OCR with relaxed settings.
    #[arg(long, env = "EATSAFE_NO_RETRY")]
    no_retry: bool,

    /// Shortest OCR text accepted without a retry.
    #[arg(long, env = "EATSAFE_MIN_TEXT_CHARS", default_value_t = 10)]
    min_text_chars: usize,

    /// Upscale factor applied before preprocessing (1.0 disables).
    #[arg(long, env = "EATSAFE_RESIZE", default_value_t = 1.5)]
    resize: f32,

    /// Smallest accepted image side in pixels.
    #[arg(long, env = "EATSAFE_MIN_DIMENSION", default_value_t = 100)]
    min_dimension: u32,

    /// Largest accepted image side in pixels.
    #[arg(long, env = "EATSAFE_MAX_DIMENSION", default_value_t = 10_000)]
    max_dimension: u32,

    /// CLAHE clip limit.
    #[arg(long, env = "EATSAFE_CLAHE_CLIP", default_value_t = 2.0)]
    clahe_clip: f32,

    /// CLAHE tiles per side.
    #[arg(long, env = "EATSAFE_CLAHE_GRID", default_value_t = 8)]
    clahe_grid: u32,

    /// Skip the median denoise filter.
    #[arg(long, env = "EATSAFE_NO_DENOISE")]
    no_denoise: bool,

    /// Skip adaptive contrast enhancement.
    #[arg(long, env = "EATSAFE_NO_CONTRAST")]
    no_contrast: bool,

    /// Largest accepted upload in megabytes.
    #[arg(long, env = "EATSAFE_MAX_UPLOAD_MB", default_value_t = 200)]
    max_upload_mb: u64,

    /// Path to a text file containing a custom analysis system prompt.
    #[arg(long, env = "EATSAFE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Shortest text sent to the LLM; anything shorter is rejected as empty.
    #[arg(long, env = "EATSAFE_MIN_ANALYSIS_CHARS", default_value_t = 5)]
    min_analysis_chars: usize,

    /// Max LLM output tokens.
    #[arg(long, env = "EATSAFE_MAX_TOKENS", default_value_t = 1500)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "EATSAFE_TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    /// Output the structured report as JSON.
    #[arg(long, env = "EATSAFE_JSON")]
    json: bool,

    /// Only extract text; do not call the LLM.
    #[arg(long, conflicts_with_all = ["inspect_only", "explain"])]
    text_only: bool,

    /// Print image facts and a quality estimate only.
    #[arg(long, conflicts_with = "explain")]
    inspect_only: bool,

    /// Explain a single ingredient instead of scanning an image.
    #[arg(long, value_name = "INGREDIENT")]
    explain: Option<String>,

    /// Disable the progress spinner.
    #[arg(long, env = "EATSAFE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "EATSAFE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, env = "EATSAFE_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "EATSAFE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Tesseract timeout in seconds.
    #[arg(long, env = "EATSAFE_OCR_TIMEOUT", default_value_t = 60)]
    ocr_timeout: u64,

    /// LLM call timeout in seconds.
    #[arg(long, env = "EATSAFE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PsmArg {
    Auto,
    SingleColumn,
    SingleBlock,
    SingleLine,
    SparseText,
}

impl From<PsmArg> for PageSegMode {
    fn from(v: PsmArg) -> Self {
        match v {
            PsmArg::Auto => PageSegMode::Auto,
            PsmArg::SingleColumn => PageSegMode::SingleColumn,
            PsmArg::SingleBlock => PageSegMode::SingleBlock,
            PsmArg::SingleLine => PageSegMode::SingleLine,
            PsmArg::SparseText => PageSegMode::SparseText,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OemArg {
    Legacy,
    Lstm,
    Combined,
    Default,
}

impl From<OemArg> for OcrEngineMode {
    fn from(v: OemArg) -> Self {
        match v {
            OemArg::Legacy => OcrEngineMode::Legacy,
            OemArg::Lstm => OcrEngineMode::Lstm,
            OemArg::Combined => OcrEngineMode::Combined,
            OemArg::Default => OcrEngineMode::Default,
        }
    }
}

/// The spinner only tracks scan stages; explain and inspect never emit them.
fn shows_progress(cli: &Cli) -> bool {
    !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only && cli.explain.is_none()
}

/// Attach the retry hint, if any, to a library error.
fn with_hint(e: EatSafeError) -> anyhow::Error {
    match e.hint() {
        Some(hint) => anyhow::anyhow!("{e}\n{hint}"),
        None => anyhow::Error::new(e),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are suppressed while the spinner is active; the
    // spinner already says which stage is running.
    let show_progress = shows_progress(&cli);
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

    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(
        &cli,
        progress
            .clone()
            .map(|cb| cb as Arc<dyn ScanProgressCallback>),
    )
    .await?;

    let outcome = run(&cli, config).await;
    if let Some(cb) = progress {
        cb.finish();
    }
    outcome
}

async fn run(cli: &Cli, config: ScanConfig) -> Result<()> {
    // ── Explain mode ─────────────────────────────────────────────────────
    if let Some(ref ingredient) = cli.explain {
        let scanner = Scanner::from_config(config).map_err(with_hint)?;
        let details = scanner.explain(ingredient).await.map_err(with_hint)?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&details).context("Failed to serialise details")?
            );
        } else {
            print_details(&details);
        }
        return Ok(());
    }

    let input = cli
        .input
        .as_deref()
        .context("An image path or URL is required")?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let info = inspect(input, &config).await.map_err(with_hint)?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialise image info")?
            );
        } else {
            println!("File:         {input}");
            print_image(&info);
        }
        return Ok(());
    }

    // ── Text-only mode ───────────────────────────────────────────────────
    if cli.text_only {
        let ocr = Arc::new(TesseractEngine::from_config(&config));
        let scanner = Scanner::ocr_only(ocr, config);
        let (info, extracted, stats) = scanner.extract_path(input).await.map_err(with_hint)?;
        if cli.json {
            let value = serde_json::json!({
                "image": info,
                "extracted": extracted,
                "stats": stats,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&value).context("Failed to serialise output")?
            );
        } else {
            print_text(&extracted);
        }
        return Ok(());
    }

    // ── Full scan ────────────────────────────────────────────────────────
    let scanner = Scanner::from_config(config).map_err(with_hint)?;
    let report = scanner.scan_path(input).await.map_err(with_hint)?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else {
        print_report(&report);
        if !cli.quiet {
            eprintln!(
                "   {} tokens in  /  {} tokens out  —  {}ms total",
                dim(&report.stats.input_tokens.to_string()),
                dim(&report.stats.output_tokens.to_string()),
                report.stats.total_ms,
            );
        }
    }
    Ok(())
}

/// Map CLI args to `ScanConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ScanConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ScanConfig::builder()
        .max_upload_bytes(cli.max_upload_mb.saturating_mul(1024 * 1024))
        .min_dimension(cli.min_dimension)
        .max_dimension(cli.max_dimension)
        .resize_factor(cli.resize)
        .denoise(!cli.no_denoise)
        .enhance_contrast(!cli.no_contrast)
        .clahe_clip_limit(cli.clahe_clip)
        .clahe_tile_grid(cli.clahe_grid)
        .confidence_threshold(cli.confidence)
        .relaxed_confidence_threshold(cli.relaxed_confidence)
        .relaxed_retry(!cli.no_retry)
        .min_text_chars(cli.min_text_chars)
        .page_seg_mode(cli.psm.into())
        .relaxed_page_seg_mode(cli.relaxed_psm.into())
        .engine_mode(cli.oem.into())
        .language(cli.lang.clone())
        .ocr_timeout_secs(cli.ocr_timeout)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .min_analysis_chars(cli.min_analysis_chars)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref allowlist) = cli.allowlist {
        builder = builder.char_allowlist(allowlist.clone());
    }
    if let Some(ref path) = cli.tesseract {
        builder = builder.tesseract_path(path.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

// ── Rendering ────────────────────────────────────────────────────────────────

fn heading(title: &str) {
    println!("\n{}", bold(&cyan(title)));
}

fn print_image(info: &ImageInfo) {
    println!("Format:       {}", info.format);
    println!("Dimensions:   {}x{} px", info.width, info.height);
    println!("Colour:       {}", info.color);
    println!("Size:         {} bytes", info.size_bytes);
    println!(
        "Quality:      {:.2}  {}",
        info.quality.overall,
        dim(&format!(
            "(contrast {:.2}, sharpness {:.2}, brightness {:.2}, text {:.2})",
            info.quality.contrast,
            info.quality.sharpness,
            info.quality.brightness,
            info.quality.text_density
        ))
    );
}

fn print_text(extracted: &ExtractedText) {
    println!("{}", extracted.text);
    if extracted.relaxed {
        eprintln!(
            "{}",
            dim(&format!(
                "(read with relaxed OCR settings, threshold {:.2})",
                extracted.threshold
            ))
        );
    }
}

fn print_list(items: &[String]) {
    if items.is_empty() {
        println!("  {}", dim("none identified"));
    } else {
        for item in items {
            println!("  • {item}");
        }
    }
}

fn print_analysis(analysis: &AnalysisResult) {
    if let Some(ref reason) = analysis.degraded {
        println!("{} {}", yellow("⚠"), dim(reason));
    }

    heading("Summary");
    if analysis.summary.is_empty() {
        println!("  {}", dim("no summary"));
    } else {
        println!("  {}", analysis.summary);
    }

    heading("Ingredients");
    if analysis.ingredients.is_empty() {
        println!("  {}", dim("none identified"));
    }
    for ingredient in &analysis.ingredients {
        match ingredient.description {
            Some(ref d) => println!("  • {}  {}", bold(&ingredient.name), dim(d)),
            None => println!("  • {}", bold(&ingredient.name)),
        }
    }

    heading("Allergens");
    if analysis.allergens.is_empty() {
        println!("  {}", dim("none identified"));
    } else {
        for allergen in &analysis.allergens {
            println!("  {} {}", red("!"), allergen);
        }
    }

    heading("Dietary");
    print_list(&analysis.dietary_flags);

    let insights = &analysis.nutritional_insights;
    heading("Nutrition");
    if let Some(score) = insights.health_score {
        println!("  Health score: {}/10", bold(&score.to_string()));
    }
    if !insights.categories.is_empty() {
        println!("  Categories:   {}", insights.categories.join(", "));
    }
    if !insights.key_nutrients.is_empty() {
        println!("  Nutrients:    {}", insights.key_nutrients.join(", "));
    }
    if let Some(ref notes) = insights.health_notes {
        println!("  {notes}");
    }
}

fn print_report(report: &ScanReport) {
    heading("Extracted text");
    println!("  {}", report.extracted.text);
    print_analysis(&report.analysis);
    println!();
}

fn print_details(details: &IngredientDetails) {
    heading(&details.name);
    println!("  {}", details.description);
    println!("\n  {} {}", bold("Uses:"), details.uses);
    println!("  {} {}", bold("Nutrition:"), details.nutrition);
    println!("  {} {}", bold("Health:"), details.health_notes);
    if let Some(ref allergen) = details.allergen_info {
        println!("  {} {}", red("Allergens:"), allergen);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[tokio::test]
    async fn every_knob_reaches_the_config() {
        let cli = Cli::try_parse_from([
            "eatsafe",
            "label.jpg",
            "--relaxed-psm",
            "sparse-text",
            "--oem",
            "lstm",
            "--allowlist",
            "ABC,",
            "--min-dimension",
            "64",
            "--max-dimension",
            "4000",
            "--clahe-clip",
            "3.5",
            "--clahe-grid",
            "4",
            "--min-analysis-chars",
            "12",
        ])
        .unwrap();
        let config = build_config(&cli, None).await.unwrap();
        assert_eq!(config.relaxed_page_seg_mode, PageSegMode::SparseText);
        assert_eq!(config.engine_mode, OcrEngineMode::Lstm);
        assert_eq!(config.char_allowlist, "ABC,");
        assert_eq!((config.min_dimension, config.max_dimension), (64, 4000));
        assert_eq!(config.clahe_clip_limit, 3.5);
        assert_eq!(config.clahe_tile_grid, 4);
        assert_eq!(config.min_analysis_chars, 12);
    }

    #[test]
    fn explain_runs_without_a_spinner() {
        let explain = Cli::try_parse_from(["eatsafe", "--explain", "lecithin"]).unwrap();
        assert!(!shows_progress(&explain));
        let scan = Cli::try_parse_from(["eatsafe", "label.jpg"]).unwrap();
        assert!(shows_progress(&scan));
    }
}
