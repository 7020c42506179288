//! # eatsafe
//!
//! Read the ingredient list off a photo of a food label and explain it.
//!
//! A photographed label goes through four stages. Each stage can fail with
//! its own [`EatSafeError`] variant, and the first failure ends the scan.
//!
//! ```text
//! photo
//!  │
//!  ├─ 1. Validate    JPEG/PNG/BMP/TIFF, not truncated, 100–10 000 px
//!  ├─ 2. Preprocess  upscale, grayscale, median, CLAHE, Otsu → 0/255 bitmap
//!  ├─ 3. Extract     Tesseract words above a confidence threshold,
//!  │                 one relaxed retry when too little text survives
//!  └─ 4. Analyze     LLM prompt → ingredients, allergens, dietary flags
//! ```
//!
//! OCR and language-model inference are not implemented here. Tesseract runs
//! as a child process behind the [`OcrEngine`] trait, and the model is any
//! `edgequake-llm` provider behind the [`ChatBackend`] trait.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eatsafe::{ScanConfig, Scanner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let scanner = Scanner::from_config(ScanConfig::default())?;
//!     let report = scanner.scan_path("label.jpg").await?;
//!     println!("{}", report.extracted.text);
//!     for ingredient in &report.analysis.ingredients {
//!         println!("- {}", ingredient.name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `eatsafe` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ## Requirements
//!
//! The `tesseract` binary with English language data must be on `PATH`
//! (or set [`ScanConfig::tesseract_path`]).

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod scan;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    OcrEngineMode, OcrSettings, PageSegMode, PreprocessOptions, ScanConfig, ScanConfigBuilder,
};
pub use error::{EatSafeError, Stage};
pub use output::{
    AnalysisResult, ExtractedText, ImageInfo, Ingredient, IngredientDetails, NutritionalInsights,
    OcrToken, QualityScore, ScanReport, ScanStats,
};
pub use pipeline::input::UploadedImage;
pub use pipeline::llm::{ChatBackend, ChatReply, ChatRequest, EdgequakeBackend};
pub use pipeline::ocr::{OcrEngine, TesseractEngine};
pub use progress::{NoopProgressCallback, ProgressCallback, ScanProgressCallback};
pub use scan::{inspect, inspect_upload, Scanner};
