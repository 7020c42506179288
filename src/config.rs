//! Configuration types for a label scan.
//!
//! All scan behaviour is controlled through [`ScanConfig`], built via its
//! [`ScanConfigBuilder`]. Keeping every knob in one struct makes it trivial to
//! log the exact settings of a run and to diff two runs that produced
//! different text from the same photo.
//!
//! Stage-specific views ([`PreprocessOptions`], [`OcrSettings`]) are derived
//! from the config on demand so each stage only sees the fields it uses.

use crate::error::EatSafeError;
use crate::pipeline::llm::ChatBackend;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Characters Tesseract may emit for food-label text.
pub const DEFAULT_CHAR_ALLOWLIST: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789()[]{},.;:-_%/";

/// Default LLM model used when neither the config nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for a label scan.
///
/// Built via [`ScanConfig::builder()`] or using [`ScanConfig::default()`].
///
/// # Example
/// ```rust
/// use eatsafe::ScanConfig;
///
/// let config = ScanConfig::builder()
///     .confidence_threshold(0.4)
///     .resize_factor(2.0)
///     .model("gpt-4o-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ScanConfig {
    /// Largest accepted upload in bytes. Default: 200 MiB.
    pub max_upload_bytes: u64,

    /// Minimum width and height in pixels. Default: 100.
    ///
    /// Below this Tesseract cannot resolve label-sized glyphs at all.
    pub min_dimension: u32,

    /// Maximum width or height in pixels. Default: 10 000.
    ///
    /// Caps decode memory: a 10 000 × 10 000 RGBA bitmap is already 400 MB.
    pub max_dimension: u32,

    /// Upscale factor applied before preprocessing. Range: 0.5–3.0. Default: 1.5.
    ///
    /// Phone photos of small print put each glyph at 10–15 px; Tesseract is
    /// most accurate around 20–30 px cap height.
    pub resize_factor: f32,

    /// Apply the 3×3 median denoise filter. Default: true.
    pub denoise: bool,

    /// Apply CLAHE contrast enhancement. Default: true.
    pub enhance_contrast: bool,

    /// CLAHE clip limit (multiple of the mean bin height). Default: 2.0.
    pub clahe_clip_limit: f32,

    /// CLAHE tile grid size per side. Default: 8.
    pub clahe_tile_grid: u32,

    /// Minimum token confidence (0–1) for the first OCR pass. Default: 0.30.
    pub confidence_threshold: f32,

    /// Minimum token confidence (0–1) for the relaxed retry. Default: 0.10.
    pub relaxed_confidence_threshold: f32,

    /// Re-run OCR once with relaxed settings when the first pass is too short. Default: true.
    pub relaxed_retry: bool,

    /// Minimum length of the cleaned OCR text, in characters. Default: 10.
    pub min_text_chars: usize,

    /// Page segmentation mode for the first pass. Default: [`PageSegMode::SingleBlock`].
    pub page_seg_mode: PageSegMode,

    /// Page segmentation mode for the relaxed retry. Default: [`PageSegMode::Auto`].
    ///
    /// Photos that fail as one uniform block are often skewed or have
    /// several columns; full automatic layout analysis recovers some of them.
    pub relaxed_page_seg_mode: PageSegMode,

    /// Tesseract engine mode. Default: [`OcrEngineMode::Default`].
    pub engine_mode: OcrEngineMode,

    /// Tesseract language code(s), e.g. "eng" or "eng+fra". Default: "eng".
    pub language: String,

    /// Characters the OCR engine may emit. Default: [`DEFAULT_CHAR_ALLOWLIST`].
    pub char_allowlist: String,

    /// Path to the `tesseract` binary. If None, `tesseract` is looked up on PATH.
    pub tesseract_path: Option<PathBuf>,

    /// Per-OCR-call timeout in seconds. Default: 60.
    pub ocr_timeout_secs: u64,

    /// LLM model identifier, e.g. "gpt-4o". If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed chat backend. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn ChatBackend>>,

    /// Sampling temperature for the analysis call. Default: 0.3.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate for one analysis. Default: 1500.
    pub max_tokens: usize,

    /// Per-LLM-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Shortest ingredient text worth sending to the model. Default: 5.
    pub min_analysis_chars: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Receives stage events while a scan runs.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 200 * 1024 * 1024,
            min_dimension: 100,
            max_dimension: 10_000,
            resize_factor: 1.5,
            denoise: true,
            enhance_contrast: true,
            clahe_clip_limit: 2.0,
            clahe_tile_grid: 8,
            confidence_threshold: 0.30,
            relaxed_confidence_threshold: 0.10,
            relaxed_retry: true,
            min_text_chars: 10,
            page_seg_mode: PageSegMode::SingleBlock,
            relaxed_page_seg_mode: PageSegMode::Auto,
            engine_mode: OcrEngineMode::Default,
            language: "eng".to_string(),
            char_allowlist: DEFAULT_CHAR_ALLOWLIST.to_string(),
            tesseract_path: None,
            ocr_timeout_secs: 60,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.3,
            max_tokens: 1500,
            api_timeout_secs: 60,
            system_prompt: None,
            min_analysis_chars: 5,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ScanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanConfig")
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("min_dimension", &self.min_dimension)
            .field("max_dimension", &self.max_dimension)
            .field("resize_factor", &self.resize_factor)
            .field("denoise", &self.denoise)
            .field("enhance_contrast", &self.enhance_contrast)
            .field("confidence_threshold", &self.confidence_threshold)
            .field(
                "relaxed_confidence_threshold",
                &self.relaxed_confidence_threshold,
            )
            .field("relaxed_retry", &self.relaxed_retry)
            .field("min_text_chars", &self.min_text_chars)
            .field("page_seg_mode", &self.page_seg_mode)
            .field("relaxed_page_seg_mode", &self.relaxed_page_seg_mode)
            .field("language", &self.language)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|p| p.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ScanConfig {
    /// Create a new builder for `ScanConfig`.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder {
            config: Self::default(),
        }
    }

    /// The preprocessing view of this config.
    pub fn preprocess_options(&self) -> PreprocessOptions {
        PreprocessOptions {
            denoise: self.denoise,
            enhance_contrast: self.enhance_contrast,
            clahe_clip_limit: self.clahe_clip_limit,
            clahe_tile_grid: self.clahe_tile_grid,
        }
    }

    /// OCR settings for the first pass.
    pub fn ocr_settings(&self) -> OcrSettings {
        OcrSettings {
            page_seg_mode: self.page_seg_mode,
            engine_mode: self.engine_mode,
            language: self.language.clone(),
            char_allowlist: self.char_allowlist.clone(),
        }
    }

    /// OCR settings for the relaxed retry.
    pub fn relaxed_ocr_settings(&self) -> OcrSettings {
        OcrSettings {
            page_seg_mode: self.relaxed_page_seg_mode,
            ..self.ocr_settings()
        }
    }

    /// Model to request, falling back to [`DEFAULT_MODEL`].
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`ScanConfig`].
#[derive(Debug)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn min_dimension(mut self, px: u32) -> Self {
        self.config.min_dimension = px;
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px;
        self
    }

    pub fn resize_factor(mut self, factor: f32) -> Self {
        self.config.resize_factor = factor.clamp(0.5, 3.0);
        self
    }

    pub fn denoise(mut self, v: bool) -> Self {
        self.config.denoise = v;
        self
    }

    pub fn enhance_contrast(mut self, v: bool) -> Self {
        self.config.enhance_contrast = v;
        self
    }

    pub fn clahe_clip_limit(mut self, limit: f32) -> Self {
        self.config.clahe_clip_limit = limit.max(1.0);
        self
    }

    pub fn clahe_tile_grid(mut self, n: u32) -> Self {
        self.config.clahe_tile_grid = n.clamp(1, 64);
        self
    }

    pub fn confidence_threshold(mut self, t: f32) -> Self {
        self.config.confidence_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn relaxed_confidence_threshold(mut self, t: f32) -> Self {
        self.config.relaxed_confidence_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn relaxed_retry(mut self, v: bool) -> Self {
        self.config.relaxed_retry = v;
        self
    }

    pub fn min_text_chars(mut self, n: usize) -> Self {
        self.config.min_text_chars = n;
        self
    }

    pub fn page_seg_mode(mut self, mode: PageSegMode) -> Self {
        self.config.page_seg_mode = mode;
        self
    }

    pub fn relaxed_page_seg_mode(mut self, mode: PageSegMode) -> Self {
        self.config.relaxed_page_seg_mode = mode;
        self
    }

    pub fn engine_mode(mut self, mode: OcrEngineMode) -> Self {
        self.config.engine_mode = mode;
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn char_allowlist(mut self, allowlist: impl Into<String>) -> Self {
        self.config.char_allowlist = allowlist.into();
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_path = Some(path.into());
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn ChatBackend>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn min_analysis_chars(mut self, n: usize) -> Self {
        self.config.min_analysis_chars = n;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ScanConfig, EatSafeError> {
        let c = &self.config;
        if c.min_dimension == 0 || c.min_dimension > c.max_dimension {
            return Err(EatSafeError::InvalidConfig(format!(
                "dimension bounds must satisfy 0 < min ≤ max, got {}..{}",
                c.min_dimension, c.max_dimension
            )));
        }
        if c.relaxed_confidence_threshold > c.confidence_threshold {
            return Err(EatSafeError::InvalidConfig(format!(
                "relaxed threshold {} is stricter than the first-pass threshold {}",
                c.relaxed_confidence_threshold, c.confidence_threshold
            )));
        }
        if c.char_allowlist.is_empty() {
            return Err(EatSafeError::InvalidConfig(
                "character allowlist must not be empty".into(),
            ));
        }
        if c.language.trim().is_empty() {
            return Err(EatSafeError::InvalidConfig(
                "OCR language must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Stage views ──────────────────────────────────────────────────────────

/// Knobs of the preprocessing stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessOptions {
    pub denoise: bool,
    pub enhance_contrast: bool,
    pub clahe_clip_limit: f32,
    pub clahe_tile_grid: u32,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        ScanConfig::default().preprocess_options()
    }
}

/// Everything the OCR engine is invoked with besides the bitmap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrSettings {
    pub page_seg_mode: PageSegMode,
    pub engine_mode: OcrEngineMode,
    pub language: String,
    pub char_allowlist: String,
}

impl Default for OcrSettings {
    fn default() -> Self {
        ScanConfig::default().ocr_settings()
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Tesseract page segmentation mode (`--psm`).
///
/// Only the modes that make sense for a photographed label are exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageSegMode {
    /// Fully automatic page segmentation, no OSD (3).
    Auto,
    /// A single column of text of variable sizes (4).
    SingleColumn,
    /// A single uniform block of text (6). (default)
    #[default]
    SingleBlock,
    /// A single text line (7).
    SingleLine,
    /// Sparse text in no particular order (11).
    SparseText,
}

impl PageSegMode {
    /// The numeric value passed to `--psm`.
    pub fn as_arg(self) -> u8 {
        match self {
            PageSegMode::Auto => 3,
            PageSegMode::SingleColumn => 4,
            PageSegMode::SingleBlock => 6,
            PageSegMode::SingleLine => 7,
            PageSegMode::SparseText => 11,
        }
    }
}

/// Tesseract engine mode (`--oem`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OcrEngineMode {
    /// Legacy engine only (0).
    Legacy,
    /// Neural LSTM engine only (1).
    Lstm,
    /// Legacy + LSTM (2).
    Combined,
    /// Whatever the installed traineddata supports (3). (default)
    #[default]
    Default,
}

impl OcrEngineMode {
    /// The numeric value passed to `--oem`.
    pub fn as_arg(self) -> u8 {
        match self {
            OcrEngineMode::Legacy => 0,
            OcrEngineMode::Lstm => 1,
            OcrEngineMode::Combined => 2,
            OcrEngineMode::Default => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_label_tuning() {
        let c = ScanConfig::default();
        assert_eq!(c.min_dimension, 100);
        assert_eq!(c.page_seg_mode.as_arg(), 6);
        assert_eq!(c.engine_mode.as_arg(), 3);
        assert!((c.confidence_threshold - 0.30).abs() < f32::EPSILON);
        assert_eq!(c.model_or_default(), "gpt-4o");
    }

    #[test]
    fn builder_clamps_ranges() {
        let c = ScanConfig::builder()
            .resize_factor(9.0)
            .confidence_threshold(1.5)
            .temperature(-1.0)
            .build()
            .unwrap();
        assert_eq!(c.resize_factor, 3.0);
        assert_eq!(c.confidence_threshold, 1.0);
        assert_eq!(c.temperature, 0.0);
    }

    #[test]
    fn relaxed_threshold_must_not_be_stricter() {
        let err = ScanConfig::builder()
            .confidence_threshold(0.2)
            .relaxed_confidence_threshold(0.5)
            .build()
            .unwrap_err();
        assert!(matches!(err, EatSafeError::InvalidConfig(_)));
    }

    #[test]
    fn inverted_dimension_bounds_rejected() {
        let err = ScanConfig::builder()
            .min_dimension(500)
            .max_dimension(400)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("dimension"));
    }

    #[test]
    fn relaxed_settings_only_change_psm() {
        let c = ScanConfig::default();
        let strict = c.ocr_settings();
        let relaxed = c.relaxed_ocr_settings();
        assert_eq!(strict.char_allowlist, relaxed.char_allowlist);
        assert_eq!(strict.language, relaxed.language);
        assert_eq!(relaxed.page_seg_mode, PageSegMode::Auto);
    }
}
