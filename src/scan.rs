//! Scan orchestration: validate → preprocess → extract → analyze.
//!
//! A [`Scanner`] holds its collaborators explicitly: the OCR engine, the
//! chat backend and the configuration. Nothing is looked up globally, so
//! tests build a scanner from in-memory doubles and embedding applications
//! can share one scanner between requests.
//!
//! Each call moves a private `ScanContext` through the stages one after
//! another on the caller's task. The first failing stage ends the scan with
//! its error; there is no partial report.

use crate::config::ScanConfig;
use crate::error::{EatSafeError, Stage};
use crate::output::{
    AnalysisResult, ExtractedText, ImageInfo, IngredientDetails, ScanReport, ScanStats,
};
use crate::pipeline::analyze::{Analyzer, TokenUsage};
use crate::pipeline::extract::extract_text;
use crate::pipeline::input::{resolve_input, UploadedImage};
use crate::pipeline::llm::{resolve_backend, ChatBackend};
use crate::pipeline::ocr::{OcrEngine, TesseractEngine};
use crate::pipeline::preprocess::{preprocess, upscale, PreprocessedImage};
use crate::pipeline::quality::image_info;
use crate::pipeline::validate::{validate, ValidatedImage};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-call state moved by value from stage to stage.
///
/// `S` is what the previous stage produced: the upload, then the decoded
/// image, the bitmap, the extracted text.
struct ScanContext<S> {
    started: Instant,
    stats: ScanStats,
    state: S,
}

impl ScanContext<UploadedImage> {
    fn new(upload: UploadedImage) -> Self {
        Self {
            started: Instant::now(),
            stats: ScanStats::default(),
            state: upload,
        }
    }
}

impl<S> ScanContext<S> {
    fn advance<T>(self, state: T) -> ScanContext<T> {
        ScanContext {
            started: self.started,
            stats: self.stats,
            state,
        }
    }

    fn finish(mut self) -> (S, ScanStats) {
        self.stats.total_ms = self.started.elapsed().as_millis() as u64;
        (self.state, self.stats)
    }
}

/// After validation.
struct Decoded {
    info: ImageInfo,
    validated: ValidatedImage,
}

/// After preprocessing.
struct Prepared {
    info: ImageInfo,
    bitmap: PreprocessedImage,
}

/// After text extraction.
struct Read {
    info: ImageInfo,
    extracted: ExtractedText,
}

/// Runs food-label scans.
pub struct Scanner {
    ocr: Arc<dyn OcrEngine>,
    backend: Option<Arc<dyn ChatBackend>>,
    config: ScanConfig,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("ocr", &self.ocr.name())
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("config", &self.config)
            .finish()
    }
}

impl Scanner {
    /// Scanner with every collaborator supplied by the caller.
    pub fn new(ocr: Arc<dyn OcrEngine>, backend: Arc<dyn ChatBackend>, config: ScanConfig) -> Self {
        Self {
            ocr,
            backend: Some(backend),
            config,
        }
    }

    /// Scanner that can extract text but not analyse it. Needs no API key.
    pub fn ocr_only(ocr: Arc<dyn OcrEngine>, config: ScanConfig) -> Self {
        Self {
            ocr,
            backend: None,
            config,
        }
    }

    /// Scanner with the Tesseract engine and the backend resolved from
    /// `config` and the environment (see [`resolve_backend`]).
    ///
    /// # Errors
    /// [`EatSafeError::ProviderNotConfigured`] when no LLM provider is available.
    pub fn from_config(config: ScanConfig) -> Result<Self, EatSafeError> {
        let backend = resolve_backend(&config)?;
        let ocr = Arc::new(TesseractEngine::from_config(&config));
        Ok(Self::new(ocr, backend, config))
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Run the full pipeline on an upload.
    pub async fn scan(&self, upload: UploadedImage) -> Result<ScanReport, EatSafeError> {
        let backend = self.backend()?;
        info!("Scanning {} ({} bytes)", upload.source, upload.len());

        let ctx = ScanContext::new(upload);
        let ctx = self.validate_stage(ctx).await?;
        let ctx = self.preprocess_stage(ctx).await?;
        let ctx = self.extract_stage(ctx).await?;
        let ctx = self.analyze_stage(ctx, backend).await?;

        let ((Read { info, extracted }, analysis), stats) = ctx.finish();
        info!(
            "Scan complete: {} ingredients, {} allergens, {}ms",
            analysis.ingredients.len(),
            analysis.allergens.len(),
            stats.total_ms
        );
        Ok(ScanReport {
            image: info,
            extracted,
            analysis,
            stats,
        })
    }

    /// Resolve a path or URL, then [`Scanner::scan`] it.
    pub async fn scan_path(&self, input: &str) -> Result<ScanReport, EatSafeError> {
        let upload = self.upload_stage(input).await?;
        self.scan(upload).await
    }

    /// Validate, preprocess and OCR an upload without calling the model.
    pub async fn extract(
        &self,
        upload: UploadedImage,
    ) -> Result<(ImageInfo, ExtractedText, ScanStats), EatSafeError> {
        let ctx = ScanContext::new(upload);
        let ctx = self.validate_stage(ctx).await?;
        let ctx = self.preprocess_stage(ctx).await?;
        let ctx = self.extract_stage(ctx).await?;
        let (Read { info, extracted }, stats) = ctx.finish();
        Ok((info, extracted, stats))
    }

    /// Resolve a path or URL, then [`Scanner::extract`] it.
    pub async fn extract_path(
        &self,
        input: &str,
    ) -> Result<(ImageInfo, ExtractedText, ScanStats), EatSafeError> {
        let upload = self.upload_stage(input).await?;
        self.extract(upload).await
    }

    /// Analyse text that was obtained some other way.
    pub async fn analyze_text(&self, text: &str) -> Result<AnalysisResult, EatSafeError> {
        Analyzer::new(self.backend()?.as_ref(), &self.config)
            .analyze(text)
            .await
    }

    /// Ask the model about a single ingredient.
    pub async fn explain(&self, ingredient: &str) -> Result<IngredientDetails, EatSafeError> {
        Analyzer::new(self.backend()?.as_ref(), &self.config)
            .ingredient_details(ingredient)
            .await
    }

    /// Blocking wrapper around [`Scanner::scan`].
    ///
    /// Drives the scan on a private current-thread runtime, so it must not
    /// be called from inside another Tokio runtime.
    pub fn scan_blocking(&self, upload: UploadedImage) -> Result<ScanReport, EatSafeError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EatSafeError::Internal(format!("Failed to create tokio runtime: {e}")))?
            .block_on(self.scan(upload))
    }

    // ── Stages ───────────────────────────────────────────────────────────

    fn backend(&self) -> Result<&Arc<dyn ChatBackend>, EatSafeError> {
        self.backend
            .as_ref()
            .ok_or_else(|| EatSafeError::ProviderNotConfigured {
                provider: "none".to_string(),
                hint: "This scanner was built for text extraction only.".to_string(),
            })
    }

    async fn upload_stage(&self, input: &str) -> Result<UploadedImage, EatSafeError> {
        let (upload, _) = self
            .timed(
                Stage::Upload,
                resolve_input(
                    input,
                    self.config.max_upload_bytes,
                    self.config.download_timeout_secs,
                ),
            )
            .await?;
        Ok(upload)
    }

    async fn validate_stage(
        &self,
        ctx: ScanContext<UploadedImage>,
    ) -> Result<ScanContext<Decoded>, EatSafeError> {
        let ScanContext {
            started,
            mut stats,
            state: upload,
        } = ctx;
        let (validated, ms) = self
            .timed(Stage::Validate, async { validate(upload, &self.config) })
            .await?;
        stats.validate_ms = ms;
        let info = image_info(&validated);
        debug!(
            "{} {}x{}, quality {:.2}",
            info.format, info.width, info.height, info.quality.overall
        );
        Ok(ScanContext {
            started,
            stats,
            state: Decoded { info, validated },
        })
    }

    async fn preprocess_stage(
        &self,
        ctx: ScanContext<Decoded>,
    ) -> Result<ScanContext<Prepared>, EatSafeError> {
        let Decoded { info, validated } = &ctx.state;
        let options = self.config.preprocess_options();
        let (bitmap, ms) = self
            .timed(Stage::Preprocess, async {
                let scaled = upscale(&validated.image, self.config.resize_factor);
                Ok(preprocess(&scaled, &options))
            })
            .await?;
        debug!(
            "Bitmap {}x{}, Otsu threshold {}",
            bitmap.image.width(),
            bitmap.image.height(),
            bitmap.threshold
        );
        let info = info.clone();
        let mut ctx = ctx.advance(Prepared { info, bitmap });
        ctx.stats.preprocess_ms = ms;
        Ok(ctx)
    }

    async fn extract_stage(
        &self,
        ctx: ScanContext<Prepared>,
    ) -> Result<ScanContext<Read>, EatSafeError> {
        let (extracted, ms) = self
            .timed(
                Stage::Extract,
                extract_text(self.ocr.as_ref(), &ctx.state.bitmap.image, &self.config),
            )
            .await?;
        if extracted.relaxed {
            info!(
                "Relaxed OCR pass kept {} words (threshold {:.2})",
                extracted.tokens.len(),
                extracted.threshold
            );
        }
        let attempts = extracted.attempts;
        let ScanContext {
            started,
            mut stats,
            state: Prepared { info, .. },
        } = ctx;
        stats.extract_ms = ms;
        stats.ocr_attempts = attempts;
        Ok(ScanContext {
            started,
            stats,
            state: Read { info, extracted },
        })
    }

    async fn analyze_stage(
        &self,
        ctx: ScanContext<Read>,
        backend: &Arc<dyn ChatBackend>,
    ) -> Result<ScanContext<(Read, AnalysisResult)>, EatSafeError> {
        let analyzer = Analyzer::new(backend.as_ref(), &self.config);
        let ((analysis, usage), ms): ((AnalysisResult, TokenUsage), u64) = self
            .timed(
                Stage::Analyze,
                analyzer.analyze_with_usage(&ctx.state.extracted.text),
            )
            .await?;
        let ScanContext {
            started,
            mut stats,
            state,
        } = ctx;
        stats.analyze_ms = ms;
        stats.input_tokens = usage.prompt_tokens;
        stats.output_tokens = usage.completion_tokens;
        Ok(ScanContext {
            started,
            stats,
            state: (state, analysis),
        })
    }

    /// Run one stage with logging, timing and progress events.
    async fn timed<T, F>(&self, stage: Stage, fut: F) -> Result<(T, u64), EatSafeError>
    where
        F: Future<Output = Result<T, EatSafeError>>,
    {
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_stage_start(stage);
        }
        let start = Instant::now();

        match fut.await {
            Ok(value) => {
                let ms = start.elapsed().as_millis() as u64;
                debug!("{} finished in {}ms", stage, ms);
                if let Some(cb) = cb {
                    cb.on_stage_complete(stage, ms);
                }
                Ok((value, ms))
            }
            Err(e) => {
                warn!("{} failed: {}", stage, e);
                if let Some(cb) = cb {
                    cb.on_stage_error(stage, &e.to_string());
                }
                Err(e)
            }
        }
    }
}

/// Validate an upload and describe it, without OCR or an API key.
pub fn inspect_upload(upload: UploadedImage, config: &ScanConfig) -> Result<ImageInfo, EatSafeError> {
    let validated = validate(upload, config)?;
    Ok(image_info(&validated))
}

/// Resolve a path or URL and describe the image, without OCR or an API key.
pub async fn inspect(input: &str, config: &ScanConfig) -> Result<ImageInfo, EatSafeError> {
    let upload = resolve_input(
        input,
        config.max_upload_bytes,
        config.download_timeout_secs,
    )
    .await?;
    inspect_upload(upload, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcrSettings;
    use crate::output::OcrToken;
    use crate::pipeline::llm::{ChatReply, ChatRequest};
    use crate::progress::ScanProgressCallback;
    use async_trait::async_trait;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use std::io::Cursor;
    use std::sync::Mutex;

    struct Words(&'static [&'static str]);

    #[async_trait]
    impl OcrEngine for Words {
        fn name(&self) -> &str {
            "words"
        }

        async fn recognize(
            &self,
            _image: &GrayImage,
            _settings: &OcrSettings,
        ) -> Result<Vec<OcrToken>, EatSafeError> {
            Ok(self.0.iter().map(|w| OcrToken::new(*w, 0.9)).collect())
        }
    }

    struct Json(&'static str);

    #[async_trait]
    impl ChatBackend for Json {
        fn name(&self) -> &str {
            "json"
        }

        async fn complete(&self, _request: &ChatRequest) -> Result<ChatReply, EatSafeError> {
            Ok(ChatReply {
                content: self.0.to_string(),
                prompt_tokens: 10,
                completion_tokens: 20,
            })
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ScanProgressCallback for Recorder {
        fn on_stage_start(&self, stage: Stage) {
            self.0.lock().unwrap().push(format!("start {stage}"));
        }

        fn on_stage_error(&self, stage: Stage, _error: &str) {
            self.0.lock().unwrap().push(format!("error {stage}"));
        }
    }

    fn png(width: u32, height: u32) -> UploadedImage {
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, _| {
            if x % 7 < 3 {
                Luma([30])
            } else {
                Luma([220])
            }
        }));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        UploadedImage::from_bytes(buf)
    }

    #[tokio::test]
    async fn full_scan_fills_every_section() {
        let scanner = Scanner::new(
            Arc::new(Words(&["INGREDIENTS:", "OATS,", "HONEY"])),
            Arc::new(Json(r#"{"ingredients": ["oats", "honey"], "summary": "Granola."}"#)),
            ScanConfig::default(),
        );
        let report = scanner.scan(png(120, 120)).await.unwrap();
        assert_eq!(report.image.format, "png");
        assert_eq!(report.extracted.text, "INGREDIENTS: OATS, HONEY");
        assert!(report.analysis.has_ingredient("honey"));
        assert_eq!(report.stats.ocr_attempts, 1);
        assert_eq!(report.stats.input_tokens, 10);
        assert_eq!(report.stats.output_tokens, 20);
    }

    #[tokio::test]
    async fn failing_stage_is_reported_once() {
        let recorder = Arc::new(Recorder::default());
        let config = ScanConfig::builder()
            .progress_callback(recorder.clone())
            .build()
            .unwrap();
        let scanner = Scanner::new(Arc::new(Words(&[])), Arc::new(Json("{}")), config);

        let err = scanner
            .scan(UploadedImage::from_bytes(b"nope".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, EatSafeError::InvalidFormat { .. }));
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["start validate".to_string(), "error validate".to_string()]
        );
    }

    #[tokio::test]
    async fn ocr_only_scanner_refuses_analysis() {
        let scanner = Scanner::ocr_only(Arc::new(Words(&["SALT"])), ScanConfig::default());
        let err = scanner.analyze_text("water, salt").await.unwrap_err();
        assert!(matches!(err, EatSafeError::ProviderNotConfigured { .. }));
    }

    #[test]
    fn inspect_needs_no_collaborators() {
        let info = inspect_upload(png(150, 110), &ScanConfig::default()).unwrap();
        assert_eq!((info.width, info.height), (150, 110));
        assert!(info.quality.overall > 0.0);
    }
}
