//! OCR engine seam and the Tesseract implementation.
//!
//! The scanner only talks to [`OcrEngine`]; the concrete engine is
//! constructed once by the caller and injected, so tests can substitute a
//! scripted engine and the real one is never a hidden global.
//!
//! [`TesseractEngine`] drives the `tesseract` binary rather than linking
//! libtesseract: the PNG-encoded bitmap is piped to `stdin` and word-level
//! results come back on `stdout` in Tesseract's TSV format.
//!
//! ```text
//! tesseract stdin stdout --oem 3 --psm 6 -l eng \
//!     -c tessedit_char_whitelist=ABC…%/ tsv
//! ```

use crate::config::{OcrSettings, ScanConfig};
use crate::error::EatSafeError;
use crate::output::OcrToken;
use async_trait::async_trait;
use image::GrayImage;
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// An OCR engine: bitmap in, `(token, confidence)` pairs out, in reading order.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short name for logs and reports.
    fn name(&self) -> &str;

    /// Recognise words in `image` under `settings`.
    ///
    /// Confidence values are normalised to [0, 1] by [`OcrToken::new`].
    async fn recognize(
        &self,
        image: &GrayImage,
        settings: &OcrSettings,
    ) -> Result<Vec<OcrToken>, EatSafeError>;
}

/// Runs the `tesseract` command-line program.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
    timeout: Duration,
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            timeout: Duration::from_secs(60),
        }
    }
}

impl TesseractEngine {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Engine using `config.tesseract_path` (or `tesseract` on PATH) and `config.ocr_timeout_secs`.
    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(
            config
                .tesseract_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("tesseract")),
            Duration::from_secs(config.ocr_timeout_secs),
        )
    }

    /// Command-line arguments for one invocation.
    pub fn args(settings: &OcrSettings) -> Vec<String> {
        vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "--oem".to_string(),
            settings.engine_mode.as_arg().to_string(),
            "--psm".to_string(),
            settings.page_seg_mode.as_arg().to_string(),
            "-l".to_string(),
            settings.language.clone(),
            "-c".to_string(),
            format!("tessedit_char_whitelist={}", settings.char_allowlist),
            "tsv".to_string(),
        ]
    }

    async fn run(&self, png: Vec<u8>, settings: &OcrSettings) -> Result<String, EatSafeError> {
        let mut child = Command::new(&self.binary)
            .args(Self::args(settings))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EatSafeError::OcrEngineFailed {
                detail: format!(
                    "could not start '{}': {e}. Is Tesseract installed and on PATH?",
                    self.binary.display()
                ),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&png)
                .await
                .map_err(|e| EatSafeError::OcrEngineFailed {
                    detail: format!("failed to pipe image to tesseract: {e}"),
                })?;
            // Dropping stdin closes the pipe so tesseract sees EOF.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EatSafeError::OcrEngineFailed {
                detail: format!("failed to wait for tesseract: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EatSafeError::OcrEngineFailed {
                detail: format!("tesseract exited with {}: {}", output.status, stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(
        &self,
        image: &GrayImage,
        settings: &OcrSettings,
    ) -> Result<Vec<OcrToken>, EatSafeError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| EatSafeError::Internal(format!("PNG encoding for OCR failed: {e}")))?;

        debug!(
            "Running tesseract on {}x{} bitmap (psm {})",
            image.width(),
            image.height(),
            settings.page_seg_mode.as_arg()
        );

        let tsv = match tokio::time::timeout(self.timeout, self.run(png, settings)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("tesseract timed out after {:?}", self.timeout);
                return Err(EatSafeError::OcrEngineFailed {
                    detail: format!("tesseract timed out after {}s", self.timeout.as_secs()),
                });
            }
        };

        let tokens = parse_tsv(&tsv);
        debug!("tesseract returned {} words", tokens.len());
        Ok(tokens)
    }
}

/// Parse Tesseract TSV output into word tokens.
///
/// Columns: `level page_num block_num par_num line_num word_num left top
/// width height conf text`. Only word rows (level 5) carry text; their
/// `conf` is 0–100, or -1 when the engine has no estimate. Rows with a
/// negative confidence or blank text are skipped. Malformed rows are
/// ignored rather than failing the whole page.
pub fn parse_tsv(tsv: &str) -> Vec<OcrToken> {
    tsv.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.splitn(12, '\t').collect();
            if cols.len() < 12 || cols[0].trim() != "5" {
                return None;
            }
            let conf: f32 = cols[10].trim().parse().ok()?;
            let text = cols[11].trim();
            if conf < 0.0 || text.is_empty() {
                return None;
            }
            Some(OcrToken::new(text, conf / 100.0))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OcrEngineMode, PageSegMode};

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t
2\t1\t1\t0\t0\t0\t20\t30\t600\t40\t-1\t
5\t1\t1\t1\t1\t1\t20\t30\t180\t40\t96.512\tINGREDIENTS:
5\t1\t1\t1\t1\t2\t210\t30\t90\t40\t91\tWATER,
5\t1\t1\t1\t1\t3\t310\t30\t90\t40\t12.5\tSUGAR,
5\t1\t1\t1\t1\t4\t410\t30\t90\t40\t-1\t
5\t1\t1\t1\t1\t5\t510\t30\t90\t40\t88\tSALT
garbage line";

    #[test]
    fn parses_word_rows_only() {
        let tokens = parse_tsv(SAMPLE_TSV);
        let words: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(words, vec!["INGREDIENTS:", "WATER,", "SUGAR,", "SALT"]);
    }

    #[test]
    fn confidences_are_normalised() {
        let tokens = parse_tsv(SAMPLE_TSV);
        assert!((tokens[0].confidence() - 0.96512).abs() < 1e-4);
        assert!((tokens[2].confidence() - 0.125).abs() < 1e-4);
        assert!(tokens.iter().all(|t| (0.0..=1.0).contains(&t.confidence())));
    }

    #[test]
    fn empty_output_yields_no_tokens() {
        assert!(parse_tsv("").is_empty());
    }

    #[test]
    fn args_carry_settings() {
        let settings = OcrSettings {
            page_seg_mode: PageSegMode::SparseText,
            engine_mode: OcrEngineMode::Lstm,
            language: "eng+fra".into(),
            char_allowlist: "ABC".into(),
        };
        let args = TesseractEngine::args(&settings);
        assert_eq!(args[0], "stdin");
        assert!(args.windows(2).any(|w| w[0] == "--psm" && w[1] == "11"));
        assert!(args.windows(2).any(|w| w[0] == "--oem" && w[1] == "1"));
        assert!(args.windows(2).any(|w| w[0] == "-l" && w[1] == "eng+fra"));
        assert!(args.contains(&"tessedit_char_whitelist=ABC".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("tsv"));
    }

    #[test]
    fn from_config_uses_path_and_timeout() {
        let config = ScanConfig::builder()
            .tesseract_path("/opt/tess/bin/tesseract")
            .ocr_timeout_secs(7)
            .build()
            .unwrap();
        let engine = TesseractEngine::from_config(&config);
        assert_eq!(engine.binary, PathBuf::from("/opt/tess/bin/tesseract"));
        assert_eq!(engine.timeout, Duration::from_secs(7));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_engine_is_killed_after_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("tesseract");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let engine = TesseractEngine::new(&script, Duration::from_secs(1));
        let img = GrayImage::from_pixel(10, 10, image::Luma([255]));
        let started = std::time::Instant::now();
        let err = engine
            .recognize(&img, &OcrSettings::default())
            .await
            .unwrap_err();
        match err {
            EatSafeError::OcrEngineFailed { detail } => {
                assert_eq!(detail, "tesseract timed out after 1s")
            }
            other => panic!("expected OcrEngineFailed, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_binary_is_engine_failure() {
        let engine = TesseractEngine::new(
            "/nonexistent/bin/tesseract-for-tests",
            Duration::from_secs(5),
        );
        let img = GrayImage::from_pixel(10, 10, image::Luma([255]));
        let err = engine
            .recognize(&img, &OcrSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EatSafeError::OcrEngineFailed { .. }));
    }
}
